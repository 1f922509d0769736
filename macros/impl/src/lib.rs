//! Procedural macro implementations re-exported by `ipcbridge-macros`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn, LitStr};

/// Run a test function with a [tracing] subscriber that captures log output for the test.
///
/// The maximum level defaults to `DEBUG` and can be overridden with a string literal:
/// `#[test_traced("TRACE")]`.
///
/// Output is written through the test writer, so it is only shown for failing tests (or with
/// `--nocapture`).
///
/// # Example
/// ```rust,ignore
/// use ipcbridge_macros::test_traced;
/// use tracing::{debug, info};
///
/// #[test_traced("INFO")]
/// fn test_info_level() {
///     info!("This is an info log");
///     debug!("This is a debug log (won't be shown)");
///     assert_eq!(2 + 2, 4);
/// }
/// ```
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    // Parse the log level from the attribute (default to DEBUG)
    let level = if attr.is_empty() {
        LitStr::new("DEBUG", proc_macro2::Span::call_site())
    } else {
        parse_macro_input!(attr as LitStr)
    };
    let level_ident = match level.value().to_ascii_uppercase().as_str() {
        "TRACE" => quote! { TRACE },
        "DEBUG" => quote! { DEBUG },
        "INFO" => quote! { INFO },
        "WARN" => quote! { WARN },
        "ERROR" => quote! { ERROR },
        _ => {
            return syn::Error::new(
                level.span(),
                "invalid log level: expected TRACE, DEBUG, INFO, WARN, or ERROR",
            )
            .to_compile_error()
            .into();
        }
    };

    // Extract function components
    let attrs = input.attrs;
    let vis = input.vis;
    let sig = input.sig;
    let block = input.block;

    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let subscriber = ipcbridge_macros::tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(ipcbridge_macros::tracing::Level::#level_ident)
                .with_line_number(true)
                .finish();
            let dispatcher = ipcbridge_macros::tracing::Dispatch::new(subscriber);
            ipcbridge_macros::tracing::dispatcher::with_default(&dispatcher, || #block)
        }
    };
    TokenStream::from(expanded)
}
