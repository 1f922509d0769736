#[cfg(test)]
mod tests {
    use ipcbridge_macros::test_traced;
    use tracing::{debug, error, info, trace};

    #[test_traced("INFO")]
    fn test_info_level() {
        info!("This is an info log");
        debug!("This is a debug log (won't be shown)");
        assert_eq!(2 + 2, 4);
    }

    #[test_traced]
    fn test_default_level() {
        debug!("This is a debug log");
        assert_eq!(3 * 3, 9);
    }

    #[test_traced("ERROR")]
    fn test_error_level() {
        error!("This is an error log");
        assert_eq!(5 * 2, 10);
    }

    #[test_traced("TRACE")]
    fn test_trace_level_with_early_return() {
        trace!(value = 7, "This is a trace log");
        if 7 * 7 == 49 {
            return;
        }
        unreachable!();
    }

    #[test_traced]
    #[should_panic(expected = "expected failure")]
    fn test_panic_propagates() {
        panic!("expected failure");
    }
}
