//! Augment tests with procedural macros.
//!
//! # Status
//!
//! `ipcbridge-macros` is only used by tests within this workspace.

pub use ipcbridge_proc_macros::test_traced;

// Hidden from docs because these are needed for the proc macros to use 3rd
// party crates.
#[doc(hidden)]
pub use ::tracing;
#[doc(hidden)]
pub use ::tracing_subscriber;
