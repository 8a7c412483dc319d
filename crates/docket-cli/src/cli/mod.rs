//! Command-line interface for docket.

mod commands;
pub mod helpers;

pub use commands::{is_verbose, run};
