//! Output module
//!
//! Result formatting and live progress reporting.

mod formatter;
mod reporter;

pub use formatter::{write_results, OutputFormat, ResultFormatter};
pub use reporter::Reporter;
