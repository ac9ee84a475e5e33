//! Output formatting module
//!
//! Provides various output formats for run reports.

mod formatter;

pub use formatter::{write_report_to_file, OutputFormat, ReportFormatter};
