//! Output formatters for run reports
//!
//! Provides JSON, Table, CSV, and summary output formats.

#![allow(dead_code)]

use std::io::Write;

use crate::report::{FileOutcome, Report};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Report formatter
pub struct ReportFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ReportFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format a full run report
    pub fn format_report(&self, report: &Report) -> String {
        match self.format {
            OutputFormat::Table => self.format_report_table(report),
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Csv => self.format_report_csv(report),
            OutputFormat::Summary => self.format_report_brief(report),
        }
    }

    /// Format a single file outcome
    pub fn format_outcome(&self, outcome: &FileOutcome) -> String {
        let status_str = if self.colorize {
            if outcome.is_clean() {
                "\x1b[32m✓ PASS\x1b[0m"
            } else {
                "\x1b[31m✗ FAIL\x1b[0m"
            }
        } else if outcome.is_clean() {
            "✓ PASS"
        } else {
            "✗ FAIL"
        };

        format!(
            "{:40} [{:11}] {} {:3} passing, {:2} failing [{:>6}ms]",
            outcome.file.display().to_string(),
            outcome.runner.name(),
            status_str,
            outcome.passing,
            outcome.errors.len(),
            outcome.duration_ms
        )
    }

    fn format_report_table(&self, report: &Report) -> String {
        let mut output = String::new();

        output.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        for outcome in report.outcomes() {
            output.push_str(&format!("  {}\n", self.format_outcome(outcome)));
        }
        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", report.files_passed())
        } else {
            report.files_passed().to_string()
        };
        let fail_str = if self.colorize && report.files_failed() > 0 {
            format!("\x1b[31m{}\x1b[0m", report.files_failed())
        } else {
            report.files_failed().to_string()
        };

        output.push_str(&format!(
            "  Files: {} | Pass: {} | Fail: {} | Sub-tests passing: {} | Errors: {}\n",
            report.total(),
            pass_str,
            fail_str,
            report.passing(),
            report.errors().len()
        ));
        output.push_str(&format!(
            "  Pass Rate: {:.1}% | Duration: {}ms\n",
            report.pass_rate(),
            report.duration_ms()
        ));

        if !report.errors().is_empty() {
            output.push_str("\n  Failures:\n");
            for tagged in report.errors() {
                output.push_str(&format!(
                    "    {} [{}] {}: {}\n",
                    tagged.file.display(),
                    tagged.runner,
                    tagged.info.name,
                    tagged.info.error
                ));
                for line in tagged.info.stack.lines() {
                    output.push_str(&format!("      {line}\n"));
                }
            }
        }

        output
    }

    fn format_report_csv(&self, report: &Report) -> String {
        let mut output = String::new();
        output.push_str("runner,file,passing,failing,duration_ms\n");
        for outcome in report.outcomes() {
            output.push_str(&format!(
                "{},{},{},{},{}\n",
                outcome.runner,
                outcome.file.display(),
                outcome.passing,
                outcome.errors.len(),
                outcome.duration_ms
            ));
        }
        output
    }

    fn format_report_brief(&self, report: &Report) -> String {
        format!(
            "{}/{} files passed ({:.1}%), {} passing sub-tests, {} errors in {}ms",
            report.files_passed(),
            report.total(),
            report.pass_rate(),
            report.passing(),
            report.errors().len(),
            report.duration_ms()
        )
    }
}

impl Default for ReportFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write a formatted report to a file
pub fn write_report_to_file(
    path: &str,
    report: &Report,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let formatter = ReportFormatter::new(format).no_color();
    let content = formatter.format_report(report);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
