//! Output formatters for run results
//!
//! Provides JSON, Table, and summary output formats.

use anyhow::Context;
use std::io::Write;
use std::path::Path;

use crate::models::{Outcome, RunResults, TestRecord};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl OutputFormat {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
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

    /// Format a single record
    pub fn format_record(&self, record: &TestRecord) -> String {
        match self.format {
            OutputFormat::Table => self.format_record_table(record),
            OutputFormat::Json => serde_json::to_string(record).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(record).unwrap_or_default(),
            OutputFormat::Summary => record.to_string(),
        }
    }

    fn status(&self, outcome: Outcome) -> String {
        let plain = format!("{} {:7}", outcome.symbol(), outcome.to_string());
        if !self.colorize {
            return plain;
        }
        let color = match outcome {
            Outcome::Success => "32",
            Outcome::Failure => "31",
            Outcome::Timeout => "35",
            Outcome::Skipped => "33",
        };
        format!("\x1b[{color}m{plain}\x1b[0m")
    }

    fn format_record_table(&self, record: &TestRecord) -> String {
        let mut line = format!(
            "{} {} [{:>6}ms]",
            self.status(record.outcome),
            record.full_title(),
            record.elapsed_ms
        );
        if let Some(timeout_ms) = record.timeout_ms {
            line.push_str(&format!(" (limit {timeout_ms}ms)"));
        }
        line
    }

    /// Format the results of a run
    pub fn format_results(&self, results: &RunResults) -> String {
        match self.format {
            OutputFormat::Table => self.format_results_table(results),
            OutputFormat::Json => serde_json::to_string(results).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(results).unwrap_or_default(),
            OutputFormat::Summary => self.format_results_brief(results),
        }
    }

    fn format_results_table(&self, results: &RunResults) -> String {
        let mut output = String::new();

        // Header
        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  Test run {:51}║\n",
            results.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        // Records
        for record in &results.records {
            output.push_str(&format!("  {}\n", self.format_record_table(record)));
        }

        // Failures
        if !results.failure_info.is_empty() {
            output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
            output.push_str("  Failures:\n");
            for (i, failure) in results.failure_info.iter().enumerate() {
                let mut parts = failure.describe_chain.clone();
                parts.push(failure.title.clone());
                output.push_str(&format!("  {}. {}\n", i + 1, parts.join(" > ")));
                output.push_str(&format!("     {}\n", failure.error));
            }
        }

        // Footer
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        let pass_str = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", results.total_successes)
        } else {
            results.total_successes.to_string()
        };
        let fail_str = if self.colorize && results.total_failures > 0 {
            format!("\x1b[31m{}\x1b[0m", results.total_failures)
        } else {
            results.total_failures.to_string()
        };

        output.push_str(&format!(
            "║  Total: {:3} | Pass: {} | Fail: {} | Timeout: {:2} | Skip: {:2}\n",
            results.total_tests,
            pass_str,
            fail_str,
            results.total_timeouts,
            results.total_skipped
        ));
        output.push_str(&format!(
            "║  Pass Rate: {:5.1}% | Duration: {:6}ms\n",
            results.pass_rate(),
            results.elapsed_time_ms
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    fn format_results_brief(&self, results: &RunResults) -> String {
        format!(
            "{}/{} passed, {} failed, {} timed out, {} skipped ({:.1}%) in {}ms",
            results.total_successes,
            results.total_tests,
            results.total_failures,
            results.total_timeouts,
            results.total_skipped,
            results.pass_rate(),
            results.elapsed_time_ms
        )
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write results to a file in the given format, without colors
pub fn write_results(
    path: impl AsRef<Path>,
    results: &RunResults,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_results(results);

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write results to {}", path.display()))?;

    Ok(())
}
