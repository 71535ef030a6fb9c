//! Result models
//!
//! Per-unit records and run-level totals.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use super::body::TestError;
use super::node::HookKind;

/// Outcome of one evaluated unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
    Skipped,
}

impl Outcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            Outcome::Success => "✓",
            Outcome::Failure => "✗",
            Outcome::Timeout => "⧗",
            Outcome::Skipped => "○",
        }
    }

    /// Whether the unit was actually attempted and counts toward totals
    pub fn is_counted(&self) -> bool {
        !matches!(self, Outcome::Skipped)
    }

    pub fn is_failing(&self) -> bool {
        matches!(self, Outcome::Failure | Outcome::Timeout)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "PASS"),
            Outcome::Failure => write!(f, "FAIL"),
            Outcome::Timeout => write!(f, "TIMEOUT"),
            Outcome::Skipped => write!(f, "SKIP"),
        }
    }
}

/// Detailed record of one test (or failing hook)
#[derive(Clone, Debug, Serialize)]
pub struct TestRecord {
    pub describe_chain: Vec<String>,
    pub title: String,
    pub outcome: Outcome,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Set when a hook caused or produced this record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook: Option<HookKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl TestRecord {
    fn new(describe_chain: Vec<String>, title: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            describe_chain,
            title: title.into(),
            outcome,
            elapsed_ms: 0,
            error: None,
            timeout_ms: None,
            hook: None,
            file: None,
        }
    }

    pub fn success(
        describe_chain: Vec<String>,
        title: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            elapsed_ms,
            ..Self::new(describe_chain, title, Outcome::Success)
        }
    }

    pub fn failure(
        describe_chain: Vec<String>,
        title: impl Into<String>,
        elapsed_ms: u64,
        error: TestError,
    ) -> Self {
        Self {
            elapsed_ms,
            error: Some(error),
            ..Self::new(describe_chain, title, Outcome::Failure)
        }
    }

    pub fn timeout(
        describe_chain: Vec<String>,
        title: impl Into<String>,
        elapsed_ms: u64,
        timeout_ms: u64,
    ) -> Self {
        Self {
            elapsed_ms,
            timeout_ms: Some(timeout_ms),
            ..Self::new(describe_chain, title, Outcome::Timeout)
        }
    }

    pub fn skipped(describe_chain: Vec<String>, title: impl Into<String>) -> Self {
        Self::new(describe_chain, title, Outcome::Skipped)
    }

    pub fn with_hook(mut self, hook: HookKind) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn with_file(mut self, file: Option<PathBuf>) -> Self {
        self.file = file;
        self
    }

    /// Chain and title joined for display
    pub fn full_title(&self) -> String {
        let mut parts = self.describe_chain.clone();
        parts.push(self.title.clone());
        parts.join(" > ")
    }
}

impl fmt::Display for TestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.outcome.symbol(),
            self.full_title(),
            self.elapsed_ms
        )?;
        if let Some(timeout_ms) = self.timeout_ms {
            write!(f, " - exceeded {timeout_ms}ms")?;
        }
        if let Some(error) = &self.error {
            write!(f, " - {error}")?;
        }
        Ok(())
    }
}

/// Failure entry in [`RunResults::failure_info`]
#[derive(Clone, Debug, Serialize)]
pub struct FailureInfo {
    pub describe_chain: Vec<String>,
    pub title: String,
    pub error: TestError,
}

/// Timeout entry in [`RunResults::timeout_info`]
#[derive(Clone, Debug, Serialize)]
pub struct TimeoutInfo {
    pub describe_chain: Vec<String>,
    pub title: String,
    pub elapsed_ms: u64,
    pub timeout_ms: u64,
}

/// Results of one run. Only evaluated tests are counted; tests left out by
/// `only`, `skip` or cancellation are not part of `total_tests`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunResults {
    pub started_at: DateTime<Utc>,
    pub elapsed_time_ms: u64,
    pub total_tests: usize,
    pub total_successes: usize,
    pub total_failures: usize,
    pub total_timeouts: usize,
    pub total_skipped: usize,
    pub failure_info: Vec<FailureInfo>,
    pub timeout_info: Vec<TimeoutInfo>,
    pub records: Vec<TestRecord>,
}

impl RunResults {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            ..Self::default()
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            (self.total_successes as f64 / self.total_tests as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.total_successes == self.total_tests
    }

    pub fn has_failures(&self) -> bool {
        self.total_failures > 0 || self.total_timeouts > 0
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TestRecord> {
        self.records
            .iter()
            .filter(|r| r.outcome == Outcome::Skipped)
    }

    /// Records located by chain and title. Titles need not be unique.
    pub fn find<'a>(
        &'a self,
        describe_chain: &'a [&'a str],
        title: &'a str,
    ) -> impl Iterator<Item = &'a TestRecord> + 'a {
        self.records.iter().filter(move |r| {
            r.title == title
                && r.describe_chain.len() == describe_chain.len()
                && r.describe_chain
                    .iter()
                    .zip(describe_chain)
                    .all(|(a, b)| a == b)
        })
    }
}

impl fmt::Display for RunResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test run started {}", self.started_at.to_rfc3339())?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for record in &self.records {
            writeln!(f, "  {record}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Timeout: {} | Skip: {}",
            self.total_tests,
            self.total_successes,
            self.total_failures,
            self.total_timeouts,
            self.total_skipped
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.elapsed_time_ms
        )
    }
}
