//! Result aggregation

use chrono::{DateTime, Utc};

use crate::models::{FailureInfo, Outcome, RunResults, TestRecord, TimeoutInfo};

/// Accumulates records into run totals
#[derive(Debug)]
pub struct ResultAggregator {
    results: RunResults,
}

impl ResultAggregator {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            results: RunResults::new(started_at),
        }
    }

    /// Add one record. Counted outcomes bump `total_tests` and exactly one
    /// of the success/failure/timeout totals; skips only bump `total_skipped`.
    pub fn record(&mut self, record: TestRecord) {
        let results = &mut self.results;
        match record.outcome {
            Outcome::Success => results.total_successes += 1,
            Outcome::Failure => {
                results.total_failures += 1;
                if let Some(error) = &record.error {
                    results.failure_info.push(FailureInfo {
                        describe_chain: record.describe_chain.clone(),
                        title: record.title.clone(),
                        error: error.clone(),
                    });
                }
            }
            Outcome::Timeout => {
                results.total_timeouts += 1;
                results.timeout_info.push(TimeoutInfo {
                    describe_chain: record.describe_chain.clone(),
                    title: record.title.clone(),
                    elapsed_ms: record.elapsed_ms,
                    timeout_ms: record.timeout_ms.unwrap_or_default(),
                });
            }
            Outcome::Skipped => results.total_skipped += 1,
        }
        if record.outcome.is_counted() {
            results.total_tests += 1;
        }
        results.records.push(record);
    }

    /// Failures plus timeouts recorded so far
    pub fn failed_count(&self) -> usize {
        self.results.total_failures + self.results.total_timeouts
    }

    pub fn snapshot(&self) -> &RunResults {
        &self.results
    }

    pub fn finish(mut self, elapsed_ms: u64) -> RunResults {
        self.results.elapsed_time_ms = elapsed_ms;
        self.results
    }
}
