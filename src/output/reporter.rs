//! Progress reporting through tracing
//!
//! Subscribes to runner events and logs each transition as it happens.

use tracing::{debug, info, warn};

use crate::events::{EventName, ListenerId, RunnerEvent};
use crate::executor::TestRunner;

/// Live progress logger attached to a runner
pub struct Reporter {
    ids: Vec<ListenerId>,
}

const REPORTED: [EventName; 8] = [
    EventName::ActiveFileChanged,
    EventName::BeforeDescribe,
    EventName::AfterDescribe,
    EventName::BeforeTest,
    EventName::TestSuccess,
    EventName::TestFail,
    EventName::TestTimeout,
    EventName::TestSkipped,
];

impl Reporter {
    /// Subscribe to every progress event of `runner`
    pub fn attach(runner: &TestRunner) -> Self {
        let ids = REPORTED
            .iter()
            .map(|name| {
                runner.on(*name, |event| {
                    log_event(event);
                    Ok(())
                })
            })
            .collect();
        Self { ids }
    }

    /// Unsubscribe. Returns how many listeners were still registered.
    pub fn detach(self, runner: &TestRunner) -> usize {
        self.ids.into_iter().filter(|id| runner.off(*id)).count()
    }
}

fn log_event(event: &RunnerEvent) {
    match event {
        RunnerEvent::ActiveFileChanged { path } => info!("File {}", path.display()),
        RunnerEvent::BeforeDescribe { title } => info!("▸ {}", title),
        RunnerEvent::AfterDescribe { title, elapsed_ms } => {
            debug!("◂ {} ({}ms)", title, elapsed_ms)
        }
        RunnerEvent::BeforeTest { title } => debug!("  running {}", title),
        RunnerEvent::BeforeTestSuccess { .. } => {}
        RunnerEvent::TestSuccess { title, elapsed_ms } => {
            info!("  ✓ {} ({}ms)", title, elapsed_ms)
        }
        RunnerEvent::TestFail {
            title,
            error,
            elapsed_ms,
        } => warn!("  ✗ {} ({}ms): {}", title, elapsed_ms, error),
        RunnerEvent::TestTimeout {
            title,
            elapsed_ms,
            timeout_ms,
        } => warn!(
            "  ⧗ {} timed out after {}ms (limit {}ms)",
            title, elapsed_ms, timeout_ms
        ),
        RunnerEvent::TestSkipped { title } => info!("  ○ {} skipped", title),
    }
}
