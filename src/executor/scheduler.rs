//! Queue stack scheduler
//!
//! Walks a compiled [`Scope`] depth first with an explicit stack of frames,
//! one per open describe scope. Each frame moves through its phases
//! (`before` hooks, children, `after` hooks) one unit of work per loop
//! iteration, so the cancellation flag is observed between every hook and
//! every test.
//!
//! Stopping on the first failure and cancelling differ in cleanup: after a
//! stop no further test or setup hook starts, but `after` hooks of scopes
//! already entered still run. A cancel runs nothing more.

use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::aggregator::ResultAggregator;
use super::plan::{Item, PlannedTest, Scope};
use super::racer::{race, CancelSignal, Settled};
use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::events::{EventEmitter, RunnerEvent};
use crate::models::{Hook, HookKind, Outcome, RunResults, TestError, TestInfo, TestRecord};
use crate::utils::{duration_ms, Timer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Enter,
    Before(usize),
    Children(usize),
    After(usize),
    Exit,
}

struct Frame<'a> {
    scope: &'a Scope,
    phase: Phase,
    /// Walk without running anything, reporting tests as skipped
    skipping: bool,
    timer: Timer,
}

impl<'a> Frame<'a> {
    fn new(scope: &'a Scope, skipping: bool) -> Self {
        Self {
            scope,
            phase: Phase::Enter,
            skipping,
            timer: Timer::start(format!("describe \"{}\"", scope.title)),
        }
    }
}

enum HookOutcome {
    Passed,
    Failed { error: TestError, elapsed_ms: u64 },
    Cancelled,
}

/// Executes one run
pub struct Scheduler {
    config: RunnerConfig,
    emitter: Arc<EventEmitter<RunnerEvent>>,
    current_test: Arc<Mutex<Option<TestInfo>>>,
    cancel: CancelSignal,
    /// Set once `stop_on_first_fail` triggered
    stopped: bool,
    aggregator: ResultAggregator,
    last_file: Option<PathBuf>,
}

impl Scheduler {
    pub fn new(
        config: RunnerConfig,
        emitter: Arc<EventEmitter<RunnerEvent>>,
        current_test: Arc<Mutex<Option<TestInfo>>>,
        cancel_tx: Arc<watch::Sender<bool>>,
    ) -> Self {
        let cancel = CancelSignal::new(cancel_tx.subscribe());
        Self {
            config,
            emitter,
            current_test,
            cancel,
            stopped: false,
            aggregator: ResultAggregator::new(Utc::now()),
            last_file: None,
        }
    }

    /// Results recorded so far
    pub fn results(&self) -> &RunResults {
        self.aggregator.snapshot()
    }

    pub fn finish(self, elapsed_ms: u64) -> RunResults {
        self.aggregator.finish(elapsed_ms)
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// No new test or setup hook may start
    fn halted(&self) -> bool {
        self.stopped || self.cancelled()
    }

    /// Apply `stop_on_first_fail` if failures were recorded since `failed_before`
    fn stop_if_failed(&mut self, failed_before: usize, title: &str) {
        if self.config.stop_on_first_fail && self.aggregator.failed_count() > failed_before {
            info!("Stopping after first failure in \"{}\"", title);
            self.stopped = true;
        }
    }

    /// Walk the plan. Only a failing event listener stops the walk early.
    pub async fn execute(&mut self, plan: &Scope) -> Result<()> {
        let mut stack = vec![Frame::new(plan, !plan.runnable)];

        while let Some(frame) = stack.last_mut() {
            let scope = frame.scope;
            match frame.phase {
                Phase::Enter => {
                    frame.phase = Phase::Before(0);
                    if !scope.is_root {
                        debug!("Entering describe \"{}\"", scope.title);
                        self.emit(RunnerEvent::BeforeDescribe {
                            title: scope.title.clone(),
                        })?;
                    }
                }
                Phase::Before(i) => {
                    let Some(hook) = scope.hooks.before.get(i) else {
                        frame.phase = Phase::Children(0);
                        continue;
                    };
                    if frame.skipping || self.halted() {
                        frame.phase = Phase::Children(0);
                        continue;
                    }
                    frame.phase = Phase::Before(i + 1);
                    if let HookOutcome::Failed { error, .. } = self.run_hook(scope, hook).await {
                        frame.phase = Phase::After(0);
                        let failed_before = self.aggregator.failed_count();
                        self.fail_scope(scope, error)?;
                        self.stop_if_failed(failed_before, &scope.title);
                    }
                }
                Phase::Children(i) => {
                    let Some(item) = scope.items.get(i) else {
                        frame.phase = Phase::After(0);
                        continue;
                    };
                    frame.phase = Phase::Children(i + 1);
                    let skipping = frame.skipping || self.halted();
                    match item {
                        Item::Test(test) if skipping || test.skip => {
                            self.skip_test(&scope.chain, test)?;
                        }
                        Item::Test(test) => {
                            let scopes: Vec<&Scope> = stack.iter().map(|f| f.scope).collect();
                            self.run_test(&scopes, test).await?;
                        }
                        Item::Scope(child) => {
                            stack.push(Frame::new(child, skipping || !child.runnable));
                        }
                    }
                }
                Phase::After(i) => {
                    let Some(hook) = scope.hooks.after.get(i) else {
                        frame.phase = Phase::Exit;
                        continue;
                    };
                    // Entered scopes clean up after a stop, not after a cancel
                    if frame.skipping || self.cancelled() {
                        frame.phase = Phase::Exit;
                        continue;
                    }
                    frame.phase = Phase::After(i + 1);
                    if let HookOutcome::Failed { error, elapsed_ms } = self.run_hook(scope, hook).await
                    {
                        self.record_hook_failure(scope, HookKind::After, error, elapsed_ms)?;
                    }
                }
                Phase::Exit => {
                    if let Some(frame) = stack.pop() {
                        let elapsed = frame.timer.stop();
                        if !scope.is_root {
                            self.emit(RunnerEvent::AfterDescribe {
                                title: scope.title.clone(),
                                elapsed_ms: duration_ms(elapsed),
                            })?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Run one test with its `beforeEach`/`afterEach` sandwich. `scopes` runs
    /// from the root down to the test's own scope.
    async fn run_test(&mut self, scopes: &[&Scope], test: &PlannedTest) -> Result<()> {
        let node = &test.node;
        let chain = scopes.last().map(|s| s.chain.clone()).unwrap_or_default();
        let timeout_ms = self.config.test_timeout_ms(node.timeout_ms);

        if let Some(path) = &node.file {
            if self.last_file.as_ref() != Some(path) {
                self.last_file = Some(path.clone());
                self.emit(RunnerEvent::ActiveFileChanged { path: path.clone() })?;
            }
        }

        *self.current_test.lock() = Some(TestInfo {
            title: node.title.clone(),
            describe_chain: chain.clone(),
            timeout_ms,
            file: node.file.clone(),
        });
        let failed_before = self.aggregator.failed_count();

        let result = self.run_test_chain(scopes, test, chain, timeout_ms).await;
        *self.current_test.lock() = None;
        result?;

        self.stop_if_failed(failed_before, &node.title);
        Ok(())
    }

    async fn run_test_chain(
        &mut self,
        scopes: &[&Scope],
        test: &PlannedTest,
        chain: Vec<String>,
        timeout_ms: u64,
    ) -> Result<()> {
        let node = &test.node;
        let title = node.title.as_str();
        self.emit(RunnerEvent::BeforeTest {
            title: title.to_string(),
        })?;

        // Levels whose beforeEach hooks all passed
        let mut entered = 0;
        let mut record = None;
        let mut cancelled = false;

        'levels: for scope in scopes {
            for hook in &scope.hooks.before_each {
                if self.halted() {
                    cancelled = true;
                    break 'levels;
                }
                match self.run_hook(scope, hook).await {
                    HookOutcome::Passed => {}
                    HookOutcome::Failed { error, elapsed_ms } => {
                        record = Some(
                            TestRecord::failure(chain.clone(), title, elapsed_ms, error)
                                .with_hook(HookKind::BeforeEach),
                        );
                        break 'levels;
                    }
                    HookOutcome::Cancelled => {
                        cancelled = true;
                        break 'levels;
                    }
                }
            }
            entered += 1;
        }

        if record.is_none() && !cancelled {
            if self.halted() {
                cancelled = true;
            } else {
                let timeout = Duration::from_millis(timeout_ms);
                match race(title, &node.body, timeout, &self.cancel).await {
                    Settled::Success { elapsed } => {
                        let elapsed_ms = duration_ms(elapsed);
                        let veto = self
                            .emitter
                            .emit_and_wait(&RunnerEvent::BeforeTestSuccess {
                                title: title.to_string(),
                            })
                            .await;
                        record = Some(match veto {
                            Ok(()) => TestRecord::success(chain.clone(), title, elapsed_ms),
                            Err(e) => TestRecord::failure(
                                chain.clone(),
                                title,
                                elapsed_ms,
                                TestError::new(e),
                            ),
                        });
                    }
                    Settled::Failure { error, elapsed } => {
                        record = Some(TestRecord::failure(
                            chain.clone(),
                            title,
                            duration_ms(elapsed),
                            error,
                        ));
                    }
                    Settled::Timeout { elapsed, .. } => {
                        record = Some(TestRecord::timeout(
                            chain.clone(),
                            title,
                            duration_ms(elapsed),
                            timeout_ms,
                        ));
                    }
                    Settled::Cancelled => cancelled = true,
                }
            }
        }

        match record {
            Some(record) => self.record(record.with_file(node.file.clone()))?,
            None => self.skip_test(&chain, test)?,
        }

        for scope in scopes[..entered].iter().rev() {
            for hook in &scope.hooks.after_each {
                if cancelled || self.cancelled() {
                    return Ok(());
                }
                match self.run_hook(scope, hook).await {
                    HookOutcome::Passed => {}
                    HookOutcome::Failed { error, elapsed_ms } => {
                        self.record_hook_failure(scope, HookKind::AfterEach, error, elapsed_ms)?;
                    }
                    HookOutcome::Cancelled => cancelled = true,
                }
            }
        }
        Ok(())
    }

    async fn run_hook(&mut self, scope: &Scope, hook: &Hook) -> HookOutcome {
        let timeout_ms = self.config.hook_timeout_ms(hook.kind);
        let label = format!("{} in \"{}\"", hook.kind.record_title(), scope.title);
        match race(&label, &hook.body, Duration::from_millis(timeout_ms), &self.cancel).await {
            Settled::Success { .. } => HookOutcome::Passed,
            Settled::Failure { error, elapsed } => {
                warn!("{} failed: {}", label, error);
                HookOutcome::Failed {
                    error,
                    elapsed_ms: duration_ms(elapsed),
                }
            }
            Settled::Timeout { elapsed, .. } => {
                let elapsed_ms = duration_ms(elapsed);
                warn!("{} timed out after {}ms", label, elapsed_ms);
                let error = RunnerError::HookTimeout {
                    hook: hook.kind,
                    timeout_ms,
                    elapsed_ms,
                };
                HookOutcome::Failed {
                    error: TestError::new(error.into()),
                    elapsed_ms,
                }
            }
            Settled::Cancelled => HookOutcome::Cancelled,
        }
    }

    /// A `before` hook failed: every test below the scope fails with its error
    fn fail_scope(&mut self, scope: &Scope, error: TestError) -> Result<()> {
        for (chain, test) in scope.descendant_tests() {
            if test.skip {
                self.skip_test(chain, test)?;
                continue;
            }
            let record = TestRecord::failure(chain.to_vec(), &test.node.title, 0, error.clone())
                .with_hook(HookKind::Before)
                .with_file(test.node.file.clone());
            self.record(record)?;
        }
        Ok(())
    }

    fn record_hook_failure(
        &mut self,
        scope: &Scope,
        kind: HookKind,
        error: TestError,
        elapsed_ms: u64,
    ) -> Result<()> {
        let record = TestRecord::failure(scope.chain.clone(), kind.record_title(), elapsed_ms, error)
            .with_hook(kind);
        self.record(record)
    }

    fn skip_test(&mut self, chain: &[String], test: &PlannedTest) -> Result<()> {
        let record = TestRecord::skipped(chain.to_vec(), &test.node.title)
            .with_file(test.node.file.clone());
        self.record(record)
    }

    fn record(&mut self, record: TestRecord) -> Result<()> {
        debug!("{}", record);
        let title = record.title.clone();
        let event = match (&record.outcome, &record.error) {
            (Outcome::Success, _) => RunnerEvent::TestSuccess {
                title,
                elapsed_ms: record.elapsed_ms,
            },
            (Outcome::Failure, Some(error)) => RunnerEvent::TestFail {
                title,
                error: error.clone(),
                elapsed_ms: record.elapsed_ms,
            },
            (Outcome::Failure, None) => RunnerEvent::TestFail {
                title,
                error: TestError::new(anyhow::anyhow!("unknown failure")),
                elapsed_ms: record.elapsed_ms,
            },
            (Outcome::Timeout, _) => RunnerEvent::TestTimeout {
                title,
                elapsed_ms: record.elapsed_ms,
                timeout_ms: record.timeout_ms.unwrap_or_default(),
            },
            (Outcome::Skipped, _) => RunnerEvent::TestSkipped { title },
        };
        self.aggregator.record(record);
        self.emit(event)
    }

    fn emit(&self, event: RunnerEvent) -> Result<()> {
        self.emitter.emit(&event).map_err(RunnerError::Listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::plan;
    use crate::models::{Body, DescribeNode, Modifier, Node, TestNode};

    fn test_node(title: &str, body: Body) -> Node {
        Node::Test(TestNode {
            title: title.to_string(),
            body,
            timeout_ms: None,
            modifier: Modifier::None,
            file: None,
        })
    }

    fn scheduler(config: RunnerConfig) -> Scheduler {
        let (tx, _rx) = watch::channel(false);
        Scheduler::new(
            config,
            Arc::new(EventEmitter::new()),
            Arc::new(Mutex::new(None)),
            Arc::new(tx),
        )
    }

    #[tokio::test]
    async fn test_execute_walks_scopes_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let entry = |tag: &'static str| {
            let log = log.clone();
            Body::sync(move || {
                log.lock().push(tag);
                Ok(())
            })
        };

        let mut inner = DescribeNode::new("B", Modifier::None);
        inner.hooks.push(HookKind::Before, entry("B.before"));
        inner.hooks.push(HookKind::After, entry("B.after"));
        inner.children.push(test_node("t2", entry("t2")));

        let mut outer = DescribeNode::new("A", Modifier::None);
        outer.hooks.push(HookKind::Before, entry("A.before"));
        outer.hooks.push(HookKind::After, entry("A.after"));
        outer.children.push(test_node("t1", entry("t1")));
        outer.children.push(Node::Describe(inner));
        outer.children.push(test_node("t3", entry("t3")));

        let mut root = DescribeNode::root();
        root.children.push(Node::Describe(outer));

        let plan = plan::compile(&root);
        let mut scheduler = scheduler(RunnerConfig::default());
        scheduler.execute(&plan).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["A.before", "t1", "B.before", "t2", "B.after", "t3", "A.after"]
        );
        let results = scheduler.finish(0);
        assert_eq!(results.total_tests, 3);
        assert_eq!(results.records[1].describe_chain, vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_timeout_fails_with_hook_error() {
        let mut scope = DescribeNode::new("A", Modifier::None);
        scope.hooks.push(
            HookKind::BeforeEach,
            Body::future(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }),
        );
        scope.children.push(test_node("t1", Body::noop()));
        let mut root = DescribeNode::root();
        root.children.push(Node::Describe(scope));

        let plan = plan::compile(&root);
        let mut scheduler = scheduler(RunnerConfig::new().with_timeout_ms(50));
        scheduler.execute(&plan).await.unwrap();

        let results = scheduler.finish(0);
        assert_eq!(results.total_failures, 1);
        assert_eq!(results.total_timeouts, 0);
        let record = &results.records[0];
        assert_eq!(record.hook, Some(HookKind::BeforeEach));
        let error = record.error.as_ref().unwrap();
        assert!(matches!(
            error.downcast_ref::<RunnerError>(),
            Some(RunnerError::HookTimeout { timeout_ms: 50, .. })
        ));
    }
}
