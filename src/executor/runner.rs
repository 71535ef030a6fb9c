//! Test runner
//!
//! Registration API and run lifecycle on top of the scheduler.

use chrono::Utc;
use parking_lot::Mutex;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use super::plan;
use super::scheduler::Scheduler;
use crate::config::RunnerConfig;
use crate::error::{Result, RunnerError};
use crate::events::{EventEmitter, EventName, ListenerId, RunnerEvent};
use crate::models::{
    Body, DescribeNode, HookKind, ItOptions, Modifier, Node, RunResults, TestInfo, TestNode,
};
use crate::utils::Timer;

struct ActiveRun {
    cancel: Arc<watch::Sender<bool>>,
    /// Set to the run's results once it completes
    finished: watch::Receiver<Option<RunResults>>,
}

#[derive(Default)]
struct EngineState {
    root: DescribeNode,
    /// Describe scopes whose bodies are currently executing, innermost last
    open: Vec<DescribeNode>,
    current_file: Option<PathBuf>,
    active: Option<ActiveRun>,
    last_results: Option<RunResults>,
}

impl EngineState {
    fn ensure_idle(&self) -> Result<()> {
        if self.active.is_some() {
            return Err(RunnerError::RunInProgress);
        }
        Ok(())
    }

    fn target(&mut self) -> &mut DescribeNode {
        match self.open.last_mut() {
            Some(scope) => scope,
            None => &mut self.root,
        }
    }
}

struct Inner {
    config: RunnerConfig,
    emitter: Arc<EventEmitter<RunnerEvent>>,
    state: Mutex<EngineState>,
    current_test: Arc<Mutex<Option<TestInfo>>>,
}

/// Clears the active run even if the run future is dropped midway
struct ActiveRunGuard<'a> {
    inner: &'a Inner,
}

impl Drop for ActiveRunGuard<'_> {
    fn drop(&mut self) {
        self.inner.state.lock().active = None;
        *self.inner.current_test.lock() = None;
    }
}

/// Describe/it test runner.
///
/// Cheap to clone; clones share the same tree, listeners and run state, so a
/// body can capture a handle to call [`TestRunner::current_test_info`] and
/// another task can call [`TestRunner::cancel`].
#[derive(Clone)]
pub struct TestRunner {
    inner: Arc<Inner>,
}

impl TestRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_emitter(config, Arc::new(EventEmitter::new()))
    }

    /// Runner publishing to an existing emitter
    pub fn with_emitter(config: RunnerConfig, emitter: Arc<EventEmitter<RunnerEvent>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                emitter,
                state: Mutex::new(EngineState::default()),
                current_test: Arc::new(Mutex::new(None)),
            }),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    pub fn emitter(&self) -> &Arc<EventEmitter<RunnerEvent>> {
        &self.inner.emitter
    }

    // Registration

    /// Register a describe scope. `body` runs immediately and registers the
    /// scope's tests and hooks; if it returns an error the scope is dropped.
    pub fn describe<F>(&self, title: impl Into<String>, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        self.register_describe(title.into(), Modifier::None, body)
    }

    pub fn describe_only<F>(&self, title: impl Into<String>, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        self.register_describe(title.into(), Modifier::Only, body)
    }

    pub fn describe_skip<F>(&self, title: impl Into<String>, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        self.register_describe(title.into(), Modifier::Skip, body)
    }

    fn register_describe<F>(&self, title: String, modifier: Modifier, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        {
            let mut state = self.inner.state.lock();
            state.ensure_idle()?;
            state.open.push(DescribeNode::new(title, modifier));
        }

        // The lock is released while the body registers children
        let outcome = catch_unwind(AssertUnwindSafe(body));

        let mut state = self.inner.state.lock();
        let scope = state.open.pop();
        match outcome {
            Ok(Ok(())) => {
                if let Some(scope) = scope {
                    state.target().children.push(Node::Describe(scope));
                }
                Ok(())
            }
            Ok(Err(e)) => {
                debug!("Discarding describe scope after error: {}", e);
                Err(e)
            }
            Err(payload) => {
                drop(state);
                resume_unwind(payload)
            }
        }
    }

    pub fn it(&self, title: impl Into<String>, body: Body) -> Result<()> {
        self.register_test(title.into(), ItOptions::default(), Modifier::None, body)
    }

    /// Register a test with options such as a timeout override
    pub fn it_with(&self, title: impl Into<String>, options: ItOptions, body: Body) -> Result<()> {
        self.register_test(title.into(), options, Modifier::None, body)
    }

    pub fn it_only(&self, title: impl Into<String>, body: Body) -> Result<()> {
        self.register_test(title.into(), ItOptions::default(), Modifier::Only, body)
    }

    pub fn it_only_with(
        &self,
        title: impl Into<String>,
        options: ItOptions,
        body: Body,
    ) -> Result<()> {
        self.register_test(title.into(), options, Modifier::Only, body)
    }

    pub fn it_skip(&self, title: impl Into<String>, body: Body) -> Result<()> {
        self.register_test(title.into(), ItOptions::default(), Modifier::Skip, body)
    }

    pub fn it_skip_with(
        &self,
        title: impl Into<String>,
        options: ItOptions,
        body: Body,
    ) -> Result<()> {
        self.register_test(title.into(), options, Modifier::Skip, body)
    }

    fn register_test(
        &self,
        title: String,
        options: ItOptions,
        modifier: Modifier,
        body: Body,
    ) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.ensure_idle()?;
        let file = state.current_file.clone();
        state.target().children.push(Node::Test(TestNode {
            title,
            body,
            timeout_ms: options.timeout_ms,
            modifier,
            file,
        }));
        Ok(())
    }

    pub fn before(&self, body: Body) -> Result<()> {
        self.register_hook(HookKind::Before, body)
    }

    pub fn before_each(&self, body: Body) -> Result<()> {
        self.register_hook(HookKind::BeforeEach, body)
    }

    pub fn after(&self, body: Body) -> Result<()> {
        self.register_hook(HookKind::After, body)
    }

    pub fn after_each(&self, body: Body) -> Result<()> {
        self.register_hook(HookKind::AfterEach, body)
    }

    fn register_hook(&self, kind: HookKind, body: Body) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.ensure_idle()?;
        state.target().hooks.push(kind, body);
        Ok(())
    }

    /// Tag tests registered from now on with a source file
    pub fn set_current_file(&self, path: impl Into<PathBuf>) {
        self.inner.state.lock().current_file = Some(path.into());
    }

    // Listeners

    pub fn on<F>(&self, name: EventName, listener: F) -> ListenerId
    where
        F: Fn(&RunnerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.emitter.on(name, listener)
    }

    pub fn once<F>(&self, name: EventName, listener: F) -> ListenerId
    where
        F: Fn(&RunnerEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.emitter.once(name, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.emitter.off(id)
    }

    // Lifecycle

    /// Run every registered test. Fails with [`RunnerError::RunInProgress`]
    /// if a run is already active.
    pub async fn run(&self) -> Result<RunResults> {
        let timer = Timer::start("run");
        let started_at = Utc::now();

        let (scope, cancel, finished) = {
            let mut state = self.inner.state.lock();
            state.ensure_idle()?;
            let (cancel, _) = watch::channel(false);
            let cancel = Arc::new(cancel);
            let (finished, finished_rx) = watch::channel(None);
            state.active = Some(ActiveRun {
                cancel: cancel.clone(),
                finished: finished_rx,
            });
            (plan::compile(&state.root), cancel, finished)
        };
        let guard = ActiveRunGuard { inner: &self.inner };

        info!("Starting run with {} runnable tests", scope.runnable_count());

        let mut scheduler = Scheduler::new(
            self.inner.config.clone(),
            self.inner.emitter.clone(),
            self.inner.current_test.clone(),
            cancel,
        );
        let outcome = scheduler.execute(&scope).await;

        let mut results = scheduler.finish(timer.elapsed_ms());
        results.started_at = started_at;
        self.inner.state.lock().last_results = Some(results.clone());
        finished.send_replace(Some(results.clone()));
        drop(guard);

        info!(
            "Run finished in {}ms - Pass: {}/{} | Fail: {} | Timeout: {} | Skip: {}",
            results.elapsed_time_ms,
            results.total_successes,
            results.total_tests,
            results.total_failures,
            results.total_timeouts,
            results.total_skipped
        );

        outcome.map(|()| results)
    }

    /// Cancel the active run and resolve with its partial results. Without
    /// an active run, resolves with the most recent results.
    pub async fn cancel(&self) -> RunResults {
        let active = self
            .inner
            .state
            .lock()
            .active
            .as_ref()
            .map(|run| (run.cancel.clone(), run.finished.clone()));

        let published = match active {
            Some((cancel, mut finished)) => {
                info!("Cancelling active run");
                cancel.send_replace(true);
                match finished.wait_for(Option::is_some).await {
                    Ok(results) => results.clone(),
                    Err(_) => None,
                }
            }
            None => None,
        };

        published
            .or_else(|| self.inner.state.lock().last_results.clone())
            .unwrap_or_default()
    }

    /// Drop every registered test and hook and the last results. Listeners
    /// stay subscribed.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.ensure_idle()?;
        state.root = DescribeNode::root();
        state.open.clear();
        state.current_file = None;
        state.last_results = None;
        Ok(())
    }

    /// The test currently being evaluated
    pub fn current_test_info(&self) -> Result<TestInfo> {
        self.inner
            .current_test
            .lock()
            .clone()
            .ok_or(RunnerError::NoTestInProgress)
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().active.is_some()
    }

    /// Number of tests registered so far
    pub fn test_count(&self) -> usize {
        self.inner.state.lock().root.test_count()
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::config::TimeoutConfig;
    use crate::events::EventKind;
    use crate::models::{Done, Outcome};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entry(log: &Log, tag: &str) -> Body {
        let log = log.clone();
        let tag = tag.to_string();
        Body::sync(move || {
            log.lock().push(tag.clone());
            Ok(())
        })
    }

    fn failing(message: &'static str) -> Body {
        Body::sync(move || anyhow::bail!(message))
    }

    fn sleeping(ms: u64) -> Body {
        Body::future(move || async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(())
        })
    }

    fn events(runner: &TestRunner, names: &[EventName]) -> Log {
        let log = log();
        for name in names {
            let log = log.clone();
            runner.on(*name, move |event| {
                log.lock()
                    .push(format!("{:?}:{}", event.name(), event.title().unwrap_or("")));
                Ok(())
            });
        }
        log
    }

    #[tokio::test]
    async fn test_scenario_success_and_failure() {
        let runner = TestRunner::default();
        let r = runner.clone();
        runner
            .describe("A", || {
                r.it("t1", Body::noop())?;
                r.it("t2", failing("x"))
            })
            .unwrap();

        let results = runner.run().await.unwrap();
        assert_eq!(results.total_tests, 2);
        assert_eq!(results.total_successes, 1);
        assert_eq!(results.total_failures, 1);
        assert_eq!(results.failure_info[0].describe_chain, vec!["A"]);
        assert_eq!(results.failure_info[0].title, "t2");
        assert_eq!(results.failure_info[0].error.message(), "x");
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_hook_order_nested() {
        let runner = TestRunner::default();
        let calls = log();
        let r = runner.clone();
        let c = calls.clone();
        runner
            .describe("A", || {
                r.before(entry(&c, "A.before"))?;
                r.before_each(entry(&c, "A.beforeEach"))?;
                r.after_each(entry(&c, "A.afterEach"))?;
                r.after(entry(&c, "A.after"))?;
                r.describe("B", || {
                    r.before_each(entry(&c, "B.beforeEach"))?;
                    r.after_each(entry(&c, "B.afterEach"))?;
                    r.it("test", entry(&c, "test"))
                })
            })
            .unwrap();

        runner.run().await.unwrap();
        assert_eq!(
            *calls.lock(),
            vec![
                "A.before",
                "A.beforeEach",
                "B.beforeEach",
                "test",
                "B.afterEach",
                "A.afterEach",
                "A.after"
            ]
        );
    }

    #[tokio::test]
    async fn test_before_failure_fails_descendants_and_runs_after() {
        let runner = TestRunner::default();
        let calls = log();
        let r = runner.clone();
        let c = calls.clone();
        runner
            .describe("A", || {
                r.before(failing("setup broke"))?;
                r.after(entry(&c, "A.after"))?;
                r.after(failing("cleanup broke"))?;
                r.it("t1", entry(&c, "t1"))?;
                r.describe("B", || {
                    r.before(entry(&c, "B.before"))?;
                    r.it("t2", entry(&c, "t2"))?;
                    r.it_skip("t3", entry(&c, "t3"))
                })
            })
            .unwrap();
        runner.it("outside", entry(&calls, "outside")).unwrap();

        let results = runner.run().await.unwrap();
        assert_eq!(*calls.lock(), vec!["A.after", "outside"]);

        let t2 = results.find(&["A", "B"], "t2").next().unwrap();
        assert_eq!(t2.outcome, Outcome::Failure);
        assert_eq!(t2.hook, Some(HookKind::Before));
        assert_eq!(t2.error.as_ref().unwrap().message(), "setup broke");
        assert_eq!(
            results.find(&["A", "B"], "t3").next().unwrap().outcome,
            Outcome::Skipped
        );

        let cleanup = results.find(&["A"], "\"after\" hook").next().unwrap();
        assert_eq!(cleanup.error.as_ref().unwrap().message(), "cleanup broke");

        // t1, t2, the after hook record, and outside
        assert_eq!(results.total_tests, 4);
        assert_eq!(results.total_failures, 3);
        assert_eq!(results.total_successes, 1);
        assert_eq!(results.total_skipped, 1);
    }

    #[tokio::test]
    async fn test_before_each_failure_unwinds_outer_after_each() {
        let runner = TestRunner::default();
        let calls = log();
        let r = runner.clone();
        let c = calls.clone();
        runner
            .describe("A", || {
                r.before_each(entry(&c, "A.beforeEach"))?;
                r.after_each(entry(&c, "A.afterEach"))?;
                r.describe("B", || {
                    r.before_each(failing("inner setup"))?;
                    r.after_each(entry(&c, "B.afterEach"))?;
                    r.it("t1", entry(&c, "t1"))?;
                    r.it("t2", entry(&c, "t2"))
                })
            })
            .unwrap();

        let results = runner.run().await.unwrap();
        assert_eq!(
            *calls.lock(),
            vec!["A.beforeEach", "A.afterEach", "A.beforeEach", "A.afterEach"]
        );
        assert_eq!(results.total_failures, 2);
        assert!(results
            .records
            .iter()
            .all(|r| r.hook == Some(HookKind::BeforeEach)));
    }

    #[tokio::test]
    async fn test_after_each_failure_gets_own_record() {
        let runner = TestRunner::default();
        let r = runner.clone();
        runner
            .describe("A", || {
                r.after_each(failing("teardown"))?;
                r.it("t1", failing("body"))
            })
            .unwrap();

        let results = runner.run().await.unwrap();
        assert_eq!(results.total_tests, 2);
        assert_eq!(results.total_failures, 2);
        assert_eq!(results.records[0].title, "t1");
        assert_eq!(results.records[1].title, "\"afterEach\" hook");
        assert_eq!(results.records[1].hook, Some(HookKind::AfterEach));
        assert_eq!(results.records[1].describe_chain, vec!["A"]);
    }

    #[tokio::test]
    async fn test_only_excludes_other_tests_from_counts() {
        let runner = TestRunner::default();
        let calls = log();
        let r = runner.clone();
        let c = calls.clone();
        runner.it("root", entry(&calls, "root")).unwrap();
        runner
            .describe("A", || {
                r.it("t1", entry(&c, "t1"))?;
                r.it_only("t2", entry(&c, "t2"))
            })
            .unwrap();
        runner
            .describe_only("B", || r.it("t3", entry(&c, "t3")))
            .unwrap();

        let results = runner.run().await.unwrap();
        assert_eq!(*calls.lock(), vec!["t2", "t3"]);
        assert_eq!(results.total_tests, 2);
        assert_eq!(results.total_skipped, 0);
        assert_eq!(results.records.len(), 2);
    }

    #[tokio::test]
    async fn test_skip_reports_without_running_hooks() {
        let runner = TestRunner::default();
        let calls = log();
        let skipped = events(&runner, &[EventName::TestSkipped]);
        let r = runner.clone();
        let c = calls.clone();
        runner
            .describe_skip("A", || {
                r.before(entry(&c, "A.before"))?;
                r.it("t1", entry(&c, "t1"))
            })
            .unwrap();
        runner.it_skip("t2", entry(&calls, "t2")).unwrap();
        runner.it("t3", entry(&calls, "t3")).unwrap();

        let results = runner.run().await.unwrap();
        assert_eq!(*calls.lock(), vec!["t3"]);
        assert_eq!(results.total_tests, 1);
        assert_eq!(results.total_skipped, 2);
        assert_eq!(*skipped.lock(), vec!["TestSkipped:t1", "TestSkipped:t2"]);
    }

    #[tokio::test]
    async fn test_stop_on_first_fail_still_cleans_up_entered_scopes() {
        let runner = TestRunner::new(RunnerConfig::new().with_stop_on_first_fail(true));
        let calls = log();
        let r = runner.clone();
        let c = calls.clone();
        runner
            .describe("A", || {
                r.before(entry(&c, "A.before"))?;
                r.after_each(entry(&c, "A.afterEach"))?;
                r.after(entry(&c, "A.after"))?;
                r.it("t1", failing("first"))?;
                r.it("t2", entry(&c, "t2"))?;
                r.describe("B", || {
                    r.before(entry(&c, "B.before"))?;
                    r.after(entry(&c, "B.after"))?;
                    r.it("t3", entry(&c, "t3"))
                })
            })
            .unwrap();

        let results = runner.run().await.unwrap();
        assert_eq!(*calls.lock(), vec!["A.before", "A.afterEach", "A.after"]);
        assert_eq!(results.total_tests, 1);
        assert_eq!(results.total_failures, 1);
        assert_eq!(results.total_skipped, 2);
    }

    #[tokio::test]
    async fn test_stop_on_first_fail_after_before_hook_failure() {
        let runner = TestRunner::new(RunnerConfig::new().with_stop_on_first_fail(true));
        let calls = log();
        let r = runner.clone();
        let c = calls.clone();
        runner
            .describe("A", || {
                r.before(failing("setup broke"))?;
                r.it("t1", entry(&c, "t1"))
            })
            .unwrap();
        runner
            .describe("B", || r.it("t2", entry(&c, "t2")))
            .unwrap();

        let results = runner.run().await.unwrap();
        assert!(calls.lock().is_empty());
        assert_eq!(results.total_tests, 1);
        assert_eq!(results.total_failures, 1);
        assert_eq!(results.total_successes, 0);
        assert_eq!(
            results.find(&["B"], "t2").next().unwrap().outcome,
            Outcome::Skipped
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_before_each_skips_test() {
        let runner = TestRunner::default();
        let calls = log();
        let started = Arc::new(Notify::new());
        let notify = started.clone();
        let r = runner.clone();
        let c = calls.clone();
        runner
            .describe("A", || {
                r.before_each(Body::future(move || {
                    let notify = notify.clone();
                    async move {
                        notify.notify_one();
                        tokio::time::sleep(Duration::from_millis(1_000)).await;
                        Ok(())
                    }
                }))?;
                r.after_each(entry(&c, "A.afterEach"))?;
                r.after(entry(&c, "A.after"))?;
                r.it("t1", entry(&c, "t1"))?;
                r.it("t2", entry(&c, "t2"))
            })
            .unwrap();

        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run().await })
        };
        started.notified().await;

        let partial = runner.cancel().await;
        assert_eq!(partial.total_tests, 0);
        assert_eq!(partial.total_failures, 0);
        assert_eq!(partial.total_skipped, 2);
        assert_eq!(partial.find(&["A"], "t1").next().unwrap().outcome, Outcome::Skipped);
        assert!(calls.lock().is_empty());

        let results = handle.await.unwrap().unwrap();
        assert_eq!(results.records.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reported_once() {
        let runner = TestRunner::new(RunnerConfig::new().with_timeouts(TimeoutConfig {
            it: Some(100),
            ..Default::default()
        }));
        let late = Arc::new(AtomicUsize::new(0));
        let counter = late.clone();
        runner
            .it(
                "slow",
                Body::done(move |done: Done| {
                    let counter = counter.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        done.fail(anyhow::anyhow!("too late"));
                    });
                }),
            )
            .unwrap();
        runner
            .it_with("quick", ItOptions::timeout_ms(50), sleeping(10))
            .unwrap();

        let results = runner.run().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(late.load(Ordering::SeqCst), 1);

        assert_eq!(results.total_tests, 2);
        assert_eq!(results.total_timeouts, 1);
        assert_eq!(results.total_successes, 1);
        let timeout = &results.timeout_info[0];
        assert_eq!(timeout.title, "slow");
        assert_eq!(timeout.timeout_ms, 100);
        assert!(timeout.elapsed_ms >= timeout.timeout_ms);
        assert_eq!(results.records.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_run_returns_partial_results() {
        let runner = TestRunner::default();
        let started = Arc::new(Notify::new());
        let notify = started.clone();
        runner.it("t1", Body::noop()).unwrap();
        runner
            .it(
                "t2",
                Body::future(move || {
                    let notify = notify.clone();
                    async move {
                        notify.notify_one();
                        tokio::time::sleep(Duration::from_millis(1_000)).await;
                        Ok(())
                    }
                }),
            )
            .unwrap();
        runner.it("t3", Body::noop()).unwrap();

        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run().await })
        };
        started.notified().await;
        assert!(runner.is_running());

        let partial = runner.cancel().await;
        assert_eq!(partial.total_tests, 1);
        assert_eq!(partial.total_successes, 1);
        assert_eq!(partial.total_skipped, 2);

        let results = handle.await.unwrap().unwrap();
        assert_eq!(results.total_tests, partial.total_tests);
        assert_eq!(results.records.len(), 3);
        assert!(!runner.is_running());

        // Nothing active: cancel hands back the last results
        assert_eq!(runner.cancel().await.total_tests, 1);
    }

    #[tokio::test]
    async fn test_usage_errors_during_run() {
        let runner = TestRunner::default();
        let r = runner.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        runner
            .it(
                "probe",
                Body::sync(move || {
                    let errors = vec![
                        r.it("late", Body::noop()).unwrap_err(),
                        r.reset().unwrap_err(),
                        r.before(Body::noop()).unwrap_err(),
                    ];
                    s.lock().extend(errors.into_iter().map(|e| e.to_string()));
                    Ok(())
                }),
            )
            .unwrap();

        let results = runner.run().await.unwrap();
        assert_eq!(results.total_successes, 1);
        assert_eq!(seen.lock().len(), 3);
        assert!(seen
            .lock()
            .iter()
            .all(|e| e == "A test run is already in progress"));
        assert_eq!(runner.test_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_run_rejected() {
        let runner = TestRunner::default();
        runner.it("t1", sleeping(20)).unwrap();

        let first = runner.run();
        let second = async {
            tokio::task::yield_now().await;
            runner.run().await
        };
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap().total_successes, 1);
        assert!(matches!(second, Err(RunnerError::RunInProgress)));
    }

    #[tokio::test]
    async fn test_reset_clears_tree_keeps_listeners() {
        let runner = TestRunner::default();
        let seen = events(&runner, &[EventName::TestSuccess]);
        runner.it("t1", Body::noop()).unwrap();
        runner.run().await.unwrap();

        runner.reset().unwrap();
        assert_eq!(runner.test_count(), 0);
        assert_eq!(runner.cancel().await.total_tests, 0);

        runner.it("t2", Body::noop()).unwrap();
        let results = runner.run().await.unwrap();
        assert_eq!(results.total_tests, 1);
        assert_eq!(*seen.lock(), vec!["TestSuccess:t1", "TestSuccess:t2"]);
    }

    #[tokio::test]
    async fn test_current_test_info() {
        let runner = TestRunner::new(RunnerConfig::new().with_timeout_ms(750));
        assert!(matches!(
            runner.current_test_info(),
            Err(RunnerError::NoTestInProgress)
        ));

        let r = runner.clone();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        runner.set_current_file("/suite/math.rs");
        runner
            .describe("math", || {
                r.it(
                    "adds",
                    Body::sync({
                        let r = r.clone();
                        move || {
                            *s.lock() = Some(r.current_test_info()?);
                            Ok(())
                        }
                    }),
                )
            })
            .unwrap();

        runner.run().await.unwrap();
        let info = seen.lock().clone().unwrap();
        assert_eq!(info.title, "adds");
        assert_eq!(info.describe_chain, vec!["math"]);
        assert_eq!(info.timeout_ms, 750);
        assert_eq!(info.file, Some(PathBuf::from("/suite/math.rs")));
        assert!(runner.current_test_info().is_err());
    }

    #[tokio::test]
    async fn test_event_sequence_and_file_changes() {
        let runner = TestRunner::default();
        let seen = events(
            &runner,
            &[
                EventName::ActiveFileChanged,
                EventName::BeforeDescribe,
                EventName::AfterDescribe,
                EventName::BeforeTest,
                EventName::TestSuccess,
                EventName::TestFail,
            ],
        );
        let r = runner.clone();
        runner.set_current_file("/suite/a.rs");
        runner
            .describe("A", || {
                r.it("t1", Body::noop())?;
                r.it("t2", Body::noop())
            })
            .unwrap();
        runner.set_current_file("/suite/b.rs");
        runner.it("t3", failing("x")).unwrap();

        runner.run().await.unwrap();
        assert_eq!(
            *seen.lock(),
            vec![
                "BeforeDescribe:A",
                "ActiveFileChanged:",
                "BeforeTest:t1",
                "TestSuccess:t1",
                "BeforeTest:t2",
                "TestSuccess:t2",
                "AfterDescribe:A",
                "ActiveFileChanged:",
                "BeforeTest:t3",
                "TestFail:t3",
            ]
        );
    }

    #[tokio::test]
    async fn test_before_test_success_listener_can_veto() {
        let runner = TestRunner::default();
        runner.emitter().once_async(EventName::BeforeTestSuccess, |event| {
            let title = event.title().unwrap_or_default().to_string();
            async move { anyhow::bail!("{title} rejected by listener") }
        });
        runner.it("t1", Body::noop()).unwrap();
        runner.it("t2", Body::noop()).unwrap();

        let results = runner.run().await.unwrap();
        assert_eq!(results.total_failures, 1);
        assert_eq!(results.total_successes, 1);
        assert_eq!(
            results.failure_info[0].error.message(),
            "t1 rejected by listener"
        );
    }

    #[tokio::test]
    async fn test_listener_error_aborts_run_and_restores_state() {
        let runner = TestRunner::default();
        let id = runner.on(EventName::BeforeTest, |_| anyhow::bail!("listener down"));
        runner.it("t1", Body::noop()).unwrap();

        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, RunnerError::Listener(_)));
        assert!(!runner.is_running());
        assert!(runner.current_test_info().is_err());

        assert!(runner.off(id));
        assert_eq!(runner.run().await.unwrap().total_successes, 1);
    }

    #[tokio::test]
    async fn test_describe_error_discards_scope() {
        let runner = TestRunner::default();
        let r = runner.clone();
        let err = runner
            .describe("broken", || {
                r.it("t1", Body::noop())?;
                Err(RunnerError::Config("bad suite".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, RunnerError::Config(_)));

        runner.it("t2", Body::noop()).unwrap();
        let results = runner.run().await.unwrap();
        assert_eq!(results.total_tests, 1);
        assert!(results.records[0].describe_chain.is_empty());
    }

    #[test]
    fn test_describe_panic_restores_registration_stack() {
        let runner = TestRunner::default();
        let r = runner.clone();
        let caught = catch_unwind(AssertUnwindSafe(|| {
            runner.describe("boom", || -> Result<()> { panic!("in describe") })
        }));
        assert!(caught.is_err());

        r.it("t1", Body::noop()).unwrap();
        let results = tokio_test::block_on(runner.run()).unwrap();
        assert_eq!(results.total_tests, 1);
        assert!(results.records[0].describe_chain.is_empty());
    }
}
