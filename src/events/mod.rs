//! Lifecycle events published by the test runner

mod emitter;

pub use emitter::{EventEmitter, EventKind, ListenerFuture, ListenerId, ListenerResult};

use std::path::PathBuf;

use crate::models::TestError;

/// Subscription key for [`RunnerEvent`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventName {
    ActiveFileChanged,
    BeforeTest,
    BeforeTestSuccess,
    TestSuccess,
    TestFail,
    TestTimeout,
    TestSkipped,
    BeforeDescribe,
    AfterDescribe,
}

/// Events fired while a run is in progress
#[derive(Clone, Debug)]
pub enum RunnerEvent {
    /// The next test comes from a different source file
    ActiveFileChanged { path: PathBuf },
    /// A test is about to be evaluated
    BeforeTest { title: String },
    /// A test body succeeded. Published with
    /// [`EventEmitter::emit_and_wait`]; a listener error turns the success
    /// into a failure.
    BeforeTestSuccess { title: String },
    TestSuccess { title: String, elapsed_ms: u64 },
    TestFail {
        title: String,
        error: TestError,
        elapsed_ms: u64,
    },
    TestTimeout {
        title: String,
        elapsed_ms: u64,
        timeout_ms: u64,
    },
    TestSkipped { title: String },
    BeforeDescribe { title: String },
    /// Elapsed time covers the whole scope, hooks included
    AfterDescribe { title: String, elapsed_ms: u64 },
}

impl RunnerEvent {
    pub fn title(&self) -> Option<&str> {
        match self {
            RunnerEvent::ActiveFileChanged { .. } => None,
            RunnerEvent::BeforeTest { title }
            | RunnerEvent::BeforeTestSuccess { title }
            | RunnerEvent::TestSuccess { title, .. }
            | RunnerEvent::TestFail { title, .. }
            | RunnerEvent::TestTimeout { title, .. }
            | RunnerEvent::TestSkipped { title }
            | RunnerEvent::BeforeDescribe { title }
            | RunnerEvent::AfterDescribe { title, .. } => Some(title.as_str()),
        }
    }
}

impl EventKind for RunnerEvent {
    type Name = EventName;

    fn name(&self) -> EventName {
        match self {
            RunnerEvent::ActiveFileChanged { .. } => EventName::ActiveFileChanged,
            RunnerEvent::BeforeTest { .. } => EventName::BeforeTest,
            RunnerEvent::BeforeTestSuccess { .. } => EventName::BeforeTestSuccess,
            RunnerEvent::TestSuccess { .. } => EventName::TestSuccess,
            RunnerEvent::TestFail { .. } => EventName::TestFail,
            RunnerEvent::TestTimeout { .. } => EventName::TestTimeout,
            RunnerEvent::TestSkipped { .. } => EventName::TestSkipped,
            RunnerEvent::BeforeDescribe { .. } => EventName::BeforeDescribe,
            RunnerEvent::AfterDescribe { .. } => EventName::AfterDescribe,
        }
    }
}
