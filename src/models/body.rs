//! Test and hook bodies
//!
//! A body is one of four callback shapes: a plain synchronous function, a
//! function returning a future, a function signalling completion through a
//! [`Done`] handle, or a function doing both. [`Body::start`] normalizes all of
//! them into a single [`Invocation`].

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Result produced by a test or hook body
pub type BodyResult = anyhow::Result<()>;

type SyncFn = dyn Fn() -> BodyResult + Send + Sync;
type FutureFn = dyn Fn() -> BoxFuture<'static, BodyResult> + Send + Sync;
type DoneFn = dyn Fn(Done) + Send + Sync;
type DoneFutureFn = dyn Fn(Done) -> BoxFuture<'static, BodyResult> + Send + Sync;

#[derive(Clone)]
enum BodyKind {
    Sync(Arc<SyncFn>),
    Future(Arc<FutureFn>),
    Done(Arc<DoneFn>),
    DoneOrFuture(Arc<DoneFutureFn>),
}

/// Callback registered with `it` or a hook
#[derive(Clone)]
pub struct Body {
    kind: BodyKind,
}

/// A started body: either already settled or still pending
pub enum Invocation {
    Ready(BodyResult),
    Pending(BoxFuture<'static, BodyResult>),
}

impl Body {
    /// Body that settles as soon as it returns
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> BodyResult + Send + Sync + 'static,
    {
        Self {
            kind: BodyKind::Sync(Arc::new(f)),
        }
    }

    /// Body that settles when its returned future resolves
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        Self {
            kind: BodyKind::Future(Arc::new(move || f().boxed())),
        }
    }

    /// Body that settles when the [`Done`] handle is signalled
    pub fn done<F>(f: F) -> Self
    where
        F: Fn(Done) + Send + Sync + 'static,
    {
        Self {
            kind: BodyKind::Done(Arc::new(f)),
        }
    }

    /// Body that settles on whichever of the [`Done`] signal or the returned
    /// future comes first
    pub fn done_or_future<F, Fut>(f: F) -> Self
    where
        F: Fn(Done) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BodyResult> + Send + 'static,
    {
        Self {
            kind: BodyKind::DoneOrFuture(Arc::new(move |done| f(done).boxed())),
        }
    }

    /// Body that does nothing
    pub fn noop() -> Self {
        Self::sync(|| Ok(()))
    }

    pub fn is_sync(&self) -> bool {
        matches!(self.kind, BodyKind::Sync(_))
    }

    /// Start the body.
    ///
    /// Synchronous bodies run to completion here, with panics captured as
    /// failures. Every other shape is returned as a pending future which does
    /// no work until polled; panics inside it surface when it is driven.
    pub fn start(&self) -> Invocation {
        match &self.kind {
            BodyKind::Sync(f) => {
                let f = f.clone();
                let result = catch_unwind(AssertUnwindSafe(move || f()))
                    .unwrap_or_else(|payload| Err(panic_error(payload)));
                Invocation::Ready(result)
            }
            BodyKind::Future(f) => {
                let f = f.clone();
                Invocation::Pending(async move { f().await }.boxed())
            }
            BodyKind::Done(f) => {
                let f = f.clone();
                Invocation::Pending(
                    async move {
                        let (done, signal) = Done::channel();
                        f(done);
                        signal.wait().await.unwrap_or_else(|| {
                            Err(anyhow::anyhow!(
                                "completion handle dropped without being signalled"
                            ))
                        })
                    }
                    .boxed(),
                )
            }
            BodyKind::DoneOrFuture(f) => {
                let f = f.clone();
                Invocation::Pending(
                    async move {
                        let (done, signal) = Done::channel();
                        let returned = f(done);
                        tokio::select! {
                            biased;
                            Some(result) = signal.wait() => result,
                            result = returned => result,
                        }
                    }
                    .boxed(),
                )
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self.kind {
            BodyKind::Sync(_) => "sync",
            BodyKind::Future(_) => "future",
            BodyKind::Done(_) => "done",
            BodyKind::DoneOrFuture(_) => "done_or_future",
        };
        f.debug_struct("Body").field("shape", &shape).finish()
    }
}

/// Completion handle handed to callback-style bodies.
///
/// Only the first signal counts; later calls are no-ops. Clones share the
/// same slot.
#[derive(Clone)]
pub struct Done {
    slot: Arc<Mutex<Option<oneshot::Sender<BodyResult>>>>,
}

/// Receiving side of a [`Done`] handle
pub struct DoneSignal {
    rx: oneshot::Receiver<BodyResult>,
}

impl Done {
    pub fn channel() -> (Done, DoneSignal) {
        let (tx, rx) = oneshot::channel();
        (
            Done {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            DoneSignal { rx },
        )
    }

    /// Signal success
    pub fn ok(&self) {
        self.finish(Ok(()));
    }

    /// Signal failure
    pub fn fail(&self, error: impl Into<anyhow::Error>) {
        self.finish(Err(error.into()));
    }

    /// Signal with an explicit result
    pub fn finish(&self, result: BodyResult) {
        if let Some(tx) = self.slot.lock().take() {
            let _ = tx.send(result);
        }
    }

    pub fn is_signalled(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl DoneSignal {
    /// Wait for the handle to be signalled. `None` once every clone of the
    /// handle was dropped without signalling.
    pub async fn wait(self) -> Option<BodyResult> {
        self.rx.await.ok()
    }
}

/// Shared, clonable error captured from a body.
///
/// The payload is kept opaque; callers may downcast it.
#[derive(Clone)]
pub struct TestError(Arc<anyhow::Error>);

impl TestError {
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Top-level message followed by its causes
    pub fn message(&self) -> String {
        format!("{:#}", self.0)
    }
}

impl From<anyhow::Error> for TestError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl fmt::Debug for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl Serialize for TestError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.message())
    }
}

/// Convert a panic payload into an error carrying the panic message
pub fn panic_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    if let Some(message) = payload.downcast_ref::<&str>() {
        anyhow::anyhow!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        anyhow::anyhow!("panicked: {message}")
    } else {
        anyhow::anyhow!("panicked with a non-string payload")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settle(invocation: Invocation) -> BodyResult {
        match invocation {
            Invocation::Ready(result) => result,
            Invocation::Pending(fut) => tokio_test::block_on(fut),
        }
    }

    #[test]
    fn test_sync_body_runs_inline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let body = Body::sync(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(body.is_sync());
        assert!(matches!(body.start(), Invocation::Ready(Ok(()))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sync_panic_is_captured() {
        let body = Body::sync(|| {
            assert_eq!(1 + 1, 3, "math is broken");
            Ok(())
        });

        let err = settle(body.start()).unwrap_err();
        assert!(err.to_string().contains("math is broken"));
    }

    #[test]
    fn test_future_body_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let body = Body::future(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("nope")
            }
        });

        let invocation = body.start();
        assert!(matches!(invocation, Invocation::Pending(_)));
        assert_eq!(settle(invocation).unwrap_err().to_string(), "nope");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_done_only_first_signal_counts() {
        let body = Body::done(|done| {
            done.fail(anyhow::anyhow!("first"));
            done.ok();
        });

        let err = settle(body.start()).unwrap_err();
        assert_eq!(err.to_string(), "first");
    }

    #[test]
    fn test_done_dropped_without_signal() {
        let body = Body::done(|_done| {});
        let err = settle(body.start()).unwrap_err();
        assert!(err.to_string().contains("dropped without being signalled"));
    }

    #[test]
    fn test_done_or_future_prefers_first_settlement() {
        let body = Body::done_or_future(|done| {
            done.ok();
            async { anyhow::bail!("returned future lost the race") }
        });
        assert!(settle(body.start()).is_ok());

        let body = Body::done_or_future(|_done| async { Ok(()) });
        assert!(settle(body.start()).is_ok());
    }

    #[test]
    fn test_done_handle_state() {
        let (done, _signal) = Done::channel();
        let clone = done.clone();
        assert!(!done.is_signalled());
        clone.ok();
        assert!(done.is_signalled());
    }

    #[test]
    fn test_error_message_and_downcast() {
        #[derive(Debug)]
        struct Custom;
        impl fmt::Display for Custom {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "custom payload")
            }
        }
        impl std::error::Error for Custom {}

        let error = TestError::from(anyhow::Error::new(Custom).context("while asserting"));
        assert_eq!(error.message(), "while asserting: custom payload");
        assert!(error.downcast_ref::<Custom>().is_some());
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            "\"while asserting: custom payload\""
        );
    }

    #[test]
    fn test_panic_error_payloads() {
        assert_eq!(
            panic_error(Box::new("boom")).to_string(),
            "panicked: boom"
        );
        assert_eq!(
            panic_error(Box::new(String::from("bang"))).to_string(),
            "panicked: bang"
        );
        assert_eq!(
            panic_error(Box::new(42u8)).to_string(),
            "panicked with a non-string payload"
        );
    }
}
