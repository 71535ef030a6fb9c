//! Typed publish/subscribe
//!
//! Listeners are keyed by event name and invoked synchronously in
//! registration order. A listener may hand back a future; [`EventEmitter::emit`]
//! lets it run on its own while [`EventEmitter::emit_and_wait`] awaits it.

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// An event type with a name used as the subscription key
pub trait EventKind: Send + Sync + 'static {
    type Name: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn name(&self) -> Self::Name;
}

pub type ListenerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// What a listener returns: an immediate error, or optionally more work
pub type ListenerResult = anyhow::Result<Option<ListenerFuture>>;

type Listener<E> = Arc<dyn Fn(&E) -> ListenerResult + Send + Sync>;

/// Handle returned on subscription, used to unsubscribe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration<E: EventKind> {
    id: ListenerId,
    once: bool,
    listener: Listener<E>,
}

pub struct EventEmitter<E: EventKind> {
    listeners: Mutex<HashMap<E::Name, Vec<Registration<E>>>>,
    next_id: AtomicU64,
}

impl<E: EventKind> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a synchronous listener
    pub fn on<F>(&self, name: E::Name, listener: F) -> ListenerId
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(name, false, sync_listener(listener))
    }

    /// Subscribe a listener returning a future
    pub fn on_async<F, Fut>(&self, name: E::Name, listener: F) -> ListenerId
    where
        F: Fn(&E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add(name, false, async_listener(listener))
    }

    /// Subscribe a synchronous listener for the next matching event only
    pub fn once<F>(&self, name: E::Name, listener: F) -> ListenerId
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(name, true, sync_listener(listener))
    }

    /// Subscribe a listener returning a future, for the next matching event only
    pub fn once_async<F, Fut>(&self, name: E::Name, listener: F) -> ListenerId
    where
        F: Fn(&E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add(name, true, async_listener(listener))
    }

    fn add(&self, name: E::Name, once: bool, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(name)
            .or_default()
            .push(Registration { id, once, listener });
        id
    }

    /// Unsubscribe. Returns whether the listener was still registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        for registrations in listeners.values_mut() {
            if let Some(pos) = registrations.iter().position(|r| r.id == id) {
                registrations.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn listener_count(&self, name: E::Name) -> usize {
        self.listeners.lock().get(&name).map_or(0, Vec::len)
    }

    /// Snapshot of the listeners for an event, in registration order
    fn matching(&self, name: E::Name) -> Vec<(ListenerId, bool, Listener<E>)> {
        self.listeners.lock().get(&name).map_or_else(Vec::new, |registrations| {
            registrations
                .iter()
                .map(|r| (r.id, r.once, r.listener.clone()))
                .collect()
        })
    }

    /// Call matching listeners in order, handing each result to `each`. A
    /// `once` registration is consumed right before its call, so listeners
    /// never reached stay subscribed.
    fn invoke<F>(&self, name: E::Name, event: &E, mut each: F) -> anyhow::Result<()>
    where
        F: FnMut(ListenerResult) -> anyhow::Result<()>,
    {
        for (id, once, listener) in self.matching(name) {
            if once && !self.off(id) {
                continue;
            }
            each(listener(event))?;
        }
        Ok(())
    }

    /// Invoke every matching listener. The first listener error stops
    /// delivery and is returned to the caller. Futures returned by listeners
    /// are spawned without waiting.
    pub fn emit(&self, event: &E) -> anyhow::Result<()> {
        let name = event.name();
        self.invoke(name, event, |result| {
            if let Some(pending) = result? {
                spawn_detached(name, pending);
            }
            Ok(())
        })
    }

    /// Invoke every matching listener, then wait for all futures they
    /// returned. Returns the first error observed.
    pub async fn emit_and_wait(&self, event: &E) -> anyhow::Result<()> {
        let mut pending = Vec::new();
        self.invoke(event.name(), event, |result| {
            if let Some(work) = result? {
                pending.push(work);
            }
            Ok(())
        })?;

        join_all(pending).await.into_iter().collect()
    }
}

impl<E: EventKind> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn sync_listener<E, F>(listener: F) -> Listener<E>
where
    E: EventKind,
    F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(move |event: &E| -> ListenerResult {
        listener(event)?;
        Ok(None)
    })
}

fn async_listener<E, F, Fut>(listener: F) -> Listener<E>
where
    E: EventKind,
    F: Fn(&E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event: &E| -> ListenerResult { Ok(Some(listener(event).boxed())) })
}

fn spawn_detached<N: fmt::Debug + Send + 'static>(name: N, pending: ListenerFuture) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = pending.await {
                    warn!("Async listener for {:?} failed: {:#}", name, e);
                }
            });
        }
        Err(_) => warn!("No async runtime; dropping listener work for {:?}", name),
    }
}
