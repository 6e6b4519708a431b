//! Listener contract and the per-collection listener registry.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::context::Context;
use crate::error::BoxError;
use crate::event::{ChangeEvent, EventKind};

/// Cancellation signal raised from a pre-notification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("vetoed: {reason}")]
pub struct Veto {
    pub reason: String,
}

/// What a listener callback may return besides success.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Abort the pending mutation. Only honoured from `will_*` callbacks.
    #[error(transparent)]
    Veto(#[from] Veto),

    /// The listener itself failed. Logged; delivery continues.
    #[error("listener failed: {0}")]
    Failed(BoxError),
}

impl ListenerError {
    pub fn veto(reason: impl Into<String>) -> Self {
        ListenerError::Veto(Veto {
            reason: reason.into(),
        })
    }

    pub fn failed(error: impl Into<BoxError>) -> Self {
        ListenerError::Failed(error.into())
    }
}

/// Observer of a collection's mutations: three pre/post callback pairs.
///
/// Callbacks run inline on the mutating thread, before the mutation call
/// returns. Every callback defaults to doing nothing.
pub trait Listener: Send + Sync {
    fn will_add(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
        Ok(())
    }

    fn added(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
        Ok(())
    }

    fn will_change(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
        Ok(())
    }

    fn changed(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
        Ok(())
    }

    fn will_remove(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
        Ok(())
    }

    fn removed(&self, _event: &ChangeEvent) -> Result<(), ListenerError> {
        Ok(())
    }

    /// Entry point used by [`Listeners`]. `cx` is the call chain that fired
    /// the event. Routes to the matching callback unless overridden.
    fn deliver(&self, _cx: &Context, event: &ChangeEvent) -> Result<(), ListenerError> {
        match event.kind() {
            EventKind::WillAdd => self.will_add(event),
            EventKind::Added => self.added(event),
            EventKind::WillChange => self.will_change(event),
            EventKind::Changed => self.changed(event),
            EventKind::WillRemove => self.will_remove(event),
            EventKind::Removed => self.removed(event),
        }
    }
}

/// Route an event to the matching callback of `listener`.
pub fn dispatch(
    listener: &dyn Listener,
    cx: &Context,
    event: &ChangeEvent,
) -> Result<(), ListenerError> {
    listener.deliver(cx, event)
}

/// Handle returned by `add_listener`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// The listeners attached to one collection.
#[derive(Default)]
pub struct Listeners {
    entries: RwLock<Vec<(ListenerId, Arc<dyn Listener>)>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    // Callbacks may add or remove listeners, so deliver from a copy.
    fn snapshot(&self) -> Vec<Arc<dyn Listener>> {
        self.entries
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// Deliver a pre-notification. Stops at the first veto and returns it;
    /// other listener failures are logged and skipped.
    pub fn fire_pre(&self, cx: &Context, event: &ChangeEvent) -> Result<(), Veto> {
        for listener in self.snapshot() {
            match call(listener.as_ref(), cx, event) {
                Ok(()) => {}
                Err(ListenerError::Veto(veto)) => {
                    tracing::debug!(path = %event.path(), kind = %event.kind(), reason = %veto.reason, "mutation vetoed");
                    return Err(veto);
                }
                Err(ListenerError::Failed(error)) => {
                    tracing::error!(path = %event.path(), kind = %event.kind(), error = %error, "listener failed");
                }
            }
        }
        Ok(())
    }

    /// Deliver a post-notification to every listener regardless of failures.
    pub fn fire_post(&self, cx: &Context, event: &ChangeEvent) {
        for listener in self.snapshot() {
            match call(listener.as_ref(), cx, event) {
                Ok(()) => {}
                Err(ListenerError::Veto(veto)) => {
                    tracing::warn!(path = %event.path(), kind = %event.kind(), reason = %veto.reason, "veto ignored after the fact");
                }
                Err(ListenerError::Failed(error)) => {
                    tracing::error!(path = %event.path(), kind = %event.kind(), error = %error, "listener failed");
                }
            }
        }
    }

    /// Pre- or post-notify depending on the event kind.
    pub fn fire(&self, cx: &Context, event: &ChangeEvent) -> Result<(), Veto> {
        if event.kind().is_pre() {
            self.fire_pre(cx, event)
        } else {
            self.fire_post(cx, event);
            Ok(())
        }
    }
}

fn call(listener: &dyn Listener, cx: &Context, event: &ChangeEvent) -> Result<(), ListenerError> {
    match panic::catch_unwind(AssertUnwindSafe(|| dispatch(listener, cx, event))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ListenerError::failed(format!("listener panicked: {}", message)))
        }
    }
}
