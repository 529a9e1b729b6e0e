//! The index event bus: a typed, synchronous publish/subscribe surface
//! consumed by upper layers (progress, completion, error reporting).
//!
//! Generalized from the teacher's broadcast-channel usage for ambient
//! `tracing` events: `spec.md` §4.5 requires *synchronous*, in-order
//! delivery to every subscriber regardless of whether it reads the
//! event, which a `tokio::sync::broadcast` channel does not give
//! directly (lagging receivers drop events). A direct observer list
//! invoked in a loop is the idiomatic fit here.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use url::Url;

use crate::error::ErrorRecord;

#[derive(Debug, Clone)]
pub enum IndexEvent {
    FileIndexed { uri: Url, symbol_count: usize, from_cache: bool },
    FileRemoved { uri: Url },
    IndexError { uri: Url, error: ErrorRecord },
    IndexingStarted { file_count: usize },
    IndexingCompleted { duration_ms: u64 },
    Progress { current: usize, total: usize },
    Cleared,
}

/// Implemented by anything that wants to observe index activity.
///
/// Subscribers are invoked synchronously, in registration order; a
/// panicking subscriber must not prevent later subscribers from
/// receiving the event.
pub trait IndexObserver: Send + Sync {
    fn on_event(&self, event: &IndexEvent);
}

/// Adapts any `Fn(&IndexEvent)` closure into an `IndexObserver`.
pub struct FnObserver<F>(pub F)
where
    F: Fn(&IndexEvent) + Send + Sync;

impl<F> IndexObserver for FnObserver<F>
where
    F: Fn(&IndexEvent) + Send + Sync,
{
    fn on_event(&self, event: &IndexEvent) {
        (self.0)(event)
    }
}

#[derive(Clone, Default)]
pub struct EventBus {
    observers: Arc<RwLock<Vec<Arc<dyn IndexObserver>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn IndexObserver>) {
        self.observers.write().push(observer);
    }

    /// Delivers `event` to every subscriber in registration order. A
    /// subscriber that panics is caught and logged; delivery continues
    /// to subsequent subscribers.
    pub fn emit(&self, event: IndexEvent) {
        let observers = self.observers.read().clone();
        for observer in observers.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| observer.on_event(&event)));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "observer panicked".to_string());
                tracing::error!(%message, "index event observer panicked; continuing delivery");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("subscriber_count", &self.observers.read().len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(Arc::new(FnObserver(move |_: &IndexEvent| o1.lock().push(1))));
        let o2 = order.clone();
        bus.subscribe(Arc::new(FnObserver(move |_: &IndexEvent| o2.lock().push(2))));

        bus.emit(IndexEvent::Cleared);
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn panicking_subscriber_does_not_stop_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe(Arc::new(FnObserver(|_: &IndexEvent| panic!("boom"))));
        let h = hits.clone();
        bus.subscribe(Arc::new(FnObserver(move |_: &IndexEvent| {
            h.fetch_add(1, Ordering::SeqCst);
        })));

        bus.emit(IndexEvent::Cleared);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
