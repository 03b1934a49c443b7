//! Fan-out of change notifications to independent observers.
//!
//! Observers run synchronously, in registration order, on the thread that
//! applied the change. A panicking observer is logged and skipped; the rest
//! still run. The subscriber list is copied before dispatch, so an observer
//! may subscribe or unsubscribe while being notified.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{error, trace};

use super::index::AttendanceIndex;

type Callback = Arc<dyn Fn(&AttendanceIndex) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Callback)>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Default)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. It stays registered until the returned
    /// `Subscription` is used to unsubscribe.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AttendanceIndex) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().push((id, Arc::new(callback)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every observer with `index`. Returns how many completed
    /// without panicking.
    pub fn notify(&self, index: &AttendanceIndex) -> usize {
        let subscribers: Vec<(u64, Callback)> = self.inner.lock().clone();
        trace!(count = subscribers.len(), "Notifying subscribers");

        subscribers
            .into_iter()
            .filter(|(id, callback)| {
                let outcome = catch_unwind(AssertUnwindSafe(|| callback(index)));
                if let Err(panic) = &outcome {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "Unknown panic".to_string());
                    error!(subscriber = id, panic = %message, "Subscriber panicked");
                }
                outcome.is_ok()
            })
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by `subscribe`.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the observer. Returns false if it was already gone or the
    /// bus no longer exists.
    pub fn unsubscribe(self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let mut subscribers = bus.lock();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != self.id);
        subscribers.len() != before
    }
}
