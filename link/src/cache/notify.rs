//! Subscriber notification queue.
//!
//! Notifications are queued while the cache lock is held, so they leave in
//! mutation order, and delivered after it is released. Only one dispatcher
//! drains the queue at a time: a callback that re-enters the cache (a
//! `refetch` from inside `on_change`, say) just queues more work for the
//! running dispatcher instead of recursing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::models::Snapshot;

/// Callback invoked with a key's new snapshot.
pub type SnapshotCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// One registered consumer of a key.
#[derive(Clone)]
pub(crate) struct Subscriber {
    pub(crate) callback: SnapshotCallback,
    /// Cleared on unsubscribe; checked right before each delivery.
    pub(crate) active: Arc<AtomicBool>,
}

pub(crate) struct Notification {
    targets: Vec<Subscriber>,
    snapshot: Snapshot,
}

impl Notification {
    pub(crate) fn new(targets: Vec<Subscriber>, snapshot: Snapshot) -> Self {
        Self { targets, snapshot }
    }
}

#[derive(Default)]
pub(crate) struct Notifier {
    queue: Mutex<VecDeque<Notification>>,
    dispatching: AtomicBool,
}

struct DispatchGuard<'a>(&'a AtomicBool);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Notifier {
    pub(crate) fn enqueue(&self, notification: Notification) {
        if notification.targets.is_empty() {
            return;
        }
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(notification);
    }

    /// Deliver queued notifications unless another dispatch is already running.
    pub(crate) fn dispatch(&self) {
        loop {
            if self.dispatching.swap(true, Ordering::AcqRel) {
                return;
            }
            {
                let _guard = DispatchGuard(&self.dispatching);
                while let Some(notification) = self.pop() {
                    for target in &notification.targets {
                        if target.active.load(Ordering::Acquire) {
                            (target.callback)(&notification.snapshot);
                        }
                    }
                }
            }
            // Something may have been queued between the last pop and the
            // guard release.
            if self.is_empty() {
                return;
            }
        }
    }

    fn pop(&self) -> Option<Notification> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn is_empty(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
