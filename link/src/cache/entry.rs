use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::notify::{Notification, Subscriber};
use crate::error::Result;
use crate::models::{ChangeEvent, QueryOptions, Record, Snapshot, SnapshotStatus};

pub(crate) type PrimeWaiter = oneshot::Sender<Result<Snapshot>>;

/// Cache state of one (table, query shape) key.
pub(crate) struct KeyEntry {
    pub(crate) table: String,
    pub(crate) options: QueryOptions,
    pub(crate) snapshot: Snapshot,
    pub(crate) subscribers: BTreeMap<u64, Subscriber>,
    /// `Some` while a prime is running; holds everyone awaiting it.
    pub(crate) inflight: Option<Vec<PrimeWaiter>>,
    /// Events that arrived mid-prime, applied once the new rows install.
    pub(crate) pending_events: VecDeque<ChangeEvent>,
    /// An invalidation hit while priming; run one more prime afterwards.
    pub(crate) reprime_after: bool,
    /// Callers waiting on that follow-up prime.
    pub(crate) next_waiters: Vec<PrimeWaiter>,
    /// LRU tick at which the last subscriber left.
    pub(crate) idle_since: Option<u64>,
}

impl KeyEntry {
    pub(crate) fn new(table: String, options: QueryOptions) -> Self {
        Self {
            table,
            options,
            snapshot: Snapshot::empty(),
            subscribers: BTreeMap::new(),
            inflight: None,
            pending_events: VecDeque::new(),
            reprime_after: false,
            next_waiters: Vec::new(),
            idle_since: None,
        }
    }

    pub(crate) fn is_priming(&self) -> bool {
        self.inflight.is_some()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub(crate) fn is_evictable(&self) -> bool {
        self.is_idle() && !self.is_priming()
    }

    pub(crate) fn mark_priming(&mut self) {
        self.snapshot.loading = true;
        self.snapshot.status = SnapshotStatus::Priming;
    }

    /// Flag retained rows as outdated. Only a successfully primed key can go stale.
    pub(crate) fn mark_stale(&mut self) {
        if self.snapshot.status == SnapshotStatus::Ready {
            self.snapshot.status = SnapshotStatus::Stale;
        }
    }

    pub(crate) fn install_rows(&mut self, rows: Vec<Record>) {
        self.snapshot.rows = Arc::new(rows);
    }

    /// Notification of the current snapshot to every active subscriber.
    pub(crate) fn notification(&self) -> Notification {
        Notification::new(
            self.subscribers.values().cloned().collect(),
            self.snapshot.clone(),
        )
    }
}
