use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::record::Record;
use crate::error::LinkError;

/// Lifecycle state of a cache key.
///
/// ```text
/// Empty ──prime──► Priming ──ok──► Ready ──invalidate──► Priming
///                     │               │
///                     │               └──invalidate, no subscribers──► Stale
///                     └──err──► Error (previous rows retained)
/// ```
///
/// A `Stale` key keeps its rows until the next subscriber primes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SnapshotStatus {
    #[default]
    Empty,
    Priming,
    Ready,
    /// Invalidated while nobody was subscribed; rows predate the write.
    Stale,
    Error,
}

/// Cached rows plus status metadata for one cache key.
///
/// Consumers get cheap clones sharing the same `rows` allocation. The cache
/// never mutates a published row vector; every change installs a new `Arc`,
/// so `Arc::ptr_eq` on two snapshots tells whether the data changed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub rows: Arc<Vec<Record>>,
    pub loading: bool,
    pub error: Option<LinkError>,
    /// Epoch millis of the last successful prime.
    pub last_fetched_at: Option<u64>,
    pub status: SnapshotStatus,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether the key has completed at least one successful prime.
    pub fn is_primed(&self) -> bool {
        self.last_fetched_at.is_some()
    }

    /// Loading while previously fetched rows are still being shown.
    pub fn is_refreshing(&self) -> bool {
        self.loading && !self.rows.is_empty()
    }

    pub fn is_stale(&self) -> bool {
        self.status == SnapshotStatus::Stale
    }

    pub fn same_rows(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.rows, &other.rows)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
