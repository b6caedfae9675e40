//! Subscription coordinator: the consumer-facing `use_table` contract.
//!
//! A [`TableHook`] is one consumer's view of a table query. It owns a single
//! cache subscription, mirrors the latest snapshot for synchronous reads and
//! forwards every change to an optional observer. Rendering layers poll the
//! accessors or react to the observer; nothing here depends on a UI runtime.

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::cache::{KeySubscription, TableSnapshotCache};
use crate::error::{LinkError, Result};
use crate::models::{CacheKey, QueryOptions, Record, Snapshot, TableQuery};

/// Observer invoked with the hook's new state after every snapshot change.
pub type HookObserver = Arc<dyn Fn(&TableResult) + Send + Sync>;

/// Point-in-time `{data, loading, error}` view of a hook.
#[derive(Debug, Clone, PartialEq)]
pub struct TableResult {
    pub data: Arc<Vec<Record>>,
    pub loading: bool,
    /// Set only when there are no rows to fall back on.
    pub error: Option<LinkError>,
}

impl TableResult {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            data: snapshot.rows.clone(),
            loading: snapshot.loading,
            error: visible_error(snapshot),
        }
    }
}

fn visible_error(snapshot: &Snapshot) -> Option<LinkError> {
    if snapshot.rows.is_empty() {
        snapshot.error.clone()
    } else {
        None
    }
}

#[derive(Default)]
struct HookState {
    /// Bumped on every re-subscribe; callbacks of older subscriptions are ignored.
    generation: u64,
    snapshot: Snapshot,
    delivered: bool,
}

struct HookShared {
    state: Mutex<HookState>,
    mounted: AtomicBool,
    observer: Mutex<Option<HookObserver>>,
}

impl HookShared {
    fn state(&self) -> MutexGuard<'_, HookState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unmounting stops new deliveries; one already past the mounted check
    /// on another thread still completes.
    fn deliver(&self, generation: u64, snapshot: &Snapshot) {
        if !self.mounted.load(Ordering::Acquire) {
            return;
        }
        {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            state.snapshot = snapshot.clone();
            state.delivered = true;
        }
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer(&TableResult::from_snapshot(snapshot));
        }
    }
}

/// Entry point for reactive consumers.
#[derive(Clone)]
pub struct SubscriptionCoordinator {
    cache: TableSnapshotCache,
}

impl SubscriptionCoordinator {
    pub fn new(cache: TableSnapshotCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &TableSnapshotCache {
        &self.cache
    }

    /// Mount a consumer of `table` shaped by `options`.
    ///
    /// The hook starts with whatever the cache already holds for the key and
    /// follows it from there. Must be called within a Tokio runtime.
    pub fn use_table(&self, table: impl Into<String>, options: QueryOptions) -> Result<TableHook> {
        let query = TableQuery::new(table, options);
        query.validate()?;

        let mut hook = TableHook {
            cache: self.cache.clone(),
            shared: Arc::new(HookShared {
                state: Mutex::new(HookState::default()),
                mounted: AtomicBool::new(true),
                observer: Mutex::new(None),
            }),
            query,
            subscription: None,
        };
        hook.subscribe()?;
        debug!("[LINK_HOOK] Mounted consumer of {}", hook.key());
        Ok(hook)
    }
}

/// One mounted consumer. Dropping it unmounts.
pub struct TableHook {
    cache: TableSnapshotCache,
    shared: Arc<HookShared>,
    query: TableQuery,
    subscription: Option<KeySubscription>,
}

impl TableHook {
    fn subscribe(&mut self) -> Result<()> {
        let generation = self.shared.state().generation;
        let shared: Weak<HookShared> = Arc::downgrade(&self.shared);
        let subscription = self.cache.subscribe_key(&self.query, move |snapshot| {
            if let Some(shared) = shared.upgrade() {
                shared.deliver(generation, snapshot);
            }
        })?;

        {
            let mut state = self.shared.state();
            // A callback during subscribe already carries a newer snapshot.
            if state.generation == generation && !state.delivered {
                state.snapshot = subscription.initial_snapshot().clone();
            }
        }
        self.subscription = Some(subscription);
        Ok(())
    }

    pub fn key(&self) -> CacheKey {
        self.query.cache_key()
    }

    pub fn table(&self) -> &str {
        &self.query.table
    }

    pub fn options(&self) -> &QueryOptions {
        &self.query.options
    }

    pub fn is_mounted(&self) -> bool {
        self.shared.mounted.load(Ordering::Acquire)
    }

    /// Latest snapshot seen by this consumer.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.state().snapshot.clone()
    }

    pub fn data(&self) -> Arc<Vec<Record>> {
        self.shared.state().snapshot.rows.clone()
    }

    pub fn loading(&self) -> bool {
        self.shared.state().snapshot.loading
    }

    /// The last prime error, reported only while there is no data to show.
    pub fn error(&self) -> Option<LinkError> {
        visible_error(&self.shared.state().snapshot)
    }

    /// Stale rows are on screen while a refresh runs.
    pub fn is_refreshing(&self) -> bool {
        self.shared.state().snapshot.is_refreshing()
    }

    pub fn result(&self) -> TableResult {
        TableResult::from_snapshot(&self.shared.state().snapshot)
    }

    /// Observe every state change of this hook. Replaces any previous observer.
    pub fn on_change(&self, observer: impl Fn(&TableResult) + Send + Sync + 'static) {
        *self
            .shared
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(observer));
    }

    /// Re-prime this consumer's key only. Returns immediately; the new rows
    /// arrive through the usual snapshot path.
    pub fn refetch(&self) {
        if !self.is_mounted() {
            return;
        }
        let key = self.key();
        debug!("[LINK_HOOK] Refetch of {}", key);
        self.cache.invalidate_key(&key);
    }

    /// Like [`refetch`](Self::refetch) but waits for the fresh snapshot.
    pub async fn refetch_and_wait(&self) -> Result<Snapshot> {
        self.cache.refresh(&self.key()).await
    }

    /// Point the hook at a different table or query shape.
    ///
    /// The old subscription is closed before the new one opens. A no-op when
    /// nothing changed.
    pub fn update(&mut self, table: impl Into<String>, options: QueryOptions) -> Result<()> {
        let query = TableQuery::new(table, options);
        if query == self.query {
            return Ok(());
        }
        query.validate()?;
        if !self.is_mounted() {
            return Err(LinkError::InternalError("Cannot update an unmounted hook".to_string()));
        }

        debug!("[LINK_HOOK] Switching {} -> {}", self.key(), query.cache_key());
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
        {
            let mut state = self.shared.state();
            state.generation += 1;
            state.delivered = false;
            state.snapshot = Snapshot::empty();
        }
        self.query = query;
        self.subscribe()
    }

    /// Detach from the cache. Callbacks still in flight become no-ops.
    pub fn unmount(&mut self) {
        if !self.shared.mounted.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close();
        }
        debug!("[LINK_HOOK] Unmounted consumer of {}", self.key());
    }
}

impl Drop for TableHook {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl std::fmt::Debug for TableHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHook")
            .field("query", &self.query)
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(rows: Vec<Record>, error: Option<LinkError>) -> Snapshot {
        Snapshot {
            rows: Arc::new(rows),
            error,
            ..Snapshot::default()
        }
    }

    #[test]
    fn test_error_hidden_when_rows_exist() {
        let row = Record::from_json(json!({"id": 1})).unwrap();
        let failed = LinkError::NetworkError("offline".into());

        let with_rows = TableResult::from_snapshot(&snapshot(vec![row], Some(failed.clone())));
        assert!(with_rows.error.is_none());
        assert_eq!(with_rows.data.len(), 1);

        let without_rows = TableResult::from_snapshot(&snapshot(vec![], Some(failed.clone())));
        assert_eq!(without_rows.error, Some(failed));
    }
}
