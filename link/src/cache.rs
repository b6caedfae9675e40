//! Table snapshot cache.
//!
//! Process-wide store of [`Snapshot`]s keyed by [`CacheKey`]. It merges
//! prime results and change events into ordered, deduplicated row sets and
//! fans them out to subscribers.
//!
//! Per-key lifecycle follows [`SnapshotStatus`].
//!
//! - Concurrent primes of one key share a single in-flight fetch.
//! - Change events that arrive mid-prime are queued and applied after the
//!   new rows install.
//! - The first subscriber of a key primes it and attaches its table to the
//!   changefeed; the last subscriber of a table's keys detaches it.
//! - All state sits behind one mutex. Callbacks run after it is released,
//!   one dispatcher at a time, so re-entrant calls never recurse.

mod entry;
mod merge;
mod notify;

pub use notify::SnapshotCallback;

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot;

use crate::changefeed::{ChangeFeedClient, ChangeFeedSubscription};
use crate::error::{LinkError, Result};
use crate::models::query_options::validate_table_name;
use crate::models::snapshot::now_millis;
use crate::models::{
    CacheKey, CacheOptions, ChangeEvent, Filter, QueryOptions, Record, Snapshot,
    SnapshotStatus, TableQuery,
};
use crate::query::QueryExecutor;
use entry::{KeyEntry, PrimeWaiter};
use merge::MergeOutcome;
use notify::{Notifier, Subscriber};

struct TableFeed {
    active_keys: usize,
    handle: Option<ChangeFeedSubscription>,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, KeyEntry>,
    tables: HashMap<String, TableFeed>,
    /// Monotonic clock for idle-key LRU ordering.
    idle_tick: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.idle_tick += 1;
        self.idle_tick
    }
}

struct CacheInner {
    executor: QueryExecutor,
    feed: ChangeFeedClient,
    options: CacheOptions,
    state: Mutex<CacheState>,
    notifier: Notifier,
    next_id: AtomicU64,
}

/// Shared cache of table snapshots. Cheap to clone.
#[derive(Clone)]
pub struct TableSnapshotCache {
    inner: Arc<CacheInner>,
}

impl TableSnapshotCache {
    pub fn new(executor: QueryExecutor, feed: ChangeFeedClient, options: CacheOptions) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                executor,
                feed,
                options,
                state: Mutex::new(CacheState::default()),
                notifier: Notifier::default(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.inner.executor
    }

    pub fn feed(&self) -> &ChangeFeedClient {
        &self.inner.feed
    }

    /// Fetch the key's rows, sharing any prime already in flight.
    ///
    /// On failure the previous rows stay cached and the error is recorded on
    /// the snapshot as well as returned.
    pub async fn prime(&self, query: &TableQuery) -> Result<Snapshot> {
        query.validate()?;
        let key = query.cache_key();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state();
            if !state.entries.contains_key(&key) {
                let tick = state.tick();
                let mut entry = KeyEntry::new(query.table.clone(), query.options.clone());
                entry.idle_since = Some(tick);
                state.entries.insert(key.clone(), entry);
            }
            self.inner.start_prime(&mut state, &key, vec![tx]);
        }
        self.inner.notifier.dispatch();
        await_prime(rx, &key).await
    }

    /// Re-prime one existing key and wait for the fresh rows.
    ///
    /// If a prime is already running, a follow-up prime is scheduled and
    /// this waits for that one.
    pub async fn refresh(&self, key: &CacheKey) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        let found = {
            let mut state = self.inner.state();
            self.inner.force_refresh(&mut state, key, vec![tx])
        };
        if !found {
            return Err(LinkError::NotFoundError(format!("No cache entry for {}", key)));
        }
        self.inner.notifier.dispatch();
        await_prime(rx, key).await
    }

    /// Fire-and-forget re-prime of one key. Returns `false` if the key is
    /// not cached.
    pub fn invalidate_key(&self, key: &CacheKey) -> bool {
        let found = {
            let mut state = self.inner.state();
            self.inner.force_refresh(&mut state, key, Vec::new())
        };
        self.inner.notifier.dispatch();
        found
    }

    /// Re-prime every subscribed key of `table`, or only those whose filter
    /// equals `filter`. Returns the number of keys refreshed.
    ///
    /// Keys with no subscribers are not fetched; they are marked
    /// [`SnapshotStatus::Stale`] and prime again when the next subscriber
    /// arrives.
    pub fn invalidate(&self, table: &str, filter: Option<&Filter>) -> Result<usize> {
        validate_table_name(table)?;
        let count = {
            let mut state = self.inner.state();
            let mut keys = Vec::new();
            for (key, entry) in state.entries.iter_mut() {
                if entry.table != table || filter.map_or(false, |f| entry.options.filter != *f) {
                    continue;
                }
                if entry.is_idle() {
                    entry.mark_stale();
                } else {
                    keys.push(key.clone());
                }
            }
            for key in &keys {
                self.inner.force_refresh(&mut state, key, Vec::new());
            }
            keys.len()
        };
        self.inner.notifier.dispatch();
        Ok(count)
    }

    /// Merge one change event into every key of its table.
    pub fn apply_change_event(&self, event: &ChangeEvent) {
        self.inner.apply_change_event(event);
    }

    /// Register `callback` on the key described by `query`.
    ///
    /// The first subscriber of a key triggers its prime and attaches the
    /// table to the changefeed. The callback receives every later snapshot
    /// of the key until the returned handle is closed or dropped. Must be
    /// called within a Tokio runtime.
    pub fn subscribe_key(
        &self,
        query: &TableQuery,
        callback: impl Fn(&Snapshot) + Send + Sync + 'static,
    ) -> Result<KeySubscription> {
        query.validate()?;
        let key = query.cache_key();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let subscriber = Subscriber {
            callback: Arc::new(callback),
            active: active.clone(),
        };

        let snapshot = {
            let mut state = self.inner.state();
            let entry = state
                .entries
                .entry(key.clone())
                .or_insert_with(|| KeyEntry::new(query.table.clone(), query.options.clone()));
            let first = entry.is_idle();
            entry.subscribers.insert(id, subscriber);
            entry.idle_since = None;
            debug!(
                "[LINK_CACHE] Subscriber {} joined {} ({} total)",
                id,
                key,
                entry.subscribers.len()
            );

            if first {
                self.inner.attach_table(&mut state, &query.table);
                self.inner.start_prime(&mut state, &key, Vec::new());
            }
            state
                .entries
                .get(&key)
                .map(|entry| entry.snapshot.clone())
                .unwrap_or_default()
        };
        self.inner.notifier.dispatch();

        Ok(KeySubscription {
            cache: Arc::downgrade(&self.inner),
            key,
            id,
            active,
            snapshot,
            closed: false,
        })
    }

    /// Current snapshot of a key, for one-off non-reactive reads.
    pub fn get_snapshot(&self, key: &CacheKey) -> Option<Snapshot> {
        self.inner
            .state()
            .entries
            .get(key)
            .map(|entry| entry.snapshot.clone())
    }

    pub fn key_count(&self) -> usize {
        self.inner.state().entries.len()
    }

    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        self.inner
            .state()
            .entries
            .get(key)
            .map_or(0, |entry| entry.subscribers.len())
    }

    /// Cached keys of a table, sorted.
    pub fn keys_for_table(&self, table: &str) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self
            .inner
            .state()
            .entries
            .iter()
            .filter(|(_, entry)| entry.table == table)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl CacheInner {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn effective_limit(&self, options: &QueryOptions) -> usize {
        let max_rows = self.executor.max_rows();
        options.limit.map_or(max_rows, |limit| limit.min(max_rows))
    }

    /// Start a prime of `key` or join the one in flight.
    ///
    /// Returns `false` if the key is not cached.
    fn start_prime(
        self: &Arc<Self>,
        state: &mut CacheState,
        key: &CacheKey,
        waiters: Vec<PrimeWaiter>,
    ) -> bool {
        let Some(entry) = state.entries.get_mut(key) else {
            return false;
        };
        if let Some(inflight) = entry.inflight.as_mut() {
            debug!("[LINK_CACHE] Coalesced prime of {}", key);
            inflight.extend(waiters);
            return true;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error = LinkError::InternalError(format!("Prime needs a Tokio runtime: {}", e));
                warn!("[LINK_CACHE] Cannot prime {}: {}", key, error);
                entry.snapshot.error = Some(error.clone());
                entry.snapshot.status = SnapshotStatus::Error;
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                self.notifier.enqueue(entry.notification());
                return true;
            },
        };

        debug!("[LINK_CACHE] Priming {}", key);
        entry.inflight = Some(waiters);
        entry.mark_priming();
        self.notifier.enqueue(entry.notification());

        let cache = Arc::clone(self);
        let key = key.clone();
        let table = entry.table.clone();
        let options = entry.options.clone();
        // Detached: a departed caller must not cancel a fetch others share.
        runtime.spawn(async move {
            let result = cache.executor.fetch_snapshot(&table, &options).await;
            cache.finish_prime(&key, result);
        });
        true
    }

    /// Re-prime now, or right after the prime already in flight.
    fn force_refresh(
        self: &Arc<Self>,
        state: &mut CacheState,
        key: &CacheKey,
        waiters: Vec<PrimeWaiter>,
    ) -> bool {
        let Some(entry) = state.entries.get_mut(key) else {
            return false;
        };
        if entry.is_priming() {
            // The running request may predate the write that caused this.
            debug!("[LINK_CACHE] Follow-up prime scheduled for {}", key);
            entry.reprime_after = true;
            entry.next_waiters.extend(waiters);
            return true;
        }
        self.start_prime(state, key, waiters)
    }

    fn finish_prime(self: &Arc<Self>, key: &CacheKey, result: Result<Vec<Record>>) {
        {
            let mut state = self.state();
            let Some(entry) = state.entries.get_mut(key) else {
                return;
            };
            let waiters = entry.inflight.take().unwrap_or_default();

            let prime_error = match result {
                Ok(rows) => {
                    let rows = merge::dedupe(rows, &entry.options.primary_key);
                    debug!("[LINK_CACHE] Installed {} row(s) for {}", rows.len(), key);
                    entry.install_rows(rows);
                    entry.snapshot.error = None;
                    entry.snapshot.last_fetched_at = Some(now_millis());
                    entry.snapshot.status = SnapshotStatus::Ready;
                    None
                },
                Err(e) => {
                    warn!(
                        "[LINK_CACHE] Prime of {} failed, keeping {} row(s): {}",
                        key,
                        entry.snapshot.rows.len(),
                        e
                    );
                    entry.snapshot.error = Some(e.clone());
                    entry.snapshot.status = SnapshotStatus::Error;
                    Some(e)
                },
            };
            entry.snapshot.loading = false;

            let limit = self.effective_limit(&entry.options);
            let mut follow_up = std::mem::take(&mut entry.reprime_after);
            let queued = entry.pending_events.len();
            while let Some(event) = entry.pending_events.pop_front() {
                match merge::apply_event(&entry.snapshot.rows, &entry.options, limit, &event) {
                    MergeOutcome::Unchanged => {},
                    MergeOutcome::Changed(rows) => entry.install_rows(rows),
                    MergeOutcome::Reprime => follow_up = true,
                }
            }
            if queued > 0 {
                debug!("[LINK_CACHE] Applied {} queued event(s) to {}", queued, key);
            }

            let snapshot = entry.snapshot.clone();
            self.notifier.enqueue(entry.notification());
            for waiter in waiters {
                let _ = waiter.send(match &prime_error {
                    Some(e) => Err(e.clone()),
                    None => Ok(snapshot.clone()),
                });
            }

            let next_waiters = std::mem::take(&mut entry.next_waiters);
            if follow_up && (!entry.is_idle() || !next_waiters.is_empty()) {
                self.start_prime(&mut state, key, next_waiters);
            } else {
                // Nobody is left to want the follow-up; resolve with what we have.
                for waiter in next_waiters {
                    let _ = waiter.send(Ok(snapshot.clone()));
                }
            }

            self.evict_idle(&mut state);
        }
        self.notifier.dispatch();
    }

    fn apply_change_event(self: &Arc<Self>, event: &ChangeEvent) {
        {
            let mut state = self.state();
            let keys: Vec<CacheKey> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.table == event.table)
                .map(|(key, _)| key.clone())
                .collect();

            for key in keys {
                let Some(entry) = state.entries.get_mut(&key) else {
                    continue;
                };
                if entry.is_priming() {
                    debug!("[LINK_CACHE] Queued {} event for {} until prime completes", event.operation(), key);
                    entry.pending_events.push_back(event.clone());
                    continue;
                }

                let limit = self.effective_limit(&entry.options);
                match merge::apply_event(&entry.snapshot.rows, &entry.options, limit, event) {
                    MergeOutcome::Unchanged => {},
                    MergeOutcome::Changed(rows) => {
                        entry.install_rows(rows);
                        self.notifier.enqueue(entry.notification());
                    },
                    MergeOutcome::Reprime => {
                        if entry.is_idle() {
                            debug!("[LINK_CACHE] {} needs a reprime but has no subscribers", key);
                            entry.mark_stale();
                        } else {
                            self.start_prime(&mut state, &key, Vec::new());
                        }
                    },
                }
            }
        }
        self.notifier.dispatch();
    }

    fn attach_table(self: &Arc<Self>, state: &mut CacheState, table: &str) {
        let feed = state
            .tables
            .entry(table.to_string())
            .or_insert_with(|| TableFeed {
                active_keys: 0,
                handle: None,
            });
        feed.active_keys += 1;
        if feed.handle.is_some() {
            return;
        }

        let cache: Weak<CacheInner> = Arc::downgrade(self);
        let subscribed = self.feed.subscribe(table, move |event| {
            if let Some(cache) = cache.upgrade() {
                cache.apply_change_event(event);
            }
        });
        match subscribed {
            Ok(handle) => feed.handle = Some(handle),
            // Prime and refetch keep working without realtime.
            Err(e) => warn!("[LINK_CACHE] Realtime unavailable for '{}': {}", table, e),
        }
    }

    fn detach_table(&self, state: &mut CacheState, table: &str) {
        let Some(feed) = state.tables.get_mut(table) else {
            return;
        };
        feed.active_keys = feed.active_keys.saturating_sub(1);
        if feed.active_keys == 0 {
            // Dropping the handle releases the changefeed listener.
            state.tables.remove(table);
            debug!("[LINK_CACHE] Detached '{}' from changefeed", table);
        }
    }

    fn unsubscribe(&self, key: &CacheKey, id: u64) {
        let mut state = self.state();
        let table = {
            let Some(entry) = state.entries.get_mut(key) else {
                return;
            };
            let Some(subscriber) = entry.subscribers.remove(&id) else {
                return;
            };
            subscriber.active.store(false, Ordering::Release);
            debug!(
                "[LINK_CACHE] Subscriber {} left {} ({} remaining)",
                id,
                key,
                entry.subscribers.len()
            );
            if !entry.is_idle() {
                return;
            }
            entry.table.clone()
        };

        let tick = state.tick();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.idle_since = Some(tick);
        }
        self.detach_table(&mut state, &table);
        self.evict_idle(&mut state);
    }

    /// Keep at most `max_idle_keys` zero-subscriber keys, dropping the
    /// longest idle first. Keys with a prime in flight are never dropped.
    fn evict_idle(&self, state: &mut CacheState) {
        let max_idle = self.options.max_idle_keys;
        let mut idle: Vec<(u64, CacheKey)> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_evictable())
            .map(|(key, entry)| (entry.idle_since.unwrap_or(0), key.clone()))
            .collect();
        if idle.len() <= max_idle {
            return;
        }
        idle.sort();
        let excess = idle.len() - max_idle;
        for (_, key) in idle.into_iter().take(excess) {
            state.entries.remove(&key);
            debug!("[LINK_CACHE] Evicted idle key {}", key);
        }
    }
}

async fn await_prime(rx: oneshot::Receiver<Result<Snapshot>>, key: &CacheKey) -> Result<Snapshot> {
    rx.await
        .map_err(|_| LinkError::InternalError(format!("Prime of {} was abandoned", key)))?
}

/// Handle for one cache subscriber. Dropping it unsubscribes.
pub struct KeySubscription {
    cache: Weak<CacheInner>,
    key: CacheKey,
    id: u64,
    active: Arc<AtomicBool>,
    snapshot: Snapshot,
    closed: bool,
}

impl KeySubscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Snapshot at the moment of subscribing. Later ones arrive through the callback.
    pub fn initial_snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn is_active(&self) -> bool {
        !self.closed && self.active.load(Ordering::Acquire)
    }

    /// Detach the callback. No new call starts once this returns; a delivery
    /// already running on another thread may still finish.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.active.store(false, Ordering::Release);
        if let Some(cache) = self.cache.upgrade() {
            cache.unsubscribe(&self.key, self.id);
        }
    }
}

impl Drop for KeySubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for KeySubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySubscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}
