//! ChangeFeed client: at most one live connection per table.
//!
//! The first [`ChangeFeedClient::subscribe`] for a table spawns a feed task
//! that connects through the [`ChangeFeedTransport`] and fans every event out
//! to all listeners of that table. Filtering by cache key is the cache's job.
//! The last unsubscribe stops the task and closes the connection.
//!
//! Transport loss is handled inside the task: exponential backoff, then
//! reconnect. When reconnection is disabled or exhausted the table drops to
//! non-realtime mode (listeners simply stop receiving events) until its last
//! listener leaves. Nothing here is ever reported to table consumers.

mod transport;
mod websocket;

pub use transport::{ChangeFeedTransport, ChangeStream};
pub use websocket::WebSocketTransport;

use futures_util::StreamExt;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::oneshot;

use crate::error::{LinkError, Result};
use crate::event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
use crate::models::query_options::validate_table_name;
use crate::models::{ChangeEvent, ConnectionOptions};

/// Callback receiving every change event of a table.
pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Shared per-table connection status, readable without the client lock.
#[derive(Debug, Default)]
struct TableStatus {
    connected: AtomicBool,
    degraded: AtomicBool,
}

struct TableChannel {
    generation: u64,
    listeners: BTreeMap<u64, ChangeListener>,
    status: Arc<TableStatus>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

struct FeedInner {
    transport: Arc<dyn ChangeFeedTransport>,
    options: ConnectionOptions,
    event_handlers: EventHandlers,
    channels: Mutex<HashMap<String, TableChannel>>,
    next_id: AtomicU64,
}

impl FeedInner {
    fn channels(&self) -> MutexGuard<'_, HashMap<String, TableChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(&self, table: &str, id: u64) {
        let mut channels = self.channels();
        let Some(channel) = channels.get_mut(table) else {
            return;
        };
        if channel.listeners.remove(&id).is_none() {
            return;
        }
        debug!(
            "[LINK_FEED] Listener {} left '{}' ({} remaining)",
            id,
            table,
            channel.listeners.len()
        );
        if channel.listeners.is_empty() {
            if let Some(mut channel) = channels.remove(table) {
                if let Some(tx) = channel.shutdown_tx.take() {
                    let _ = tx.send(());
                }
            }
            info!("[LINK_FEED] Closing changefeed for '{}'", table);
        }
    }

    /// Snapshot the listeners of a table, if `generation` is still current.
    fn listeners_for(&self, table: &str, generation: u64) -> Option<Vec<ChangeListener>> {
        let channels = self.channels();
        let channel = channels.get(table)?;
        if channel.generation != generation {
            return None;
        }
        Some(channel.listeners.values().cloned().collect())
    }
}

/// Reference-counted multiplexer of per-table change feeds.
#[derive(Clone)]
pub struct ChangeFeedClient {
    inner: Arc<FeedInner>,
}

impl ChangeFeedClient {
    pub fn new(
        transport: Arc<dyn ChangeFeedTransport>,
        options: ConnectionOptions,
        event_handlers: EventHandlers,
    ) -> Self {
        Self {
            inner: Arc::new(FeedInner {
                transport,
                options,
                event_handlers,
                channels: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `on_event` for every change on `table`.
    ///
    /// Opens the table's connection if this is its first listener. The
    /// connection is established in the background; this call only fails on
    /// an invalid table name. Must be called within a Tokio runtime.
    pub fn subscribe(
        &self,
        table: &str,
        on_event: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Result<ChangeFeedSubscription> {
        validate_table_name(table)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: ChangeListener = Arc::new(on_event);

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            LinkError::InternalError(format!("Changefeed needs a Tokio runtime: {}", e))
        })?;

        let mut channels = self.inner.channels();
        if let Some(channel) = channels.get_mut(table) {
            channel.listeners.insert(id, listener);
            debug!(
                "[LINK_FEED] Listener {} joined '{}' ({} total)",
                id,
                table,
                channel.listeners.len()
            );
        } else {
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let status = Arc::new(TableStatus::default());
            let mut listeners = BTreeMap::new();
            listeners.insert(id, listener);
            // Listener ids are unique, so the first id doubles as the generation.
            channels.insert(
                table.to_string(),
                TableChannel {
                    generation: id,
                    listeners,
                    status: status.clone(),
                    shutdown_tx: Some(shutdown_tx),
                },
            );
            info!("[LINK_FEED] Opening changefeed for '{}'", table);
            runtime.spawn(feed_task(
                Arc::downgrade(&self.inner),
                table.to_string(),
                id,
                status,
                shutdown_rx,
            ));
        }

        Ok(ChangeFeedSubscription {
            inner: Arc::downgrade(&self.inner),
            table: table.to_string(),
            id,
            closed: false,
        })
    }

    /// Tables with at least one listener, sorted.
    pub fn active_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.inner.channels().keys().cloned().collect();
        tables.sort();
        tables
    }

    pub fn listener_count(&self, table: &str) -> usize {
        self.inner
            .channels()
            .get(table)
            .map_or(0, |channel| channel.listeners.len())
    }

    pub fn is_connected(&self, table: &str) -> bool {
        self.inner
            .channels()
            .get(table)
            .map_or(false, |channel| channel.status.connected.load(Ordering::SeqCst))
    }

    /// Whether the table gave up reconnecting and runs without realtime updates.
    pub fn is_degraded(&self, table: &str) -> bool {
        self.inner
            .channels()
            .get(table)
            .map_or(false, |channel| channel.status.degraded.load(Ordering::SeqCst))
    }
}

/// Handle for one changefeed listener. Dropping it unsubscribes.
pub struct ChangeFeedSubscription {
    inner: Weak<FeedInner>,
    table: String,
    id: u64,
    closed: bool,
}

impl ChangeFeedSubscription {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(&self.table, self.id);
        }
    }
}

impl Drop for ChangeFeedSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChangeFeedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeedSubscription")
            .field("table", &self.table)
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

enum Outcome {
    Shutdown,
    Lost,
}

async fn feed_task(
    inner: Weak<FeedInner>,
    table: String,
    generation: u64,
    status: Arc<TableStatus>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let (transport, options, event_handlers) = match inner.upgrade() {
        Some(inner) => (
            inner.transport.clone(),
            inner.options.clone(),
            inner.event_handlers.clone(),
        ),
        None => return,
    };

    // Reconnect attempts since the last successful connect.
    let mut attempt: u32 = 0;

    loop {
        let connected = tokio::select! {
            biased;
            _ = &mut shutdown_rx => return,
            result = transport.connect(&table) => result,
        };

        match connected {
            Ok(mut stream) => {
                if attempt > 0 {
                    info!("[LINK_FEED] Reconnection to '{}' successful", table);
                }
                attempt = 0;
                status.connected.store(true, Ordering::SeqCst);
                event_handlers.emit_connect(&table);

                let (outcome, reason) = loop {
                    tokio::select! {
                        biased;
                        _ = &mut shutdown_rx => {
                            break (Outcome::Shutdown, DisconnectReason::new("Last listener unsubscribed"));
                        }
                        item = stream.next() => match item {
                            Some(Ok(event)) => {
                                if event.table != table {
                                    debug!(
                                        "[LINK_FEED] Ignoring event for '{}' on '{}' channel",
                                        event.table, table
                                    );
                                    continue;
                                }
                                let Some(inner) = inner.upgrade() else {
                                    break (Outcome::Shutdown, DisconnectReason::new("Client dropped"));
                                };
                                let Some(listeners) = inner.listeners_for(&table, generation) else {
                                    break (Outcome::Shutdown, DisconnectReason::new("Channel replaced"));
                                };
                                drop(inner);
                                for listener in listeners {
                                    listener(&event);
                                }
                            },
                            Some(Err(e)) => {
                                warn!("[LINK_FEED] Transport error on '{}': {}", table, e);
                                event_handlers.emit_error(ConnectionError::new(
                                    &table,
                                    e.to_string(),
                                    options.allows_attempt(0),
                                ));
                                break (Outcome::Lost, DisconnectReason::new(e.to_string()));
                            },
                            None => {
                                warn!("[LINK_FEED] Changefeed stream for '{}' ended", table);
                                break (Outcome::Lost, DisconnectReason::new("Changefeed stream ended"));
                            },
                        }
                    }
                };

                status.connected.store(false, Ordering::SeqCst);
                event_handlers.emit_disconnect(&table, reason);
                if let Outcome::Shutdown = outcome {
                    return;
                }
            },
            Err(e) => {
                warn!(
                    "[LINK_FEED] Connection to '{}' failed (attempt {}): {}",
                    table,
                    attempt + 1,
                    e
                );
                event_handlers.emit_error(ConnectionError::new(
                    &table,
                    e.to_string(),
                    options.allows_attempt(attempt),
                ));
            },
        }

        if !options.allows_attempt(attempt) {
            warn!(
                "[LINK_FEED] Giving up on realtime for '{}' after {} reconnect attempt(s); cached data stays, refetch still works",
                table, attempt
            );
            status.degraded.store(true, Ordering::SeqCst);
            let _ = shutdown_rx.await;
            return;
        }

        let delay = options.backoff_delay(attempt);
        attempt += 1;
        info!(
            "[LINK_FEED] Reconnecting '{}' in {}ms (attempt {})",
            table,
            delay.as_millis(),
            attempt
        );

        tokio::select! {
            biased;
            _ = &mut shutdown_rx => return,
            _ = tokio::time::sleep(delay) => {},
        }
    }
}
