//! Shared fixtures for the integration tests: an in-memory query backend
//! and a channel-backed changefeed transport.

#![allow(dead_code)]

use async_trait::async_trait;
use estate_link::{
    ChangeEvent, ChangeFeedTransport, ChangeStream, ConnectionOptions, EstateLinkClient, EstateLinkClientBuilder, Filter,
    LinkError, QueryOptions, QueryRequest, Record, RemoteQuery, Result, SnapshotStatus, TableHook,
};
use futures_util::stream;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

pub fn row(value: JsonValue) -> Record {
    Record::from_json(value).expect("test rows are JSON objects")
}

pub fn ids(rows: &[Record]) -> Vec<String> {
    rows.iter()
        .map(|r| r.key("id").unwrap_or_else(|| "?".to_string()))
        .collect()
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("operation timed out")
}

// ── query backend ─────────────────────────────────────────────────────────────

/// In-memory remote store. Counts every query and can hold responses
/// behind a gate to keep primes in flight.
#[derive(Default)]
pub struct MockQueryBackend {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    requests: Mutex<Vec<QueryRequest>>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    failure: Mutex<Option<LinkError>>,
}

impl MockQueryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_rows(&self, table: &str, rows: Vec<Record>) {
        self.tables.lock().unwrap().insert(table.to_string(), rows);
    }

    /// Insert or replace a row by `id`.
    pub fn upsert(&self, table: &str, record: Record) {
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        let key = record.key("id");
        rows.retain(|existing| existing.key("id") != key);
        rows.push(record);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, table: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.table == table)
            .count()
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Hold every query until released.
    pub fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held queries through.
    pub fn release(&self, n: usize) {
        if let Some(gate) = self.gate.lock().unwrap().as_ref() {
            gate.add_permits(n);
        }
    }

    /// Release everything and stop holding.
    pub fn open(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.close();
        }
    }

    /// Fail the next query with `error`.
    pub fn fail_next(&self, error: LinkError) {
        *self.failure.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl RemoteQuery for MockQueryBackend {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            // A closed gate lets everything through.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if let Some(error) = self.failure.lock().unwrap().take() {
            return Err(error);
        }

        let options = {
            let mut options = QueryOptions::new().with_filter(request.filter.clone());
            if let Some(column) = &request.order_by {
                options = options.with_order_by(column.clone(), request.ascending);
            }
            options
        };
        let mut rows: Vec<Record> = self
            .tables
            .lock()
            .unwrap()
            .get(&request.table)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            // The store evaluates opaque filters itself; the mock keeps everything.
            .filter(|r| matches!(request.filter, Filter::Opaque { .. }) || options.filter.matches(r) == Some(true))
            .collect();
        rows.sort_by(|a, b| options.compare_records(a, b));
        rows.truncate(request.limit);
        Ok(rows)
    }
}

// ── changefeed transport ──────────────────────────────────────────────────────

type EventSender = mpsc::UnboundedSender<Result<ChangeEvent>>;

/// Transport whose connections are in-process channels.
#[derive(Default)]
pub struct MockTransport {
    connections: Mutex<HashMap<String, Vec<EventSender>>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Refuse (or accept again) new connections.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Connections to `table` whose stream is still held by the client.
    pub fn open_connections(&self, table: &str) -> usize {
        let mut connections = self.connections.lock().unwrap();
        let senders = connections.entry(table.to_string()).or_default();
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }

    /// Deliver `event` on every open connection of its table.
    pub fn emit(&self, event: ChangeEvent) {
        let mut connections = self.connections.lock().unwrap();
        if let Some(senders) = connections.get_mut(&event.table) {
            senders.retain(|tx| tx.send(Ok(event.clone())).is_ok());
        }
    }

    /// Break every connection of `table` with a transport error.
    pub fn break_connections(&self, table: &str) {
        let mut connections = self.connections.lock().unwrap();
        if let Some(senders) = connections.remove(table) {
            for tx in senders {
                let _ = tx.send(Err(LinkError::TransportError("connection reset".into())));
            }
        }
    }
}

#[async_trait]
impl ChangeFeedTransport for MockTransport {
    async fn connect(&self, table: &str) -> Result<ChangeStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(LinkError::TransportError("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(tx);

        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

// ── client ────────────────────────────────────────────────────────────────────

pub struct Harness {
    pub client: EstateLinkClient,
    pub backend: Arc<MockQueryBackend>,
    pub transport: Arc<MockTransport>,
}

impl Harness {
    pub fn new() -> Self {
        Self::custom(|builder| builder)
    }

    pub fn with_connection_options(options: ConnectionOptions) -> Self {
        Self::custom(|builder| builder.connection_options(options))
    }

    /// Build with extra builder settings on top of the mocks.
    pub fn custom(configure: impl FnOnce(EstateLinkClientBuilder) -> EstateLinkClientBuilder) -> Self {
        let backend = MockQueryBackend::new();
        let transport = MockTransport::new();
        let builder = EstateLinkClient::builder()
            .base_url("http://localhost:54321")
            .query_backend(backend.clone())
            .transport(transport.clone());
        let client = configure(builder).build().expect("client builds");
        Self {
            client,
            backend,
            transport,
        }
    }

    /// Wait until the changefeed of `table` is live so emitted events arrive.
    pub async fn wait_connected(&self, table: &str) {
        let feed = self.client.changefeed().clone();
        let table_name = table.to_string();
        wait_until(&format!("changefeed for '{}'", table), move || {
            feed.is_connected(&table_name)
        })
        .await;
    }
}

/// Wait until the hook's key has finished priming.
pub async fn wait_ready(hook: &TableHook) {
    wait_until(&format!("{} to prime", hook.key()), || {
        let snapshot = hook.snapshot();
        !snapshot.loading && snapshot.status != SnapshotStatus::Priming && snapshot.status != SnapshotStatus::Empty
    })
    .await;
}
