//! One-shot table queries used to prime the cache.
//!
//! [`QueryExecutor`] validates and bounds a request, then hands it to a
//! [`RemoteQuery`] backend. It never retries; retry policy belongs to the
//! caller (the cache surfaces the error and keeps its last good rows).

mod rest;

pub use rest::RestQueryBackend;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{LinkError, Result};
use crate::models::query_options::validate_table_name;
use crate::models::{Filter, QueryOptions, Record};

/// A bounded query against one table, as sent to the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub table: String,
    pub select: String,
    pub filter: Filter,
    pub order_by: Option<String>,
    pub ascending: bool,
    /// Always set; the executor applies its row cap before dispatch.
    pub limit: usize,
}

/// Remote query collaborator.
///
/// Implementations return rows in the requested order, or a typed error
/// (`NetworkError`, `ValidationError`, `NotFoundError`, ...).
#[async_trait]
pub trait RemoteQuery: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>>;
}

/// Handles prime queries against the remote store.
#[derive(Clone)]
pub struct QueryExecutor {
    backend: Arc<dyn RemoteQuery>,
    max_rows: usize,
}

impl QueryExecutor {
    pub fn new(backend: Arc<dyn RemoteQuery>, max_rows: usize) -> Self {
        Self {
            backend,
            max_rows: max_rows.max(1),
        }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Build the request for `table` without sending it.
    ///
    /// The limit is the smaller of the caller's limit and `max_rows`.
    pub fn build_request(&self, table: &str, options: &QueryOptions) -> Result<QueryRequest> {
        validate_table_name(table)?;
        options.validate()?;

        let limit = options
            .limit
            .map(|requested| requested.min(self.max_rows))
            .unwrap_or(self.max_rows);

        Ok(QueryRequest {
            table: table.to_string(),
            select: options.select.trim().to_string(),
            filter: options.filter.clone(),
            order_by: options.order_by.clone(),
            ascending: options.ascending,
            limit,
        })
    }

    /// Fetch the rows of one (table, options) view.
    pub async fn fetch_snapshot(&self, table: &str, options: &QueryOptions) -> Result<Vec<Record>> {
        let request = self.build_request(table, options)?;
        self.execute(&request).await
    }

    /// Fetch a single row by primary key.
    ///
    /// Returns [`LinkError::NotFoundError`] when no row matches.
    pub async fn fetch_record(
        &self,
        table: &str,
        primary_key: &str,
        id: impl Into<JsonValue>,
    ) -> Result<Record> {
        let id = id.into();
        let options = QueryOptions::new()
            .with_primary_key(primary_key)
            .with_filter(Filter::eq(primary_key, id.clone()))
            .with_limit(1);
        let request = self.build_request(table, &options)?;

        self.execute(&request).await?.into_iter().next().ok_or_else(|| {
            LinkError::NotFoundError(format!("{} with {}={} not found", table, primary_key, id))
        })
    }

    async fn execute(&self, request: &QueryRequest) -> Result<Vec<Record>> {
        debug!(
            "[LINK_QUERY] Starting query: table={} filter=\"{}\" limit={}",
            request.table, request.filter, request.limit
        );
        let start = Instant::now();

        match self.backend.query(request).await {
            Ok(mut rows) => {
                // A backend that ignores the limit must not blow the memory bound.
                if rows.len() > request.limit {
                    warn!(
                        "[LINK_QUERY] Backend returned {} rows for limit {}, truncating",
                        rows.len(),
                        request.limit
                    );
                    rows.truncate(request.limit);
                }
                debug!(
                    "[LINK_QUERY] Success: table={} rows={} total_ms={}",
                    request.table,
                    rows.len(),
                    start.elapsed().as_millis()
                );
                Ok(rows)
            },
            Err(e) => {
                warn!(
                    "[LINK_QUERY] Failed: table={} error=\"{}\" total_ms={}",
                    request.table,
                    e,
                    start.elapsed().as_millis()
                );
                Err(e)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        requests: Mutex<Vec<QueryRequest>>,
        rows: Vec<Record>,
    }

    #[async_trait]
    impl RemoteQuery for Recorder {
        async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.rows.clone())
        }
    }

    fn recorder(rows: Vec<serde_json::Value>) -> Arc<Recorder> {
        Arc::new(Recorder {
            requests: Mutex::new(Vec::new()),
            rows: rows.into_iter().map(|r| Record::from_json(r).unwrap()).collect(),
        })
    }

    #[tokio::test]
    async fn test_limit_is_capped() {
        let backend = recorder(vec![]);
        let executor = QueryExecutor::new(backend.clone(), 1000);

        executor.fetch_snapshot("parcels", &QueryOptions::new()).await.unwrap();
        executor
            .fetch_snapshot("parcels", &QueryOptions::new().with_limit(5000))
            .await
            .unwrap();
        executor
            .fetch_snapshot("parcels", &QueryOptions::new().with_limit(20))
            .await
            .unwrap();

        let limits: Vec<usize> = backend.requests.lock().unwrap().iter().map(|r| r.limit).collect();
        assert_eq!(limits, vec![1000, 1000, 20]);
    }

    #[tokio::test]
    async fn test_oversized_response_truncated() {
        let backend = recorder(vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
        let executor = QueryExecutor::new(backend, 2);
        let rows = executor.fetch_snapshot("parcels", &QueryOptions::new()).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_validation_happens_before_dispatch() {
        let backend = recorder(vec![]);
        let executor = QueryExecutor::new(backend.clone(), 100);

        let err = executor.fetch_snapshot("", &QueryOptions::new()).await.unwrap_err();
        assert!(matches!(err, LinkError::ValidationError(_)));
        let err = executor
            .fetch_snapshot("parcels", &QueryOptions::new().with_limit(0))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ValidationError(_)));

        assert!(backend.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_record_not_found() {
        let executor = QueryExecutor::new(recorder(vec![]), 100);
        let err = executor.fetch_record("parcels", "id", 42).await.unwrap_err();
        assert!(matches!(err, LinkError::NotFoundError(_)));
    }

    #[tokio::test]
    async fn test_fetch_record_uses_key_filter() {
        let backend = recorder(vec![json!({"id": 42, "status": "sold"})]);
        let executor = QueryExecutor::new(backend.clone(), 100);

        let record = executor.fetch_record("parcels", "id", 42).await.unwrap();
        assert_eq!(record.get("status"), Some(&json!("sold")));

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].filter, Filter::eq("id", 42));
        assert_eq!(requests[0].limit, 1);
    }
}
