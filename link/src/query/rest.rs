//! REST implementation of [`RemoteQuery`].
//!
//! `GET {base_url}/rest/v1/{table}?select=..&order=col.asc&limit=N&<filter>`

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::Value as JsonValue;
use std::time::Instant;

use super::{QueryRequest, RemoteQuery};
use crate::auth::AuthProvider;
use crate::error::{LinkError, Result};
use crate::models::{Filter, Record};
use crate::timeouts::LinkTimeouts;

/// Query backend speaking the store's REST dialect over `reqwest`.
#[derive(Clone)]
pub struct RestQueryBackend {
    base_url: String,
    http_client: reqwest::Client,
    auth: AuthProvider,
}

impl RestQueryBackend {
    pub fn new(base_url: impl Into<String>, auth: AuthProvider, timeouts: &LinkTimeouts) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if !LinkTimeouts::is_no_timeout(timeouts.connection_timeout) {
            builder = builder.connect_timeout(timeouts.connection_timeout);
        }
        if !LinkTimeouts::is_no_timeout(timeouts.request_timeout) {
            builder = builder.timeout(timeouts.request_timeout);
        }
        let http_client = builder.build().map_err(|e| {
            LinkError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self::with_client(base_url, http_client, auth))
    }

    pub fn with_client(
        base_url: impl Into<String>,
        http_client: reqwest::Client,
        auth: AuthProvider,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            auth,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }
}

/// Query-string pairs for a request, in a stable order.
pub(crate) fn query_pairs(request: &QueryRequest) -> Result<Vec<(String, String)>> {
    let mut pairs = vec![("select".to_string(), request.select.clone())];

    match &request.filter {
        Filter::All => {},
        Filter::Simple { .. } => {
            let expr = request.filter.to_expr();
            if let Some((column, rhs)) = expr.split_once('=') {
                pairs.push((column.to_string(), rhs.to_string()));
            }
        },
        Filter::Opaque { expr } => {
            for clause in expr.split('&').filter(|c| !c.trim().is_empty()) {
                let (column, rhs) = clause.split_once('=').ok_or_else(|| {
                    LinkError::validation(format!("Cannot send filter clause '{}'", clause))
                })?;
                pairs.push((column.trim().to_string(), rhs.to_string()));
            }
        },
    }

    if let Some(column) = &request.order_by {
        let direction = if request.ascending { "asc" } else { "desc" };
        pairs.push(("order".to_string(), format!("{}.{}", column, direction)));
    }
    pairs.push(("limit".to_string(), request.limit.to_string()));
    Ok(pairs)
}

#[async_trait]
impl RemoteQuery for RestQueryBackend {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>> {
        let url = self.table_url(&request.table);
        let pairs = query_pairs(request)?;

        let req_builder = self.http_client.get(&url).query(&pairs);
        let req_builder = self.auth.apply_to_request(req_builder)?;

        let start = Instant::now();
        debug!("[LINK_HTTP] Sending GET to {}", url);

        let response = req_builder.send().await?;
        let status = response.status();
        let http_duration_ms = start.elapsed().as_millis();
        debug!(
            "[LINK_HTTP] Response received: status={} duration_ms={}",
            status, http_duration_ms
        );

        if status.is_success() {
            let body: Vec<JsonValue> = response.json().await?;
            return body.into_iter().map(Record::from_json).collect();
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = extract_error_message(&error_text);
        warn!(
            "[LINK_HTTP] Server error: status={} message=\"{}\" duration_ms={}",
            status, message, http_duration_ms
        );

        Err(map_status(status.as_u16(), message))
    }
}

fn extract_error_message(body: &str) -> String {
    match serde_json::from_str::<JsonValue>(body) {
        Ok(JsonValue::Object(map)) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        _ => body.to_string(),
    }
}

pub(crate) fn map_status(status_code: u16, message: String) -> LinkError {
    match status_code {
        400 | 422 => LinkError::ValidationError(message),
        404 => LinkError::NotFoundError(message),
        _ => LinkError::ServerError {
            status_code,
            message,
        },
    }
}
