//! Main estate-link client with builder pattern.
//!
//! Wires the query executor, changefeed, snapshot cache, coordinator and
//! invalidation bus into one process-wide service.

use std::sync::Arc;

use crate::{
    auth::AuthProvider,
    cache::TableSnapshotCache,
    changefeed::{ChangeFeedClient, ChangeFeedTransport, WebSocketTransport},
    config::LinkConfig,
    coordinator::{SubscriptionCoordinator, TableHook},
    error::{LinkError, Result},
    event_handlers::EventHandlers,
    invalidation::InvalidationBus,
    models::{CacheKey, CacheOptions, ConnectionOptions, QueryOptions, Snapshot},
    query::{QueryExecutor, RemoteQuery, RestQueryBackend},
    timeouts::LinkTimeouts,
};

/// Realtime table cache client.
///
/// Use [`EstateLinkClientBuilder`] to construct instances. Clones share the
/// same cache and connections.
///
/// # Examples
///
/// ```rust,no_run
/// use estate_link::{EstateLinkClient, Filter, QueryOptions};
///
/// # async fn example() -> estate_link::Result<()> {
/// let client = EstateLinkClient::builder()
///     .base_url("https://estate.example.com")
///     .build()?;
///
/// let hook = client.use_table(
///     "parcels",
///     QueryOptions::new()
///         .with_filter(Filter::eq("status", "available"))
///         .with_order_by("created_at", false),
/// )?;
/// hook.on_change(|result| println!("{} parcel(s)", result.data.len()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EstateLinkClient {
    base_url: String,
    auth: AuthProvider,
    timeouts: LinkTimeouts,
    cache: TableSnapshotCache,
    coordinator: SubscriptionCoordinator,
    invalidation: InvalidationBus,
}

impl EstateLinkClient {
    /// Create a new builder for configuring the client
    pub fn builder() -> EstateLinkClientBuilder {
        EstateLinkClientBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &AuthProvider {
        &self.auth
    }

    /// Get the configured timeouts
    pub fn timeouts(&self) -> &LinkTimeouts {
        &self.timeouts
    }

    /// Mount a reactive consumer of `table`.
    pub fn use_table(&self, table: impl Into<String>, options: QueryOptions) -> Result<TableHook> {
        self.coordinator.use_table(table, options)
    }

    /// Default query options carrying the configured primary key.
    pub fn query_options(&self) -> QueryOptions {
        self.cache.options().query_options()
    }

    /// Non-reactive read of whatever is cached for `key`.
    pub fn get_snapshot(&self, key: &CacheKey) -> Option<Snapshot> {
        self.cache.get_snapshot(key)
    }

    pub fn coordinator(&self) -> &SubscriptionCoordinator {
        &self.coordinator
    }

    pub fn cache(&self) -> &TableSnapshotCache {
        &self.cache
    }

    pub fn invalidation(&self) -> &InvalidationBus {
        &self.invalidation
    }

    pub fn executor(&self) -> &QueryExecutor {
        self.cache.executor()
    }

    pub fn changefeed(&self) -> &ChangeFeedClient {
        self.cache.feed()
    }
}

/// Builder for configuring [`EstateLinkClient`] instances.
pub struct EstateLinkClientBuilder {
    base_url: Option<String>,
    auth: AuthProvider,
    timeouts: LinkTimeouts,
    connection_options: ConnectionOptions,
    cache_options: CacheOptions,
    event_handlers: EventHandlers,
    query_backend: Option<Arc<dyn RemoteQuery>>,
    transport: Option<Arc<dyn ChangeFeedTransport>>,
}

impl EstateLinkClientBuilder {
    fn new() -> Self {
        Self {
            base_url: None,
            auth: AuthProvider::none(),
            timeouts: LinkTimeouts::default(),
            connection_options: ConnectionOptions::default(),
            cache_options: CacheOptions::default(),
            event_handlers: EventHandlers::default(),
            query_backend: None,
            transport: None,
        }
    }

    /// Set the base URL of the data service
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set authentication provider directly
    pub fn auth(mut self, auth: AuthProvider) -> Self {
        self.auth = auth;
        self
    }

    /// Set JWT token authentication
    pub fn jwt_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthProvider::jwt_token(token.into());
        self
    }

    /// Set timeout configuration for HTTP and WebSocket operations
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use estate_link::{EstateLinkClient, LinkTimeouts};
    ///
    /// # fn example() -> estate_link::Result<()> {
    /// let client = EstateLinkClient::builder()
    ///     .base_url("http://localhost:54321")
    ///     .timeouts(LinkTimeouts::fast())
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set reconnection behavior of the changefeed
    pub fn connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection_options = options;
        self
    }

    pub fn cache_options(mut self, options: CacheOptions) -> Self {
        self.cache_options = options;
        self
    }

    /// Set connection lifecycle callbacks
    pub fn event_handlers(mut self, handlers: EventHandlers) -> Self {
        self.event_handlers = handlers;
        self
    }

    /// Apply every section of a loaded [`LinkConfig`].
    pub fn config(mut self, config: &LinkConfig) -> Self {
        self.base_url = Some(config.server.url.clone());
        self.auth = config.auth_provider();
        self.timeouts = config.to_timeouts();
        self.connection_options = config.to_connection_options();
        self.cache_options = config.to_cache_options();
        self
    }

    /// Replace the REST backend, e.g. with an in-process store.
    pub fn query_backend(mut self, backend: Arc<dyn RemoteQuery>) -> Self {
        self.query_backend = Some(backend);
        self
    }

    /// Replace the WebSocket changefeed transport.
    pub fn transport(mut self, transport: Arc<dyn ChangeFeedTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<EstateLinkClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| LinkError::ConfigurationError("base_url is required".into()))?;
        if self.cache_options.max_rows == 0 {
            return Err(LinkError::ConfigurationError(
                "cache max_rows must be greater than zero".into(),
            ));
        }

        let backend: Arc<dyn RemoteQuery> = match self.query_backend {
            Some(backend) => backend,
            None => Arc::new(RestQueryBackend::new(
                base_url.clone(),
                self.auth.clone(),
                &self.timeouts,
            )?),
        };
        let transport: Arc<dyn ChangeFeedTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(WebSocketTransport::new(
                &base_url,
                self.auth.clone(),
                self.timeouts.clone(),
                self.event_handlers.clone(),
            )?),
        };
        log::debug!("[LINK_CLIENT] Building client for {}", base_url);

        let executor = QueryExecutor::new(backend, self.cache_options.max_rows);
        let feed = ChangeFeedClient::new(transport, self.connection_options, self.event_handlers);
        let cache = TableSnapshotCache::new(executor, feed, self.cache_options);

        Ok(EstateLinkClient {
            base_url,
            auth: self.auth,
            timeouts: self.timeouts,
            coordinator: SubscriptionCoordinator::new(cache.clone()),
            invalidation: InvalidationBus::new(cache.clone()),
            cache,
        })
    }
}
