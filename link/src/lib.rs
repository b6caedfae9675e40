//! # estate-link
//!
//! Client-side realtime table cache for the estate platform.
//!
//! Many UI consumers read the same remote tables. This crate keeps them
//! consistent with the store's insert/update/delete notifications while
//! sharing one prime query per (table, filter) and one changefeed connection
//! per table.
//!
//! ```text
//! QueryExecutor ──┐
//!                 ├──► TableSnapshotCache ──► SubscriptionCoordinator ──► TableHook
//! ChangeFeedClient┘          ▲
//!                  InvalidationBus (write paths)
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use estate_link::{EstateLinkClient, Filter, LinkConfig, QueryOptions};
//!
//! # async fn example() -> estate_link::Result<()> {
//! let config = LinkConfig::load(&estate_link::config::default_config_path())?;
//! let client = EstateLinkClient::builder().config(&config).build()?;
//!
//! let available = client.use_table(
//!     "parcels",
//!     client
//!         .query_options()
//!         .with_filter(Filter::eq("status", "available"))
//!         .with_order_by("created_at", false),
//! )?;
//!
//! // After a successful write elsewhere:
//! client.invalidation().invalidate("parcels", None)?;
//! println!("{} parcel(s), loading={}", available.data().len(), available.loading());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod changefeed;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event_handlers;
pub mod invalidation;
pub mod models;
pub mod query;
pub mod timeouts;

// Re-export commonly used types
pub use auth::AuthProvider;
pub use cache::{KeySubscription, SnapshotCallback, TableSnapshotCache};
pub use changefeed::{
    ChangeFeedClient, ChangeFeedSubscription, ChangeFeedTransport, ChangeListener, ChangeStream,
    WebSocketTransport,
};
pub use client::{EstateLinkClient, EstateLinkClientBuilder};
pub use config::LinkConfig;
pub use coordinator::{HookObserver, SubscriptionCoordinator, TableHook, TableResult};
pub use error::{ErrorKind, LinkError, Result};
pub use event_handlers::{ConnectionError, DisconnectReason, EventHandlers};
pub use invalidation::InvalidationBus;
pub use models::{
    CacheKey, CacheOptions, ChangeEvent, ChangeKind, ChangeOperation, ConnectionOptions, Filter,
    FilterOp, QueryOptions, Record, Snapshot, SnapshotStatus, TableQuery, DEFAULT_PRIMARY_KEY,
};
pub use query::{QueryExecutor, QueryRequest, RemoteQuery, RestQueryBackend};
pub use timeouts::{LinkTimeouts, LinkTimeoutsBuilder};
