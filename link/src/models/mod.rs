//! Data models for the estate-link client library.
//!
//! Rows, filters and query shapes shared by the query executor and the
//! cache, plus the realtime channel's wire messages.

pub mod cache_options;
pub mod change_event;
pub mod client_message;
pub mod connection_options;
pub mod filter;
pub mod query_options;
pub mod record;
pub mod server_message;
pub mod snapshot;


pub use cache_options::CacheOptions;
pub use change_event::{ChangeEvent, ChangeKind, ChangeOperation};
pub use client_message::ClientMessage;
pub use connection_options::ConnectionOptions;
pub use filter::{Filter, FilterOp};
pub use query_options::{CacheKey, QueryOptions, TableQuery, DEFAULT_PRIMARY_KEY};
pub use record::Record;
pub use server_message::ServerMessage;
pub use snapshot::{Snapshot, SnapshotStatus};
