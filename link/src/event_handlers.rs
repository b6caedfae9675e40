//! Connection lifecycle event handlers for the realtime changefeed.
//!
//! Each table's feed runs its own connection, so every callback receives the
//! table name:
//!
//! - [`on_connect`](EventHandlers::on_connect): a table's feed connection is established
//! - [`on_disconnect`](EventHandlers::on_disconnect): a table's feed connection closed
//! - [`on_error`](EventHandlers::on_error): connection or protocol error
//! - [`on_receive`](EventHandlers::on_receive): optional debug hook for all incoming frames
//!
//! Transport problems surface only here and in logs. Table consumers keep
//! their cached rows and never see a transport error.
//!
//! # Example
//!
//! ```rust,no_run
//! use estate_link::{EstateLinkClient, EventHandlers};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handlers = EventHandlers::new()
//!     .on_connect(|table| println!("live: {}", table))
//!     .on_disconnect(|table, reason| println!("{} dropped: {}", table, reason))
//!     .on_error(|error| eprintln!("feed error: {}", error));
//!
//! let client = EstateLinkClient::builder()
//!     .base_url("http://localhost:3000")
//!     .event_handlers(handlers)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

/// Reason for a disconnect event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectReason {
    pub message: String,
    /// WebSocket close code, if available (e.g. 1000 = normal, 1006 = abnormal).
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "{} (code: {})", self.message, code)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Error information passed to the `on_error` handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionError {
    pub table: String,
    pub message: String,
    /// Whether the client will keep trying. `false` means the table has
    /// dropped to non-realtime mode.
    pub recoverable: bool,
}

impl ConnectionError {
    pub fn new(table: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            table: table.into(),
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.table, self.message)
    }
}

pub type OnConnectCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub type OnDisconnectCallback = Arc<dyn Fn(&str, DisconnectReason) + Send + Sync>;

pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;

/// Debug hook receiving the table name and the raw inbound frame.
pub type OnReceiveCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Connection lifecycle event handlers.
///
/// All handlers are optional. Handlers are `Send + Sync` because they run on
/// the per-table feed tasks.
#[derive(Clone, Default)]
pub struct EventHandlers {
    pub(crate) on_connect: Option<OnConnectCallback>,
    pub(crate) on_disconnect: Option<OnDisconnectCallback>,
    pub(crate) on_error: Option<OnErrorCallback>,
    pub(crate) on_receive: Option<OnReceiveCallback>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_receive", &self.on_receive.is_some())
            .finish()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked when a table's feed connection is established.
    pub fn on_connect(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when a table's feed connection closes,
    /// whether intentionally (last listener left) or not.
    pub fn on_disconnect(
        mut self,
        f: impl Fn(&str, DisconnectReason) + Send + Sync + 'static,
    ) -> Self {
        self.on_disconnect = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked when a connection error occurs.
    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Register a callback invoked for every raw frame received from the server.
    ///
    /// Debug/tracing only; not needed for normal operation.
    pub fn on_receive(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(f));
        self
    }

    /// Returns `true` if any handler is registered.
    pub fn has_any(&self) -> bool {
        self.on_connect.is_some()
            || self.on_disconnect.is_some()
            || self.on_error.is_some()
            || self.on_receive.is_some()
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_connect(&self, table: &str) {
        if let Some(cb) = &self.on_connect {
            cb(table);
        }
    }

    pub(crate) fn emit_disconnect(&self, table: &str, reason: DisconnectReason) {
        if let Some(cb) = &self.on_disconnect {
            cb(table, reason);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(cb) = &self.on_error {
            cb(error);
        }
    }

    pub(crate) fn emit_receive(&self, table: &str, raw: &str) {
        if let Some(cb) = &self.on_receive {
            cb(table, raw);
        }
    }
}
