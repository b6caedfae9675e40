use serde::{Deserialize, Serialize};

/// Client-to-server frames on the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving changes for a table. Sent once right after the
    /// WebSocket handshake.
    Subscribe { table: String },

    /// Stop receiving changes for a table before closing the socket.
    Unsubscribe { table: String },

    /// Application-level keepalive.
    Ping,
}
