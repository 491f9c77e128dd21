use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// Snapshot of every currently-online user, broadcast to all connections
    /// whenever a user connects or disconnects
    OnlineUsers { user_ids: Vec<Uuid> },

    /// A message addressed to this connection's user was just persisted.
    /// Best-effort: a client that misses it catches up via history.
    NewMessage { message: Message },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },
}
