use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A direct message between two users. Immutable once created — there is no
/// edit or delete path; clients reconcile via history fetches.
///
/// Invariant: at least one of `text` / `image_url` is present and non-empty.
/// The Delivery Router enforces this before anything reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub text: Option<String>,
    /// Locator produced by the external upload service. Stored and returned
    /// verbatim; never decoded or fetched by this server.
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Minimal display attributes for the conversation sidebar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
}
