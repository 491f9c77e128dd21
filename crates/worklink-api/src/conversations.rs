use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};
use uuid::Uuid;

use worklink_db::models::MessageRow;
use worklink_types::api::Claims;
use worklink_types::models::{Message, UserProfile};

use crate::auth::AppState;

/// GET /messages/{other_user_id} — full ordered history between the caller
/// and one other user. Empty history is a 200 with an empty list.
pub async fn get_history(
    State(state): State<AppState>,
    Path(other_user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    let other = other_user_id.to_string();

    // Run blocking DB reads off the async runtime
    let rows = tokio::task::spawn_blocking(move || db.conversation_between(&me, &other))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let messages: Vec<Message> = rows.into_iter().map(message_from_row).collect();
    Ok(Json(messages))
}

/// GET /messages/users — minimal profiles for everyone the caller has
/// exchanged at least one message with, for the conversation sidebar.
pub async fn sidebar_partners(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub;

    let rows = tokio::task::spawn_blocking(move || {
        let pairs = db.participant_pairs(&me.to_string())?;
        let ids: Vec<String> = partner_ids(me, &pairs).iter().map(Uuid::to_string).collect();
        db.get_users_by_ids(&ids)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let profiles: Vec<UserProfile> = rows
        .into_iter()
        .map(|row| UserProfile {
            id: row.id.parse().unwrap_or_else(|e| {
                warn!("Corrupt user id '{}': {}", row.id, e);
                Uuid::default()
            }),
            username: row.username,
            avatar_url: row.avatar_url,
        })
        .collect();

    Ok(Json(profiles))
}

/// Distinct conversation partners derived from (sender_id, receiver_id)
/// pairs: the counterpart of each message, deduplicated, the user themselves
/// excluded (covers degenerate self-messages). First-seen order.
fn partner_ids(user_id: Uuid, pairs: &[(String, String)]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    let mut partners = Vec::new();

    for (sender, receiver) in pairs {
        for side in [sender, receiver] {
            let Ok(id) = side.parse::<Uuid>() else {
                warn!("Corrupt participant id '{}'", side);
                continue;
            };
            if id != user_id && seen.insert(id) {
                partners.push(id);
            }
        }
    }

    partners
}

fn message_from_row(row: MessageRow) -> Message {
    Message {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt message id '{}': {}", row.id, e);
            Uuid::default()
        }),
        sender_id: row.sender_id.parse().unwrap_or_else(|e| {
            warn!("Corrupt sender_id '{}' on message '{}': {}", row.sender_id, row.id, e);
            Uuid::default()
        }),
        receiver_id: row.receiver_id.parse().unwrap_or_else(|e| {
            warn!("Corrupt receiver_id '{}' on message '{}': {}", row.receiver_id, row.id, e);
            Uuid::default()
        }),
        text: row.text,
        image_url: row.image_url,
        created_at: row
            .created_at
            .parse::<chrono::DateTime<chrono::Utc>>()
            .unwrap_or_else(|e| {
                warn!("Corrupt created_at '{}' on message '{}': {}", row.created_at, row.id, e);
                chrono::DateTime::default()
            }),
    }
}
