use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use worklink_gateway::router::SendError;
use worklink_types::api::{Claims, SendMessageRequest};

use crate::auth::AppState;

/// POST /messages/send/{receiver_id} — persist the message and, if the
/// receiver has a live gateway connection, push it to them. The 201 body is
/// the durable record either way.
pub async fn send_message(
    State(state): State<AppState>,
    Path(receiver_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    match state
        .router
        .send(claims.sub, receiver_id, req.text, req.image)
        .await
    {
        Ok(message) => Ok((StatusCode::CREATED, Json(message))),
        Err(SendError::EmptyMessage) => Err(StatusCode::BAD_REQUEST),
        Err(SendError::UnknownReceiver(_)) => Err(StatusCode::NOT_FOUND),
        Err(SendError::Store(e)) => {
            error!("send_message store failure: {:#}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
