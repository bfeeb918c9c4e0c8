use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::{DeliveryStatus, MessageKind, OpaqueBytes};
use crate::services::SendMessage;
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

fn default_ratchet_version() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: Uuid,
    /// base64
    pub ciphertext: OpaqueBytes,
    /// base64
    pub iv: OpaqueBytes,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default = "default_ratchet_version")]
    pub ratchet_version: i32,
}

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    pub since: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DeliveryStatus,
}

/// POST /api/v1/messages - Store an encrypted envelope for a recipient
#[post("/messages")]
#[instrument(skip(state, body), fields(sender_id = %user.id))]
pub async fn send_message(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let envelope = state
        .ledger
        .send_message(
            user.id,
            SendMessage {
                recipient_id: body.recipient_id,
                ciphertext: body.ciphertext,
                iv: body.iv,
                ratchet_version: body.ratchet_version,
                kind: body.kind,
            },
        )
        .await?;
    Ok(HttpResponse::Created().json(envelope))
}

/// GET /api/v1/messages/sync?since=<message_id> - Catch up on the caller's inbox
#[get("/messages/sync")]
#[instrument(skip(state, query), fields(user_id = %user.id))]
pub async fn sync_messages(
    state: web::Data<AppState>,
    user: User,
    query: web::Query<SyncQuery>,
) -> Result<HttpResponse, AppError> {
    let page = state.ledger.sync(user.id, query.since).await?;
    Ok(HttpResponse::Ok().json(page))
}

/// POST /api/v1/messages/{id}/status - Recipient marks an envelope delivered or read
#[post("/messages/{id}/status")]
#[instrument(skip(state, path, body), fields(user_id = %user.id))]
pub async fn update_status(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    body: web::Json<UpdateStatusRequest>,
) -> Result<HttpResponse, AppError> {
    let envelope = state
        .ledger
        .update_status(user.id, path.into_inner(), body.status)
        .await?;
    Ok(HttpResponse::Ok().json(envelope))
}
