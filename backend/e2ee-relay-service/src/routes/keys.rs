//! Key bundle endpoints.
//!
//! Bundles are published by their owner and fetched by anyone who wants to
//! open a session with that device. Key material is opaque base64 here; the
//! relay checks shape and size only.

use crate::error::AppError;
use crate::middleware::guards::User;
use crate::models::keys::DEFAULT_DEVICE_ID;
use crate::models::{KeyUpload, OneTimeKey, SignedPreKey};
use crate::state::AppState;
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

fn default_device_id() -> u32 {
    DEFAULT_DEVICE_ID
}

#[derive(Debug, Deserialize)]
pub struct UploadKeysRequest {
    #[serde(default = "default_device_id")]
    pub device_id: u32,
    pub registration_id: u32,
    pub identity_key: String,
    pub signed_pre_key: SignedPreKey,
    #[serde(default)]
    pub one_time_keys: Vec<OneTimeKey>,
    /// Replace the stored bundle after an identity key change.
    #[serde(default)]
    pub reset: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadKeysResponse {
    pub message: &'static str,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    #[serde(default = "default_device_id")]
    pub device_id: u32,
}

#[derive(Debug, Serialize)]
pub struct KeyCountResponse {
    pub device_id: u32,
    pub count: i64,
}

/// POST /api/v1/keys - Publish or replenish the caller's key bundle
#[post("/keys")]
#[instrument(skip(state, body), fields(user_id = %user.id, device_id = body.device_id))]
pub async fn upload_keys(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<UploadKeysRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let upload = KeyUpload {
        registration_id: body.registration_id,
        identity_key: body.identity_key,
        signed_pre_key: body.signed_pre_key,
        one_time_keys: body.one_time_keys,
        reset: body.reset,
    };

    let count = state.keys.upload_keys(user.id, body.device_id, upload).await?;

    Ok(HttpResponse::Ok().json(UploadKeysResponse {
        message: "Keys uploaded successfully",
        count,
    }))
}

/// GET /api/v1/keys/count - One-time keys left in the caller's pool
#[get("/keys/count")]
pub async fn key_count(
    state: web::Data<AppState>,
    user: User,
    query: web::Query<DeviceQuery>,
) -> Result<HttpResponse, AppError> {
    let count = state
        .keys
        .one_time_key_count(user.id, query.device_id)
        .await?;
    Ok(HttpResponse::Ok().json(KeyCountResponse {
        device_id: query.device_id,
        count,
    }))
}

/// GET /api/v1/keys/{user_id} - Fetch a bundle and consume one one-time key
#[get("/keys/{user_id}")]
#[instrument(skip(state, path, query), fields(caller = %user.id))]
pub async fn fetch_bundle(
    state: web::Data<AppState>,
    user: User,
    path: web::Path<Uuid>,
    query: web::Query<DeviceQuery>,
) -> Result<HttpResponse, AppError> {
    let target = path.into_inner();
    let bundle = state.keys.fetch_bundle(target, query.device_id).await?;
    Ok(HttpResponse::Ok().json(bundle))
}
