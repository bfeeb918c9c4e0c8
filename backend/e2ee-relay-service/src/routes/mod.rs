use crate::error::AppError;
use actix_web::{get, web, HttpResponse};

pub mod keys;
pub mod messages;
pub mod wsroute;

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Malformed JSON bodies get the same error shape as every other failure.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(256 * 1024)
        .error_handler(|err, _req| AppError::InvalidInput(err.to_string()).into())
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|err, _req| AppError::InvalidInput(err.to_string()).into())
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default()
        .error_handler(|err, _req| AppError::InvalidInput(err.to_string()).into())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .app_data(path_config())
        .service(health)
        .service(wsroute::ws_handler)
        .service(
            web::scope("/api/v1")
                // /keys/count must be registered before /keys/{user_id}
                .service(keys::upload_keys)
                .service(keys::key_count)
                .service(keys::fetch_bundle)
                .service(messages::send_message)
                .service(messages::sync_messages)
                .service(messages::update_status),
        );
}
