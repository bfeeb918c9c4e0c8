use actix_web::{web, App, HttpServer};
use e2ee_relay_service::{
    config, db,
    delivery::{DeliveryBridge, RedisDeliveryBus},
    error::AppError,
    logging, migrations,
    repository::Repositories,
    routes,
    services::HttpIdentityClient,
    state::AppState,
    websocket,
};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;
    tracing::info!(config = ?cfg, "configuration loaded");

    // Initialize DB pool
    let pool = db::init_pool(&cfg.database_url, cfg.db_max_connections).await?;
    migrations::run_all(&pool).await?;

    // Delivery fan-out across instances over Redis pub/sub
    let bus = RedisDeliveryBus::connect(&cfg.redis_url, cfg.delivery_channel.clone())
        .await
        .map_err(|e| AppError::StartServer(format!("redis: {e}")))?;
    let bridge = DeliveryBridge::new(Arc::new(bus));

    let identity = Arc::new(HttpIdentityClient::new(cfg.identity_service_url.clone())?);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    let state = AppState::new(cfg, Repositories::postgres(pool), identity, bridge);

    let _gateway = websocket::start_gateway(&state.bridge, state.registry.clone())
        .await
        .map_err(|e| AppError::StartServer(format!("delivery subscription: {e}")))?;

    tracing::info!(%bind_addr, "starting e2ee-relay-service");

    let data = web::Data::new(state);
    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(data.clone())
            .configure(routes::configure)
    })
    .bind(&bind_addr)
    .map_err(|e| AppError::StartServer(format!("bind REST: {e}")))?
    .run()
    .await
    .map_err(|e| AppError::StartServer(format!("REST server: {e}")))
}
