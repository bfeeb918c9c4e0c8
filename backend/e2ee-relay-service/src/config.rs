use crate::error::AppError;
use dotenvy::dotenv;
use std::env;

const MIN_JWT_SECRET_LEN: usize = 32;
const MAX_SYNC_PAGE_SIZE: i64 = 500;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub identity_service_url: String,
    /// Pub/sub channel every gateway instance listens on.
    pub delivery_channel: String,
    pub otk_low_water_mark: i64,
    pub sync_page_size: i64,
    pub store_retry_attempts: u32,
    pub db_max_connections: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &self.redis_url)
            .field("port", &self.port)
            .field("identity_service_url", &self.identity_service_url)
            .field("delivery_channel", &self.delivery_channel)
            .field("otk_low_water_mark", &self.otk_low_water_mark)
            .field("sync_page_size", &self.sync_page_size)
            .field("store_retry_attempts", &self.store_retry_attempts)
            .field("db_max_connections", &self.db_max_connections)
            .finish_non_exhaustive()
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;
        Self::check_jwt_secret(&jwt_secret)?;

        let identity_service_url = env::var("IDENTITY_SERVICE_URL")
            .unwrap_or_else(|_| "http://identity-service:8080".to_string());
        let delivery_channel =
            env::var("DELIVERY_CHANNEL").unwrap_or_else(|_| "chat_delivery".to_string());

        Ok(Self {
            database_url,
            redis_url,
            port: parse_or("PORT", 3000),
            jwt_secret,
            identity_service_url,
            delivery_channel,
            otk_low_water_mark: parse_or("OTK_LOW_WATER_MARK", 10),
            sync_page_size: Self::clamp_page_size(parse_or("SYNC_PAGE_SIZE", 100)),
            store_retry_attempts: parse_or("STORE_RETRY_ATTEMPTS", 3u32).max(1),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 16usize).max(1),
        })
    }

    fn check_jwt_secret(secret: &str) -> Result<(), AppError> {
        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(AppError::Config(format!(
                "JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters"
            )));
        }
        Ok(())
    }

    fn clamp_page_size(size: i64) -> i64 {
        size.clamp(1, MAX_SYNC_PAGE_SIZE)
    }

    /// Settings for in-process wiring where no database or broker is reachable.
    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/e2ee_relay_test".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            port: 0,
            jwt_secret: "test-secret-that-is-at-least-32-chars!!".to_string(),
            identity_service_url: "http://localhost:8080".to_string(),
            delivery_channel: "chat_delivery".to_string(),
            otk_low_water_mark: 10,
            sync_page_size: 100,
            store_retry_attempts: 3,
            db_max_connections: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_jwt_secret_is_rejected() {
        let err = Config::check_jwt_secret("too-short").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(Config::check_jwt_secret(&"x".repeat(32)).is_ok());
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(Config::clamp_page_size(0), 1);
        assert_eq!(Config::clamp_page_size(100), 100);
        assert_eq!(Config::clamp_page_size(10_000), MAX_SYNC_PAGE_SIZE);
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", Config::test_defaults());
        assert!(!rendered.contains("test-secret"));
        assert!(!rendered.contains("postgres://"));
        assert!(rendered.contains("chat_delivery"));
    }
}
