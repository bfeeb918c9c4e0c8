//! Identity service client
//!
//! User accounts live in identity-service. The relay only asks whether an id
//! names a real user before it stores an envelope for it.

use crate::error::AppError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLookup {
    pub exists: bool,
    pub handle: Option<String>,
}

impl UserLookup {
    pub fn missing() -> Self {
        Self {
            exists: false,
            handle: None,
        }
    }
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn lookup_user(&self, user_id: Uuid) -> Result<UserLookup, AppError>;
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(default)]
    handle: Option<String>,
}

/// `GET {base}/internal/users/{id}`: 200 means the user exists, 404 means it does not.
#[derive(Clone)]
pub struct HttpIdentityClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpIdentityClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| AppError::StartServer(format!("identity client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdentityDirectory for HttpIdentityClient {
    async fn lookup_user(&self, user_id: Uuid) -> Result<UserLookup, AppError> {
        let url = format!("{}/internal/users/{}", self.base_url, user_id);
        let response = self.http.get(&url).send().await.map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "identity-service request failed");
            AppError::Unavailable("identity service unreachable".into())
        })?;

        match response.status() {
            StatusCode::OK => {
                let record: UserRecord = response.json().await.map_err(|e| {
                    tracing::error!(user_id = %user_id, error = %e, "identity-service returned malformed user");
                    AppError::Unavailable("identity service returned malformed user".into())
                })?;
                Ok(UserLookup {
                    exists: true,
                    handle: record.handle,
                })
            }
            StatusCode::NOT_FOUND => Ok(UserLookup::missing()),
            status => {
                tracing::warn!(user_id = %user_id, status = %status, "identity-service lookup failed");
                Err(AppError::Unavailable(format!(
                    "identity service answered {status}"
                )))
            }
        }
    }
}

/// Fixed set of users, for tests and local runs without identity-service.
#[derive(Default)]
pub struct InMemoryIdentityDirectory {
    users: RwLock<HashMap<Uuid, String>>,
}

impl InMemoryIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users<I>(users: I) -> Self
    where
        I: IntoIterator<Item = Uuid>,
    {
        let directory = Self::new();
        for id in users {
            directory.register(id, format!("user-{}", &id.simple().to_string()[..8]));
        }
        directory
    }

    pub fn register(&self, user_id: Uuid, handle: impl Into<String>) {
        if let Ok(mut users) = self.users.write() {
            users.insert(user_id, handle.into());
        }
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryIdentityDirectory {
    async fn lookup_user(&self, user_id: Uuid) -> Result<UserLookup, AppError> {
        let users = self
            .users
            .read()
            .map_err(|_| AppError::Internal)?;
        Ok(match users.get(&user_id) {
            Some(handle) => UserLookup {
                exists: true,
                handle: Some(handle.clone()),
            },
            None => UserLookup::missing(),
        })
    }
}
