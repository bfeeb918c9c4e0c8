#![allow(dead_code)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use e2ee_relay_service::config::Config;
use e2ee_relay_service::delivery::DeliveryBridge;
use e2ee_relay_service::models::{KeyUpload, OneTimeKey, OpaqueBytes, SignedPreKey};
use e2ee_relay_service::repository::{
    MemoryConversationRepository, MemoryEnvelopeRepository, MemoryKeyBundleRepository,
    Repositories,
};
use e2ee_relay_service::services::{InMemoryIdentityDirectory, SendMessage};
use e2ee_relay_service::state::AppState;
use e2ee_relay_service::websocket::start_gateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

/// Service wired over in-memory stores and a local delivery bus.
pub struct Harness {
    pub state: AppState,
    pub identity: Arc<InMemoryIdentityDirectory>,
    pub conversations: Arc<MemoryConversationRepository>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(Config::test_defaults()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let identity = Arc::new(InMemoryIdentityDirectory::new());
        let conversations = Arc::new(MemoryConversationRepository::new());
        let repos = Repositories {
            keys: Arc::new(MemoryKeyBundleRepository::new()),
            conversations: conversations.clone(),
            envelopes: Arc::new(MemoryEnvelopeRepository::new()),
        };
        let state = AppState::new(config, repos, identity.clone(), DeliveryBridge::local());
        start_gateway(&state.bridge, state.registry.clone())
            .await
            .expect("gateway subscription");

        Self {
            state,
            identity,
            conversations,
        }
    }

    /// A user known to the identity directory.
    pub fn user(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.identity.register(id, format!("u-{}", &id.simple().to_string()[..6]));
        id
    }

    /// Opens a live channel for `user_id`, as a connected socket would.
    pub fn connect(&self, user_id: Uuid) -> UnboundedReceiver<String> {
        self.state.registry.join(user_id).1
    }

    pub fn token(&self, user_id: Uuid) -> String {
        self.state.jwt.issue(user_id, 3600).expect("token")
    }
}

pub fn b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn key_upload(identity_seed: u8, key_ids: impl IntoIterator<Item = u32>) -> KeyUpload {
    KeyUpload {
        registration_id: 1234,
        identity_key: b64(&[identity_seed; 33]),
        signed_pre_key: SignedPreKey {
            key_id: 1,
            public_key: b64(&[identity_seed.wrapping_add(1); 33]),
            signature: b64(&[identity_seed.wrapping_add(2); 64]),
        },
        one_time_keys: key_ids
            .into_iter()
            .map(|key_id| OneTimeKey {
                key_id,
                public_key: b64(&key_id.to_be_bytes()),
            })
            .collect(),
        reset: false,
    }
}

pub fn text_message(recipient_id: Uuid, body: &[u8]) -> SendMessage {
    SendMessage {
        recipient_id,
        ciphertext: OpaqueBytes::new(body.to_vec()),
        iv: OpaqueBytes::new(vec![7; 12]),
        ratchet_version: 1,
        kind: Default::default(),
    }
}

/// Next frame on a live channel, parsed as JSON.
pub async fn next_frame(rx: &mut UnboundedReceiver<String>) -> serde_json::Value {
    let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("frame within timeout")
        .expect("channel open");
    serde_json::from_str(&raw).expect("frame is JSON")
}

/// True when nothing arrives within a short grace period.
pub async fn stays_silent(rx: &mut UnboundedReceiver<String>) -> bool {
    tokio::time::timeout(Duration::from_millis(150), rx.recv())
        .await
        .is_err()
}
