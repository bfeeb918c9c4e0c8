//! Storage seams.
//!
//! Each store is a trait so services can run against Postgres in production
//! and against the in-memory implementations in tests and local runs. Every
//! method is a single atomic step: a caller never observes half of an upload,
//! a key popped twice, or two direct conversations for one pair.

use crate::models::{
    Conversation, DeliveryStatus, DirectPair, Envelope, FetchedBundle, KeyUpload, NewEnvelope,
    UploadReceipt,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryConversationRepository, MemoryEnvelopeRepository, MemoryKeyBundleRepository};
pub use postgres::{PgConversationRepository, PgEnvelopeRepository, PgKeyBundleRepository};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Uniqueness or serialization race; the operation may be retried.
    #[error("store conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The store could not be reached in time.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait KeyBundleRepository: Send + Sync {
    /// Create the device bundle or append to its one-time key pool.
    ///
    /// One-time key ids the bundle has published before are ignored, so
    /// replaying an upload is harmless.
    async fn upsert_bundle(
        &self,
        user_id: Uuid,
        device_id: u32,
        upload: &KeyUpload,
    ) -> StoreResult<UploadReceipt>;

    /// Return the bundle and remove the oldest one-time key in the same step.
    async fn pop_bundle(&self, user_id: Uuid, device_id: u32)
        -> StoreResult<Option<FetchedBundle>>;

    /// `None` when the device never uploaded a bundle.
    async fn count_one_time_keys(&self, user_id: Uuid, device_id: u32)
        -> StoreResult<Option<i64>>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_direct(&self, pair: &DirectPair) -> StoreResult<Option<Conversation>>;

    /// Fails with [`StoreError::Conflict`] when the pair already has a conversation.
    async fn insert_direct(&self, pair: &DirectPair) -> StoreResult<Conversation>;

    /// Moves `last_activity_at` forward; never backwards.
    async fn touch(&self, conversation_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
}

#[async_trait]
pub trait EnvelopeRepository: Send + Sync {
    /// Stores the envelope and assigns the next sequence number in the recipient's inbox.
    async fn insert(&self, conversation_id: Uuid, envelope: &NewEnvelope) -> StoreResult<Envelope>;

    /// Envelopes addressed to `recipient_id` after the `after` cursor, oldest first.
    ///
    /// Fails with [`StoreError::NotFound`] when `after` names no envelope of this recipient.
    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    ) -> StoreResult<Vec<Envelope>>;

    /// Raises the status if `status` is ahead of the stored one.
    ///
    /// Returns the current envelope and whether it changed; `None` when the
    /// message does not exist or is not addressed to `recipient_id`.
    async fn advance_status(
        &self,
        message_id: Uuid,
        recipient_id: Uuid,
        status: DeliveryStatus,
    ) -> StoreResult<Option<(Envelope, bool)>>;
}

/// The three stores, wired to one backend.
#[derive(Clone)]
pub struct Repositories {
    pub keys: Arc<dyn KeyBundleRepository>,
    pub conversations: Arc<dyn ConversationRepository>,
    pub envelopes: Arc<dyn EnvelopeRepository>,
}

impl Repositories {
    pub fn postgres(pool: deadpool_postgres::Pool) -> Self {
        Self {
            keys: Arc::new(PgKeyBundleRepository::new(pool.clone())),
            conversations: Arc::new(PgConversationRepository::new(pool.clone())),
            envelopes: Arc::new(PgEnvelopeRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            keys: Arc::new(MemoryKeyBundleRepository::new()),
            conversations: Arc::new(MemoryConversationRepository::new()),
            envelopes: Arc::new(MemoryEnvelopeRepository::new()),
        }
    }
}
