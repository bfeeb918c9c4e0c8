//! In-process stores. Each repository guards its whole state with one async
//! mutex, so every trait method is a single critical section.

use super::{
    ConversationRepository, EnvelopeRepository, KeyBundleRepository, StoreError, StoreResult,
};
use crate::models::{
    Conversation, ConversationKind, DeliveryStatus, DirectPair, Envelope, FetchedBundle,
    KeyBundle, KeyUpload, NewEnvelope, OneTimeKey, SignedPreKey, UploadOutcome, UploadReceipt,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

struct StoredBundle {
    registration_id: u32,
    identity_key: String,
    signed_pre_key: SignedPreKey,
    one_time_keys: VecDeque<OneTimeKey>,
    // Every key id ever pooled for this identity, handed out or not.
    published: HashSet<u32>,
}

impl StoredBundle {
    fn from_upload(upload: &KeyUpload) -> (Self, usize) {
        let mut bundle = Self {
            registration_id: upload.registration_id,
            identity_key: upload.identity_key.clone(),
            signed_pre_key: upload.signed_pre_key.clone(),
            one_time_keys: VecDeque::new(),
            published: HashSet::new(),
        };
        let accepted = bundle.append(&upload.one_time_keys);
        (bundle, accepted)
    }

    fn append(&mut self, keys: &[OneTimeKey]) -> usize {
        let mut accepted = 0;
        for key in keys {
            if self.published.insert(key.key_id) {
                self.one_time_keys.push_back(key.clone());
                accepted += 1;
            }
        }
        accepted
    }
}

#[derive(Default)]
pub struct MemoryKeyBundleRepository {
    bundles: Mutex<HashMap<(Uuid, u32), StoredBundle>>,
}

impl MemoryKeyBundleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyBundleRepository for MemoryKeyBundleRepository {
    async fn upsert_bundle(
        &self,
        user_id: Uuid,
        device_id: u32,
        upload: &KeyUpload,
    ) -> StoreResult<UploadReceipt> {
        let mut bundles = self.bundles.lock().await;
        let Some(stored) = bundles.get_mut(&(user_id, device_id)) else {
            let (bundle, accepted) = StoredBundle::from_upload(upload);
            bundles.insert((user_id, device_id), bundle);
            return Ok(UploadReceipt::new(UploadOutcome::Created, accepted));
        };

        if stored.identity_key != upload.identity_key {
            if !upload.reset {
                return Ok(UploadReceipt::identity_mismatch());
            }
            let (bundle, accepted) = StoredBundle::from_upload(upload);
            *stored = bundle;
            return Ok(UploadReceipt::new(UploadOutcome::Replaced, accepted));
        }

        stored.signed_pre_key = upload.signed_pre_key.clone();
        let accepted = stored.append(&upload.one_time_keys);
        Ok(UploadReceipt::new(UploadOutcome::Appended, accepted))
    }

    async fn pop_bundle(
        &self,
        user_id: Uuid,
        device_id: u32,
    ) -> StoreResult<Option<FetchedBundle>> {
        let mut bundles = self.bundles.lock().await;
        let Some(stored) = bundles.get_mut(&(user_id, device_id)) else {
            return Ok(None);
        };

        let one_time_key = stored.one_time_keys.pop_front();
        Ok(Some(FetchedBundle {
            bundle: KeyBundle {
                user_id,
                device_id,
                registration_id: stored.registration_id,
                identity_key: stored.identity_key.clone(),
                signed_pre_key: stored.signed_pre_key.clone(),
                one_time_key,
            },
            remaining: stored.one_time_keys.len() as i64,
        }))
    }

    async fn count_one_time_keys(&self, user_id: Uuid, device_id: u32) -> StoreResult<Option<i64>> {
        let bundles = self.bundles.lock().await;
        Ok(bundles
            .get(&(user_id, device_id))
            .map(|b| b.one_time_keys.len() as i64))
    }
}

#[derive(Default)]
struct ConversationState {
    direct: HashMap<DirectPair, Conversation>,
    pairs_by_id: HashMap<Uuid, DirectPair>,
}

#[derive(Default)]
pub struct MemoryConversationRepository {
    state: Mutex<ConversationState>,
}

impl MemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn direct_count(&self) -> usize {
        self.state.lock().await.direct.len()
    }
}

#[async_trait]
impl ConversationRepository for MemoryConversationRepository {
    async fn find_direct(&self, pair: &DirectPair) -> StoreResult<Option<Conversation>> {
        Ok(self.state.lock().await.direct.get(pair).cloned())
    }

    async fn insert_direct(&self, pair: &DirectPair) -> StoreResult<Conversation> {
        let mut state = self.state.lock().await;
        if state.direct.contains_key(pair) {
            return Err(StoreError::Conflict(
                "direct conversation already exists".into(),
            ));
        }
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            kind: ConversationKind::Direct,
            participants: pair.participants(),
            last_activity_at: now,
            created_at: now,
        };
        state.pairs_by_id.insert(conversation.id, *pair);
        state.direct.insert(*pair, conversation.clone());
        Ok(conversation)
    }

    async fn touch(&self, conversation_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let pair = state
            .pairs_by_id
            .get(&conversation_id)
            .copied()
            .ok_or_else(|| StoreError::NotFound("conversation".into()))?;
        if let Some(conversation) = state.direct.get_mut(&pair) {
            conversation.last_activity_at = conversation.last_activity_at.max(at);
        }
        Ok(())
    }
}

#[derive(Default)]
struct EnvelopeState {
    // Insertion order; per recipient this is also sequence order.
    envelopes: Vec<Envelope>,
    last_sequence: HashMap<Uuid, i64>,
}

#[derive(Default)]
pub struct MemoryEnvelopeRepository {
    state: Mutex<EnvelopeState>,
}

impl MemoryEnvelopeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnvelopeRepository for MemoryEnvelopeRepository {
    async fn insert(&self, conversation_id: Uuid, new: &NewEnvelope) -> StoreResult<Envelope> {
        let mut state = self.state.lock().await;
        let sequence = {
            let last = state.last_sequence.entry(new.recipient_id).or_insert(0);
            *last += 1;
            *last
        };
        let envelope = Envelope {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: new.sender_id,
            recipient_id: new.recipient_id,
            ciphertext: new.ciphertext.clone(),
            iv: new.iv.clone(),
            ratchet_version: new.ratchet_version,
            kind: new.kind,
            status: DeliveryStatus::Sent,
            created_at: Utc::now(),
            sequence,
        };
        state.envelopes.push(envelope.clone());
        Ok(envelope)
    }

    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    ) -> StoreResult<Vec<Envelope>> {
        let state = self.state.lock().await;
        let cursor = match after {
            None => 0,
            Some(id) => state
                .envelopes
                .iter()
                .find(|e| e.id == id && e.recipient_id == recipient_id)
                .map(|e| e.sequence)
                .ok_or_else(|| StoreError::NotFound("sync cursor".into()))?,
        };

        Ok(state
            .envelopes
            .iter()
            .filter(|e| e.recipient_id == recipient_id && e.sequence > cursor)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn advance_status(
        &self,
        message_id: Uuid,
        recipient_id: Uuid,
        status: DeliveryStatus,
    ) -> StoreResult<Option<(Envelope, bool)>> {
        let mut state = self.state.lock().await;
        let Some(envelope) = state
            .envelopes
            .iter_mut()
            .find(|e| e.id == message_id && e.recipient_id == recipient_id)
        else {
            return Ok(None);
        };

        let changed = status > envelope.status;
        if changed {
            envelope.status = status;
        }
        Ok(Some((envelope.clone(), changed)))
    }
}
