//! Message ledger
//!
//! Durable store of encrypted envelopes, one inbox per recipient. Sync walks
//! the inbox with a cursor; every envelope stored for a recipient is returned
//! by some sync exactly once, in creation order, regardless of whether the
//! live push reached any device.

use crate::delivery::DeliveryBridge;
use crate::error::{AppError, AppResult};
use crate::models::{
    DeliveryEvent, DeliveryFrame, DeliveryStatus, Envelope, MessageKind, NewEnvelope, OpaqueBytes,
};
use crate::repository::{EnvelopeRepository, StoreError};
use crate::services::conversation_service::ConversationResolver;
use crate::services::identity_client::IdentityDirectory;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub recipient_id: Uuid,
    pub ciphertext: OpaqueBytes,
    pub iv: OpaqueBytes,
    pub ratchet_version: i32,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncPage {
    pub messages: Vec<Envelope>,
    /// Cursor for the next call; unchanged input cursor when the page is empty.
    pub next_since: Option<Uuid>,
    pub has_more: bool,
}

pub struct MessageLedger {
    envelopes: Arc<dyn EnvelopeRepository>,
    resolver: Arc<ConversationResolver>,
    identity: Arc<dyn IdentityDirectory>,
    bridge: DeliveryBridge,
    page_size: i64,
}

impl MessageLedger {
    pub fn new(
        envelopes: Arc<dyn EnvelopeRepository>,
        resolver: Arc<ConversationResolver>,
        identity: Arc<dyn IdentityDirectory>,
        bridge: DeliveryBridge,
        page_size: i64,
    ) -> Self {
        Self {
            envelopes,
            resolver,
            identity,
            bridge,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    /// Stores the envelope, then pushes it to the recipient's live connections.
    ///
    /// The push is best effort; once this returns Ok the envelope is durable
    /// and will show up in the recipient's sync.
    #[instrument(
        skip(self, msg),
        fields(recipient_id = %msg.recipient_id, kind = msg.kind.as_str(), bytes = msg.ciphertext.len())
    )]
    pub async fn send_message(&self, sender_id: Uuid, msg: SendMessage) -> AppResult<Envelope> {
        let new = NewEnvelope {
            sender_id,
            recipient_id: msg.recipient_id,
            ciphertext: msg.ciphertext,
            iv: msg.iv,
            ratchet_version: msg.ratchet_version,
            kind: msg.kind,
        };
        new.validate()?;
        if sender_id == new.recipient_id {
            return Err(AppError::InvalidInput(
                "cannot send a direct message to yourself".into(),
            ));
        }

        let (sender, recipient) = tokio::try_join!(
            self.identity.lookup_user(sender_id),
            self.identity.lookup_user(new.recipient_id)
        )?;
        if !sender.exists {
            return Err(AppError::NotFound("sender".into()));
        }
        if !recipient.exists {
            return Err(AppError::NotFound("recipient".into()));
        }

        let conversation = self
            .resolver
            .resolve_direct(sender_id, new.recipient_id)
            .await?;

        // Not retried: a blind retry could store the envelope twice.
        let envelope = self.envelopes.insert(conversation.id, &new).await?;

        if let Err(e) = self.resolver.touch(conversation.id).await {
            warn!(conversation_id = %conversation.id, error = %e, "failed to bump last activity");
        }

        info!(
            message_id = %envelope.id,
            conversation_id = %conversation.id,
            sequence = envelope.sequence,
            "envelope stored"
        );

        self.bridge
            .publish(DeliveryEvent::new_message(envelope.clone()))
            .await;

        Ok(envelope)
    }

    /// Envelopes addressed to `user_id` stored after `since`, oldest first.
    #[instrument(skip(self))]
    pub async fn sync(&self, user_id: Uuid, since: Option<Uuid>) -> AppResult<SyncPage> {
        // One row past the page tells whether another page exists.
        let mut messages = self
            .envelopes
            .list_for_recipient(user_id, since, self.page_size + 1)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => AppError::InvalidInput("unknown sync cursor".into()),
                other => other.into(),
            })?;

        let page_len = usize::try_from(self.page_size).unwrap_or(usize::MAX);
        let has_more = messages.len() > page_len;
        messages.truncate(page_len);
        let next_since = messages.last().map(|e| e.id).or(since);
        Ok(SyncPage {
            messages,
            next_since,
            has_more,
        })
    }

    /// Moves a received envelope forward to `status`. Repeats and regressions
    /// return the current envelope without change.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        recipient_id: Uuid,
        message_id: Uuid,
        status: DeliveryStatus,
    ) -> AppResult<Envelope> {
        let (envelope, changed) = self
            .envelopes
            .advance_status(message_id, recipient_id, status)
            .await?
            .ok_or_else(|| AppError::NotFound("message".into()))?;

        if changed {
            self.bridge
                .publish(DeliveryEvent::new(
                    envelope.sender_id,
                    DeliveryFrame::StatusChanged {
                        message_id,
                        status: envelope.status,
                    },
                ))
                .await;
        }
        Ok(envelope)
    }

    /// Relays a typing indicator. Nothing is stored.
    pub async fn relay_typing(&self, from: Uuid, recipient_id: Uuid) -> AppResult<()> {
        if from == recipient_id {
            return Err(AppError::InvalidInput("typing to yourself".into()));
        }
        self.bridge
            .publish(DeliveryEvent::typing(recipient_id, from))
            .await;
        Ok(())
    }
}
