use crate::models::DeliveryStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound WebSocket events from client to server
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    /// Ephemeral; relayed to the recipient's live connections and never stored.
    #[serde(rename = "typing")]
    Typing { recipient_id: Uuid },

    /// Recipient acknowledges delivery or reading of an envelope.
    #[serde(rename = "receipt")]
    Receipt {
        message_id: Uuid,
        status: DeliveryStatus,
    },
}

/// Server-originated replies that are not delivery events.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutboundNotice {
    Error { message: String },
}
