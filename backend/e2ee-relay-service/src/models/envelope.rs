//! Encrypted message envelopes.
//!
//! The relay never interprets `ciphertext` or `iv`. They are carried as raw
//! bytes internally and as standard base64 on the wire.

use crate::error::AppError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const MAX_CIPHERTEXT_BYTES: usize = 64 * 1024;
pub const MIN_IV_BYTES: usize = 12;
pub const MAX_IV_BYTES: usize = 32;

/// Bytes the server stores and returns verbatim.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct OpaqueBytes(Vec<u8>);

impl OpaqueBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for OpaqueBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

// Never print payload bytes.
impl fmt::Debug for OpaqueBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueBytes(<{} bytes>)", self.0.len())
    }
}

impl Serialize for OpaqueBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for OpaqueBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(OpaqueBytes)
            .map_err(|e| serde::de::Error::custom(format!("invalid base64: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Audio,
    CallOffer,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Audio => "audio",
            MessageKind::CallOffer => "call_offer",
        }
    }
}

impl FromStr for MessageKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "audio" => Ok(MessageKind::Audio),
            "call_offer" => Ok(MessageKind::CallOffer),
            other => Err(AppError::InvalidInput(format!(
                "unsupported message kind: {other}"
            ))),
        }
    }
}

/// Delivery progress. Declaration order is the only allowed direction of travel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn rank(&self) -> i16 {
        match self {
            DeliveryStatus::Sent => 0,
            DeliveryStatus::Delivered => 1,
            DeliveryStatus::Read => 2,
        }
    }

    pub fn from_rank(rank: i16) -> Option<Self> {
        match rank {
            0 => Some(DeliveryStatus::Sent),
            1 => Some(DeliveryStatus::Delivered),
            2 => Some(DeliveryStatus::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub ciphertext: OpaqueBytes,
    pub iv: OpaqueBytes,
    pub ratchet_version: i32,
    pub kind: MessageKind,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    /// Position in the recipient's inbox; strictly increasing per recipient.
    pub sequence: i64,
}

/// An envelope accepted from a sender, before it has been stored.
#[derive(Debug, Clone)]
pub struct NewEnvelope {
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub ciphertext: OpaqueBytes,
    pub iv: OpaqueBytes,
    pub ratchet_version: i32,
    pub kind: MessageKind,
}

impl NewEnvelope {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.ciphertext.is_empty() {
            return Err(AppError::InvalidInput("ciphertext must not be empty".into()));
        }
        if self.ciphertext.len() > MAX_CIPHERTEXT_BYTES {
            return Err(AppError::InvalidInput(format!(
                "ciphertext exceeds {MAX_CIPHERTEXT_BYTES} bytes"
            )));
        }
        if !(MIN_IV_BYTES..=MAX_IV_BYTES).contains(&self.iv.len()) {
            return Err(AppError::InvalidInput(format!(
                "iv must be between {MIN_IV_BYTES} and {MAX_IV_BYTES} bytes"
            )));
        }
        if self.ratchet_version < 1 {
            return Err(AppError::InvalidInput(
                "ratchet_version must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
