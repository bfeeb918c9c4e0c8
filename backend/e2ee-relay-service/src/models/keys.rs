use crate::error::AppError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub const DEFAULT_DEVICE_ID: u32 = 1;
pub const MAX_PUBLIC_KEY_BYTES: usize = 64;
pub const MAX_SIGNATURE_BYTES: usize = 128;
pub const MAX_ONE_TIME_KEYS_PER_UPLOAD: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKey {
    pub key_id: u32,
    pub public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeKey {
    pub key_id: u32,
    pub public_key: String,
}

/// What a device publishes about itself.
#[derive(Debug, Clone)]
pub struct KeyUpload {
    pub registration_id: u32,
    pub identity_key: String,
    pub signed_pre_key: SignedPreKey,
    pub one_time_keys: Vec<OneTimeKey>,
    /// Replace the stored bundle even if the identity key changed.
    pub reset: bool,
}

/// The bundle handed to someone opening a session with a device.
///
/// `one_time_key` is absent when the pool is empty; the initiator then
/// falls back to the signed pre-key alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBundle {
    pub user_id: Uuid,
    pub device_id: u32,
    pub registration_id: u32,
    pub identity_key: String,
    pub signed_pre_key: SignedPreKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_time_key: Option<OneTimeKey>,
}

/// Result of a successful fetch: the bundle plus how many one-time keys are left.
#[derive(Debug, Clone)]
pub struct FetchedBundle {
    pub bundle: KeyBundle,
    pub remaining: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Created,
    Appended,
    Replaced,
    /// The stored identity key differs and `reset` was not requested.
    IdentityMismatch,
}

/// What an upload did to the stored bundle.
///
/// `accepted` counts one-time keys that entered the pool. A key id the device
/// already published, whether still pooled or handed out, is skipped, so a
/// replayed upload never puts a key back into circulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReceipt {
    pub outcome: UploadOutcome,
    pub accepted: usize,
}

impl UploadReceipt {
    pub fn new(outcome: UploadOutcome, accepted: usize) -> Self {
        Self { outcome, accepted }
    }

    pub fn identity_mismatch() -> Self {
        Self::new(UploadOutcome::IdentityMismatch, 0)
    }
}

fn check_key_material(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|_| AppError::InvalidInput(format!("{field} must be base64")))?;
    if decoded.is_empty() || decoded.len() > max {
        return Err(AppError::InvalidInput(format!(
            "{field} must decode to 1..={max} bytes"
        )));
    }
    Ok(())
}

impl KeyUpload {
    pub fn validate(&self) -> Result<(), AppError> {
        check_key_material("identity_key", &self.identity_key, MAX_PUBLIC_KEY_BYTES)?;
        check_key_material(
            "signed_pre_key.public_key",
            &self.signed_pre_key.public_key,
            MAX_PUBLIC_KEY_BYTES,
        )?;
        check_key_material(
            "signed_pre_key.signature",
            &self.signed_pre_key.signature,
            MAX_SIGNATURE_BYTES,
        )?;

        if self.one_time_keys.len() > MAX_ONE_TIME_KEYS_PER_UPLOAD {
            return Err(AppError::InvalidInput(format!(
                "at most {MAX_ONE_TIME_KEYS_PER_UPLOAD} one-time keys per upload"
            )));
        }

        let mut seen = HashSet::with_capacity(self.one_time_keys.len());
        for key in &self.one_time_keys {
            if !seen.insert(key.key_id) {
                return Err(AppError::InvalidInput(format!(
                    "duplicate one-time key id {}",
                    key.key_id
                )));
            }
            check_key_material("one_time_keys.public_key", &key.public_key, MAX_PUBLIC_KEY_BYTES)?;
        }
        Ok(())
    }
}
