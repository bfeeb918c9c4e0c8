//! Key bundle store
//!
//! Devices publish an identity key, a signed pre-key and a pool of one-time
//! keys. Whoever opens a session with a device takes one one-time key out of
//! the pool; a key is never handed to two fetchers.

use crate::delivery::DeliveryBridge;
use crate::error::{AppError, AppResult};
use crate::models::{DeliveryEvent, DeliveryFrame, KeyBundle, KeyUpload, UploadOutcome};
use crate::repository::KeyBundleRepository;
use crate::services::retry::StoreRetry;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct KeyBundleService {
    repo: Arc<dyn KeyBundleRepository>,
    bridge: DeliveryBridge,
    retry: StoreRetry,
    low_water_mark: i64,
}

impl KeyBundleService {
    pub fn new(
        repo: Arc<dyn KeyBundleRepository>,
        bridge: DeliveryBridge,
        retry: StoreRetry,
        low_water_mark: i64,
    ) -> Self {
        Self {
            repo,
            bridge,
            retry,
            low_water_mark,
        }
    }

    /// Creates or replenishes the device bundle. Returns how many one-time keys
    /// entered the pool; ids published before are not counted.
    #[instrument(skip(self, upload), fields(otk_count = upload.one_time_keys.len(), reset = upload.reset))]
    pub async fn upload_keys(
        &self,
        user_id: Uuid,
        device_id: u32,
        upload: KeyUpload,
    ) -> AppResult<usize> {
        upload.validate()?;

        let receipt = self
            .retry
            .run("upload_keys", || {
                self.repo.upsert_bundle(user_id, device_id, &upload)
            })
            .await?;

        match receipt.outcome {
            UploadOutcome::IdentityMismatch => {
                warn!(user_id = %user_id, device_id, "identity key change refused without reset");
                Err(AppError::Conflict(
                    "identity key differs from the registered one; re-register with reset".into(),
                ))
            }
            outcome => {
                let skipped = upload.one_time_keys.len().saturating_sub(receipt.accepted);
                if skipped > 0 {
                    warn!(user_id = %user_id, device_id, skipped, "already published one-time keys ignored");
                }
                info!(user_id = %user_id, device_id, ?outcome, accepted = receipt.accepted, "key bundle uploaded");
                Ok(receipt.accepted)
            }
        }
    }

    /// Returns the bundle for `(target, device_id)` and consumes one one-time key.
    ///
    /// A bundle without a one-time key is still a valid answer: the pool ran dry.
    #[instrument(skip(self))]
    pub async fn fetch_bundle(&self, target: Uuid, device_id: u32) -> AppResult<KeyBundle> {
        let fetched = self
            .retry
            .run("fetch_bundle", || self.repo.pop_bundle(target, device_id))
            .await?
            .ok_or_else(|| AppError::NotFound("key bundle".into()))?;

        if fetched.bundle.one_time_key.is_none() {
            warn!(user_id = %target, device_id, "one-time key pool empty, serving degraded bundle");
        }

        if fetched.remaining < self.low_water_mark {
            warn!(
                user_id = %target,
                device_id,
                remaining = fetched.remaining,
                "one-time keys below low-water mark"
            );
            self.bridge
                .publish(DeliveryEvent::new(
                    target,
                    DeliveryFrame::KeysLow {
                        device_id,
                        remaining: fetched.remaining,
                    },
                ))
                .await;
        }

        Ok(fetched.bundle)
    }

    /// One-time keys left in the caller's own pool.
    pub async fn one_time_key_count(&self, user_id: Uuid, device_id: u32) -> AppResult<i64> {
        self.repo
            .count_one_time_keys(user_id, device_id)
            .await?
            .ok_or_else(|| AppError::NotFound("key bundle".into()))
    }
}
