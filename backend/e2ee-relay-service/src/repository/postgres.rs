use super::{
    ConversationRepository, EnvelopeRepository, KeyBundleRepository, StoreError, StoreResult,
};
use crate::models::{
    Conversation, ConversationKind, DeliveryStatus, DirectPair, Envelope, FetchedBundle,
    KeyBundle, KeyUpload, NewEnvelope, OneTimeKey, OpaqueBytes, SignedPreKey, UploadOutcome,
    UploadReceipt,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Pool, PoolError};
use tokio_postgres::error::SqlState;
use tokio_postgres::Row;
use tracing::{debug, instrument};
use uuid::Uuid;

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        let retryable = matches!(
            e.code(),
            Some(code) if code == &SqlState::UNIQUE_VIOLATION
                || code == &SqlState::T_R_SERIALIZATION_FAILURE
                || code == &SqlState::T_R_DEADLOCK_DETECTED
        );
        if retryable {
            StoreError::Conflict(e.to_string())
        } else if e.is_closed() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

impl From<PoolError> for StoreError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Timeout(_) | PoolError::Closed => StoreError::Unavailable(e.to_string()),
            PoolError::Backend(inner) => StoreError::from(inner),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

fn as_u32(value: i64, column: &str) -> StoreResult<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::Backend(format!("{column} out of range: {value}")))
}

// ============================================================================
// Key bundles
// ============================================================================

pub struct PgKeyBundleRepository {
    pool: Pool,
}

impl PgKeyBundleRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyBundleRepository for PgKeyBundleRepository {
    #[instrument(skip(self, upload), fields(otk_count = upload.one_time_keys.len()))]
    async fn upsert_bundle(
        &self,
        user_id: Uuid,
        device_id: u32,
        upload: &KeyUpload,
    ) -> StoreResult<UploadReceipt> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let device_id = i64::from(device_id);
        let registration_id = i64::from(upload.registration_id);
        let spk_id = i64::from(upload.signed_pre_key.key_id);

        let inserted = tx
            .query_opt(
                r#"
                INSERT INTO key_bundles (
                    user_id, device_id, registration_id, identity_key,
                    signed_pre_key_id, signed_pre_key_public, signed_pre_key_signature
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (user_id, device_id) DO NOTHING
                RETURNING id
                "#,
                &[
                    &user_id,
                    &device_id,
                    &registration_id,
                    &upload.identity_key,
                    &spk_id,
                    &upload.signed_pre_key.public_key,
                    &upload.signed_pre_key.signature,
                ],
            )
            .await?;

        let (bundle_id, outcome) = match inserted {
            Some(row) => (row.get::<_, i64>("id"), UploadOutcome::Created),
            None => {
                let row = tx
                    .query_one(
                        "SELECT id, identity_key FROM key_bundles \
                         WHERE user_id = $1 AND device_id = $2 FOR UPDATE",
                        &[&user_id, &device_id],
                    )
                    .await?;
                let bundle_id: i64 = row.get("id");
                let stored_identity: String = row.get("identity_key");

                if stored_identity == upload.identity_key {
                    tx.execute(
                        r#"
                        UPDATE key_bundles
                        SET signed_pre_key_id = $2,
                            signed_pre_key_public = $3,
                            signed_pre_key_signature = $4,
                            updated_at = NOW()
                        WHERE id = $1
                        "#,
                        &[
                            &bundle_id,
                            &spk_id,
                            &upload.signed_pre_key.public_key,
                            &upload.signed_pre_key.signature,
                        ],
                    )
                    .await?;
                    (bundle_id, UploadOutcome::Appended)
                } else if upload.reset {
                    tx.execute(
                        r#"
                        UPDATE key_bundles
                        SET registration_id = $2,
                            identity_key = $3,
                            signed_pre_key_id = $4,
                            signed_pre_key_public = $5,
                            signed_pre_key_signature = $6,
                            updated_at = NOW()
                        WHERE id = $1
                        "#,
                        &[
                            &bundle_id,
                            &registration_id,
                            &upload.identity_key,
                            &spk_id,
                            &upload.signed_pre_key.public_key,
                            &upload.signed_pre_key.signature,
                        ],
                    )
                    .await?;
                    tx.execute(
                        "DELETE FROM one_time_keys WHERE bundle_id = $1",
                        &[&bundle_id],
                    )
                    .await?;
                    (bundle_id, UploadOutcome::Replaced)
                } else {
                    // Dropping the transaction rolls it back.
                    return Ok(UploadReceipt::identity_mismatch());
                }
            }
        };

        let mut accepted = 0;
        if !upload.one_time_keys.is_empty() {
            let key_ids: Vec<i64> = upload
                .one_time_keys
                .iter()
                .map(|k| i64::from(k.key_id))
                .collect();
            let public_keys: Vec<String> = upload
                .one_time_keys
                .iter()
                .map(|k| k.public_key.clone())
                .collect();

            // Key ids this bundle already published, claimed or not, are skipped.
            let inserted = tx
                .execute(
                    r#"
                    INSERT INTO one_time_keys (bundle_id, key_id, public_key)
                    SELECT $1, k.key_id, k.public_key
                    FROM UNNEST($2::BIGINT[], $3::TEXT[]) WITH ORDINALITY AS k(key_id, public_key, ord)
                    ORDER BY k.ord
                    ON CONFLICT (bundle_id, key_id) DO NOTHING
                    "#,
                    &[&bundle_id, &key_ids, &public_keys],
                )
                .await?;
            accepted = usize::try_from(inserted)
                .map_err(|_| StoreError::Backend(format!("inserted row count {inserted}")))?;
        }

        tx.commit().await?;
        debug!(bundle_id, ?outcome, accepted, "key bundle stored");
        Ok(UploadReceipt::new(outcome, accepted))
    }

    #[instrument(skip(self))]
    async fn pop_bundle(
        &self,
        user_id: Uuid,
        device_id: u32,
    ) -> StoreResult<Option<FetchedBundle>> {
        let client = self.pool.get().await?;

        // One statement: the claim and the bundle read commit together, and
        // SKIP LOCKED keeps concurrent fetchers off each other's key.
        let row = client
            .query_opt(
                r#"
                WITH bundle AS (
                    SELECT id, registration_id, identity_key,
                           signed_pre_key_id, signed_pre_key_public, signed_pre_key_signature
                    FROM key_bundles
                    WHERE user_id = $1 AND device_id = $2
                ),
                popped AS (
                    UPDATE one_time_keys
                    SET claimed_at = NOW()
                    WHERE id = (
                        SELECT k.id
                        FROM one_time_keys k
                        WHERE k.bundle_id = (SELECT id FROM bundle)
                          AND k.claimed_at IS NULL
                        ORDER BY k.id ASC
                        LIMIT 1
                        FOR UPDATE SKIP LOCKED
                    )
                    RETURNING key_id, public_key
                )
                SELECT b.registration_id, b.identity_key,
                       b.signed_pre_key_id, b.signed_pre_key_public, b.signed_pre_key_signature,
                       p.key_id AS otk_key_id, p.public_key AS otk_public_key,
                       (SELECT COUNT(*) FROM one_time_keys k
                        WHERE k.bundle_id = b.id AND k.claimed_at IS NULL) AS pool_size
                FROM bundle b
                LEFT JOIN popped p ON TRUE
                "#,
                &[&user_id, &i64::from(device_id)],
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let otk_key_id: Option<i64> = row.get("otk_key_id");
        let otk_public_key: Option<String> = row.get("otk_public_key");
        let one_time_key = match (otk_key_id, otk_public_key) {
            (Some(key_id), Some(public_key)) => Some(OneTimeKey {
                key_id: as_u32(key_id, "one_time_keys.key_id")?,
                public_key,
            }),
            _ => None,
        };

        // The count runs on the statement snapshot, where the claimed row is still unclaimed.
        let pool_size: i64 = row.get("pool_size");
        let remaining = (pool_size - i64::from(one_time_key.is_some())).max(0);

        Ok(Some(FetchedBundle {
            bundle: KeyBundle {
                user_id,
                device_id,
                registration_id: as_u32(row.get("registration_id"), "registration_id")?,
                identity_key: row.get("identity_key"),
                signed_pre_key: SignedPreKey {
                    key_id: as_u32(row.get("signed_pre_key_id"), "signed_pre_key_id")?,
                    public_key: row.get("signed_pre_key_public"),
                    signature: row.get("signed_pre_key_signature"),
                },
                one_time_key,
            },
            remaining,
        }))
    }

    async fn count_one_time_keys(&self, user_id: Uuid, device_id: u32) -> StoreResult<Option<i64>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT (SELECT COUNT(*) FROM one_time_keys k
                        WHERE k.bundle_id = b.id AND k.claimed_at IS NULL) AS pool_size
                FROM key_bundles b
                WHERE b.user_id = $1 AND b.device_id = $2
                "#,
                &[&user_id, &i64::from(device_id)],
            )
            .await?;
        Ok(row.map(|r| r.get("pool_size")))
    }
}

// ============================================================================
// Conversations
// ============================================================================

const CONVERSATION_COLUMNS: &str = "id, kind, participants, last_activity_at, created_at";

fn row_to_conversation(row: &Row) -> StoreResult<Conversation> {
    let kind: String = row.get("kind");
    Ok(Conversation {
        id: row.get("id"),
        kind: ConversationKind::from_db(&kind)
            .ok_or_else(|| StoreError::Backend(format!("unknown conversation kind: {kind}")))?,
        participants: row.get("participants"),
        last_activity_at: row.get("last_activity_at"),
        created_at: row.get("created_at"),
    })
}

pub struct PgConversationRepository {
    pool: Pool,
}

impl PgConversationRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn find_direct(&self, pair: &DirectPair) -> StoreResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE kind = 'direct' AND participant_low = $1 AND participant_high = $2"
        );
        client
            .query_opt(sql.as_str(), &[&pair.low(), &pair.high()])
            .await?
            .as_ref()
            .map(row_to_conversation)
            .transpose()
    }

    async fn insert_direct(&self, pair: &DirectPair) -> StoreResult<Conversation> {
        let client = self.pool.get().await?;
        // A concurrent insert for the same pair hits the partial unique index
        // and surfaces as StoreError::Conflict.
        let sql = format!(
            "INSERT INTO conversations (id, kind, participants, participant_low, participant_high) \
             VALUES ($1, 'direct', $2, $3, $4) \
             RETURNING {CONVERSATION_COLUMNS}"
        );
        let row = client
            .query_one(
                sql.as_str(),
                &[
                    &Uuid::new_v4(),
                    &pair.participants(),
                    &pair.low(),
                    &pair.high(),
                ],
            )
            .await?;
        row_to_conversation(&row)
    }

    async fn touch(&self, conversation_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE conversations SET last_activity_at = GREATEST(last_activity_at, $2) \
                 WHERE id = $1",
                &[&conversation_id, &at],
            )
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound("conversation".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Envelopes
// ============================================================================

const ENVELOPE_COLUMNS: &str = "id, conversation_id, sender_id, recipient_id, inbox_seq, \
                                ciphertext, iv, ratchet_version, kind, status, created_at";

fn row_to_envelope(row: &Row) -> StoreResult<Envelope> {
    let kind: String = row.get("kind");
    let status: i16 = row.get("status");
    Ok(Envelope {
        id: row.get("id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        recipient_id: row.get("recipient_id"),
        ciphertext: OpaqueBytes::new(row.get("ciphertext")),
        iv: OpaqueBytes::new(row.get("iv")),
        ratchet_version: row.get("ratchet_version"),
        kind: kind
            .parse()
            .map_err(|_| StoreError::Backend(format!("unknown message kind: {kind}")))?,
        status: DeliveryStatus::from_rank(status)
            .ok_or_else(|| StoreError::Backend(format!("unknown status rank: {status}")))?,
        created_at: row.get("created_at"),
        sequence: row.get("inbox_seq"),
    })
}

pub struct PgEnvelopeRepository {
    pool: Pool,
}

impl PgEnvelopeRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnvelopeRepository for PgEnvelopeRepository {
    #[instrument(skip(self, envelope), fields(recipient_id = %envelope.recipient_id))]
    async fn insert(&self, conversation_id: Uuid, envelope: &NewEnvelope) -> StoreResult<Envelope> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        // The counter row stays locked until commit, so envelopes for one
        // recipient become visible in sequence order and a cursor never skips one.
        let sequence: i64 = tx
            .query_one(
                r#"
                INSERT INTO inbox_sequences (recipient_id, last_sequence)
                VALUES ($1, 1)
                ON CONFLICT (recipient_id)
                DO UPDATE SET last_sequence = inbox_sequences.last_sequence + 1
                RETURNING last_sequence
                "#,
                &[&envelope.recipient_id],
            )
            .await?
            .get(0);

        let ciphertext = envelope.ciphertext.as_slice();
        let iv = envelope.iv.as_slice();
        let kind = envelope.kind.as_str();
        let status = DeliveryStatus::Sent.rank();

        let sql = format!(
            "INSERT INTO messages (id, conversation_id, sender_id, recipient_id, inbox_seq, \
                                   ciphertext, iv, ratchet_version, kind, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {ENVELOPE_COLUMNS}"
        );
        let row = tx
            .query_one(
                sql.as_str(),
                &[
                    &Uuid::new_v4(),
                    &conversation_id,
                    &envelope.sender_id,
                    &envelope.recipient_id,
                    &sequence,
                    &ciphertext,
                    &iv,
                    &envelope.ratchet_version,
                    &kind,
                    &status,
                ],
            )
            .await?;
        let stored = row_to_envelope(&row)?;

        tx.commit().await?;
        Ok(stored)
    }

    async fn list_for_recipient(
        &self,
        recipient_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    ) -> StoreResult<Vec<Envelope>> {
        let client = self.pool.get().await?;

        let cursor: i64 = match after {
            None => 0,
            Some(message_id) => client
                .query_opt(
                    "SELECT inbox_seq FROM messages WHERE id = $1 AND recipient_id = $2",
                    &[&message_id, &recipient_id],
                )
                .await?
                .map(|row| row.get(0))
                .ok_or_else(|| StoreError::NotFound("sync cursor".into()))?,
        };

        let sql = format!(
            "SELECT {ENVELOPE_COLUMNS} FROM messages \
             WHERE recipient_id = $1 AND inbox_seq > $2 \
             ORDER BY inbox_seq ASC \
             LIMIT $3"
        );
        let rows = client
            .query(sql.as_str(), &[&recipient_id, &cursor, &limit])
            .await?;
        rows.iter().map(row_to_envelope).collect()
    }

    async fn advance_status(
        &self,
        message_id: Uuid,
        recipient_id: Uuid,
        status: DeliveryStatus,
    ) -> StoreResult<Option<(Envelope, bool)>> {
        let client = self.pool.get().await?;
        let rank = status.rank();

        let update = format!(
            "UPDATE messages SET status = $3 \
             WHERE id = $1 AND recipient_id = $2 AND status < $3 \
             RETURNING {ENVELOPE_COLUMNS}"
        );
        if let Some(row) = client
            .query_opt(update.as_str(), &[&message_id, &recipient_id, &rank])
            .await?
        {
            return Ok(Some((row_to_envelope(&row)?, true)));
        }

        let select = format!(
            "SELECT {ENVELOPE_COLUMNS} FROM messages WHERE id = $1 AND recipient_id = $2"
        );
        client
            .query_opt(select.as_str(), &[&message_id, &recipient_id])
            .await?
            .as_ref()
            .map(|row| row_to_envelope(row).map(|env| (env, false)))
            .transpose()
    }
}
