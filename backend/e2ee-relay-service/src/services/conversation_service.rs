use crate::error::AppResult;
use crate::models::{Conversation, DirectPair};
use crate::repository::{ConversationRepository, StoreError};
use crate::services::retry::StoreRetry;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Maps an unordered pair of users to their single direct conversation.
pub struct ConversationResolver {
    repo: Arc<dyn ConversationRepository>,
    retry: StoreRetry,
}

impl ConversationResolver {
    pub fn new(repo: Arc<dyn ConversationRepository>, retry: StoreRetry) -> Self {
        Self { repo, retry }
    }

    /// Find-or-create. Two callers racing on a fresh pair both end up with the
    /// same conversation: the loser's insert conflicts and its retry finds the
    /// winner's row.
    #[instrument(skip(self))]
    pub async fn resolve_direct(&self, a: Uuid, b: Uuid) -> AppResult<Conversation> {
        let pair = DirectPair::new(a, b)?;

        self.retry
            .run("resolve_direct", || async move {
                if let Some(existing) = self.repo.find_direct(&pair).await? {
                    return Ok(existing);
                }
                let created = self.repo.insert_direct(&pair).await?;
                debug!(conversation_id = %created.id, "direct conversation created");
                Ok::<_, StoreError>(created)
            })
            .await
    }

    pub async fn touch(&self, conversation_id: Uuid) -> AppResult<()> {
        self.repo
            .touch(conversation_id, chrono::Utc::now())
            .await
            .map_err(Into::into)
    }
}
