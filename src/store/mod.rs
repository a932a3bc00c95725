//! Persistence contract consumed by the engine.
//!
//! The engine never talks to a database directly; everything it needs goes
//! through [`CampaignStore`]. Implementations must be safe for many concurrent
//! callers, connection pooling is their concern.

use async_trait::async_trait;

use crate::domain::campaign::{
    Campaign, CampaignData, CampaignId, CampaignRecord, CampaignStatus, CampaignUpdate, Pending,
    RecipientFilter,
};
use crate::domain::message::{MessageId, MessageRecord, MessageStatus};
use crate::domain::recipient::{Recipient, RecipientId, RecipientUpdate};
use crate::domain::stats::{CampaignStats, DetailedCampaignStats};
use crate::error::{MailshotError, Result};

pub mod memory;

pub use memory::InMemoryCampaignStore;

/// Storage trait for campaigns, recipients, messages and stats.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    // These methods are used by the engine while discovering and running
    // campaigns.

    /// All campaigns whose status is still `Pending`, regardless of start time.
    async fn list_due_campaigns(&self) -> Result<Vec<Campaign<Pending>>>;

    /// Unconditionally set a campaign's status.
    async fn transition_campaign_status(&self, id: CampaignId, status: CampaignStatus)
    -> Result<()>;

    /// Atomically move a campaign from `Pending` to `Executing`.
    ///
    /// Returns `false` when the campaign was no longer `Pending`, meaning some
    /// other run already claimed it.
    async fn claim_campaign(&self, id: CampaignId) -> Result<bool>;

    /// Recipients matching `filter`, in a stable order.
    async fn match_recipients(&self, filter: &RecipientFilter) -> Result<Vec<Recipient>>;

    /// Persist a new `Pending` message and return its assigned id.
    async fn create_message(
        &self,
        campaign_id: Option<CampaignId>,
        recipient_id: RecipientId,
    ) -> Result<MessageId>;

    async fn transition_message_status(&self, id: MessageId, status: MessageStatus) -> Result<()>;

    async fn record_campaign_stats(&self, stats: &CampaignStats) -> Result<()>;

    // The following methods back the surrounding CRUD layer. The engine only
    // uses `get_recipient` (for standalone sends).

    /// Insert a new `Pending` campaign.
    ///
    /// Fails with a validation error if the id is already taken; edits go
    /// through [`CampaignStore::update_campaign`].
    async fn save_campaign(&self, data: CampaignData) -> Result<()>;

    /// Apply a partial edit to a campaign's definition. Never touches status.
    async fn update_campaign(&self, id: CampaignId, update: &CampaignUpdate) -> Result<()>;

    /// Remove a campaign. Its messages and stats are kept.
    async fn delete_campaign(&self, id: CampaignId) -> Result<()>;

    async fn get_campaign(&self, id: CampaignId) -> Result<CampaignRecord>;

    async fn list_campaigns(&self) -> Result<Vec<CampaignRecord>>;

    /// Insert a new recipient, failing if the id is already taken.
    async fn save_recipient(&self, recipient: Recipient) -> Result<()>;

    async fn update_recipient(&self, id: RecipientId, update: &RecipientUpdate) -> Result<()>;

    /// Remove a recipient. Messages already sent to it are kept.
    async fn delete_recipient(&self, id: RecipientId) -> Result<()>;

    async fn get_recipient(&self, id: RecipientId) -> Result<Recipient>;

    async fn list_recipients(&self) -> Result<Vec<Recipient>>;

    async fn get_message(&self, id: MessageId) -> Result<MessageRecord>;

    /// Messages belonging to a campaign, in creation order.
    async fn list_messages(&self, campaign_id: CampaignId) -> Result<Vec<MessageRecord>>;

    /// Stats for a single campaign, if it has finished a run.
    async fn get_stats(&self, campaign_id: CampaignId) -> Result<Option<CampaignStats>>;

    /// Stats of every finished campaign, newest start first.
    async fn list_stats(&self) -> Result<Vec<CampaignStats>>;

    /// Status of the campaign that owns a message.
    ///
    /// Standalone messages have no owner and report
    /// [`CampaignStatus::NotApplicable`].
    async fn message_campaign_status(&self, id: MessageId) -> Result<CampaignStatus> {
        match self.get_message(id).await?.data.campaign_id {
            Some(campaign_id) => Ok(self.get_campaign(campaign_id).await?.status),
            None => Ok(CampaignStatus::NotApplicable),
        }
    }

    /// Stats, definition and messages of one campaign.
    ///
    /// Messages are ordered by status descending so failures come first.
    #[tracing::instrument(skip_all, fields(campaign_id = %campaign_id))]
    async fn detailed_stats(&self, campaign_id: CampaignId) -> Result<DetailedCampaignStats> {
        let stats = self.get_stats(campaign_id).await?.ok_or_else(|| {
            MailshotError::InvalidState(
                campaign_id,
                "without stats".to_string(),
                "done or canceled".to_string(),
            )
        })?;
        let campaign = self.get_campaign(campaign_id).await?;
        let mut messages = self.list_messages(campaign_id).await?;
        messages.sort_by(|a, b| b.status.cmp(&a.status));

        Ok(DetailedCampaignStats {
            stats,
            campaign,
            messages,
        })
    }
}
