//! In-memory implementation of [`CampaignStore`].
//!
//! Keeps everything behind a single lock and preserves insertion order, which
//! is the order `list_due_campaigns` and `match_recipients` return. Faults can
//! be injected per operation so the engine's failure paths can be exercised
//! without a database.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::CampaignStore;
use crate::domain::campaign::{
    Campaign, CampaignData, CampaignId, CampaignRecord, CampaignStatus, CampaignUpdate, Pending,
    RecipientFilter,
};
use crate::domain::message::{MessageData, MessageId, MessageRecord, MessageStatus};
use crate::domain::recipient::{Recipient, RecipientId, RecipientUpdate};
use crate::domain::stats::CampaignStats;
use crate::error::{MailshotError, Result};

#[derive(Default)]
struct Tables {
    campaigns: Vec<CampaignRecord>,
    recipients: Vec<Recipient>,
    messages: Vec<MessageRecord>,
    stats: Vec<CampaignStats>,
    next_message_id: i64,
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct InMemoryCampaignStore {
    tables: Mutex<Tables>,
    fail_discovery: AtomicBool,
    fail_recipient_fetch: AtomicBool,
    fail_campaign_status_writes: AtomicBool,
    fail_message_status_writes: AtomicBool,
    fail_message_creation_for: Mutex<HashSet<RecipientId>>,
    discovery_calls: AtomicUsize,
    create_message_calls: AtomicUsize,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `list_due_campaigns` fail until reset.
    pub fn set_fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::SeqCst);
    }

    /// Make `match_recipients` fail until reset.
    pub fn set_fail_recipient_fetch(&self, fail: bool) {
        self.fail_recipient_fetch.store(fail, Ordering::SeqCst);
    }

    /// Make `transition_campaign_status` fail until reset. Claims still succeed.
    pub fn set_fail_campaign_status_writes(&self, fail: bool) {
        self.fail_campaign_status_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `transition_message_status` fail until reset.
    pub fn set_fail_message_status_writes(&self, fail: bool) {
        self.fail_message_status_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `create_message` fail for one recipient.
    pub fn fail_message_creation_for(&self, recipient_id: RecipientId) {
        self.fail_message_creation_for.lock().insert(recipient_id);
    }

    /// Number of times `list_due_campaigns` has been called.
    pub fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }

    /// Number of times `create_message` has been called, failed calls included.
    pub fn create_message_calls(&self) -> usize {
        self.create_message_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn list_due_campaigns(&self) -> Result<Vec<Campaign<Pending>>> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(MailshotError::Other(anyhow!("campaign discovery unavailable")));
        }

        let tables = self.tables.lock();
        Ok(tables
            .campaigns
            .iter()
            .filter_map(CampaignRecord::as_pending)
            .collect())
    }

    async fn transition_campaign_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> Result<()> {
        if self.fail_campaign_status_writes.load(Ordering::SeqCst) {
            return Err(MailshotError::Other(anyhow!(
                "could not update campaign {}",
                id
            )));
        }

        let mut tables = self.tables.lock();
        let record = tables
            .campaigns
            .iter_mut()
            .find(|c| c.data.id == id)
            .ok_or(MailshotError::CampaignNotFound(id))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_campaign(&self, id: CampaignId) -> Result<bool> {
        let mut tables = self.tables.lock();
        let record = tables
            .campaigns
            .iter_mut()
            .find(|c| c.data.id == id)
            .ok_or(MailshotError::CampaignNotFound(id))?;
        if record.status != CampaignStatus::Pending {
            return Ok(false);
        }
        record.status = CampaignStatus::Executing;
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn match_recipients(&self, filter: &RecipientFilter) -> Result<Vec<Recipient>> {
        if self.fail_recipient_fetch.load(Ordering::SeqCst) {
            return Err(MailshotError::Other(anyhow!("recipient lookup unavailable")));
        }

        let tables = self.tables.lock();
        if filter.is_wildcard() {
            return Ok(tables.recipients.clone());
        }
        Ok(tables
            .recipients
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn create_message(
        &self,
        campaign_id: Option<CampaignId>,
        recipient_id: RecipientId,
    ) -> Result<MessageId> {
        self.create_message_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_message_creation_for.lock().contains(&recipient_id) {
            return Err(MailshotError::Other(anyhow!(
                "could not insert message for recipient {}",
                recipient_id
            )));
        }

        let mut tables = self.tables.lock();
        tables.next_message_id += 1;
        let id = MessageId(tables.next_message_id);
        tables.messages.push(MessageRecord {
            data: MessageData {
                id,
                created_at: Utc::now(),
                campaign_id,
                recipient_id,
            },
            status: MessageStatus::Pending,
        });
        Ok(id)
    }

    async fn transition_message_status(&self, id: MessageId, status: MessageStatus) -> Result<()> {
        if self.fail_message_status_writes.load(Ordering::SeqCst) {
            return Err(MailshotError::Other(anyhow!(
                "could not update message {}",
                id
            )));
        }

        let mut tables = self.tables.lock();
        let record = tables
            .messages
            .iter_mut()
            .find(|m| m.data.id == id)
            .ok_or(MailshotError::MessageNotFound(id))?;
        record.status = status;
        Ok(())
    }

    async fn record_campaign_stats(&self, stats: &CampaignStats) -> Result<()> {
        self.tables.lock().stats.push(stats.clone());
        Ok(())
    }

    async fn save_campaign(&self, data: CampaignData) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.campaigns.iter().any(|c| c.data.id == data.id) {
            return Err(MailshotError::ValidationError(format!(
                "campaign {} already exists",
                data.id
            )));
        }
        tables.campaigns.push(CampaignRecord {
            data,
            status: CampaignStatus::Pending,
            updated_at: Utc::now(),
        });
        Ok(())
    }

    async fn update_campaign(&self, id: CampaignId, update: &CampaignUpdate) -> Result<()> {
        let mut tables = self.tables.lock();
        let record = tables
            .campaigns
            .iter_mut()
            .find(|c| c.data.id == id)
            .ok_or(MailshotError::CampaignNotFound(id))?;
        record.data.apply(update);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_campaign(&self, id: CampaignId) -> Result<()> {
        let mut tables = self.tables.lock();
        let before = tables.campaigns.len();
        tables.campaigns.retain(|c| c.data.id != id);
        if tables.campaigns.len() == before {
            return Err(MailshotError::CampaignNotFound(id));
        }
        Ok(())
    }

    async fn save_recipient(&self, recipient: Recipient) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.recipients.iter().any(|r| r.id == recipient.id) {
            return Err(MailshotError::ValidationError(format!(
                "recipient {} already exists",
                recipient.id
            )));
        }
        tables.recipients.push(recipient);
        Ok(())
    }

    async fn update_recipient(&self, id: RecipientId, update: &RecipientUpdate) -> Result<()> {
        let mut tables = self.tables.lock();
        let recipient = tables
            .recipients
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(MailshotError::RecipientNotFound(id))?;
        recipient.apply(update);
        Ok(())
    }

    async fn delete_recipient(&self, id: RecipientId) -> Result<()> {
        let mut tables = self.tables.lock();
        let before = tables.recipients.len();
        tables.recipients.retain(|r| r.id != id);
        if tables.recipients.len() == before {
            return Err(MailshotError::RecipientNotFound(id));
        }
        Ok(())
    }

    async fn list_recipients(&self) -> Result<Vec<Recipient>> {
        Ok(self.tables.lock().recipients.clone())
    }

    async fn get_campaign(&self, id: CampaignId) -> Result<CampaignRecord> {
        self.tables
            .lock()
            .campaigns
            .iter()
            .find(|c| c.data.id == id)
            .cloned()
            .ok_or(MailshotError::CampaignNotFound(id))
    }

    async fn list_campaigns(&self) -> Result<Vec<CampaignRecord>> {
        Ok(self.tables.lock().campaigns.clone())
    }

    async fn get_recipient(&self, id: RecipientId) -> Result<Recipient> {
        self.tables
            .lock()
            .recipients
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(MailshotError::RecipientNotFound(id))
    }

    async fn get_message(&self, id: MessageId) -> Result<MessageRecord> {
        self.tables
            .lock()
            .messages
            .iter()
            .find(|m| m.data.id == id)
            .cloned()
            .ok_or(MailshotError::MessageNotFound(id))
    }

    async fn list_messages(&self, campaign_id: CampaignId) -> Result<Vec<MessageRecord>> {
        Ok(self
            .tables
            .lock()
            .messages
            .iter()
            .filter(|m| m.data.campaign_id == Some(campaign_id))
            .cloned()
            .collect())
    }

    async fn get_stats(&self, campaign_id: CampaignId) -> Result<Option<CampaignStats>> {
        Ok(self
            .tables
            .lock()
            .stats
            .iter()
            .find(|s| s.campaign_id == campaign_id)
            .cloned())
    }

    async fn list_stats(&self) -> Result<Vec<CampaignStats>> {
        let mut stats = self.tables.lock().stats.clone();
        stats.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(stats)
    }
}
