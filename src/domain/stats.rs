//! Per-campaign statistics.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::campaign::{CampaignId, CampaignRecord};
use crate::domain::message::MessageRecord;

/// Outcome counters recorded once when a campaign run reaches `Done` or
/// `Canceled`.
///
/// `Failed` and `Invalid` runs never produce a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignStats {
    pub campaign_id: CampaignId,
    /// Recipients matched by the campaign filter
    pub matches: u64,
    /// Dispatches that ran to completion, successful or not
    pub sent: u64,
    /// Dispatches that ended without a delivered message
    pub fails: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl CampaignStats {
    /// Dispatches that delivered their message.
    pub fn delivered(&self) -> u64 {
        self.sent.saturating_sub(self.fails)
    }
}

/// Stats together with the campaign definition and every message it created.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedCampaignStats {
    pub stats: CampaignStats,
    pub campaign: CampaignRecord,
    /// Ordered by status, descending (failed first, then succeeded, then pending)
    pub messages: Vec<MessageRecord>,
}
