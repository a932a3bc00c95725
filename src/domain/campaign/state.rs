//! Campaign types for the dispatch engine.
//!
//! A campaign moves through distinct states, enforced at compile time on the
//! engine side. Storage only ever sees the flat [`CampaignStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::recipient::Recipient;
use crate::error::{MailshotError, Result};

/// Marker trait for valid campaign states.
pub trait CampaignState: Send + Sync {}

/// A campaign being driven by the engine.
///
/// The generic parameter `T` represents the current state of the campaign.
/// A `Campaign<Pending>` can only be claimed or invalidated; only a
/// `Campaign<Executing>` can reach `Done`, `Canceled` or `Failed`.
#[derive(Debug, Clone, Serialize)]
pub struct Campaign<T: CampaignState> {
    /// The current state of the campaign.
    pub state: T,
    /// The user-supplied campaign data.
    pub data: CampaignData,
}

/// User-supplied definition of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignData {
    pub id: CampaignId,

    /// Text sent to every matched recipient
    pub text: String,

    /// Which recipients the campaign targets
    pub filter: RecipientFilter,

    /// Earliest time the campaign may start dispatching
    pub start_time: DateTime<Utc>,

    /// Hard deadline: no dispatch is launched after this instant
    pub end_time: DateTime<Utc>,
}

impl CampaignData {
    /// Create campaign data with a fresh id.
    pub fn new(
        text: impl Into<String>,
        filter: RecipientFilter,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CampaignId::from(Uuid::new_v4()),
            text: text.into(),
            filter,
            start_time,
            end_time,
        }
    }

    /// Check that the campaign window is well formed.
    ///
    /// Stores accept campaigns without calling this; it is offered to callers
    /// that want to reject bad windows up front.
    pub fn validate(&self) -> Result<()> {
        if self.end_time <= self.start_time {
            return Err(MailshotError::ValidationError(format!(
                "campaign {} ends at {} which is not after its start {}",
                self.id, self.end_time, self.start_time
            )));
        }
        Ok(())
    }
}

/// Partial edit of a campaign definition.
///
/// `None` fields are left unchanged, as is an empty `text`. Inside `filter`
/// only non-empty (non-zero) criteria overwrite the stored ones, so an update
/// never widens a criterion back to a wildcard. Status is not editable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignUpdate {
    pub text: Option<String>,
    pub filter: Option<RecipientFilter>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl CampaignData {
    pub fn apply(&mut self, update: &CampaignUpdate) {
        if let Some(text) = update.text.as_ref().filter(|t| !t.is_empty()) {
            self.text = text.clone();
        }
        if let Some(filter) = &update.filter {
            if filter.operator_code != 0 {
                self.filter.operator_code = filter.operator_code;
            }
            if !filter.tag.is_empty() {
                self.filter.tag = filter.tag.clone();
            }
            if !filter.timezone.is_empty() {
                self.filter.timezone = filter.timezone.clone();
            }
        }
        if let Some(start_time) = update.start_time {
            self.start_time = start_time;
        }
        if let Some(end_time) = update.end_time {
            self.end_time = end_time;
        }
    }
}

/// Recipient selection criteria.
///
/// A criterion only participates in the match when it is non-empty (strings)
/// or non-zero (operator code). All present criteria are ANDed together, so
/// the default filter matches every recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientFilter {
    /// Mobile operator code, 0 means any
    #[serde(default)]
    pub operator_code: i32,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub timezone: String,
}

impl RecipientFilter {
    pub fn matches(&self, recipient: &Recipient) -> bool {
        (self.operator_code == 0 || self.operator_code == recipient.operator_code)
            && (self.tag.is_empty() || self.tag == recipient.tag)
            && (self.timezone.is_empty() || self.timezone == recipient.timezone)
    }

    /// True when no criterion is set.
    pub fn is_wildcard(&self) -> bool {
        self.operator_code == 0 && self.tag.is_empty() && self.timezone.is_empty()
    }
}

// ============================================================================
// Campaign States
// ============================================================================

/// Campaign is waiting for its start time.
#[derive(Debug, Clone, Serialize)]
pub struct Pending {}

impl CampaignState for Pending {}

/// Campaign has been claimed by the engine and is dispatching.
#[derive(Debug, Clone, Serialize)]
pub struct Executing {
    pub claimed_at: DateTime<Utc>,
}

impl CampaignState for Executing {}

/// Every matched recipient was dispatched before the deadline.
#[derive(Debug, Clone, Serialize)]
pub struct Done {
    pub claimed_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CampaignState for Done {}

/// The deadline arrived (or the engine shut down) before every recipient was
/// dispatched.
#[derive(Debug, Clone, Serialize)]
pub struct Canceled {
    pub claimed_at: DateTime<Utc>,
    pub canceled_at: DateTime<Utc>,
}

impl CampaignState for Canceled {}

/// The recipient list could not be fetched.
#[derive(Debug, Clone, Serialize)]
pub struct Failed {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl CampaignState for Failed {}

/// The campaign's end time had already passed when it was discovered.
#[derive(Debug, Clone, Serialize)]
pub struct Invalid {
    pub marked_at: DateTime<Utc>,
}

impl CampaignState for Invalid {}

/// Persisted campaign status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Executing,
    Done,
    Canceled,
    Failed,
    Invalid,
    /// Sentinel owner of standalone messages sent outside any campaign.
    NotApplicable,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Executing => "executing",
            CampaignStatus::Done => "done",
            CampaignStatus::Canceled => "canceled",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Invalid => "invalid",
            CampaignStatus::NotApplicable => "not_applicable",
        }
    }

    /// Terminal statuses never transition again on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Done
                | CampaignStatus::Canceled
                | CampaignStatus::Failed
                | CampaignStatus::Invalid
        )
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CampaignStatus::Pending),
            "executing" => Ok(CampaignStatus::Executing),
            "done" => Ok(CampaignStatus::Done),
            "canceled" => Ok(CampaignStatus::Canceled),
            "failed" => Ok(CampaignStatus::Failed),
            "invalid" => Ok(CampaignStatus::Invalid),
            "not_applicable" => Ok(CampaignStatus::NotApplicable),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Campaign as seen by readers of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignRecord {
    pub data: CampaignData,
    pub status: CampaignStatus,
    pub updated_at: DateTime<Utc>,
}

impl CampaignRecord {
    /// View a pending record as a typed campaign the engine can drive.
    pub fn as_pending(&self) -> Option<Campaign<Pending>> {
        match self.status {
            CampaignStatus::Pending => Some(Campaign {
                state: Pending {},
                data: self.data.clone(),
            }),
            _ => None,
        }
    }
}

/// Unique identifier for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub Uuid);

impl std::fmt::Display for CampaignId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for CampaignId {
    fn from(uuid: Uuid) -> Self {
        CampaignId(uuid)
    }
}

impl std::ops::Deref for CampaignId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recipient::RecipientId;
    use chrono::Duration;

    fn recipient(operator_code: i32, tag: &str, timezone: &str) -> Recipient {
        Recipient {
            id: RecipientId(1),
            phone: 79_001_234_567,
            operator_code,
            tag: tag.to_string(),
            timezone: timezone.to_string(),
        }
    }

    #[test]
    fn test_default_filter_matches_everyone() {
        let filter = RecipientFilter::default();
        assert!(filter.is_wildcard());
        assert!(filter.matches(&recipient(900, "vip", "Europe/Moscow")));
        assert!(filter.matches(&recipient(0, "", "")));
    }

    #[test]
    fn test_filter_ands_present_criteria() {
        let filter = RecipientFilter {
            operator_code: 900,
            tag: "vip".to_string(),
            timezone: String::new(),
        };
        assert!(filter.matches(&recipient(900, "vip", "Asia/Tokyo")));
        assert!(!filter.matches(&recipient(901, "vip", "Asia/Tokyo")));
        assert!(!filter.matches(&recipient(900, "regular", "Asia/Tokyo")));
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let now = Utc::now();
        let ok = CampaignData::new("hi", RecipientFilter::default(), now, now + Duration::hours(1));
        assert!(ok.validate().is_ok());

        let bad = CampaignData::new("hi", RecipientFilter::default(), now, now);
        assert!(matches!(
            bad.validate(),
            Err(MailshotError::ValidationError(_))
        ));
    }

    #[test]
    fn test_update_only_overwrites_present_fields() {
        let now = Utc::now();
        let mut data = CampaignData::new(
            "old text",
            RecipientFilter {
                operator_code: 900,
                tag: "vip".to_string(),
                timezone: "UTC".to_string(),
            },
            now,
            now + Duration::hours(1),
        );
        let id = data.id;

        data.apply(&CampaignUpdate {
            text: Some(String::new()),
            filter: Some(RecipientFilter {
                operator_code: 0,
                tag: "regular".to_string(),
                timezone: String::new(),
            }),
            start_time: None,
            end_time: Some(now + Duration::hours(2)),
        });

        assert_eq!(data.id, id);
        assert_eq!(data.text, "old text");
        assert_eq!(data.filter.operator_code, 900);
        assert_eq!(data.filter.tag, "regular");
        assert_eq!(data.filter.timezone, "UTC");
        assert_eq!(data.start_time, now);
        assert_eq!(data.end_time, now + Duration::hours(2));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            CampaignStatus::Pending,
            CampaignStatus::Executing,
            CampaignStatus::Done,
            CampaignStatus::Canceled,
            CampaignStatus::Failed,
            CampaignStatus::Invalid,
            CampaignStatus::NotApplicable,
        ] {
            assert_eq!(status.as_str().parse::<CampaignStatus>(), Ok(status));
        }
        assert!("bogus".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!CampaignStatus::Pending.is_terminal());
        assert!(!CampaignStatus::Executing.is_terminal());
        assert!(!CampaignStatus::NotApplicable.is_terminal());
        assert!(CampaignStatus::Done.is_terminal());
        assert!(CampaignStatus::Invalid.is_terminal());
    }
}
