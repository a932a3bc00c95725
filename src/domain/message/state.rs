//! Message types using the typestate pattern.
//!
//! A message is created `Pending` once per dispatch and transitions exactly
//! once, to `Succeeded` or `Failed`, after the dispatch concludes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::campaign::CampaignId;
use crate::domain::recipient::RecipientId;

/// Marker trait for valid message states.
pub trait MessageState: Send + Sync {}

/// A message record driven by a dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct Message<T: MessageState> {
    pub state: T,
    pub data: MessageData,
}

/// Immutable message metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageData {
    /// Identity assigned by the store on creation
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    /// Owning campaign, `None` for standalone sends
    pub campaign_id: Option<CampaignId>,
    pub recipient_id: RecipientId,
}

// ============================================================================
// Message States
// ============================================================================

/// Message is persisted and the send is in progress.
#[derive(Debug, Clone, Serialize)]
pub struct Pending {}

impl MessageState for Pending {}

/// The transport accepted the message.
#[derive(Debug, Clone, Serialize)]
pub struct Succeeded {
    pub attempts: u32,
    pub sent_at: DateTime<Utc>,
}

impl MessageState for Succeeded {}

/// Every attempt failed.
#[derive(Debug, Clone, Serialize)]
pub struct Failed {
    pub attempts: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl MessageState for Failed {}

/// Persisted message status.
///
/// Ordering follows the lifecycle: `Pending < Success < Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Success,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Success => "success",
            MessageStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "success" => Ok(MessageStatus::Success),
            "failed" => Ok(MessageStatus::Failed),
            _ => Err(format!("Invalid message status: {}", s)),
        }
    }
}

/// Message as seen by readers of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    pub data: MessageData,
    pub status: MessageStatus,
}

/// Unique identifier for a message, assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        MessageId(id)
    }
}
