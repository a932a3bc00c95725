//! Error types for the campaign dispatch engine.

use thiserror::Error;

use crate::domain::campaign::CampaignId;
use crate::domain::message::MessageId;
use crate::domain::recipient::RecipientId;

/// Result type alias using the mailshot error type.
pub type Result<T> = std::result::Result<T, MailshotError>;

/// Main error type for the dispatch engine.
#[derive(Error, Debug)]
pub enum MailshotError {
    /// Campaign not found
    #[error("Campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    /// Recipient not found
    #[error("Recipient not found: {0}")]
    RecipientNotFound(RecipientId),

    /// Message not found
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    /// Campaign is in an invalid state for the requested operation
    #[error("Invalid state transition: campaign {0} is in state '{1}', expected '{2}'")]
    InvalidState(CampaignId, String, String),

    /// Validation error (e.g., campaign window ends before it starts)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// The campaign deadline passed before the operation could finish
    #[error("Campaign deadline exceeded")]
    DeadlineExceeded,

    /// Engine is shutting down
    #[error("Engine is shutting down")]
    Shutdown,

    /// The transport rejected or failed to deliver a message
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MailshotError {
    /// Whether a send that failed with this error is worth another attempt.
    ///
    /// Builder errors (bad URL, bad header) and validation errors will fail the
    /// same way every time, and nothing is retried past the deadline or
    /// during shutdown.
    pub fn is_retriable(&self) -> bool {
        match self {
            MailshotError::HttpClient(e) => !e.is_builder(),
            MailshotError::ValidationError(_)
            | MailshotError::DeadlineExceeded
            | MailshotError::Shutdown => false,
            _ => true,
        }
    }
}
