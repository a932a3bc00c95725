//! Recipients addressable by campaigns.
//!
//! Recipients are read-only from the engine's point of view; selection is
//! delegated to the store through a [`RecipientFilter`](crate::domain::campaign::RecipientFilter).

use serde::{Deserialize, Serialize};

/// A recipient eligible to receive campaign messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    /// Phone number the transport delivers to
    pub phone: i64,
    pub operator_code: i32,
    pub tag: String,
    pub timezone: String,
}

/// Partial edit of a recipient.
///
/// `None`, zero and empty values leave the stored field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientUpdate {
    pub phone: Option<i64>,
    pub operator_code: Option<i32>,
    pub tag: Option<String>,
    pub timezone: Option<String>,
}

impl Recipient {
    pub fn apply(&mut self, update: &RecipientUpdate) {
        if let Some(phone) = update.phone.filter(|p| *p != 0) {
            self.phone = phone;
        }
        if let Some(operator_code) = update.operator_code.filter(|c| *c != 0) {
            self.operator_code = operator_code;
        }
        if let Some(tag) = update.tag.as_ref().filter(|t| !t.is_empty()) {
            self.tag = tag.clone();
        }
        if let Some(timezone) = update.timezone.as_ref().filter(|t| !t.is_empty()) {
            self.timezone = timezone.clone();
        }
    }
}

/// Unique identifier for a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub i64);

impl std::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RecipientId {
    fn from(id: i64) -> Self {
        RecipientId(id)
    }
}
