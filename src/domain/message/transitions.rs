//! State transitions for messages.
//!
//! ```text
//! Message::create() ──> Message<Pending> ──succeed()──> Message<Succeeded>
//!                                      └──fail()─────> Message<Failed>
//! ```
//!
//! Creation is the only fallible step: without a message id there is nothing
//! to send. The final status write happens after the outcome is decided, so
//! failures there are logged and do not change the outcome.

use chrono::Utc;
use metrics::counter;

use crate::domain::campaign::CampaignId;
use crate::domain::recipient::RecipientId;
use crate::error::Result;
use crate::store::CampaignStore;

use super::state::{Failed, Message, MessageData, MessageStatus, Pending, Succeeded};

impl Message<Pending> {
    /// Persist a new pending message for `recipient_id`.
    pub async fn create<S: CampaignStore + ?Sized>(
        campaign_id: Option<CampaignId>,
        recipient_id: RecipientId,
        store: &S,
    ) -> Result<Message<Pending>> {
        let created_at = Utc::now();
        let id = store.create_message(campaign_id, recipient_id).await?;

        Ok(Message {
            state: Pending {},
            data: MessageData {
                id,
                created_at,
                campaign_id,
                recipient_id,
            },
        })
    }

    pub async fn succeed<S: CampaignStore + ?Sized>(
        self,
        attempts: u32,
        store: &S,
    ) -> Message<Succeeded> {
        persist_status(store, &self.data, MessageStatus::Success).await;

        Message {
            data: self.data,
            state: Succeeded {
                attempts,
                sent_at: Utc::now(),
            },
        }
    }

    pub async fn fail<S: CampaignStore + ?Sized>(
        self,
        attempts: u32,
        error: String,
        store: &S,
    ) -> Message<Failed> {
        persist_status(store, &self.data, MessageStatus::Failed).await;

        Message {
            data: self.data,
            state: Failed {
                attempts,
                error,
                failed_at: Utc::now(),
            },
        }
    }
}

async fn persist_status<S: CampaignStore + ?Sized>(
    store: &S,
    data: &MessageData,
    status: MessageStatus,
) {
    counter!("mailshot_messages_total", "status" => status.as_str()).increment(1);
    if let Err(e) = store.transition_message_status(data.id, status).await {
        tracing::error!(
            message_id = %data.id,
            recipient_id = %data.recipient_id,
            status = %status,
            error = %e,
            "Failed to persist message status"
        );
    }
}
