//! Per-recipient dispatch with bounded retry.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use metrics::counter;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::retry::RetryPolicy;
use super::types::EngineCounters;
use crate::domain::campaign::CampaignId;
use crate::domain::message::{Message, MessageId};
use crate::domain::recipient::{Recipient, RecipientId};
use crate::error::{MailshotError, Result};
use crate::store::CampaignStore;
use crate::transport::MessageTransport;

/// How a single dispatch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The transport accepted the message.
    Delivered { message_id: MessageId, attempts: u32 },
    /// Every permitted attempt failed.
    Failed { message_id: MessageId, attempts: u32 },
    /// The message record could not be created, so nothing was sent.
    NotCreated,
}

impl DispatchOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, DispatchOutcome::Delivered { .. })
    }
}

/// Sends one message to one recipient, recording the message's fate.
pub struct Dispatcher<S, T>
where
    S: CampaignStore,
    T: MessageTransport,
{
    store: Arc<S>,
    transport: Arc<T>,
    retry: RetryPolicy,
    counters: Arc<EngineCounters>,
}

impl<S, T> Dispatcher<S, T>
where
    S: CampaignStore,
    T: MessageTransport,
{
    pub fn new(store: Arc<S>, transport: Arc<T>, retry: RetryPolicy) -> Self {
        Self {
            store,
            transport,
            retry,
            counters: Arc::new(EngineCounters::default()),
        }
    }

    /// Share the engine's counters instead of private ones.
    pub(crate) fn with_counters(mut self, counters: Arc<EngineCounters>) -> Self {
        self.counters = counters;
        self
    }

    /// Dispatch a campaign message to `recipient`.
    ///
    /// Creates the message record, then tries the transport up to the retry
    /// policy's limit. Every attempt is bounded by `deadline` and by `cancel`;
    /// an attempt cut short by either counts as failed and ends the dispatch.
    /// Store errors on the final status write are logged only.
    #[tracing::instrument(skip_all, fields(campaign_id = %campaign_id, recipient_id = %recipient.id))]
    pub async fn dispatch(
        &self,
        campaign_id: CampaignId,
        recipient: &Recipient,
        text: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        self.counters
            .messages_in_flight
            .fetch_add(1, Ordering::Relaxed);
        let _guard = scopeguard::guard((), |_| {
            self.counters
                .messages_in_flight
                .fetch_sub(1, Ordering::Relaxed);
        });

        let message =
            match Message::create(Some(campaign_id), recipient.id, self.store.as_ref()).await {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create message, not sending");
                    self.counters.messages_failed.fetch_add(1, Ordering::Relaxed);
                    return DispatchOutcome::NotCreated;
                }
            };
        let message_id = message.data.id;
        let max_attempts = self.retry.attempts();

        let mut attempt = 0;
        let error = loop {
            attempt += 1;
            let result = tokio::select! {
                result = tokio::time::timeout_at(
                    deadline,
                    self.transport.send(message_id, recipient.phone, text, Some(deadline)),
                ) => result.unwrap_or_else(|_| Err(MailshotError::DeadlineExceeded)),
                _ = cancel.cancelled() => Err(MailshotError::Shutdown),
            };

            let e = match result {
                Ok(()) => {
                    counter!("mailshot_send_attempts_total", "outcome" => "success").increment(1);
                    message.succeed(attempt, self.store.as_ref()).await;
                    self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(message_id = %message_id, attempt, "Message delivered");
                    return DispatchOutcome::Delivered {
                        message_id,
                        attempts: attempt,
                    };
                }
                Err(e) => e,
            };
            counter!("mailshot_send_attempts_total", "outcome" => "failure").increment(1);

            if attempt >= max_attempts || !e.is_retriable() {
                break e;
            }

            let delay = self.retry.delay_after(attempt);
            if Instant::now() + delay >= deadline {
                tracing::debug!(
                    message_id = %message_id,
                    attempt,
                    "Next attempt would start after the deadline, giving up"
                );
                break e;
            }

            tracing::warn!(
                message_id = %message_id,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Send failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break MailshotError::Shutdown,
            }
        };

        tracing::error!(
            message_id = %message_id,
            attempts = attempt,
            error = %error,
            "Could not deliver message"
        );
        self.counters.messages_failed.fetch_add(1, Ordering::Relaxed);
        message
            .fail(attempt, error.to_string(), self.store.as_ref())
            .await;

        DispatchOutcome::Failed {
            message_id,
            attempts: attempt,
        }
    }

    /// Send a single message outside any campaign.
    ///
    /// One attempt only, no deadline beyond the transport's own timeout. The
    /// message is recorded without an owning campaign.
    #[tracing::instrument(skip_all, fields(recipient_id = %recipient_id))]
    pub async fn send_standalone(&self, recipient_id: RecipientId, text: &str) -> Result<MessageId> {
        let recipient = self.store.get_recipient(recipient_id).await?;
        let message = Message::create(None, recipient.id, self.store.as_ref()).await?;
        let message_id = message.data.id;

        match self
            .transport
            .send(message_id, recipient.phone, text, None)
            .await
        {
            Ok(()) => {
                message.succeed(1, self.store.as_ref()).await;
                tracing::info!(message_id = %message_id, "Standalone message delivered");
                Ok(message_id)
            }
            Err(e) => {
                tracing::warn!(message_id = %message_id, error = %e, "Standalone message failed");
                message.fail(1, e.to_string(), self.store.as_ref()).await;
                Err(e)
            }
        }
    }
}
