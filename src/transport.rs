//! Message transport abstraction for outbound sends.
//!
//! This module defines the `MessageTransport` trait to abstract message
//! delivery, enabling testability with mock implementations.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::message::MessageId;
use crate::error::{MailshotError, Result};

/// Trait for delivering one message to one recipient.
///
/// # Example
/// ```ignore
/// let transport = ReqwestTransport::new(TransportConfig::default());
/// transport.send(MessageId(1), 79001234567, "hello", None).await?;
/// ```
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Send `text` to the recipient at `phone`.
    ///
    /// When `deadline` is set the call must give up once it passes. Any error
    /// is treated as a failed attempt; [`MailshotError::is_retriable`] decides
    /// whether another attempt is made.
    async fn send(
        &self,
        message_id: MessageId,
        phone: i64,
        text: &str,
        deadline: Option<Instant>,
    ) -> Result<()>;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Settings for [`ReqwestTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the send API; messages are POSTed to `{base_url}/send/{message_id}`
    pub base_url: String,

    /// Bearer token sent in the Authorization header, omitted when empty
    #[serde(default, skip_serializing)]
    pub token: String,

    /// Per-call timeout in milliseconds, shortened further by the campaign deadline
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            token: String::new(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Serialize)]
struct SendPayload<'a> {
    id: i64,
    phone: i64,
    text: &'a str,
}

/// Production transport posting JSON to an HTTP send API.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl ReqwestTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Time left for this call: the configured timeout, cut to the deadline.
    fn effective_timeout(&self, deadline: Option<Instant>) -> Result<Duration> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(MailshotError::DeadlineExceeded);
                }
                Ok(timeout.min(remaining))
            }
            None => Ok(timeout),
        }
    }
}

#[async_trait]
impl MessageTransport for ReqwestTransport {
    #[tracing::instrument(skip_all, fields(message_id = %message_id))]
    async fn send(
        &self,
        message_id: MessageId,
        phone: i64,
        text: &str,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let timeout = self.effective_timeout(deadline)?;
        let url = format!(
            "{}/send/{}",
            self.config.base_url.trim_end_matches('/'),
            message_id
        );

        tracing::debug!(url = %url, timeout_ms = timeout.as_millis() as u64, "Sending message");

        let mut req = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&SendPayload {
                id: message_id.0,
                phone,
                text,
            });

        // Only add Authorization header if a token is configured
        if !self.config.token.is_empty() {
            req = req.bearer_auth(&self.config.token);
        }

        let response = req.send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "Send request failed");
            e
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body, "Send API rejected message");
            return Err(MailshotError::Transport(format!(
                "send API returned {}: {}",
                status, body
            )));
        }

        tracing::debug!("Message accepted by send API");
        Ok(())
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

/// Mock transport for testing.
///
/// Responses are queued per phone number and handed out in FIFO order. A send
/// to a phone with no queued response fails.
///
/// # Example
/// ```ignore
/// let mock = MockTransport::new();
/// mock.add_response(79001234567, Ok(()));
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    responses: Arc<Mutex<HashMap<i64, Vec<MockResponse>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
}

/// A mock response that can optionally wait for a trigger before completing.
enum MockResponse {
    Immediate(Result<()>),
    Triggered {
        response: Result<()>,
        trigger: oneshot::Receiver<()>,
    },
}

/// Record of a call made to the mock transport.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub message_id: MessageId,
    pub phone: i64,
    pub text: String,
    pub deadline: Option<Instant>,
    pub at: Instant,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for sends to `phone`.
    pub fn add_response(&self, phone: i64, response: Result<()>) {
        self.responses
            .lock()
            .entry(phone)
            .or_default()
            .push(MockResponse::Immediate(response));
    }

    /// Queue `count` transport failures for `phone`.
    pub fn add_failures(&self, phone: i64, count: usize) {
        for attempt in 1..=count {
            self.add_response(
                phone,
                Err(MailshotError::Transport(format!(
                    "simulated failure #{}",
                    attempt
                ))),
            );
        }
    }

    /// Queue a response that waits for a manual trigger before completing.
    ///
    /// Returns a sender that, when triggered (by sending `()` or dropping),
    /// lets the send complete with the given response.
    pub fn add_response_with_trigger(&self, phone: i64, response: Result<()>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.responses
            .lock()
            .entry(phone)
            .or_default()
            .push(MockResponse::Triggered {
                response,
                trigger: rx,
            });
        tx
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Calls made for one phone number, in order.
    pub fn calls_for(&self, phone: i64) -> Vec<MockCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.phone == phone)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of sends currently executing.
    ///
    /// A send that is cut short by its deadline drops out of this count.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageTransport for MockTransport {
    async fn send(
        &self,
        message_id: MessageId,
        phone: i64,
        text: &str,
        deadline: Option<Instant>,
    ) -> Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.clone();
        let _guard = scopeguard::guard((), move |_| {
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        self.calls.lock().push(MockCall {
            message_id,
            phone,
            text: text.to_string(),
            deadline,
            at: Instant::now(),
        });

        let mock_response = {
            let mut responses = self.responses.lock();
            match responses.get_mut(&phone) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };

        match mock_response {
            Some(MockResponse::Immediate(response)) => response,
            Some(MockResponse::Triggered { response, trigger }) => {
                // Proceed on trigger or on sender drop alike
                let _ = trigger.await;
                response
            }
            None => Err(MailshotError::Transport(format!(
                "No mock response configured for {}",
                phone
            ))),
        }
    }
}
