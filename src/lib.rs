//! Timed bulk-message campaigns with deadline-bounded dispatch.
//!
//! An [`Engine`] polls a [`CampaignStore`] for pending campaigns whose start
//! time has arrived and runs each one on its own task. A run claims the
//! campaign, fetches the recipients its filter matches and fans out one send
//! per recipient through a [`MessageTransport`], retrying failed sends a
//! bounded number of times. Nothing new is launched once the campaign's end
//! time passes. Outcomes are written back to the store as message statuses
//! and one [`CampaignStats`] record per finished run.
//!
//! Storage and delivery are traits so the engine can be driven against
//! [`InMemoryCampaignStore`] and [`MockTransport`] in tests.

pub mod domain;
pub mod engine;
pub mod error;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use domain::campaign::{
    Campaign, CampaignData, CampaignId, CampaignRecord, CampaignStatus, CampaignUpdate,
    RecipientFilter,
};
pub use domain::message::{MessageId, MessageRecord, MessageStatus};
pub use domain::recipient::{Recipient, RecipientId, RecipientUpdate};
pub use domain::stats::{CampaignStats, DetailedCampaignStats};
pub use engine::{
    CampaignExecutor, DispatchOutcome, Dispatcher, Engine, EngineConfig, EngineInfo, EngineStats,
    RetryPolicy, RunOutcome, start_engine,
};
pub use error::{MailshotError, Result};
pub use store::{CampaignStore, InMemoryCampaignStore};
pub use transport::{MessageTransport, MockTransport, ReqwestTransport, TransportConfig};
