//! Scheduler loop that discovers due campaigns and launches executor runs.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::campaign::CampaignId;
use crate::domain::message::MessageId;
use crate::domain::recipient::RecipientId;
use crate::error::Result;
use crate::store::CampaignStore;
use crate::transport::MessageTransport;

pub mod dispatcher;
pub mod executor;
pub mod retry;
pub mod types;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use executor::{CampaignExecutor, RunOutcome};
pub use retry::RetryPolicy;
pub use types::{EngineId, EngineInfo, EngineStats};

use types::{EngineCounters, get_hostname, get_pid, get_version};

/// Configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long to wait between discovery ticks
    pub poll_interval_ms: u64,

    /// Send attempts per recipient, including the first
    pub max_attempts: u32,

    /// Delay between failed attempts in milliseconds
    pub retry_delay_ms: u64,

    /// Factor by which the delay grows after each failure (1 keeps it fixed)
    pub backoff_factor: u64,

    /// Maximum delay between attempts in milliseconds
    pub max_retry_delay_ms: u64,

    /// Campaign runs allowed at once; `None` means unbounded
    pub max_concurrent_campaigns: Option<usize>,

    /// Dispatches allowed at once within one campaign run; `None` means unbounded
    pub max_concurrent_dispatches: Option<usize>,

    /// Interval for logging engine status in milliseconds
    /// Set to None to disable periodic status logging
    pub status_log_interval_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            max_attempts: 3,
            retry_delay_ms: 1000,
            backoff_factor: 1,
            max_retry_delay_ms: 1000,
            max_concurrent_campaigns: Some(16),
            max_concurrent_dispatches: Some(64),
            status_log_interval_ms: Some(10_000),
        }
    }
}

/// Campaign dispatch engine.
///
/// Every `poll_interval_ms` the engine asks the store for pending campaigns
/// and launches one [`CampaignExecutor`] run per campaign whose start time has
/// arrived. Runs are independent tasks; the loop never waits on them until
/// shutdown, when it stops ticking and drains every run it launched.
pub struct Engine<S, T>
where
    S: CampaignStore,
    T: MessageTransport,
{
    engine_id: EngineId,
    store: Arc<S>,
    executor: Arc<CampaignExecutor<S, T>>,
    config: EngineConfig,
    counters: Arc<EngineCounters>,
    /// Campaigns with a run in progress, never launched twice
    active: Arc<DashMap<CampaignId, ()>>,
    campaign_slots: Option<Arc<Semaphore>>,
    shutdown_token: CancellationToken,
}

impl<S, T> Engine<S, T>
where
    S: CampaignStore + 'static,
    T: MessageTransport + 'static,
{
    /// Create a new engine.
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        config: EngineConfig,
        shutdown_token: CancellationToken,
    ) -> Self {
        let counters = Arc::new(EngineCounters::default());
        let executor =
            CampaignExecutor::with_counters(store.clone(), transport, &config, counters.clone());
        Self {
            engine_id: EngineId::from(uuid::Uuid::new_v4()),
            store,
            executor: Arc::new(executor),
            campaign_slots: config
                .max_concurrent_campaigns
                .map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
            config,
            counters,
            active: Arc::new(DashMap::new()),
            shutdown_token,
        }
    }

    pub fn id(&self) -> EngineId {
        self.engine_id
    }

    pub fn info(&self) -> Result<EngineInfo> {
        Ok(EngineInfo {
            id: self.engine_id,
            hostname: get_hostname(),
            pid: get_pid(),
            version: get_version(),
            config_snapshot: serde_json::to_value(&self.config)?,
        })
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    /// Send one message outside any campaign. See [`Dispatcher::send_standalone`].
    pub async fn send_standalone(&self, recipient_id: RecipientId, text: &str) -> Result<MessageId> {
        self.executor
            .dispatcher()
            .send_standalone(recipient_id, text)
            .await
    }

    /// Run the engine on its own task.
    ///
    /// The handle resolves once the shutdown token is cancelled and every
    /// campaign run has finished.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    /// Run the scheduler loop until the shutdown token is cancelled.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let info = self.info()?;
        tracing::info!(
            engine_id = %info.id,
            hostname = %info.hostname,
            pid = info.pid,
            version = %info.version,
            config = %info.config_snapshot,
            "Engine starting"
        );

        // Spawn periodic status logging task if configured
        if let Some(interval_ms) = self.config.status_log_interval_ms {
            let counters = self.counters.clone();
            let engine_id = self.engine_id;
            let shutdown_token = self.shutdown_token.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            let stats = counters.snapshot();
                            tracing::debug!(
                                engine_id = %engine_id,
                                campaigns_running = stats.campaigns_running,
                                messages_in_flight = stats.messages_in_flight,
                                messages_sent = stats.messages_sent,
                                messages_failed = stats.messages_failed,
                                "Engine status"
                            );
                        }
                        _ = shutdown_token.cancelled() => break,
                    }
                }
            });
        }

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut runs: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = interval.tick() => {},
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }

            // Reap finished runs (non-blocking)
            while let Some(result) = runs.try_join_next() {
                if let Err(join_error) = result {
                    tracing::error!(error = %join_error, "Campaign run panicked");
                }
            }

            self.tick(&mut runs).await;
        }

        tracing::info!(running = runs.len(), "Waiting for campaign runs to finish");
        while let Some(result) = runs.join_next().await {
            if let Err(join_error) = result {
                tracing::error!(error = %join_error, "Campaign run panicked");
            }
        }

        tracing::info!(engine_id = %self.engine_id, "Engine stopped");
        Ok(())
    }

    /// One discovery pass: launch a run for every due campaign not already running.
    async fn tick(&self, runs: &mut JoinSet<()>) {
        let campaigns = match self.store.list_due_campaigns().await {
            Ok(campaigns) => campaigns,
            Err(e) => {
                counter!("mailshot_scheduler_tick_errors_total").increment(1);
                tracing::error!(error = %e, "Failed to list due campaigns, skipping tick");
                return;
            }
        };

        let now = Utc::now();
        let mut launched = 0usize;

        for campaign in campaigns {
            if !campaign.is_due(now) {
                continue;
            }

            let campaign_id = campaign.data.id;
            if self.active.insert(campaign_id, ()).is_some() {
                tracing::trace!(campaign_id = %campaign_id, "Campaign already running");
                continue;
            }

            let executor = self.executor.clone();
            let active = self.active.clone();
            let counters = self.counters.clone();
            let slots = self.campaign_slots.clone();
            let cancel = self.shutdown_token.child_token();

            runs.spawn(async move {
                let _active = scopeguard::guard((), |_| {
                    active.remove(&campaign_id);
                });

                // Permit is held for the duration of the run
                let _permit = match slots {
                    Some(slots) => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::debug!(campaign_id = %campaign_id, "Shutdown before campaign slot was free");
                            return;
                        }
                        permit = slots.acquire_owned() => permit.ok(),
                    },
                    None => None,
                };

                counters.campaigns_running.fetch_add(1, Ordering::Relaxed);
                let _running = scopeguard::guard((), |_| {
                    counters.campaigns_running.fetch_sub(1, Ordering::Relaxed);
                });

                match executor.run(campaign, &cancel).await {
                    Ok(outcome) => {
                        tracing::debug!(campaign_id = %campaign_id, outcome = ?outcome, "Campaign run finished");
                    }
                    Err(e) => {
                        tracing::error!(campaign_id = %campaign_id, error = %e, "Campaign run failed");
                    }
                }
            });
            launched += 1;
        }

        if launched > 0 {
            tracing::info!(launched, "Launched campaign runs");
        } else {
            tracing::trace!("No due campaigns");
        }
    }
}

/// Run an engine with default settings and the given poll interval until
/// `shutdown` is cancelled.
pub async fn start_engine<S, T>(
    store: Arc<S>,
    transport: Arc<T>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: CampaignStore + 'static,
    T: MessageTransport + 'static,
{
    let config = EngineConfig {
        poll_interval_ms: poll_interval.as_millis() as u64,
        ..Default::default()
    };
    Arc::new(Engine::new(store, transport, config, shutdown))
        .run()
        .await
}
