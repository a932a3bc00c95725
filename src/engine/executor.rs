//! Runs a single campaign from claim to a terminal status.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::EngineConfig;
use super::dispatcher::Dispatcher;
use super::retry::RetryPolicy;
use super::types::EngineCounters;
use crate::domain::campaign::{Campaign, Pending};
use crate::domain::stats::CampaignStats;
use crate::error::Result;
use crate::store::CampaignStore;
use crate::transport::MessageTransport;

/// Terminal result of one executor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The end time had already passed when the run started.
    Invalid,
    /// Another run claimed the campaign first; nothing was done.
    Skipped,
    /// Recipients could not be fetched.
    Failed,
    /// Every matched recipient was dispatched.
    Done(CampaignStats),
    /// The deadline or shutdown stopped the run before every recipient was dispatched.
    Canceled(CampaignStats),
}

impl RunOutcome {
    pub fn stats(&self) -> Option<&CampaignStats> {
        match self {
            RunOutcome::Done(stats) | RunOutcome::Canceled(stats) => Some(stats),
            _ => None,
        }
    }
}

/// Why the dispatch loop stopped launching.
enum Launch {
    Permit(Option<OwnedSemaphorePermit>),
    Stop,
}

/// Drives campaign runs, fanning out one dispatch task per matched recipient.
pub struct CampaignExecutor<S, T>
where
    S: CampaignStore,
    T: MessageTransport,
{
    store: Arc<S>,
    dispatcher: Arc<Dispatcher<S, T>>,
    max_concurrent_dispatches: Option<usize>,
}

impl<S, T> CampaignExecutor<S, T>
where
    S: CampaignStore + 'static,
    T: MessageTransport + 'static,
{
    pub fn new(store: Arc<S>, transport: Arc<T>, config: &EngineConfig) -> Self {
        Self::with_counters(store, transport, config, Arc::default())
    }

    pub(crate) fn with_counters(
        store: Arc<S>,
        transport: Arc<T>,
        config: &EngineConfig,
        counters: Arc<EngineCounters>,
    ) -> Self {
        let dispatcher =
            Dispatcher::new(store.clone(), transport, RetryPolicy::from(config)).with_counters(counters);
        Self {
            store,
            dispatcher: Arc::new(dispatcher),
            max_concurrent_dispatches: config.max_concurrent_dispatches,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<S, T> {
        &self.dispatcher
    }

    /// Run `campaign` to a terminal status.
    ///
    /// Only a failed claim is returned as an error; every other failure is
    /// recorded on the campaign and reported through [`RunOutcome`].
    /// Cancelling `cancel` ends the run the same way its deadline does.
    #[tracing::instrument(skip_all, fields(campaign_id = %campaign.data.id))]
    pub async fn run(
        &self,
        campaign: Campaign<Pending>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let store = self.store.as_ref();

        if campaign.is_expired(Utc::now()) {
            campaign.invalidate(store).await;
            return Ok(RunOutcome::Invalid);
        }

        let Some(campaign) = campaign.claim(store).await? else {
            return Ok(RunOutcome::Skipped);
        };

        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = clock
            + (campaign.data.end_time - started_at)
                .to_std()
                .unwrap_or_default();
        let campaign_id = campaign.data.id;

        tracing::info!(
            end_time = %campaign.data.end_time,
            filter = ?campaign.data.filter,
            "Campaign executing"
        );

        let recipients = match store.match_recipients(&campaign.data.filter).await {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch recipients, failing campaign");
                campaign.fail(e.to_string(), store).await;
                return Ok(RunOutcome::Failed);
            }
        };

        let matches = recipients.len() as u64;
        tracing::debug!(matches, "Matched recipients");

        let sent = Arc::new(AtomicU64::new(0));
        let fails = Arc::new(AtomicU64::new(0));
        let slots = self
            .max_concurrent_dispatches
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let text: Arc<str> = Arc::from(campaign.data.text.as_str());

        let mut tasks = JoinSet::new();
        let mut cut_short = false;

        for recipient in recipients {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                cut_short = true;
                break;
            }

            let launch = match &slots {
                Some(slots) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Launch::Stop,
                    _ = tokio::time::sleep_until(deadline) => Launch::Stop,
                    permit = slots.clone().acquire_owned() => match permit {
                        Ok(permit) => Launch::Permit(Some(permit)),
                        Err(_) => Launch::Stop,
                    },
                },
                None => Launch::Permit(None),
            };
            let Launch::Permit(permit) = launch else {
                cut_short = true;
                break;
            };

            let dispatcher = self.dispatcher.clone();
            let text = text.clone();
            let sent = sent.clone();
            let fails = fails.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let outcome = dispatcher
                    .dispatch(campaign_id, &recipient, &text, deadline, &cancel)
                    .await;
                if outcome.is_failure() {
                    fails.fetch_add(1, Ordering::Relaxed);
                }
                sent.fetch_add(1, Ordering::Relaxed);
            });
        }

        if cut_short {
            tracing::info!(
                launched = tasks.len(),
                matches,
                shutdown = cancel.is_cancelled(),
                "Campaign cut short, waiting for launched dispatches"
            );
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatch task panicked");
                fails.fetch_add(1, Ordering::Relaxed);
                sent.fetch_add(1, Ordering::Relaxed);
            }
        }

        let stats = CampaignStats {
            campaign_id,
            matches,
            sent: sent.load(Ordering::Relaxed),
            fails: fails.load(Ordering::Relaxed),
            started_at,
            elapsed: clock.elapsed(),
        };

        if cut_short {
            campaign.cancel(&stats, store).await;
            tracing::info!(
                sent = stats.sent,
                fails = stats.fails,
                delivered = stats.delivered(),
                "Campaign canceled"
            );
            Ok(RunOutcome::Canceled(stats))
        } else {
            campaign.complete(&stats, store).await;
            tracing::info!(
                sent = stats.sent,
                fails = stats.fails,
                delivered = stats.delivered(),
                elapsed_ms = stats.elapsed.as_millis() as u64,
                "Campaign done"
            );
            Ok(RunOutcome::Done(stats))
        }
    }
}
