//! State transitions for campaigns using the typestate pattern.
//!
//! ```text
//! Campaign<Pending> ──claim()──────> Campaign<Executing> ──complete()──> Campaign<Done>
//!       │                                   │
//!       │                                   ├──cancel()────> Campaign<Canceled>
//!       │                                   └──fail()──────> Campaign<Failed>
//!       └──invalidate()──> Campaign<Invalid>
//! ```
//!
//! Only `claim()` can fail: a campaign that could not be marked `Executing`
//! must not dispatch anything. Every terminal transition has already been
//! decided by the time it is persisted, so store errors there are logged and
//! the typed campaign is returned regardless.
//!
//! `complete()` and `cancel()` also record the run's [`CampaignStats`].
//! `fail()` and `invalidate()` never do.

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::domain::stats::CampaignStats;
use crate::error::Result;
use crate::store::CampaignStore;

use super::state::{
    Campaign, CampaignStatus, Canceled, Done, Executing, Failed, Invalid, Pending,
};

impl Campaign<Pending> {
    /// Whether the start time has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.data.start_time <= now
    }

    /// Whether the end time has already passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.data.end_time
    }

    /// Claim the campaign for execution.
    ///
    /// Returns `Ok(None)` when another run got there first.
    pub async fn claim<S: CampaignStore + ?Sized>(
        self,
        store: &S,
    ) -> Result<Option<Campaign<Executing>>> {
        if !store.claim_campaign(self.data.id).await? {
            tracing::debug!(campaign_id = %self.data.id, "Campaign already claimed, skipping");
            return Ok(None);
        }
        record_transition(CampaignStatus::Executing);

        Ok(Some(Campaign {
            data: self.data,
            state: Executing {
                claimed_at: Utc::now(),
            },
        }))
    }

    /// Mark a campaign whose window closed before it was ever started.
    pub async fn invalidate<S: CampaignStore + ?Sized>(self, store: &S) -> Campaign<Invalid> {
        tracing::warn!(
            campaign_id = %self.data.id,
            end_time = %self.data.end_time,
            "Campaign end time already passed, marking invalid"
        );
        persist_status(store, &self, CampaignStatus::Invalid).await;

        Campaign {
            data: self.data,
            state: Invalid {
                marked_at: Utc::now(),
            },
        }
    }
}

impl Campaign<Executing> {
    /// Every matched recipient was dispatched.
    pub async fn complete<S: CampaignStore + ?Sized>(
        self,
        stats: &CampaignStats,
        store: &S,
    ) -> Campaign<Done> {
        persist_status(store, &self, CampaignStatus::Done).await;
        persist_stats(store, &self, stats).await;

        Campaign {
            data: self.data,
            state: Done {
                claimed_at: self.state.claimed_at,
                finished_at: Utc::now(),
            },
        }
    }

    /// The run was cut short by its deadline or by engine shutdown.
    pub async fn cancel<S: CampaignStore + ?Sized>(
        self,
        stats: &CampaignStats,
        store: &S,
    ) -> Campaign<Canceled> {
        persist_status(store, &self, CampaignStatus::Canceled).await;
        persist_stats(store, &self, stats).await;

        Campaign {
            data: self.data,
            state: Canceled {
                claimed_at: self.state.claimed_at,
                canceled_at: Utc::now(),
            },
        }
    }

    /// The run could not start dispatching at all.
    pub async fn fail<S: CampaignStore + ?Sized>(
        self,
        reason: String,
        store: &S,
    ) -> Campaign<Failed> {
        persist_status(store, &self, CampaignStatus::Failed).await;

        Campaign {
            data: self.data,
            state: Failed {
                reason,
                failed_at: Utc::now(),
            },
        }
    }
}

async fn persist_status<S, T>(store: &S, campaign: &Campaign<T>, status: CampaignStatus)
where
    S: CampaignStore + ?Sized,
    T: super::state::CampaignState,
{
    record_transition(status);
    if let Err(e) = store
        .transition_campaign_status(campaign.data.id, status)
        .await
    {
        tracing::error!(
            campaign_id = %campaign.data.id,
            status = %status,
            error = %e,
            "Failed to persist campaign status"
        );
    }
}

async fn persist_stats<S: CampaignStore + ?Sized>(
    store: &S,
    campaign: &Campaign<Executing>,
    stats: &CampaignStats,
) {
    if let Err(e) = store.record_campaign_stats(stats).await {
        tracing::error!(
            campaign_id = %campaign.data.id,
            error = %e,
            "Failed to record campaign stats"
        );
    }
}

fn record_transition(status: CampaignStatus) {
    counter!("mailshot_campaigns_total", "status" => status.as_str()).increment(1);
}
