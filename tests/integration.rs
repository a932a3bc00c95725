use chrono::Utc;
use mailshot::{
    CampaignData, CampaignId, CampaignRecord, CampaignStatus, CampaignStore, CampaignUpdate, Engine,
    EngineConfig, InMemoryCampaignStore, MessageStatus, MockTransport, Recipient, RecipientFilter, RecipientId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn fast_config() -> EngineConfig {
    EngineConfig {
        poll_interval_ms: 20,
        retry_delay_ms: 20,
        max_retry_delay_ms: 20,
        status_log_interval_ms: None, // Disable status logging in tests
        ..Default::default()
    }
}

fn recipient(id: i64, tag: &str) -> Recipient {
    Recipient {
        id: RecipientId(id),
        phone: 79_000_000_000 + id,
        operator_code: 900 + (id % 2) as i32,
        tag: tag.to_string(),
        timezone: "Europe/Moscow".to_string(),
    }
}

struct Harness {
    store: Arc<InMemoryCampaignStore>,
    transport: Arc<MockTransport>,
    engine: Arc<Engine<InMemoryCampaignStore, MockTransport>>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<mailshot::Result<()>>>,
}

impl Harness {
    fn new(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryCampaignStore::new());
        let transport = Arc::new(MockTransport::new());
        let shutdown = CancellationToken::new();
        let engine = Arc::new(Engine::new(
            store.clone(),
            transport.clone(),
            config,
            shutdown.clone(),
        ));
        Self {
            store,
            transport,
            engine,
            shutdown,
            handle: None,
        }
    }

    fn start(&mut self) {
        self.handle = Some(self.engine.clone().spawn());
    }

    async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .expect("Engine task panicked")
                .expect("Engine returned an error");
        }
    }

    async fn add_recipients(&self, recipients: &[Recipient]) {
        for r in recipients {
            self.store
                .save_recipient(r.clone())
                .await
                .expect("Failed to save recipient");
        }
    }

    async fn add_campaign(
        &self,
        filter: RecipientFilter,
        start_in: chrono::Duration,
        end_in: chrono::Duration,
    ) -> CampaignId {
        let now = Utc::now();
        let data = CampaignData::new("Spring sale", filter, now + start_in, now + end_in);
        let id = data.id;
        self.store
            .save_campaign(data)
            .await
            .expect("Failed to save campaign");
        id
    }

    /// Poll until the campaign reaches a terminal status (with timeout).
    async fn wait_terminal(&self, id: CampaignId, timeout: Duration) -> CampaignRecord {
        let start = tokio::time::Instant::now();
        loop {
            let record = self
                .store
                .get_campaign(id)
                .await
                .expect("Failed to get campaign");
            if record.status.is_terminal() {
                return record;
            }
            assert!(
                start.elapsed() < timeout,
                "Campaign {} still {} after {:?}",
                id,
                record.status,
                timeout
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_all_recipients_succeed() {
    let mut h = Harness::new(fast_config());
    let recipients = [recipient(1, "a"), recipient(2, "a"), recipient(3, "a")];
    h.add_recipients(&recipients).await;
    for r in &recipients {
        h.transport.add_response(r.phone, Ok(()));
    }

    let id = h
        .add_campaign(
            RecipientFilter::default(),
            chrono::Duration::zero(),
            chrono::Duration::minutes(1),
        )
        .await;
    h.start();

    let record = h.wait_terminal(id, Duration::from_secs(5)).await;
    h.stop().await;

    assert_eq!(record.status, CampaignStatus::Done);
    let stats = h.store.get_stats(id).await.unwrap().expect("Stats missing");
    assert_eq!((stats.matches, stats.sent, stats.fails), (3, 3, 0));
    assert_eq!(h.transport.call_count(), 3);

    let messages = h.store.list_messages(id).await.unwrap();
    assert_eq!(messages.len(), 3);
    assert!(messages.iter().all(|m| m.status == MessageStatus::Success));
}

#[test_log::test(tokio::test)]
async fn test_recipient_exhausting_retries_is_counted_once() {
    let mut h = Harness::new(EngineConfig {
        retry_delay_ms: 50,
        max_retry_delay_ms: 50,
        ..fast_config()
    });
    let first = recipient(1, "a");
    let second = recipient(2, "a");
    h.add_recipients(&[first.clone(), second.clone()]).await;
    h.transport.add_response(first.phone, Ok(()));
    h.transport.add_failures(second.phone, 10);

    let id = h
        .add_campaign(
            RecipientFilter::default(),
            chrono::Duration::zero(),
            chrono::Duration::minutes(1),
        )
        .await;
    h.start();

    let record = h.wait_terminal(id, Duration::from_secs(5)).await;
    h.stop().await;

    assert_eq!(record.status, CampaignStatus::Done);
    let stats = h.store.get_stats(id).await.unwrap().expect("Stats missing");
    assert_eq!((stats.matches, stats.sent, stats.fails), (2, 2, 1));

    // Retry bound and spacing
    let calls = h.transport.calls_for(second.phone);
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(50));
    }
    assert_eq!(h.transport.calls_for(first.phone).len(), 1);

    // Failures sort first in the detailed view
    let detailed = h.store.detailed_stats(id).await.unwrap();
    assert_eq!(detailed.campaign.status, CampaignStatus::Done);
    assert_eq!(detailed.messages.len(), 2);
    assert_eq!(detailed.messages[0].status, MessageStatus::Failed);
    assert_eq!(detailed.messages[0].data.recipient_id, second.id);
    assert_eq!(detailed.messages[1].status, MessageStatus::Success);
    assert_eq!(detailed.messages[1].data.recipient_id, first.id);
}

#[test_log::test(tokio::test)]
async fn test_deadline_mid_dispatch_cancels_campaign() {
    let mut h = Harness::new(EngineConfig {
        max_concurrent_dispatches: Some(2),
        ..fast_config()
    });
    let recipients: Vec<_> = (1..=5).map(|i| recipient(i, "a")).collect();
    h.add_recipients(&recipients).await;
    // Sends stay open until the deadline cuts them short
    let _triggers: Vec<_> = recipients
        .iter()
        .map(|r| h.transport.add_response_with_trigger(r.phone, Ok(())))
        .collect();

    let id = h
        .add_campaign(
            RecipientFilter::default(),
            chrono::Duration::zero(),
            chrono::Duration::milliseconds(400),
        )
        .await;
    h.start();

    let record = h.wait_terminal(id, Duration::from_secs(5)).await;
    h.stop().await;

    assert_eq!(record.status, CampaignStatus::Canceled);
    let stats = h.store.get_stats(id).await.unwrap().expect("Stats missing");
    assert_eq!(stats.matches, 5);
    assert!(stats.sent <= 5);
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.fails, 2);

    // Nothing was launched after the deadline check fired
    assert_eq!(h.store.create_message_calls(), 2);
    assert_eq!(h.transport.call_count(), 2);
    for r in &recipients[2..] {
        assert!(h.transport.calls_for(r.phone).is_empty());
    }
}

#[test_log::test(tokio::test)]
async fn test_expired_campaign_is_invalid() {
    let mut h = Harness::new(fast_config());
    h.add_recipients(&[recipient(1, "a")]).await;

    let id = h
        .add_campaign(
            RecipientFilter::default(),
            chrono::Duration::hours(-2),
            chrono::Duration::hours(-1),
        )
        .await;
    h.start();

    let record = h.wait_terminal(id, Duration::from_secs(5)).await;
    h.stop().await;

    assert_eq!(record.status, CampaignStatus::Invalid);
    assert_eq!(h.store.create_message_calls(), 0);
    assert!(h.store.list_stats().await.unwrap().is_empty());
    assert_eq!(h.transport.call_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_future_campaign_waits_for_start_time() {
    let mut h = Harness::new(fast_config());
    let r = recipient(1, "a");
    h.add_recipients(std::slice::from_ref(&r)).await;
    h.transport.add_response(r.phone, Ok(()));

    let id = h
        .add_campaign(
            RecipientFilter::default(),
            chrono::Duration::milliseconds(300),
            chrono::Duration::minutes(1),
        )
        .await;
    let start_time = h.store.get_campaign(id).await.unwrap().data.start_time;
    h.start();

    // Several ticks pass before the start time
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        h.store.get_campaign(id).await.unwrap().status,
        CampaignStatus::Pending
    );
    assert_eq!(h.transport.call_count(), 0);

    let record = h.wait_terminal(id, Duration::from_secs(5)).await;
    h.stop().await;

    assert_eq!(record.status, CampaignStatus::Done);
    let messages = h.store.list_messages(id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].data.created_at >= start_time);
}

#[test_log::test(tokio::test)]
async fn test_discovery_failure_does_not_stop_scheduler() {
    let mut h = Harness::new(fast_config());
    let r = recipient(1, "a");
    h.add_recipients(std::slice::from_ref(&r)).await;
    h.transport.add_response(r.phone, Ok(()));
    let id = h
        .add_campaign(
            RecipientFilter::default(),
            chrono::Duration::zero(),
            chrono::Duration::minutes(1),
        )
        .await;

    h.store.set_fail_discovery(true);
    h.start();

    // Poll until the scheduler has failed a few ticks
    let start = tokio::time::Instant::now();
    while h.store.discovery_calls() < 3 {
        assert!(start.elapsed() < Duration::from_secs(5), "Scheduler stopped ticking");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        h.store.get_campaign(id).await.unwrap().status,
        CampaignStatus::Pending
    );

    h.store.set_fail_discovery(false);
    let record = h.wait_terminal(id, Duration::from_secs(5)).await;
    h.stop().await;

    assert_eq!(record.status, CampaignStatus::Done);
}

#[test_log::test(tokio::test)]
async fn test_filter_criteria_are_anded() {
    let mut h = Harness::new(fast_config());
    // Odd ids get operator 901, even ids 900
    let recipients = [
        recipient(1, "vip"),
        recipient(2, "vip"),
        recipient(3, "vip"),
        recipient(4, "regular"),
        recipient(5, "regular"),
    ];
    h.add_recipients(&recipients).await;
    for r in &recipients {
        h.transport.add_response(r.phone, Ok(()));
    }

    let id = h
        .add_campaign(
            RecipientFilter {
                operator_code: 901,
                tag: "vip".to_string(),
                timezone: String::new(),
            },
            chrono::Duration::zero(),
            chrono::Duration::minutes(1),
        )
        .await;
    h.start();

    h.wait_terminal(id, Duration::from_secs(5)).await;
    h.stop().await;

    let stats = h.store.get_stats(id).await.unwrap().expect("Stats missing");
    assert_eq!((stats.matches, stats.sent, stats.fails), (2, 2, 0));
    let mut targeted: Vec<_> = h
        .store
        .list_messages(id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.data.recipient_id)
        .collect();
    targeted.sort_by_key(|r| r.0);
    assert_eq!(targeted, vec![RecipientId(1), RecipientId(3)]);
}

#[test_log::test(tokio::test)]
async fn test_running_campaign_is_not_launched_twice() {
    let mut h = Harness::new(EngineConfig {
        poll_interval_ms: 10,
        ..fast_config()
    });
    let r = recipient(1, "a");
    h.add_recipients(std::slice::from_ref(&r)).await;
    let trigger = h.transport.add_response_with_trigger(r.phone, Ok(()));

    let id = h
        .add_campaign(
            RecipientFilter::default(),
            chrono::Duration::zero(),
            chrono::Duration::minutes(1),
        )
        .await;
    h.start();

    // Let many ticks pass while the only send is held open
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.engine.stats().campaigns_running, 1);
    trigger.send(()).unwrap();

    let record = h.wait_terminal(id, Duration::from_secs(5)).await;
    h.stop().await;

    assert_eq!(record.status, CampaignStatus::Done);
    assert_eq!(h.store.create_message_calls(), 1);
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.store.list_stats().await.unwrap().len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_finished_campaign_cannot_be_rescheduled_by_editing() {
    let mut h = Harness::new(EngineConfig {
        poll_interval_ms: 10,
        ..fast_config()
    });
    let r = recipient(1, "a");
    h.add_recipients(std::slice::from_ref(&r)).await;
    h.transport.add_response(r.phone, Ok(()));

    let id = h
        .add_campaign(
            RecipientFilter::default(),
            chrono::Duration::zero(),
            chrono::Duration::minutes(1),
        )
        .await;
    h.start();
    let record = h.wait_terminal(id, Duration::from_secs(5)).await;
    assert_eq!(record.status, CampaignStatus::Done);

    // Saving the same id again is rejected; editing keeps the status
    assert!(h.store.save_campaign(record.data.clone()).await.is_err());
    h.store
        .update_campaign(
            id,
            &CampaignUpdate {
                text: Some("Spring sale, final call".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    h.stop().await;

    let record = h.store.get_campaign(id).await.unwrap();
    assert_eq!(record.status, CampaignStatus::Done);
    assert_eq!(record.data.text, "Spring sale, final call");
    assert_eq!(h.store.list_stats().await.unwrap().len(), 1);
    assert_eq!(h.transport.call_count(), 1);
}

#[test_log::test(tokio::test)]
async fn test_shutdown_drains_running_campaign() {
    let mut h = Harness::new(EngineConfig {
        max_concurrent_dispatches: Some(1),
        ..fast_config()
    });
    let recipients = [recipient(1, "a"), recipient(2, "a")];
    h.add_recipients(&recipients).await;
    let _triggers: Vec<_> = recipients
        .iter()
        .map(|r| h.transport.add_response_with_trigger(r.phone, Ok(())))
        .collect();

    let id = h
        .add_campaign(
            RecipientFilter::default(),
            chrono::Duration::zero(),
            chrono::Duration::minutes(1),
        )
        .await;
    h.start();

    // Wait until the first send is in flight
    let start = tokio::time::Instant::now();
    while h.transport.in_flight_count() == 0 {
        assert!(start.elapsed() < Duration::from_secs(5), "Send never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    h.stop().await;

    // The run finished before the engine returned
    let record = h.store.get_campaign(id).await.unwrap();
    assert_eq!(record.status, CampaignStatus::Canceled);
    let stats = h.store.get_stats(id).await.unwrap().expect("Stats missing");
    assert_eq!((stats.matches, stats.sent, stats.fails), (2, 1, 1));
    assert_eq!(h.engine.stats().campaigns_running, 0);
    assert_eq!(h.transport.in_flight_count(), 0);
}

#[test_log::test(tokio::test)]
async fn test_standalone_send_outside_campaign() {
    let h = Harness::new(fast_config());
    let r = recipient(42, "a");
    h.add_recipients(std::slice::from_ref(&r)).await;
    h.transport.add_response(r.phone, Ok(()));

    let message_id = h
        .engine
        .send_standalone(r.id, "One-off notice")
        .await
        .expect("Standalone send failed");

    let message = h.store.get_message(message_id).await.unwrap();
    assert_eq!(message.status, MessageStatus::Success);
    assert_eq!(message.data.campaign_id, None);
    assert_eq!(message.data.recipient_id, r.id);

    let calls = h.transport.get_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].text, "One-off notice");
    assert_eq!(calls[0].deadline, None);
}
