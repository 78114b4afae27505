//! End-to-end pipeline tests: scripted adapters and channel senders over
//! the in-memory store, driving full cycles through the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nestwatch_common::{Channel, ScanError, SearchProfile, Source};
use nestwatch_scanner::dispatch::{ChannelSender, Dispatcher};
use nestwatch_scanner::orchestrator::{Orchestrator, PipelineSettings};
use nestwatch_scanner::sources::SourceAdapter;
use nestwatch_scanner::testing::{raw_listing, test_profile, MockAdapter, MockSender};
use nestwatch_store::{DedupIndex, MemoryStore};
use uuid::Uuid;

fn settings() -> PipelineSettings {
    PipelineSettings {
        scan_interval: Duration::from_secs(300),
        cycle_timeout: Duration::from_secs(30),
        max_concurrent_profiles: 3,
        dedup_retention_days: 90,
        operator_recipient: None,
    }
}

fn telegram_profile() -> SearchProfile {
    let mut profile = test_profile();
    profile.channels.telegram.enabled = true;
    profile.channels.telegram.recipient = Some("chat-1".to_string());
    profile
}

struct Harness {
    store: Arc<MemoryStore>,
    sender: Arc<MockSender>,
    orchestrator: Orchestrator,
}

fn harness(
    adapter: Arc<MockAdapter>,
    settings: PipelineSettings,
    profiles: Vec<SearchProfile>,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    for profile in profiles {
        store.seed_profile(profile);
    }

    let sender = Arc::new(MockSender::new());
    let mut senders: HashMap<Channel, Arc<dyn ChannelSender>> = HashMap::new();
    senders.insert(Channel::Telegram, sender.clone() as Arc<dyn ChannelSender>);
    let dispatcher = Arc::new(
        Dispatcher::new(senders, store.clone()).with_backoff(Duration::from_millis(1)),
    );

    let mut adapters: HashMap<Source, Arc<dyn SourceAdapter>> = HashMap::new();
    adapters.insert(Source::Yad2, adapter as Arc<dyn SourceAdapter>);

    let orchestrator = Orchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        adapters,
        dispatcher,
        settings,
    );

    Harness {
        store,
        sender,
        orchestrator,
    }
}

#[tokio::test]
async fn full_cycle_discovers_matches_and_notifies() {
    let profile = telegram_profile();
    let profile_id = profile.id;
    let adapter = Arc::new(MockAdapter::yielding(Source::Yad2, vec![raw_listing("a1")]));
    let h = harness(adapter, settings(), vec![profile]);

    let stats = h.orchestrator.run_cycle().await.unwrap();

    assert_eq!(stats.profiles, 1);
    assert_eq!(stats.pairs_scanned, 1);
    assert_eq!(stats.listings_fetched, 1);
    assert_eq!(stats.matches, 1);
    assert_eq!(stats.notifications_sent, 1);

    let notifications = h.store.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].profile_id, profile_id);
    assert_eq!(notifications[0].channel, Channel::Telegram);
    assert!(notifications[0].status.is_delivered());
    assert_eq!(h.sender.sent().len(), 1);

    // Cursor advanced to the newest listing after the successful scan.
    assert!(h.store.cursor(profile_id, Source::Yad2).is_some());
}

#[tokio::test]
async fn cursor_replay_sends_nothing_twice() {
    let profile = telegram_profile();
    let adapter = Arc::new(MockAdapter::yielding(Source::Yad2, vec![raw_listing("a1")]));
    let h = harness(adapter, settings(), vec![profile]);

    let first = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(first.notifications_sent, 1);

    // Same listing arrives again (cursor replay): dedup reports seen,
    // zero additional notifications.
    let second = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.matches, 0);
    assert_eq!(second.notifications_sent, 0);
    assert_eq!(h.store.notifications().len(), 1);
    assert_eq!(h.sender.sent().len(), 1);
}

#[tokio::test]
async fn cross_source_duplicate_yields_one_entry_and_one_notification() {
    let profile = telegram_profile();
    // Same physical listing under two native ids: identical content hash.
    let mut reposted = raw_listing("a2");
    reposted.url = "https://www.yad2.co.il/item/a2".to_string();
    let adapter = Arc::new(MockAdapter::yielding(
        Source::Yad2,
        vec![raw_listing("a1"), reposted],
    ));
    let h = harness(adapter, settings(), vec![profile]);

    let stats = h.orchestrator.run_cycle().await.unwrap();

    assert_eq!(stats.listings_fetched, 2);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.notifications_sent, 1);
    assert_eq!(h.store.scanned_listings().len(), 1);
}

#[tokio::test]
async fn adapter_failure_for_one_profile_leaves_others_untouched() {
    let failing_profile = telegram_profile();
    let healthy_profile = telegram_profile();
    let failing_id = failing_profile.id;

    let adapter = Arc::new(MockAdapter::new(Source::Yad2, move |profile| {
        if profile.id == failing_id {
            Err(ScanError::Network {
                source: Source::Yad2,
                message: "connection refused".to_string(),
            })
        } else {
            Ok(vec![raw_listing("b1")])
        }
    }));
    let h = harness(
        adapter,
        settings(),
        vec![failing_profile, healthy_profile.clone()],
    );

    let stats = h.orchestrator.run_cycle().await.unwrap();

    assert_eq!(stats.pairs_failed, 1);
    assert_eq!(stats.pairs_scanned, 1);
    assert_eq!(stats.notifications_sent, 1);
    assert_eq!(h.store.notifications()[0].profile_id, healthy_profile.id);

    // The failed pair's cursor must be untouched so nothing is skipped.
    assert!(h.store.cursor(failing_id, Source::Yad2).is_none());
    assert!(h.store.cursor(healthy_profile.id, Source::Yad2).is_some());
}

#[tokio::test]
async fn auth_expiry_suspends_pair_and_alerts_operator_once() {
    let profile = telegram_profile();
    let profile_id = profile.id;
    let adapter = Arc::new(MockAdapter::failing(Source::Yad2, || ScanError::AuthExpired {
        source: Source::Yad2,
    }));
    let adapter_handle = adapter.clone();

    let mut s = settings();
    s.operator_recipient = Some("operator-chat".to_string());
    let h = harness(adapter, s, vec![profile]);

    let first = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(first.pairs_failed, 1);
    assert_eq!(adapter_handle.call_count(), 1);

    // The alert went through the dispatcher to the operator recipient.
    let alerts = h.sender.sent();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].0, "operator-chat");
    assert!(alerts[0].1.contains("expired"));

    // Second cycle: pair suspended, adapter not called, no second alert.
    let second = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(second.pairs_suspended, 1);
    assert_eq!(adapter_handle.call_count(), 1);
    assert_eq!(h.sender.sent().len(), 1);

    assert!(h.store.cursor(profile_id, Source::Yad2).is_none());
}

#[tokio::test]
async fn rejected_listings_send_nothing() {
    let mut profile = telegram_profile();
    profile.price.max = Some(5000); // fixture listing costs 6,500

    let adapter = Arc::new(MockAdapter::yielding(Source::Yad2, vec![raw_listing("c1")]));
    let h = harness(adapter, settings(), vec![profile]);

    let stats = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(stats.rejections, 1);
    assert_eq!(stats.matches, 0);
    assert!(h.store.notifications().is_empty());
}

#[tokio::test]
async fn delivery_failure_is_logged_and_does_not_fail_the_cycle() {
    let profile = telegram_profile();
    let store = Arc::new(MemoryStore::new());
    store.seed_profile(profile);

    let sender = Arc::new(MockSender::failing("chat not found"));
    let mut senders: HashMap<Channel, Arc<dyn ChannelSender>> = HashMap::new();
    senders.insert(Channel::Telegram, sender as Arc<dyn ChannelSender>);
    let dispatcher = Arc::new(
        Dispatcher::new(senders, store.clone()).with_backoff(Duration::from_millis(1)),
    );

    let mut adapters: HashMap<Source, Arc<dyn SourceAdapter>> = HashMap::new();
    adapters.insert(
        Source::Yad2,
        Arc::new(MockAdapter::yielding(Source::Yad2, vec![raw_listing("d1")]))
            as Arc<dyn SourceAdapter>,
    );

    let orchestrator = Orchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        adapters,
        dispatcher,
        settings(),
    );

    let stats = orchestrator.run_cycle().await.unwrap();
    assert_eq!(stats.notifications_failed, 1);
    assert_eq!(stats.notifications_sent, 0);

    let notifications = store.notifications();
    assert_eq!(notifications.len(), 1);
    assert!(!notifications[0].status.is_delivered());
}

#[tokio::test]
async fn inactive_profiles_are_not_scanned() {
    let mut profile = telegram_profile();
    profile.active = false;
    let adapter = Arc::new(MockAdapter::yielding(Source::Yad2, vec![raw_listing("e1")]));
    let adapter_handle = adapter.clone();
    let h = harness(adapter, settings(), vec![profile]);

    let stats = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(stats.profiles, 0);
    assert_eq!(adapter_handle.call_count(), 0);
    assert!(h.store.notifications().is_empty());
}

#[tokio::test]
async fn notify_once_holds_even_when_dedup_misses() {
    // Dedup-index edge case: the same content re-enters evaluation (here,
    // a purged index) — the notification log still blocks the re-send.
    let profile = telegram_profile();
    let adapter = Arc::new(MockAdapter::yielding(Source::Yad2, vec![raw_listing("f1")]));
    let h = harness(adapter, settings(), vec![profile]);

    let first = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(first.notifications_sent, 1);

    // Wipe the dedup window so the listing looks new again.
    h.store
        .purge_older_than(chrono::Utc::now() + chrono::Duration::days(1))
        .await
        .unwrap();

    let second = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(second.matches, 1, "listing re-evaluated after purge");
    assert_eq!(second.notifications_sent, 0, "log blocks the re-send");
    assert_eq!(h.store.notifications().len(), 1);
    assert_eq!(h.sender.sent().len(), 1);
}

#[tokio::test]
async fn profile_with_no_adapter_for_source_is_skipped() {
    // Facebook targets configured, but only the classifieds adapter is
    // registered: the pair is simply not scanned.
    let mut profile = telegram_profile();
    profile.targets.group_ids = vec!["g-1".to_string()];
    let adapter = Arc::new(MockAdapter::yielding(Source::Yad2, vec![raw_listing("h1")]));
    let h = harness(adapter, settings(), vec![profile]);

    let stats = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(stats.pairs_scanned, 1);
    assert_eq!(stats.notifications_sent, 1);
}

#[tokio::test]
async fn operator_alert_skipped_without_recipient() {
    let profile = telegram_profile();
    let adapter = Arc::new(MockAdapter::failing(Source::Yad2, || ScanError::AuthExpired {
        source: Source::Yad2,
    }));
    let h = harness(adapter, settings(), vec![profile]);

    let stats = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(stats.pairs_failed, 1);
    assert!(h.sender.sent().is_empty());
}

#[tokio::test]
async fn dedup_purge_uses_retention_window() {
    use chrono::{Duration as ChronoDuration, Utc};
    use nestwatch_common::ScannedListing;

    let profile = telegram_profile();
    let adapter = Arc::new(MockAdapter::yielding(Source::Yad2, vec![]));
    let h = harness(adapter, settings(), vec![profile]);

    h.store
        .check_and_insert(&ScannedListing {
            native_id: "ancient".to_string(),
            source: Source::Yad2,
            content_hash: "hash-ancient".to_string(),
            first_seen: Utc::now() - ChronoDuration::days(120),
            url: "https://www.yad2.co.il/item/ancient".to_string(),
        })
        .await
        .unwrap();

    h.orchestrator.run_cycle().await.unwrap();
    assert!(h.store.scanned_listings().is_empty(), "outside 90-day window");
}

#[tokio::test]
async fn many_profiles_complete_under_bounded_concurrency() {
    let profiles: Vec<SearchProfile> = (0..10).map(|_| telegram_profile()).collect();
    let ids: Vec<Uuid> = profiles.iter().map(|p| p.id).collect();

    let adapter = Arc::new(MockAdapter::new(Source::Yad2, |profile| {
        // Unique listing content per profile so nothing cross-dedups.
        let mut raw = raw_listing(&format!("p-{}", profile.id));
        raw.fields
            .insert("description".to_string(), profile.id.to_string());
        Ok(vec![raw])
    }));
    let h = harness(adapter, settings(), profiles);

    let stats = h.orchestrator.run_cycle().await.unwrap();
    assert_eq!(stats.profiles, 10);
    assert_eq!(stats.pairs_scanned, 10);
    assert_eq!(stats.notifications_sent, 10);
    for id in ids {
        assert!(h.store.cursor(id, Source::Yad2).is_some());
    }
}
