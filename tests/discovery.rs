mod common;

use chrono::Duration;
use common::{descriptor, ended, t0, Harness};
use scribeline::db::{MeetingFilter, MetadataStore};
use scribeline::error::CallError;
use scribeline::notifications::{handle_batch, NotificationBatch};

#[tokio::test]
async fn discovery_is_idempotent() {
    let h = Harness::new();
    let batch = vec![ended("m-1"), ended("m-2"), ended("m-3")];

    let first = h.engine.discover(&batch).await.unwrap();
    assert_eq!(first.created, 3);
    assert_eq!(first.already_known, 0);

    let second = h.engine.discover(&batch).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.already_known, 3);

    let all = h.store.list_meetings(&MeetingFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|r| r.version == 0));
}

#[tokio::test]
async fn rediscovery_does_not_reset_progress() {
    let h = Harness::new();
    let meeting = ended("m-1");
    h.engine.discover(&[meeting.clone()]).await.unwrap();
    h.engine
        .advance(scribeline::engine::Scope::All)
        .await
        .unwrap();
    let advanced = h.store.get(&meeting.id()).await.unwrap().unwrap();

    // Same occurrence, different descriptive fields.
    let mut renamed = meeting.clone();
    renamed.subject = "Renamed".to_string();
    let summary = h.engine.discover(&[renamed]).await.unwrap();
    assert_eq!(summary.already_known, 1);
    assert_eq!(h.store.get(&meeting.id()).await.unwrap().unwrap(), advanced);
}

#[tokio::test]
async fn upstream_discovery_uses_lookback_window() {
    let h = Harness::new();
    *h.upstream.listed.lock().unwrap() = vec![
        ended("recent"),
        descriptor("old", t0() - Duration::days(3), t0() - Duration::days(3) + Duration::hours(1)),
    ];

    let summary = h
        .engine
        .discover_upstream(Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(summary.created, 1);
    assert!(summary.upstream_error.is_none());
}

#[tokio::test]
async fn failed_listing_leaves_store_untouched() {
    let h = Harness::new();
    *h.upstream.listed.lock().unwrap() = vec![ended("m-1")];
    *h.upstream.list_error.lock().unwrap() = Some(CallError::transient("HTTP 503"));

    let summary = h
        .engine
        .discover_upstream(Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(summary.created, 0);
    assert!(summary.upstream_error.unwrap().contains("503"));
    assert!(h
        .store
        .list_meetings(&MeetingFilter::default())
        .await
        .unwrap()
        .is_empty());
}

fn notification(client_state: &str, resource: &str) -> serde_json::Value {
    serde_json::json!({
        "subscriptionId": "sub-1",
        "clientState": client_state,
        "changeType": "created",
        "resource": resource,
    })
}

#[tokio::test]
async fn notification_batch_is_validated_and_deduplicated() {
    let h = Harness::new();
    let meeting = ended("m-1");
    {
        let mut events = h.upstream.events.lock().unwrap();
        events.insert(("u1".to_string(), "e1".to_string()), meeting.clone());
        // A second event pointing at the same occurrence.
        events.insert(("u1".to_string(), "e1-copy".to_string()), meeting.clone());
    }

    let batch: NotificationBatch = serde_json::from_value(serde_json::json!({
        "value": [
            notification("secret", "Users/u1/Events/e1"),
            notification("secret", "/users/u1/events/e1"),
            notification("secret", "users/u1/events/e1-copy"),
            notification("wrong", "users/u1/events/e1"),
            notification("secret", "users/u1/events/not-a-meeting"),
            notification("secret", "users/u1/messages/m1"),
        ]
    }))
    .unwrap();

    let summary = handle_batch(&h.engine, "secret", &batch).await.unwrap();
    assert_eq!(summary.received, 6);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.not_meetings, 1);
    assert_eq!(summary.discovered.created, 1);
    // Repeat of e1, the duplicate occurrence and the unparseable resource.
    assert_eq!(summary.ignored, 3);
    // e1, e1-copy and not-a-meeting.
    assert_eq!(
        h.upstream
            .resolve_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        3
    );

    let again = handle_batch(&h.engine, "secret", &batch).await.unwrap();
    assert_eq!(again.discovered.created, 0);
    assert_eq!(again.discovered.already_known, 1);
}
