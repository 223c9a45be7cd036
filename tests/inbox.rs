// SPDX-License-Identifier: MPL-2.0

mod common;

use common::*;
use hangar_sync::atproto::ClientError;
use hangar_sync::entity::NotificationReason;
use hangar_sync::{ConvoId, Cursor, FetchStatus, ListCursor, Timestamp};
use serde_json::json;

const ALICE: &str = "did:plc:alice";
const BOB: &str = "did:plc:bob";
const CAROL: &str = "did:plc:carol";

fn at(value: &str) -> Timestamp {
    Timestamp::parse(value).unwrap()
}

#[tokio::test]
async fn test_notifications_page_newest_first() {
    let remote = FakeRemote::new();
    remote.respond(
        "notifications",
        json!({
            "notifications": [
                notification(ALICE, "l1", "like", "2024-03-01T10:00:03Z"),
                notification(BOB, "r1", "reply", "2024-03-01T10:00:02Z"),
                {"uri": "broken"},
                notification(CAROL, "f1", "follow", "2024-03-01T10:00:01Z"),
            ],
            "cursor": "n1"
        }),
    );
    remote.respond(
        "notifications",
        json!({"notifications": [notification(ALICE, "l0", "like", "2024-02-01T00:00:00Z")]}),
    );
    let engine = engine(&remote);

    let first = engine.notifications(&ListCursor::initial()).await.unwrap();
    assert_eq!(first.status, FetchStatus::Fresh);
    let reasons: Vec<_> = first.items.iter().map(|n| n.reason.clone()).collect();
    assert_eq!(
        reasons,
        vec![NotificationReason::Like, NotificationReason::Reply, NotificationReason::Follow]
    );
    assert!(first.items[0].post.is_none());
    assert_eq!(
        first.items[1].post.as_ref().and_then(|p| p.text.as_deref()),
        Some("hello")
    );
    assert_eq!(first.cursor.remote, Cursor::Next("n1".into()));
    assert_eq!(first.cursor.before.as_ref().map(|p| p.at), Some(at("2024-03-01T10:00:01Z")));
    assert_eq!(engine.unread_notifications().await.unwrap(), 3);

    let second = engine.notifications(&first.cursor).await.unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.cursor.remote, Cursor::Pending);
    assert_eq!(second.cursor.before.as_ref().map(|p| p.at), Some(at("2024-02-01T00:00:00Z")));
    assert_eq!(
        remote.requests_to("notifications")[1].cursor.as_deref(),
        Some("n1")
    );

    let third = engine.notifications(&second.cursor).await.unwrap();
    assert_eq!(third.status, FetchStatus::Exhausted);
    assert!(third.items.is_empty());
    assert_eq!(remote.requests_to("notifications").len(), 2);

    let marked = engine
        .mark_notifications_read(at("2024-03-01T10:00:02Z"))
        .await
        .unwrap();
    assert_eq!(marked, 3);
    assert_eq!(engine.unread_notifications().await.unwrap(), 1);
}

#[tokio::test]
async fn test_notification_tie_at_page_boundary_is_not_skipped() {
    let remote = FakeRemote::new();
    remote.respond(
        "notifications",
        json!({
            "notifications": [
                notification(ALICE, "n1", "like", "2024-03-01T10:00:03Z"),
                notification(ALICE, "n2", "like", "2024-03-01T10:00:02Z"),
            ],
            "cursor": "c1"
        }),
    );
    remote.respond(
        "notifications",
        json!({
            "notifications": [
                notification(BOB, "n3", "like", "2024-03-01T10:00:02Z"),
                notification(CAROL, "n4", "like", "2024-03-01T10:00:01Z"),
            ]
        }),
    );
    let engine = engine(&remote);

    let first = engine.notifications(&ListCursor::initial()).await.unwrap();
    let second = engine.notifications(&first.cursor).await.unwrap();
    let third = engine.notifications(&second.cursor).await.unwrap();
    assert_eq!(third.status, FetchStatus::Exhausted);

    let mut seen: Vec<String> = [first.items, second.items, third.items]
        .into_iter()
        .flatten()
        .map(|n| n.uri.to_string())
        .collect();
    seen.sort();
    let mut expected = vec![
        format!("at://{ALICE}/app.bsky.feed.like/n1"),
        format!("at://{ALICE}/app.bsky.feed.like/n2"),
        format!("at://{BOB}/app.bsky.feed.like/n3"),
        format!("at://{CAROL}/app.bsky.feed.like/n4"),
    ];
    expected.sort();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_cached_notifications_page_through_ties() {
    let remote = FakeRemote::new();
    remote.respond(
        "notifications",
        json!({
            "notifications": [
                notification(ALICE, "t1", "like", "2024-03-01T10:00:00Z"),
                notification(BOB, "t2", "like", "2024-03-01T10:00:00Z"),
                notification(CAROL, "t3", "like", "2024-03-01T10:00:00Z"),
            ]
        }),
    );
    let engine = engine(&remote);
    engine.notifications(&ListCursor::initial()).await.unwrap();

    let mut before = None;
    let mut seen = Vec::new();
    loop {
        let page = engine.cached_notifications(before.clone(), 1).await.unwrap();
        let Some(last) = page.last() else { break };
        before = Some(last.position());
        seen.extend(page.iter().map(|n| n.uri.to_string()));
        assert!(seen.len() <= 3, "paging did not terminate: {seen:?}");
    }
    assert_eq!(seen.len(), 3);
}

#[tokio::test]
async fn test_notification_failure_serves_cache() {
    let remote = FakeRemote::new();
    remote.respond(
        "notifications",
        json!({"notifications": [notification(ALICE, "l1", "like", "2024-03-01T10:00:00Z")]}),
    );
    remote.fail("notifications", ClientError::Network("offline".into()));
    let engine = engine(&remote);

    engine.notifications(&ListCursor::initial()).await.unwrap();
    let offline = engine.notifications(&ListCursor::initial()).await.unwrap();
    assert!(offline.status.is_stale());
    assert_eq!(offline.cursor, ListCursor::initial());
    assert_eq!(offline.items.len(), 1);
}

#[tokio::test]
async fn test_conversations_and_messages() {
    let remote = FakeRemote::new();
    remote.respond(
        "conversations",
        json!({
            "convos": [
                convo("c1", &[VIEWER, ALICE], Some(message("m2", ALICE, "latest", "2024-05-02T00:00:00Z"))),
                convo("c2", &[VIEWER, BOB], Some(message("x1", BOB, "older", "2024-05-01T00:00:00Z"))),
            ]
        }),
    );
    remote.respond(
        "messages",
        json!({
            "messages": [
                message("m2", ALICE, "latest", "2024-05-02T00:00:00Z"),
                deleted_message("m1", VIEWER, "2024-05-01T12:00:00Z"),
                message("m0", VIEWER, "first", "2024-05-01T06:00:00Z"),
            ],
            "cursor": "older"
        }),
    );
    let engine = engine(&remote);

    let convos = engine.conversations(&ListCursor::initial()).await.unwrap();
    assert_eq!(convos.items.len(), 2);
    assert_eq!(convos.items[0].id.as_str(), "c1");
    assert_eq!(convos.items[0].members.len(), 2);
    assert_eq!(
        convos.items[0].last_message.as_ref().and_then(|m| m.text.as_deref()),
        Some("latest")
    );
    assert_eq!(convos.cursor.remote, Cursor::Pending);

    let convo = ConvoId::new("c1").unwrap();
    let messages = engine.messages(&convo, &ListCursor::initial()).await.unwrap();
    let ids: Vec<_> = messages.items.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m1", "m0"]);
    assert!(messages.items[1].deleted);
    assert_eq!(messages.items[1].text, None);
    assert_eq!(messages.cursor.remote, Cursor::Next("older".into()));
    assert_eq!(messages.cursor.before.as_ref().map(|p| p.at), Some(at("2024-05-01T06:00:00Z")));
    assert_eq!(
        remote.requests_to("messages")[0].target.as_deref(),
        Some("c1")
    );

    // Messages only stub their conversation; the listed one stays intact.
    let cached = engine.cached_conversations(None, 10).await.unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0].members.len(), 2);
    assert_eq!(foreign_key_violations(engine.db()), 0);
}
