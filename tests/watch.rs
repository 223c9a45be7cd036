// SPDX-License-Identifier: MPL-2.0

mod common;

use common::*;
use hangar_sync::atproto::ClientError;
use hangar_sync::entity::Table;
use hangar_sync::{FeedCursor, FeedSource, FetchStatus, TimelineEvent};
use std::time::Duration;

#[tokio::test]
async fn test_watch_sends_cached_then_fetched() {
    let remote = FakeRemote::new();
    remote.respond("feed", feed_page(posts("did:plc:alice", "a", 3), Some("c1")));
    remote.respond("feed", feed_page(posts("did:plc:bob", "b", 2), Some("c2")));
    let engine = engine(&remote);
    let source = FeedSource::Following;

    engine.timeline(&source, &FeedCursor::initial()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let mut events = engine.watch_timeline(source, FeedCursor::initial());
    match events.recv().await {
        Some(TimelineEvent::Cached(items)) => assert_eq!(items.len(), 3),
        other => panic!("expected cached items first, got {other:?}"),
    }
    match events.recv().await {
        Some(TimelineEvent::Fetched(page)) => {
            assert_eq!(page.status, FetchStatus::Fresh);
            assert_eq!(page.items.len(), 2);
            assert_eq!(page.items[0].kind.post().author.did.as_str(), "did:plc:bob");
        }
        other => panic!("expected fetched page, got {other:?}"),
    }
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_watch_failure_hands_back_the_cursor() {
    let remote = FakeRemote::new();
    remote.fail("feed", ClientError::NotAuthenticated);
    let engine = engine(&remote);

    let mut events = engine.watch_timeline(FeedSource::Following, FeedCursor::initial());
    assert_eq!(events.recv().await, Some(TimelineEvent::Cached(Vec::new())));
    match events.recv().await {
        Some(TimelineEvent::Failed { reason, cursor }) => {
            assert_eq!(reason, "not authenticated");
            assert_eq!(cursor, FeedCursor::initial());
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_watcher_commits_nothing() {
    let remote = FakeRemote::new();
    let gate = remote.hold_feed();
    remote.respond("feed", feed_page(posts("did:plc:alice", "a", 3), None));
    let engine = engine(&remote);

    let mut events = engine.watch_timeline(FeedSource::Following, FeedCursor::initial());
    assert!(matches!(events.recv().await, Some(TimelineEvent::Cached(_))));
    drop(events);
    gate.notify_one();

    for _ in 0..100 {
        if !remote.requests_to("feed").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(remote.requests_to("feed").len(), 1);
    let stats = engine.db().stats().unwrap();
    assert_eq!(stats.count(Table::FeedItems), 0);
    assert_eq!(stats.count(Table::FeedState), 0);
    assert_eq!(stats.count(Table::Posts), 0);
}
