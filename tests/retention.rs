// SPDX-License-Identifier: MPL-2.0

mod common;

use common::*;
use hangar_sync::cache::CleanupStats;
use hangar_sync::entity::Table;
use hangar_sync::{AtUri, CacheDb, FeedCursor, FeedSource, SyncError};
use serde_json::{Value, json};

const ALICE: &str = "did:plc:alice";
const BOB: &str = "did:plc:bob";
const CAROL: &str = "did:plc:carol";

/// Pretend everything was fetched long ago.
fn age_everything(db: &CacheDb) {
    db.conn()
        .execute_batch(
            "UPDATE feed_state SET refreshed_at = 0;
             UPDATE posts SET fetched_at = 0;
             UPDATE profiles SET fetched_at = 0;",
        )
        .unwrap();
}

fn reply_to(mut post: Value, parent: &str, root: &str) -> Value {
    post["record"]["reply"] = json!({
        "root": {"uri": root, "cid": "bafyroot"},
        "parent": {"uri": parent, "cid": "bafyparent"}
    });
    post
}

#[tokio::test]
async fn test_cleanup_removes_expired_session_and_orphans() {
    let remote = FakeRemote::new();
    let entry = reply_item(
        post(CAROL, "reply", "reply"),
        post(ALICE, "root", "root"),
        post(BOB, "parent", "parent"),
    );
    remote.respond("feed", feed_page(vec![entry], None));
    let engine = engine(&remote);
    engine
        .timeline(&FeedSource::Following, &FeedCursor::initial())
        .await
        .unwrap();

    // Fresh data survives.
    assert_eq!(engine.cleanup().await.unwrap(), CleanupStats::default());

    let before = engine.db().stats().unwrap();
    assert_eq!(before.count(Table::Posts), 3);
    age_everything(engine.db());

    let stats = engine.cleanup().await.unwrap();
    assert_eq!(stats.sessions_deleted, 1);
    assert_eq!(stats.posts_deleted, 3);
    assert_eq!(stats.profiles_deleted, before.count(Table::Profiles));

    let after = engine.db().stats().unwrap();
    assert_eq!(after.count(Table::FeedState), 0);
    assert_eq!(after.count(Table::FeedItems), 0);
    assert_eq!(after.count(Table::Posts), 0);
    assert_eq!(after.count(Table::Profiles), 0);
    assert_eq!(foreign_key_violations(engine.db()), 0);
}

#[tokio::test]
async fn test_cleanup_keeps_ancestors_of_cached_replies() {
    let remote = FakeRemote::new();
    let root = post_uri(ALICE, "root");
    let focus = post_uri(BOB, "focus");
    remote.respond(
        "thread",
        json!({
            "thread": thread_node(
                reply_to(post(BOB, "focus", "focus"), &root, &root),
                Some(thread_node(post(ALICE, "root", "root"), None, vec![])),
                vec![thread_node(reply_to(post(CAROL, "r1", "child"), &focus, &root), None, vec![])],
            )
        }),
    );
    let engine = engine(&remote);
    let focus = AtUri::new(focus).unwrap();
    engine.thread(&focus).await.unwrap();

    // Only the root has gone stale; the replies pointing at it are fresh.
    engine
        .db()
        .conn()
        .execute("UPDATE posts SET fetched_at = 0 WHERE uri = ?1", [&root])
        .unwrap();
    assert_eq!(engine.cleanup().await.unwrap().posts_deleted, 0);

    let tree = engine.cached_thread(&focus).await.unwrap();
    assert_eq!(tree.ancestors.len(), 1);
    assert_eq!(tree.ancestors[0].uri.as_str(), root);

    // A fully stale thread drains in one pass, children before parents.
    age_everything(engine.db());
    let stats = engine.cleanup().await.unwrap();
    assert_eq!(stats.posts_deleted, 3);
    assert_eq!(engine.db().stats().unwrap().count(Table::ThreadEdges), 0);
    assert_eq!(foreign_key_violations(engine.db()), 0);
    assert!(matches!(
        engine.cached_thread(&focus).await,
        Err(SyncError::Cache(_))
    ));
}
