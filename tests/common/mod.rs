// SPDX-License-Identifier: MPL-2.0

//! Scripted remote and lexicon-shaped fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use hangar_sync::atproto::views::{
    ConvosResponse, FeedGeneratorsResponse, FeedResponse, LabelerServicesResponse,
    MessagesResponse, NotificationsResponse, ThreadResponse,
};
use hangar_sync::atproto::{ClientError, Remote};
use hangar_sync::{AtUri, CacheDb, ConvoId, Did, FeedSource, SyncConfig, SyncEngine};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub const VIEWER: &str = "did:plc:viewer";

/// One call the engine made, for asserting on cursors and limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub endpoint: &'static str,
    pub target: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u8>,
}

/// Remote that answers each endpoint from a queue of canned JSON bodies.
#[derive(Default)]
pub struct FakeRemote {
    responses: Mutex<HashMap<&'static str, VecDeque<Result<Value, ClientError>>>>,
    requests: Mutex<Vec<Request>>,
    /// When set, feed requests wait here before answering.
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, endpoint: &'static str, body: Value) {
        self.queue(endpoint, Ok(body));
    }

    pub fn fail(&self, endpoint: &'static str, error: ClientError) {
        self.queue(endpoint, Err(error));
    }

    pub fn hold_feed(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, endpoint: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.endpoint == endpoint)
            .collect()
    }

    fn queue(&self, endpoint: &'static str, response: Result<Value, ClientError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(endpoint)
            .or_default()
            .push_back(response);
    }

    fn answer<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        target: Option<String>,
        cursor: Option<&str>,
        limit: Option<u8>,
    ) -> Result<T, ClientError> {
        self.requests.lock().unwrap().push(Request {
            endpoint,
            target,
            cursor: cursor.map(str::to_string),
            limit,
        });
        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(ClientError::Network(format!("nothing scripted for {endpoint}"))));
        next.and_then(|body| {
            serde_json::from_value(body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
        })
    }
}

#[async_trait]
impl Remote for FakeRemote {
    async fn feed(
        &self,
        source: &FeedSource,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<FeedResponse, ClientError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.answer("feed", Some(source.key()), cursor, Some(limit))
    }

    async fn post_thread(
        &self,
        uri: &AtUri,
        _depth: u16,
        _parent_height: u16,
    ) -> Result<ThreadResponse, ClientError> {
        self.answer("thread", Some(uri.to_string()), None, None)
    }

    async fn notifications(
        &self,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<NotificationsResponse, ClientError> {
        self.answer("notifications", None, cursor, Some(limit))
    }

    async fn conversations(
        &self,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<ConvosResponse, ClientError> {
        self.answer("conversations", None, cursor, Some(limit))
    }

    async fn messages(
        &self,
        convo: &ConvoId,
        cursor: Option<&str>,
        limit: u8,
    ) -> Result<MessagesResponse, ClientError> {
        self.answer("messages", Some(convo.to_string()), cursor, Some(limit))
    }

    async fn feed_generators(&self, _uris: &[AtUri]) -> Result<FeedGeneratorsResponse, ClientError> {
        self.answer("feed_generators", None, None, None)
    }

    async fn labeler_services(&self, _dids: &[Did]) -> Result<LabelerServicesResponse, ClientError> {
        self.answer("labelers", None, None, None)
    }
}

pub fn viewer() -> Did {
    Did::new(VIEWER).unwrap()
}

pub fn engine(remote: &Arc<FakeRemote>) -> SyncEngine {
    engine_with(remote, SyncConfig::default())
}

pub fn engine_with(remote: &Arc<FakeRemote>, config: SyncConfig) -> SyncEngine {
    hangar_sync::logging::init_test_logging();
    let db = CacheDb::open_in_memory().unwrap();
    SyncEngine::new(db, Arc::clone(remote) as Arc<dyn Remote>, viewer(), config)
}

/// Rows that violate a foreign key; empty when the store is consistent.
pub fn foreign_key_violations(db: &CacheDb) -> usize {
    let conn = db.conn();
    let mut stmt = conn.prepare("PRAGMA foreign_key_check").unwrap();
    stmt.query_map([], |_| Ok(())).unwrap().count()
}

// ─── Fixtures ───

pub fn post_uri(did: &str, rkey: &str) -> String {
    format!("at://{did}/app.bsky.feed.post/{rkey}")
}

pub fn profile(did: &str) -> Value {
    let name = did.rsplit(':').next().unwrap_or(did);
    json!({"did": did, "handle": format!("{name}.test"), "displayName": name})
}

pub fn post(did: &str, rkey: &str, text: &str) -> Value {
    json!({
        "uri": post_uri(did, rkey),
        "cid": format!("bafy{rkey}"),
        "author": profile(did),
        "record": {"$type": "app.bsky.feed.post", "text": text, "createdAt": "2024-01-01T00:00:00Z"},
        "replyCount": 0,
        "repostCount": 0,
        "likeCount": 1,
        "quoteCount": 0,
        "indexedAt": "2024-01-01T00:00:01.000Z"
    })
}

pub fn feed_item(post: Value) -> Value {
    json!({"post": post})
}

pub fn repost_item(post: Value, by: &str) -> Value {
    json!({
        "post": post,
        "reason": {
            "$type": "app.bsky.feed.defs#reasonRepost",
            "by": profile(by),
            "indexedAt": "2024-01-02T00:00:00Z"
        }
    })
}

pub fn pinned_item(post: Value) -> Value {
    json!({"post": post, "reason": {"$type": "app.bsky.feed.defs#reasonPin"}})
}

/// A reply entry with fully hydrated root and parent.
pub fn reply_item(mut reply: Value, root: Value, parent: Value) -> Value {
    reply["record"]["reply"] = json!({
        "root": {"uri": root["uri"], "cid": root["cid"]},
        "parent": {"uri": parent["uri"], "cid": parent["cid"]}
    });
    let mut root = root;
    let mut parent = parent;
    root["$type"] = json!("app.bsky.feed.defs#postView");
    parent["$type"] = json!("app.bsky.feed.defs#postView");
    json!({"post": reply, "reply": {"root": root, "parent": parent}})
}

/// `count` plain posts by one author with rkeys `{prefix}0..`.
pub fn posts(did: &str, prefix: &str, count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| feed_item(post(did, &format!("{prefix}{i}"), &format!("post {i}"))))
        .collect()
}

pub fn feed_page(items: Vec<Value>, cursor: Option<&str>) -> Value {
    json!({"feed": items, "cursor": cursor})
}

pub fn notification(author: &str, rkey: &str, reason: &str, indexed_at: &str) -> Value {
    let collection = match reason {
        "like" => "app.bsky.feed.like",
        "follow" => "app.bsky.graph.follow",
        _ => "app.bsky.feed.post",
    };
    json!({
        "uri": format!("at://{author}/{collection}/{rkey}"),
        "cid": format!("bafy{rkey}"),
        "author": profile(author),
        "reason": reason,
        "record": {"$type": collection, "text": "hello", "createdAt": indexed_at},
        "isRead": false,
        "indexedAt": indexed_at
    })
}

pub fn message(id: &str, sender: &str, text: &str, sent_at: &str) -> Value {
    json!({
        "$type": "chat.bsky.convo.defs#messageView",
        "id": id,
        "rev": id,
        "text": text,
        "sender": {"did": sender},
        "sentAt": sent_at
    })
}

pub fn deleted_message(id: &str, sender: &str, sent_at: &str) -> Value {
    json!({
        "$type": "chat.bsky.convo.defs#deletedMessageView",
        "id": id,
        "rev": id,
        "sender": {"did": sender},
        "sentAt": sent_at
    })
}

pub fn convo(id: &str, members: &[&str], last_message: Option<Value>) -> Value {
    json!({
        "id": id,
        "rev": "r1",
        "members": members.iter().map(|did| profile(did)).collect::<Vec<_>>(),
        "lastMessage": last_message,
        "muted": false,
        "unreadCount": 1
    })
}

pub fn thread_node(post: Value, parent: Option<Value>, replies: Vec<Value>) -> Value {
    let mut node = json!({
        "$type": "app.bsky.feed.defs#threadViewPost",
        "post": post,
        "replies": replies
    });
    if let Some(parent) = parent {
        node["parent"] = parent;
    }
    node
}
