// SPDX-License-Identifier: MPL-2.0

//! Read-model values handed to callers.
//!
//! Every value here is an owned snapshot of the cache at query time. Later
//! commits do not change values already returned; re-query to observe them.

use crate::cursor::{ListPosition, SortKey};
use crate::entity::{Completeness, NotificationReason};
use crate::ids::{AtUri, Cid, ConvoId, Did, MessageId, Timestamp};
use std::fmt;

/// Identity of a timeline that items are grouped under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedSource {
    /// The viewer's following timeline.
    Following,
    Feed(AtUri),
    List(AtUri),
    Author(Did),
    Likes(Did),
    Search(String),
}

impl FeedSource {
    /// Stable key used in the cache tables.
    pub fn key(&self) -> String {
        match self {
            FeedSource::Following => "home".to_string(),
            FeedSource::Feed(uri) => format!("feed:{uri}"),
            FeedSource::List(uri) => format!("list:{uri}"),
            FeedSource::Author(did) => format!("author:{did}"),
            FeedSource::Likes(did) => format!("likes:{did}"),
            FeedSource::Search(query) => format!("search:{}", query.trim()),
        }
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub value: String,
    pub creator: Did,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSummary {
    pub did: Did,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
    pub completeness: Completeness,
    pub labels: Vec<Label>,
}

impl ProfileSummary {
    /// Display name, falling back to the handle, then the DID.
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.handle.as_deref())
            .unwrap_or(self.did.as_str())
    }
}

/// Full cached profile including counts and the viewer relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDetails {
    pub summary: ProfileSummary,
    pub description: Option<String>,
    pub banner: Option<String>,
    pub followers_count: Option<i64>,
    pub follows_count: Option<i64>,
    pub posts_count: Option<i64>,
    pub created_at: Option<Timestamp>,
    pub viewer: Option<ProfileRelationship>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileRelationship {
    pub muted: bool,
    pub blocked_by: bool,
    pub blocking: Option<AtUri>,
    pub following: Option<AtUri>,
    pub followed_by: Option<AtUri>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostViewerState {
    pub like: Option<AtUri>,
    pub repost: Option<AtUri>,
    pub thread_muted: bool,
    pub reply_disabled: bool,
    pub pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDetails {
    pub uri: AtUri,
    pub cid: Option<Cid>,
    pub author: ProfileSummary,
    pub text: Option<String>,
    pub record_json: Option<String>,
    pub reply_root: Option<AtUri>,
    pub reply_parent: Option<AtUri>,
    pub reply_count: Option<i64>,
    pub repost_count: Option<i64>,
    pub like_count: Option<i64>,
    pub quote_count: Option<i64>,
    pub created_at: Option<Timestamp>,
    pub indexed_at: Option<Timestamp>,
    pub completeness: Completeness,
    pub embeds: Vec<EmbedDetails>,
    pub labels: Vec<Label>,
    pub viewer: Option<PostViewerState>,
}

impl PostDetails {
    /// Stub rows only prove the post exists; there is nothing to render.
    pub fn is_hydrated(&self) -> bool {
        self.completeness > Completeness::Stub
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedDetails {
    Images(Vec<ImageDetails>),
    External(ExternalDetails),
    Video(VideoDetails),
    Record(QuotedRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetails {
    pub fullsize: String,
    pub thumb: String,
    pub alt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDetails {
    pub uri: String,
    pub title: String,
    pub description: String,
    pub thumb: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDetails {
    pub cid: Cid,
    pub playlist: String,
    pub thumbnail: Option<String>,
    pub alt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// What a quote embed points at, resolved from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotedRecord {
    Post(Box<PostDetails>),
    Generator(GeneratorSummary),
    List(ListSummary),
    /// Blocked, deleted or never hydrated.
    Unavailable(AtUri),
    /// Beyond the configured quote depth; re-query with this uri to expand.
    TooDeep(AtUri),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSummary {
    pub uri: AtUri,
    pub creator: Did,
    pub display_name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub like_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSummary {
    pub uri: AtUri,
    pub creator: Did,
    pub name: String,
    pub purpose: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub item_count: Option<i64>,
}

/// A timeline entry, typed by how it appeared in the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Single(PostDetails),
    Repost {
        post: PostDetails,
        by: ProfileSummary,
        at: Option<Timestamp>,
    },
    Reply {
        post: PostDetails,
        root: PostDetails,
        parent: PostDetails,
        grandparent_author: Option<ProfileSummary>,
    },
    Pinned(PostDetails),
}

impl FeedItem {
    pub fn post(&self) -> &PostDetails {
        match self {
            FeedItem::Single(post) | FeedItem::Pinned(post) => post,
            FeedItem::Repost { post, .. } | FeedItem::Reply { post, .. } => post,
        }
    }
}

/// Joined pieces of one timeline row before classification.
#[derive(Debug, Clone)]
pub struct FeedItemParts {
    pub post: PostDetails,
    pub root: Option<PostDetails>,
    pub parent: Option<PostDetails>,
    pub grandparent_author: Option<ProfileSummary>,
    pub reposter: Option<ProfileSummary>,
    pub reposted_at: Option<Timestamp>,
    pub pinned: bool,
}

impl FeedItemParts {
    /// Exactly one kind applies, checked in order: reply, repost, pinned, single.
    pub fn classify(self) -> FeedItem {
        match self {
            FeedItemParts {
                post,
                root: Some(root),
                parent: Some(parent),
                grandparent_author,
                ..
            } => FeedItem::Reply {
                post,
                root,
                parent,
                grandparent_author,
            },
            FeedItemParts {
                post,
                reposter: Some(by),
                reposted_at,
                ..
            } => FeedItem::Repost {
                post,
                by,
                at: reposted_at,
            },
            FeedItemParts {
                post, pinned: true, ..
            } => FeedItem::Pinned(post),
            FeedItemParts { post, .. } => FeedItem::Single(post),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineItem {
    pub id: String,
    pub sort_key: SortKey,
    pub kind: FeedItem,
}

/// A thread rebuilt from reply edges around one focused post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadTree {
    /// Root first, direct parent last.
    pub ancestors: Vec<PostDetails>,
    pub focus: PostDetails,
    pub replies: Vec<ThreadReply>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadReply {
    pub post: PostDetails,
    /// 1 for direct replies to the focus.
    pub depth: usize,
    pub replies: Vec<ThreadReply>,
}

impl ThreadTree {
    /// Number of replies at every depth.
    pub fn reply_count(&self) -> usize {
        fn count(replies: &[ThreadReply]) -> usize {
            replies.iter().map(|r| 1 + count(&r.replies)).sum()
        }
        count(&self.replies)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationItem {
    pub uri: AtUri,
    pub reason: NotificationReason,
    pub author: ProfileSummary,
    pub reason_subject: Option<String>,
    pub post: Option<PostDetails>,
    pub is_read: bool,
    pub indexed_at: Timestamp,
}

impl NotificationItem {
    pub fn position(&self) -> ListPosition {
        ListPosition::new(self.indexed_at, self.uri.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageItem {
    pub id: MessageId,
    pub convo: ConvoId,
    pub sender: ProfileSummary,
    /// `None` for deleted messages.
    pub text: Option<String>,
    pub sent_at: Timestamp,
    pub deleted: bool,
}

impl MessageItem {
    pub fn position(&self) -> ListPosition {
        ListPosition::new(self.sent_at, self.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: ConvoId,
    pub rev: String,
    pub members: Vec<ProfileSummary>,
    pub last_message: Option<MessageItem>,
    pub muted: bool,
    pub unread_count: i64,
    pub last_activity_at: Option<Timestamp>,
    /// Where the conversation sorts: its last activity, or the epoch if it has
    /// none, which puts it after every active conversation.
    pub active_at: Timestamp,
}

impl ConversationSummary {
    pub fn position(&self) -> ListPosition {
        ListPosition::new(self.active_at, self.id.as_str())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn profile(did: &str) -> ProfileSummary {
        ProfileSummary {
            did: Did::new(did).unwrap(),
            handle: None,
            display_name: None,
            avatar: None,
            completeness: Completeness::Basic,
            labels: Vec::new(),
        }
    }

    pub fn post(uri: &str) -> PostDetails {
        let uri = AtUri::new(uri).unwrap();
        PostDetails {
            author: profile(uri.authority()),
            uri,
            cid: None,
            text: None,
            record_json: None,
            reply_root: None,
            reply_parent: None,
            reply_count: None,
            repost_count: None,
            like_count: None,
            quote_count: None,
            created_at: None,
            indexed_at: None,
            completeness: Completeness::Full,
            embeds: Vec::new(),
            labels: Vec::new(),
            viewer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{post, profile};
    use super::*;

    fn parts() -> FeedItemParts {
        FeedItemParts {
            post: post("at://did:plc:a/app.bsky.feed.post/1"),
            root: None,
            parent: None,
            grandparent_author: None,
            reposter: None,
            reposted_at: None,
            pinned: false,
        }
    }

    #[test]
    fn test_reply_wins_over_repost() {
        let item = FeedItemParts {
            root: Some(post("at://did:plc:r/app.bsky.feed.post/1")),
            parent: Some(post("at://did:plc:p/app.bsky.feed.post/1")),
            reposter: Some(profile("did:plc:b")),
            pinned: true,
            ..parts()
        }
        .classify();
        assert!(matches!(item, FeedItem::Reply { .. }));
    }

    #[test]
    fn test_repost_wins_over_pinned() {
        let item = FeedItemParts {
            reposter: Some(profile("did:plc:b")),
            pinned: true,
            ..parts()
        }
        .classify();
        assert!(matches!(item, FeedItem::Repost { .. }));
    }

    #[test]
    fn test_root_without_parent_is_not_a_reply() {
        let item = FeedItemParts {
            root: Some(post("at://did:plc:r/app.bsky.feed.post/1")),
            ..parts()
        }
        .classify();
        assert!(matches!(item, FeedItem::Single(_)));

        let pinned = FeedItemParts {
            pinned: true,
            ..parts()
        }
        .classify();
        assert!(matches!(pinned, FeedItem::Pinned(_)));
    }

    #[test]
    fn test_source_keys() {
        assert_eq!(FeedSource::Following.key(), "home");
        let did = Did::new("did:plc:a").unwrap();
        assert_eq!(FeedSource::Author(did).key(), "author:did:plc:a");
        assert_eq!(FeedSource::Search(" rust ".into()).key(), "search:rust");
    }

    #[test]
    fn test_profile_name_fallbacks() {
        let mut p = profile("did:plc:a");
        assert_eq!(p.name(), "did:plc:a");
        p.handle = Some("a.test".into());
        assert_eq!(p.name(), "a.test");
        p.display_name = Some(String::new());
        assert_eq!(p.name(), "a.test");
        p.display_name = Some("A".into());
        assert_eq!(p.name(), "A");
    }
}
