// SPDX-License-Identifier: MPL-2.0

//! Decoded AppView response graphs.
//!
//! These mirror the lexicon JSON shapes closely enough to be decoded straight
//! from what the AppView returns, so the rest of the crate never touches
//! atrium's generated types. Every union is a closed enum tagged by `$type`;
//! variants the server adds later decode as `Unknown` and are ignored by the
//! extractors.

use serde::Deserialize;
use serde::de::{DeserializeOwned, Deserializer};
use serde_json::Value;

/// A list element that either decoded cleanly or did not.
///
/// Pages are decoded item by item so one malformed entry never takes the
/// rest of the page down with it.
#[derive(Debug, Clone)]
pub enum Lenient<T> {
    Valid(T),
    Malformed(String),
}

impl<T> Lenient<T> {
    pub fn as_valid(&self) -> Result<&T, &str> {
        match self {
            Lenient::Valid(value) => Ok(value),
            Lenient::Malformed(error) => Err(error),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lenient<U> {
        match self {
            Lenient::Valid(value) => Lenient::Valid(f(value)),
            Lenient::Malformed(error) => Lenient::Malformed(error),
        }
    }
}

impl<T> From<T> for Lenient<T> {
    fn from(value: T) -> Self {
        Lenient::Valid(value)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Lenient<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match serde_json::from_value(value) {
            Ok(decoded) => Lenient::Valid(decoded),
            Err(e) => Lenient::Malformed(e.to_string()),
        })
    }
}

// ─── Actors ───

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub did: String,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub followers_count: Option<i64>,
    pub follows_count: Option<i64>,
    pub posts_count: Option<i64>,
    pub associated: Option<ProfileAssociated>,
    pub viewer: Option<ProfileViewerView>,
    #[serde(default)]
    pub labels: Vec<LabelView>,
    pub created_at: Option<String>,
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileAssociated {
    pub lists: Option<i64>,
    pub feedgens: Option<i64>,
    pub starter_packs: Option<i64>,
    pub labeler: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileViewerView {
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub blocked_by: bool,
    pub blocking: Option<String>,
    pub following: Option<String>,
    pub followed_by: Option<String>,
}

/// Author of a record the viewer is not allowed to see.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockedAuthor {
    pub did: String,
}

// ─── Posts ───

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileView,
    #[serde(default)]
    pub record: Value,
    pub embed: Option<EmbedView>,
    pub reply_count: Option<i64>,
    pub repost_count: Option<i64>,
    pub like_count: Option<i64>,
    pub quote_count: Option<i64>,
    pub indexed_at: Option<String>,
    pub viewer: Option<PostViewerView>,
    #[serde(default)]
    pub labels: Vec<LabelView>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostViewerView {
    pub repost: Option<String>,
    pub like: Option<String>,
    #[serde(default)]
    pub thread_muted: bool,
    #[serde(default)]
    pub reply_disabled: bool,
    #[serde(default)]
    pub pinned: bool,
}

/// Placeholder for a record that no longer exists or was detached.
#[derive(Debug, Clone, Deserialize)]
pub struct MissingRecord {
    pub uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockedRecord {
    pub uri: String,
    pub author: BlockedAuthor,
}

// ─── Embeds ───

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum EmbedView {
    #[serde(rename = "app.bsky.embed.images#view")]
    Images(ImagesView),
    #[serde(rename = "app.bsky.embed.external#view")]
    External(ExternalView),
    #[serde(rename = "app.bsky.embed.video#view")]
    Video(VideoView),
    #[serde(rename = "app.bsky.embed.record#view")]
    Record(RecordEmbedView),
    #[serde(rename = "app.bsky.embed.recordWithMedia#view")]
    RecordWithMedia(RecordWithMediaView),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesView {
    pub images: Vec<ImageView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageView {
    pub thumb: String,
    pub fullsize: String,
    #[serde(default)]
    pub alt: String,
    pub aspect_ratio: Option<AspectRatio>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalView {
    pub external: ExternalLinkView,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalLinkView {
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub thumb: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoView {
    pub cid: String,
    pub playlist: String,
    pub thumbnail: Option<String>,
    pub alt: Option<String>,
    pub aspect_ratio: Option<AspectRatio>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordEmbedView {
    pub record: EmbeddedRecord,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordWithMediaView {
    pub record: RecordEmbedView,
    pub media: Box<EmbedView>,
}

/// The record slot of a quote. Only `Post` carries a hydrated post.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum EmbeddedRecord {
    #[serde(rename = "app.bsky.embed.record#viewRecord")]
    Post(Box<EmbeddedPostView>),
    #[serde(rename = "app.bsky.embed.record#viewNotFound")]
    NotFound(MissingRecord),
    #[serde(rename = "app.bsky.embed.record#viewBlocked")]
    Blocked(BlockedRecord),
    #[serde(rename = "app.bsky.embed.record#viewDetached")]
    Detached(MissingRecord),
    #[serde(rename = "app.bsky.feed.defs#generatorView")]
    Generator(Box<GeneratorView>),
    #[serde(rename = "app.bsky.graph.defs#listView")]
    List(Box<ListView>),
    #[serde(other)]
    Unknown,
}

/// A quoted post. Its own embeds may quote again, as deep as the server sent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedPostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileView,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub labels: Vec<LabelView>,
    pub reply_count: Option<i64>,
    pub repost_count: Option<i64>,
    pub like_count: Option<i64>,
    pub quote_count: Option<i64>,
    pub indexed_at: Option<String>,
    #[serde(default)]
    pub embeds: Vec<EmbedView>,
}

// ─── Feeds ───

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedViewPost {
    pub post: PostView,
    pub reply: Option<ReplyRefView>,
    pub reason: Option<ReasonView>,
    pub feed_context: Option<String>,
}

impl From<PostView> for FeedViewPost {
    fn from(post: PostView) -> Self {
        Self {
            post,
            reply: None,
            reason: None,
            feed_context: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRefView {
    pub root: ReplyPost,
    pub parent: ReplyPost,
    pub grandparent_author: Option<ProfileView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum ReplyPost {
    #[serde(rename = "app.bsky.feed.defs#postView")]
    Post(Box<PostView>),
    #[serde(rename = "app.bsky.feed.defs#notFoundPost")]
    NotFound(MissingRecord),
    #[serde(rename = "app.bsky.feed.defs#blockedPost")]
    Blocked(BlockedRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum ReasonView {
    #[serde(rename = "app.bsky.feed.defs#reasonRepost")]
    Repost(RepostReasonView),
    #[serde(rename = "app.bsky.feed.defs#reasonPin")]
    Pin,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepostReasonView {
    pub by: ProfileView,
    pub indexed_at: Option<String>,
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub feed: Vec<Lenient<FeedViewPost>>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchPostsResponse {
    #[serde(default)]
    pub posts: Vec<Lenient<PostView>>,
    pub cursor: Option<String>,
}

impl From<SearchPostsResponse> for FeedResponse {
    fn from(response: SearchPostsResponse) -> Self {
        Self {
            feed: response
                .posts
                .into_iter()
                .map(|post| post.map(FeedViewPost::from))
                .collect(),
            cursor: response.cursor,
        }
    }
}

// ─── Threads ───

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum ThreadNode {
    #[serde(rename = "app.bsky.feed.defs#threadViewPost")]
    Post(Box<ThreadViewPost>),
    #[serde(rename = "app.bsky.feed.defs#notFoundPost")]
    NotFound(MissingRecord),
    #[serde(rename = "app.bsky.feed.defs#blockedPost")]
    Blocked(BlockedRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadViewPost {
    pub post: PostView,
    pub parent: Option<ThreadNode>,
    #[serde(default)]
    pub replies: Vec<ThreadNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadResponse {
    pub thread: ThreadNode,
}

// ─── Notifications ───

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileView,
    pub reason: String,
    pub reason_subject: Option<String>,
    #[serde(default)]
    pub record: Value,
    #[serde(default)]
    pub is_read: bool,
    pub indexed_at: String,
    #[serde(default)]
    pub labels: Vec<LabelView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsResponse {
    #[serde(default)]
    pub notifications: Vec<Lenient<NotificationView>>,
    pub cursor: Option<String>,
}

// ─── Chat ───

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvoView {
    pub id: String,
    #[serde(default)]
    pub rev: String,
    #[serde(default)]
    pub members: Vec<ProfileView>,
    pub last_message: Option<ConvoMessage>,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub unread_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum ConvoMessage {
    #[serde(rename = "chat.bsky.convo.defs#messageView")]
    Message(MessageView),
    #[serde(rename = "chat.bsky.convo.defs#deletedMessageView")]
    Deleted(DeletedMessageView),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    #[serde(default)]
    pub rev: String,
    #[serde(default)]
    pub text: String,
    pub sender: MessageSender,
    pub sent_at: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessageView {
    pub id: String,
    #[serde(default)]
    pub rev: String,
    pub sender: MessageSender,
    pub sent_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSender {
    pub did: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConvosResponse {
    #[serde(default)]
    pub convos: Vec<Lenient<ConvoView>>,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub messages: Vec<Lenient<ConvoMessage>>,
    pub cursor: Option<String>,
}

// ─── Labels, generators, lists ───

#[derive(Debug, Clone, Deserialize)]
pub struct LabelView {
    pub src: String,
    pub uri: String,
    pub cid: Option<String>,
    pub val: String,
    #[serde(default)]
    pub neg: bool,
    pub cts: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorView {
    pub uri: String,
    pub cid: String,
    pub did: String,
    pub creator: ProfileView,
    pub display_name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub like_count: Option<i64>,
    #[serde(default)]
    pub labels: Vec<LabelView>,
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListView {
    pub uri: String,
    pub cid: String,
    /// Absent on the basic list view; the owner is then the uri authority.
    pub creator: Option<ProfileView>,
    pub name: String,
    pub purpose: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub list_item_count: Option<i64>,
    #[serde(default)]
    pub labels: Vec<LabelView>,
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "$type")]
pub enum LabelerViewItem {
    #[serde(rename = "app.bsky.labeler.defs#labelerViewDetailed")]
    Detailed(LabelerView),
    #[serde(rename = "app.bsky.labeler.defs#labelerView")]
    Basic(LabelerView),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelerView {
    pub uri: String,
    pub cid: String,
    pub creator: ProfileView,
    pub like_count: Option<i64>,
    pub policies: Option<LabelerPolicies>,
    #[serde(default)]
    pub labels: Vec<LabelView>,
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelerPolicies {
    #[serde(default)]
    pub label_values: Vec<String>,
    #[serde(default)]
    pub label_value_definitions: Vec<LabelValueDefinitionView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelValueDefinitionView {
    pub identifier: String,
    pub severity: String,
    pub blurs: String,
    pub default_setting: Option<String>,
    pub adult_only: Option<bool>,
    #[serde(default)]
    pub locales: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelerServicesResponse {
    #[serde(default)]
    pub views: Vec<Lenient<LabelerViewItem>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedGeneratorsResponse {
    #[serde(default)]
    pub feeds: Vec<Lenient<GeneratorView>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_embed_type_decodes_as_unknown() {
        let embed: EmbedView =
            serde_json::from_value(json!({"$type": "app.bsky.embed.poll#view", "q": "?"}))
                .unwrap();
        assert!(matches!(embed, EmbedView::Unknown));
    }

    #[test]
    fn test_malformed_feed_item_does_not_fail_page() {
        let page: FeedResponse = serde_json::from_value(json!({
            "feed": [
                {"post": {"cid": "bafy", "author": {"did": "did:plc:a"}}},
                {"post": {
                    "uri": "at://did:plc:a/app.bsky.feed.post/3kaaaaaaaaaa2",
                    "cid": "bafy",
                    "author": {"did": "did:plc:a", "handle": "a.test"},
                    "record": {"text": "hi"}
                }}
            ],
            "cursor": "next"
        }))
        .unwrap();

        assert_eq!(page.feed.len(), 2);
        assert!(page.feed[0].as_valid().is_err());
        assert!(page.feed[1].as_valid().is_ok());
        assert_eq!(page.cursor.as_deref(), Some("next"));
    }

    #[test]
    fn test_nested_quote_decodes() {
        let embed: EmbedView = serde_json::from_value(json!({
            "$type": "app.bsky.embed.record#view",
            "record": {
                "$type": "app.bsky.embed.record#viewRecord",
                "uri": "at://did:plc:b/app.bsky.feed.post/3kbbbbbbbbbb2",
                "cid": "bafyb",
                "author": {"did": "did:plc:b"},
                "value": {"text": "quoted"},
                "embeds": [{
                    "$type": "app.bsky.embed.record#view",
                    "record": {
                        "$type": "app.bsky.embed.record#viewBlocked",
                        "uri": "at://did:plc:c/app.bsky.feed.post/3kcccccccccc2",
                        "blocked": true,
                        "author": {"did": "did:plc:c"}
                    }
                }]
            }
        }))
        .unwrap();

        let EmbedView::Record(record) = embed else {
            panic!("expected record embed");
        };
        let EmbeddedRecord::Post(quoted) = record.record else {
            panic!("expected quoted post");
        };
        assert!(matches!(
            &quoted.embeds[0],
            EmbedView::Record(RecordEmbedView {
                record: EmbeddedRecord::Blocked(_)
            })
        ));
    }

    #[test]
    fn test_search_response_converts_to_feed() {
        let search: SearchPostsResponse = serde_json::from_value(json!({
            "posts": [{
                "uri": "at://did:plc:a/app.bsky.feed.post/3kaaaaaaaaaa2",
                "cid": "bafy",
                "author": {"did": "did:plc:a"}
            }]
        }))
        .unwrap();
        let feed = FeedResponse::from(search);
        let item = feed.feed[0].as_valid().unwrap();
        assert!(item.reason.is_none());
        assert!(feed.cursor.is_none());
    }
}
