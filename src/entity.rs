// SPDX-License-Identifier: MPL-2.0

//! Normalized cache records.
//!
//! Each struct maps to one table row. Extractors produce them from views,
//! the saver stages them by natural key and writes them in `Table::COMMIT_ORDER`.

use crate::cursor::{Cursor, SortKey};
use crate::ids::{AtUri, Cid, ConvoId, Did, MessageId, Timestamp, invalid_stored};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::fmt;

/// How much of an entity a sighting carried.
///
/// A later sighting only replaces a staged one of equal or lower completeness,
/// and stubs never overwrite a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Completeness {
    /// Only the key, written to satisfy a foreign key.
    Stub = 0,
    /// Embedded or partial view: no viewer state, maybe no counts.
    Basic = 1,
    Full = 2,
}

impl ToSql for Completeness {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for Completeness {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match i64::column_result(value)? {
            0 => Ok(Completeness::Stub),
            1 => Ok(Completeness::Basic),
            2 => Ok(Completeness::Full),
            _ => Err(invalid_stored()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntity {
    pub did: Did,
    pub handle: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub followers_count: Option<i64>,
    pub follows_count: Option<i64>,
    pub posts_count: Option<i64>,
    pub lists_count: Option<i64>,
    pub feedgens_count: Option<i64>,
    pub starter_packs_count: Option<i64>,
    pub is_labeler: bool,
    pub created_at: Option<Timestamp>,
    pub indexed_at: Option<Timestamp>,
    pub completeness: Completeness,
}

impl ProfileEntity {
    /// Placeholder for an actor known only by DID.
    pub fn stub(did: Did) -> Self {
        Self {
            did,
            handle: None,
            display_name: None,
            description: None,
            avatar: None,
            banner: None,
            followers_count: None,
            follows_count: None,
            posts_count: None,
            lists_count: None,
            feedgens_count: None,
            starter_packs_count: None,
            is_labeler: false,
            created_at: None,
            indexed_at: None,
            completeness: Completeness::Stub,
        }
    }
}

/// Relationship between a profile and the viewing account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileViewerStateEntity {
    pub did: Did,
    pub viewer: Did,
    pub muted: bool,
    pub blocked_by: bool,
    pub blocking: Option<AtUri>,
    pub following: Option<AtUri>,
    pub followed_by: Option<AtUri>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostEntity {
    pub uri: AtUri,
    pub cid: Option<Cid>,
    pub author: Did,
    pub text: Option<String>,
    /// Raw record as JSON, kept for fields the cache does not model.
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
}

impl PostEntity {
    pub fn stub(uri: AtUri, author: Did) -> Self {
        let created_at = uri.tid_timestamp();
        Self {
            uri,
            cid: None,
            author,
            text: None,
            record_json: None,
            reply_root: None,
            reply_parent: None,
            reply_count: None,
            repost_count: None,
            like_count: None,
            quote_count: None,
            created_at,
            indexed_at: None,
            completeness: Completeness::Stub,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostViewerStateEntity {
    pub post: AtUri,
    pub viewer: Did,
    pub like: Option<AtUri>,
    pub repost: Option<AtUri>,
    pub thread_muted: bool,
    pub reply_disabled: bool,
    pub pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalEmbedEntity {
    pub uri: String,
    pub title: String,
    pub description: String,
    pub thumb: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEmbedEntity {
    pub fullsize: String,
    pub thumb: String,
    pub alt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoEmbedEntity {
    pub cid: Cid,
    pub playlist: String,
    pub thumbnail: Option<String>,
    pub alt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Which embed a post carries. Rows live in one join table per kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum EmbedLink {
    External(String),
    Image { fullsize: String, position: u32 },
    Video(Cid),
    /// A quoted record: a post, feed generator or list.
    Record(AtUri),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PostEmbedLink {
    pub post: AtUri,
    pub link: EmbedLink,
}

/// Direct reply adjacency. Depth is never stored.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadEdgeEntity {
    pub child: AtUri,
    pub parent: AtUri,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEntity {
    /// Subject: a record uri or an account DID.
    pub uri: String,
    pub value: String,
    pub creator: Did,
    pub cid: Option<String>,
    pub created_at: Option<Timestamp>,
    /// A negation removes the label instead of writing it.
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDefinitionEntity {
    pub creator: Did,
    pub identifier: String,
    pub severity: String,
    pub blurs: String,
    pub default_setting: Option<String>,
    pub adult_only: bool,
    pub locales_json: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedGeneratorEntity {
    pub uri: AtUri,
    pub cid: Cid,
    pub creator: Did,
    pub service_did: Did,
    pub display_name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub like_count: Option<i64>,
    pub indexed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntity {
    pub uri: AtUri,
    pub cid: Cid,
    pub creator: Did,
    pub name: String,
    pub purpose: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub item_count: Option<i64>,
    pub indexed_at: Option<Timestamp>,
}

/// Paging session of one source for one viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStateEntity {
    pub viewer: Did,
    pub source: String,
    /// Instant the session began. A differing value tears down stored items.
    pub first_request_at: Timestamp,
    pub cursor: Cursor,
    pub next_offset: u64,
    pub refreshed_at: Timestamp,
}

/// One appearance of a post in one source for one viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItemEntity {
    pub viewer: Did,
    pub source: String,
    pub item_id: String,
    pub post: AtUri,
    pub sort_key: SortKey,
    pub reposter: Option<Did>,
    pub repost_uri: Option<AtUri>,
    pub reposted_at: Option<Timestamp>,
    pub reply_root: Option<AtUri>,
    pub reply_parent: Option<AtUri>,
    pub grandparent_author: Option<Did>,
    pub pinned: bool,
    pub feed_context: Option<String>,
}

impl FeedItemEntity {
    /// Reposts of the same post by different accounts are distinct items.
    pub fn item_id(post: &AtUri, reposter: Option<&Did>) -> String {
        match reposter {
            Some(by) => format!("{post}#repost:{by}"),
            None => post.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NotificationReason {
    Like,
    Repost,
    Follow,
    Mention,
    Reply,
    Quote,
    StarterpackJoined,
    Other(String),
}

impl NotificationReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "like" => Self::Like,
            "repost" => Self::Repost,
            "follow" => Self::Follow,
            "mention" => Self::Mention,
            "reply" => Self::Reply,
            "quote" => Self::Quote,
            "starterpack-joined" => Self::StarterpackJoined,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Like => "like",
            Self::Repost => "repost",
            Self::Follow => "follow",
            Self::Mention => "mention",
            Self::Reply => "reply",
            Self::Quote => "quote",
            Self::StarterpackJoined => "starterpack-joined",
            Self::Other(other) => other,
        }
    }

    /// Whether the notification record is itself a post.
    pub fn carries_post(&self) -> bool {
        matches!(self, Self::Mention | Self::Reply | Self::Quote)
    }
}

impl fmt::Display for NotificationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for NotificationReason {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for NotificationReason {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().map(Self::parse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEntity {
    pub viewer: Did,
    pub uri: AtUri,
    pub cid: Cid,
    pub author: Did,
    pub reason: NotificationReason,
    pub reason_subject: Option<String>,
    /// Set when the notification record is a cached post.
    pub post: Option<AtUri>,
    pub is_read: bool,
    pub indexed_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationEntity {
    pub owner: Did,
    pub id: ConvoId,
    pub rev: String,
    pub muted: bool,
    pub unread_count: i64,
    pub last_message: Option<MessageId>,
    pub last_activity_at: Option<Timestamp>,
    pub completeness: Completeness,
}

impl ConversationEntity {
    /// Placeholder for a conversation known only from one of its messages.
    pub fn stub(owner: Did, id: ConvoId) -> Self {
        Self {
            owner,
            id,
            rev: String::new(),
            muted: false,
            unread_count: 0,
            last_message: None,
            last_activity_at: None,
            completeness: Completeness::Stub,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConversationMemberEntity {
    pub owner: Did,
    pub convo: ConvoId,
    pub member: Did,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntity {
    pub owner: Did,
    pub convo: ConvoId,
    pub id: MessageId,
    pub rev: String,
    pub sender: Did,
    /// `None` for deleted messages.
    pub text: Option<String>,
    pub sent_at: Timestamp,
    pub deleted: bool,
}

/// Cache tables, listed in foreign-key dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Profiles,
    ProfileViewerState,
    Posts,
    PostViewerState,
    ExternalEmbeds,
    ImageEmbeds,
    VideoEmbeds,
    PostExternalEmbeds,
    PostImageEmbeds,
    PostVideoEmbeds,
    PostRecordEmbeds,
    ThreadEdges,
    Labels,
    LabelDefinitions,
    FeedGenerators,
    Lists,
    FeedState,
    FeedItems,
    Notifications,
    Conversations,
    ConversationMembers,
    Messages,
}

impl Table {
    /// Every referenced table precedes the tables referencing it.
    pub const COMMIT_ORDER: [Table; 22] = [
        Table::Profiles,
        Table::ProfileViewerState,
        Table::Posts,
        Table::PostViewerState,
        Table::ExternalEmbeds,
        Table::ImageEmbeds,
        Table::VideoEmbeds,
        Table::PostExternalEmbeds,
        Table::PostImageEmbeds,
        Table::PostVideoEmbeds,
        Table::PostRecordEmbeds,
        Table::ThreadEdges,
        Table::Labels,
        Table::LabelDefinitions,
        Table::FeedGenerators,
        Table::Lists,
        Table::FeedState,
        Table::FeedItems,
        Table::Notifications,
        Table::Conversations,
        Table::ConversationMembers,
        Table::Messages,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::ProfileViewerState => "profile_viewer_state",
            Table::Posts => "posts",
            Table::PostViewerState => "post_viewer_state",
            Table::ExternalEmbeds => "external_embeds",
            Table::ImageEmbeds => "image_embeds",
            Table::VideoEmbeds => "video_embeds",
            Table::PostExternalEmbeds => "post_external_embeds",
            Table::PostImageEmbeds => "post_image_embeds",
            Table::PostVideoEmbeds => "post_video_embeds",
            Table::PostRecordEmbeds => "post_record_embeds",
            Table::ThreadEdges => "thread_edges",
            Table::Labels => "labels",
            Table::LabelDefinitions => "label_definitions",
            Table::FeedGenerators => "feed_generators",
            Table::Lists => "lists",
            Table::FeedState => "feed_state",
            Table::FeedItems => "feed_items",
            Table::Notifications => "notifications",
            Table::Conversations => "conversations",
            Table::ConversationMembers => "conversation_members",
            Table::Messages => "messages",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Profile(ProfileEntity),
    ProfileViewerState(ProfileViewerStateEntity),
    Post(PostEntity),
    PostViewerState(PostViewerStateEntity),
    ExternalEmbed(ExternalEmbedEntity),
    ImageEmbed(ImageEmbedEntity),
    VideoEmbed(VideoEmbedEntity),
    PostEmbed(PostEmbedLink),
    ThreadEdge(ThreadEdgeEntity),
    Label(LabelEntity),
    LabelDefinition(LabelDefinitionEntity),
    FeedGenerator(FeedGeneratorEntity),
    List(ListEntity),
    FeedState(FeedStateEntity),
    FeedItem(FeedItemEntity),
    Notification(NotificationEntity),
    Conversation(ConversationEntity),
    ConversationMember(ConversationMemberEntity),
    Message(MessageEntity),
}

impl Entity {
    pub fn table(&self) -> Table {
        match self {
            Entity::Profile(_) => Table::Profiles,
            Entity::ProfileViewerState(_) => Table::ProfileViewerState,
            Entity::Post(_) => Table::Posts,
            Entity::PostViewerState(_) => Table::PostViewerState,
            Entity::ExternalEmbed(_) => Table::ExternalEmbeds,
            Entity::ImageEmbed(_) => Table::ImageEmbeds,
            Entity::VideoEmbed(_) => Table::VideoEmbeds,
            Entity::PostEmbed(link) => match link.link {
                EmbedLink::External(_) => Table::PostExternalEmbeds,
                EmbedLink::Image { .. } => Table::PostImageEmbeds,
                EmbedLink::Video(_) => Table::PostVideoEmbeds,
                EmbedLink::Record(_) => Table::PostRecordEmbeds,
            },
            Entity::ThreadEdge(_) => Table::ThreadEdges,
            Entity::Label(_) => Table::Labels,
            Entity::LabelDefinition(_) => Table::LabelDefinitions,
            Entity::FeedGenerator(_) => Table::FeedGenerators,
            Entity::List(_) => Table::Lists,
            Entity::FeedState(_) => Table::FeedState,
            Entity::FeedItem(_) => Table::FeedItems,
            Entity::Notification(_) => Table::Notifications,
            Entity::Conversation(_) => Table::Conversations,
            Entity::ConversationMember(_) => Table::ConversationMembers,
            Entity::Message(_) => Table::Messages,
        }
    }
}

macro_rules! entity_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Entity {
                fn from(value: $ty) -> Self {
                    Entity::$variant(value)
                }
            }
        )*
    };
}

entity_from!(
    Profile(ProfileEntity),
    ProfileViewerState(ProfileViewerStateEntity),
    Post(PostEntity),
    PostViewerState(PostViewerStateEntity),
    ExternalEmbed(ExternalEmbedEntity),
    ImageEmbed(ImageEmbedEntity),
    VideoEmbed(VideoEmbedEntity),
    PostEmbed(PostEmbedLink),
    ThreadEdge(ThreadEdgeEntity),
    Label(LabelEntity),
    LabelDefinition(LabelDefinitionEntity),
    FeedGenerator(FeedGeneratorEntity),
    List(ListEntity),
    FeedState(FeedStateEntity),
    FeedItem(FeedItemEntity),
    Notification(NotificationEntity),
    Conversation(ConversationEntity),
    ConversationMember(ConversationMemberEntity),
    Message(MessageEntity),
);

/// Entities implied by one view, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entities(Vec<Entity>);

impl Entities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entity: impl Into<Entity>) {
        self.0.push(entity.into());
    }

    pub fn extend(&mut self, other: Entities) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.0.iter()
    }

    pub fn posts(&self) -> impl Iterator<Item = &PostEntity> {
        self.0.iter().filter_map(|e| match e {
            Entity::Post(post) => Some(post),
            _ => None,
        })
    }

    pub fn profiles(&self) -> impl Iterator<Item = &ProfileEntity> {
        self.0.iter().filter_map(|e| match e {
            Entity::Profile(profile) => Some(profile),
            _ => None,
        })
    }
}

impl IntoIterator for Entities {
    type Item = Entity;
    type IntoIter = std::vec::IntoIter<Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<Entity> for Entities {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
