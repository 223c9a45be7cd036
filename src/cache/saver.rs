// SPDX-License-Identifier: MPL-2.0

//! Staging buffer for one ingestion pass.
//!
//! Extractors stage entities here while a response graph is walked. Nothing
//! touches the database until `commit`, which writes every table in
//! `Table::COMMIT_ORDER` inside one IMMEDIATE transaction. Each saver owns its
//! buffer outright, so concurrent passes never see each other's staging.

use crate::cache::{CacheDb, CacheError};
use crate::entity::{
    Completeness, ConversationEntity, ConversationMemberEntity, EmbedLink, Entities, Entity,
    ExternalEmbedEntity, FeedGeneratorEntity, FeedItemEntity, FeedStateEntity, ImageEmbedEntity,
    LabelDefinitionEntity, LabelEntity, ListEntity, MessageEntity, NotificationEntity,
    PostEmbedLink, PostEntity, PostViewerStateEntity, ProfileEntity, ProfileViewerStateEntity,
    Table, ThreadEdgeEntity, VideoEmbedEntity,
};
use crate::extract::ExtractError;
use crate::ids::{AtUri, Cid, ConvoId, Did, MessageId, Timestamp};
use rusqlite::{OptionalExtension, Transaction, params};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

/// Entities whose sightings can be more or less complete.
trait Ranked {
    fn completeness(&self) -> Completeness;
}

impl Ranked for ProfileEntity {
    fn completeness(&self) -> Completeness {
        self.completeness
    }
}

impl Ranked for PostEntity {
    fn completeness(&self) -> Completeness {
        self.completeness
    }
}

impl Ranked for ConversationEntity {
    fn completeness(&self) -> Completeness {
        self.completeness
    }
}

/// Last write wins, except that a less complete sighting never replaces a
/// more complete one.
fn stage_ranked<K: Ord, V: Ranked>(map: &mut BTreeMap<K, V>, key: K, value: V) {
    match map.get(&key) {
        Some(staged) if staged.completeness() > value.completeness() => {}
        _ => {
            map.insert(key, value);
        }
    }
}

type SessionKey = (Did, String);

#[derive(Debug, Default)]
pub struct MultiEntitySaver {
    profiles: BTreeMap<Did, ProfileEntity>,
    profile_viewer_state: BTreeMap<(Did, Did), ProfileViewerStateEntity>,
    posts: BTreeMap<AtUri, PostEntity>,
    post_viewer_state: BTreeMap<(AtUri, Did), PostViewerStateEntity>,
    external_embeds: BTreeMap<String, ExternalEmbedEntity>,
    image_embeds: BTreeMap<String, ImageEmbedEntity>,
    video_embeds: BTreeMap<Cid, VideoEmbedEntity>,
    post_external_embeds: BTreeSet<(AtUri, String)>,
    post_image_embeds: BTreeMap<(AtUri, String), u32>,
    post_video_embeds: BTreeSet<(AtUri, Cid)>,
    post_record_embeds: BTreeSet<(AtUri, AtUri)>,
    thread_edges: BTreeSet<ThreadEdgeEntity>,
    labels: BTreeMap<(String, String), LabelEntity>,
    label_definitions: BTreeMap<(Did, String), LabelDefinitionEntity>,
    feed_generators: BTreeMap<AtUri, FeedGeneratorEntity>,
    lists: BTreeMap<AtUri, ListEntity>,
    feed_state: BTreeMap<SessionKey, FeedStateEntity>,
    feed_items: BTreeMap<(Did, String, String), FeedItemEntity>,
    notifications: BTreeMap<(Did, AtUri), NotificationEntity>,
    conversations: BTreeMap<(Did, ConvoId), ConversationEntity>,
    conversation_members: BTreeSet<ConversationMemberEntity>,
    messages: BTreeMap<(Did, MessageId), MessageEntity>,
    skipped: usize,
}

impl MultiEntitySaver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage one entity under its natural key.
    pub fn add(&mut self, entity: impl Into<Entity>) {
        match entity.into() {
            Entity::Profile(profile) => {
                stage_ranked(&mut self.profiles, profile.did.clone(), profile)
            }
            Entity::ProfileViewerState(state) => {
                let key = (state.did.clone(), state.viewer.clone());
                self.profile_viewer_state.insert(key, state);
            }
            Entity::Post(post) => stage_ranked(&mut self.posts, post.uri.clone(), post),
            Entity::PostViewerState(state) => {
                let key = (state.post.clone(), state.viewer.clone());
                self.post_viewer_state.insert(key, state);
            }
            Entity::ExternalEmbed(embed) => {
                self.external_embeds.insert(embed.uri.clone(), embed);
            }
            Entity::ImageEmbed(embed) => {
                self.image_embeds.insert(embed.fullsize.clone(), embed);
            }
            Entity::VideoEmbed(embed) => {
                self.video_embeds.insert(embed.cid.clone(), embed);
            }
            Entity::PostEmbed(PostEmbedLink { post, link }) => match link {
                EmbedLink::External(uri) => {
                    self.post_external_embeds.insert((post, uri));
                }
                EmbedLink::Image { fullsize, position } => {
                    self.post_image_embeds.insert((post, fullsize), position);
                }
                EmbedLink::Video(cid) => {
                    self.post_video_embeds.insert((post, cid));
                }
                EmbedLink::Record(record) => {
                    self.post_record_embeds.insert((post, record));
                }
            },
            Entity::ThreadEdge(edge) => {
                self.thread_edges.insert(edge);
            }
            Entity::Label(label) => {
                let key = (label.uri.clone(), label.value.clone());
                self.labels.insert(key, label);
            }
            Entity::LabelDefinition(definition) => {
                let key = (definition.creator.clone(), definition.identifier.clone());
                self.label_definitions.insert(key, definition);
            }
            Entity::FeedGenerator(generator) => {
                self.feed_generators.insert(generator.uri.clone(), generator);
            }
            Entity::List(list) => {
                self.lists.insert(list.uri.clone(), list);
            }
            Entity::FeedState(state) => {
                let key = (state.viewer.clone(), state.source.clone());
                self.feed_state.insert(key, state);
            }
            Entity::FeedItem(item) => {
                let key = (item.viewer.clone(), item.source.clone(), item.item_id.clone());
                self.feed_items.insert(key, item);
            }
            Entity::Notification(notification) => {
                let key = (notification.viewer.clone(), notification.uri.clone());
                self.notifications.insert(key, notification);
            }
            Entity::Conversation(convo) => {
                let key = (convo.owner.clone(), convo.id.clone());
                stage_ranked(&mut self.conversations, key, convo);
            }
            Entity::ConversationMember(member) => {
                self.conversation_members.insert(member);
            }
            Entity::Message(message) => {
                let key = (message.owner.clone(), message.id.clone());
                self.messages.insert(key, message);
            }
        }
    }

    pub fn add_all(&mut self, entities: Entities) {
        for entity in entities {
            self.add(entity);
        }
    }

    /// Stage one extracted item, or skip it if extraction failed.
    ///
    /// Returns whether the item was staged. Extraction is all-or-nothing per
    /// item, so a skipped item leaves no partial rows behind.
    pub fn stage(&mut self, item: impl fmt::Display, extracted: Result<Entities, ExtractError>) -> bool {
        match extracted {
            Ok(entities) => {
                self.add_all(entities);
                true
            }
            Err(error) => {
                warn!(%item, %error, "skipping malformed item");
                self.skipped += 1;
                false
            }
        }
    }

    /// Record an item that never decoded.
    pub fn skip_malformed(&mut self, item: impl fmt::Display, error: &str) {
        warn!(%item, error, "skipping undecodable item");
        self.skipped += 1;
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.staged_rows() == 0
    }

    fn staged_rows(&self) -> usize {
        self.profiles.len()
            + self.profile_viewer_state.len()
            + self.posts.len()
            + self.post_viewer_state.len()
            + self.external_embeds.len()
            + self.image_embeds.len()
            + self.video_embeds.len()
            + self.post_external_embeds.len()
            + self.post_image_embeds.len()
            + self.post_video_embeds.len()
            + self.post_record_embeds.len()
            + self.thread_edges.len()
            + self.labels.len()
            + self.label_definitions.len()
            + self.feed_generators.len()
            + self.lists.len()
            + self.feed_state.len()
            + self.feed_items.len()
            + self.notifications.len()
            + self.conversations.len()
            + self.conversation_members.len()
            + self.messages.len()
    }

    /// Write everything staged as one transaction.
    ///
    /// Tables are written in `Table::COMMIT_ORDER`, so every foreign key
    /// points at a row written earlier in the same transaction or already
    /// stored. If any statement fails the whole pass rolls back.
    pub fn commit(self, db: &CacheDb) -> Result<CommitSummary, CacheError> {
        let now = Timestamp::now();
        let skipped = self.skipped;

        let summary = db.write(|tx| {
            let mut summary = CommitSummary {
                skipped,
                ..CommitSummary::default()
            };
            for table in Table::COMMIT_ORDER {
                let rows = self.write_table(tx, table, now, &mut summary)?;
                if rows > 0 {
                    summary.rows.insert(table, rows);
                }
            }
            Ok(summary)
        })?;

        debug!(
            rows = summary.total(),
            skipped = summary.skipped,
            tables = %summary,
            "committed entities"
        );
        Ok(summary)
    }

    fn write_table(
        &self,
        tx: &Transaction<'_>,
        table: Table,
        now: Timestamp,
        summary: &mut CommitSummary,
    ) -> Result<usize, CacheError> {
        match table {
            Table::Profiles => self.write_profiles(tx, now),
            Table::ProfileViewerState => self.write_profile_viewer_state(tx),
            Table::Posts => self.write_posts(tx, now),
            Table::PostViewerState => self.write_post_viewer_state(tx),
            Table::ExternalEmbeds => self.write_external_embeds(tx),
            Table::ImageEmbeds => self.write_image_embeds(tx),
            Table::VideoEmbeds => self.write_video_embeds(tx),
            Table::PostExternalEmbeds => self.write_post_external_embeds(tx),
            Table::PostImageEmbeds => self.write_post_image_embeds(tx),
            Table::PostVideoEmbeds => self.write_post_video_embeds(tx),
            Table::PostRecordEmbeds => self.write_post_record_embeds(tx),
            Table::ThreadEdges => self.write_thread_edges(tx),
            Table::Labels => self.write_labels(tx),
            Table::LabelDefinitions => self.write_label_definitions(tx),
            Table::FeedGenerators => self.write_feed_generators(tx, now),
            Table::Lists => self.write_lists(tx, now),
            Table::FeedState => self.write_feed_state(tx, summary),
            Table::FeedItems => self.write_feed_items(tx, now, summary),
            Table::Notifications => self.write_notifications(tx, now),
            Table::Conversations => self.write_conversations(tx, now),
            Table::ConversationMembers => self.write_conversation_members(tx),
            Table::Messages => self.write_messages(tx, now),
        }
    }

    fn write_profiles(&self, tx: &Transaction<'_>, now: Timestamp) -> Result<usize, CacheError> {
        let mut stub = tx.prepare_cached(
            "INSERT INTO profiles (did, completeness, fetched_at) VALUES (?1, 0, ?2)
             ON CONFLICT(did) DO NOTHING",
        )?;
        let mut upsert = tx.prepare_cached(
            r#"
            INSERT INTO profiles (
                did, handle, display_name, description, avatar, banner,
                followers_count, follows_count, posts_count,
                lists_count, feedgens_count, starter_packs_count, is_labeler,
                created_at, indexed_at, completeness, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(did) DO UPDATE SET
                handle = COALESCE(excluded.handle, profiles.handle),
                display_name = excluded.display_name,
                avatar = excluded.avatar,
                description = COALESCE(excluded.description, profiles.description),
                banner = COALESCE(excluded.banner, profiles.banner),
                followers_count = COALESCE(excluded.followers_count, profiles.followers_count),
                follows_count = COALESCE(excluded.follows_count, profiles.follows_count),
                posts_count = COALESCE(excluded.posts_count, profiles.posts_count),
                lists_count = COALESCE(excluded.lists_count, profiles.lists_count),
                feedgens_count = COALESCE(excluded.feedgens_count, profiles.feedgens_count),
                starter_packs_count = COALESCE(excluded.starter_packs_count, profiles.starter_packs_count),
                is_labeler = MAX(excluded.is_labeler, profiles.is_labeler),
                created_at = COALESCE(excluded.created_at, profiles.created_at),
                indexed_at = COALESCE(excluded.indexed_at, profiles.indexed_at),
                completeness = MAX(excluded.completeness, profiles.completeness),
                fetched_at = excluded.fetched_at
            "#,
        )?;

        let mut rows = 0;
        for p in self.profiles.values() {
            rows += if p.completeness == Completeness::Stub {
                stub.execute(params![p.did, now])?
            } else {
                upsert.execute(params![
                    p.did,
                    p.handle,
                    p.display_name,
                    p.description,
                    p.avatar,
                    p.banner,
                    p.followers_count,
                    p.follows_count,
                    p.posts_count,
                    p.lists_count,
                    p.feedgens_count,
                    p.starter_packs_count,
                    p.is_labeler,
                    p.created_at,
                    p.indexed_at,
                    p.completeness,
                    now,
                ])?
            };
        }
        Ok(rows)
    }

    fn write_profile_viewer_state(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO profile_viewer_state (
                did, viewer_did, muted, blocked_by, blocking, following, followed_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(did, viewer_did) DO UPDATE SET
                muted = excluded.muted,
                blocked_by = excluded.blocked_by,
                blocking = excluded.blocking,
                following = excluded.following,
                followed_by = excluded.followed_by
            "#,
        )?;

        let mut rows = 0;
        for s in self.profile_viewer_state.values() {
            rows += stmt.execute(params![
                s.did,
                s.viewer,
                s.muted,
                s.blocked_by,
                s.blocking,
                s.following,
                s.followed_by,
            ])?;
        }
        Ok(rows)
    }

    fn write_posts(&self, tx: &Transaction<'_>, now: Timestamp) -> Result<usize, CacheError> {
        let mut stub = tx.prepare_cached(
            "INSERT INTO posts (uri, author_did, created_at, completeness, fetched_at)
             VALUES (?1, ?2, ?3, 0, ?4)
             ON CONFLICT(uri) DO NOTHING",
        )?;
        let mut upsert = tx.prepare_cached(
            r#"
            INSERT INTO posts (
                uri, cid, author_did, text, record_json, reply_root, reply_parent,
                reply_count, repost_count, like_count, quote_count,
                created_at, indexed_at, completeness, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(uri) DO UPDATE SET
                cid = COALESCE(excluded.cid, posts.cid),
                author_did = excluded.author_did,
                text = COALESCE(excluded.text, posts.text),
                record_json = COALESCE(excluded.record_json, posts.record_json),
                reply_root = COALESCE(excluded.reply_root, posts.reply_root),
                reply_parent = COALESCE(excluded.reply_parent, posts.reply_parent),
                reply_count = COALESCE(excluded.reply_count, posts.reply_count),
                repost_count = COALESCE(excluded.repost_count, posts.repost_count),
                like_count = COALESCE(excluded.like_count, posts.like_count),
                quote_count = COALESCE(excluded.quote_count, posts.quote_count),
                created_at = COALESCE(excluded.created_at, posts.created_at),
                indexed_at = COALESCE(excluded.indexed_at, posts.indexed_at),
                completeness = MAX(excluded.completeness, posts.completeness),
                fetched_at = excluded.fetched_at
            "#,
        )?;

        let mut rows = 0;
        for p in self.posts.values() {
            rows += if p.completeness == Completeness::Stub {
                stub.execute(params![p.uri, p.author, p.created_at, now])?
            } else {
                upsert.execute(params![
                    p.uri,
                    p.cid,
                    p.author,
                    p.text,
                    p.record_json,
                    p.reply_root,
                    p.reply_parent,
                    p.reply_count,
                    p.repost_count,
                    p.like_count,
                    p.quote_count,
                    p.created_at,
                    p.indexed_at,
                    p.completeness,
                    now,
                ])?
            };
        }
        Ok(rows)
    }

    fn write_post_viewer_state(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut rows = 0;
        for s in self.post_viewer_state.values() {
            rows += upsert_post_viewer_state(tx, s)?;
        }
        Ok(rows)
    }

    fn write_external_embeds(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO external_embeds (uri, title, description, thumb)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(uri) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                thumb = excluded.thumb
            "#,
        )?;

        let mut rows = 0;
        for e in self.external_embeds.values() {
            rows += stmt.execute(params![e.uri, e.title, e.description, e.thumb])?;
        }
        Ok(rows)
    }

    fn write_image_embeds(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO image_embeds (fullsize, thumb, alt, width, height)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(fullsize) DO UPDATE SET
                thumb = excluded.thumb,
                alt = excluded.alt,
                width = excluded.width,
                height = excluded.height
            "#,
        )?;

        let mut rows = 0;
        for e in self.image_embeds.values() {
            rows += stmt.execute(params![e.fullsize, e.thumb, e.alt, e.width, e.height])?;
        }
        Ok(rows)
    }

    fn write_video_embeds(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO video_embeds (cid, playlist, thumbnail, alt, width, height)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(cid) DO UPDATE SET
                playlist = excluded.playlist,
                thumbnail = excluded.thumbnail,
                alt = excluded.alt,
                width = excluded.width,
                height = excluded.height
            "#,
        )?;

        let mut rows = 0;
        for e in self.video_embeds.values() {
            rows += stmt.execute(params![e.cid, e.playlist, e.thumbnail, e.alt, e.width, e.height])?;
        }
        Ok(rows)
    }

    fn write_post_external_embeds(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO post_external_embeds (post_uri, external_uri) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
        )?;
        let mut rows = 0;
        for (post, uri) in &self.post_external_embeds {
            rows += stmt.execute(params![post, uri])?;
        }
        Ok(rows)
    }

    fn write_post_image_embeds(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO post_image_embeds (post_uri, image_fullsize, position) VALUES (?1, ?2, ?3)
             ON CONFLICT(post_uri, image_fullsize) DO UPDATE SET position = excluded.position
             WHERE position != excluded.position",
        )?;
        let mut rows = 0;
        for ((post, fullsize), position) in &self.post_image_embeds {
            rows += stmt.execute(params![post, fullsize, position])?;
        }
        Ok(rows)
    }

    fn write_post_video_embeds(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO post_video_embeds (post_uri, video_cid) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
        )?;
        let mut rows = 0;
        for (post, cid) in &self.post_video_embeds {
            rows += stmt.execute(params![post, cid])?;
        }
        Ok(rows)
    }

    fn write_post_record_embeds(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO post_record_embeds (post_uri, record_uri) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
        )?;
        let mut rows = 0;
        for (post, record) in &self.post_record_embeds {
            rows += stmt.execute(params![post, record])?;
        }
        Ok(rows)
    }

    fn write_thread_edges(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO thread_edges (child_uri, parent_uri) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
        )?;
        let mut rows = 0;
        for edge in &self.thread_edges {
            rows += stmt.execute(params![edge.child, edge.parent])?;
        }
        Ok(rows)
    }

    fn write_labels(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut negate = tx.prepare_cached("DELETE FROM labels WHERE uri = ?1 AND value = ?2")?;
        let mut upsert = tx.prepare_cached(
            r#"
            INSERT INTO labels (uri, value, creator_did, cid, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(uri, value) DO UPDATE SET
                creator_did = excluded.creator_did,
                cid = excluded.cid,
                created_at = excluded.created_at
            "#,
        )?;

        let mut rows = 0;
        for l in self.labels.values() {
            rows += if l.negated {
                negate.execute(params![l.uri, l.value])?
            } else {
                upsert.execute(params![l.uri, l.value, l.creator, l.cid, l.created_at])?
            };
        }
        Ok(rows)
    }

    fn write_label_definitions(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO label_definitions (
                creator_did, identifier, severity, blurs, default_setting, adult_only, locales_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(creator_did, identifier) DO UPDATE SET
                severity = excluded.severity,
                blurs = excluded.blurs,
                default_setting = excluded.default_setting,
                adult_only = excluded.adult_only,
                locales_json = excluded.locales_json
            "#,
        )?;

        let mut rows = 0;
        for d in self.label_definitions.values() {
            rows += stmt.execute(params![
                d.creator,
                d.identifier,
                d.severity,
                d.blurs,
                d.default_setting,
                d.adult_only,
                d.locales_json,
            ])?;
        }
        Ok(rows)
    }

    fn write_feed_generators(&self, tx: &Transaction<'_>, now: Timestamp) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO feed_generators (
                uri, cid, creator_did, service_did, display_name, description, avatar,
                like_count, indexed_at, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(uri) DO UPDATE SET
                cid = excluded.cid,
                creator_did = excluded.creator_did,
                service_did = excluded.service_did,
                display_name = excluded.display_name,
                description = excluded.description,
                avatar = excluded.avatar,
                like_count = COALESCE(excluded.like_count, feed_generators.like_count),
                indexed_at = excluded.indexed_at,
                fetched_at = excluded.fetched_at
            "#,
        )?;

        let mut rows = 0;
        for g in self.feed_generators.values() {
            rows += stmt.execute(params![
                g.uri,
                g.cid,
                g.creator,
                g.service_did,
                g.display_name,
                g.description,
                g.avatar,
                g.like_count,
                g.indexed_at,
                now,
            ])?;
        }
        Ok(rows)
    }

    fn write_lists(&self, tx: &Transaction<'_>, now: Timestamp) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO lists (
                uri, cid, creator_did, name, purpose, description, avatar,
                item_count, indexed_at, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(uri) DO UPDATE SET
                cid = excluded.cid,
                name = excluded.name,
                purpose = excluded.purpose,
                description = excluded.description,
                avatar = excluded.avatar,
                item_count = COALESCE(excluded.item_count, lists.item_count),
                indexed_at = excluded.indexed_at,
                fetched_at = excluded.fetched_at
            "#,
        )?;

        let mut rows = 0;
        for l in self.lists.values() {
            rows += stmt.execute(params![
                l.uri,
                l.cid,
                l.creator,
                l.name,
                l.purpose,
                l.description,
                l.avatar,
                l.item_count,
                l.indexed_at,
                now,
            ])?;
        }
        Ok(rows)
    }

    /// Upsert paging sessions, tearing down the items of any session the new
    /// one replaces.
    ///
    /// The check runs inside the commit transaction, so two passes for the
    /// same source are serialized by the store. A page from a session older
    /// than the stored one is discarded instead of clobbering newer items.
    fn write_feed_state(
        &self,
        tx: &Transaction<'_>,
        summary: &mut CommitSummary,
    ) -> Result<usize, CacheError> {
        let mut current = tx.prepare_cached(
            "SELECT first_request_at FROM feed_state WHERE viewer_did = ?1 AND source = ?2",
        )?;
        let mut clear =
            tx.prepare_cached("DELETE FROM feed_items WHERE viewer_did = ?1 AND source = ?2")?;
        let mut upsert = tx.prepare_cached(
            r#"
            INSERT INTO feed_state (
                viewer_did, source, first_request_at, cursor, has_more, next_offset, refreshed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(viewer_did, source) DO UPDATE SET
                first_request_at = excluded.first_request_at,
                cursor = excluded.cursor,
                has_more = excluded.has_more,
                next_offset = excluded.next_offset,
                refreshed_at = excluded.refreshed_at
            "#,
        )?;

        let mut rows = 0;
        for ((viewer, source), state) in &self.feed_state {
            let stored: Option<Timestamp> = current
                .query_row(params![viewer, source], |row| row.get(0))
                .optional()?;

            match stored {
                Some(stored) if stored > state.first_request_at => {
                    debug!(%source, "discarding page from a superseded session");
                    summary.superseded.push((viewer.clone(), source.clone()));
                    continue;
                }
                Some(stored) if stored < state.first_request_at => {
                    let removed = clear.execute(params![viewer, source])?;
                    info!(%source, removed, "new paging session, cleared cached items");
                    summary.invalidated.push((viewer.clone(), source.clone()));
                }
                _ => {}
            }

            let next_offset = i64::try_from(state.next_offset).unwrap_or(i64::MAX);
            rows += upsert.execute(params![
                viewer,
                source,
                state.first_request_at,
                state.cursor.token(),
                !state.cursor.is_exhausted(),
                next_offset,
                state.refreshed_at,
            ])?;
        }
        Ok(rows)
    }

    fn write_feed_items(
        &self,
        tx: &Transaction<'_>,
        now: Timestamp,
        summary: &CommitSummary,
    ) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO feed_items (
                viewer_did, source, item_id, post_uri, sort_key,
                reposter_did, repost_uri, reposted_at,
                reply_root, reply_parent, grandparent_author,
                pinned, feed_context, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(viewer_did, source, item_id) DO UPDATE SET
                post_uri = excluded.post_uri,
                sort_key = excluded.sort_key,
                reposter_did = excluded.reposter_did,
                repost_uri = excluded.repost_uri,
                reposted_at = excluded.reposted_at,
                reply_root = excluded.reply_root,
                reply_parent = excluded.reply_parent,
                grandparent_author = excluded.grandparent_author,
                pinned = excluded.pinned,
                feed_context = excluded.feed_context,
                fetched_at = excluded.fetched_at
            "#,
        )?;

        let mut rows = 0;
        for i in self.feed_items.values() {
            if summary.is_superseded(&i.viewer, &i.source) {
                continue;
            }
            rows += stmt.execute(params![
                i.viewer,
                i.source,
                i.item_id,
                i.post,
                i.sort_key,
                i.reposter,
                i.repost_uri,
                i.reposted_at,
                i.reply_root,
                i.reply_parent,
                i.grandparent_author,
                i.pinned,
                i.feed_context,
                now,
            ])?;
        }
        Ok(rows)
    }

    fn write_notifications(&self, tx: &Transaction<'_>, now: Timestamp) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO notifications (
                viewer_did, uri, cid, author_did, reason, reason_subject, post_uri,
                is_read, indexed_at, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(viewer_did, uri) DO UPDATE SET
                cid = excluded.cid,
                reason = excluded.reason,
                reason_subject = excluded.reason_subject,
                post_uri = COALESCE(excluded.post_uri, notifications.post_uri),
                is_read = excluded.is_read,
                indexed_at = excluded.indexed_at,
                fetched_at = excluded.fetched_at
            "#,
        )?;

        let mut rows = 0;
        for n in self.notifications.values() {
            rows += stmt.execute(params![
                n.viewer,
                n.uri,
                n.cid,
                n.author,
                n.reason,
                n.reason_subject,
                n.post,
                n.is_read,
                n.indexed_at,
                now,
            ])?;
        }
        Ok(rows)
    }

    /// Full conversations replace their member list; stubs only make sure
    /// the row exists.
    fn write_conversations(&self, tx: &Transaction<'_>, now: Timestamp) -> Result<usize, CacheError> {
        let mut stub = tx.prepare_cached(
            "INSERT INTO conversations (id, owner_did, completeness, fetched_at) VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(id, owner_did) DO NOTHING",
        )?;
        let mut upsert = tx.prepare_cached(
            r#"
            INSERT INTO conversations (
                id, owner_did, rev, muted, unread_count, last_message_id, last_activity_at,
                completeness, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id, owner_did) DO UPDATE SET
                rev = excluded.rev,
                muted = excluded.muted,
                unread_count = excluded.unread_count,
                last_message_id = COALESCE(excluded.last_message_id, conversations.last_message_id),
                last_activity_at = COALESCE(excluded.last_activity_at, conversations.last_activity_at),
                completeness = MAX(excluded.completeness, conversations.completeness),
                fetched_at = excluded.fetched_at
            "#,
        )?;
        let mut clear_members = tx.prepare_cached(
            "DELETE FROM conversation_members WHERE owner_did = ?1 AND convo_id = ?2",
        )?;

        let mut rows = 0;
        for c in self.conversations.values() {
            if c.completeness == Completeness::Stub {
                rows += stub.execute(params![c.id, c.owner, now])?;
            } else {
                rows += upsert.execute(params![
                    c.id,
                    c.owner,
                    c.rev,
                    c.muted,
                    c.unread_count,
                    c.last_message,
                    c.last_activity_at,
                    c.completeness,
                    now,
                ])?;
                clear_members.execute(params![c.owner, c.id])?;
            }
        }
        Ok(rows)
    }

    fn write_conversation_members(&self, tx: &Transaction<'_>) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO conversation_members (owner_did, convo_id, member_did) VALUES (?1, ?2, ?3)
             ON CONFLICT DO NOTHING",
        )?;
        let mut rows = 0;
        for m in &self.conversation_members {
            rows += stmt.execute(params![m.owner, m.convo, m.member])?;
        }
        Ok(rows)
    }

    /// Deletion is final: a tombstone is never revived by an older copy.
    fn write_messages(&self, tx: &Transaction<'_>, now: Timestamp) -> Result<usize, CacheError> {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO messages (
                owner_did, id, convo_id, rev, sender_did, text, sent_at, deleted, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(owner_did, id) DO UPDATE SET
                rev = excluded.rev,
                text = CASE WHEN messages.deleted OR excluded.deleted THEN NULL ELSE excluded.text END,
                deleted = MAX(messages.deleted, excluded.deleted),
                fetched_at = excluded.fetched_at
            "#,
        )?;

        let mut rows = 0;
        for m in self.messages.values() {
            rows += stmt.execute(params![
                m.owner,
                m.id,
                m.convo,
                m.rev,
                m.sender,
                m.text,
                m.sent_at,
                m.deleted,
                now,
            ])?;
        }
        Ok(rows)
    }
}

pub(crate) fn upsert_post_viewer_state(
    tx: &rusqlite::Connection,
    s: &PostViewerStateEntity,
) -> Result<usize, CacheError> {
    let mut stmt = tx.prepare_cached(
        r#"
        INSERT INTO post_viewer_state (
            post_uri, viewer_did, like_uri, repost_uri, thread_muted, reply_disabled, pinned
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(post_uri, viewer_did) DO UPDATE SET
            like_uri = excluded.like_uri,
            repost_uri = excluded.repost_uri,
            thread_muted = excluded.thread_muted,
            reply_disabled = excluded.reply_disabled,
            pinned = excluded.pinned
        "#,
    )?;
    Ok(stmt.execute(params![
        s.post,
        s.viewer,
        s.like,
        s.repost,
        s.thread_muted,
        s.reply_disabled,
        s.pinned,
    ])?)
}

/// What one commit changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Rows inserted, updated or deleted per table. Tables left untouched are absent.
    pub rows: BTreeMap<Table, usize>,
    /// Items skipped as malformed while staging.
    pub skipped: usize,
    /// Viewer and source of each paging session that was torn down.
    pub invalidated: Vec<(Did, String)>,
    /// Viewer and source of each staged page that belonged to an older session and was dropped.
    pub superseded: Vec<(Did, String)>,
}

impl CommitSummary {
    pub fn is_superseded(&self, viewer: &Did, source: &str) -> bool {
        self.superseded
            .iter()
            .any(|(v, s)| v == viewer && s == source)
    }

    pub fn total(&self) -> usize {
        self.rows.values().sum()
    }

    pub fn rows(&self, table: Table) -> usize {
        self.rows.get(&table).copied().unwrap_or(0)
    }
}

impl fmt::Display for CommitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (table, rows) in &self.rows {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{table}={rows}")?;
            first = false;
        }
        Ok(())
    }
}
