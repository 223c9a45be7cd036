// SPDX-License-Identifier: MPL-2.0

use crate::cache::posts::load_posts;
use crate::cache::profiles::load_summaries;
use crate::cache::{CacheDb, CacheError};
use crate::cursor::{Cursor, FeedCursor, SortKey};
use crate::ids::{AtUri, Did, Timestamp};
use crate::timeline::{FeedItemParts, FeedSource, TimelineItem};
use rusqlite::{OptionalExtension, params};
use std::collections::BTreeSet;

/// Stored paging session of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedState {
    pub first_request_at: Timestamp,
    pub cursor: Cursor,
    pub next_offset: u64,
    pub refreshed_at: Timestamp,
}

impl FeedState {
    /// Cursor that continues this session below `local`.
    pub fn resume(&self, local: Option<SortKey>) -> FeedCursor {
        FeedCursor {
            first_request_at: Some(self.first_request_at),
            remote: self.cursor.clone(),
            next_offset: self.next_offset,
            local,
        }
    }
}

struct ItemRow {
    item_id: String,
    post: AtUri,
    sort_key: SortKey,
    reposter: Option<Did>,
    reposted_at: Option<Timestamp>,
    reply_root: Option<AtUri>,
    reply_parent: Option<AtUri>,
    grandparent_author: Option<Did>,
    pinned: bool,
}

/// Cache operations for feeds
pub struct FeedCache<'a> {
    db: &'a CacheDb,
}

impl<'a> FeedCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Get the paging session of a source
    pub fn get_state(&self, viewer: &Did, source: &FeedSource) -> Result<Option<FeedState>, CacheError> {
        let conn = self.db.conn();
        let state = conn
            .query_row(
                r#"
                SELECT first_request_at, cursor, has_more, next_offset, refreshed_at
                FROM feed_state WHERE viewer_did = ?1 AND source = ?2
                "#,
                params![viewer, source.key()],
                |row| {
                    let token: Option<String> = row.get(1)?;
                    let has_more: bool = row.get(2)?;
                    let cursor = match (has_more, token) {
                        (false, _) => Cursor::Pending,
                        (true, Some(token)) => Cursor::Next(token),
                        (true, None) => Cursor::Initial,
                    };
                    Ok(FeedState {
                        first_request_at: row.get(0)?,
                        cursor,
                        next_offset: u64::try_from(row.get::<_, i64>(3)?).unwrap_or(0),
                        refreshed_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    /// Get a page of cached items, newest first, strictly below `before`.
    pub fn get_page(
        &self,
        viewer: &Did,
        source: &FeedSource,
        before: Option<SortKey>,
        limit: usize,
        quote_depth: usize,
    ) -> Result<Vec<TimelineItem>, CacheError> {
        let conn = self.db.conn();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = conn.prepare(
            r#"
            SELECT item_id, post_uri, sort_key, reposter_did, reposted_at,
                   reply_root, reply_parent, grandparent_author, pinned
            FROM feed_items
            WHERE viewer_did = ?1 AND source = ?2 AND (?3 IS NULL OR sort_key < ?3)
            ORDER BY sort_key DESC
            LIMIT ?4
            "#,
        )?;
        let rows = stmt
            .query_map(params![viewer, source.key(), before, limit], |row| {
                Ok(ItemRow {
                    item_id: row.get(0)?,
                    post: row.get(1)?,
                    sort_key: row.get(2)?,
                    reposter: row.get(3)?,
                    reposted_at: row.get(4)?,
                    reply_root: row.get(5)?,
                    reply_parent: row.get(6)?,
                    grandparent_author: row.get(7)?,
                    pinned: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let uris: Vec<AtUri> = rows
            .iter()
            .flat_map(|r| [Some(&r.post), r.reply_root.as_ref(), r.reply_parent.as_ref()])
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let posts = load_posts(&conn, &uris, viewer, quote_depth)?;

        let dids: Vec<Did> = rows
            .iter()
            .flat_map(|r| [r.reposter.as_ref(), r.grandparent_author.as_ref()])
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let profiles = load_summaries(&conn, &dids)?;

        let items = rows
            .into_iter()
            .filter_map(|row| {
                let post = posts.get(&row.post)?.clone();
                let lookup = |uri: &Option<AtUri>| uri.as_ref().and_then(|u| posts.get(u)).cloned();
                let parts = FeedItemParts {
                    post,
                    root: lookup(&row.reply_root),
                    parent: lookup(&row.reply_parent),
                    grandparent_author: row
                        .grandparent_author
                        .as_ref()
                        .and_then(|d| profiles.get(d))
                        .cloned(),
                    reposter: row.reposter.as_ref().and_then(|d| profiles.get(d)).cloned(),
                    reposted_at: row.reposted_at,
                    pinned: row.pinned,
                };
                Some(TimelineItem {
                    id: row.item_id,
                    sort_key: row.sort_key,
                    kind: parts.classify(),
                })
            })
            .collect();
        Ok(items)
    }

    /// Sort key of the oldest cached item of a source.
    pub fn oldest_key(&self, viewer: &Did, source: &FeedSource) -> Result<Option<SortKey>, CacheError> {
        let conn = self.db.conn();
        let key = conn.query_row(
            "SELECT MIN(sort_key) FROM feed_items WHERE viewer_did = ?1 AND source = ?2",
            params![viewer, source.key()],
            |row| row.get(0),
        )?;
        Ok(key)
    }

    /// Number of cached items in a source
    pub fn count(&self, viewer: &Did, source: &FeedSource) -> Result<usize, CacheError> {
        let conn = self.db.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM feed_items WHERE viewer_did = ?1 AND source = ?2",
            params![viewer, source.key()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Forget a source's session and items. Posts stay cached.
    pub fn clear(&self, viewer: &Did, source: &FeedSource) -> Result<usize, CacheError> {
        self.db.write(|tx| {
            let items = tx.execute(
                "DELETE FROM feed_items WHERE viewer_did = ?1 AND source = ?2",
                params![viewer, source.key()],
            )?;
            tx.execute(
                "DELETE FROM feed_state WHERE viewer_did = ?1 AND source = ?2",
                params![viewer, source.key()],
            )?;
            Ok(items)
        })
    }
}
