// SPDX-License-Identifier: MPL-2.0

use crate::cache::posts::load_posts;
use crate::cache::profiles::load_summaries;
use crate::cache::{CacheDb, CacheError, list_bound, placeholders};
use crate::cursor::ListPosition;
use crate::entity::NotificationReason;
use crate::ids::{AtUri, Did, Timestamp};
use crate::timeline::NotificationItem;
use rusqlite::types::ToSql;
use rusqlite::{Connection, Row, params};
use std::collections::BTreeSet;

/// Cache operations for notifications
pub struct NotificationCache<'a> {
    db: &'a CacheDb,
}

impl<'a> NotificationCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Newest first, strictly below `before`.
    pub fn get_page(
        &self,
        viewer: &Did,
        before: Option<&ListPosition>,
        limit: usize,
        quote_depth: usize,
    ) -> Result<Vec<NotificationItem>, CacheError> {
        let conn = self.db.conn();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let (at, key) = list_bound(before);

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {COLUMNS}
            FROM notifications
            WHERE viewer_did = ?1 AND (?2 IS NULL OR (indexed_at, uri) < (?2, ?3))
            ORDER BY indexed_at DESC, uri DESC
            LIMIT ?4
            "#
        ))?;
        let rows = stmt
            .query_map(params![viewer, at, key, limit], notification_row)?
            .collect::<Result<Vec<_>, _>>()?;
        hydrate(&conn, viewer, rows, quote_depth)
    }

    /// The notifications among `uris`, newest first.
    pub fn get_many(
        &self,
        viewer: &Did,
        uris: &[AtUri],
        quote_depth: usize,
    ) -> Result<Vec<NotificationItem>, CacheError> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.db.conn();
        let query = format!(
            r#"
            SELECT {COLUMNS}
            FROM notifications
            WHERE uri IN ({}) AND viewer_did = ?{}
            ORDER BY indexed_at DESC, uri DESC
            "#,
            placeholders(uris.len()),
            uris.len() + 1
        );
        let mut params: Vec<&dyn ToSql> = uris.iter().map(|uri| uri as &dyn ToSql).collect();
        params.push(viewer);

        let rows = conn
            .prepare(&query)?
            .query_map(params.as_slice(), notification_row)?
            .collect::<Result<Vec<_>, _>>()?;
        hydrate(&conn, viewer, rows, quote_depth)
    }

    pub fn unread_count(&self, viewer: &Did) -> Result<usize, CacheError> {
        let conn = self.db.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE viewer_did = ?1 AND is_read = 0",
            [viewer],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Mark everything indexed up to `seen_at` as read.
    pub fn mark_read(&self, viewer: &Did, seen_at: Timestamp) -> Result<usize, CacheError> {
        self.db.write(|tx| {
            Ok(tx.execute(
                "UPDATE notifications SET is_read = 1 WHERE viewer_did = ?1 AND indexed_at <= ?2 AND is_read = 0",
                params![viewer, seen_at],
            )?)
        })
    }
}

const COLUMNS: &str = "uri, reason, author_did, reason_subject, post_uri, is_read, indexed_at";

struct NotificationRow {
    uri: AtUri,
    reason: NotificationReason,
    author: Did,
    reason_subject: Option<String>,
    post: Option<AtUri>,
    is_read: bool,
    indexed_at: Timestamp,
}

fn notification_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        uri: row.get(0)?,
        reason: row.get(1)?,
        author: row.get(2)?,
        reason_subject: row.get(3)?,
        post: row.get(4)?,
        is_read: row.get(5)?,
        indexed_at: row.get(6)?,
    })
}

/// Attach authors and subject posts, keeping row order.
fn hydrate(
    conn: &Connection,
    viewer: &Did,
    rows: Vec<NotificationRow>,
    quote_depth: usize,
) -> Result<Vec<NotificationItem>, CacheError> {
    let dids: Vec<Did> = rows
        .iter()
        .map(|r| r.author.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let authors = load_summaries(conn, &dids)?;
    let uris: Vec<AtUri> = rows.iter().filter_map(|r| r.post.clone()).collect();
    let posts = load_posts(conn, &uris, viewer, quote_depth)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            Some(NotificationItem {
                author: authors.get(&row.author)?.clone(),
                post: row.post.and_then(|p| posts.get(&p).cloned()),
                uri: row.uri,
                reason: row.reason,
                reason_subject: row.reason_subject,
                is_read: row.is_read,
                indexed_at: row.indexed_at,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MultiEntitySaver;
    use crate::entity::{NotificationEntity, ProfileEntity};
    use crate::ids::Cid;

    fn notification(rkey: &str, at: i64) -> NotificationEntity {
        NotificationEntity {
            viewer: Did::new("did:plc:v").unwrap(),
            uri: AtUri::new(format!("at://did:plc:b/app.bsky.feed.like/{rkey}")).unwrap(),
            cid: Cid::new("bafy").unwrap(),
            author: Did::new("did:plc:b").unwrap(),
            reason: NotificationReason::Like,
            reason_subject: None,
            post: None,
            is_read: false,
            indexed_at: Timestamp::from_millis(at),
        }
    }

    #[test]
    fn test_page_and_mark_read() {
        let db = CacheDb::open_in_memory().unwrap();
        let mut saver = MultiEntitySaver::new();
        saver.add(ProfileEntity::stub(Did::new("did:plc:b").unwrap()));
        saver.add(notification("1", 100));
        saver.add(notification("2", 200));
        saver.add(notification("3", 300));
        saver.commit(&db).unwrap();

        let cache = NotificationCache::new(&db);
        let viewer = Did::new("did:plc:v").unwrap();
        let page = cache.get_page(&viewer, None, 2, 0).unwrap();
        let times: Vec<_> = page.iter().map(|n| n.indexed_at.as_millis()).collect();
        assert_eq!(times, [300, 200]);

        let rest = cache.get_page(&viewer, Some(&page[1].position()), 2, 0).unwrap();
        assert_eq!(rest.len(), 1);

        assert_eq!(cache.unread_count(&viewer).unwrap(), 3);
        assert_eq!(cache.mark_read(&viewer, Timestamp::from_millis(200)).unwrap(), 2);
        assert_eq!(cache.unread_count(&viewer).unwrap(), 1);
    }

    #[test]
    fn test_ties_page_by_uri() {
        let db = CacheDb::open_in_memory().unwrap();
        let mut saver = MultiEntitySaver::new();
        saver.add(ProfileEntity::stub(Did::new("did:plc:b").unwrap()));
        for rkey in ["a", "b", "c"] {
            saver.add(notification(rkey, 100));
        }
        saver.commit(&db).unwrap();

        let cache = NotificationCache::new(&db);
        let viewer = Did::new("did:plc:v").unwrap();
        let first = cache.get_page(&viewer, None, 2, 0).unwrap();
        let rest = cache.get_page(&viewer, Some(&first[1].position()), 2, 0).unwrap();
        let rkeys: Vec<_> = first
            .iter()
            .chain(&rest)
            .filter_map(|n| n.uri.rkey().map(str::to_string))
            .collect();
        assert_eq!(rkeys, ["c", "b", "a"]);

        let uris = [first[1].uri.clone(), rest[0].uri.clone()];
        let picked = cache.get_many(&viewer, &uris, 0).unwrap();
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].uri, first[1].uri);
    }
}
