// SPDX-License-Identifier: MPL-2.0

use crate::cache::profiles::load_summaries;
use crate::cache::{CacheDb, CacheError, list_bound, placeholders};
use crate::cursor::ListPosition;
use crate::ids::{ConvoId, Did, MessageId, Timestamp};
use crate::timeline::{ConversationSummary, MessageItem, ProfileSummary};
use rusqlite::types::ToSql;
use rusqlite::{Connection, params};
use std::collections::{BTreeSet, HashMap};

/// Cache operations for direct message conversations, scoped per owner.
pub struct ChatCache<'a> {
    db: &'a CacheDb,
}

struct MessageRow {
    id: MessageId,
    convo: ConvoId,
    sender: Did,
    text: Option<String>,
    sent_at: Timestamp,
    deleted: bool,
}

impl<'a> ChatCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Hydrated conversations by latest activity, strictly below `before`.
    /// Conversations with no activity sort last. Conversations only known
    /// from a message are left out.
    pub fn conversations(
        &self,
        owner: &Did,
        before: Option<&ListPosition>,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, CacheError> {
        let conn = self.db.conn();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let (at, key) = list_bound(before);

        let ids = conn
            .prepare(
                r#"
                SELECT id FROM conversations
                WHERE owner_did = ?1 AND completeness > 0
                  AND (?2 IS NULL OR (COALESCE(last_activity_at, 0), id) < (?2, ?3))
                ORDER BY COALESCE(last_activity_at, 0) DESC, id DESC
                LIMIT ?4
                "#,
            )?
            .query_map(params![owner, at, key, limit], |row| row.get::<_, ConvoId>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        load_conversations(&conn, owner, &ids)
    }

    /// Listed conversations among `ids`, in list order.
    pub fn conversations_by_id(
        &self,
        owner: &Did,
        ids: &[ConvoId],
    ) -> Result<Vec<ConversationSummary>, CacheError> {
        let conn = self.db.conn();
        load_conversations(&conn, owner, ids)
    }

    /// Messages of one conversation, newest first, strictly below `before`.
    pub fn messages(
        &self,
        owner: &Did,
        convo: &ConvoId,
        before: Option<&ListPosition>,
        limit: usize,
    ) -> Result<Vec<MessageItem>, CacheError> {
        let conn = self.db.conn();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let (at, key) = list_bound(before);

        let ids = conn
            .prepare(
                r#"
                SELECT id FROM messages
                WHERE owner_did = ?1 AND convo_id = ?2
                  AND (?3 IS NULL OR (sent_at, id) < (?3, ?4))
                ORDER BY sent_at DESC, id DESC
                LIMIT ?5
                "#,
            )?
            .query_map(params![owner, convo, at, key, limit], |row| row.get::<_, MessageId>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        load_messages(&conn, owner, &ids)
    }

    /// Messages of one conversation among `ids`, newest first.
    pub fn messages_by_id(
        &self,
        owner: &Did,
        convo: &ConvoId,
        ids: &[MessageId],
    ) -> Result<Vec<MessageItem>, CacheError> {
        let conn = self.db.conn();
        let mut messages = load_messages(&conn, owner, ids)?;
        messages.retain(|m| &m.convo == convo);
        messages.sort_by(|a, b| b.position().cmp(&a.position()));
        Ok(messages)
    }
}

/// Listed conversations by id, newest activity first.
fn load_conversations(
    conn: &Connection,
    owner: &Did,
    ids: &[ConvoId],
) -> Result<Vec<ConversationSummary>, CacheError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let query = format!(
        r#"
        SELECT id, rev, muted, unread_count, last_message_id, last_activity_at,
               COALESCE(last_activity_at, 0)
        FROM conversations
        WHERE id IN ({}) AND owner_did = ?{} AND completeness > 0
        "#,
        placeholders(ids.len()),
        ids.len() + 1
    );
    let mut params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
    params.push(owner);

    let rows = conn
        .prepare(&query)?
        .query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, ConvoId>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<MessageId>>(4)?,
                row.get::<_, Option<Timestamp>>(5)?,
                row.get::<_, Timestamp>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (id, rev, muted, unread_count, last_message_id, last_activity_at, active_at) in rows {
        let members = members_of(conn, owner, &id)?;
        let last_message = match last_message_id {
            Some(message) => load_messages(conn, owner, &[message])?.pop(),
            None => None,
        };
        out.push(ConversationSummary {
            id,
            rev,
            members,
            last_message,
            muted,
            unread_count,
            last_activity_at,
            active_at,
        });
    }
    out.sort_by(|a, b| b.position().cmp(&a.position()));
    Ok(out)
}

fn members_of(conn: &Connection, owner: &Did, convo: &ConvoId) -> Result<Vec<ProfileSummary>, CacheError> {
    let dids = conn
        .prepare(
            "SELECT member_did FROM conversation_members WHERE owner_did = ?1 AND convo_id = ?2 ORDER BY member_did",
        )?
        .query_map(params![owner, convo], |row| row.get::<_, Did>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut profiles = load_summaries(conn, &dids)?;
    Ok(dids.iter().filter_map(|d| profiles.remove(d)).collect())
}

/// Messages by id, in the order given.
fn load_messages(conn: &Connection, owner: &Did, ids: &[MessageId]) -> Result<Vec<MessageItem>, CacheError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let query = format!(
        r#"
        SELECT id, convo_id, sender_did, text, sent_at, deleted
        FROM messages WHERE id IN ({}) AND owner_did = ?{}
        "#,
        placeholders(ids.len()),
        ids.len() + 1
    );
    let mut params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
    params.push(owner);

    let rows = conn
        .prepare(&query)?
        .query_map(params.as_slice(), |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                convo: row.get(1)?,
                sender: row.get(2)?,
                text: row.get(3)?,
                sent_at: row.get(4)?,
                deleted: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let senders: Vec<Did> = rows
        .iter()
        .map(|r| r.sender.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let senders = load_summaries(conn, &senders)?;

    let mut by_id: HashMap<MessageId, MessageRow> = rows.into_iter().map(|r| (r.id.clone(), r)).collect();
    Ok(ids
        .iter()
        .filter_map(|id| {
            let row = by_id.remove(id)?;
            Some(MessageItem {
                sender: senders.get(&row.sender)?.clone(),
                id: row.id,
                convo: row.convo,
                text: row.text,
                sent_at: row.sent_at,
                deleted: row.deleted,
            })
        })
        .collect())
}
