// SPDX-License-Identifier: MPL-2.0

use crate::cache::{CacheDb, CacheError, placeholders};
use crate::ids::AtUri;
use crate::timeline::{GeneratorSummary, ListSummary};
use rusqlite::{Connection, params_from_iter};
use std::collections::HashMap;

/// Cache operations for feed generators and lists
pub struct GraphCache<'a> {
    db: &'a CacheDb,
}

impl<'a> GraphCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Cached generators in the order asked for; unknown uris are skipped.
    pub fn generators(&self, uris: &[AtUri]) -> Result<Vec<GeneratorSummary>, CacheError> {
        let conn = self.db.conn();
        let mut found = load_generators(&conn, uris)?;
        Ok(uris.iter().filter_map(|uri| found.remove(uri)).collect())
    }

    pub fn lists(&self, uris: &[AtUri]) -> Result<Vec<ListSummary>, CacheError> {
        let conn = self.db.conn();
        let mut found = load_lists(&conn, uris)?;
        Ok(uris.iter().filter_map(|uri| found.remove(uri)).collect())
    }
}

pub(crate) fn load_generators(
    conn: &Connection,
    uris: &[AtUri],
) -> Result<HashMap<AtUri, GeneratorSummary>, CacheError> {
    if uris.is_empty() {
        return Ok(HashMap::new());
    }
    let query = format!(
        r#"
        SELECT uri, creator_did, display_name, description, avatar, like_count
        FROM feed_generators WHERE uri IN ({})
        "#,
        placeholders(uris.len())
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params_from_iter(uris), |row| {
        Ok(GeneratorSummary {
            uri: row.get(0)?,
            creator: row.get(1)?,
            display_name: row.get(2)?,
            description: row.get(3)?,
            avatar: row.get(4)?,
            like_count: row.get(5)?,
        })
    })?;

    let mut out = HashMap::new();
    for row in rows {
        let generator = row?;
        out.insert(generator.uri.clone(), generator);
    }
    Ok(out)
}

pub(crate) fn load_lists(
    conn: &Connection,
    uris: &[AtUri],
) -> Result<HashMap<AtUri, ListSummary>, CacheError> {
    if uris.is_empty() {
        return Ok(HashMap::new());
    }
    let query = format!(
        r#"
        SELECT uri, creator_did, name, purpose, description, avatar, item_count
        FROM lists WHERE uri IN ({})
        "#,
        placeholders(uris.len())
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params_from_iter(uris), |row| {
        Ok(ListSummary {
            uri: row.get(0)?,
            creator: row.get(1)?,
            name: row.get(2)?,
            purpose: row.get(3)?,
            description: row.get(4)?,
            avatar: row.get(5)?,
            item_count: row.get(6)?,
        })
    })?;

    let mut out = HashMap::new();
    for row in rows {
        let list = row?;
        out.insert(list.uri.clone(), list);
    }
    Ok(out)
}
