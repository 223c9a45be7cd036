// SPDX-License-Identifier: MPL-2.0

use crate::cache::labels::load_labels;
use crate::cache::{CacheDb, CacheError, not_found, placeholders};
use crate::entity::Completeness;
use crate::ids::{Did, Timestamp};
use crate::timeline::{ProfileDetails, ProfileRelationship, ProfileSummary};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::collections::HashMap;

/// Cache operations for profiles
pub struct ProfileCache<'a> {
    db: &'a CacheDb,
}

impl<'a> ProfileCache<'a> {
    pub fn new(db: &'a CacheDb) -> Self {
        Self { db }
    }

    /// Get the cached profile and, if known, its relationship to `viewer`.
    pub fn get(&self, did: &Did, viewer: &Did) -> Result<ProfileDetails, CacheError> {
        let conn = self.db.conn();

        let (summary, rest) = conn
            .query_row(
                r#"
                SELECT did, handle, display_name, avatar, completeness,
                       description, banner, followers_count, follows_count, posts_count, created_at
                FROM profiles WHERE did = ?1
                "#,
                [did],
                |row| {
                    Ok((
                        summary_from_row(row)?,
                        (
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, Option<String>>(6)?,
                            row.get::<_, Option<i64>>(7)?,
                            row.get::<_, Option<i64>>(8)?,
                            row.get::<_, Option<i64>>(9)?,
                            row.get::<_, Option<Timestamp>>(10)?,
                        ),
                    ))
                },
            )
            .map_err(not_found)?;
        let (description, banner, followers_count, follows_count, posts_count, created_at) = rest;

        let viewer = conn
            .query_row(
                r#"
                SELECT muted, blocked_by, blocking, following, followed_by
                FROM profile_viewer_state WHERE did = ?1 AND viewer_did = ?2
                "#,
                params![did, viewer],
                |row| {
                    Ok(ProfileRelationship {
                        muted: row.get(0)?,
                        blocked_by: row.get(1)?,
                        blocking: row.get(2)?,
                        following: row.get(3)?,
                        followed_by: row.get(4)?,
                    })
                },
            )
            .optional()?;

        let mut labels = load_labels(&conn, &[did.as_str()])?;
        Ok(ProfileDetails {
            summary: ProfileSummary {
                labels: labels.remove(did.as_str()).unwrap_or_default(),
                ..summary
            },
            description,
            banner,
            followers_count,
            follows_count,
            posts_count,
            created_at,
            viewer,
        })
    }

    /// Get the summary view of a profile, including stubs.
    pub fn get_summary(&self, did: &Did) -> Result<ProfileSummary, CacheError> {
        let conn = self.db.conn();
        load_summaries(&conn, std::slice::from_ref(did))?
            .remove(did)
            .ok_or(CacheError::NotFound)
    }

    /// Look up a profile by handle. Handles are not unique over time, so the
    /// most recently fetched holder wins.
    pub fn find_by_handle(&self, handle: &str) -> Result<ProfileSummary, CacheError> {
        let conn = self.db.conn();
        let did: Did = conn
            .query_row(
                "SELECT did FROM profiles WHERE handle = ?1 ORDER BY fetched_at DESC LIMIT 1",
                [handle.trim_start_matches('@')],
                |row| row.get(0),
            )
            .map_err(not_found)?;
        load_summaries(&conn, std::slice::from_ref(&did))?
            .remove(&did)
            .ok_or(CacheError::NotFound)
    }
}

/// `did, handle, display_name, avatar, completeness` starting at column 0.
fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileSummary> {
    Ok(ProfileSummary {
        did: row.get(0)?,
        handle: row.get(1)?,
        display_name: row.get(2)?,
        avatar: row.get(3)?,
        completeness: row.get::<_, Completeness>(4)?,
        labels: Vec::new(),
    })
}

/// Summaries with labels for every cached DID in `dids`.
pub(crate) fn load_summaries(
    conn: &Connection,
    dids: &[Did],
) -> Result<HashMap<Did, ProfileSummary>, CacheError> {
    if dids.is_empty() {
        return Ok(HashMap::new());
    }

    let query = format!(
        "SELECT did, handle, display_name, avatar, completeness FROM profiles WHERE did IN ({})",
        placeholders(dids.len())
    );
    let mut stmt = conn.prepare(&query)?;
    let summaries = stmt
        .query_map(params_from_iter(dids), summary_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let subjects: Vec<&str> = summaries.iter().map(|s| s.did.as_str()).collect();
    let mut labels = load_labels(conn, &subjects)?;

    Ok(summaries
        .into_iter()
        .map(|mut summary| {
            summary.labels = labels.remove(summary.did.as_str()).unwrap_or_default();
            (summary.did.clone(), summary)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MultiEntitySaver;
    use crate::entity::{ProfileEntity, ProfileViewerStateEntity};

    fn did(s: &str) -> Did {
        Did::new(s).unwrap()
    }

    #[test]
    fn test_get_full_profile_with_relationship() {
        let db = CacheDb::open_in_memory().unwrap();
        let mut saver = MultiEntitySaver::new();
        saver.add(ProfileEntity {
            handle: Some("alice.test".into()),
            display_name: Some("Alice".into()),
            description: Some("hi".into()),
            followers_count: Some(10),
            completeness: Completeness::Full,
            ..ProfileEntity::stub(did("did:plc:alice"))
        });
        saver.add(ProfileViewerStateEntity {
            did: did("did:plc:alice"),
            viewer: did("did:plc:me"),
            muted: true,
            blocked_by: false,
            blocking: None,
            following: None,
            followed_by: None,
        });
        saver.commit(&db).unwrap();

        let cache = ProfileCache::new(&db);
        let profile = cache.get(&did("did:plc:alice"), &did("did:plc:me")).unwrap();
        assert_eq!(profile.summary.name(), "Alice");
        assert_eq!(profile.followers_count, Some(10));
        assert!(profile.viewer.unwrap().muted);

        let other = cache.get(&did("did:plc:alice"), &did("did:plc:other")).unwrap();
        assert!(other.viewer.is_none());

        let found = cache.find_by_handle("@alice.test").unwrap();
        assert_eq!(found.did, did("did:plc:alice"));
    }

    #[test]
    fn test_missing_profile_is_not_found() {
        let db = CacheDb::open_in_memory().unwrap();
        let result = ProfileCache::new(&db).get_summary(&did("did:plc:ghost"));
        assert!(matches!(result, Err(CacheError::NotFound)));
    }
}
