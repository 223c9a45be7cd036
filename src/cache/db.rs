// SPDX-License-Identifier: MPL-2.0

use crate::cache::schema::{LEGACY_TABLES, SCHEMA, SCHEMA_VERSION};
use crate::cache::CacheError;
use crate::config::SyncConfig;
use crate::entity::Table;
use crate::ids::Timestamp;
use rusqlite::{Connection, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Handle to the cache database shared by every sync task.
///
/// Cloning is cheap; all clones serialize on one connection. Writers use
/// IMMEDIATE transactions so concurrent commits queue instead of failing.
#[derive(Clone)]
pub struct CacheDb {
    conn: Arc<Mutex<Connection>>,
}

impl CacheDb {
    /// Open or create the cache database for a local account.
    /// Path: ~/.local/share/hangar/{user_did}/cache.db
    pub fn open(user_did: &str) -> Result<Self, CacheError> {
        let path = Self::cache_path(user_did)?;
        Self::open_at(&path)
    }

    /// Open or create a cache database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, CacheError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::Path(format!("failed to create cache dir: {}", e)))?;
        }

        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened cache database");
        Self::from_connection(conn)
    }

    /// Private in-memory database, for tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run schema migrations
    fn migrate(conn: &Connection) -> Result<(), CacheError> {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version > 0 && version < SCHEMA_VERSION {
            info!(from = version, to = SCHEMA_VERSION, "dropping outdated cache tables");
            conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
            for table in LEGACY_TABLES {
                conn.execute_batch(&format!("DROP TABLE IF EXISTS {table};"))?;
            }
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        }

        // Execute the schema (all CREATE IF NOT EXISTS)
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))?;
        Ok(())
    }

    /// Get XDG data directory for cache
    fn cache_path(user_did: &str) -> Result<PathBuf, CacheError> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| CacheError::Path("could not find data directory".to_string()))?;

        // Sanitize DID for filesystem (replace : with _)
        let safe_did = user_did.replace(':', "_");

        Ok(data_dir.join("hangar").join(safe_did).join("cache.db"))
    }

    /// Access connection for operations.
    ///
    /// A panic while the lock was held cannot leave a half-written
    /// transaction behind, so a poisoned lock is simply taken over.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` inside one IMMEDIATE transaction. Nothing is visible to other
    /// readers unless `f` returns `Ok`.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, CacheError>,
    ) -> Result<T, CacheError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Drop stale timeline data, then posts and profiles nothing refers to.
    ///
    /// Timeline order goes stale quickly, so feed sessions expire after
    /// `feed_retention_hours`. Orphaned records linger for
    /// `orphan_retention_days` in case a thread or quote still wants them.
    pub fn cleanup_stale(&self, config: &SyncConfig) -> Result<CleanupStats, CacheError> {
        let now = Timestamp::now().as_millis();
        let feed_cutoff = now - i64::from(config.feed_retention_hours) * 60 * 60 * 1000;
        let orphan_cutoff = now - i64::from(config.orphan_retention_days) * 24 * 60 * 60 * 1000;

        let stats = self.write(|tx| {
            // Items cascade from their session.
            let sessions = tx.execute(
                "DELETE FROM feed_state WHERE refreshed_at < ?",
                [feed_cutoff],
            )?;

            // Removing a post can orphan its parent or quoted post, so repeat
            // until a pass removes nothing.
            let mut orphans = tx.prepare(
                r#"
                DELETE FROM posts
                WHERE fetched_at < ?1
                AND uri NOT IN (SELECT post_uri FROM feed_items)
                AND uri NOT IN (SELECT reply_root FROM feed_items WHERE reply_root IS NOT NULL)
                AND uri NOT IN (SELECT reply_parent FROM feed_items WHERE reply_parent IS NOT NULL)
                AND uri NOT IN (SELECT reply_root FROM posts WHERE reply_root IS NOT NULL)
                AND uri NOT IN (SELECT reply_parent FROM posts WHERE reply_parent IS NOT NULL)
                AND uri NOT IN (SELECT parent_uri FROM thread_edges)
                AND uri NOT IN (SELECT post_uri FROM notifications WHERE post_uri IS NOT NULL)
                AND uri NOT IN (SELECT record_uri FROM post_record_embeds)
                "#,
            )?;
            let mut posts = 0;
            loop {
                let removed = orphans.execute([orphan_cutoff])?;
                if removed == 0 {
                    break;
                }
                posts += removed;
            }
            drop(orphans);

            let profiles = tx.execute(
                r#"
                DELETE FROM profiles
                WHERE fetched_at < ?1
                AND did NOT IN (SELECT author_did FROM posts)
                AND did NOT IN (SELECT reposter_did FROM feed_items WHERE reposter_did IS NOT NULL)
                AND did NOT IN (SELECT author_did FROM notifications)
                AND did NOT IN (SELECT member_did FROM conversation_members)
                AND did NOT IN (SELECT sender_did FROM messages)
                AND did NOT IN (SELECT creator_did FROM labels)
                AND did NOT IN (SELECT creator_did FROM label_definitions)
                AND did NOT IN (SELECT creator_did FROM feed_generators)
                AND did NOT IN (SELECT creator_did FROM lists)
                "#,
                [orphan_cutoff],
            )?;

            Ok(CleanupStats {
                sessions_deleted: sessions,
                posts_deleted: posts,
                profiles_deleted: profiles,
            })
        })?;

        debug!(?stats, "cache cleanup finished");
        Ok(stats)
    }

    /// Row counts per table.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let conn = self.conn();
        let mut rows = BTreeMap::new();

        for table in Table::COMMIT_ORDER {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.name()), [], |row| {
                    row.get(0)
                })?;
            rows.insert(table, count as usize);
        }

        Ok(CacheStats { rows })
    }
}

/// Rows removed by `CacheDb::cleanup_stale`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub sessions_deleted: usize,
    pub posts_deleted: usize,
    pub profiles_deleted: usize,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    rows: BTreeMap<Table, usize>,
}

impl CacheStats {
    pub fn count(&self, table: Table) -> usize {
        self.rows.get(&table).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.rows.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory_creates_schema() {
        let db = CacheDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.total(), 0);

        let version: i64 = db
            .conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let db = CacheDb::open_in_memory().unwrap();
        let result = db.conn().execute(
            "INSERT INTO posts (uri, author_did, fetched_at, completeness) VALUES ('at://x/y/z', 'did:plc:nobody', 0, 2)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_open_at_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("did_plc_abc").join("cache.db");
        let db = CacheDb::open_at(&path).unwrap();
        assert!(path.exists());
        drop(db);

        // Reopening an up-to-date database keeps it.
        let db = CacheDb::open_at(&path).unwrap();
        assert_eq!(db.stats().unwrap().total(), 0);
    }

    #[test]
    fn test_legacy_schema_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE posts (uri TEXT PRIMARY KEY, embed_json TEXT);
                 INSERT INTO posts VALUES ('at://old', '{}');
                 PRAGMA user_version = 1;",
            )
            .unwrap();
        }

        let db = CacheDb::open_at(&path).unwrap();
        assert_eq!(db.stats().unwrap().count(Table::Posts), 0);
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let db = CacheDb::open_in_memory().unwrap();
        let result: Result<(), CacheError> = db.write(|tx| {
            tx.execute(
                "INSERT INTO profiles (did, completeness, fetched_at) VALUES ('did:plc:a', 0, 0)",
                [],
            )?;
            Err(CacheError::NotFound)
        });
        assert!(result.is_err());
        assert_eq!(db.stats().unwrap().count(Table::Profiles), 0);
    }
}
