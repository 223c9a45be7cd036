// SPDX-License-Identifier: MPL-2.0

//! SQLite-backed normalized cache.
//!
//! Writes go through [`MultiEntitySaver`]; reads go through the per-concern
//! caches, which all borrow one [`CacheDb`] and return owned snapshots.

mod chat;
mod db;
mod feeds;
mod graph;
mod labels;
mod notifications;
mod posts;
mod profiles;
mod saver;
mod schema;
mod threads;

pub use chat::ChatCache;
pub use db::{CacheDb, CacheStats, CleanupStats};
pub use feeds::{FeedCache, FeedState};
pub use graph::GraphCache;
pub use labels::{LabelCache, LabelDefinition};
pub use notifications::NotificationCache;
pub use posts::PostCache;
pub use profiles::ProfileCache;
pub use saver::{CommitSummary, MultiEntitySaver};
pub use threads::ThreadCache;

use crate::cursor::ListPosition;
use crate::ids::Timestamp;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found")]
    NotFound,
    #[error("database path error: {0}")]
    Path(String),
}

/// Map "no rows" to `CacheError::NotFound`.
pub(crate) fn not_found(e: rusqlite::Error) -> CacheError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => CacheError::NotFound,
        other => CacheError::Database(other),
    }
}

/// `?1, ?2, ...` for an IN clause of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bind values for a `(ts, key) < (?, ?)` keyset bound; both `NULL` when reading from the head.
pub(crate) fn list_bound(before: Option<&ListPosition>) -> (Option<Timestamp>, Option<&str>) {
    match before {
        Some(position) => (Some(position.at), Some(position.key.as_str())),
        None => (None, None),
    }
}
