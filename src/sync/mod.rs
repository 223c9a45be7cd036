// SPDX-License-Identifier: MPL-2.0

//! Fetch, extract, commit, read.
//!
//! Every operation runs the same pipeline: ask the [`Remote`] for a page,
//! project it into entities on the calling task, commit the staged batch on
//! the blocking pool, then read the result back through the cache so fresh
//! and cached data come out in the same shape.
//!
//! Transport failures are not errors here. They come back as
//! [`FetchStatus::Stale`] alongside whatever the cache already holds, with
//! the cursor left exactly as it was passed in.

mod inbox;
mod thread;
mod timeline;

pub use inbox::ListPage;
pub use thread::ThreadPage;
pub use timeline::{TimelineEvent, TimelinePage};

use crate::atproto::views::Lenient;
use crate::atproto::{ClientError, Remote};
use crate::cache::{CacheDb, CacheError, CleanupStats, CommitSummary, MultiEntitySaver};
use crate::config::SyncConfig;
use crate::entity::Entities;
use crate::extract::ExtractError;
use crate::ids::Did;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("remote error: {0}")]
    Remote(#[from] ClientError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("fetch abandoned before commit")]
    Cancelled,
}

/// How the items of a page came to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    /// Fetched from the remote and committed.
    Fresh,
    /// The remote has nothing more; only cached items were read.
    Exhausted,
    /// The fetch or its commit failed. Cached items were read instead and
    /// the cursor is unchanged, so retrying is safe.
    Stale { reason: String },
    /// A newer paging session of the same source committed first. The page
    /// was discarded and the newer session's head was read instead.
    Superseded,
}

impl FetchStatus {
    fn stale(error: impl fmt::Display) -> Self {
        FetchStatus::Stale {
            reason: error.to_string(),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, FetchStatus::Stale { .. })
    }
}

/// Keeps one viewer's cache in step with the AppView.
///
/// Cheap to clone; clones share the store and the remote. Operations on
/// different sources can run concurrently. Two pages of the same source
/// are serialized by the store's write transaction.
#[derive(Clone)]
pub struct SyncEngine {
    db: CacheDb,
    remote: Arc<dyn Remote>,
    viewer: Did,
    config: Arc<SyncConfig>,
}

impl SyncEngine {
    pub fn new(db: CacheDb, remote: Arc<dyn Remote>, viewer: Did, config: SyncConfig) -> Self {
        Self {
            db,
            remote,
            viewer,
            config: Arc::new(config),
        }
    }

    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    pub fn viewer(&self) -> &Did {
        &self.viewer
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Apply the retention policy from the engine's config.
    pub async fn cleanup(&self) -> Result<CleanupStats, SyncError> {
        let config = Arc::clone(&self.config);
        self.read(move |db| db.cleanup_stale(&config)).await
    }

    fn page_limit(&self) -> usize {
        usize::from(self.config.request_limit())
    }

    /// SQLite calls block, so they run on the blocking pool rather than an async worker.
    async fn read<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&CacheDb) -> Result<T, CacheError> + Send + 'static,
    {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
    }

    async fn commit(&self, saver: MultiEntitySaver) -> Result<CommitSummary, SyncError> {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || saver.commit(&db)).await??)
    }
}

/// A page whose commit failed is dropped and reported as stale. Anything
/// other than a store failure propagates.
fn dropped_page(what: &str, error: SyncError) -> Result<FetchStatus, SyncError> {
    match error {
        SyncError::Cache(error) => {
            error!(what, %error, "commit failed, page dropped");
            Ok(FetchStatus::stale(error))
        }
        other => Err(other),
    }
}

/// Stage every decodable item of a page. Items that failed to decode or
/// extract are logged and skipped; the rest of the page is kept. Returns the
/// keys of the staged items in page order.
fn stage_page<V>(
    saver: &mut MultiEntitySaver,
    kind: &str,
    items: &[Lenient<V>],
    key: impl Fn(&V) -> &str,
    mut extract: impl FnMut(usize, &V) -> Result<Entities, ExtractError>,
) -> Vec<String> {
    let mut staged = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match item.as_valid() {
            Ok(view) => {
                if saver.stage(format_args!("{kind} {}", key(view)), extract(index, view)) {
                    staged.push(key(view).to_string());
                }
            }
            Err(error) => saver.skip_malformed(format_args!("{kind} #{index}"), error),
        }
    }
    staged
}
