// SPDX-License-Identifier: MPL-2.0

use super::{FetchStatus, SyncEngine, SyncError, dropped_page, stage_page};
use crate::atproto::views::LabelerViewItem;
use crate::cache::{CacheError, GraphCache, LabelCache, LabelDefinition, MultiEntitySaver, ThreadCache};
use crate::extract::{feed_generator, labeler, thread};
use crate::ids::{AtUri, Did};
use crate::timeline::{GeneratorSummary, ThreadTree};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadPage {
    pub tree: ThreadTree,
    pub status: FetchStatus,
}

fn labeler_uri(item: &LabelerViewItem) -> &str {
    match item {
        LabelerViewItem::Detailed(view) | LabelerViewItem::Basic(view) => &view.uri,
        LabelerViewItem::Unknown => "unknown",
    }
}

impl SyncEngine {
    /// Refresh the thread around `uri` and rebuild it from the cache.
    ///
    /// A failed fetch still answers from the cache when the focus is known
    /// there; only a thread never seen before surfaces the remote error.
    pub async fn thread(&self, uri: &AtUri) -> Result<ThreadPage, SyncError> {
        let status = match self
            .remote
            .post_thread(uri, self.config.thread_depth, self.config.thread_parent_height)
            .await
        {
            Ok(response) => {
                let mut saver = MultiEntitySaver::new();
                saver.stage(uri, thread(&response.thread, &self.viewer));
                match self.commit(saver).await {
                    Ok(_) => FetchStatus::Fresh,
                    Err(error) => dropped_page("thread", error)?,
                }
            }
            Err(error) => {
                warn!(%uri, %error, "thread fetch failed, serving cache");
                match self.cached_thread(uri).await {
                    Ok(tree) => {
                        return Ok(ThreadPage {
                            tree,
                            status: FetchStatus::stale(error),
                        });
                    }
                    Err(SyncError::Cache(CacheError::NotFound)) => return Err(error.into()),
                    Err(other) => return Err(other),
                }
            }
        };

        Ok(ThreadPage {
            tree: self.cached_thread(uri).await?,
            status,
        })
    }

    pub async fn cached_thread(&self, uri: &AtUri) -> Result<ThreadTree, SyncError> {
        let viewer = self.viewer.clone();
        let focus = uri.clone();
        let reply_depth = usize::from(self.config.thread_depth);
        let quote_depth = self.config.quote_depth;
        self.read(move |db| ThreadCache::new(db).get(&focus, &viewer, reply_depth, quote_depth))
            .await
    }

    /// Refresh feed generator metadata and return what the cache holds for
    /// `uris`, in the order asked for.
    pub async fn feed_generators(&self, uris: &[AtUri]) -> Result<Vec<GeneratorSummary>, SyncError> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        match self.remote.feed_generators(uris).await {
            Ok(response) => {
                let mut saver = MultiEntitySaver::new();
                stage_page(
                    &mut saver,
                    "feed generator",
                    &response.feeds,
                    |view| view.uri.as_str(),
                    |_, view| feed_generator(view, &self.viewer),
                );
                if let Err(error) = self.commit(saver).await {
                    dropped_page("feed generators", error)?;
                }
            }
            Err(error) => warn!(%error, count = uris.len(), "feed generator fetch failed"),
        }

        let uris = uris.to_vec();
        self.read(move |db| GraphCache::new(db).generators(&uris)).await
    }

    /// Refresh the label definitions published by `dids`.
    pub async fn labelers(&self, dids: &[Did]) -> Result<Vec<LabelDefinition>, SyncError> {
        if dids.is_empty() {
            return Ok(Vec::new());
        }
        match self.remote.labeler_services(dids).await {
            Ok(response) => {
                let mut saver = MultiEntitySaver::new();
                stage_page(&mut saver, "labeler", &response.views, labeler_uri, |_, view| {
                    labeler(view, &self.viewer)
                });
                if let Err(error) = self.commit(saver).await {
                    dropped_page("labelers", error)?;
                }
            }
            Err(error) => warn!(%error, count = dids.len(), "labeler fetch failed"),
        }

        let dids = dids.to_vec();
        self.read(move |db| {
            let labels = LabelCache::new(db);
            let mut out = Vec::new();
            for did in &dids {
                out.extend(labels.definitions(did)?);
            }
            Ok(out)
        })
        .await
    }
}
