// SPDX-License-Identifier: MPL-2.0

use super::{FetchStatus, SyncEngine, SyncError, dropped_page, stage_page};
use crate::cache::{FeedCache, MultiEntitySaver};
use crate::cursor::{Cursor, FeedCursor, SortKey};
use crate::entity::FeedStateEntity;
use crate::extract::{FeedContext, feed_view_post};
use crate::ids::Timestamp;
use crate::timeline::{FeedSource, TimelineItem};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One page of a timeline and the cursor for the page after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelinePage {
    pub items: Vec<TimelineItem>,
    pub cursor: FeedCursor,
    pub status: FetchStatus,
}

/// Progress of a [`SyncEngine::watch_timeline`] request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    /// What the cache already held below the cursor, sent before fetching.
    Cached(Vec<TimelineItem>),
    Fetched(TimelinePage),
    /// Nothing was committed; retry with `cursor`.
    Failed { reason: String, cursor: FeedCursor },
}

impl SyncEngine {
    /// Fetch the page after `cursor`, commit it, and return it as read back
    /// from the cache.
    pub async fn timeline(
        &self,
        source: &FeedSource,
        cursor: &FeedCursor,
    ) -> Result<TimelinePage, SyncError> {
        self.fetch_timeline(source, cursor, || false).await
    }

    /// Post search, paged and cached like any other timeline.
    pub async fn search(&self, query: &str, cursor: &FeedCursor) -> Result<TimelinePage, SyncError> {
        let source = FeedSource::Search(query.trim().to_string());
        self.timeline(&source, cursor).await
    }

    /// Cached items strictly below `before`, without touching the network.
    pub async fn cached_timeline(
        &self,
        source: &FeedSource,
        before: Option<SortKey>,
        limit: usize,
    ) -> Result<Vec<TimelineItem>, SyncError> {
        let viewer = self.viewer.clone();
        let source = source.clone();
        let quote_depth = self.config.quote_depth;
        self.read(move |db| FeedCache::new(db).get_page(&viewer, &source, before, limit, quote_depth))
            .await
    }

    /// Cursor that continues the stored session of `source` below its
    /// oldest cached item, if a session is stored.
    pub async fn saved_cursor(&self, source: &FeedSource) -> Result<Option<FeedCursor>, SyncError> {
        let viewer = self.viewer.clone();
        let source = source.clone();
        self.read(move |db| {
            let feeds = FeedCache::new(db);
            let Some(state) = feeds.get_state(&viewer, &source)? else {
                return Ok(None);
            };
            let oldest = feeds.oldest_key(&viewer, &source)?;
            Ok(Some(state.resume(oldest)))
        })
        .await
    }

    /// Drop every cached item and the stored session of `source`.
    pub async fn clear_timeline(&self, source: &FeedSource) -> Result<usize, SyncError> {
        let viewer = self.viewer.clone();
        let source = source.clone();
        self.read(move |db| FeedCache::new(db).clear(&viewer, &source)).await
    }

    /// Run [`timeline`](Self::timeline) on a background task, reporting the
    /// cached page first and the fetched page after.
    ///
    /// Dropping the receiver before the fetch returns abandons the page
    /// without committing it. Must be called from within a tokio runtime.
    pub fn watch_timeline(&self, source: FeedSource, cursor: FeedCursor) -> mpsc::Receiver<TimelineEvent> {
        let (tx, rx) = mpsc::channel(4);
        let engine = self.clone();

        tokio::spawn(async move {
            let before = match cursor.remote {
                Cursor::Initial => None,
                _ => cursor.local,
            };
            match engine.cached_timeline(&source, before, engine.page_limit()).await {
                Ok(items) => {
                    if tx.send(TimelineEvent::Cached(items)).await.is_err() {
                        return;
                    }
                }
                Err(error) => warn!(%source, %error, "could not read cached timeline"),
            }

            let fetched = engine.fetch_timeline(&source, &cursor, || tx.is_closed()).await;
            let event = match fetched {
                Ok(TimelinePage {
                    status: FetchStatus::Stale { reason },
                    ..
                }) => TimelineEvent::Failed { reason, cursor },
                Ok(page) => TimelineEvent::Fetched(page),
                Err(SyncError::Cancelled) => {
                    debug!(%source, "timeline watcher dropped, page not committed");
                    return;
                }
                Err(error) => TimelineEvent::Failed {
                    reason: error.to_string(),
                    cursor,
                },
            };
            tx.send(event).await.ok();
        });

        rx
    }

    async fn fetch_timeline(
        &self,
        source: &FeedSource,
        cursor: &FeedCursor,
        abandoned: impl Fn() -> bool,
    ) -> Result<TimelinePage, SyncError> {
        let limit = self.page_limit();
        let now = Timestamp::now();
        let start = cursor.session(now);
        let new_session = cursor.first_request_at != Some(start.first_request_at);
        let before = if new_session { None } else { cursor.local };
        let capacity = SortKey::capacity_after(start.page_offset);

        if cursor.remote.is_exhausted() || capacity == 0 {
            let items = self.cached_timeline(source, before, limit).await?;
            let oldest = items.last().map(|item| item.sort_key);
            return Ok(TimelinePage {
                cursor: FeedCursor {
                    remote: Cursor::Pending,
                    ..cursor.with_local(oldest)
                },
                items,
                status: FetchStatus::Exhausted,
            });
        }

        let request = u8::try_from(limit.min(capacity)).unwrap_or(u8::MAX);
        let response = match self.remote.feed(source, cursor.remote.token(), request).await {
            Ok(response) => response,
            Err(error) => {
                warn!(%source, %error, "timeline fetch failed, serving cache");
                let items = self.cached_timeline(source, before, limit).await?;
                return Ok(TimelinePage {
                    items,
                    cursor: cursor.clone(),
                    status: FetchStatus::stale(error),
                });
            }
        };

        let source_key = source.key();
        let ctx = FeedContext {
            viewer: &self.viewer,
            source: &source_key,
            first_request_at: start.first_request_at,
        };
        // Undecodable entries still take a slot so offsets match the server's order.
        let fetched = response.feed.len().min(capacity);
        let exhausted = response.feed.len() >= capacity;
        if response.feed.len() > capacity {
            debug!(%source, dropped = response.feed.len() - capacity, "paging session full");
        }

        let mut saver = MultiEntitySaver::new();
        stage_page(
            &mut saver,
            "feed item",
            &response.feed[..fetched],
            |view| view.post.uri.as_str(),
            |index, view| feed_view_post(view, &ctx, start.page_offset + index as u64),
        );
        let next = cursor.advance(start, fetched, response.cursor, exhausted);
        saver.add(FeedStateEntity {
            viewer: self.viewer.clone(),
            source: source_key.clone(),
            first_request_at: start.first_request_at,
            cursor: next.remote.clone(),
            next_offset: next.next_offset,
            refreshed_at: now,
        });

        if abandoned() {
            return Err(SyncError::Cancelled);
        }

        let summary = match self.commit(saver).await {
            Ok(summary) => summary,
            Err(error) => {
                let status = dropped_page(&source_key, error)?;
                let items = self.cached_timeline(source, before, limit).await?;
                return Ok(TimelinePage {
                    items,
                    cursor: cursor.clone(),
                    status,
                });
            }
        };

        if summary.is_superseded(&self.viewer, &source_key) {
            let items = self.cached_timeline(source, None, limit).await?;
            let oldest = items.last().map(|item| item.sort_key);
            let cursor = self
                .saved_cursor(source)
                .await?
                .map(|saved| FeedCursor {
                    local: oldest,
                    ..saved
                })
                .unwrap_or_default();
            return Ok(TimelinePage {
                items,
                cursor,
                status: FetchStatus::Superseded,
            });
        }

        let items = self.cached_timeline(source, before, fetched).await?;
        Ok(TimelinePage {
            items,
            cursor: next,
            status: FetchStatus::Fresh,
        })
    }
}
