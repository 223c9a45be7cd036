// SPDX-License-Identifier: MPL-2.0

//! Normalized cache and timeline sync for Bluesky clients.
//!
//! Remote response graphs are projected into flat entities by [`extract`],
//! staged and committed atomically by [`cache::MultiEntitySaver`], and read
//! back as owned values by the caches in [`cache`]. [`sync::SyncEngine`] ties
//! the steps together behind cursor-paged operations.

pub mod atproto;
pub mod cache;
pub mod config;
pub mod cursor;
pub mod entity;
pub mod extract;
pub mod ids;
pub mod logging;
pub mod runtime;
pub mod sync;
pub mod timeline;

pub use cache::{CacheDb, CacheError, CommitSummary, MultiEntitySaver};
pub use config::SyncConfig;
pub use cursor::{Cursor, FeedCursor, ListCursor, ListPosition, SortKey};
pub use ids::{AtUri, Cid, ConvoId, Did, MessageId, Timestamp};
pub use sync::{FetchStatus, ListPage, SyncEngine, SyncError, ThreadPage, TimelineEvent, TimelinePage};
pub use timeline::{FeedItem, FeedSource, TimelineItem};
