// SPDX-License-Identifier: MPL-2.0

//! Notifications and chat: timestamp-ordered lists paged with a [`ListCursor`].

use super::{FetchStatus, SyncEngine, SyncError, dropped_page, stage_page};
use crate::atproto::views::ConvoMessage;
use crate::cache::{ChatCache, MultiEntitySaver, NotificationCache};
use crate::cursor::{Cursor, ListCursor, ListPosition};
use crate::extract::{conversation, message, notification};
use crate::ids::{AtUri, ConvoId, MessageId, Timestamp};
use crate::timeline::{ConversationSummary, MessageItem, NotificationItem};
use tracing::warn;

/// One page of a timestamp-ordered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    pub cursor: ListCursor,
    pub status: FetchStatus,
}

/// Cursor after a cache-only read of an exhausted list.
fn exhausted(cursor: &ListCursor, oldest: Option<ListPosition>) -> ListCursor {
    ListCursor {
        remote: Cursor::Pending,
        before: oldest.or_else(|| cursor.before.clone()),
    }
}

/// Typed keys of the staged items; anything that staged already parsed.
fn parsed<T: std::str::FromStr>(keys: Vec<String>) -> Vec<T> {
    keys.iter().filter_map(|key| key.parse().ok()).collect()
}

fn message_id(view: &ConvoMessage) -> &str {
    match view {
        ConvoMessage::Message(m) => &m.id,
        ConvoMessage::Deleted(m) => &m.id,
        ConvoMessage::Unknown => "unknown",
    }
}

impl SyncEngine {
    pub async fn notifications(
        &self,
        cursor: &ListCursor,
    ) -> Result<ListPage<NotificationItem>, SyncError> {
        let limit = self.page_limit();
        let before = cursor.read_before().cloned();

        if cursor.remote.is_exhausted() {
            let items = self.cached_notifications(before, limit).await?;
            return Ok(ListPage {
                cursor: exhausted(cursor, items.last().map(NotificationItem::position)),
                items,
                status: FetchStatus::Exhausted,
            });
        }

        let response = match self
            .remote
            .notifications(cursor.remote.token(), self.config.request_limit())
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "notification fetch failed, serving cache");
                return Ok(ListPage {
                    items: self.cached_notifications(before, limit).await?,
                    cursor: cursor.clone(),
                    status: FetchStatus::stale(error),
                });
            }
        };

        let mut saver = MultiEntitySaver::new();
        let staged: Vec<AtUri> = parsed(stage_page(
            &mut saver,
            "notification",
            &response.notifications,
            |view| view.uri.as_str(),
            |_, view| notification(view, &self.viewer),
        ));

        if let Err(error) = self.commit(saver).await {
            let status = dropped_page("notifications", error)?;
            return Ok(ListPage {
                items: self.cached_notifications(before, limit).await?,
                cursor: cursor.clone(),
                status,
            });
        }

        let viewer = self.viewer.clone();
        let quote_depth = self.config.quote_depth;
        let items = self
            .read(move |db| NotificationCache::new(db).get_many(&viewer, &staged, quote_depth))
            .await?;
        let oldest = items.last().map(NotificationItem::position);
        Ok(ListPage {
            cursor: cursor.advance(response.cursor, oldest),
            items,
            status: FetchStatus::Fresh,
        })
    }

    pub async fn cached_notifications(
        &self,
        before: Option<ListPosition>,
        limit: usize,
    ) -> Result<Vec<NotificationItem>, SyncError> {
        let viewer = self.viewer.clone();
        let quote_depth = self.config.quote_depth;
        self.read(move |db| {
            NotificationCache::new(db).get_page(&viewer, before.as_ref(), limit, quote_depth)
        })
        .await
    }

    pub async fn unread_notifications(&self) -> Result<usize, SyncError> {
        let viewer = self.viewer.clone();
        self.read(move |db| NotificationCache::new(db).unread_count(&viewer))
            .await
    }

    /// Mark everything indexed at or before `seen_at` as read locally.
    pub async fn mark_notifications_read(&self, seen_at: Timestamp) -> Result<usize, SyncError> {
        let viewer = self.viewer.clone();
        self.read(move |db| NotificationCache::new(db).mark_read(&viewer, seen_at))
            .await
    }

    pub async fn conversations(
        &self,
        cursor: &ListCursor,
    ) -> Result<ListPage<ConversationSummary>, SyncError> {
        let limit = self.page_limit();
        let before = cursor.read_before().cloned();

        if cursor.remote.is_exhausted() {
            let items = self.cached_conversations(before, limit).await?;
            return Ok(ListPage {
                cursor: exhausted(cursor, items.last().map(ConversationSummary::position)),
                items,
                status: FetchStatus::Exhausted,
            });
        }

        let response = match self
            .remote
            .conversations(cursor.remote.token(), self.config.request_limit())
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "conversation fetch failed, serving cache");
                return Ok(ListPage {
                    items: self.cached_conversations(before, limit).await?,
                    cursor: cursor.clone(),
                    status: FetchStatus::stale(error),
                });
            }
        };

        let mut saver = MultiEntitySaver::new();
        let staged: Vec<ConvoId> = parsed(stage_page(
            &mut saver,
            "conversation",
            &response.convos,
            |view| view.id.as_str(),
            |_, view| conversation(view, &self.viewer),
        ));

        if let Err(error) = self.commit(saver).await {
            let status = dropped_page("conversations", error)?;
            return Ok(ListPage {
                items: self.cached_conversations(before, limit).await?,
                cursor: cursor.clone(),
                status,
            });
        }

        let owner = self.viewer.clone();
        let items = self
            .read(move |db| ChatCache::new(db).conversations_by_id(&owner, &staged))
            .await?;
        let oldest = items.last().map(ConversationSummary::position);
        Ok(ListPage {
            cursor: cursor.advance(response.cursor, oldest),
            items,
            status: FetchStatus::Fresh,
        })
    }

    pub async fn cached_conversations(
        &self,
        before: Option<ListPosition>,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, SyncError> {
        let owner = self.viewer.clone();
        self.read(move |db| ChatCache::new(db).conversations(&owner, before.as_ref(), limit))
            .await
    }

    /// Messages of one conversation, newest first.
    pub async fn messages(
        &self,
        convo: &ConvoId,
        cursor: &ListCursor,
    ) -> Result<ListPage<MessageItem>, SyncError> {
        let limit = self.page_limit();
        let before = cursor.read_before().cloned();

        if cursor.remote.is_exhausted() {
            let items = self.cached_messages(convo, before, limit).await?;
            return Ok(ListPage {
                cursor: exhausted(cursor, items.last().map(MessageItem::position)),
                items,
                status: FetchStatus::Exhausted,
            });
        }

        let response = match self
            .remote
            .messages(convo, cursor.remote.token(), self.config.request_limit())
            .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(%convo, %error, "message fetch failed, serving cache");
                return Ok(ListPage {
                    items: self.cached_messages(convo, before, limit).await?,
                    cursor: cursor.clone(),
                    status: FetchStatus::stale(error),
                });
            }
        };

        let mut saver = MultiEntitySaver::new();
        let staged: Vec<MessageId> = parsed(stage_page(
            &mut saver,
            "message",
            &response.messages,
            message_id,
            |_, view| message(view, convo, &self.viewer),
        ));

        if let Err(error) = self.commit(saver).await {
            let status = dropped_page("messages", error)?;
            return Ok(ListPage {
                items: self.cached_messages(convo, before, limit).await?,
                cursor: cursor.clone(),
                status,
            });
        }

        let owner = self.viewer.clone();
        let target = convo.clone();
        let items = self
            .read(move |db| ChatCache::new(db).messages_by_id(&owner, &target, &staged))
            .await?;
        let oldest = items.last().map(MessageItem::position);
        Ok(ListPage {
            cursor: cursor.advance(response.cursor, oldest),
            items,
            status: FetchStatus::Fresh,
        })
    }

    pub async fn cached_messages(
        &self,
        convo: &ConvoId,
        before: Option<ListPosition>,
        limit: usize,
    ) -> Result<Vec<MessageItem>, SyncError> {
        let owner = self.viewer.clone();
        let convo = convo.clone();
        self.read(move |db| ChatCache::new(db).messages(&owner, &convo, before.as_ref(), limit))
            .await
    }
}
