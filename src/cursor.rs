// SPDX-License-Identifier: MPL-2.0

//! Pagination state shared between the remote API and the local cache.
//!
//! A feed cursor has two halves. The remote half is the AppView's opaque
//! continuation token. The local half is the sort key of the oldest item the
//! caller has been handed, which bounds cache reads independently of the
//! network. Both only move forward on success; a failed fetch leaves the
//! cursor untouched so the same request can simply be retried.

use crate::ids::Timestamp;
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// Remote pagination state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Cursor {
    /// Nothing fetched yet.
    #[default]
    Initial,
    /// The server returned this continuation token.
    Next(String),
    /// The server has nothing more to give, or gave no token.
    Pending,
}

impl Cursor {
    /// State after a successful fetch that returned `token`.
    pub fn after_fetch(token: Option<String>) -> Self {
        match token {
            Some(token) if !token.is_empty() => Cursor::Next(token),
            _ => Cursor::Pending,
        }
    }

    /// Token to send with the next request. `Initial` requests the head.
    pub fn token(&self) -> Option<&str> {
        match self {
            Cursor::Next(token) => Some(token),
            Cursor::Initial | Cursor::Pending => None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Cursor::Pending)
    }
}

/// Ordering key of a timeline item within its source. Larger sorts first.
///
/// `first_request_at * BUFFER - offset`, where `offset` is the item's
/// position within its paging session. Sessions started later always sort
/// ahead of earlier ones, and inside a session the server's order is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey(i64);

impl SortKey {
    /// Items per paging session. With millisecond instants this holds until
    /// roughly the year 31,000 before `i64` overflows.
    pub const BUFFER: i64 = 10_000;

    /// `None` once `offset` would run into the next session's range.
    pub fn new(first_request_at: Timestamp, offset: u64) -> Option<Self> {
        let offset = i64::try_from(offset).ok().filter(|o| *o < Self::BUFFER)?;
        first_request_at
            .as_millis()
            .checked_mul(Self::BUFFER)
            .map(|base| Self(base - offset))
    }

    /// Remaining room in a session that has already used `offset` slots.
    pub fn capacity_after(offset: u64) -> usize {
        usize::try_from((Self::BUFFER as u64).saturating_sub(offset)).unwrap_or(0)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    pub const fn from_value(value: i64) -> Self {
        Self(value)
    }
}

impl ToSql for SortKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for SortKey {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

/// Where the next page of a session begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStart {
    pub first_request_at: Timestamp,
    pub page_offset: u64,
}

/// Combined remote and local position in a timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedCursor {
    /// Instant the current paging session began.
    pub first_request_at: Option<Timestamp>,
    pub remote: Cursor,
    /// Session offset the next fetched page starts at.
    pub next_offset: u64,
    /// Sort key of the oldest item handed out so far.
    pub local: Option<SortKey>,
}

impl FeedCursor {
    /// Start (or restart) paging from the head of the feed.
    pub fn initial() -> Self {
        Self::default()
    }

    /// Session coordinates for the next fetch. An initial cursor opens a new
    /// session at `now`.
    pub fn session(&self, now: Timestamp) -> SessionStart {
        match (&self.remote, self.first_request_at) {
            (Cursor::Initial, _) | (_, None) => SessionStart {
                first_request_at: now,
                page_offset: 0,
            },
            (_, Some(first_request_at)) => SessionStart {
                first_request_at,
                page_offset: self.next_offset,
            },
        }
    }

    /// Cursor after a successful fetch of `fetched` items.
    ///
    /// `exhausted` forces `Pending` when the session ran out of sort-key room.
    pub fn advance(
        &self,
        start: SessionStart,
        fetched: usize,
        token: Option<String>,
        exhausted: bool,
    ) -> Self {
        let next_offset = start.page_offset + fetched as u64;
        let oldest = fetched
            .checked_sub(1)
            .and_then(|last| SortKey::new(start.first_request_at, start.page_offset + last as u64));

        let remote = if exhausted {
            Cursor::Pending
        } else {
            Cursor::after_fetch(token)
        };
        let local = match (&self.remote, oldest) {
            (_, Some(oldest)) => Some(oldest),
            // A fresh session with an empty page has nothing local to bound.
            (Cursor::Initial, None) => None,
            (_, None) => self.local,
        };

        Self {
            first_request_at: Some(start.first_request_at),
            remote,
            next_offset,
            local,
        }
    }

    /// Local half moved past items read from the cache without a fetch.
    pub fn with_local(&self, oldest: Option<SortKey>) -> Self {
        Self {
            local: oldest.or(self.local),
            ..self.clone()
        }
    }
}

/// Place of one item in a list ordered newest first. Items sharing a
/// timestamp are ordered by key, descending, so every item has exactly one
/// position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListPosition {
    pub at: Timestamp,
    pub key: String,
}

impl ListPosition {
    pub fn new(at: Timestamp, key: impl Into<String>) -> Self {
        Self { at, key: key.into() }
    }
}

/// Cursor for lists ordered by a timestamp: notifications, conversations, messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListCursor {
    pub remote: Cursor,
    /// Oldest position handed out so far.
    pub before: Option<ListPosition>,
}

impl ListCursor {
    pub fn initial() -> Self {
        Self::default()
    }

    /// Cache reads continue strictly below this position. `None` reads from the head.
    pub fn read_before(&self) -> Option<&ListPosition> {
        match self.remote {
            Cursor::Initial => None,
            _ => self.before.as_ref(),
        }
    }

    /// State after a page whose oldest item sits at `oldest`. The local half
    /// never moves back toward the head.
    pub fn advance(&self, token: Option<String>, oldest: Option<ListPosition>) -> Self {
        let before = match (self.read_before(), oldest) {
            (Some(current), Some(oldest)) => Some(oldest.min(current.clone())),
            (current, oldest) => oldest.or_else(|| current.cloned()),
        };
        Self {
            remote: Cursor::after_fetch(token),
            before,
        }
    }
}
