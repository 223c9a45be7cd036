// SPDX-License-Identifier: MPL-2.0

//! Typed identifiers and timestamps.
//!
//! Everything in the cache is keyed by one of these. They are validated once
//! when a view is normalized and trusted afterwards, so reading them back from
//! SQLite skips validation.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid DID: {0:?}")]
    Did(String),
    #[error("invalid AT-URI: {0:?}")]
    AtUri(String),
    #[error("empty {0}")]
    Empty(&'static str),
    #[error("invalid timestamp: {0:?}")]
    Timestamp(String),
}

static DID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").unwrap());

static AT_URI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^at://([a-zA-Z0-9._:%-]+)(/[a-zA-Z0-9.-]+(/[a-zA-Z0-9._~:@!$&')(*+,;=-]+)?)?$")
        .unwrap()
});

fn validate_did(value: &str) -> Result<(), IdError> {
    if DID_RE.is_match(value) {
        Ok(())
    } else {
        Err(IdError::Did(value.to_string()))
    }
}

fn validate_at_uri(value: &str) -> Result<(), IdError> {
    if AT_URI_RE.is_match(value) {
        Ok(())
    } else {
        Err(IdError::AtUri(value.to_string()))
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $validate:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                let validate: fn(&str) -> Result<(), IdError> = $validate;
                validate(&value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                String::column_result(value).map(Self)
            }
        }
    };
}

string_id!(
    /// Decentralized identifier of an actor (`did:plc:...`, `did:web:...`).
    Did,
    validate_did
);

string_id!(
    /// `at://authority/collection/rkey` reference to a record, used for posts,
    /// feed generators, lists, likes and reposts.
    AtUri,
    validate_at_uri
);

string_id!(
    /// Content hash of a record version.
    Cid,
    |v| if v.is_empty() { Err(IdError::Empty("cid")) } else { Ok(()) }
);

string_id!(
    /// Remote chat conversation id. Cached per owner, see `ConversationEntity`.
    ConvoId,
    |v| if v.is_empty() { Err(IdError::Empty("conversation id")) } else { Ok(()) }
);

string_id!(
    MessageId,
    |v| if v.is_empty() { Err(IdError::Empty("message id")) } else { Ok(()) }
);

impl AtUri {
    /// The repository part of the uri. For records this is the owner's DID.
    pub fn authority(&self) -> &str {
        self.parts().0
    }

    pub fn collection(&self) -> Option<&str> {
        self.parts().1
    }

    pub fn rkey(&self) -> Option<&str> {
        self.parts().2
    }

    /// Owner of the record when the authority is a DID rather than a handle.
    pub fn authority_did(&self) -> Option<Did> {
        Did::new(self.authority()).ok()
    }

    /// Creation time encoded in the record key, when the key is a TID.
    pub fn tid_timestamp(&self) -> Option<Timestamp> {
        self.rkey().and_then(tid_timestamp)
    }

    fn parts(&self) -> (&str, Option<&str>, Option<&str>) {
        let rest = self.0.trim_start_matches("at://");
        let mut split = rest.splitn(3, '/');
        let authority = split.next().unwrap_or_default();
        (authority, split.next(), split.next())
    }
}

/// Millisecond-precision UTC instant. Stored as INTEGER milliseconds so that
/// SQL ordering matches chronological ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Parse an RFC 3339 datetime as sent by the AppView (`indexedAt`, `sentAt`, ...).
    pub fn parse(value: &str) -> Result<Self, IdError> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| Self(dt.with_timezone(&Utc).timestamp_millis()))
            .map_err(|_| IdError::Timestamp(value.to_string()))
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

const TID_ALPHABET: &[u8; 32] = b"234567abcdefghijklmnopqrstuvwxyz";
const TID_LEN: usize = 13;

/// Decode the timestamp of a TID record key.
///
/// A TID is 13 base32-sortable characters holding 64 bits: a zero top bit,
/// 53 bits of microseconds since the epoch and a 10 bit clock id. Anything
/// else (custom record keys, `self`, truncated keys) yields `None`.
pub fn tid_timestamp(rkey: &str) -> Option<Timestamp> {
    if rkey.len() != TID_LEN {
        return None;
    }

    let mut value: u64 = 0;
    for (i, byte) in rkey.bytes().enumerate() {
        let digit = TID_ALPHABET.iter().position(|&c| c == byte)? as u64;
        // First character carries bits 60..64; bits 63 and 64 must be zero.
        if i == 0 && digit >= 8 {
            return None;
        }
        value = (value << 5) | digit;
    }

    let micros = (value >> 10) as i64;
    Some(Timestamp::from_millis(micros / 1_000))
}

/// Encode a TID for the given instant and clock id.
pub fn encode_tid(at: Timestamp, clock_id: u16) -> String {
    let micros = at.as_millis().max(0) as u64 * 1_000;
    let value = ((micros & ((1 << 53) - 1)) << 10) | u64::from(clock_id & 0x3ff);

    (0..TID_LEN)
        .rev()
        .map(|i| TID_ALPHABET[((value >> (i * 5)) & 0x1f) as usize] as char)
        .collect()
}

#[derive(Debug)]
struct InvalidStored;

impl fmt::Display for InvalidStored {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stored value is not a valid enum tag")
    }
}

impl std::error::Error for InvalidStored {}

/// Error for enum columns holding an unexpected tag.
pub(crate) fn invalid_stored() -> FromSqlError {
    FromSqlError::Other(Box::new(InvalidStored))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_did_validation() {
        assert!(Did::new("did:plc:z72i7hdynmk6r22z27h6tvur").is_ok());
        assert!(Did::new("did:web:example.com").is_ok());
        assert!(Did::new("alice.bsky.social").is_err());
        assert!(Did::new("did:plc:").is_err());
        assert!(Did::new("").is_err());
    }

    #[test]
    fn test_at_uri_parts() {
        let uri = AtUri::new("at://did:plc:abc/app.bsky.feed.post/3kabcdefghij2").unwrap();
        assert_eq!(uri.authority(), "did:plc:abc");
        assert_eq!(uri.collection(), Some("app.bsky.feed.post"));
        assert_eq!(uri.rkey(), Some("3kabcdefghij2"));
        assert_eq!(uri.authority_did().unwrap().as_str(), "did:plc:abc");

        assert!(AtUri::new("https://bsky.app/profile/alice").is_err());
        assert!(AtUri::new("at://").is_err());
    }

    #[test]
    fn test_tid_round_trip_is_millisecond_exact() {
        let at = Timestamp::parse("2024-11-05T13:45:12.345Z").unwrap();
        let tid = encode_tid(at, 7);
        assert_eq!(tid.len(), 13);
        assert_eq!(tid_timestamp(&tid), Some(at));
    }

    #[test]
    fn test_tid_sorts_chronologically() {
        let earlier = encode_tid(Timestamp::from_millis(1_700_000_000_000), 0);
        let later = encode_tid(Timestamp::from_millis(1_700_000_000_001), 0);
        assert!(earlier < later);
    }

    #[test]
    fn test_non_tid_keys_have_no_timestamp() {
        assert_eq!(tid_timestamp("self"), None);
        assert_eq!(tid_timestamp("zzzzzzzzzzzzz"), None);
        assert_eq!(tid_timestamp("3kabcdefghij!"), None);
    }

    #[test]
    fn test_timestamp_parse_and_display() {
        let ts = Timestamp::parse("2024-01-02T03:04:05.678+00:00").unwrap();
        assert_eq!(ts.to_string(), "2024-01-02T03:04:05.678Z");
        assert!(Timestamp::parse("yesterday").is_err());
    }
}
