// SPDX-License-Identifier: MPL-2.0

//! Pure projections from views to entities.
//!
//! Extractors never perform I/O and are deterministic: the same view always
//! yields the same entities, so staging a page twice is a plain overwrite.
//! A top-level extractor fails only when the item itself is unusable. Nested
//! failures (a broken quote, a reply subtree) fall back to a stub or are
//! dropped without failing the item that contains them.

mod chat;
mod embed;
mod feed;
mod graph;
mod label;
mod notification;
mod post;
mod profile;
mod thread;

pub use chat::{conversation, message};
pub use feed::{FeedContext, feed_view_post};
pub use graph::{feed_generator, labeler, list};
pub use notification::notification;
pub use post::{post_view, stub_post};
pub use profile::profile_view;
pub use thread::thread;

use crate::ids::{AtUri, IdError, Timestamp};
use thiserror::Error;

/// Why a single item could not be normalized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("paging session is full at offset {0}")]
    SessionFull(u64),
    #[error("malformed item: {0}")]
    Malformed(String),
}

fn optional_uri(value: Option<&str>) -> Option<AtUri> {
    value.and_then(|v| AtUri::new(v).ok())
}

fn optional_timestamp(value: Option<&str>) -> Option<Timestamp> {
    value.and_then(|v| Timestamp::parse(v).ok())
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Lexicon-shaped JSON builders shared by extractor tests.

    use serde_json::{Value, json};

    pub fn uri(did: &str, rkey: &str) -> String {
        format!("at://{did}/app.bsky.feed.post/{rkey}")
    }

    pub fn profile(did: &str) -> Value {
        json!({"did": did, "handle": format!("{}.test", &did[8..])})
    }

    pub fn post(did: &str, rkey: &str, text: &str) -> Value {
        json!({
            "uri": uri(did, rkey),
            "cid": format!("bafy{rkey}"),
            "author": profile(did),
            "record": {"$type": "app.bsky.feed.post", "text": text, "createdAt": "2024-01-01T00:00:00Z"},
            "replyCount": 1,
            "repostCount": 2,
            "likeCount": 3,
            "quoteCount": 0,
            "indexedAt": "2024-01-01T00:00:01.000Z"
        })
    }

    pub fn reply(did: &str, rkey: &str, parent: &str, root: &str) -> Value {
        let mut value = post(did, rkey, "reply");
        value["record"]["reply"] = json!({
            "root": {"uri": root, "cid": "bafyroot"},
            "parent": {"uri": parent, "cid": "bafyparent"}
        });
        value
    }
}
