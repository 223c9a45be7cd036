// SPDX-License-Identifier: MPL-2.0

use crate::atproto::views::{EmbeddedPostView, PostView};
use crate::entity::{
    Completeness, Entities, PostEntity, PostViewerStateEntity, ProfileEntity, ThreadEdgeEntity,
};
use crate::extract::embed::embed_view;
use crate::extract::label::labels;
use crate::extract::profile::profile_view;
use crate::extract::{ExtractError, optional_timestamp, optional_uri};
use crate::ids::{AtUri, Cid, Did, Timestamp};
use serde_json::Value;

/// Counts as the AppView reports them. Absent means unknown, not zero.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PostCounts {
    pub reply: Option<i64>,
    pub repost: Option<i64>,
    pub like: Option<i64>,
    pub quote: Option<i64>,
}

/// A fully hydrated post with its author, viewer state, labels and embeds.
pub fn post_view(view: &PostView, viewer: &Did) -> Result<Entities, ExtractError> {
    let mut out = profile_view(&view.author, viewer)?;
    let uri = AtUri::new(view.uri.as_str())?;
    let author = Did::new(view.author.did.as_str())?;
    let counts = PostCounts {
        reply: view.reply_count,
        repost: view.repost_count,
        like: view.like_count,
        quote: view.quote_count,
    };

    record_post(
        &uri,
        Cid::new(view.cid.as_str()).ok(),
        &author,
        &view.record,
        counts,
        view.indexed_at.as_deref(),
        Completeness::Full,
        &mut out,
    );

    if let Some(state) = &view.viewer {
        out.push(PostViewerStateEntity {
            post: uri.clone(),
            viewer: viewer.clone(),
            like: optional_uri(state.like.as_deref()),
            repost: optional_uri(state.repost.as_deref()),
            thread_muted: state.thread_muted,
            reply_disabled: state.reply_disabled,
            pinned: state.pinned,
        });
    }

    labels(&view.labels, &mut out);
    if let Some(embed) = &view.embed {
        embed_view(&uri, embed, viewer, &mut out);
    }
    Ok(out)
}

/// A quoted post. Its nested embeds are walked as deep as the response goes.
pub(crate) fn embedded_post(
    view: &EmbeddedPostView,
    viewer: &Did,
) -> Result<Entities, ExtractError> {
    let mut out = profile_view(&view.author, viewer)?;
    let uri = AtUri::new(view.uri.as_str())?;
    let author = Did::new(view.author.did.as_str())?;
    let counts = PostCounts {
        reply: view.reply_count,
        repost: view.repost_count,
        like: view.like_count,
        quote: view.quote_count,
    };

    record_post(
        &uri,
        Cid::new(view.cid.as_str()).ok(),
        &author,
        &view.value,
        counts,
        view.indexed_at.as_deref(),
        Completeness::Basic,
        &mut out,
    );

    labels(&view.labels, &mut out);
    for embed in &view.embeds {
        embed_view(&uri, embed, viewer, &mut out);
    }
    Ok(out)
}

/// Stub post (and stub author) for a record known only by uri.
///
/// The author is the uri authority, so handle-based uris cannot be stubbed.
pub fn stub_post(uri: &str) -> Result<(AtUri, Entities), ExtractError> {
    let uri = AtUri::new(uri)?;
    let author = uri.authority_did().ok_or(ExtractError::Missing("record author DID"))?;
    let mut out = Entities::new();
    out.push(ProfileEntity::stub(author.clone()));
    out.push(PostEntity::stub(uri.clone(), author));
    Ok((uri, out))
}

/// Stub post with a known author, for blocked records.
pub(crate) fn stub_post_by(uri: &str, author: &str) -> Result<(AtUri, Entities), ExtractError> {
    let uri = AtUri::new(uri)?;
    let author = Did::new(author)?;
    let mut out = Entities::new();
    out.push(ProfileEntity::stub(author.clone()));
    out.push(PostEntity::stub(uri.clone(), author));
    Ok((uri, out))
}

/// Reply root and parent named by a post record.
pub(crate) fn reply_refs(record: &Value) -> (Option<AtUri>, Option<AtUri>) {
    let reply = &record["reply"];
    (
        optional_uri(reply["root"]["uri"].as_str()),
        optional_uri(reply["parent"]["uri"].as_str()),
    )
}

/// Creation time of a post: the record key's TID when it is one, else the
/// AppView's index time.
pub(crate) fn created_at(uri: &AtUri, indexed_at: Option<Timestamp>) -> Option<Timestamp> {
    uri.tid_timestamp().or(indexed_at)
}

/// Stage a post row from a record body, plus stubs and an edge for the
/// reply refs the record names.
#[allow(clippy::too_many_arguments)]
pub(crate) fn record_post(
    uri: &AtUri,
    cid: Option<Cid>,
    author: &Did,
    record: &Value,
    counts: PostCounts,
    indexed_at: Option<&str>,
    completeness: Completeness,
    out: &mut Entities,
) {
    let (reply_root, reply_parent) = reply_refs(record);
    let indexed_at = optional_timestamp(indexed_at);

    for reference in [&reply_root, &reply_parent].into_iter().flatten() {
        if reference == uri {
            continue;
        }
        if let Ok((_, stubs)) = stub_post(reference.as_str()) {
            out.extend(stubs);
        }
    }
    if let Some(parent) = &reply_parent
        && parent != uri
        && parent.authority_did().is_some()
    {
        out.push(ThreadEdgeEntity {
            child: uri.clone(),
            parent: parent.clone(),
        });
    }

    // References that could not be stubbed cannot be stored either.
    let stubbable = |r: Option<AtUri>| r.filter(|r| r != uri && r.authority_did().is_some());

    out.push(PostEntity {
        uri: uri.clone(),
        cid,
        author: author.clone(),
        text: record["text"].as_str().map(String::from),
        record_json: (!record.is_null()).then(|| record.to_string()),
        reply_root: stubbable(reply_root),
        reply_parent: stubbable(reply_parent),
        reply_count: counts.reply,
        repost_count: counts.repost,
        like_count: counts.like,
        quote_count: counts.quote,
        created_at: created_at(uri, indexed_at),
        indexed_at,
        completeness,
    });
}
