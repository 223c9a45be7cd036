// SPDX-License-Identifier: MPL-2.0

use crate::atproto::views::{FeedViewPost, ReasonView, ReplyPost};
use crate::cursor::SortKey;
use crate::entity::{Entities, FeedItemEntity};
use crate::extract::post::{post_view, reply_refs, stub_post, stub_post_by};
use crate::extract::profile::profile_view;
use crate::extract::{ExtractError, optional_timestamp, optional_uri};
use crate::ids::{AtUri, Did, Timestamp};

/// Where a fetched page lands: whose feed, which source, which session.
#[derive(Debug, Clone, Copy)]
pub struct FeedContext<'a> {
    pub viewer: &'a Did,
    pub source: &'a str,
    pub first_request_at: Timestamp,
}

/// One feed entry at `offset` within its paging session.
pub fn feed_view_post(
    view: &FeedViewPost,
    ctx: &FeedContext<'_>,
    offset: u64,
) -> Result<Entities, ExtractError> {
    let sort_key =
        SortKey::new(ctx.first_request_at, offset).ok_or(ExtractError::SessionFull(offset))?;
    let mut out = post_view(&view.post, ctx.viewer)?;
    let post = AtUri::new(view.post.uri.as_str())?;

    let mut reply_root = None;
    let mut reply_parent = None;
    let mut grandparent_author = None;
    if let Some(reply) = &view.reply {
        let (record_root, record_parent) = reply_refs(&view.post.record);
        reply_root = reply_post(&reply.root, ctx.viewer, &mut out).or(record_root);
        reply_parent = reply_post(&reply.parent, ctx.viewer, &mut out).or(record_parent);

        if let Some(author) = &reply.grandparent_author
            && let Ok(entities) = profile_view(author, ctx.viewer)
        {
            out.extend(entities);
            grandparent_author = Did::new(author.did.as_str()).ok();
        }
    }

    let mut reposter = None;
    let mut repost_uri = None;
    let mut reposted_at = None;
    let mut pinned = false;
    match &view.reason {
        Some(ReasonView::Repost(reason)) => {
            out.extend(profile_view(&reason.by, ctx.viewer)?);
            reposter = Some(Did::new(reason.by.did.as_str())?);
            repost_uri = optional_uri(reason.uri.as_deref());
            reposted_at = optional_timestamp(reason.indexed_at.as_deref());
        }
        Some(ReasonView::Pin) => pinned = true,
        Some(ReasonView::Unknown) | None => {}
    }

    out.push(FeedItemEntity {
        viewer: ctx.viewer.clone(),
        source: ctx.source.to_string(),
        item_id: FeedItemEntity::item_id(&post, reposter.as_ref()),
        post,
        sort_key,
        reposter,
        repost_uri,
        reposted_at,
        reply_root,
        reply_parent,
        grandparent_author,
        pinned,
        feed_context: view.feed_context.clone(),
    });
    Ok(out)
}

/// Stage a reply ancestor and return its uri. Ancestors that fail to
/// normalize fall back to stubs.
fn reply_post(node: &ReplyPost, viewer: &Did, out: &mut Entities) -> Option<AtUri> {
    let stub = match node {
        ReplyPost::Post(view) => match post_view(view, viewer) {
            Ok(entities) => {
                out.extend(entities);
                return AtUri::new(view.uri.as_str()).ok();
            }
            Err(_) => stub_post(&view.uri),
        },
        ReplyPost::NotFound(missing) => stub_post(&missing.uri),
        ReplyPost::Blocked(blocked) => stub_post_by(&blocked.uri, &blocked.author.did),
        ReplyPost::Unknown => return None,
    };
    let (uri, entities) = stub.ok()?;
    out.extend(entities);
    Some(uri)
}
