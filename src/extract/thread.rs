// SPDX-License-Identifier: MPL-2.0

use crate::atproto::views::{ThreadNode, ThreadViewPost};
use crate::entity::{Entities, ThreadEdgeEntity};
use crate::extract::post::{post_view, stub_post, stub_post_by};
use crate::extract::ExtractError;
use crate::ids::{AtUri, Did};

/// Posts and reply edges of a thread response.
///
/// Only the focused post has to be usable; broken ancestors become stubs
/// and broken reply subtrees are dropped.
pub fn thread(node: &ThreadNode, viewer: &Did) -> Result<Entities, ExtractError> {
    let focus = match node {
        ThreadNode::Post(focus) => focus,
        ThreadNode::NotFound(missing) => return stub_post(&missing.uri).map(|(_, out)| out),
        ThreadNode::Blocked(blocked) => {
            return stub_post_by(&blocked.uri, &blocked.author.did).map(|(_, out)| out);
        }
        ThreadNode::Unknown => {
            return Err(ExtractError::Malformed("unsupported thread root".into()));
        }
    };

    let mut out = post_view(&focus.post, viewer)?;
    let focus_uri = AtUri::new(focus.post.uri.as_str())?;

    // Ancestors arrive as a parent chain; walk it without recursion.
    let mut child = focus_uri.clone();
    let mut parent = focus.parent.as_ref();
    while let Some(node) = parent {
        let Some(uri) = node_post(node, viewer, &mut out) else {
            break;
        };
        push_edge(&child, &uri, &mut out);
        parent = match node {
            ThreadNode::Post(post) => post.parent.as_ref(),
            _ => None,
        };
        child = uri;
    }

    replies(focus, &focus_uri, viewer, &mut out);
    Ok(out)
}

fn replies(node: &ThreadViewPost, uri: &AtUri, viewer: &Did, out: &mut Entities) {
    for reply in &node.replies {
        let mut subtree = Entities::new();
        let Some(reply_uri) = node_post(reply, viewer, &mut subtree) else {
            continue;
        };
        out.extend(subtree);
        push_edge(&reply_uri, uri, out);
        if let ThreadNode::Post(post) = reply {
            replies(post, &reply_uri, viewer, out);
        }
    }
}

/// Stage one node's post and return its uri.
fn node_post(node: &ThreadNode, viewer: &Did, out: &mut Entities) -> Option<AtUri> {
    let stub = match node {
        ThreadNode::Post(view) => match post_view(&view.post, viewer) {
            Ok(entities) => {
                out.extend(entities);
                return AtUri::new(view.post.uri.as_str()).ok();
            }
            Err(_) => stub_post(&view.post.uri),
        },
        ThreadNode::NotFound(missing) => stub_post(&missing.uri),
        ThreadNode::Blocked(blocked) => stub_post_by(&blocked.uri, &blocked.author.did),
        ThreadNode::Unknown => return None,
    };
    let (uri, entities) = stub.ok()?;
    out.extend(entities);
    Some(uri)
}

fn push_edge(child: &AtUri, parent: &AtUri, out: &mut Entities) {
    if child != parent {
        out.push(ThreadEdgeEntity {
            child: child.clone(),
            parent: parent.clone(),
        });
    }
}
