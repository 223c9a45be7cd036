// SPDX-License-Identifier: MPL-2.0

use crate::atproto::views::NotificationView;
use crate::entity::{Completeness, Entities, NotificationEntity, NotificationReason};
use crate::extract::label::labels;
use crate::extract::post::{PostCounts, record_post};
use crate::extract::profile::profile_view;
use crate::extract::ExtractError;
use crate::ids::{AtUri, Cid, Did, Timestamp};

const POST_COLLECTION: &str = "app.bsky.feed.post";

/// A notification, its author, and for replies, mentions and quotes the post
/// carried in the notification record.
pub fn notification(view: &NotificationView, viewer: &Did) -> Result<Entities, ExtractError> {
    let mut out = profile_view(&view.author, viewer)?;
    let uri = AtUri::new(view.uri.as_str())?;
    let cid = Cid::new(view.cid.as_str())?;
    let author = Did::new(view.author.did.as_str())?;
    let reason = NotificationReason::parse(&view.reason);
    let indexed_at = Timestamp::parse(&view.indexed_at)?;

    let mut post = None;
    if reason.carries_post() && uri.collection() == Some(POST_COLLECTION) {
        record_post(
            &uri,
            Some(cid.clone()),
            &author,
            &view.record,
            PostCounts::default(),
            Some(view.indexed_at.as_str()),
            Completeness::Basic,
            &mut out,
        );
        post = Some(uri.clone());
    }

    labels(&view.labels, &mut out);
    out.push(NotificationEntity {
        viewer: viewer.clone(),
        uri,
        cid,
        author,
        reason,
        reason_subject: view.reason_subject.clone(),
        post,
        is_read: view.is_read,
        indexed_at,
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use serde_json::json;

    fn viewer() -> Did {
        Did::new("did:plc:viewer").unwrap()
    }

    fn view(reason: &str, collection: &str) -> NotificationView {
        serde_json::from_value(json!({
            "uri": format!("at://did:plc:bob/{collection}/3kbbbbbbbbbb2"),
            "cid": "bafyn",
            "author": {"did": "did:plc:bob", "handle": "bob.test"},
            "reason": reason,
            "reasonSubject": "at://did:plc:viewer/app.bsky.feed.post/3kvvvvvvvvvv2",
            "record": {"text": "@viewer hi", "reply": {
                "root": {"uri": "at://did:plc:viewer/app.bsky.feed.post/3kvvvvvvvvvv2"},
                "parent": {"uri": "at://did:plc:viewer/app.bsky.feed.post/3kvvvvvvvvvv2"}
            }},
            "isRead": false,
            "indexedAt": "2024-03-01T10:00:00Z"
        }))
        .unwrap()
    }

    fn notification_of(out: &Entities) -> &NotificationEntity {
        out.iter()
            .find_map(|e| match e {
                Entity::Notification(n) => Some(n),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_reply_notification_hydrates_post() {
        let out = notification(&view("reply", POST_COLLECTION), &viewer()).unwrap();
        let n = notification_of(&out);
        assert_eq!(n.reason, NotificationReason::Reply);
        assert!(n.post.is_some());

        let post = out
            .posts()
            .find(|p| p.completeness == Completeness::Basic)
            .unwrap();
        assert_eq!(post.text.as_deref(), Some("@viewer hi"));
        assert!(post.reply_parent.is_some());
    }

    #[test]
    fn test_like_notification_has_no_post() {
        let out = notification(&view("like", "app.bsky.feed.like"), &viewer()).unwrap();
        assert!(notification_of(&out).post.is_none());
        assert_eq!(out.posts().count(), 0);
    }

    #[test]
    fn test_unknown_reason_is_kept() {
        let out = notification(&view("verified", "app.bsky.graph.verification"), &viewer()).unwrap();
        assert_eq!(
            notification_of(&out).reason,
            NotificationReason::Other("verified".into())
        );
    }
}
