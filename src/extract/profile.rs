// SPDX-License-Identifier: MPL-2.0

use crate::atproto::views::ProfileView;
use crate::entity::{Completeness, Entities, ProfileEntity, ProfileViewerStateEntity};
use crate::extract::label::labels;
use crate::extract::{ExtractError, optional_timestamp, optional_uri};
use crate::ids::Did;

/// Profile, viewer relationship and labels of one actor.
///
/// Detailed views (the ones carrying counts) are `Full`; the basic views
/// embedded in posts and lists are `Basic`.
pub fn profile_view(view: &ProfileView, viewer: &Did) -> Result<Entities, ExtractError> {
    let mut out = Entities::new();
    let did = Did::new(view.did.as_str())?;

    let completeness = if view.followers_count.is_some() || view.posts_count.is_some() {
        Completeness::Full
    } else {
        Completeness::Basic
    };
    let associated = view.associated.clone().unwrap_or_default();

    out.push(ProfileEntity {
        did: did.clone(),
        handle: view.handle.clone(),
        display_name: view.display_name.clone(),
        description: view.description.clone(),
        avatar: view.avatar.clone(),
        banner: view.banner.clone(),
        followers_count: view.followers_count,
        follows_count: view.follows_count,
        posts_count: view.posts_count,
        lists_count: associated.lists,
        feedgens_count: associated.feedgens,
        starter_packs_count: associated.starter_packs,
        is_labeler: associated.labeler.unwrap_or(false),
        created_at: optional_timestamp(view.created_at.as_deref()),
        indexed_at: optional_timestamp(view.indexed_at.as_deref()),
        completeness,
    });

    if let Some(state) = &view.viewer {
        out.push(ProfileViewerStateEntity {
            did,
            viewer: viewer.clone(),
            muted: state.muted,
            blocked_by: state.blocked_by,
            blocking: optional_uri(state.blocking.as_deref()),
            following: optional_uri(state.following.as_deref()),
            followed_by: optional_uri(state.followed_by.as_deref()),
        });
    }

    labels(&view.labels, &mut out);
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

    #[test]
    fn test_basic_profile_has_no_viewer_state() {
        let view: ProfileView =
            serde_json::from_value(json!({"did": "did:plc:alice", "handle": "alice.test"})).unwrap();
        let out = profile_view(&view, &viewer()).unwrap();

        assert_eq!(out.len(), 1);
        let profile = out.profiles().next().unwrap();
        assert_eq!(profile.completeness, Completeness::Basic);
        assert_eq!(profile.handle.as_deref(), Some("alice.test"));
    }

    #[test]
    fn test_detailed_profile_is_full_with_relationship() {
        let view: ProfileView = serde_json::from_value(json!({
            "did": "did:plc:alice",
            "handle": "alice.test",
            "followersCount": 10,
            "followsCount": 2,
            "postsCount": 99,
            "associated": {"lists": 1, "feedgens": 0, "labeler": true},
            "viewer": {"muted": false, "following": "at://did:plc:viewer/app.bsky.graph.follow/3kfollowfol2"}
        }))
        .unwrap();
        let out = profile_view(&view, &viewer()).unwrap();

        let profile = out.profiles().next().unwrap();
        assert_eq!(profile.completeness, Completeness::Full);
        assert!(profile.is_labeler);
        assert_eq!(profile.lists_count, Some(1));

        let state = out.iter().find_map(|e| match e {
            Entity::ProfileViewerState(s) => Some(s),
            _ => None,
        });
        let state = state.unwrap();
        assert_eq!(state.viewer, viewer());
        assert!(state.following.is_some());
    }

    #[test]
    fn test_invalid_did_is_an_error() {
        let view: ProfileView =
            serde_json::from_value(json!({"did": "alice.test"})).unwrap();
        assert!(profile_view(&view, &viewer()).is_err());
    }
}
