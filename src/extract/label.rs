// SPDX-License-Identifier: MPL-2.0

use crate::atproto::views::LabelView;
use crate::entity::{Entities, LabelEntity, ProfileEntity};
use crate::extract::optional_timestamp;
use crate::ids::Did;

/// Labels attached to a subject. A label whose source is not a DID is dropped.
pub(crate) fn labels(views: &[LabelView], out: &mut Entities) {
    for view in views {
        let Ok(creator) = Did::new(view.src.as_str()) else {
            continue;
        };
        out.push(ProfileEntity::stub(creator.clone()));
        out.push(LabelEntity {
            uri: view.uri.clone(),
            value: view.val.clone(),
            creator,
            cid: view.cid.clone(),
            created_at: optional_timestamp(Some(&view.cts)),
            negated: view.neg,
        });
    }
}
