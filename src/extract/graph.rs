// SPDX-License-Identifier: MPL-2.0

use crate::atproto::views::{GeneratorView, LabelerViewItem, ListView};
use crate::entity::{
    Entities, FeedGeneratorEntity, LabelDefinitionEntity, ListEntity, ProfileEntity,
};
use crate::extract::label::labels;
use crate::extract::profile::profile_view;
use crate::extract::{ExtractError, optional_timestamp};
use crate::ids::{AtUri, Cid, Did};

pub fn feed_generator(view: &GeneratorView, viewer: &Did) -> Result<Entities, ExtractError> {
    let mut out = profile_view(&view.creator, viewer)?;
    out.push(FeedGeneratorEntity {
        uri: AtUri::new(view.uri.as_str())?,
        cid: Cid::new(view.cid.as_str())?,
        creator: Did::new(view.creator.did.as_str())?,
        service_did: Did::new(view.did.as_str())?,
        display_name: view.display_name.clone(),
        description: view.description.clone(),
        avatar: view.avatar.clone(),
        like_count: view.like_count,
        indexed_at: optional_timestamp(view.indexed_at.as_deref()),
    });
    labels(&view.labels, &mut out);
    Ok(out)
}

/// A list. Basic list views omit the creator, which is then the uri authority.
pub fn list(view: &ListView, viewer: &Did) -> Result<Entities, ExtractError> {
    let uri = AtUri::new(view.uri.as_str())?;
    let (mut out, creator) = match &view.creator {
        Some(creator) => (profile_view(creator, viewer)?, Did::new(creator.did.as_str())?),
        None => {
            let creator = uri.authority_did().ok_or(ExtractError::Missing("list creator"))?;
            let mut out = Entities::new();
            out.push(ProfileEntity::stub(creator.clone()));
            (out, creator)
        }
    };

    out.push(ListEntity {
        uri,
        cid: Cid::new(view.cid.as_str())?,
        creator,
        name: view.name.clone(),
        purpose: view.purpose.clone(),
        description: view.description.clone(),
        avatar: view.avatar.clone(),
        item_count: view.list_item_count,
        indexed_at: optional_timestamp(view.indexed_at.as_deref()),
    });
    labels(&view.labels, &mut out);
    Ok(out)
}

/// Labeler creator plus the label values it defines.
pub fn labeler(item: &LabelerViewItem, viewer: &Did) -> Result<Entities, ExtractError> {
    let view = match item {
        LabelerViewItem::Detailed(view) | LabelerViewItem::Basic(view) => view,
        LabelerViewItem::Unknown => return Ok(Entities::new()),
    };

    let mut out = profile_view(&view.creator, viewer)?;
    let creator = Did::new(view.creator.did.as_str())?;

    if let Some(policies) = &view.policies {
        for definition in &policies.label_value_definitions {
            out.push(LabelDefinitionEntity {
                creator: creator.clone(),
                identifier: definition.identifier.clone(),
                severity: definition.severity.clone(),
                blurs: definition.blurs.clone(),
                default_setting: definition.default_setting.clone(),
                adult_only: definition.adult_only.unwrap_or(false),
                locales_json: serde_json::Value::from(definition.locales.clone()).to_string(),
            });
        }
    }
    labels(&view.labels, &mut out);
    Ok(out)
}
