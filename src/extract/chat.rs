// SPDX-License-Identifier: MPL-2.0

use crate::atproto::views::{ConvoMessage, ConvoView};
use crate::entity::{
    Completeness, ConversationEntity, ConversationMemberEntity, Entities, Entity, MessageEntity,
    ProfileEntity,
};
use crate::extract::profile::profile_view;
use crate::extract::ExtractError;
use crate::ids::{ConvoId, Did, MessageId, Timestamp};

/// A conversation as listed for `owner`, with members and its last message.
pub fn conversation(view: &ConvoView, owner: &Did) -> Result<Entities, ExtractError> {
    let id = ConvoId::new(view.id.as_str())?;
    let mut out = Entities::new();

    let mut members = Vec::with_capacity(view.members.len());
    for member in &view.members {
        out.extend(profile_view(member, owner)?);
        members.push(Did::new(member.did.as_str())?);
    }

    let mut last_message = None;
    let mut last_activity_at = None;
    if let Some(message_view) = &view.last_message {
        let entities = message(message_view, &id, owner)?;
        for entity in entities.iter() {
            if let Entity::Message(m) = entity {
                last_message = Some(m.id.clone());
                last_activity_at = Some(m.sent_at);
            }
        }
        out.extend(entities);
    }

    out.push(ConversationEntity {
        owner: owner.clone(),
        id: id.clone(),
        rev: view.rev.clone(),
        muted: view.muted,
        unread_count: view.unread_count,
        last_message,
        last_activity_at,
        completeness: Completeness::Full,
    });
    for member in members {
        out.push(ConversationMemberEntity {
            owner: owner.clone(),
            convo: id.clone(),
            member,
        });
    }
    Ok(out)
}

/// One message of `convo`. Deleted messages become tombstones; unknown
/// message types are skipped.
pub fn message(
    view: &ConvoMessage,
    convo: &ConvoId,
    owner: &Did,
) -> Result<Entities, ExtractError> {
    let (id, rev, sender, text, sent_at, deleted) = match view {
        ConvoMessage::Message(m) => (&m.id, &m.rev, &m.sender, Some(m.text.clone()), &m.sent_at, false),
        ConvoMessage::Deleted(m) => (&m.id, &m.rev, &m.sender, None, &m.sent_at, true),
        ConvoMessage::Unknown => return Ok(Entities::new()),
    };

    let sender = Did::new(sender.did.as_str())?;
    let mut out = Entities::new();
    out.push(ProfileEntity::stub(sender.clone()));
    out.push(ConversationEntity::stub(owner.clone(), convo.clone()));
    out.push(MessageEntity {
        owner: owner.clone(),
        convo: convo.clone(),
        id: MessageId::new(id.as_str())?,
        rev: rev.clone(),
        sender,
        text,
        sent_at: Timestamp::parse(sent_at)?,
        deleted,
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn owner() -> Did {
        Did::new("did:plc:owner").unwrap()
    }

    #[test]
    fn test_conversation_with_members_and_last_message() {
        let view: ConvoView = serde_json::from_value(json!({
            "id": "convo1",
            "rev": "r1",
            "members": [
                {"did": "did:plc:owner", "handle": "owner.test"},
                {"did": "did:plc:friend", "handle": "friend.test"}
            ],
            "lastMessage": {
                "$type": "chat.bsky.convo.defs#messageView",
                "id": "m1",
                "rev": "r1",
                "text": "hey",
                "sender": {"did": "did:plc:friend"},
                "sentAt": "2024-05-01T00:00:00Z"
            },
            "muted": false,
            "unreadCount": 1
        }))
        .unwrap();

        let out = conversation(&view, &owner()).unwrap();
        let convos: Vec<_> = out
            .iter()
            .filter_map(|e| match e {
                Entity::Conversation(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(convos.len(), 2);
        let full = convos.iter().find(|c| c.completeness == Completeness::Full).unwrap();
        assert_eq!(full.last_message.as_ref().map(MessageId::as_str), Some("m1"));
        assert_eq!(full.unread_count, 1);

        let members = out
            .iter()
            .filter(|e| matches!(e, Entity::ConversationMember(_)))
            .count();
        assert_eq!(members, 2);
    }

    #[test]
    fn test_deleted_message_is_a_tombstone() {
        let view: ConvoMessage = serde_json::from_value(json!({
            "$type": "chat.bsky.convo.defs#deletedMessageView",
            "id": "m2",
            "rev": "r2",
            "sender": {"did": "did:plc:friend"},
            "sentAt": "2024-05-01T00:00:00Z"
        }))
        .unwrap();
        let convo = ConvoId::new("convo1").unwrap();
        let out = message(&view, &convo, &owner()).unwrap();

        let message = out
            .iter()
            .find_map(|e| match e {
                Entity::Message(m) => Some(m),
                _ => None,
            })
            .unwrap();
        assert!(message.deleted);
        assert!(message.text.is_none());
    }

    #[test]
    fn test_unknown_message_type_is_skipped() {
        let view: ConvoMessage =
            serde_json::from_value(json!({"$type": "chat.bsky.convo.defs#systemMessageView"}))
                .unwrap();
        let convo = ConvoId::new("convo1").unwrap();
        assert!(message(&view, &convo, &owner()).unwrap().is_empty());
    }
}
