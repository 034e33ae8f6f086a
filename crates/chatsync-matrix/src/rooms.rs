//! Room summaries and their translation into channel and direct-chat entries.

use chatsync_core::{
    ChatRoom, DirectDirectory, DirectMessage, Membership, Message, Room, RoomMembershipFacts,
    direct_counterpart, is_direct_room,
};
use serde::{Deserialize, Serialize};

use crate::{events::RawTimelineEvent, media::MediaUrls, translate::message_from_event};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomMember {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Room state as reported by the homeserver for the signed-in user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSnapshot {
    pub room_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub canonical_alias: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub own_membership: Membership,
    #[serde(default)]
    pub joined_member_count: u32,
    #[serde(default)]
    pub invited_member_count: u32,
    /// Joined and invited members; may be partial in large rooms.
    #[serde(default)]
    pub members: Vec<RoomMember>,
    #[serde(default)]
    pub unread_notifications: u32,
    #[serde(default)]
    pub latest_event: Option<RawTimelineEvent>,
}

impl RoomSnapshot {
    pub fn membership_facts(&self) -> RoomMembershipFacts<'_> {
        RoomMembershipFacts {
            room_id: &self.room_id,
            own_membership: self.own_membership,
            joined_member_count: self.joined_member_count,
            invited_member_count: self.invited_member_count,
        }
    }

    pub fn is_departed(&self) -> bool {
        matches!(self.own_membership, Membership::Leave | Membership::Ban)
    }

    /// Display name: explicit name, then canonical alias, then room ID.
    pub fn display_name(&self) -> String {
        self.name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .or(self.canonical_alias.as_deref())
            .unwrap_or(&self.room_id)
            .to_owned()
    }

    fn member(&self, user_id: &str) -> Option<&RoomMember> {
        self.members.iter().find(|member| member.user_id == user_id)
    }

    fn last_message(&self) -> Option<Message> {
        self.latest_event.as_ref().and_then(message_from_event)
    }
}

/// A room classified for the room lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslatedRoom {
    Channel(ChatRoom),
    Direct(DirectMessage),
}

impl From<TranslatedRoom> for Room {
    fn from(room: TranslatedRoom) -> Self {
        match room {
            TranslatedRoom::Channel(channel) => channel.into(),
            TranslatedRoom::Direct(direct) => direct.into(),
        }
    }
}

pub fn translate_room(
    snapshot: &RoomSnapshot,
    directory: &DirectDirectory,
    own_user_id: &str,
    media: &MediaUrls,
) -> TranslatedRoom {
    let resolve = |uri: Option<&str>| uri.and_then(|uri| media.resolve(uri));

    if is_direct_room(directory, &snapshot.membership_facts()) {
        let member_ids: Vec<String> = snapshot
            .members
            .iter()
            .map(|member| member.user_id.clone())
            .collect();
        let other_user_id =
            direct_counterpart(directory, &snapshot.room_id, own_user_id, &member_ids);
        let other = snapshot.member(&other_user_id);
        return TranslatedRoom::Direct(DirectMessage {
            room_id: snapshot.room_id.clone(),
            other_display_name: other.and_then(|member| member.display_name.clone()),
            other_avatar_url: resolve(other.and_then(|member| member.avatar_url.as_deref()))
                .or_else(|| resolve(snapshot.avatar_url.as_deref())),
            other_user_id,
            unread_count: snapshot.unread_notifications,
            last_message: snapshot.last_message(),
        });
    }

    TranslatedRoom::Channel(ChatRoom {
        room_id: snapshot.room_id.clone(),
        name: snapshot.display_name(),
        topic: snapshot.topic.clone(),
        avatar_url: resolve(snapshot.avatar_url.as_deref()),
        unread_count: snapshot.unread_notifications,
        member_count: snapshot.joined_member_count,
        last_message: snapshot.last_message(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const ME: &str = "@me:example.org";

    fn media() -> MediaUrls {
        MediaUrls::new("https://matrix.example.org").expect("valid homeserver")
    }

    fn member(user_id: &str, name: &str) -> RoomMember {
        RoomMember {
            user_id: user_id.into(),
            display_name: Some(name.into()),
            avatar_url: Some(format!("mxc://example.org/{name}")),
        }
    }

    fn snapshot(room_id: &str, joined: u32, members: Vec<RoomMember>) -> RoomSnapshot {
        RoomSnapshot {
            room_id: room_id.into(),
            name: None,
            canonical_alias: None,
            topic: None,
            avatar_url: None,
            own_membership: Membership::Join,
            joined_member_count: joined,
            invited_member_count: 0,
            members,
            unread_notifications: 3,
            latest_event: None,
        }
    }

    #[test]
    fn two_member_room_is_direct_with_other_member() {
        let room = snapshot(
            "!dm:example.org",
            2,
            vec![member(ME, "me"), member("@bob:example.org", "Bob")],
        );

        match translate_room(&room, &DirectDirectory::default(), ME, &media()) {
            TranslatedRoom::Direct(dm) => {
                assert_eq!(dm.other_user_id, "@bob:example.org");
                assert_eq!(dm.other_display_name.as_deref(), Some("Bob"));
                assert_eq!(
                    dm.other_avatar_url.as_deref(),
                    Some("https://matrix.example.org/_matrix/client/v1/media/download/example.org/Bob")
                );
                assert_eq!(dm.unread_count, 3);
            }
            other => panic!("expected direct room, got {other:?}"),
        }
    }

    #[test]
    fn larger_room_is_channel_named_by_alias() {
        let mut room = snapshot("!c:example.org", 5, Vec::new());
        room.canonical_alias = Some("#fishing:example.org".into());
        room.latest_event = Some(
            serde_json::from_value(json!({
                "type": "m.room.message",
                "event_id": "$last",
                "sender": "@bob:example.org",
                "origin_server_ts": 10,
                "content": { "msgtype": "m.text", "body": "fish on" }
            }))
            .expect("event should parse"),
        );

        match translate_room(&room, &DirectDirectory::default(), ME, &media()) {
            TranslatedRoom::Channel(channel) => {
                assert_eq!(channel.name, "#fishing:example.org");
                assert_eq!(channel.member_count, 5);
                assert_eq!(
                    channel.last_message.and_then(|message| message.text).as_deref(),
                    Some("fish on")
                );
            }
            other => panic!("expected channel, got {other:?}"),
        }
    }

    #[test]
    fn directory_entry_wins_over_member_count() {
        let mut directory = DirectDirectory::default();
        directory.insert("@carol:example.org", "!big:example.org");
        let room = snapshot("!big:example.org", 7, Vec::new());

        let translated: Room = translate_room(&room, &directory, ME, &media()).into();
        assert_eq!(
            translated.kind,
            chatsync_core::RoomKind::Direct {
                other_user_id: "@carol:example.org".into()
            }
        );
        assert_eq!(translated.name, "@carol:example.org");
    }
}
