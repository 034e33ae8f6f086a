//! JSON fixture describing a homeserver and a script of user actions.

use std::path::Path;

use chatsync_core::{DirectDirectory, PublicChannel};
use chatsync_matrix::InMemoryTransport;
use serde::Deserialize;

use crate::error::ReplayError;

const DEFAULT_NOW_MS: u64 = 1_700_000_000_000;

fn default_now_ms() -> u64 {
    DEFAULT_NOW_MS
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    pub user_id: String,
    pub homeserver: String,
    /// Wall-clock start of the replay.
    #[serde(default = "default_now_ms")]
    pub now_ms: u64,
    #[serde(default)]
    pub rooms: Vec<FixtureRoom>,
    /// `m.direct` account data.
    #[serde(default)]
    pub direct: DirectDirectory,
    #[serde(default)]
    pub catalog: Vec<PublicChannel>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FixtureRoom {
    pub room_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    /// Other members; the signed-in user is always a member.
    #[serde(default)]
    pub members: Vec<String>,
    /// Oldest first.
    #[serde(default)]
    pub history: Vec<FixtureMessage>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FixtureMessage {
    pub sender: String,
    pub body: String,
    /// How long before `now_ms` the message was sent.
    #[serde(default)]
    pub age_ms: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    OpenRoom {
        room_id: String,
    },
    Send {
        room_id: String,
        text: String,
    },
    /// Send with the next transport send forced to fail.
    SendFailing {
        room_id: String,
        text: String,
    },
    LoadMore {
        room_id: String,
    },
    /// A message from another client arrives live.
    Incoming {
        room_id: String,
        sender: String,
        body: String,
        #[serde(default)]
        age_ms: u64,
    },
    /// The transport reports one of our own pending echoes.
    LocalEcho {
        room_id: String,
        body: String,
        #[serde(default)]
        failed: bool,
    },
    SyncChannels,
    SyncDirectMessages,
    MarkRead {
        room_id: String,
    },
    LeaveRoom {
        room_id: String,
    },
    /// Resend every failed message of a room.
    Retry {
        room_id: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenRoom { .. } => "open_room",
            Self::Send { .. } => "send",
            Self::SendFailing { .. } => "send_failing",
            Self::LoadMore { .. } => "load_more",
            Self::Incoming { .. } => "incoming",
            Self::LocalEcho { .. } => "local_echo",
            Self::SyncChannels => "sync_channels",
            Self::SyncDirectMessages => "sync_direct_messages",
            Self::MarkRead { .. } => "mark_read",
            Self::LeaveRoom { .. } => "leave_room",
            Self::Retry { .. } => "retry",
        }
    }
}

impl Fixture {
    pub async fn load(path: &Path) -> Result<Self, ReplayError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ReplayError::ReadFixture {
                path: path.to_owned(),
                source,
            })?;
        Self::parse(&raw).map_err(|source| ReplayError::ParseFixture {
            path: path.to_owned(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Server name taken from the user ID.
    pub fn server_name(&self) -> &str {
        self.user_id
            .split_once(':')
            .map_or("localhost", |(_, server)| server)
    }

    /// Load rooms, history, aliases and the direct directory into `transport`.
    pub fn seed(&self, transport: &InMemoryTransport) {
        for room in &self.rooms {
            let members: Vec<&str> = room.members.iter().map(String::as_str).collect();
            let name = room
                .name
                .as_deref()
                .or(room.alias.as_deref())
                .unwrap_or(&room.room_id);
            transport.seed_channel(&room.room_id, name, &members);
            if let Some(alias) = &room.alias {
                transport.set_alias(alias, &room.room_id);
            }
            for message in &room.history {
                transport.seed_text(
                    &room.room_id,
                    &message.sender,
                    &message.body,
                    self.now_ms.saturating_sub(message.age_ms),
                );
            }
        }
        for room_id in self.direct.room_ids() {
            if let Some(user_id) = self.direct.counterpart(room_id) {
                transport.set_direct(user_id, room_id);
            }
        }
    }
}
