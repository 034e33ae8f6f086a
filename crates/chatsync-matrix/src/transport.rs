//! Port to the Matrix client-server protocol client.
//!
//! Connection setup, encryption and sync are owned by the transport; the adapter
//! only issues the requests below and receives timeline notifications.

use std::sync::Arc;

use async_trait::async_trait;
use chatsync_core::{AdapterError, AdapterErrorCategory, DirectDirectory, classify_http_status};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    events::{MessagesChunk, RawTimelineEvent},
    rooms::RoomSnapshot,
};

/// Failure reported by the transport, shaped like a Matrix error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{errcode}: {message}")]
pub struct TransportError {
    /// HTTP status; `None` when the request never got a response.
    pub status: Option<u16>,
    /// Matrix `errcode`, e.g. `M_NOT_FOUND`.
    pub errcode: String,
    pub message: String,
}

impl TransportError {
    pub fn http(status: u16, errcode: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            errcode: errcode.into(),
            message: message.into(),
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            status: None,
            errcode: "M_UNREACHABLE".to_owned(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::http(404, "M_NOT_FOUND", message)
    }

    pub fn is_room_in_use(&self) -> bool {
        self.errcode == "M_ROOM_IN_USE"
    }
}

impl From<TransportError> for AdapterError {
    fn from(err: TransportError) -> Self {
        let category = match (err.errcode.as_str(), err.status) {
            ("M_NOT_FOUND", _) => AdapterErrorCategory::NotFound,
            ("M_LIMIT_EXCEEDED", _) => AdapterErrorCategory::RateLimited,
            ("M_FORBIDDEN" | "M_UNKNOWN_TOKEN" | "M_MISSING_TOKEN", _) => {
                AdapterErrorCategory::Auth
            }
            (_, Some(status)) => classify_http_status(status),
            (_, None) => AdapterErrorCategory::Network,
        };
        AdapterError::new(category, "matrix_http_error", err.to_string())
    }
}

/// Direction a timeline event travelled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimelineDirection {
    /// New event from sync or a local echo.
    Forward,
    /// Event returned by back-pagination.
    Backward,
}

/// Send state of one of our own local echoes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocalEchoState {
    Sending,
    NotSent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineUpdate {
    pub room_id: String,
    pub event: RawTimelineEvent,
    pub direction: TimelineDirection,
    /// Set only for local echoes of events this device is sending.
    pub local_echo: Option<LocalEchoState>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportNotice {
    Timeline(TimelineUpdate),
    Receipt {
        room_id: String,
        event_id: String,
        user_id: String,
    },
}

/// Callback the transport invokes for every notice.
pub type TransportListener = Arc<dyn Fn(TransportNotice) + Send + Sync + 'static>;

/// Matrix client-server operations the adapter relies on.
#[async_trait]
pub trait MatrixTransport: Send + Sync + 'static {
    /// Signed-in user, `None` before login.
    fn user_id(&self) -> Option<String>;

    /// `PUT /rooms/{room}/send/{type}/{txn}`; returns the event ID.
    async fn send_event(
        &self,
        room_id: &str,
        txn_id: &str,
        event_type: &str,
        content: Value,
    ) -> Result<String, TransportError>;

    /// `POST /media/upload`; returns the `mxc://` content URI.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: &str,
    ) -> Result<String, TransportError>;

    /// Backward `/messages` from `from` (or the live end when `None`).
    async fn messages(
        &self,
        room_id: &str,
        from: Option<&str>,
        limit: u16,
    ) -> Result<MessagesChunk, TransportError>;

    /// Rooms the user is joined or invited to.
    async fn joined_rooms(&self) -> Result<Vec<RoomSnapshot>, TransportError>;

    async fn room_snapshot(&self, room_id: &str) -> Result<Option<RoomSnapshot>, TransportError>;

    /// The user's `m.direct` account data.
    async fn direct_directory(&self) -> Result<DirectDirectory, TransportError>;

    async fn leave(&self, room_id: &str) -> Result<(), TransportError>;

    async fn forget(&self, room_id: &str) -> Result<(), TransportError>;

    /// Set `m.fully_read` and the public read receipt.
    async fn send_read_marker(&self, room_id: &str, event_id: &str) -> Result<(), TransportError>;

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, TransportError>;

    /// Join by room ID or alias; returns the room ID.
    async fn join(&self, room_id_or_alias: &str) -> Result<String, TransportError>;

    /// Create a public room published under `#<alias_localpart>:<server>`.
    async fn create_room(&self, alias_localpart: &str, name: &str)
    -> Result<String, TransportError>;

    /// Replace the notice listener.
    fn set_listener(&self, listener: TransportListener);
}
