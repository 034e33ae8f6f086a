use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category reported by protocol adapters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdapterErrorCategory {
    /// Invalid input, unsupported state, or other configuration issue.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the backend.
    RateLimited,
    /// The referenced room, event or alias does not exist.
    NotFound,
    /// Storage/local persistence failure.
    Storage,
    /// Serialization/deserialization failure.
    Serialization,
    /// Internal adapter bug or invariant break.
    Internal,
}

/// Stable error payload produced at the protocol adapter boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct AdapterError {
    /// High-level error category.
    pub category: AdapterErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl AdapterError {
    /// Construct a new adapter error.
    pub fn new(
        category: AdapterErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a standard room-not-found error.
    pub fn room_not_found(room_id: &str) -> Self {
        Self::new(
            AdapterErrorCategory::NotFound,
            "room_not_found",
            format!("room not found: {room_id}"),
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.category == AdapterErrorCategory::NotFound
    }
}

/// Map HTTP status codes to adapter error categories.
pub fn classify_http_status(status: u16) -> AdapterErrorCategory {
    match status {
        401 | 403 => AdapterErrorCategory::Auth,
        404 => AdapterErrorCategory::NotFound,
        408 | 429 => AdapterErrorCategory::RateLimited,
        400..=499 => AdapterErrorCategory::Config,
        500..=599 => AdapterErrorCategory::Network,
        _ => AdapterErrorCategory::Internal,
    }
}

/// Error kind without payload, for callers that only branch on kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorKind {
    MessageSendFailed,
    NetworkError,
    PaginationFailed,
    RoomNotFound,
    InvalidMessage,
    UploadFailed,
}

/// Typed failure returned by every orchestrator operation.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The adapter rejected a send; the message stays visible as failed.
    #[error("failed to send message {temp_id} to room {room_id}")]
    MessageSendFailed {
        room_id: String,
        temp_id: String,
        #[source]
        source: AdapterError,
    },
    /// Initial load, room-list sync or another read failed.
    #[error("network request '{operation}' failed")]
    Network {
        operation: &'static str,
        #[source]
        source: AdapterError,
    },
    /// Loading older history produced nothing because the backend failed.
    #[error("failed to paginate history for room {room_id}")]
    PaginationFailed {
        room_id: String,
        #[source]
        source: AdapterError,
    },
    #[error("room not found: {room_id}")]
    RoomNotFound {
        room_id: String,
        #[source]
        source: Option<AdapterError>,
    },
    /// Neither text nor attachments were supplied.
    #[error("message must carry text or at least one attachment")]
    InvalidMessage,
    #[error("failed to upload '{file_name}'")]
    UploadFailed {
        file_name: String,
        #[source]
        source: AdapterError,
    },
}

impl ChatError {
    pub fn kind(&self) -> ChatErrorKind {
        match self {
            Self::MessageSendFailed { .. } => ChatErrorKind::MessageSendFailed,
            Self::Network { .. } => ChatErrorKind::NetworkError,
            Self::PaginationFailed { .. } => ChatErrorKind::PaginationFailed,
            Self::RoomNotFound { .. } => ChatErrorKind::RoomNotFound,
            Self::InvalidMessage => ChatErrorKind::InvalidMessage,
            Self::UploadFailed { .. } => ChatErrorKind::UploadFailed,
        }
    }

    /// Underlying adapter failure, when there is one.
    pub fn adapter_error(&self) -> Option<&AdapterError> {
        match self {
            Self::MessageSendFailed { source, .. }
            | Self::Network { source, .. }
            | Self::PaginationFailed { source, .. }
            | Self::UploadFailed { source, .. } => Some(source),
            Self::RoomNotFound { source, .. } => source.as_ref(),
            Self::InvalidMessage => None,
        }
    }

    /// Map a room-scoped read failure, promoting not-found to `RoomNotFound`.
    pub(crate) fn room_scoped(operation: &'static str, room_id: &str, source: AdapterError) -> Self {
        if source.is_not_found() {
            Self::RoomNotFound {
                room_id: room_id.to_owned(),
                source: Some(source),
            }
        } else {
            Self::Network { operation, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(401), AdapterErrorCategory::Auth);
        assert_eq!(classify_http_status(404), AdapterErrorCategory::NotFound);
        assert_eq!(classify_http_status(429), AdapterErrorCategory::RateLimited);
        assert_eq!(classify_http_status(400), AdapterErrorCategory::Config);
        assert_eq!(classify_http_status(503), AdapterErrorCategory::Network);
        assert_eq!(classify_http_status(700), AdapterErrorCategory::Internal);
    }

    #[test]
    fn chat_errors_keep_underlying_adapter_error() {
        let err = ChatError::MessageSendFailed {
            room_id: "!r:example.org".into(),
            temp_id: "temp-1".into(),
            source: AdapterError::new(AdapterErrorCategory::Network, "send_failed", "offline"),
        };

        assert_eq!(err.kind(), ChatErrorKind::MessageSendFailed);
        assert_eq!(err.adapter_error().map(|e| e.code.as_str()), Some("send_failed"));
        assert!(err.source().is_some());
    }

    #[test]
    fn room_scoped_promotes_not_found() {
        let err = ChatError::room_scoped(
            "load_messages",
            "!gone:example.org",
            AdapterError::room_not_found("!gone:example.org"),
        );
        assert_eq!(err.kind(), ChatErrorKind::RoomNotFound);

        let err = ChatError::room_scoped(
            "load_messages",
            "!r:example.org",
            AdapterError::new(AdapterErrorCategory::Network, "timeout", "timed out"),
        );
        assert_eq!(err.kind(), ChatErrorKind::NetworkError);
    }

    #[test]
    fn invalid_message_has_no_source() {
        let err = ChatError::InvalidMessage;
        assert_eq!(err.kind(), ChatErrorKind::InvalidMessage);
        assert!(err.adapter_error().is_none());
    }
}
