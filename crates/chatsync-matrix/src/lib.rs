//! Matrix protocol adapter for `chatsync-core`.
//!
//! [`MatrixAdapter`] implements the core [`ChatAdapter`](chatsync_core::ChatAdapter) port on top
//! of a [`MatrixTransport`], translating client-server events into core messages.

pub mod adapter;
pub mod config;
pub mod events;
/// Media uploads and `mxc://` resolution.
pub mod media;
/// In-process homeserver with fault injection.
pub mod memory;
pub mod rooms;
pub mod timeline;
pub mod translate;
/// Matrix client-server port.
pub mod transport;

pub use adapter::MatrixAdapter;
pub use config::MatrixAdapterConfig;
pub use events::{MediaContent, MediaInfo, MessagesChunk, RawTimelineEvent, Unsigned};
pub use media::{MediaUrls, upload_local_media};
pub use memory::{InMemoryTransport, Operation};
pub use rooms::{RoomMember, RoomSnapshot, TranslatedRoom, translate_room};
pub use timeline::RoomTimeline;
pub use translate::{ATTACHMENTS_KEY, incoming_event, message_content, message_from_event};
pub use transport::{
    LocalEchoState, MatrixTransport, TimelineDirection, TimelineUpdate, TransportError,
    TransportListener, TransportNotice,
};
