//! Client-side chat synchronization core.
//!
//! This crate owns the conversation store, live-event classification, history
//! pagination and the chat repository that coordinates them behind a protocol
//! adapter port.

/// Protocol adapter port and subscription handles.
pub mod adapter;
/// Live-event filtering rules.
pub mod classifier;
/// Injectable wall clock.
pub mod clock;
/// Environment-backed tuning.
pub mod config;
/// Direct-chat detection heuristic.
pub mod direct;
/// Structural channel catalog.
pub mod directory;
/// Adapter and orchestrator error types.
pub mod error;
/// Sender identity lookup and message enrichment.
pub mod identity;
/// Chat repository use-case layer.
pub mod orchestrator;
/// Backward-history pagination engine.
pub mod pagination;
/// Bounded recently-seen ID set.
pub mod recency;
/// Conversation store and reducer actions.
pub mod store;
/// Live update fan-out registry.
pub mod subscription;
/// Domain types shared by every layer.
pub mod types;

#[cfg(test)]
mod test_support;

pub use adapter::{ChatAdapter, EventSink, SubscriptionToken};
pub use classifier::{Classification, ClassifyMode, EventClassifier, IgnoreReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig, bounded_page_limit};
pub use direct::{
    DirectDirectory, Membership, RoomMembershipFacts, direct_counterpart, is_direct_room,
};
pub use directory::{ChannelDirectory, StaticChannelDirectory};
pub use error::{
    AdapterError, AdapterErrorCategory, ChatError, ChatErrorKind, classify_http_status,
};
pub use identity::{
    Identity, IdentityCache, InMemoryIdentityCache, MessageWithSender, enrich,
    fallback_display_name, resolve_sender,
};
pub use orchestrator::{ChatRepository, LoadMoreOutcome, NotificationHandler};
pub use pagination::{PageOutcome, PageSource, PaginationEngine, virtual_page};
pub use recency::RecentIds;
pub use store::{
    ConversationState, ConversationStore, DEFAULT_MAX_MESSAGES_PER_ROOM, StoreAction,
    StoreOutcome,
};
pub use subscription::SubscriptionRegistry;
pub use types::{
    Attachment, AttachmentKind, ChatRoom, DirectMessage, EventOrigin, HistoryPage, IncomingEvent,
    LiveUpdate, LocalMedia, Message, MessageNotification, MessageStatus, PublicChannel,
    ReadReceipt, Room, RoomKind, RoomType, TEMP_ID_PREFIX, is_temporary_id, temp_message_id,
};
