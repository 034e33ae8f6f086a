//! Sender identity lookup and message enrichment.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Display data for a backend user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl Identity {
    /// Identity derived from the user handle alone.
    pub fn fallback(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            display_name: fallback_display_name(user_id),
            avatar_url: None,
        }
    }
}

/// Message joined with its resolved sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageWithSender {
    pub message: Message,
    pub sender: Identity,
    /// Authored by the signed-in user.
    pub is_own: bool,
}

/// Read side of the sender identity cache.
pub trait IdentityCache: Send + Sync {
    fn identity(&self, user_id: &str) -> Option<Identity>;
}

#[derive(Clone, Default)]
pub struct InMemoryIdentityCache {
    data: Arc<RwLock<HashMap<String, Identity>>>,
}

impl InMemoryIdentityCache {
    pub fn insert(&self, identity: Identity) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity.user_id.clone(), identity);
    }

    pub fn extend(&self, identities: impl IntoIterator<Item = Identity>) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        for identity in identities {
            data.insert(identity.user_id.clone(), identity);
        }
    }
}

impl IdentityCache for InMemoryIdentityCache {
    fn identity(&self, user_id: &str) -> Option<Identity> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }
}

/// Localpart of a `@user:server` handle, or the handle itself.
pub fn fallback_display_name(user_id: &str) -> String {
    let localpart = user_id
        .strip_prefix('@')
        .and_then(|rest| rest.split(':').next())
        .filter(|localpart| !localpart.is_empty());
    localpart.unwrap_or(user_id).to_owned()
}

/// Resolve the sender of `message`, falling back to the handle's localpart.
pub fn resolve_sender(cache: &dyn IdentityCache, user_id: &str) -> Identity {
    cache
        .identity(user_id)
        .filter(|identity| !identity.display_name.trim().is_empty())
        .unwrap_or_else(|| Identity::fallback(user_id))
}

pub fn enrich(
    cache: &dyn IdentityCache,
    own_user_id: Option<&str>,
    message: Message,
) -> MessageWithSender {
    let sender = resolve_sender(cache, &message.sender_id);
    let is_own = own_user_id == Some(message.sender_id.as_str());
    MessageWithSender {
        message,
        sender,
        is_own,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageStatus;

    #[test]
    fn fallback_uses_localpart() {
        assert_eq!(fallback_display_name("@bob:example.org"), "bob");
        assert_eq!(fallback_display_name("bob"), "bob");
        assert_eq!(fallback_display_name("@:example.org"), "@:example.org");
    }

    #[test]
    fn enrich_prefers_cached_identity() {
        let cache = InMemoryIdentityCache::default();
        cache.insert(Identity {
            user_id: "@bob:example.org".into(),
            display_name: "Bob Angler".into(),
            avatar_url: Some("https://example.org/bob.png".into()),
        });

        let message = Message::text("$1", "@bob:example.org", "hi", MessageStatus::Sent, 1);
        let enriched = enrich(&cache, Some("@me:example.org"), message);
        assert_eq!(enriched.sender.display_name, "Bob Angler");
        assert!(!enriched.is_own);

        let mine = Message::text("$2", "@me:example.org", "yo", MessageStatus::Sent, 2);
        let enriched = enrich(&cache, Some("@me:example.org"), mine);
        assert_eq!(enriched.sender.display_name, "me");
        assert!(enriched.is_own);
    }
}
