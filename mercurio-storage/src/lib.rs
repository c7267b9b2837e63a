//! Storage abstraction layer for the Mercurio MQTT broker.
//!
//! The broker core talks to persistence only through the capability
//! traits in this crate — `MessageStore`, `SessionsStore` and
//! `SubscriptionIndex` — so an in-memory backend ([`memory`]) and a
//! SQLite-backed one (`sqlite`, behind the `sqlite` feature) are drop-in
//! replacements for each other.

pub mod memory;
pub mod session;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use mercurio_core::{
    message::{Guid, StoredMessage},
    qos::QoS,
};
use thiserror::Error;

pub use session::{Session, Subscription};

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Holds the retained message bodies and, transiently, the messages
/// queued for offline delivery. Identified only by [`Guid`] once
/// stored — callers never need to know whether that guid lives in a
/// `HashMap` or a SQLite rowid.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a published message body and assigns it a fresh guid.
    /// The `guid` field of `message` is ignored; it exists only so the
    /// caller can build a `StoredMessage` without special-casing the id.
    async fn store_publish_for_future(&self, message: StoredMessage) -> Result<Guid>;

    /// Fetches a previously stored message body by guid.
    async fn get(&self, guid: Guid) -> Result<Option<StoredMessage>>;

    /// Marks `guid` as the (sole) retained message for `topic`,
    /// replacing whatever was retained there before.
    async fn store_retained(&self, topic: &str, guid: Guid) -> Result<()>;

    /// Clears the retained message for `topic`, if any.
    async fn clean_retained(&self, topic: &str) -> Result<()>;

    /// Returns every retained message whose topic matches `filter`
    /// (a subscribe-side topic filter, wildcards included).
    async fn search_matching(&self, filter: &str) -> Result<Vec<StoredMessage>>;
}

/// Looks up or creates the per-client [`Session`] that tracks
/// subscriptions, inflight packet ids and the outbound queue.
#[async_trait]
pub trait SessionsStore: Send + Sync {
    /// Returns the existing session for `client_id`, if one survived
    /// from a previous connection (i.e. it was not a clean session, or
    /// it hasn't been purged yet).
    async fn session_for_client(&self, client_id: &str) -> Result<Option<Arc<Session>>>;

    /// Creates a fresh session for `client_id`, replacing any session
    /// already on record for it.
    async fn create_new_session(&self, client_id: &str, clean_session: bool) -> Result<Arc<Session>>;

    /// Drops the session on record for `client_id` entirely.
    async fn purge_session(&self, client_id: &str) -> Result<()>;

    /// Allocates the next outbound packet id for `client_id`'s session.
    async fn next_packet_id(&self, client_id: &str) -> Result<Option<u16>>;
}

/// The routing structure that maps topic filters to subscribers.
///
/// Distinct from [`SessionsStore`]: a session owns the list of filters
/// *it* is subscribed to, while the index is the reverse map used by
/// the publish path to find every subscriber of a given topic without
/// scanning every session.
#[async_trait]
pub trait SubscriptionIndex: Send + Sync {
    /// Records that `client_id` subscribed to `topic_filter` at
    /// `requested_qos`, replacing any previous subscription to the same
    /// filter by the same client.
    async fn add(&self, subscription: Subscription) -> Result<()>;

    async fn remove_subscription(&self, topic_filter: &str, client_id: &str) -> Result<()>;

    /// Returns every subscription whose filter matches `topic`.
    async fn matches(&self, topic: &str) -> Result<Vec<Subscription>>;

    /// Drops every subscription held by `client_id`, e.g. on session purge.
    async fn remove_client(&self, client_id: &str) -> Result<()>;
}

/// Syntactic validity of a topic filter (distinct from whether it
/// currently matches anything): non-empty, `#` only as the final
/// level, `+`/`#` never glued to other characters within a level.
pub fn validate_topic_filter(filter: &str) -> bool {
    mercurio_core::topic::validate_subscribe_filter(filter).is_ok()
}

/// Whether a published `topic` matches a subscribe-side `filter`.
pub fn match_topics(topic: &str, filter: &str) -> bool {
    mercurio_core::topic::filter_matches(topic, filter)
}

/// Downgrades `publish_qos` to the minimum of the message's QoS and
/// the subscriber's requested QoS, per the MQTT fan-out rule.
pub fn effective_qos(publish_qos: QoS, requested_qos: QoS) -> QoS {
    std::cmp::min(publish_qos, requested_qos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_qos_downgrades_to_minimum() {
        assert_eq!(effective_qos(QoS::ExactlyOnce, QoS::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(effective_qos(QoS::AtMostOnce, QoS::ExactlyOnce), QoS::AtMostOnce);
        assert_eq!(effective_qos(QoS::AtLeastOnce, QoS::AtLeastOnce), QoS::AtLeastOnce);
    }
}
