//! In-memory implementations of the storage capability traits, backed
//! by `Arc<RwLock<HashMap<..>>>` maps. This is the default backend: no
//! state survives a broker restart.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use async_trait::async_trait;
use mercurio_core::message::{Guid, StoredMessage};

use crate::{match_topics, MessageStore, Result, Session, SessionsStore, StorageError, Subscription, SubscriptionIndex};

/// In-memory [`MessageStore`]: message bodies keyed by guid, retained
/// messages keyed by topic name pointing back into the same map.
pub struct MemoryMessageStore {
    next_guid: AtomicU64,
    messages: RwLock<HashMap<Guid, StoredMessage>>,
    retained: RwLock<HashMap<String, Guid>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            next_guid: AtomicU64::new(1),
            messages: RwLock::new(HashMap::new()),
            retained: RwLock::new(HashMap::new()),
        }
    }

    fn lock_err<T>(_: std::sync::PoisonError<T>) -> StorageError {
        StorageError::OperationFailed("message store lock poisoned".to_string())
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn store_publish_for_future(&self, message: StoredMessage) -> Result<Guid> {
        let guid = Guid(self.next_guid.fetch_add(1, Ordering::SeqCst));
        let stored = StoredMessage { guid, ..message };

        let mut messages = self.messages.write().map_err(Self::lock_err)?;
        messages.insert(guid, stored);
        Ok(guid)
    }

    async fn get(&self, guid: Guid) -> Result<Option<StoredMessage>> {
        let messages = self.messages.read().map_err(Self::lock_err)?;
        Ok(messages.get(&guid).cloned())
    }

    async fn store_retained(&self, topic: &str, guid: Guid) -> Result<()> {
        let mut retained = self.retained.write().map_err(Self::lock_err)?;
        retained.insert(topic.to_string(), guid);
        Ok(())
    }

    async fn clean_retained(&self, topic: &str) -> Result<()> {
        let mut retained = self.retained.write().map_err(Self::lock_err)?;
        retained.remove(topic);
        Ok(())
    }

    async fn search_matching(&self, filter: &str) -> Result<Vec<StoredMessage>> {
        let retained = self.retained.read().map_err(Self::lock_err)?;
        let messages = self.messages.read().map_err(Self::lock_err)?;

        Ok(retained
            .iter()
            .filter(|(topic, _)| match_topics(topic, filter))
            .filter_map(|(_, guid)| messages.get(guid).cloned())
            .collect())
    }
}

/// In-memory [`SessionsStore`]: sessions keyed by client id, each
/// wrapped in an `Arc` so a session survives the lookup that handed it
/// out.
pub struct MemorySessionsStore {
    message_store: Arc<dyn MessageStore>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl MemorySessionsStore {
    pub fn new(message_store: Arc<dyn MessageStore>) -> Self {
        Self {
            message_store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn lock_err<T>(_: std::sync::PoisonError<T>) -> StorageError {
        StorageError::OperationFailed("sessions store lock poisoned".to_string())
    }
}

#[async_trait]
impl SessionsStore for MemorySessionsStore {
    async fn session_for_client(&self, client_id: &str) -> Result<Option<Arc<Session>>> {
        let sessions = self.sessions.read().map_err(Self::lock_err)?;
        Ok(sessions.get(client_id).cloned())
    }

    async fn create_new_session(&self, client_id: &str, clean_session: bool) -> Result<Arc<Session>> {
        let session = Arc::new(Session::new(
            Arc::from(client_id),
            clean_session,
            Arc::clone(&self.message_store),
        ));

        let mut sessions = self.sessions.write().map_err(Self::lock_err)?;
        sessions.insert(client_id.to_string(), Arc::clone(&session));
        Ok(session)
    }

    async fn purge_session(&self, client_id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(Self::lock_err)?;
        sessions.remove(client_id);
        Ok(())
    }

    async fn next_packet_id(&self, client_id: &str) -> Result<Option<u16>> {
        let sessions = self.sessions.read().map_err(Self::lock_err)?;
        Ok(sessions.get(client_id).map(|s| s.next_packet_id()))
    }
}

/// In-memory [`SubscriptionIndex`]: a flat map of
/// `(topic_filter, client_id) -> Subscription`. Matching is a linear
/// scan over filters, which is adequate for the broker sizes this
/// crate targets; a trie-based index would be a drop-in replacement
/// behind the same trait.
pub struct MemorySubscriptionIndex {
    subscriptions: RwLock<HashMap<(String, String), Subscription>>,
}

impl MemorySubscriptionIndex {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    fn lock_err<T>(_: std::sync::PoisonError<T>) -> StorageError {
        StorageError::OperationFailed("subscription index lock poisoned".to_string())
    }
}

impl Default for MemorySubscriptionIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubscriptionIndex for MemorySubscriptionIndex {
    async fn add(&self, subscription: Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().map_err(Self::lock_err)?;
        subscriptions.insert(
            (subscription.topic_filter.clone(), subscription.client_id.to_string()),
            subscription,
        );
        Ok(())
    }

    async fn remove_subscription(&self, topic_filter: &str, client_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().map_err(Self::lock_err)?;
        subscriptions.remove(&(topic_filter.to_string(), client_id.to_string()));
        Ok(())
    }

    async fn matches(&self, topic: &str) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().map_err(Self::lock_err)?;
        Ok(subscriptions
            .values()
            .filter(|sub| match_topics(topic, &sub.topic_filter))
            .cloned()
            .collect())
    }

    async fn remove_client(&self, client_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().map_err(Self::lock_err)?;
        subscriptions.retain(|(_, cid), _| cid != client_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mercurio_core::qos::QoS;

    fn sample_message(topic: &str) -> StoredMessage {
        StoredMessage {
            guid: Guid(0),
            client_id: Arc::from("publisher"),
            topic: Arc::from(topic),
            qos: QoS::AtLeastOnce,
            payload: bytes::Bytes::from_static(b"hello"),
            retained: true,
            packet_id: None,
        }
    }

    #[tokio::test]
    async fn test_store_and_get_roundtrip() {
        let store = MemoryMessageStore::new();
        let guid = store
            .store_publish_for_future(sample_message("a/b"))
            .await
            .unwrap();

        let fetched = store.get(guid).await.unwrap().unwrap();
        assert_eq!(fetched.topic.as_ref(), "a/b");
        assert_eq!(fetched.guid, guid);
    }

    #[tokio::test]
    async fn test_retained_replaces_previous() {
        let store = MemoryMessageStore::new();
        let first = store.store_publish_for_future(sample_message("a")).await.unwrap();
        let second = store.store_publish_for_future(sample_message("a")).await.unwrap();

        store.store_retained("a", first).await.unwrap();
        store.store_retained("a", second).await.unwrap();

        let matched = store.search_matching("a").await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].guid, second);
    }

    #[tokio::test]
    async fn test_clean_retained() {
        let store = MemoryMessageStore::new();
        let guid = store.store_publish_for_future(sample_message("a")).await.unwrap();
        store.store_retained("a", guid).await.unwrap();
        store.clean_retained("a").await.unwrap();

        assert!(store.search_matching("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_matching_wildcard() {
        let store = MemoryMessageStore::new();
        let guid = store
            .store_publish_for_future(sample_message("sensors/temp"))
            .await
            .unwrap();
        store.store_retained("sensors/temp", guid).await.unwrap();

        let matched = store.search_matching("sensors/#").await.unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_store_create_and_lookup() {
        let message_store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let sessions = MemorySessionsStore::new(message_store);

        assert!(sessions.session_for_client("c1").await.unwrap().is_none());

        let session = sessions.create_new_session("c1", false).await.unwrap();
        session.activate();

        let looked_up = sessions.session_for_client("c1").await.unwrap().unwrap();
        assert!(looked_up.is_active());
    }

    #[tokio::test]
    async fn test_sessions_store_purge() {
        let message_store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let sessions = MemorySessionsStore::new(message_store);
        sessions.create_new_session("c1", true).await.unwrap();
        sessions.purge_session("c1").await.unwrap();
        assert!(sessions.session_for_client("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_subscription_index_matches_wildcards() {
        let index = MemorySubscriptionIndex::new();
        index
            .add(Subscription {
                client_id: Arc::from("c1"),
                topic_filter: "sensors/+".to_string(),
                requested_qos: QoS::AtLeastOnce,
            })
            .await
            .unwrap();

        let matched = index.matches("sensors/temp").await.unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].client_id.as_ref(), "c1");

        index.remove_subscription("sensors/+", "c1").await.unwrap();
        assert!(index.matches("sensors/temp").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscription_index_remove_client() {
        let index = MemorySubscriptionIndex::new();
        index
            .add(Subscription {
                client_id: Arc::from("c1"),
                topic_filter: "a".to_string(),
                requested_qos: QoS::AtMostOnce,
            })
            .await
            .unwrap();
        index
            .add(Subscription {
                client_id: Arc::from("c1"),
                topic_filter: "b".to_string(),
                requested_qos: QoS::AtMostOnce,
            })
            .await
            .unwrap();

        index.remove_client("c1").await.unwrap();
        assert!(index.matches("a").await.unwrap().is_empty());
        assert!(index.matches("b").await.unwrap().is_empty());
    }
}
