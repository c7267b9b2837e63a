//! SQLite storage backend.
//!
//! Message bodies, retained-topic pointers, session metadata and
//! subscriptions survive a restart; the runtime bookkeeping a
//! [`Session`] carries (inflight map, second-phase set, enqueued
//! queue) does not; a recovered session starts those empty, same as a
//! client that reconnects with a fresh channel.

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex, RwLock},
};

use async_trait::async_trait;
use bytes::Bytes;
use mercurio_core::{
    message::{Guid, StoredMessage},
    qos::QoS,
};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{match_topics, MessageStore, Result, Session, SessionsStore, StorageError, Subscription, SubscriptionIndex};

fn qos_to_int(qos: QoS) -> i64 {
    qos as i64
}

fn int_to_qos(val: i64) -> Result<QoS> {
    QoS::try_from(val as u8).map_err(|_| StorageError::OperationFailed(format!("invalid stored qos: {val}")))
}

/// Shared connection handle; every store in this module wraps the same
/// underlying `Arc<Mutex<Connection>>` so they can be built once and
/// passed to the broker as independent trait objects.
#[derive(Clone)]
pub struct SqliteHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHandle {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let handle = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        handle.init_schema()?;
        Ok(handle)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let handle = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        handle.init_schema()?;
        Ok(handle)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::OperationFailed(e.to_string()))?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                guid INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                qos INTEGER NOT NULL,
                payload BLOB NOT NULL,
                retained INTEGER NOT NULL,
                packet_id INTEGER
            );

            CREATE TABLE IF NOT EXISTS retained_topics (
                topic TEXT PRIMARY KEY,
                guid INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                client_id TEXT PRIMARY KEY,
                clean_session INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS subscriptions (
                client_id TEXT NOT NULL,
                topic_filter TEXT NOT NULL,
                requested_qos INTEGER NOT NULL,
                PRIMARY KEY (client_id, topic_filter)
            );

            CREATE INDEX IF NOT EXISTS idx_subscriptions_filter
                ON subscriptions(topic_filter);
            ",
        )?;

        Ok(())
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StorageError::OperationFailed(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::OperationFailed(e.to_string()))?
    }
}

/// SQLite-backed [`MessageStore`]: message bodies and retained-topic
/// pointers in two tables sharing one connection.
#[derive(Clone)]
pub struct SqliteMessageStore {
    handle: SqliteHandle,
}

impl SqliteMessageStore {
    pub fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn store_publish_for_future(&self, message: StoredMessage) -> Result<Guid> {
        let client_id = message.client_id.to_string();
        let topic = message.topic.to_string();
        let qos = qos_to_int(message.qos);
        let payload = message.payload.to_vec();
        let retained = message.retained;
        let packet_id = message.packet_id.map(|id| id as i64);

        self.handle
            .blocking(move |conn| {
                conn.execute(
                    "INSERT INTO messages (client_id, topic, qos, payload, retained, packet_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![client_id, topic, qos, payload, retained, packet_id],
                )?;
                Ok(Guid(conn.last_insert_rowid() as u64))
            })
            .await
    }

    async fn get(&self, guid: Guid) -> Result<Option<StoredMessage>> {
        let raw = guid.0 as i64;
        self.handle
            .blocking(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT client_id, topic, qos, payload, retained, packet_id
                     FROM messages WHERE guid = ?1",
                )?;

                let row = stmt
                    .query_row(params![raw], |row| {
                        let client_id: String = row.get(0)?;
                        let topic: String = row.get(1)?;
                        let qos: i64 = row.get(2)?;
                        let payload: Vec<u8> = row.get(3)?;
                        let retained: bool = row.get(4)?;
                        let packet_id: Option<i64> = row.get(5)?;
                        Ok((client_id, topic, qos, payload, retained, packet_id))
                    })
                    .optional()?;

                row.map(|(client_id, topic, qos, payload, retained, packet_id)| {
                    Ok(StoredMessage {
                        guid: Guid(raw as u64),
                        client_id: Arc::from(client_id.as_str()),
                        topic: Arc::from(topic.as_str()),
                        qos: int_to_qos(qos)?,
                        payload: Bytes::from(payload),
                        retained,
                        packet_id: packet_id.map(|id| id as u16),
                    })
                })
                .transpose()
            })
            .await
    }

    async fn store_retained(&self, topic: &str, guid: Guid) -> Result<()> {
        let topic = topic.to_string();
        let raw = guid.0 as i64;
        self.handle
            .blocking(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO retained_topics (topic, guid) VALUES (?1, ?2)",
                    params![topic, raw],
                )?;
                Ok(())
            })
            .await
    }

    async fn clean_retained(&self, topic: &str) -> Result<()> {
        let topic = topic.to_string();
        self.handle
            .blocking(move |conn| {
                conn.execute("DELETE FROM retained_topics WHERE topic = ?1", params![topic])?;
                Ok(())
            })
            .await
    }

    async fn search_matching(&self, filter: &str) -> Result<Vec<StoredMessage>> {
        let filter = filter.to_string();
        let topics: Vec<(String, i64)> = self
            .handle
            .blocking(move |conn| {
                let mut stmt = conn.prepare("SELECT topic, guid FROM retained_topics")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;

        let mut messages = Vec::new();
        for (topic, guid) in topics {
            if match_topics(&topic, &filter) {
                if let Some(msg) = self.get(Guid(guid as u64)).await? {
                    messages.push(msg);
                }
            }
        }
        Ok(messages)
    }
}

/// SQLite-backed [`SessionsStore`]: clean-session flag and
/// subscriptions persist; an `Arc<Session>` cache holds the live
/// objects the broker is actively driving.
pub struct SqliteSessionsStore {
    handle: SqliteHandle,
    message_store: Arc<dyn MessageStore>,
    cache: RwLock<HashMap<String, Arc<Session>>>,
}

impl SqliteSessionsStore {
    pub fn new(handle: SqliteHandle, message_store: Arc<dyn MessageStore>) -> Self {
        Self {
            handle,
            message_store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn lock_err<T>(_: std::sync::PoisonError<T>) -> StorageError {
        StorageError::OperationFailed("sqlite sessions cache lock poisoned".to_string())
    }

    /// Persists a subscription alongside the session's own bookkeeping.
    /// Called by the broker right after a successful
    /// [`Session::subscribe`], so a restart can rebuild the session's
    /// filter set even though `Session` itself never touches the
    /// database.
    pub async fn persist_subscription(&self, client_id: &str, filter: &str, qos: QoS) -> Result<()> {
        let client_id = client_id.to_string();
        let filter = filter.to_string();
        let qos = qos_to_int(qos);
        self.handle
            .blocking(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO subscriptions (client_id, topic_filter, requested_qos)
                     VALUES (?1, ?2, ?3)",
                    params![client_id, filter, qos],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn remove_persisted_subscription(&self, client_id: &str, filter: &str) -> Result<()> {
        let client_id = client_id.to_string();
        let filter = filter.to_string();
        self.handle
            .blocking(move |conn| {
                conn.execute(
                    "DELETE FROM subscriptions WHERE client_id = ?1 AND topic_filter = ?2",
                    params![client_id, filter],
                )?;
                Ok(())
            })
            .await
    }

    async fn load_from_db(&self, client_id: &str) -> Result<Option<Arc<Session>>> {
        let cid = client_id.to_string();
        let row: Option<bool> = self
            .handle
            .blocking({
                let cid = cid.clone();
                move |conn| {
                    conn.query_row(
                        "SELECT clean_session FROM sessions WHERE client_id = ?1",
                        params![cid],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(StorageError::from)
                }
            })
            .await?;

        let Some(clean_session) = row else {
            return Ok(None);
        };

        let subs: Vec<(String, i64)> = self
            .handle
            .blocking({
                let cid = cid.clone();
                move |conn| {
                    let mut stmt = conn.prepare(
                        "SELECT topic_filter, requested_qos FROM subscriptions WHERE client_id = ?1",
                    )?;
                    let rows = stmt.query_map(params![cid], |row| Ok((row.get(0)?, row.get(1)?)))?;
                    let mut out = Vec::new();
                    for row in rows {
                        out.push(row?);
                    }
                    Ok(out)
                }
            })
            .await?;

        let session = Arc::new(Session::new(
            Arc::from(cid.as_str()),
            clean_session,
            Arc::clone(&self.message_store),
        ));

        for (filter, qos) in subs {
            let requested_qos = int_to_qos(qos)?;
            session.subscribe(
                &filter,
                Subscription {
                    client_id: Arc::from(cid.as_str()),
                    topic_filter: filter.clone(),
                    requested_qos,
                },
            );
        }

        let mut cache = self.cache.write().map_err(Self::lock_err)?;
        cache.insert(cid, Arc::clone(&session));
        Ok(Some(session))
    }
}

#[async_trait]
impl SessionsStore for SqliteSessionsStore {
    async fn session_for_client(&self, client_id: &str) -> Result<Option<Arc<Session>>> {
        {
            let cache = self.cache.read().map_err(Self::lock_err)?;
            if let Some(session) = cache.get(client_id) {
                return Ok(Some(Arc::clone(session)));
            }
        }
        self.load_from_db(client_id).await
    }

    async fn create_new_session(&self, client_id: &str, clean_session: bool) -> Result<Arc<Session>> {
        let cid = client_id.to_string();
        self.handle
            .blocking({
                let cid = cid.clone();
                move |conn| {
                    conn.execute(
                        "INSERT OR REPLACE INTO sessions (client_id, clean_session) VALUES (?1, ?2)",
                        params![cid, clean_session],
                    )?;
                    conn.execute("DELETE FROM subscriptions WHERE client_id = ?1", params![cid])?;
                    Ok(())
                }
            })
            .await?;

        let session = Arc::new(Session::new(
            Arc::from(client_id),
            clean_session,
            Arc::clone(&self.message_store),
        ));

        let mut cache = self.cache.write().map_err(Self::lock_err)?;
        cache.insert(cid, Arc::clone(&session));
        Ok(session)
    }

    async fn purge_session(&self, client_id: &str) -> Result<()> {
        let cid = client_id.to_string();
        self.handle
            .blocking({
                let cid = cid.clone();
                move |conn| {
                    conn.execute("DELETE FROM sessions WHERE client_id = ?1", params![cid])?;
                    conn.execute("DELETE FROM subscriptions WHERE client_id = ?1", params![cid])?;
                    Ok(())
                }
            })
            .await?;

        let mut cache = self.cache.write().map_err(Self::lock_err)?;
        cache.remove(client_id);
        Ok(())
    }

    async fn next_packet_id(&self, client_id: &str) -> Result<Option<u16>> {
        let session = self.session_for_client(client_id).await?;
        Ok(session.map(|s| s.next_packet_id()))
    }
}

/// SQLite-backed [`SubscriptionIndex`]: same `subscriptions` table the
/// sessions store persists to, queried directly for fan-out.
pub struct SqliteSubscriptionIndex {
    handle: SqliteHandle,
}

impl SqliteSubscriptionIndex {
    pub fn new(handle: SqliteHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl SubscriptionIndex for SqliteSubscriptionIndex {
    async fn add(&self, subscription: Subscription) -> Result<()> {
        let client_id = subscription.client_id.to_string();
        let filter = subscription.topic_filter.clone();
        let qos = qos_to_int(subscription.requested_qos);
        self.handle
            .blocking(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO subscriptions (client_id, topic_filter, requested_qos)
                     VALUES (?1, ?2, ?3)",
                    params![client_id, filter, qos],
                )?;
                Ok(())
            })
            .await
    }

    async fn remove_subscription(&self, topic_filter: &str, client_id: &str) -> Result<()> {
        let client_id = client_id.to_string();
        let filter = topic_filter.to_string();
        self.handle
            .blocking(move |conn| {
                conn.execute(
                    "DELETE FROM subscriptions WHERE client_id = ?1 AND topic_filter = ?2",
                    params![client_id, filter],
                )?;
                Ok(())
            })
            .await
    }

    async fn matches(&self, topic: &str) -> Result<Vec<Subscription>> {
        let topic = topic.to_string();
        let rows: Vec<(String, String, i64)> = self
            .handle
            .blocking(move |conn| {
                let mut stmt = conn.prepare("SELECT client_id, topic_filter, requested_qos FROM subscriptions")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
                let mut out = Vec::new();
                for row in rows {
                    out.push(row?);
                }
                Ok(out)
            })
            .await?;

        let mut matched = Vec::new();
        for (client_id, filter, qos) in rows {
            if match_topics(&topic, &filter) {
                matched.push(Subscription {
                    client_id: Arc::from(client_id.as_str()),
                    topic_filter: filter,
                    requested_qos: int_to_qos(qos)?,
                });
            }
        }
        Ok(matched)
    }

    async fn remove_client(&self, client_id: &str) -> Result<()> {
        let client_id = client_id.to_string();
        self.handle
            .blocking(move |conn| {
                conn.execute("DELETE FROM subscriptions WHERE client_id = ?1", params![client_id])?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message(topic: &str) -> StoredMessage {
        StoredMessage {
            guid: Guid(0),
            client_id: Arc::from("publisher"),
            topic: Arc::from(topic),
            qos: QoS::AtLeastOnce,
            payload: Bytes::from_static(b"hello"),
            retained: true,
            packet_id: None,
        }
    }

    #[tokio::test]
    async fn test_message_store_roundtrip() {
        let handle = SqliteHandle::in_memory().unwrap();
        let store = SqliteMessageStore::new(handle);

        let guid = store.store_publish_for_future(sample_message("a/b")).await.unwrap();
        let fetched = store.get(guid).await.unwrap().unwrap();
        assert_eq!(fetched.topic.as_ref(), "a/b");
    }

    #[tokio::test]
    async fn test_retained_wildcard_search() {
        let handle = SqliteHandle::in_memory().unwrap();
        let store = SqliteMessageStore::new(handle);

        let guid = store
            .store_publish_for_future(sample_message("sensors/temp"))
            .await
            .unwrap();
        store.store_retained("sensors/temp", guid).await.unwrap();

        let matched = store.search_matching("sensors/#").await.unwrap();
        assert_eq!(matched.len(), 1);

        store.clean_retained("sensors/temp").await.unwrap();
        assert!(store.search_matching("sensors/#").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sessions_store_persists_subscriptions() {
        let handle = SqliteHandle::in_memory().unwrap();
        let message_store: Arc<dyn MessageStore> = Arc::new(SqliteMessageStore::new(handle.clone()));
        let sessions = SqliteSessionsStore::new(handle, message_store);

        let session = sessions.create_new_session("c1", false).await.unwrap();
        session.subscribe(
            "a/b",
            Subscription {
                client_id: Arc::from("c1"),
                topic_filter: "a/b".to_string(),
                requested_qos: QoS::AtLeastOnce,
            },
        );
        sessions.persist_subscription("c1", "a/b", QoS::AtLeastOnce).await.unwrap();

        // Simulate a cold lookup by dropping the live cache entry and
        // reloading straight from the database.
        {
            let mut cache = sessions.cache.write().unwrap();
            cache.remove("c1");
        }

        let reloaded = sessions.session_for_client("c1").await.unwrap().unwrap();
        assert_eq!(reloaded.subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_index_matches() {
        let handle = SqliteHandle::in_memory().unwrap();
        let index = SqliteSubscriptionIndex::new(handle);

        index
            .add(Subscription {
                client_id: Arc::from("c1"),
                topic_filter: "sensors/+".to_string(),
                requested_qos: QoS::AtMostOnce,
            })
            .await
            .unwrap();

        let matched = index.matches("sensors/temp").await.unwrap();
        assert_eq!(matched.len(), 1);

        index.remove_client("c1").await.unwrap();
        assert!(index.matches("sensors/temp").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_across_handles() {
        let temp_dir = std::env::temp_dir();
        let db_path = temp_dir.join("mercurio_storage_test.db");
        let _ = std::fs::remove_file(&db_path);

        {
            let handle = SqliteHandle::open(&db_path).unwrap();
            let message_store: Arc<dyn MessageStore> = Arc::new(SqliteMessageStore::new(handle.clone()));
            let sessions = SqliteSessionsStore::new(handle, message_store);
            sessions.create_new_session("persistent", false).await.unwrap();
        }

        {
            let handle = SqliteHandle::open(&db_path).unwrap();
            let message_store: Arc<dyn MessageStore> = Arc::new(SqliteMessageStore::new(handle.clone()));
            let sessions = SqliteSessionsStore::new(handle, message_store);
            let session = sessions.session_for_client("persistent").await.unwrap();
            assert!(session.is_some());
        }

        let _ = std::fs::remove_file(&db_path);
    }
}
