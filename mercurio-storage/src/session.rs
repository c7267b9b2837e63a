//! Runtime session state: subscriptions, inflight tracking, and the
//! outbound queue for a single client id.
//!
//! A session outlives the connection that drives it: for a
//! non-clean-session client, `Session` survives disconnects in the
//! sessions store and is handed back out on the next CONNECT.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU16, Ordering},
        Arc, Mutex,
    },
};

use mercurio_core::{message::Guid, qos::QoS};

use crate::{MessageStore, Result};

/// A single subscription held by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub client_id: Arc<str>,
    pub topic_filter: String,
    pub requested_qos: QoS,
}

#[derive(Default)]
struct SessionInner {
    subscriptions: HashMap<String, Subscription>,
    inflight: HashMap<u16, Guid>,
    second_phase: HashSet<u16>,
    enqueued: VecDeque<Guid>,
}

/// Runtime state tracked for one client id by a `SessionsStore`.
///
/// Subscriptions and the clean-session flag are the only fields a
/// persistent backend needs to survive a restart; inflight tracking,
/// the second-phase (QoS 2) set and the enqueued-for-delivery queue
/// are rebuilt from scratch whenever a session becomes active again,
/// since they only make sense while a channel is actually driving
/// delivery.
pub struct Session {
    client_id: Arc<str>,
    clean_session: AtomicBool,
    active: AtomicBool,
    packet_id_counter: AtomicU16,
    message_store: Arc<dyn MessageStore>,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(client_id: Arc<str>, clean_session: bool, message_store: Arc<dyn MessageStore>) -> Self {
        Self {
            client_id,
            clean_session: AtomicBool::new(clean_session),
            active: AtomicBool::new(false),
            packet_id_counter: AtomicU16::new(1),
            message_store,
            inner: Mutex::new(SessionInner::default()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Marks the session inactive on connection loss or a graceful
    /// DISCONNECT. A clean session is torn down immediately, since
    /// nothing about it is meant to survive the connection; a
    /// persistent session keeps its subscriptions and queued
    /// deliveries so the next CONNECT with the same client id can pick
    /// up where it left off.
    pub fn disconnect(&self) {
        self.deactivate();
        if self.is_clean_session() {
            let mut inner = self.inner.lock().expect("session mutex poisoned");
            inner.subscriptions.clear();
            inner.inflight.clear();
            inner.second_phase.clear();
            inner.enqueued.clear();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_clean_session(&self) -> bool {
        self.clean_session.load(Ordering::SeqCst)
    }

    pub fn set_clean_session(&self, flag: bool) {
        self.clean_session.store(flag, Ordering::SeqCst);
    }

    /// Adds or replaces a subscription. Returns `true` if this filter
    /// was not already subscribed.
    pub fn subscribe(&self, filter: &str, sub: Subscription) -> bool {
        let mut inner = self.inner.lock().expect("session mutex poisoned");
        inner.subscriptions.insert(filter.to_string(), sub).is_none()
    }

    pub fn unsubscribe_from(&self, filter: &str) {
        let mut inner = self.inner.lock().expect("session mutex poisoned");
        inner.subscriptions.remove(filter);
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        let inner = self.inner.lock().expect("session mutex poisoned");
        inner.subscriptions.values().cloned().collect()
    }

    /// Resolves every guid currently enqueued for this session into
    /// its stored message body.
    pub async fn stored_messages(&self) -> Result<Vec<mercurio_core::message::StoredMessage>> {
        let guids: Vec<Guid> = {
            let inner = self.inner.lock().expect("session mutex poisoned");
            inner.enqueued.iter().copied().collect()
        };

        let mut messages = Vec::with_capacity(guids.len());
        for guid in guids {
            if let Some(msg) = self.message_store.get(guid).await? {
                messages.push(msg);
            }
        }
        Ok(messages)
    }

    /// Resolves the stored message currently inflight under `packet_id`.
    pub async fn stored_message(
        &self,
        packet_id: u16,
    ) -> Result<Option<mercurio_core::message::StoredMessage>> {
        let guid = {
            let inner = self.inner.lock().expect("session mutex poisoned");
            inner.inflight.get(&packet_id).copied()
        };

        match guid {
            Some(guid) => self.message_store.get(guid).await,
            None => Ok(None),
        }
    }

    pub fn remove_enqueued(&self, guid: Guid) {
        let mut inner = self.inner.lock().expect("session mutex poisoned");
        inner.enqueued.retain(|g| *g != guid);
    }

    pub fn enqueue_to_deliver(&self, guid: Guid) {
        let mut inner = self.inner.lock().expect("session mutex poisoned");
        inner.enqueued.push_back(guid);
    }

    pub fn dequeue_to_deliver(&self) -> Option<Guid> {
        let mut inner = self.inner.lock().expect("session mutex poisoned");
        inner.enqueued.pop_front()
    }

    /// Allocates the next outbound packet id, wrapping past 0 per
    /// MQTT-2.3.1-1 (packet identifiers are never 0).
    pub fn next_packet_id(&self) -> u16 {
        loop {
            let id = self.packet_id_counter.fetch_add(1, Ordering::SeqCst);
            if id != 0 {
                return id;
            }
        }
    }

    pub fn inflight_ack_waiting(&self, guid: Guid, packet_id: u16) {
        let mut inner = self.inner.lock().expect("session mutex poisoned");
        inner.inflight.insert(packet_id, guid);
    }

    /// Clears the inflight entry for `packet_id`, returning its guid
    /// if one was waiting (a PUBACK/PUBCOMP for an unknown packet id
    /// is simply ignored by the caller).
    pub fn inflight_acknowledged(&self, packet_id: u16) -> Option<Guid> {
        let mut inner = self.inner.lock().expect("session mutex poisoned");
        inner.inflight.remove(&packet_id)
    }

    /// Records that a QoS 2 PUBLISH with `packet_id` is awaiting its
    /// PUBREL. Returns `true` if this is the first time it was seen
    /// (the caller should route it to subscribers); a duplicate
    /// PUBLISH retransmitted before PUBREL arrives returns `false` and
    /// must only be re-acknowledged, not re-routed.
    pub fn second_phase_ack_waiting(&self, packet_id: u16) -> bool {
        let mut inner = self.inner.lock().expect("session mutex poisoned");
        inner.second_phase.insert(packet_id)
    }

    pub fn second_phase_acknowledged(&self, packet_id: u16) -> bool {
        let mut inner = self.inner.lock().expect("session mutex poisoned");
        inner.second_phase.remove(&packet_id)
    }

    pub fn inflight_packet_ids(&self) -> Vec<u16> {
        let inner = self.inner.lock().expect("session mutex poisoned");
        inner.inflight.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMessageStore;

    fn make_session(clean: bool) -> Session {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        Session::new(Arc::from("client-1"), clean, store)
    }

    #[test]
    fn test_subscribe_reports_new_vs_replace() {
        let session = make_session(false);
        let sub = Subscription {
            client_id: Arc::from("client-1"),
            topic_filter: "a/b".to_string(),
            requested_qos: QoS::AtLeastOnce,
        };

        assert!(session.subscribe("a/b", sub.clone()));
        assert!(!session.subscribe("a/b", sub));
        assert_eq!(session.subscriptions().len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let session = make_session(false);
        let sub = Subscription {
            client_id: Arc::from("client-1"),
            topic_filter: "a/b".to_string(),
            requested_qos: QoS::AtMostOnce,
        };
        session.subscribe("a/b", sub);
        session.unsubscribe_from("a/b");
        assert!(session.subscriptions().is_empty());
    }

    #[test]
    fn test_packet_id_never_zero() {
        let session = make_session(false);
        session.packet_id_counter.store(u16::MAX, Ordering::SeqCst);
        let id = session.next_packet_id();
        assert_eq!(id, u16::MAX);
        let next = session.next_packet_id();
        assert_eq!(next, 1);
    }

    #[test]
    fn test_inflight_ack_roundtrip() {
        let session = make_session(false);
        session.inflight_ack_waiting(Guid(42), 7);
        assert_eq!(session.inflight_acknowledged(7), Some(Guid(42)));
        assert_eq!(session.inflight_acknowledged(7), None);
    }

    #[test]
    fn test_disconnect_clears_clean_session_state() {
        let session = make_session(true);
        let sub = Subscription {
            client_id: Arc::from("client-1"),
            topic_filter: "a".to_string(),
            requested_qos: QoS::AtMostOnce,
        };
        session.subscribe("a", sub);
        session.enqueue_to_deliver(Guid(1));
        session.disconnect();
        assert!(session.subscriptions().is_empty());
        assert!(!session.is_active());
    }
}
