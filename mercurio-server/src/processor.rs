//! The protocol core: every packet handler the connection loop calls
//! into, independent of transport (plain TCP or TLS) and of which
//! storage backend is behind the capability traits.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use mercurio_core::{
    message::{Guid, StoredMessage, WillMessage},
    qos::QoS,
    reason::ReasonCode,
};
use mercurio_packets::{
    connack::{ConnAckFlags, ConnAckPacket},
    connect::ConnectPacket,
    pubcomp::PubCompPacket,
    puback::PubAckPacket,
    publish::PublishPacket,
    pubrec::PubRecPacket,
    pubrel::PubRelPacket,
    suback::SubAckPacket,
    subscribe::SubscribePacket,
    unsuback::UnsubAckPacket,
    unsubscribe::UnsubscribePacket,
    ControlPacket,
};
use mercurio_storage::{effective_qos, validate_topic_filter, MessageStore, Session, SessionsStore, Subscription, SubscriptionIndex};

use crate::{
    auth::{AuthError, AuthService},
    interceptor::Interceptor,
    registry::{ClientHandle, ConnectedClients, WillRegistry},
};

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("storage error: {0}")]
    Storage(#[from] mercurio_storage::StorageError),
}

pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Client id attributed to a message the broker publishes on its own
/// behalf rather than forwarding on a connected client's stream.
const BROKER_SELF_CLIENT_ID: &str = "BROKER_SELF";

/// Fixed packet id recorded on an embedded publish's stored message;
/// there is no inbound PUBLISH to carry one.
const EMBEDDED_PUBLISH_PACKET_ID: u16 = 1;

/// Outcome of a CONNECT attempt: either it was accepted and the caller
/// now owns a live session and registry handle, or it was rejected and
/// the connection must be closed after the CONNACK is written.
pub enum ConnectOutcome {
    Accepted {
        ack: ControlPacket,
        client_id: Arc<str>,
        session: Arc<Session>,
        handle: ClientHandle,
    },
    Rejected {
        ack: ControlPacket,
    },
}

fn connack(reason_code: ReasonCode, session_present: bool) -> ControlPacket {
    ControlPacket::ConnAck(ConnAckPacket {
        flags: ConnAckFlags { session_present },
        reason_code,
    })
}

/// Central broker state: every capability the handlers below need,
/// held behind `Arc`/trait objects so the concrete storage backend and
/// auth source are chosen once at construction.
pub struct Processor {
    message_store: Arc<dyn MessageStore>,
    sessions: Arc<dyn SessionsStore>,
    subscription_index: Arc<dyn SubscriptionIndex>,
    connected: ConnectedClients,
    wills: WillRegistry,
    interceptor: Arc<dyn Interceptor>,
    auth: Arc<AuthService>,
    allow_anonymous: bool,
}

impl Processor {
    pub fn new(
        message_store: Arc<dyn MessageStore>,
        sessions: Arc<dyn SessionsStore>,
        subscription_index: Arc<dyn SubscriptionIndex>,
        interceptor: Arc<dyn Interceptor>,
        auth: Arc<AuthService>,
        allow_anonymous: bool,
    ) -> Self {
        Self {
            message_store,
            sessions,
            subscription_index,
            connected: ConnectedClients::new(),
            wills: WillRegistry::new(),
            interceptor,
            auth,
            allow_anonymous,
        }
    }

    pub fn connected_clients(&self) -> &ConnectedClients {
        &self.connected
    }

    pub async fn handle_connect(
        &self,
        connect: ConnectPacket,
        outbox: mpsc::UnboundedSender<ControlPacket>,
    ) -> Result<ConnectOutcome> {
        if connect.flags.user_name {
            let user = connect.payload.user_name.as_deref();
            let password = connect.payload.password.as_deref();
            if let Err(err) = self.auth.login(user, password).await {
                let reason = match err {
                    AuthError::MissingCredentials | AuthError::Rejected => ReasonCode::BadUserNameOrPassword,
                };
                return Ok(ConnectOutcome::Rejected { ack: connack(reason, false) });
            }
        } else if !self.allow_anonymous {
            return Ok(ConnectOutcome::Rejected {
                ack: connack(ReasonCode::BadUserNameOrPassword, false),
            });
        }

        if connect.payload.client_id.is_empty() {
            return Ok(ConnectOutcome::Rejected {
                ack: connack(ReasonCode::IdentifierRejected, false),
            });
        }
        let client_id: Arc<str> = Arc::from(connect.payload.client_id.as_str());

        let existing = self.sessions.session_for_client(&client_id).await?;
        let (session, session_present) = match existing {
            Some(_previous_session) if connect.flags.clean_start => {
                self.sessions.purge_session(&client_id).await?;
                self.subscription_index.remove_client(&client_id).await?;
                (self.sessions.create_new_session(&client_id, true).await?, false)
            }
            Some(session) => {
                session.set_clean_session(false);
                (session, true)
            }
            None => (
                self.sessions
                    .create_new_session(&client_id, connect.flags.clean_start)
                    .await?,
                false,
            ),
        };

        let handle = self.connected.register(&client_id, outbox.clone());
        session.activate();

        self.wills.disarm(&client_id);
        if connect.flags.will_flag {
            if let (Some(topic), Some(payload)) = (&connect.payload.will_topic, &connect.payload.will_payload) {
                self.wills.arm(
                    &client_id,
                    WillMessage {
                        topic: topic.clone(),
                        payload: payload.clone(),
                        retained: connect.flags.will_retain,
                        qos: connect.flags.will_qos,
                    },
                );
            }
        }

        if session_present {
            self.deliver_queued(&session, &outbox).await?;
        }

        self.interceptor.notify_client_connected(&client_id);

        Ok(ConnectOutcome::Accepted {
            ack: connack(ReasonCode::Success, session_present),
            client_id,
            session,
            handle,
        })
    }

    /// Sends every message a persistent session accumulated while its
    /// owner was offline, over the connection that just resumed it.
    async fn deliver_queued(&self, session: &Session, outbox: &mpsc::UnboundedSender<ControlPacket>) -> Result<()> {
        while let Some(guid) = session.dequeue_to_deliver() {
            let Some(stored) = self.message_store.get(guid).await? else {
                continue;
            };

            let packet_id = match stored.qos {
                QoS::AtMostOnce => None,
                _ => {
                    let pid = session.next_packet_id();
                    session.inflight_ack_waiting(guid, pid);
                    Some(pid)
                }
            };

            let message = stored.to_outbound(packet_id, stored.qos, false);
            let _ = outbox.send(ControlPacket::Publish(PublishPacket {
                dup: message.dup,
                qos_level: message.qos,
                retain: message.retain,
                topic_name: message.topic.to_string(),
                packet_id: message.packet_id,
                payload: message.payload,
            }));
        }
        Ok(())
    }

    pub async fn handle_publish(&self, client_id: &str, session: &Session, publish: PublishPacket) -> Result<Option<ControlPacket>> {
        let topic = publish.topic_name.as_str();
        let payload = publish.payload.unwrap_or_default();

        match publish.qos_level {
            QoS::AtMostOnce => {
                self.publish_internal(client_id, topic, QoS::AtMostOnce, publish.retain, payload).await?;
                Ok(None)
            }
            QoS::AtLeastOnce => {
                let packet_id = publish.packet_id.unwrap_or(0);
                self.publish_internal(client_id, topic, QoS::AtLeastOnce, publish.retain, payload).await?;
                Ok(Some(ControlPacket::PubAck(PubAckPacket { packet_id })))
            }
            QoS::ExactlyOnce => {
                let packet_id = publish.packet_id.unwrap_or(0);
                if !session.second_phase_ack_waiting(packet_id) {
                    // Retransmitted PUBLISH for a packet id already stored
                    // and awaiting PUBREL: re-acknowledge without storing
                    // or fanning it out again.
                    return Ok(Some(ControlPacket::PubRec(PubRecPacket { packet_id })));
                }

                let guid = self
                    .message_store
                    .store_publish_for_future(StoredMessage {
                        guid: Guid(0),
                        client_id: Arc::from(client_id),
                        topic: Arc::from(topic),
                        qos: QoS::ExactlyOnce,
                        payload,
                        retained: publish.retain,
                        packet_id: Some(packet_id),
                    })
                    .await?;
                // Reuses the session's inflight map, otherwise unused on
                // the publisher's own side, to hold the packet id -> guid
                // link until the matching PUBREL arrives.
                session.inflight_ack_waiting(guid, packet_id);

                Ok(Some(ControlPacket::PubRec(PubRecPacket { packet_id })))
            }
        }
    }

    pub fn handle_pub_ack(&self, session: &Session, packet_id: u16) {
        if let Some(guid) = session.inflight_acknowledged(packet_id) {
            session.remove_enqueued(guid);
        }
    }

    pub fn handle_pub_rec(&self, _session: &Session, packet_id: u16) -> ControlPacket {
        ControlPacket::PubRel(PubRelPacket { packet_id })
    }

    /// The PUBREL half of the QoS 2 handshake: this is where the
    /// message stored on PUBLISH is actually fanned out, since the
    /// protocol only guarantees exactly-once delivery once the
    /// publisher has confirmed it saw the PUBREC.
    pub async fn handle_pub_rel(&self, client_id: &str, session: &Session, packet_id: u16) -> Result<ControlPacket> {
        session.second_phase_acknowledged(packet_id);

        if let Some(guid) = session.inflight_acknowledged(packet_id) {
            if let Some(stored) = self.message_store.get(guid).await? {
                self.apply_retained(&stored.topic, stored.qos, stored.retained, stored.payload.is_empty(), guid)
                    .await?;
                self.interceptor.notify_topic_published(client_id, &stored.topic, stored.qos);
                let subscribers = self.subscription_index.matches(&stored.topic).await?;
                self.route_to_subscribers(subscribers, guid, stored.qos).await?;
            }
        }

        Ok(ControlPacket::PubComp(PubCompPacket { packet_id }))
    }

    pub fn handle_pub_comp(&self, session: &Session, packet_id: u16) {
        if let Some(guid) = session.inflight_acknowledged(packet_id) {
            session.remove_enqueued(guid);
        }
    }

    pub async fn handle_subscribe(
        &self,
        client_id: &str,
        session: &Session,
        subscribe: SubscribePacket,
        outbox: &mpsc::UnboundedSender<ControlPacket>,
    ) -> Result<ControlPacket> {
        let mut reason_codes = Vec::with_capacity(subscribe.filters.len());

        for filter in subscribe.filters {
            if !validate_topic_filter(&filter.topic_filter) {
                reason_codes.push(ReasonCode::Failure);
                continue;
            }

            session.subscribe(
                &filter.topic_filter,
                Subscription {
                    client_id: Arc::from(client_id),
                    topic_filter: filter.topic_filter.clone(),
                    requested_qos: filter.requested_qos,
                },
            );
            self.subscription_index
                .add(Subscription {
                    client_id: Arc::from(client_id),
                    topic_filter: filter.topic_filter.clone(),
                    requested_qos: filter.requested_qos,
                })
                .await?;

            self.interceptor
                .notify_topic_subscribed(client_id, &filter.topic_filter, filter.requested_qos);

            reason_codes.push(match filter.requested_qos {
                QoS::AtMostOnce => ReasonCode::GrantedQoS0,
                QoS::AtLeastOnce => ReasonCode::GrantedQoS1,
                QoS::ExactlyOnce => ReasonCode::GrantedQoS2,
            });

            self.replay_retained(&filter.topic_filter, filter.requested_qos, session, outbox)
                .await?;
        }

        Ok(ControlPacket::SubAck(SubAckPacket {
            packet_id: subscribe.packet_id,
            reason_codes,
        }))
    }

    async fn replay_retained(
        &self,
        filter: &str,
        requested_qos: QoS,
        session: &Session,
        outbox: &mpsc::UnboundedSender<ControlPacket>,
    ) -> Result<()> {
        for stored in self.message_store.search_matching(filter).await? {
            let qos = effective_qos(stored.qos, requested_qos);
            let packet_id = match qos {
                QoS::AtMostOnce => None,
                _ => Some(session.next_packet_id()),
            };
            let message = stored.to_outbound(packet_id, qos, false);
            let _ = outbox.send(ControlPacket::Publish(PublishPacket {
                dup: message.dup,
                qos_level: message.qos,
                retain: message.retain,
                topic_name: message.topic.to_string(),
                packet_id: message.packet_id,
                payload: message.payload,
            }));
        }
        Ok(())
    }

    pub async fn handle_unsubscribe(&self, client_id: &str, session: &Session, unsubscribe: UnsubscribePacket) -> Result<ControlPacket> {
        for filter in &unsubscribe.filters {
            session.unsubscribe_from(filter);
            self.subscription_index.remove_subscription(filter, client_id).await?;
            self.interceptor.notify_topic_unsubscribed(client_id, filter);
        }

        Ok(ControlPacket::UnsubAck(UnsubAckPacket {
            packet_id: unsubscribe.packet_id,
        }))
    }

    /// Graceful DISCONNECT: the will is disarmed and the session is
    /// torn down only if it is a clean session.
    pub async fn handle_disconnect(&self, client_id: &str, session: &Session, handle: &ClientHandle) -> Result<()> {
        self.wills.disarm(client_id);
        self.finish_going_offline(client_id, session, handle, "client disconnected").await
    }

    /// Connection dropped without a DISCONNECT: the armed will (if
    /// any) is published before the session is evaluated for teardown.
    pub async fn handle_connection_lost(&self, client_id: &str, session: &Session, handle: &ClientHandle) -> Result<()> {
        if let Some(will) = self.wills.take(client_id) {
            self.publish_embedded(&will.topic, will.qos, will.retained, will.payload).await?;
        }
        self.finish_going_offline(client_id, session, handle, "connection lost").await
    }

    async fn finish_going_offline(&self, client_id: &str, session: &Session, handle: &ClientHandle, reason: &str) -> Result<()> {
        let still_current = self.connected.remove_if_generation_matches(client_id, handle.generation);
        if !still_current {
            // A newer connection already replaced this one; it owns
            // the session's fate now, so this handler does nothing more.
            return Ok(());
        }

        session.disconnect();
        if session.is_clean_session() {
            self.sessions.purge_session(client_id).await?;
            self.subscription_index.remove_client(client_id).await?;
        }

        self.interceptor.notify_client_disconnected(client_id, reason);
        Ok(())
    }

    /// Clears or sets the retained message for `topic` per the
    /// publish's QoS and payload, given the guid a non-QoS-0 publish
    /// was already stored under (QoS 0 never needs one: it always
    /// clears, never retains a body).
    async fn apply_retained(&self, topic: &str, qos: QoS, retain: bool, payload_is_empty: bool, guid: Guid) -> Result<()> {
        if !retain {
            return Ok(());
        }

        match qos {
            QoS::AtMostOnce => self.message_store.clean_retained(topic).await,
            _ if payload_is_empty => self.message_store.clean_retained(topic).await,
            _ => self.message_store.store_retained(topic, guid).await,
        }
    }

    /// Persists a published message (retained bookkeeping included,
    /// storage skipped for QoS 0 since it's never queued or retained)
    /// and fans it out to every matching subscriber, notifying the
    /// interceptor with the real publishing client id.
    pub async fn publish_internal(&self, origin_client_id: &str, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()> {
        self.deliver(origin_client_id, topic, qos, retain, payload, None, true).await
    }

    /// Publishes a message the broker originates on its own behalf
    /// (currently: forwarding an armed will after a connection is
    /// lost) rather than relaying one a connected client sent. Per the
    /// embedded-publish contract: attributed to a synthetic client id,
    /// carries a fixed packet id, and never reaches the interceptor.
    async fn publish_embedded(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()> {
        let packet_id = (qos != QoS::AtMostOnce).then_some(EMBEDDED_PUBLISH_PACKET_ID);
        self.deliver(BROKER_SELF_CLIENT_ID, topic, qos, retain, payload, packet_id, false).await
    }

    async fn deliver(
        &self,
        origin_client_id: &str,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
        packet_id: Option<u16>,
        notify_interceptor: bool,
    ) -> Result<()> {
        let payload_is_empty = payload.is_empty();

        let guid = if qos == QoS::AtMostOnce {
            None
        } else {
            Some(
                self.message_store
                    .store_publish_for_future(StoredMessage {
                        guid: Guid(0),
                        client_id: Arc::from(origin_client_id),
                        topic: Arc::from(topic),
                        qos,
                        payload: payload.clone(),
                        retained: retain,
                        packet_id,
                    })
                    .await?,
            )
        };

        if let Some(guid) = guid {
            self.apply_retained(topic, qos, retain, payload_is_empty, guid).await?;
        } else if retain {
            // QoS 0 never retains a body, regardless of payload.
            self.message_store.clean_retained(topic).await?;
        }

        if notify_interceptor {
            self.interceptor.notify_topic_published(origin_client_id, topic, qos);
        }

        let subscribers = self.subscription_index.matches(topic).await?;

        match guid {
            Some(guid) => self.route_to_subscribers(subscribers, guid, qos).await,
            None => self.route_qos0_to_subscribers(subscribers, topic, retain, &payload).await,
        }
    }

    /// Fans a QoS 0 publish out to every currently-active subscriber
    /// directly from the in-memory payload; nothing is persisted, and
    /// an inactive subscriber simply misses it.
    async fn route_qos0_to_subscribers(&self, subscribers: Vec<Subscription>, topic: &str, retain: bool, payload: &Bytes) -> Result<()> {
        for subscription in subscribers {
            let Some(session) = self.sessions.session_for_client(&subscription.client_id).await? else {
                continue;
            };
            if !session.is_active() {
                continue;
            }

            self.connected.send_to(
                &subscription.client_id,
                ControlPacket::Publish(PublishPacket {
                    dup: false,
                    qos_level: QoS::AtMostOnce,
                    retain,
                    topic_name: topic.to_string(),
                    packet_id: None,
                    payload: Some(payload.clone()),
                }),
            );
        }
        Ok(())
    }

    /// Fans a stored message out to every subscription, downgrading
    /// QoS per subscriber. A subscriber that is both inactive and
    /// holds a clean session gets nothing queued: a clean session has
    /// nothing for it to resume into, so a QoS>=1 message it missed
    /// while offline is dropped rather than held forever. Anyone else
    /// gets it queued in their session, and a currently-connected
    /// subscriber also gets it pushed live.
    async fn route_to_subscribers(&self, subscribers: Vec<Subscription>, guid: Guid, publish_qos: QoS) -> Result<()> {
        for subscription in subscribers {
            let Some(session) = self.sessions.session_for_client(&subscription.client_id).await? else {
                continue;
            };

            let qos = effective_qos(publish_qos, subscription.requested_qos);

            if qos == QoS::AtMostOnce {
                if session.is_active() {
                    if let Some(stored) = self.message_store.get(guid).await? {
                        let message = stored.to_outbound(None, qos, false);
                        self.connected.send_to(
                            &subscription.client_id,
                            ControlPacket::Publish(PublishPacket {
                                dup: message.dup,
                                qos_level: message.qos,
                                retain: message.retain,
                                topic_name: message.topic.to_string(),
                                packet_id: message.packet_id,
                                payload: message.payload,
                            }),
                        );
                    }
                }
                continue;
            }

            if !session.is_active() && session.is_clean_session() {
                continue;
            }

            session.enqueue_to_deliver(guid);

            if session.is_active() {
                if let Some(stored) = self.message_store.get(guid).await? {
                    let packet_id = session.next_packet_id();
                    session.inflight_ack_waiting(guid, packet_id);
                    let message = stored.to_outbound(Some(packet_id), qos, false);
                    self.connected.send_to(
                        &subscription.client_id,
                        ControlPacket::Publish(PublishPacket {
                            dup: message.dup,
                            qos_level: message.qos,
                            retain: message.retain,
                            topic_name: message.topic.to_string(),
                            packet_id: message.packet_id,
                            payload: message.payload,
                        }),
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAllValidator;
    use crate::interceptor::TracingInterceptor;
    use mercurio_core::protocol::ProtocolVersion;
    use mercurio_packets::connect::{ConnectFlags, ConnectPayload};
    use mercurio_storage::memory::{MemoryMessageStore, MemorySessionsStore, MemorySubscriptionIndex};

    fn make_processor() -> Processor {
        let message_store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let sessions: Arc<dyn SessionsStore> = Arc::new(MemorySessionsStore::new(message_store.clone()));
        let subscription_index: Arc<dyn SubscriptionIndex> = Arc::new(MemorySubscriptionIndex::new());
        Processor::new(
            message_store,
            sessions,
            subscription_index,
            Arc::new(TracingInterceptor),
            Arc::new(AuthService::new(Arc::new(AllowAllValidator))),
            true,
        )
    }

    fn connect_packet(client_id: &str, clean_start: bool) -> ConnectPacket {
        ConnectPacket {
            protocol_version: ProtocolVersion::V3_1_1,
            flags: ConnectFlags {
                clean_start,
                ..Default::default()
            },
            keepalive: 30,
            payload: ConnectPayload {
                client_id: client_id.to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_connect_accepts_new_client_without_session_present() {
        let processor = make_processor();
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = processor.handle_connect(connect_packet("c1", true), tx).await.unwrap();

        match outcome {
            ConnectOutcome::Accepted { ack, .. } => {
                if let ControlPacket::ConnAck(p) = ack {
                    assert_eq!(p.reason_code, ReasonCode::Success);
                    assert!(!p.flags.session_present);
                } else {
                    panic!("expected ConnAck");
                }
            }
            ConnectOutcome::Rejected { .. } => panic!("expected acceptance"),
        }
    }

    #[tokio::test]
    async fn test_empty_client_id_is_always_rejected() {
        let processor = make_processor();

        for clean_start in [false, true] {
            let (tx, _rx) = mpsc::unbounded_channel();
            let outcome = processor.handle_connect(connect_packet("", clean_start), tx).await.unwrap();

            match outcome {
                ConnectOutcome::Rejected { ack } => {
                    if let ControlPacket::ConnAck(p) = ack {
                        assert_eq!(p.reason_code, ReasonCode::IdentifierRejected);
                    } else {
                        panic!("expected ConnAck");
                    }
                }
                ConnectOutcome::Accepted { .. } => panic!("expected rejection, clean_start={clean_start}"),
            }
        }
    }

    #[tokio::test]
    async fn test_anonymous_connect_rejected_when_disallowed() {
        let message_store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
        let sessions: Arc<dyn SessionsStore> = Arc::new(MemorySessionsStore::new(message_store.clone()));
        let subscription_index: Arc<dyn SubscriptionIndex> = Arc::new(MemorySubscriptionIndex::new());
        let processor = Processor::new(
            message_store,
            sessions,
            subscription_index,
            Arc::new(TracingInterceptor),
            Arc::new(AuthService::new(Arc::new(AllowAllValidator))),
            false,
        );

        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = processor.handle_connect(connect_packet("c1", true), tx).await.unwrap();

        match outcome {
            ConnectOutcome::Rejected { ack } => {
                if let ControlPacket::ConnAck(p) = ack {
                    assert_eq!(p.reason_code, ReasonCode::BadUserNameOrPassword);
                } else {
                    panic!("expected ConnAck");
                }
            }
            ConnectOutcome::Accepted { .. } => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn test_persistent_session_resumes_with_session_present() {
        let processor = make_processor();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let outcome = processor.handle_connect(connect_packet("c1", false), tx1).await.unwrap();
        let ConnectOutcome::Accepted { handle, session, .. } = outcome else {
            panic!("expected acceptance");
        };
        processor.handle_disconnect("c1", &session, &handle).await.unwrap();

        let (tx2, _rx2) = mpsc::unbounded_channel();
        let outcome2 = processor.handle_connect(connect_packet("c1", false), tx2).await.unwrap();
        match outcome2 {
            ConnectOutcome::Accepted { ack, .. } => {
                if let ControlPacket::ConnAck(p) = ack {
                    assert!(p.flags.session_present);
                } else {
                    panic!("expected ConnAck");
                }
            }
            ConnectOutcome::Rejected { .. } => panic!("expected acceptance"),
        }
    }

    #[tokio::test]
    async fn test_qos0_publish_to_offline_subscriber_is_dropped_not_queued() {
        let processor = make_processor();
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = processor.handle_connect(connect_packet("sub", false), tx).await.unwrap();
        let ConnectOutcome::Accepted { session, handle, .. } = outcome else {
            panic!("expected acceptance");
        };

        let (_tx2, mut rx2) = mpsc::unbounded_channel();
        processor
            .handle_subscribe(
                "sub",
                &session,
                SubscribePacket {
                    packet_id: 1,
                    filters: vec![mercurio_packets::subscribe::SubscribeFilter {
                        topic_filter: "a/b".to_string(),
                        requested_qos: QoS::AtMostOnce,
                    }],
                },
                &_tx2,
            )
            .await
            .unwrap();

        processor.handle_disconnect("sub", &session, &handle).await.unwrap();

        processor
            .publish_internal("pub", "a/b", QoS::AtMostOnce, false, Bytes::from_static(b"hi"))
            .await
            .unwrap();

        assert!(rx2.try_recv().is_err());
        assert!(session.dequeue_to_deliver().is_none());
    }

    #[tokio::test]
    async fn test_qos1_publish_is_queued_for_offline_subscriber() {
        let processor = make_processor();
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = processor.handle_connect(connect_packet("sub", false), tx).await.unwrap();
        let ConnectOutcome::Accepted { session, handle, .. } = outcome else {
            panic!("expected acceptance");
        };

        let (sub_tx, _sub_rx) = mpsc::unbounded_channel();
        processor
            .handle_subscribe(
                "sub",
                &session,
                SubscribePacket {
                    packet_id: 1,
                    filters: vec![mercurio_packets::subscribe::SubscribeFilter {
                        topic_filter: "a/b".to_string(),
                        requested_qos: QoS::AtLeastOnce,
                    }],
                },
                &sub_tx,
            )
            .await
            .unwrap();

        processor.handle_disconnect("sub", &session, &handle).await.unwrap();

        processor
            .publish_internal("pub", "a/b", QoS::AtLeastOnce, false, Bytes::from_static(b"hi"))
            .await
            .unwrap();

        assert!(session.dequeue_to_deliver().is_some());
    }

    #[tokio::test]
    async fn test_qos1_publish_to_inactive_clean_session_subscriber_is_dropped() {
        let processor = make_processor();
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = processor.handle_connect(connect_packet("sub", true), tx).await.unwrap();
        let ConnectOutcome::Accepted { session, handle, .. } = outcome else {
            panic!("expected acceptance");
        };

        let (sub_tx, _sub_rx) = mpsc::unbounded_channel();
        processor
            .handle_subscribe(
                "sub",
                &session,
                SubscribePacket {
                    packet_id: 1,
                    filters: vec![mercurio_packets::subscribe::SubscribeFilter {
                        topic_filter: "a/b".to_string(),
                        requested_qos: QoS::AtLeastOnce,
                    }],
                },
                &sub_tx,
            )
            .await
            .unwrap();

        processor.handle_disconnect("sub", &session, &handle).await.unwrap();

        processor
            .publish_internal("pub", "a/b", QoS::AtLeastOnce, false, Bytes::from_static(b"hi"))
            .await
            .unwrap();

        assert!(session.dequeue_to_deliver().is_none());
    }

    #[tokio::test]
    async fn test_qos2_publish_defers_fan_out_until_pub_rel() {
        let processor = make_processor();

        let (pub_tx, _pub_rx) = mpsc::unbounded_channel();
        let pub_outcome = processor.handle_connect(connect_packet("pub", true), pub_tx).await.unwrap();
        let ConnectOutcome::Accepted { session: pub_session, .. } = pub_outcome else {
            panic!("expected acceptance");
        };

        let (sub_tx, mut sub_rx) = mpsc::unbounded_channel();
        let sub_outcome = processor.handle_connect(connect_packet("sub", true), sub_tx.clone()).await.unwrap();
        let ConnectOutcome::Accepted { session: sub_session, .. } = sub_outcome else {
            panic!("expected acceptance");
        };
        processor
            .handle_subscribe(
                "sub",
                &sub_session,
                SubscribePacket {
                    packet_id: 1,
                    filters: vec![mercurio_packets::subscribe::SubscribeFilter {
                        topic_filter: "a/b".to_string(),
                        requested_qos: QoS::ExactlyOnce,
                    }],
                },
                &sub_tx,
            )
            .await
            .unwrap();

        let ack = processor
            .handle_publish(
                "pub",
                &pub_session,
                PublishPacket {
                    dup: false,
                    qos_level: QoS::ExactlyOnce,
                    retain: false,
                    topic_name: "a/b".to_string(),
                    packet_id: Some(7),
                    payload: Some(Bytes::from_static(b"hi")),
                },
            )
            .await
            .unwrap();
        assert!(matches!(ack, Some(ControlPacket::PubRec(p)) if p.packet_id == 7));

        // Not fanned out yet: PUBLISH only stores the message.
        assert!(sub_rx.try_recv().is_err());

        let comp = processor.handle_pub_rel("pub", &pub_session, 7).await.unwrap();
        assert!(matches!(comp, ControlPacket::PubComp(p) if p.packet_id == 7));

        // PUBREL is what actually fans the message out.
        assert!(matches!(sub_rx.try_recv(), Ok(ControlPacket::Publish(p)) if p.topic_name == "a/b"));
    }
}
