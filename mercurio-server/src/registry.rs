//! Process-wide atomic maps the connection handler consults outside of
//! any single session: which client id is currently occupying a live
//! channel, and what will message (if any) is armed for it.
//!
//! Both maps support a `remove_if_generation_matches` / `take_if_*`
//! style removal so a connection that is racing against its own
//! takeover never clobbers the connection that replaced it: every
//! registration is tagged with a generation counter, and a stale
//! handler can only remove the entry it itself installed.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use tokio::sync::{mpsc, oneshot};

use mercurio_core::message::WillMessage;
use mercurio_packets::ControlPacket;

/// A handle the registry hands back to a freshly-registered connection:
/// its generation number and the receiving end of the takeover signal.
pub struct ClientHandle {
    pub generation: u64,
    pub takeover: oneshot::Receiver<()>,
}

struct ClientEntry {
    generation: u64,
    takeover_tx: Option<oneshot::Sender<()>>,
    outbox: mpsc::UnboundedSender<ControlPacket>,
}

/// Tracks which generation of connection currently owns each client id.
#[derive(Clone, Default)]
pub struct ConnectedClients {
    next_generation: Arc<AtomicU64>,
    clients: Arc<RwLock<HashMap<String, ClientEntry>>>,
}

impl ConnectedClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `client_id` as newly connected, signalling (and
    /// replacing) whatever connection held it before. Returns the
    /// handle the new connection should hold onto for the duration of
    /// the session. `outbox` is the sending half of the channel the
    /// connection reads from to learn what to write back to its
    /// socket; it is how other sessions' publishes reach this client
    /// while it is online.
    pub fn register(&self, client_id: &str, outbox: mpsc::UnboundedSender<ControlPacket>) -> ClientHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        let mut clients = self.clients.write().expect("registry lock poisoned");
        if let Some(previous) = clients.insert(
            client_id.to_string(),
            ClientEntry {
                generation,
                takeover_tx: Some(tx),
                outbox,
            },
        ) {
            if let Some(previous_tx) = previous.takeover_tx {
                let _ = previous_tx.send(());
            }
        }

        ClientHandle {
            generation,
            takeover: rx,
        }
    }

    /// Removes `client_id`'s registration, but only if it is still the
    /// entry installed by `generation` — i.e. nobody has taken over in
    /// the meantime. Called when a connection loses its channel.
    /// Returns whether the removal actually happened: `false` means a
    /// newer connection has already replaced this one, and the caller
    /// must not run any further "this client just went offline" cleanup.
    pub fn remove_if_generation_matches(&self, client_id: &str, generation: u64) -> bool {
        let mut clients = self.clients.write().expect("registry lock poisoned");
        if clients.get(client_id).map(|e| e.generation) == Some(generation) {
            clients.remove(client_id);
            true
        } else {
            false
        }
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        let clients = self.clients.read().expect("registry lock poisoned");
        clients.contains_key(client_id)
    }

    /// Hands `packet` to `client_id`'s connection if it is currently
    /// online. Returns `false` (and drops the packet) if it is not —
    /// callers are expected to have already enqueued persistent
    /// delivery in the session before routing live.
    pub fn send_to(&self, client_id: &str, packet: ControlPacket) -> bool {
        let clients = self.clients.read().expect("registry lock poisoned");
        match clients.get(client_id) {
            Some(entry) => entry.outbox.send(packet).is_ok(),
            None => false,
        }
    }
}

/// Tracks the will message armed for each currently-connected client id.
#[derive(Clone, Default)]
pub struct WillRegistry {
    wills: Arc<RwLock<HashMap<String, WillMessage>>>,
}

impl WillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, client_id: &str, will: WillMessage) {
        let mut wills = self.wills.write().expect("will registry lock poisoned");
        wills.insert(client_id.to_string(), will);
    }

    /// Clears the will for `client_id` without returning it. Called on
    /// a graceful DISCONNECT, per [MQTT-3.1.2-10].
    pub fn disarm(&self, client_id: &str) {
        let mut wills = self.wills.write().expect("will registry lock poisoned");
        wills.remove(client_id);
    }

    /// Removes and returns the will for `client_id`, if any. Called
    /// once on connection loss, so a message is never published twice.
    pub fn take(&self, client_id: &str) -> Option<WillMessage> {
        let mut wills = self.wills.write().expect("will registry lock poisoned");
        wills.remove(client_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mercurio_core::qos::QoS;

    fn noop_outbox() -> mpsc::UnboundedSender<ControlPacket> {
        mpsc::unbounded_channel().0
    }

    #[test]
    fn test_register_signals_previous_generation() {
        let registry = ConnectedClients::new();
        let first = registry.register("c1", noop_outbox());
        let mut second = registry.register("c1", noop_outbox());

        assert!(first.takeover.try_recv().is_ok());
        assert!(second.takeover.try_recv().is_err());
    }

    #[test]
    fn test_remove_if_generation_matches_ignores_stale_generation() {
        let registry = ConnectedClients::new();
        let first = registry.register("c1", noop_outbox());
        let _second = registry.register("c1", noop_outbox());

        registry.remove_if_generation_matches("c1", first.generation);
        assert!(registry.is_connected("c1"));
    }

    #[test]
    fn test_remove_if_generation_matches_current_generation() {
        let registry = ConnectedClients::new();
        let handle = registry.register("c1", noop_outbox());
        registry.remove_if_generation_matches("c1", handle.generation);
        assert!(!registry.is_connected("c1"));
    }

    #[test]
    fn test_send_to_delivers_only_while_connected() {
        let registry = ConnectedClients::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("c1", tx);

        assert!(registry.send_to(
            "c1",
            ControlPacket::PingResp(mercurio_packets::pingresp::PingRespPacket {})
        ));
        assert!(rx.try_recv().is_ok());
        assert!(!registry.send_to(
            "c2",
            ControlPacket::PingResp(mercurio_packets::pingresp::PingRespPacket {})
        ));
    }

    #[test]
    fn test_will_registry_arm_take() {
        let registry = WillRegistry::new();
        registry.arm(
            "c1",
            WillMessage {
                topic: "status".to_string(),
                payload: Bytes::from_static(b"offline"),
                retained: false,
                qos: QoS::AtLeastOnce,
            },
        );

        assert!(registry.take("c1").is_some());
        assert!(registry.take("c1").is_none());
    }

    #[test]
    fn test_will_registry_disarm() {
        let registry = WillRegistry::new();
        registry.arm(
            "c1",
            WillMessage {
                topic: "status".to_string(),
                payload: Bytes::from_static(b"offline"),
                retained: false,
                qos: QoS::AtMostOnce,
            },
        );
        registry.disarm("c1");
        assert!(registry.take("c1").is_none());
    }
}
