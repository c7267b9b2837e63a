//! MQTT message types for internal routing and storage.

#[cfg(not(feature = "std"))]
use alloc::sync::Arc;
#[cfg(feature = "std")]
use std::sync::Arc;

use bytes::Bytes;

use crate::qos::QoS;

/// MQTT message for internal routing.
///
/// This struct is designed to be cheap to clone:
/// - `topic` uses `Arc<str>` for O(1) reference-counted cloning
/// - `payload` uses `Bytes` which is also reference-counted
#[derive(Clone, Debug)]
pub struct Message {
    pub packet_id: Option<u16>,
    /// Topic name - uses Arc<str> for cheap cloning when broadcasting to multiple subscribers
    pub topic: Arc<str>,
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    /// Payload data - Bytes is already reference-counted for cheap cloning
    pub payload: Option<Bytes>,
}

/// Message-store-assigned identifier for a stored message body.
///
/// Assigned by whichever `MessageStore` implementation is in use
/// (a monotonic counter in-memory, an `AUTOINCREMENT` rowid in SQLite);
/// callers never construct one themselves except in tests.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Guid(pub u64);

impl core::fmt::Display for Guid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message body held by the message store, as referenced by the
/// retained map and by a session's inflight/enqueued tracking.
#[derive(Clone, Debug)]
pub struct StoredMessage {
    pub guid: Guid,
    /// Id of the client that published this message.
    pub client_id: Arc<str>,
    pub topic: Arc<str>,
    pub qos: QoS,
    pub payload: Bytes,
    pub retained: bool,
    /// Packet id the message carried when it was the inbound PUBLISH
    /// that produced this entry (QoS 2 replay keys off of it).
    pub packet_id: Option<u16>,
}

/// A will message armed for a client at CONNECT time, published by the
/// broker if that client's connection is lost without a prior graceful
/// DISCONNECT.
#[derive(Clone, Debug)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retained: bool,
    pub qos: QoS,
}

impl StoredMessage {
    /// Builds the outbound `Message` used to write this entry back out
    /// over the wire to a particular subscriber, given the packet id
    /// (if any) allocated for that delivery and the effective QoS.
    pub fn to_outbound(&self, packet_id: Option<u16>, qos: QoS, dup: bool) -> Message {
        Message {
            packet_id,
            topic: Arc::clone(&self.topic),
            dup,
            qos,
            retain: self.retained,
            payload: Some(self.payload.clone()),
        }
    }
}
