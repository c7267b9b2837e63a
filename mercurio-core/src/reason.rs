//! Reason/return codes used in MQTT 3.1/3.1.1 CONNACK and SUBACK packets.

use bytes::Buf;
use core::fmt;

use crate::codec::{Decoder, Encoder};

/// Reason/return code carried by CONNACK and SUBACK.
///
/// MQTT 3.1.1 does not have a unified reason-code catalog the way MQTT 5
/// does; this enum holds the two small code spaces this broker needs
/// (CONNACK return codes and SUBACK granted-QoS/failure codes) in one
/// type, the way the rest of the packet layer expects a single
/// `Encoder`/`Decoder`-able reason type per packet field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReasonCode {
    // CONNACK return codes (spec.md §6.3).
    #[default]
    Success,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,

    // SUBACK granted-QoS / failure codes (spec.md §6.3, §4.4).
    GrantedQoS0,
    GrantedQoS1,
    GrantedQoS2,
    Failure,

    // Internal/codec-level rejection, never sent on its own packet field
    // but used by the codec to signal malformed input (spec.md §7).
    MalformedPacket,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ReasonCode::*;
        let msg = match self {
            Success => "Connection accepted",
            UnacceptableProtocolVersion => "Unacceptable protocol version",
            IdentifierRejected => "Identifier rejected",
            ServerUnavailable => "Server unavailable",
            BadUserNameOrPassword => "Bad user name or password",
            NotAuthorized => "Not authorized",
            GrantedQoS0 => "Granted QoS 0",
            GrantedQoS1 => "Granted QoS 1",
            GrantedQoS2 => "Granted QoS 2",
            Failure => "Failure",
            MalformedPacket => "Malformed packet",
        };
        write!(f, "{}", msg)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ReasonCode {}

impl ReasonCode {
    /// Encodes this value as a CONNACK return code byte.
    ///
    /// Only meaningful for the CONNACK-flavored variants; callers must
    /// not mix CONNACK and SUBACK variants within the same packet field.
    pub fn connack_code(&self) -> u8 {
        use ReasonCode::*;
        match *self {
            Success => 0x00,
            UnacceptableProtocolVersion => 0x01,
            IdentifierRejected => 0x02,
            ServerUnavailable => 0x03,
            BadUserNameOrPassword => 0x04,
            NotAuthorized => 0x05,
            _ => 0x80,
        }
    }

    /// Encodes this value as a SUBACK reason byte.
    pub fn suback_code(&self) -> u8 {
        use ReasonCode::*;
        match *self {
            GrantedQoS0 => 0x00,
            GrantedQoS1 => 0x01,
            GrantedQoS2 => 0x02,
            _ => 0x80,
        }
    }

    pub fn connack_from_code(code: u8) -> Self {
        use ReasonCode::*;
        match code {
            0x00 => Success,
            0x01 => UnacceptableProtocolVersion,
            0x02 => IdentifierRejected,
            0x03 => ServerUnavailable,
            0x04 => BadUserNameOrPassword,
            0x05 => NotAuthorized,
            _ => MalformedPacket,
        }
    }

    pub fn suback_from_code(code: u8) -> Self {
        use ReasonCode::*;
        match code {
            0x00 => GrantedQoS0,
            0x01 => GrantedQoS1,
            0x02 => GrantedQoS2,
            _ => Failure,
        }
    }

    /// Byte used by the codec when the context (CONNACK vs SUBACK) is
    /// not distinguishable from the type alone, e.g. the generic
    /// `Encoder`/`Decoder` impl below. Prefer `connack_code`/`suback_code`
    /// directly when the packet kind is known.
    pub fn get_code(&self) -> u8 {
        self.connack_code()
    }
}

impl Encoder for ReasonCode {
    fn encode(&self, buffer: &mut bytes::BytesMut) {
        self.get_code().encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.get_code().encoded_size()
    }
}

impl Decoder for ReasonCode {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let code = buffer.get_u8();
        Ok(ReasonCode::connack_from_code(code))
    }
}
