//! MQTT protocol version handling.

use core::fmt;

/// MQTT protocol version.
///
/// Only the two wire-compatible versions this broker accepts on CONNECT
/// (spec.md §4.1 step 1, §6.3) are represented.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub enum ProtocolVersion {
    /// MQTT 3.1 - Protocol name "MQIsdp", level 3
    V3_1 = 3,
    /// MQTT 3.1.1 - Protocol name "MQTT", level 4
    #[default]
    V3_1_1 = 4,
}

impl ProtocolVersion {
    /// Returns the protocol name string for this version.
    pub fn protocol_name(&self) -> &'static str {
        match self {
            ProtocolVersion::V3_1 => "MQIsdp",
            ProtocolVersion::V3_1_1 => "MQTT",
        }
    }

    /// Returns the protocol level byte for this version.
    pub fn protocol_level(&self) -> u8 {
        *self as u8
    }

    /// Attempts to determine the protocol version from protocol name and level.
    ///
    /// Returns `None` if the combination is invalid or unsupported.
    pub fn from_name_and_level(name: &str, level: u8) -> Option<ProtocolVersion> {
        match (name, level) {
            ("MQIsdp", 3) => Some(ProtocolVersion::V3_1),
            ("MQTT", 4) => Some(ProtocolVersion::V3_1_1),
            _ => None,
        }
    }

    /// Attempts to determine the protocol version from the wire level
    /// byte alone. Returns `None` for any level this broker does not
    /// accept (spec.md §4.1 step 1: reply `UnacceptableProtocolVersion`).
    pub fn from_level(level: u8) -> Option<ProtocolVersion> {
        match level {
            3 => Some(ProtocolVersion::V3_1),
            4 => Some(ProtocolVersion::V3_1_1),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V3_1 => write!(f, "MQTT 3.1"),
            ProtocolVersion::V3_1_1 => write!(f, "MQTT 3.1.1"),
        }
    }
}
