//! MQTT quality of service levels.

use bytes::Buf;
use bytes::BytesMut;

use crate::codec::{Decoder, Encoder};
use crate::reason::ReasonCode;

/// MQTT quality of service level.
///
/// Variant declaration order is significant: `derive(PartialOrd, Ord)`
/// compares by discriminant, so `AtMostOnce < AtLeastOnce < ExactlyOnce`
/// exactly matches the broker's QoS ordering (used to compute the
/// effective QoS of a delivery as the minimum of publish and
/// subscription QoS).
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = ReasonCode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ReasonCode::MalformedPacket),
        }
    }
}

impl Encoder for QoS {
    fn encode(&self, buffer: &mut BytesMut) {
        self.as_u8().encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        1
    }
}

impl Decoder for QoS {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let byte = u8::decode(buffer)?;
        Ok(QoS::try_from(byte)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(QoS::AtMostOnce < QoS::AtLeastOnce);
        assert!(QoS::AtLeastOnce < QoS::ExactlyOnce);
        assert_eq!(std::cmp::min(QoS::ExactlyOnce, QoS::AtLeastOnce), QoS::AtLeastOnce);
    }

    #[test]
    fn test_try_from() {
        assert_eq!(QoS::try_from(0), Ok(QoS::AtMostOnce));
        assert_eq!(QoS::try_from(2), Ok(QoS::ExactlyOnce));
        assert!(QoS::try_from(3).is_err());
    }

    #[test]
    fn test_round_trip() {
        let mut buf = BytesMut::new();
        QoS::ExactlyOnce.encode(&mut buf);
        let mut frozen = buf.freeze();
        assert_eq!(QoS::decode(&mut frozen).unwrap(), QoS::ExactlyOnce);
    }
}
