//! CONNACK - server acknowledgement of a CONNECT attempt.

use std::mem;

use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    reason::ReasonCode,
};

#[derive(Default, Debug, PartialEq, Eq)]
pub struct ConnAckFlags {
    pub session_present: bool,
}

impl Encoder for ConnAckFlags {
    fn encode(&self, buffer: &mut BytesMut) {
        let flags = 0b0000_0001 & (self.session_present as u8);
        buffer.put_u8(flags);
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u8>()
    }
}

impl Decoder for ConnAckFlags {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let encoded = buffer.get_u8();

        if (0b1111_1110 & encoded) != 0 {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(ConnAckFlags {
            session_present: (0b0000_0001 & encoded) != 0,
        })
    }
}

#[derive(Default, Debug, Eq, PartialEq)]
pub struct ConnAckPacket {
    pub flags: ConnAckFlags,
    pub reason_code: ReasonCode,
}

const PACKET_TYPE: u8 = 0x02;

impl Encoder for ConnAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);

        let remaining_len = self.flags.encoded_size() + 1;
        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.flags.encode(buffer);
        buffer.put_u8(self.reason_code.connack_code());
    }
}

impl Decoder for ConnAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining_len = VariableByteInteger::decode(buffer)?;

        let flags = ConnAckFlags::decode(buffer)?;
        let reason_code = ReasonCode::connack_from_code(buffer.get_u8());

        Ok(ConnAckPacket { flags, reason_code })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use crate::connack::*;

    #[test]
    fn test_connack_packet_accepted() {
        let expected = vec![0x20, 0x02, 0x00, 0x00];

        let packet = ConnAckPacket {
            flags: ConnAckFlags {
                session_present: false,
            },
            reason_code: ReasonCode::Success,
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);
        let new_packet = ConnAckPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }

    #[test]
    fn test_connack_packet_session_present() {
        let expected = vec![0x20, 0x02, 0x01, 0x00];

        let packet = ConnAckPacket {
            flags: ConnAckFlags {
                session_present: true,
            },
            reason_code: ReasonCode::Success,
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), expected);
    }

    #[test]
    fn test_connack_packet_not_authorized() {
        let expected = vec![0x20, 0x02, 0x00, 0x05];

        let packet = ConnAckPacket {
            flags: ConnAckFlags {
                session_present: false,
            },
            reason_code: ReasonCode::NotAuthorized,
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);
        let new_packet = ConnAckPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }
}
