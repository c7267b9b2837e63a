//! SUBACK - per-filter grant/failure reply to SUBSCRIBE.

use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    reason::ReasonCode,
};

#[derive(Debug, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub reason_codes: Vec<ReasonCode>,
}

const PACKET_TYPE: u8 = 0x09;

impl Encoder for SubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut remaining_len = 0;

        buffer.put_u8(PACKET_TYPE << 4);

        remaining_len += self.packet_id.encoded_size();
        remaining_len += self.reason_codes.len();

        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.packet_id.encode(buffer);
        for code in &self.reason_codes {
            buffer.put_u8(code.suback_code());
        }
    }
}

impl Decoder for SubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1); // Packet type
        let remaining_len = VariableByteInteger::decode(buffer)?.0 as usize;
        let buffer_len = buffer.remaining();

        let packet_id = u16::decode(buffer)?;

        let next_packet = buffer_len - remaining_len;
        let mut reason_codes = Vec::new();

        while buffer.remaining() > next_packet {
            reason_codes.push(ReasonCode::suback_from_code(buffer.get_u8()));
        }

        Ok(SubAckPacket {
            packet_id,
            reason_codes,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use crate::suback::*;

    #[test]
    fn test_suback_packet_encode_decode() {
        let expected = vec![0x90, 0x03, 0x00, 0x01, 0x01];

        let packet = SubAckPacket {
            packet_id: 1,
            reason_codes: vec![ReasonCode::GrantedQoS1],
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);

        let new_packet = SubAckPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }

    #[test]
    fn test_suback_packet_mixed_grants_and_failure() {
        let packet = SubAckPacket {
            packet_id: 7,
            reason_codes: vec![
                ReasonCode::GrantedQoS0,
                ReasonCode::GrantedQoS2,
                ReasonCode::Failure,
            ],
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        let mut bytes = Bytes::from(encoded.to_vec());
        let new_packet = SubAckPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }
}
