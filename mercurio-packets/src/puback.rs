//! PUBACK - acknowledgement of a QoS 1 PUBLISH.

use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::codec::{Decoder, Encoder, VariableByteInteger};

#[derive(Default, Debug, PartialEq, Eq)]
pub struct PubAckPacket {
    pub packet_id: u16,
}

const PACKET_TYPE: u8 = 0x04;

impl Encoder for PubAckPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        VariableByteInteger(self.packet_id.encoded_size() as u32).encode(buffer);
        self.packet_id.encode(buffer);
    }
}

impl Decoder for PubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining_len = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;

        Ok(PubAckPacket { packet_id })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use mercurio_core::codec::{Decoder, Encoder};

    use crate::puback::PubAckPacket;

    #[test]
    fn test_puback_packet_encode_decode() {
        let expected = vec![0x40, 0x02, 0x00, 0x01];

        let packet = PubAckPacket { packet_id: 1 };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);

        let new_packet = PubAckPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }
}
