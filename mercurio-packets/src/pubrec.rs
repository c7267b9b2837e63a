//! PUBREC - first acknowledgement of a QoS 2 PUBLISH.

use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::codec::{Decoder, Encoder, VariableByteInteger};

#[derive(Default, Debug, PartialEq, Eq)]
pub struct PubRecPacket {
    pub packet_id: u16,
}

const PACKET_TYPE: u8 = 0x05;

impl Encoder for PubRecPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        VariableByteInteger(self.packet_id.encoded_size() as u32).encode(buffer);
        self.packet_id.encode(buffer);
    }
}

impl Decoder for PubRecPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining_len = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;

        Ok(PubRecPacket { packet_id })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use mercurio_core::codec::{Decoder, Encoder};

    use crate::pubrec::PubRecPacket;

    #[test]
    fn test_pubrec_packet_encode_decode() {
        let expected = vec![0x50, 0x02, 0x00, 0x2a];

        let packet = PubRecPacket { packet_id: 42 };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);

        let new_packet = PubRecPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }
}
