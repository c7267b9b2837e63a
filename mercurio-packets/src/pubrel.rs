//! PUBREL - second step of the QoS 2 handshake, sent in reply to PUBREC.

use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::codec::{Decoder, Encoder, VariableByteInteger};

#[derive(Default, Debug, PartialEq, Eq)]
pub struct PubRelPacket {
    pub packet_id: u16,
}

const PACKET_TYPE: u8 = 0x06;
// PUBREL fixed header reserved bits must be 0b0010.
const FIXED_HEADER_FLAGS: u8 = 0b0010;

impl Encoder for PubRelPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8((PACKET_TYPE << 4) | FIXED_HEADER_FLAGS);
        VariableByteInteger(self.packet_id.encoded_size() as u32).encode(buffer);
        self.packet_id.encode(buffer);
    }
}

impl Decoder for PubRelPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining_len = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;

        Ok(PubRelPacket { packet_id })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use mercurio_core::codec::{Decoder, Encoder};

    use crate::pubrel::PubRelPacket;

    #[test]
    fn test_pubrel_packet_encode_decode() {
        let expected = vec![0x62, 0x02, 0x00, 0x2a];

        let packet = PubRelPacket { packet_id: 42 };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);

        let new_packet = PubRelPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }
}
