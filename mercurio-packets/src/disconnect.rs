//! DISCONNECT - graceful connection termination.
//!
//! MQTT 3.1.1 DISCONNECT carries no variable header or payload: the
//! fixed header alone (type byte + a zero remaining length) is the
//! whole packet.

use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::codec::{Decoder, Encoder, VariableByteInteger};

#[derive(PartialEq, Eq, Debug, Default)]
pub struct DisconnectPacket {}

const PACKET_TYPE: u8 = 0x0e;

impl Encoder for DisconnectPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        VariableByteInteger(0).encode(buffer);
    }
}

impl Decoder for DisconnectPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining_len = VariableByteInteger::decode(buffer)?;
        Ok(Self {})
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use crate::disconnect::*;

    #[test]
    fn test_disconnect_packet_encode_decode() {
        let expected = vec![0xe0, 0x00];

        let packet = DisconnectPacket {};

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);
        let new_packet = DisconnectPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }
}
