//! PUBCOMP - final acknowledgement of the QoS 2 handshake.

use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::codec::{Decoder, Encoder, VariableByteInteger};

#[derive(Default, Debug, PartialEq, Eq)]
pub struct PubCompPacket {
    pub packet_id: u16,
}

const PACKET_TYPE: u8 = 0x07;

impl Encoder for PubCompPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        VariableByteInteger(self.packet_id.encoded_size() as u32).encode(buffer);
        self.packet_id.encode(buffer);
    }
}

impl Decoder for PubCompPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _remaining_len = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;

        Ok(PubCompPacket { packet_id })
    }
}
