//! UNSUBSCRIBE - requests removal of one or more topic filters.

use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    reason::ReasonCode,
};

#[derive(Debug, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

const PACKET_TYPE: u8 = 0x0a;

impl Encoder for UnsubscribePacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut remaining_len = 0;

        let mut fixed_header: u8 = PACKET_TYPE << 4;
        fixed_header |= 0b0000_0010;
        fixed_header.encode(buffer);

        remaining_len += self.packet_id.encoded_size();
        remaining_len += self.filters.encoded_size();

        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.packet_id.encode(buffer);
        self.filters.encode(buffer);
    }
}

impl Decoder for UnsubscribePacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1); // Packet type
        let remaining_len = VariableByteInteger::decode(buffer)?.0 as usize;
        let buffer_len = buffer.remaining();

        let packet_id = u16::decode(buffer)?;

        if !buffer.has_remaining() {
            return Err(ReasonCode::MalformedPacket.into());
        }

        let next_packet = buffer_len - remaining_len;
        let mut filters = Vec::new();

        while buffer.remaining() > next_packet {
            filters.push(String::decode(buffer)?);
        }

        if filters.is_empty() {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(UnsubscribePacket { packet_id, filters })
    }
}
