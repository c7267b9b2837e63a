//! SUBSCRIBE - requests one or more topic filters be added to a session.

use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    qos::QoS,
    reason::ReasonCode,
};

#[derive(Debug, PartialEq, Eq)]
pub struct SubscribeFilter {
    pub topic_filter: String,
    pub requested_qos: QoS,
}

impl Encoder for SubscribeFilter {
    fn encode(&self, buffer: &mut BytesMut) {
        self.topic_filter.encode(buffer);
        self.requested_qos.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.topic_filter.encoded_size() + self.requested_qos.encoded_size()
    }
}

impl Decoder for SubscribeFilter {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let topic_filter = String::decode(buffer)?;
        let requested_qos = QoS::decode(buffer)?;

        Ok(SubscribeFilter {
            topic_filter,
            requested_qos,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<SubscribeFilter>,
}

const PACKET_TYPE: u8 = 0x08;

impl Encoder for SubscribePacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut remaining_len = 0;

        // Fixed header reserved bits must be 0b0010.
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

impl Decoder for SubscribePacket {
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
            filters.push(SubscribeFilter::decode(buffer)?);
        }

        if filters.is_empty() {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(SubscribePacket { packet_id, filters })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use crate::subscribe::*;

    #[test]
    fn test_subscribe_packet_encode_decode() {
        let packet = SubscribePacket {
            packet_id: 1,
            filters: vec![
                SubscribeFilter {
                    topic_filter: "sensors/+/temperature".to_string(),
                    requested_qos: QoS::AtLeastOnce,
                },
                SubscribeFilter {
                    topic_filter: "sensors/#".to_string(),
                    requested_qos: QoS::ExactlyOnce,
                },
            ],
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded[0], 0x82);

        let mut bytes = Bytes::from(encoded.to_vec());
        let new_packet = SubscribePacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }

    #[test]
    fn test_subscribe_packet_requires_at_least_one_filter() {
        let input = vec![0x82, 0x02, 0x00, 0x01];
        let mut bytes = Bytes::from(input);
        assert!(SubscribePacket::decode(&mut bytes).is_err());
    }
}
