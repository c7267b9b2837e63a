//! PUBLISH - carries application message payloads.

use bytes::{Buf, Bytes, BytesMut};

use mercurio_core::{codec::{Decoder, Encoder, VariableByteInteger}, qos::QoS, reason::ReasonCode};

#[derive(Default, Debug, PartialEq, Eq, Clone)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos_level: QoS,
    pub retain: bool,
    pub topic_name: String,
    pub packet_id: Option<u16>,
    pub payload: Option<Bytes>,
}

const PACKET_TYPE: u8 = 0x03;

impl Encoder for PublishPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut remaining_len = 0;

        // Fixed header
        let mut fixed_header: u8 = PACKET_TYPE << 4;
        fixed_header |= (self.dup as u8) << 3;
        fixed_header |= (self.qos_level as u8) << 1;
        fixed_header |= self.retain as u8;
        fixed_header.encode(buffer);

        remaining_len += self.topic_name.encoded_size();
        remaining_len += self.packet_id.encoded_size();

        if let Some(payload) = &self.payload {
            remaining_len += payload.len();
        }

        VariableByteInteger(remaining_len as u32).encode(buffer);

        // Variable header
        self.topic_name.encode(buffer);
        self.packet_id.encode(buffer);

        // Payload goes out raw, it is not a codec-encoded field.
        if let Some(payload) = &self.payload {
            buffer.extend(payload);
        }
    }
}

impl Decoder for PublishPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        // Fixed header
        let fixed_header = buffer.get_u8();
        let dup = (fixed_header & 0b0000_1000) != 0;
        let qos_level = QoS::try_from((fixed_header & 0b0000_0110) >> 1)?;
        let retain = (fixed_header & 0b0000_0001) != 0;
        let remaining_len = VariableByteInteger::decode(buffer)?.0 as usize;

        // Variable header
        let topic_name = String::decode(buffer)?;
        let packet_id = match qos_level {
            QoS::AtMostOnce => None,
            _ => Some(u16::decode(buffer)?),
        };

        // Payload
        let payload_len =
            remaining_len.checked_sub(topic_name.encoded_size() + packet_id.encoded_size());

        let payload_len = match payload_len {
            Some(len) if buffer.remaining() >= len => len,
            _ => return Err(ReasonCode::MalformedPacket.into()),
        };

        let payload = Some(buffer.copy_to_bytes(payload_len));

        Ok(PublishPacket {
            dup,
            qos_level,
            retain,
            topic_name,
            packet_id,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::publish::*;

    #[test]
    fn test_publish_packet_qos1_encode_decode() {
        let packet = PublishPacket {
            dup: false,
            qos_level: QoS::AtLeastOnce,
            retain: false,
            topic_name: "test_topic".to_string(),
            packet_id: Some(1),
            payload: Bytes::from("test_message").into(),
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        let mut bytes = Bytes::from(encoded.to_vec());
        let new_packet = PublishPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }

    #[test]
    fn test_publish_packet_qos0_has_no_packet_id() {
        let packet = PublishPacket {
            dup: false,
            qos_level: QoS::AtMostOnce,
            retain: true,
            topic_name: "sensors/temp".to_string(),
            packet_id: None,
            payload: Bytes::from("21.5").into(),
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded[0], 0x31); // PUBLISH, retain bit set, qos 0

        let mut bytes = Bytes::from(encoded.to_vec());
        let new_packet = PublishPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(new_packet.packet_id, None);
        assert!(new_packet.retain);
    }
}
