//! CONNECT - the first packet a client sends on a new connection.

use std::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use mercurio_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    error::Error,
    protocol::ProtocolVersion,
    qos::QoS,
    reason::ReasonCode,
};

#[derive(Default, Debug, PartialEq, Eq)]
pub struct ConnectFlags {
    pub user_name: bool,
    pub password: bool,
    pub will_retain: bool,
    pub will_qos: QoS,
    pub will_flag: bool,
    pub clean_start: bool,
}

impl Encoder for ConnectFlags {
    fn encode(&self, buffer: &mut BytesMut) {
        let mut flags: u8 = 0;

        if self.user_name {
            flags = 0b1000_0000;
        }

        if self.password {
            flags |= 0b0100_0000;
        }

        if self.will_retain {
            flags |= 0b0010_0000;
        }

        if self.will_flag {
            flags |= 0b0000_0100;
            flags |= (self.will_qos as u8) << 3;
        }

        if self.clean_start {
            flags |= 0b0000_0010;
        }

        buffer.put_u8(flags);
    }

    fn encoded_size(&self) -> usize {
        mem::size_of::<u8>()
    }
}

impl Decoder for ConnectFlags {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        if !buffer.has_remaining() {
            return Err(Error::PacketIncomplete);
        }

        let byte = buffer.get_u8();
        if (byte & 0b0000_0001) != 0 {
            return Err(ReasonCode::MalformedPacket.into());
        }

        let mut flags = ConnectFlags {
            user_name: (byte & 0b1000_0000) != 0,
            password: (byte & 0b0100_0000) != 0,
            will_retain: (byte & 0b0010_0000) != 0,
            clean_start: (byte & 0b0000_0010) != 0,
            ..Default::default()
        };

        if (byte & 0b0000_0100) != 0 {
            flags.will_flag = true;
            flags.will_qos = QoS::try_from((byte >> 3) & 0b0000_0011)?;
        }

        Ok(flags)
    }
}

#[derive(Default, Debug, Eq, PartialEq)]
pub struct ConnectPayload {
    pub client_id: String,
    pub will_topic: Option<String>,
    pub will_payload: Option<Bytes>,
    pub user_name: Option<String>,
    pub password: Option<Bytes>,
}

impl Encoder for ConnectPayload {
    fn encode(&self, buffer: &mut BytesMut) {
        self.client_id.encode(buffer);
        self.will_topic.encode(buffer);
        self.will_payload.encode(buffer);
        self.user_name.encode(buffer);
        self.password.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        let mut len = 0;

        len += self.client_id.encoded_size();
        len += self.will_topic.encoded_size();
        len += self.will_payload.encoded_size();
        len += self.user_name.encoded_size();
        len += self.password.encoded_size();

        len
    }
}

impl Decoder for ConnectPayload {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let payload = ConnectPayload {
            client_id: String::decode(buffer)?,
            ..Default::default()
        };

        Ok(payload)
    }
}

#[derive(Eq, PartialEq, Debug)]
pub struct ConnectPacket {
    pub protocol_version: ProtocolVersion,
    pub flags: ConnectFlags,
    pub keepalive: u16,
    pub payload: ConnectPayload,
}

const PACKET_TYPE: u8 = 0x01;

impl Encoder for ConnectPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        let protocol_name = self.protocol_version.protocol_name();
        let protocol_level = self.protocol_version.protocol_level();

        let mut remaining_len = 0;

        buffer.put_u8(PACKET_TYPE << 4);
        remaining_len += protocol_name.encoded_size();
        remaining_len += protocol_level.encoded_size();
        remaining_len += self.flags.encoded_size();
        remaining_len += self.keepalive.encoded_size();
        remaining_len += self.payload.encoded_size();

        VariableByteInteger(remaining_len as u32).encode(buffer);

        protocol_name.encode(buffer);
        protocol_level.encode(buffer);
        self.flags.encode(buffer);
        self.keepalive.encode(buffer);
        self.payload.encode(buffer);
    }
}

impl Decoder for ConnectPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1); // Packet type
        let _ = VariableByteInteger::decode(buffer)?; // Remaining length

        let protocol_name = String::decode(buffer)?;
        let protocol_level = u8::decode(buffer)?;

        let protocol_version = ProtocolVersion::from_name_and_level(&protocol_name, protocol_level)
            .ok_or(ReasonCode::UnacceptableProtocolVersion)?;

        let flags = ConnectFlags::decode(buffer)?;
        let keepalive = u16::decode(buffer)?;

        let mut payload = ConnectPayload::decode(buffer)?;

        if flags.will_flag {
            payload.will_topic = Some(String::decode(buffer)?);
            payload.will_payload = Some(Bytes::decode(buffer)?);
        }

        if flags.user_name {
            payload.user_name = Some(String::decode(buffer)?);
        }

        if flags.password {
            payload.password = Some(Bytes::decode(buffer)?);
        }

        Ok(ConnectPacket {
            protocol_version,
            flags,
            keepalive,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::connect::*;

    #[test]
    fn test_connect_packet_v3_1_1_encode_decode() {
        let expected = vec![
            0x10, // Packet type: CONNECT
            0x0c, // Remaining length: 12
            0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, // Protocol name: "MQTT"
            0x04, // Protocol level: 4 (MQTT 3.1.1)
            0x02, // Flags: clean_start
            0x00, 0x3c, // Keepalive: 60
            0x00, 0x00, // Client ID: empty
        ];

        let flags = ConnectFlags {
            clean_start: true,
            ..Default::default()
        };

        let payload = ConnectPayload::default();
        let packet = ConnectPacket {
            protocol_version: ProtocolVersion::V3_1_1,
            flags,
            keepalive: 60,
            payload,
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);
        let new_packet = ConnectPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }

    #[test]
    fn test_connect_packet_with_will_and_credentials() {
        let flags = ConnectFlags {
            user_name: true,
            password: true,
            will_retain: true,
            will_qos: QoS::AtLeastOnce,
            will_flag: true,
            clean_start: true,
        };

        let payload = ConnectPayload {
            client_id: String::from("client-1"),
            will_topic: String::from("clients/client-1/status").into(),
            will_payload: Bytes::from("offline").into(),
            user_name: String::from("alice").into(),
            password: Bytes::from("hunter2").into(),
        };

        let packet = ConnectPacket {
            protocol_version: ProtocolVersion::V3_1_1,
            flags,
            keepalive: 30,
            payload,
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        let mut bytes = Bytes::from(encoded.to_vec());
        let new_packet = ConnectPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }

    #[test]
    fn test_connect_packet_v3_1_decode() {
        // MQTT 3.1 CONNECT packet: Protocol "MQIsdp", Level 3
        let input = vec![
            0x10, // Packet type: CONNECT
            0x0e, // Remaining length: 14
            0x00, 0x06, 0x4d, 0x51, 0x49, 0x73, 0x64, 0x70, // Protocol name: "MQIsdp"
            0x03, // Protocol level: 3 (MQTT 3.1)
            0x02, // Flags: clean_start
            0x00, 0x3c, // Keepalive: 60
            0x00, 0x00, // Client ID: empty
        ];

        let mut bytes = Bytes::from(input);
        let packet = ConnectPacket::decode(&mut bytes).expect("Unexpected error");

        assert_eq!(packet.protocol_version, ProtocolVersion::V3_1);
        assert!(packet.flags.clean_start);
        assert_eq!(packet.keepalive, 60);
    }

    #[test]
    fn test_connect_packet_rejects_unknown_protocol_level() {
        let input = vec![
            0x10, 0x0c, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x05, 0x02, 0x00, 0x3c, 0x00, 0x00,
        ];

        let mut bytes = Bytes::from(input);
        assert!(ConnectPacket::decode(&mut bytes).is_err());
    }
}
