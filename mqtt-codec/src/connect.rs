// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType, QoS};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

/// Structure of the CONNECT flags byte:
/// ```txt
///      7              6              5          4-3        2            1             0
/// +----------+----------------+-------------+----------+-----------+---------------+----------+
/// | Username | Password Flag  | Will Retain | Will QoS | Will Flag | Clean Session | Reserved |
/// +----------+----------------+-------------+----------+-----------+---------------+----------+
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct ConnectFlags {
    username: bool,
    password: bool,
    will_retain: bool,
    will_qos: QoS,
    will: bool,
    clean_session: bool,
}

impl From<ConnectFlags> for u8 {
    fn from(f: ConnectFlags) -> Self {
        let username = u8::from(f.username) << 7;
        let password = u8::from(f.password) << 6;
        let will_retain = u8::from(f.will_retain) << 5;
        let will_qos: u8 = f.will_qos.into();
        let will = u8::from(f.will) << 2;
        let clean_session = u8::from(f.clean_session) << 1;
        username | password | will_retain | (will_qos << 3) | will | clean_session
    }
}

impl ConnectFlags {
    fn from_u8(flags: u8) -> Result<Self, DecodeError> {
        Ok(Self {
            username: flags & 0b1000_0000 != 0,
            password: flags & 0b0100_0000 != 0,
            will_retain: flags & 0b0010_0000 != 0,
            will_qos: QoS::try_from((flags & 0b0001_1000) >> 3)?,
            will: flags & 0b0000_0100 != 0,
            clean_session: flags & 0b0000_0010 != 0,
        })
    }
}

/// The will message the broker publishes on the client's behalf when it
/// detects an abrupt disconnection (no explicit DISCONNECT seen).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LastWill {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// CONNECT: the first packet sent on a new connection, always holding the
/// lock for the whole CONNECT/CONNACK exchange.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectPacket {
    client_id: String,
    clean_session: bool,
    keep_alive: u16,
    will: Option<LastWill>,
    username: Option<String>,
    password: Option<Vec<u8>>,
}

impl ConnectPacket {
    /// # Errors
    /// Returns [`EncodeError::InvalidClientId`] if `client_id` is empty.
    pub fn new(client_id: &str, clean_session: bool, keep_alive: u16) -> Result<Self, EncodeError> {
        if client_id.is_empty() && !clean_session {
            // A server is only required to accept an empty client id when the
            // session is clean; reject up front rather than surface a
            // broker-side IdentifierRejected later.
            return Err(EncodeError::InvalidClientId);
        }
        Ok(Self {
            client_id: client_id.to_string(),
            clean_session,
            keep_alive,
            will: None,
            username: None,
            password: None,
        })
    }

    pub fn set_will(&mut self, will: LastWill) -> &mut Self {
        self.will = Some(will);
        self
    }

    pub fn set_credentials(&mut self, username: String, password: Option<Vec<u8>>) -> &mut Self {
        self.username = Some(username);
        self.password = password;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    pub const fn will(&self) -> Option<&LastWill> {
        self.will.as_ref()
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let mut remaining_length = 2 + PROTOCOL_NAME.len()
            + 1 // protocol level
            + 1 // connect flags
            + 2 // keep alive
            + 2 + self.client_id.len();

        if let Some(will) = &self.will {
            remaining_length += 2 + will.topic.len();
            remaining_length += 2 + will.message.len();
        }
        if let Some(username) = &self.username {
            remaining_length += 2 + username.len();
        }
        if let Some(password) = &self.password {
            remaining_length += 2 + password.len();
        }

        let fixed_header = FixedHeader::new(PacketType::Connect, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(v)?;

        v.write_u16::<BigEndian>(PROTOCOL_NAME.len() as u16).ok();
        v.extend_from_slice(PROTOCOL_NAME.as_bytes());
        v.push(PROTOCOL_LEVEL);

        let flags = ConnectFlags {
            username: self.username.is_some(),
            password: self.password.is_some(),
            will_retain: self.will.as_ref().is_some_and(|w| w.retain),
            will_qos: self.will.as_ref().map_or(QoS::AtMostOnce, |w| w.qos),
            will: self.will.is_some(),
            clean_session: self.clean_session,
        };
        v.push(flags.into());

        v.write_u16::<BigEndian>(self.keep_alive).ok();

        v.write_u16::<BigEndian>(self.client_id.len() as u16).ok();
        v.extend_from_slice(self.client_id.as_bytes());

        if let Some(will) = &self.will {
            v.write_u16::<BigEndian>(will.topic.len() as u16).ok();
            v.extend_from_slice(will.topic.as_bytes());
            v.write_u16::<BigEndian>(will.message.len() as u16).ok();
            v.extend_from_slice(&will.message);
        }
        if let Some(username) = &self.username {
            v.write_u16::<BigEndian>(username.len() as u16).ok();
            v.extend_from_slice(username.as_bytes());
        }
        if let Some(password) = &self.password {
            v.write_u16::<BigEndian>(password.len() as u16).ok();
            v.extend_from_slice(password);
        }

        Ok(v.len() - old_len)
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = ba.read_mqtt_string()?;
        if protocol_name != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolLevel);
        }
        let protocol_level = ba.read_byte()?;
        if protocol_level != PROTOCOL_LEVEL {
            return Err(DecodeError::InvalidProtocolLevel);
        }

        let flags = ConnectFlags::from_u8(ba.read_byte()?)?;
        let keep_alive = ba.read_u16()?;
        let client_id = ba.read_mqtt_string()?;

        let will = if flags.will {
            let topic = ba.read_mqtt_string()?;
            let message = ba.read_mqtt_string()?.into_bytes();
            Some(LastWill {
                topic,
                message,
                qos: flags.will_qos,
                retain: flags.will_retain,
            })
        } else {
            None
        };

        let username = if flags.username {
            Some(ba.read_mqtt_string()?)
        } else {
            None
        };
        let password = if flags.password {
            Some(ba.read_mqtt_string()?.into_bytes())
        } else {
            None
        };

        Ok(Self {
            client_id,
            clean_session: flags.clean_session,
            keep_alive,
            will,
            username,
            password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_minimal_connect() {
        let packet = ConnectPacket::new("dev01", true, 60).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.client_id(), "dev01");
        assert_eq!(decoded.keep_alive(), 60);
        assert!(decoded.will.is_none());
    }

    #[test]
    fn round_trips_will_and_credentials() {
        let mut packet = ConnectPacket::new("dev02", false, 30).unwrap();
        packet.set_will(LastWill {
            topic: "t/dead".to_string(),
            message: b"bye".to_vec(),
            qos: QoS::AtLeastOnce,
            retain: false,
        });
        packet.set_credentials("alice".to_string(), Some(b"secret".to_vec()));

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.will.unwrap().topic, "t/dead");
        assert_eq!(decoded.username.unwrap(), "alice");
        assert_eq!(decoded.password.unwrap(), b"secret");
        assert!(!decoded.clean_session);
    }
}
