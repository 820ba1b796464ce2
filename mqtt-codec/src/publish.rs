// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use bytes::Bytes;

use crate::topic::validate_topic_name;
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId, PacketType, QoS};

/// PUBLISH. `packet_id` is only meaningful (and only present on the wire)
/// for `qos == AtLeastOnce`.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishPacket {
    dup: bool,
    qos: QoS,
    retain: bool,
    topic: String,
    packet_id: Option<PacketId>,
    payload: Bytes,
}

impl PublishPacket {
    /// # Errors
    /// Returns [`EncodeError::InvalidTopic`] if `topic` is empty or contains a wildcard char.
    pub fn new(topic: &str, qos: QoS, payload: impl Into<Bytes>, retain: bool) -> Result<Self, EncodeError> {
        validate_topic_name(topic).map_err(|_| EncodeError::InvalidTopic)?;
        Ok(Self {
            dup: false,
            qos,
            retain,
            topic: topic.to_string(),
            packet_id: None,
            payload: payload.into(),
        })
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = Some(packet_id);
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> Option<PacketId> {
        self.packet_id
    }

    /// Set the DUP flag to mark this as a retransmission of an earlier
    /// QoS-1 publish carrying the same packet id.
    pub fn set_dup(&mut self, dup: bool) -> &mut Self {
        self.dup = dup;
        self
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        if self.qos == QoS::AtLeastOnce && self.packet_id.is_none() {
            return Err(EncodeError::InvalidTopic);
        }

        let old_len = v.len();
        let mut remaining_length = 2 + self.topic.len() + self.payload.len();
        if self.qos == QoS::AtLeastOnce {
            remaining_length += 2;
        }

        let packet_type = PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        };
        let fixed_header =
            FixedHeader::new(packet_type, remaining_length).map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(v)?;

        v.write_u16::<BigEndian>(self.topic.len() as u16).ok();
        v.extend_from_slice(self.topic.as_bytes());
        if let Some(packet_id) = self.packet_id {
            v.write_u16::<BigEndian>(packet_id.value()).ok();
        }
        v.extend_from_slice(&self.payload);

        Ok(v.len() - old_len)
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        let topic_len = ba.read_u16()? as usize;
        let topic = String::from_utf8(ba.read_bytes(topic_len)?.to_vec())?;
        validate_topic_name(&topic)?;

        let packet_id = if qos == QoS::AtLeastOnce {
            Some(PacketId::new(ba.read_u16()?))
        } else {
            None
        };

        let header_bytes = 2 + topic_len + if packet_id.is_some() { 2 } else { 0 };
        let payload_len = fixed_header
            .remaining_length()
            .checked_sub(header_bytes)
            .ok_or(DecodeError::OutOfRangeError)?;
        let payload = Bytes::copy_from_slice(ba.read_bytes(payload_len)?);

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_qos0() {
        let packet = PublishPacket::new("t/a", QoS::AtMostOnce, &b"x"[..], false).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.topic(), "t/a");
        assert_eq!(decoded.payload(), b"x");
        assert!(decoded.packet_id().is_none());
    }

    #[test]
    fn round_trips_qos1_with_dup() {
        let mut packet = PublishPacket::new("t/b", QoS::AtLeastOnce, &b"y"[..], true).unwrap();
        packet.set_packet_id(PacketId::new(7));
        packet.set_dup(true);

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.packet_id(), Some(PacketId::new(7)));
        assert!(decoded.dup());
        assert!(decoded.retain());
    }

    #[test]
    fn rejects_qos1_without_packet_id() {
        let packet = PublishPacket::new("t/c", QoS::AtLeastOnce, &b"z"[..], false).unwrap();
        let mut buf = Vec::new();
        assert!(packet.encode(&mut buf).is_err());
    }
}
