// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};

use crate::topic::validate_topic_filter;
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId, PacketType, QoS};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscribeTopic {
    pub topic: String,
    pub qos: QoS,
}

/// SUBSCRIBE: one or more topic filters requested in a single exchange.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscribePacket {
    packet_id: PacketId,
    topics: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    /// # Errors
    /// Returns [`EncodeError::InvalidTopic`] if `topics` is empty or any filter is malformed.
    pub fn new(packet_id: PacketId, topics: Vec<SubscribeTopic>) -> Result<Self, EncodeError> {
        if topics.is_empty() {
            return Err(EncodeError::InvalidTopic);
        }
        for t in &topics {
            validate_topic_filter(&t.topic).map_err(|_| EncodeError::InvalidTopic)?;
        }
        Ok(Self { packet_id, topics })
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topics(&self) -> &[SubscribeTopic] {
        &self.topics
    }
}

impl EncodePacket for SubscribePacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();
        let remaining_length = 2 + self
            .topics
            .iter()
            .map(|t| 2 + t.topic.len() + 1)
            .sum::<usize>();

        let fixed_header = FixedHeader::new(PacketType::Subscribe, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(v)?;

        v.write_u16::<BigEndian>(self.packet_id.value()).ok();
        for t in &self.topics {
            v.write_u16::<BigEndian>(t.topic.len() as u16).ok();
            v.extend_from_slice(t.topic.as_bytes());
            v.push(t.qos.into());
        }
        Ok(v.len() - old_len)
    }
}

impl DecodePacket for SubscribePacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Subscribe {
            return Err(DecodeError::InvalidPacketType);
        }
        let packet_id = PacketId::new(ba.read_u16()?);

        let mut consumed = 2;
        let mut topics = Vec::new();
        while consumed < fixed_header.remaining_length() {
            let topic_len = ba.read_u16()? as usize;
            let topic = String::from_utf8(ba.read_bytes(topic_len)?.to_vec())?;
            let qos = QoS::try_from(ba.read_byte()?)?;
            consumed += 2 + topic_len + 1;
            topics.push(SubscribeTopic { topic, qos });
        }
        if topics.is_empty() {
            return Err(DecodeError::EmptyTopics);
        }

        Ok(Self { packet_id, topics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_multiple_topics() {
        let packet = SubscribePacket::new(
            PacketId::new(3),
            vec![
                SubscribeTopic { topic: "t/a".into(), qos: QoS::AtMostOnce },
                SubscribeTopic { topic: "t/b".into(), qos: QoS::AtLeastOnce },
            ],
        )
        .unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribePacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.topics().len(), 2);
        assert_eq!(decoded.topics()[1].qos, QoS::AtLeastOnce);
    }

    #[test]
    fn rejects_empty_topic_list() {
        assert!(SubscribePacket::new(PacketId::new(1), vec![]).is_err());
    }
}
