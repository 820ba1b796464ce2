// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};

use crate::topic::validate_topic_filter;
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId, PacketType};

/// UNSUBSCRIBE: one or more topic filters to drop in a single exchange.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnsubscribePacket {
    packet_id: PacketId,
    topics: Vec<String>,
}

impl UnsubscribePacket {
    /// # Errors
    /// Returns [`EncodeError::InvalidTopic`] if `topics` is empty or any filter is malformed.
    pub fn new(packet_id: PacketId, topics: Vec<String>) -> Result<Self, EncodeError> {
        if topics.is_empty() {
            return Err(EncodeError::InvalidTopic);
        }
        for t in &topics {
            validate_topic_filter(t).map_err(|_| EncodeError::InvalidTopic)?;
        }
        Ok(Self { packet_id, topics })
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }
}

impl EncodePacket for UnsubscribePacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();
        let remaining_length = 2 + self.topics.iter().map(|t| 2 + t.len()).sum::<usize>();
        let fixed_header = FixedHeader::new(PacketType::Unsubscribe, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(v)?;
        v.write_u16::<BigEndian>(self.packet_id.value()).ok();
        for t in &self.topics {
            v.write_u16::<BigEndian>(t.len() as u16).ok();
            v.extend_from_slice(t.as_bytes());
        }
        Ok(v.len() - old_len)
    }
}

impl DecodePacket for UnsubscribePacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Unsubscribe {
            return Err(DecodeError::InvalidPacketType);
        }
        let packet_id = PacketId::new(ba.read_u16()?);

        let mut consumed = 2;
        let mut topics = Vec::new();
        while consumed < fixed_header.remaining_length() {
            let topic_len = ba.read_u16()? as usize;
            let topic = String::from_utf8(ba.read_bytes(topic_len)?.to_vec())?;
            consumed += 2 + topic_len;
            topics.push(topic);
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
    fn round_trips() {
        let packet = UnsubscribePacket::new(PacketId::new(5), vec!["t/a".into(), "t/b".into()]).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = UnsubscribePacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.topics(), ["t/a".to_string(), "t/b".to_string()]);
    }
}
