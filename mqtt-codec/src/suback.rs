// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId, PacketType, QoS};

/// One per-topic acknowledgement in a SUBACK.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscribeAck {
    Granted(QoS),
    Failure,
}

impl From<SubscribeAck> for u8 {
    fn from(ack: SubscribeAck) -> Self {
        match ack {
            SubscribeAck::Granted(qos) => qos.into(),
            SubscribeAck::Failure => 0x80,
        }
    }
}

impl TryFrom<u8> for SubscribeAck {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        if v == 0x80 {
            Ok(Self::Failure)
        } else {
            Ok(Self::Granted(QoS::try_from(v)?))
        }
    }
}

/// SUBACK: one [`SubscribeAck`] per topic filter in the matching SUBSCRIBE,
/// in the same order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscribeAckPacket {
    packet_id: PacketId,
    acks: Vec<SubscribeAck>,
}

impl SubscribeAckPacket {
    #[must_use]
    pub const fn new(packet_id: PacketId, acks: Vec<SubscribeAck>) -> Self {
        Self { packet_id, acks }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn acks(&self) -> &[SubscribeAck] {
        &self.acks
    }
}

impl DecodePacket for SubscribeAckPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::SubscribeAck {
            return Err(DecodeError::InvalidPacketType);
        }
        let packet_id = PacketId::new(ba.read_u16()?);
        let n_acks = fixed_header.remaining_length() - 2;
        let mut acks = Vec::with_capacity(n_acks);
        for _ in 0..n_acks {
            acks.push(SubscribeAck::try_from(ba.read_byte()?)?);
        }
        Ok(Self { packet_id, acks })
    }
}

impl EncodePacket for SubscribeAckPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();
        let remaining_length = 2 + self.acks.len();
        let fixed_header = FixedHeader::new(PacketType::SubscribeAck, remaining_length)
            .map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(v)?;
        v.extend_from_slice(&self.packet_id.value().to_be_bytes());
        for ack in &self.acks {
            v.push((*ack).into());
        }
        Ok(v.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_mixed_acks() {
        let packet = SubscribeAckPacket::new(
            PacketId::new(9),
            vec![SubscribeAck::Granted(QoS::AtLeastOnce), SubscribeAck::Failure],
        );
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribeAckPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded.acks(), packet.acks());
    }
}
