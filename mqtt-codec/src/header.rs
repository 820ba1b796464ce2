// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;
use std::fmt;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, QoS, VarInt, VarIntError};

/// Implemented by every control packet so the codec can report its wire
/// length without fully serializing it first.
pub trait Packet: fmt::Debug {
    fn packet_type(&self) -> PacketType;

    /// # Errors
    /// Returns error if the packet's remaining length would overflow the varint range.
    fn bytes(&self) -> Result<usize, VarIntError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PacketType {
    #[default]
    Connect,
    ConnectAck,
    Publish {
        dup: bool,
        qos: QoS,
        retain: bool,
    },
    PublishAck,
    Subscribe,
    SubscribeAck,
    Unsubscribe,
    UnsubscribeAck,
    PingRequest,
    PingResponse,
    Disconnect,
}

impl PacketType {
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> Self {
        let type_bits: u8 = match packet_type {
            PacketType::Connect => 1,
            PacketType::ConnectAck => 2,
            PacketType::Publish { .. } => 3,
            PacketType::PublishAck => 4,
            PacketType::Subscribe => 8,
            PacketType::SubscribeAck => 9,
            PacketType::Unsubscribe => 10,
            PacketType::UnsubscribeAck => 11,
            PacketType::PingRequest => 12,
            PacketType::PingResponse => 13,
            PacketType::Disconnect => 14,
        };

        let flags_bits: u8 = match packet_type {
            PacketType::Publish { dup, qos, retain } => {
                let dup = if dup { 0b0000_1000 } else { 0b0000_0000 };
                let qos: u8 = qos.into();
                let retain = if retain { 0b0000_0001 } else { 0b0000_0000 };
                dup | (qos << 1) | retain
            }
            // Bits 3..0 of SUBSCRIBE/UNSUBSCRIBE are reserved and must be 0b0010
            // [MQTT-3.8.1-1] [MQTT-3.10.1-1].
            PacketType::Subscribe | PacketType::Unsubscribe => 0b0000_0010,
            _ => 0b0000_0000,
        };
        (type_bits << 4) | flags_bits
    }
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    /// # Errors
    /// Returns [`DecodeError::InvalidPacketFlags`] if reserved flag bits are
    /// set incorrectly, [`DecodeError::InvalidQoS`] for a QoS-2 PUBLISH, or
    /// [`DecodeError::InvalidPacketType`] for an unknown type nibble.
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        let type_bits = (v & 0b1111_0000) >> 4;
        let flag = v & 0b0000_1111;

        match type_bits {
            1 if flag == 0 => Ok(Self::Connect),
            2 if flag == 0 => Ok(Self::ConnectAck),
            3 => {
                let dup = flag & 0b0000_1000 != 0;
                let retain = flag & 0b0000_0001 != 0;
                let qos = QoS::try_from((flag & 0b0000_0110) >> 1)?;
                if dup && qos == QoS::AtMostOnce {
                    return Err(DecodeError::InvalidDupFlag);
                }
                Ok(Self::Publish { dup, qos, retain })
            }
            4 if flag == 0 => Ok(Self::PublishAck),
            8 if flag == 0b0000_0010 => Ok(Self::Subscribe),
            9 if flag == 0 => Ok(Self::SubscribeAck),
            10 if flag == 0b0000_0010 => Ok(Self::Unsubscribe),
            11 if flag == 0 => Ok(Self::UnsubscribeAck),
            12 if flag == 0 => Ok(Self::PingRequest),
            13 if flag == 0 => Ok(Self::PingResponse),
            14 if flag == 0 => Ok(Self::Disconnect),
            1..=14 => {
                log::error!("header: bad flag bits {flag:#06b} for type {type_bits}");
                Err(DecodeError::InvalidPacketFlags)
            }
            t => {
                log::error!("header: unknown packet type nibble {t:#06b}");
                Err(DecodeError::InvalidPacketType)
            }
        }
    }
}

/// Two-byte-minimum header shared by every control packet.
///
/// ```txt
///  7 6 5 4 3 2 1 0
/// +-------+-------+
/// | Type  | Flags |
/// +-------+-------+
/// | Remaining Len |
/// +-------+-------+
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedHeader {
    packet_type: PacketType,
    remaining_length: VarInt,
}

impl FixedHeader {
    /// # Errors
    /// Returns error if `remaining_length` overflows the varint range.
    pub fn new(packet_type: PacketType, remaining_length: usize) -> Result<Self, VarIntError> {
        let remaining_length = VarInt::from(remaining_length)?;
        Ok(Self {
            packet_type,
            remaining_length,
        })
    }

    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    #[must_use]
    pub const fn remaining_length(&self) -> usize {
        self.remaining_length.value()
    }

    #[must_use]
    pub const fn bytes(&self) -> usize {
        PacketType::bytes() + self.remaining_length.bytes()
    }
}

impl DecodePacket for FixedHeader {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let flag = ba.read_byte()?;
        let packet_type = PacketType::try_from(flag)?;
        let remaining_length = VarInt::decode(ba)?;
        Ok(Self {
            packet_type,
            remaining_length,
        })
    }
}

impl EncodePacket for FixedHeader {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let packet_type: u8 = self.packet_type.into();
        v.push(packet_type);
        self.remaining_length.encode(v)?;
        Ok(self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_ping_response() {
        let mut buf = Vec::new();
        let fixed_header = FixedHeader::new(PacketType::PingResponse, 0).unwrap();
        assert_eq!(fixed_header.encode(&mut buf).unwrap(), 2);
        assert_eq!(&buf, &[0xd0, 0x00]);
    }

    #[test]
    fn decodes_publish_header() {
        let buf = [0x3a, 0x13];
        let mut ba = ByteArray::new(&buf);
        let fixed_header = FixedHeader::decode(&mut ba).unwrap();
        assert_eq!(
            fixed_header.packet_type(),
            PacketType::Publish {
                dup: true,
                qos: QoS::AtLeastOnce,
                retain: false,
            }
        );
        assert_eq!(fixed_header.remaining_length(), 19);
    }

    #[test]
    fn rejects_dup_on_qos0() {
        let buf = [0x38, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            FixedHeader::decode(&mut ba),
            Err(DecodeError::InvalidDupFlag)
        );
    }
}
