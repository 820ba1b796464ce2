// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType};

/// DISCONNECT: sent by the client to end the session cleanly. Its arrival
/// at the broker suppresses delivery of the will message.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DisconnectPacket;

impl DisconnectPacket {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DecodePacket for DisconnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Disconnect {
            return Err(DecodeError::InvalidPacketType);
        }
        Ok(Self)
    }
}

impl EncodePacket for DisconnectPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let fixed_header =
            FixedHeader::new(PacketType::Disconnect, 0).map_err(|_| EncodeError::InvalidVarInt)?;
        fixed_header.encode(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut buf = Vec::new();
        DisconnectPacket::new().encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0xe0, 0x00]);
        let mut ba = ByteArray::new(&buf);
        assert!(DisconnectPacket::decode(&mut ba).is_ok());
    }
}
