// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Wire codec for MQTT 3.1.1 control packets.
//!
//! Decoding borrows from the input slice via [`ByteArray`] rather than
//! copying; `PublishPacket::payload` is the exception, since the caller
//! typically wants to hand it off past the lifetime of the read buffer.

mod byte_array;
mod connack;
mod connect;
mod disconnect_packet;
mod error;
mod header;
mod packet_id;
mod pingreq;
mod pingresp;
mod puback;
mod publish;
mod qos;
mod suback;
mod subscribe;
pub mod topic;
mod unsuback;
mod unsubscribe;
pub mod utils;
mod var_int;

pub use byte_array::ByteArray;
pub use connack::{ConnectAckPacket, ConnectReturnCode};
pub use connect::{ConnectPacket, LastWill};
pub use disconnect_packet::DisconnectPacket;
pub use error::{DecodeError, EncodeError};
pub use header::{FixedHeader, Packet, PacketType};
pub use packet_id::PacketId;
pub use pingreq::PingRequestPacket;
pub use pingresp::PingResponsePacket;
pub use puback::PublishAckPacket;
pub use publish::PublishPacket;
pub use qos::QoS;
pub use suback::{SubscribeAck, SubscribeAckPacket};
pub use subscribe::{SubscribePacket, SubscribeTopic};
pub use unsuback::UnsubscribeAckPacket;
pub use unsubscribe::UnsubscribePacket;
pub use var_int::{VarInt, VarIntError, MAX_PACKET_LEN};

/// Decode `Self` from the front of a [`ByteArray`], including its own
/// [`FixedHeader`].
pub trait DecodePacket: Sized {
    /// # Errors
    /// Returns a [`DecodeError`] if the buffer is malformed or truncated.
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Encode `Self`, including its own [`FixedHeader`], appending to `buf` and
/// returning the number of bytes written.
pub trait EncodePacket {
    /// # Errors
    /// Returns an [`EncodeError`] if the packet's fields cannot be represented on the wire.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}
