// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Packet framing over an async byte stream.
//!
//! MQTT gives no outer length prefix beyond the fixed header's own
//! remaining-length varint, so a full packet is read in two steps: the
//! fixed header first (type/flags byte plus up to four varint bytes),
//! then exactly `remaining_length` more bytes of body.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use mqtt_codec::{ByteArray, DecodePacket, EncodePacket, FixedHeader, PacketType};

use crate::error::Error;

/// Read one complete control packet, header included, into an owned buffer.
///
/// # Errors
/// Returns [`Error`] if the stream closes mid-packet or the header is malformed.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0_u8; 1];
    reader.read_exact(&mut buf).await?;

    // Remaining-length varint: up to 4 bytes, each continuing while its
    // top bit is set.
    loop {
        let mut byte = [0_u8; 1];
        reader.read_exact(&mut byte).await?;
        let more = byte[0] & 0x80 != 0;
        buf.push(byte[0]);
        if !more {
            break;
        }
    }

    let mut ba = ByteArray::new(&buf);
    let fixed_header = FixedHeader::decode(&mut ba)?;
    let remaining = fixed_header.remaining_length();

    let mut body = vec![0_u8; remaining];
    if remaining > 0 {
        reader.read_exact(&mut body).await?;
    }
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Peek the packet type of an already-framed buffer without consuming it.
///
/// # Errors
/// Returns [`Error`] if the buffer does not start with a valid fixed header.
pub fn peek_packet_type(buf: &[u8]) -> Result<PacketType, Error> {
    let mut ba = ByteArray::new(buf);
    Ok(FixedHeader::decode(&mut ba)?.packet_type())
}

/// Encode `packet` and write it in full.
///
/// # Errors
/// Returns [`Error`] if encoding fails or the write does not complete.
pub async fn write_packet<W, P>(writer: &mut W, packet: &P) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
    P: EncodePacket,
{
    let mut buf = Vec::new();
    packet.encode(&mut buf)?;
    writer.write_all(&buf).await?;
    Ok(())
}
