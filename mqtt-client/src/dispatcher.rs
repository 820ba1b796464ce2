// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use mqtt_codec::{ByteArray, DecodePacket, PacketType, PublishAckPacket, PublishPacket, SubscribeAckPacket, UnsubscribeAckPacket};

use crate::error::{Error, ErrorKind};
use crate::session::SessionState;
use crate::wire::{peek_packet_type, read_packet, write_packet};

/// Inbound half of a session: owns the read side of the transport and
/// never touches the serializer lock except to answer a QoS-1 PUBLISH
/// with its PUBACK, which needs no coordination with an outbound
/// exchange since it carries no packet-id allocation of its own.
///
/// Runs until the transport errors, closes, or a packet fails to decode
/// or appears out of context, at which point it returns the terminal
/// [`Error`] so the supervisor can drive a reconnect.
pub async fn run<S>(
    mut reader: ReadHalf<S>,
    writer: Arc<Mutex<WriteHalf<S>>>,
    session: Arc<Mutex<SessionState>>,
    incoming: mpsc::UnboundedSender<PublishPacket>,
) -> Error
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        let buf = match read_packet(&mut reader).await {
            Ok(buf) => buf,
            Err(err) => return err,
        };

        {
            let mut session = session.lock().await;
            session.note_rx();
        }

        if let Err(err) = handle_packet(&buf, &writer, &session, &incoming).await {
            log::error!("dispatcher: {err}, forcing reconnect");
            return err;
        }
    }
}

async fn handle_packet<S>(
    buf: &[u8],
    writer: &Arc<Mutex<WriteHalf<S>>>,
    session: &Arc<Mutex<SessionState>>,
    incoming: &mpsc::UnboundedSender<PublishPacket>,
) -> Result<(), Error>
where
    S: AsyncWrite + Send + 'static,
{
    let packet_type = peek_packet_type(buf)?;
    match packet_type {
        PacketType::ConnectAck => {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "unexpected CONNACK outside the handshake",
            ));
        }
        PacketType::Publish { qos, .. } => {
            let mut ba = ByteArray::new(buf);
            let packet = PublishPacket::decode(&mut ba)?;
            if qos == mqtt_codec::QoS::AtLeastOnce {
                if let Some(packet_id) = packet.packet_id() {
                    let ack = PublishAckPacket::new(packet_id);
                    let mut writer = writer.lock().await;
                    write_packet(&mut *writer, &ack).await?;
                }
            }
            if incoming.send(packet).is_err() {
                log::warn!("dispatcher: no subscriber listening for inbound messages");
            }
        }
        PacketType::PublishAck => {
            let mut ba = ByteArray::new(buf);
            let packet = PublishAckPacket::decode(&mut ba)?;
            session.lock().await.waiters.resolve_puback(packet.packet_id());
        }
        PacketType::SubscribeAck => {
            let mut ba = ByteArray::new(buf);
            let packet = SubscribeAckPacket::decode(&mut ba)?;
            session.lock().await.waiters.resolve_suback(packet);
        }
        PacketType::UnsubscribeAck => {
            let mut ba = ByteArray::new(buf);
            let packet = UnsubscribeAckPacket::decode(&mut ba)?;
            session.lock().await.waiters.resolve_unsuback(packet.packet_id());
        }
        PacketType::PingResponse => {
            session.lock().await.waiters.resolve_pingresp();
        }
        other => {
            log::debug!("dispatcher: ignoring unexpected inbound packet type {other:?}");
        }
    }
    Ok(())
}
