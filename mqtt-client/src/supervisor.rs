// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::time::{sleep, timeout};

use mqtt_codec::{
    ConnectAckPacket, ConnectPacket, ConnectReturnCode, LastWill, PublishPacket, SubscribePacket,
    SubscribeTopic,
};

use crate::config::ClientConfig;
use crate::connector::Connector;
use crate::dispatcher;
use crate::error::{Error, ErrorKind};
use crate::pinger;
use crate::session::SessionState;
use crate::status::ConnectivityState;
use crate::wire::write_packet;

const BACKOFF_MIN: Duration = Duration::from_millis(500);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Drives the CONNACK-restore / dispatch+ping / reconnect cycle for the
/// lifetime of a [`crate::client::Client`], starting from an already
/// established `initial` connection (the one [`crate::client::Client::connect_with`]
/// performed itself so that initial-connect failure can bubble to the
/// caller instead of vanishing into an unconditional retry loop). Every
/// connection after that is this function's own responsibility and is
/// retried indefinitely with backoff; only the first one gets to fail.
///
/// `writer_slot` is how the rest of the client observes "is there a live
/// serializer lock right now" -- `None` between generations, `Some` with
/// a fresh `Arc<Mutex<WriteHalf<_>>>` for each connected generation.
pub async fn run<C: Connector>(
    config: ClientConfig,
    connector: Arc<C>,
    session: Arc<Mutex<SessionState>>,
    writer_slot: Arc<RwLock<Option<Arc<Mutex<WriteHalf<C::Stream>>>>>>,
    incoming: mpsc::UnboundedSender<PublishPacket>,
    will: Option<LastWill>,
    reconnect_signal: Arc<Notify>,
    initial: (ReadHalf<C::Stream>, WriteHalf<C::Stream>),
) {
    let mut backoff = BACKOFF_MIN;
    let mut next = Some(Ok(initial));

    loop {
        let connected = match next.take() {
            Some(result) => result,
            None => {
                *writer_slot.write().await = None;
                session.lock().await.reset_for_reconnect();
                connect_once(&config, &connector, &session, will.clone()).await
            }
        };

        match connected {
            Ok((reader, writer)) => {
                backoff = BACKOFF_MIN;
                let writer = Arc::new(Mutex::new(writer));
                *writer_slot.write().await = Some(Arc::clone(&writer));
                session.lock().await.connectivity = ConnectivityState::Connected;

                restore_subscriptions(&session, &writer).await;

                let terminal = run_generation(
                    &config,
                    reader,
                    writer,
                    Arc::clone(&session),
                    incoming.clone(),
                    Arc::clone(&reconnect_signal),
                )
                .await;
                log::warn!("supervisor: session ended: {terminal}");
            }
            Err(err) => {
                log::warn!("supervisor: connect failed: {err}");
            }
        }

        session.lock().await.connectivity = ConnectivityState::Failing;
        sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_MAX);
    }
}

/// Perform one full connect attempt: open the transport, send CONNECT,
/// and await CONNACK, all bounded by `response_time` per §5's "socket
/// operation deadline during handshake". Used both for the client's
/// initial connect (awaited directly, error surfaced to the caller) and
/// for every reconnect the supervisor drives on its own.
pub(crate) async fn connect_once<C: Connector>(
    config: &ClientConfig,
    connector: &Arc<C>,
    session: &Arc<Mutex<SessionState>>,
    will: Option<LastWill>,
) -> Result<(ReadHalf<C::Stream>, WriteHalf<C::Stream>), Error> {
    let addr = format!("{}:{}", config.server, config.effective_port());
    let stream = connector.connect(&addr).await?;
    session.lock().await.connectivity = ConnectivityState::LinkUp;

    let (mut reader, mut writer) = split(stream);

    let clean_session = if session.lock().await.has_connected_once {
        config.clean
    } else {
        config.clean_init
    };

    let mut connect_packet = ConnectPacket::new(&config.client_id, clean_session, config.keepalive_secs)
        .map_err(Error::from)?;
    if let Some(will) = will {
        connect_packet.set_will(will);
    }
    if let Some(user) = &config.user {
        connect_packet.set_credentials(user.clone(), config.password.clone().map(String::into_bytes));
    }

    let handshake = async {
        write_packet(&mut writer, &connect_packet).await?;
        read_connack(&mut reader).await
    };
    let ack = match timeout(config.response_time(), handshake).await {
        Ok(result) => result?,
        Err(_) => return Err(Error::new(ErrorKind::Timeout, "no CONNACK within response_time")),
    };
    if ack.return_code() != ConnectReturnCode::Accepted {
        return Err(Error::new(
            ErrorKind::ConnectRejected,
            format!("broker rejected CONNECT: {:?}", ack.return_code()),
        ));
    }
    session.lock().await.has_connected_once = true;

    Ok((reader, writer))
}

async fn read_connack<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ConnectAckPacket, Error> {
    use mqtt_codec::{ByteArray, DecodePacket, PacketType};

    let buf = crate::wire::read_packet(reader).await?;
    let mut ba = ByteArray::new(&buf);
    let fixed_header = mqtt_codec::FixedHeader::decode(&mut ba)?;
    if fixed_header.packet_type() != PacketType::ConnectAck {
        return Err(Error::new(
            ErrorKind::ConnectRejected,
            "expected CONNACK as first packet",
        ));
    }
    let mut ba = ByteArray::new(&buf);
    Ok(ConnectAckPacket::decode(&mut ba)?)
}

async fn restore_subscriptions<S>(session: &Arc<Mutex<SessionState>>, writer: &Arc<Mutex<WriteHalf<S>>>)
where
    S: AsyncWrite + Send + 'static,
{
    let (packet_id, topics) = {
        let mut session = session.lock().await;
        if session.subscriptions.is_empty() {
            return;
        }
        let topics: Vec<SubscribeTopic> = session
            .subscriptions
            .iter()
            .map(|s| SubscribeTopic {
                topic: s.topic.clone(),
                qos: s.qos,
            })
            .collect();
        (session.alloc_packet_id(), topics)
    };

    let Ok(packet) = SubscribePacket::new(packet_id, topics) else {
        log::error!("supervisor: failed to rebuild SUBSCRIBE on reconnect");
        return;
    };
    let mut writer = writer.lock().await;
    if let Err(err) = write_packet(&mut *writer, &packet).await {
        log::error!("supervisor: failed to resend subscriptions: {err}");
    }
}

/// Run one connected generation: dispatcher and pinger race each other,
/// whichever dies first (transport error, PINGRESP miss) ends the
/// generation and its sibling is dropped with it.
async fn run_generation<S>(
    config: &ClientConfig,
    reader: tokio::io::ReadHalf<S>,
    writer: Arc<Mutex<WriteHalf<S>>>,
    session: Arc<Mutex<SessionState>>,
    incoming: mpsc::UnboundedSender<PublishPacket>,
    reconnect_signal: Arc<Notify>,
) -> Error
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let dispatcher_fut = dispatcher::run(reader, Arc::clone(&writer), Arc::clone(&session), incoming);
    let ping_interval = config.ping_interval();
    let forced = async {
        reconnect_signal.notified().await;
        Error::new(
            ErrorKind::Timeout,
            "QoS-1 delivery exhausted its retries; forcing reconnect",
        )
    };

    if ping_interval.is_zero() {
        tokio::select! {
            err = dispatcher_fut => err,
            err = forced => err,
        }
    } else {
        let pinger_fut = pinger::run(writer, session, ping_interval, config.keepalive(), config.response_time());
        tokio::select! {
            err = dispatcher_fut => err,
            err = pinger_fut => err,
            err = forced => err,
        }
    }
}
