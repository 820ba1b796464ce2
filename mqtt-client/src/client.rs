// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::WriteHalf;
use tokio::net::lookup_host;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use mqtt_codec::{
    DisconnectPacket, LastWill, PingRequestPacket, PublishPacket, QoS, SubscribePacket, SubscribeTopic,
    UnsubscribePacket,
};

use crate::config::{ClientConfig, WillConfig};
use crate::connector::{Connector, TcpConnector};
use crate::error::{Error, ErrorKind};
use crate::session::{SessionState, Subscription};
use crate::status::ConnectivityState;
use crate::supervisor;
use crate::wire::write_packet;

/// Resilient MQTT 3.1.1 client for links that drop without warning.
///
/// A [`Client`] owns a background supervisor task that holds the
/// connection open, re-establishes it on failure, and restores
/// subscriptions after each reconnect. The public methods here only ever
/// touch the current serializer lock and session bookkeeping; they never
/// drive the socket directly.
pub struct Client<C: Connector = TcpConnector> {
    config: ClientConfig,
    session: Arc<Mutex<SessionState>>,
    writer_slot: Arc<RwLock<Option<Arc<Mutex<WriteHalf<C::Stream>>>>>>,
    reconnect_signal: Arc<Notify>,
    incoming_rx: Mutex<mpsc::UnboundedReceiver<PublishPacket>>,
    supervisor_handle: JoinHandle<()>,
    closed: AtomicBool,
}

impl Client<TcpConnector> {
    /// Connect over plain TCP, the common case.
    ///
    /// # Errors
    /// The initial CONNECT/CONNACK handshake is awaited here and its
    /// failure bubbles straight to the caller, unlike every later
    /// reconnect, which the supervisor retries on its own forever.
    pub async fn connect(config: ClientConfig) -> Result<Self, Error> {
        Self::connect_with(config, TcpConnector).await
    }
}

impl<C: Connector> Client<C> {
    /// Connect using a caller-supplied [`Connector`], e.g. one that wraps
    /// a TLS or WebSocket stream.
    ///
    /// # Errors
    /// See [`Client::connect`].
    pub async fn connect_with(config: ClientConfig, connector: C) -> Result<Self, Error> {
        let will = config.will.clone().map(will_from_config).transpose()?;
        let connector = Arc::new(connector);

        let session = Arc::new(Mutex::new(SessionState::new()));
        let writer_slot = Arc::new(RwLock::new(None));
        let reconnect_signal = Arc::new(Notify::new());
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        // Only this first attempt surfaces a transport/handshake error to
        // the caller; every subsequent one is the supervisor's problem.
        let initial = supervisor::connect_once(&config, &connector, &session, will.clone()).await?;

        let supervisor_handle = tokio::spawn(supervisor::run(
            config.clone(),
            Arc::clone(&connector),
            Arc::clone(&session),
            Arc::clone(&writer_slot),
            incoming_tx,
            will,
            Arc::clone(&reconnect_signal),
            initial,
        ));

        Ok(Self {
            config,
            session,
            writer_slot,
            reconnect_signal,
            incoming_rx: Mutex::new(incoming_rx),
            supervisor_handle,
            closed: AtomicBool::new(false),
        })
    }

    /// Receive the next message delivered by a live subscription.
    ///
    /// # Errors
    /// Returns [`ErrorKind::NotConnected`] once the supervisor task has
    /// exited and no further messages will ever arrive.
    pub async fn recv(&self) -> Result<PublishPacket, Error> {
        let mut rx = self.incoming_rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| Error::new(ErrorKind::NotConnected, "client has been closed"))
    }

    pub async fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.session.lock().await.connectivity == ConnectivityState::Connected
    }

    /// Whether the broker is actually reachable right now. A recently
    /// active link is trusted outright; an idle one is probed with a
    /// PINGREQ/PINGRESP round trip rather than just checking that a
    /// serializer lock happens to exist, since a half-open TCP connection
    /// can leave a writer slot populated long after the broker is gone.
    pub async fn broker_up(&self) -> bool {
        let Ok(writer) = self.current_writer().await else {
            return false;
        };

        let idle_for = {
            let session = self.session.lock().await;
            session.last_rx.max(session.last_tx).elapsed()
        };
        if idle_for < self.config.ping_interval().max(Duration::from_secs(1)) {
            return true;
        }

        let rx = {
            let mut session = self.session.lock().await;
            session.waiters.register_pingresp()
        };
        {
            let mut writer = writer.lock().await;
            if write_packet(&mut *writer, &PingRequestPacket::new()).await.is_err() {
                return false;
            }
        }
        self.session.lock().await.note_tx();

        matches!(timeout(self.config.response_time(), rx).await, Ok(Ok(())))
    }

    /// Resolve the configured server name within `timeout_duration`, as a
    /// cheap upstream-reachability probe independent of the MQTT session.
    ///
    /// # Errors
    /// Returns [`ErrorKind::Timeout`] if resolution does not complete in
    /// time, or [`ErrorKind::IoError`] if resolution itself fails.
    pub async fn wan_ok(&self, timeout_duration: Duration) -> Result<bool, Error> {
        let addr = format!("{}:{}", self.config.server, self.config.effective_port());
        match timeout(timeout_duration, lookup_host(addr)).await {
            Ok(Ok(mut addrs)) => Ok(addrs.next().is_some()),
            Ok(Err(err)) => Err(Error::from(err)),
            Err(_) => Err(Error::new(ErrorKind::Timeout, "DNS lookup timed out")),
        }
    }

    /// Publish with the given QoS.
    ///
    /// QoS 0 fires and forgets over whatever serializer lock is live right
    /// now. QoS 1 retries with the DUP flag on each ack timeout up to
    /// `max_repubs`, then forces a reconnect and restarts with a fresh
    /// packet id -- it never gives up and never cancels the caller early.
    ///
    /// # Errors
    /// Returns [`ErrorKind::NotConnected`] for QoS 0 if no serializer lock
    /// is currently live. QoS 1 instead waits out reconnects indefinitely.
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        payload: impl Into<Bytes>,
        retain: bool,
    ) -> Result<(), Error> {
        match qos {
            QoS::AtMostOnce => self.publish_at_most_once(topic, payload, retain).await,
            QoS::AtLeastOnce => self.publish_at_least_once(topic, payload, retain).await,
        }
    }

    async fn publish_at_most_once(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        retain: bool,
    ) -> Result<(), Error> {
        let packet = PublishPacket::new(topic, QoS::AtMostOnce, payload, retain)?;
        let writer = self.current_writer().await?;
        let mut writer = writer.lock().await;
        write_packet(&mut *writer, &packet).await
    }

    async fn publish_at_least_once(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        retain: bool,
    ) -> Result<(), Error> {
        let payload = payload.into();

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::new(ErrorKind::NotConnected, "client has been disconnected"));
            }

            let packet_id = self.session.lock().await.alloc_packet_id();
            let mut packet = PublishPacket::new(topic, QoS::AtLeastOnce, payload.clone(), retain)?;
            packet.set_packet_id(packet_id);

            let mut repubs = 0_u32;
            loop {
                if self.closed.load(Ordering::SeqCst) {
                    return Err(Error::new(ErrorKind::NotConnected, "client has been disconnected"));
                }

                packet.set_dup(repubs > 0);

                let Ok(writer) = self.current_writer().await else {
                    // No live link to retry on; wait for the supervisor to
                    // bring one back rather than burn through repub budget.
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    continue;
                };

                let rx = {
                    let mut session = self.session.lock().await;
                    session.waiters.register_puback(packet_id)
                };
                {
                    let mut writer = writer.lock().await;
                    write_packet(&mut *writer, &packet).await?;
                }
                self.session.lock().await.note_tx();

                match timeout(self.config.response_time(), rx).await {
                    Ok(Ok(_)) => return Ok(()),
                    Ok(Err(_)) | Err(_) => {
                        repubs += 1;
                        if repubs > self.config.max_repubs {
                            self.reconnect_signal.notify_one();
                            break; // restart the outer loop with a fresh packet id
                        }
                    }
                }
            }
        }
    }

    /// Subscribe to one or more topic filters and remember them so they
    /// survive a reconnect.
    ///
    /// # Errors
    /// Returns [`ErrorKind::NotConnected`] if no serializer lock is live,
    /// or [`ErrorKind::Timeout`] if no SUBACK arrives within `response_time`.
    pub async fn subscribe(&self, topics: Vec<SubscribeTopic>) -> Result<(), Error> {
        let writer = self.current_writer().await?;
        let packet_id = self.session.lock().await.alloc_packet_id();
        let packet = SubscribePacket::new(packet_id, topics.clone())?;

        let rx = {
            let mut session = self.session.lock().await;
            session.waiters.register_suback(packet_id)
        };
        {
            let mut writer = writer.lock().await;
            write_packet(&mut *writer, &packet).await?;
        }

        match timeout(self.config.response_time(), rx).await {
            Ok(Ok(_ack)) => {
                let mut session = self.session.lock().await;
                for t in topics {
                    session.subscriptions.push(Subscription {
                        topic: t.topic,
                        qos: t.qos,
                    });
                }
                Ok(())
            }
            Ok(Err(_)) | Err(_) => Err(Error::new(ErrorKind::Timeout, "no SUBACK within response_time")),
        }
    }

    /// Unsubscribe from one or more topic filters.
    ///
    /// # Errors
    /// Returns [`ErrorKind::NotConnected`] if no serializer lock is live,
    /// or [`ErrorKind::Timeout`] if no UNSUBACK arrives within `response_time`.
    pub async fn unsubscribe(&self, topics: Vec<String>) -> Result<(), Error> {
        let writer = self.current_writer().await?;
        let packet_id = self.session.lock().await.alloc_packet_id();
        let packet = UnsubscribePacket::new(packet_id, topics.clone())?;

        let rx = {
            let mut session = self.session.lock().await;
            session.waiters.register_unsuback(packet_id)
        };
        {
            let mut writer = writer.lock().await;
            write_packet(&mut *writer, &packet).await?;
        }

        match timeout(self.config.response_time(), rx).await {
            Ok(Ok(_packet_id)) => {
                let mut session = self.session.lock().await;
                session.subscriptions.retain(|s| !topics.contains(&s.topic));
                Ok(())
            }
            Ok(Err(_)) | Err(_) => Err(Error::new(ErrorKind::Timeout, "no UNSUBACK within response_time")),
        }
    }

    /// Send DISCONNECT, which suppresses the will message, then tear the
    /// client down for good -- terminal, exactly like [`Client::close`],
    /// never auto-reconnecting. Every other method on this client returns
    /// [`ErrorKind::NotConnected`] afterward.
    ///
    /// # Errors
    /// Returns [`ErrorKind::NotConnected`] if no serializer lock is live.
    pub async fn disconnect(&self) -> Result<(), Error> {
        let writer = self.current_writer().await?;
        {
            let mut writer = writer.lock().await;
            write_packet(&mut *writer, &DisconnectPacket::new()).await?;
        }
        self.shutdown();
        Ok(())
    }

    /// Stop the supervisor task permanently without sending DISCONNECT,
    /// so the will message (if any) still fires at the broker. No further
    /// reconnect is attempted and every method on this client starts
    /// returning [`ErrorKind::NotConnected`].
    pub fn close(self) {
        self.shutdown();
    }

    /// Mark the client closed and abort the supervisor task. Shared by
    /// [`Client::disconnect`] and [`Client::close`] so a deliberate
    /// disconnect can never be mistaken by the supervisor for the
    /// QoS-1-exhausted forced-reconnect signal -- it never reaches the
    /// supervisor's reconnect loop at all.
    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.supervisor_handle.abort();
    }

    async fn current_writer(&self) -> Result<Arc<Mutex<WriteHalf<C::Stream>>>, Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::NotConnected, "client has been disconnected"));
        }
        self.writer_slot
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::NotConnected, "no live connection"))
    }
}

fn will_from_config(will: WillConfig) -> Result<LastWill, Error> {
    let qos = QoS::try_from(will.qos)
        .map_err(|_| Error::new(ErrorKind::InvalidArgument, "last will QoS must be 0 or 1"))?;
    Ok(LastWill {
        topic: will.topic,
        message: will.message.into_bytes(),
        qos,
        retain: will.retain,
    })
}
