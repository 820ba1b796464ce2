// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::{interval, timeout};

use mqtt_codec::PingRequestPacket;

use crate::error::{Error, ErrorKind};
use crate::session::SessionState;
use crate::wire::write_packet;

/// Keepalive task. Not spawned at all when `ping_interval` resolves to
/// zero (see [`crate::config::ClientConfig::ping_interval`]), since a
/// zero-duration `interval()` would tick as fast as the scheduler allows.
///
/// Wakes every `ping_interval` but only actually pings when the link has
/// been idle for longer than `max(ping_interval, keepalive / 4)` -- ordinary
/// PUBLISH/PUBACK traffic already proves the link is alive and should not
/// be chased with redundant PINGREQs. Once a ping is sent, a PINGRESP is
/// awaited within `response_time`; a miss is treated as connection loss
/// and ends the task so the supervisor can reconnect.
pub async fn run<S>(
    writer: Arc<Mutex<WriteHalf<S>>>,
    session: Arc<Mutex<SessionState>>,
    ping_interval: Duration,
    keepalive: Duration,
    response_time: Duration,
) -> Error
where
    S: AsyncWrite + Send + 'static,
{
    let idle_threshold = ping_interval.max(keepalive / 4);
    let mut ticker = interval(ping_interval);
    ticker.tick().await; // first tick fires immediately; consume it

    loop {
        ticker.tick().await;

        let idle_for = session.lock().await.last_rx.elapsed();
        if idle_for < idle_threshold {
            continue;
        }

        let rx = {
            let mut session = session.lock().await;
            session.waiters.register_pingresp()
        };

        {
            let mut writer = writer.lock().await;
            if let Err(err) = write_packet(&mut *writer, &PingRequestPacket::new()).await {
                return err;
            }
        }
        {
            let mut session = session.lock().await;
            session.note_tx();
        }

        match timeout(response_time, rx).await {
            Ok(Ok(())) => {
                log::debug!("pinger: PINGRESP received");
            }
            Ok(Err(_)) | Err(_) => {
                return Error::new(ErrorKind::Timeout, "no PINGRESP within response_time");
            }
        }
    }
}
