// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::time::Instant;

use tokio::sync::oneshot;

use mqtt_codec::{PacketId, QoS, SubscribeAckPacket};

use crate::status::ConnectivityState;

/// One slot per exchange kind. The session only ever has a single
/// SUBSCRIBE, UNSUBSCRIBE or PUBLISH(QoS1) exchange in flight at a time,
/// so a waiter is an `Option`, never a map keyed by packet id. CONNACK is
/// not among these: the handshake reads it directly off the wire before
/// the dispatcher ever starts (see `supervisor::connect_once`), so a
/// CONNACK the dispatcher sees is by definition out of place.
#[derive(Default)]
pub struct Waiters {
    puback: Option<(PacketId, oneshot::Sender<PacketId>)>,
    suback: Option<(PacketId, oneshot::Sender<SubscribeAckPacket>)>,
    unsuback: Option<(PacketId, oneshot::Sender<PacketId>)>,
    pingresp: Option<oneshot::Sender<()>>,
}

impl Waiters {
    pub fn register_puback(&mut self, packet_id: PacketId) -> oneshot::Receiver<PacketId> {
        let (tx, rx) = oneshot::channel();
        self.puback = Some((packet_id, tx));
        rx
    }

    pub fn resolve_puback(&mut self, packet_id: PacketId) {
        if let Some((expected, _)) = &self.puback {
            if *expected == packet_id {
                if let Some((_, tx)) = self.puback.take() {
                    let _ = tx.send(packet_id);
                }
            }
        }
    }

    pub fn register_suback(&mut self, packet_id: PacketId) -> oneshot::Receiver<SubscribeAckPacket> {
        let (tx, rx) = oneshot::channel();
        self.suback = Some((packet_id, tx));
        rx
    }

    pub fn resolve_suback(&mut self, packet: SubscribeAckPacket) {
        if let Some((expected, _)) = &self.suback {
            if *expected == packet.packet_id() {
                if let Some((_, tx)) = self.suback.take() {
                    let _ = tx.send(packet);
                }
            }
        }
    }

    pub fn register_unsuback(&mut self, packet_id: PacketId) -> oneshot::Receiver<PacketId> {
        let (tx, rx) = oneshot::channel();
        self.unsuback = Some((packet_id, tx));
        rx
    }

    pub fn resolve_unsuback(&mut self, packet_id: PacketId) {
        if let Some((expected, _)) = &self.unsuback {
            if *expected == packet_id {
                if let Some((_, tx)) = self.unsuback.take() {
                    let _ = tx.send(packet_id);
                }
            }
        }
    }

    pub fn register_pingresp(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pingresp = Some(tx);
        rx
    }

    pub fn resolve_pingresp(&mut self) {
        if let Some(tx) = self.pingresp.take() {
            let _ = tx.send(());
        }
    }

    /// Drop every outstanding waiter, e.g. when the transport drops and a
    /// reconnect is about to allocate fresh packet ids.
    pub fn clear(&mut self) {
        self.puback = None;
        self.suback = None;
        self.unsuback = None;
        self.pingresp = None;
    }
}

/// A subscription the session must restore after a reconnect, since the
/// broker forgets them when `clean_session` tore down the prior one.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
}

/// Session-local bookkeeping, guarded by its own lock so the dispatcher
/// can update packet-id/subscription/timestamp state without contending
/// with whichever task currently holds the serializer lock.
pub struct SessionState {
    next_pid: PacketId,
    pub subscriptions: Vec<Subscription>,
    pub connectivity: ConnectivityState,
    pub last_rx: Instant,
    pub last_tx: Instant,
    pub waiters: Waiters,

    /// Set once the first CONNACK is ever accepted. Unlike `connectivity`,
    /// this never reverts to its initial value, since it answers "has this
    /// client run before" rather than "is it connected right now" -- the
    /// distinction `clean_init` vs. `clean` needs across reconnects.
    pub has_connected_once: bool,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            next_pid: PacketId::new(1),
            subscriptions: Vec::new(),
            connectivity: ConnectivityState::Down,
            last_rx: now,
            last_tx: now,
            waiters: Waiters::default(),
            has_connected_once: false,
        }
    }

    pub fn alloc_packet_id(&mut self) -> PacketId {
        let pid = self.next_pid;
        self.next_pid = self.next_pid.next();
        pid
    }

    pub fn note_rx(&mut self) {
        self.last_rx = Instant::now();
    }

    pub fn note_tx(&mut self) {
        self.last_tx = Instant::now();
    }

    /// Forget in-flight waiters and ack-wait state around a reconnect. The
    /// subscription registry is intentionally left untouched: it is the
    /// list to resubscribe, not a cache of what the broker still knows.
    pub fn reset_for_reconnect(&mut self) {
        self.waiters.clear();
        self.connectivity = ConnectivityState::Down;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_id_allocation_never_yields_zero() {
        let mut session = SessionState::new();
        for _ in 0..3 {
            assert_ne!(session.alloc_packet_id(), PacketId::new(0));
        }
    }

    #[test]
    fn packet_id_allocation_starts_at_one_and_is_monotonic() {
        let mut session = SessionState::new();
        assert_eq!(session.alloc_packet_id(), PacketId::new(1));
        assert_eq!(session.alloc_packet_id(), PacketId::new(2));
        assert_eq!(session.alloc_packet_id(), PacketId::new(3));
    }

    #[test]
    fn reconnect_resets_connectivity_but_keeps_subscriptions_and_history() {
        let mut session = SessionState::new();
        session.subscriptions.push(Subscription {
            topic: "a/b".to_string(),
            qos: QoS::AtLeastOnce,
        });
        session.has_connected_once = true;
        session.connectivity = ConnectivityState::Connected;

        session.reset_for_reconnect();

        assert_eq!(session.connectivity, ConnectivityState::Down);
        assert!(session.has_connected_once);
        assert_eq!(session.subscriptions.len(), 1);
    }
}
