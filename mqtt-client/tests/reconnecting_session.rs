// Copyright (c) 2022 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Drives a real client against an in-process mock broker over TCP,
//! exercising the handshake, QoS-1 delivery, subscription bookkeeping
//! and the reconnect path after a dropped link.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

use mqtt_codec::{
    ByteArray, ConnectAckPacket, ConnectPacket, ConnectReturnCode, DecodePacket, EncodePacket, FixedHeader,
    PacketType, PublishAckPacket, PublishPacket, QoS, SubscribeAckPacket, SubscribeAck, SubscribePacket,
    SubscribeTopic,
};
use mqtt_client::{Client, ClientConfigBuilder, ErrorKind, WillConfig};

async fn read_framed(stream: &mut TcpStream) -> Vec<u8> {
    use tokio::io::AsyncReadExt;

    let mut buf = vec![0_u8; 1];
    stream.read_exact(&mut buf).await.unwrap();
    loop {
        let mut byte = [0_u8; 1];
        stream.read_exact(&mut byte).await.unwrap();
        let more = byte[0] & 0x80 != 0;
        buf.push(byte[0]);
        if !more {
            break;
        }
    }
    let mut ba = ByteArray::new(&buf);
    let remaining = FixedHeader::decode(&mut ba).unwrap().remaining_length();
    let mut body = vec![0_u8; remaining];
    if remaining > 0 {
        stream.read_exact(&mut body).await.unwrap();
    }
    buf.extend_from_slice(&body);
    buf
}

async fn write_framed<P: EncodePacket>(stream: &mut TcpStream, packet: &P) {
    use tokio::io::AsyncWriteExt;
    let mut buf = Vec::new();
    packet.encode(&mut buf).unwrap();
    stream.write_all(&buf).await.unwrap();
}

/// Accept one connection, perform the CONNECT/CONNACK handshake, then
/// answer whatever comes next until the socket is dropped.
async fn run_mock_broker(listener: TcpListener, drop_after_first_session: bool) {
    loop {
        let (mut stream, _) = listener.accept().await.unwrap();

        let buf = read_framed(&mut stream).await;
        let mut ba = ByteArray::new(&buf);
        let _connect = ConnectPacket::decode(&mut ba).unwrap();
        write_framed(&mut stream, &ConnectAckPacket::new(false, ConnectReturnCode::Accepted)).await;

        if drop_after_first_session {
            // Simulate the link vanishing mid-session: the dispatcher's
            // next read sees EOF and the supervisor reconnects against
            // this same listener's next `accept()`.
            drop(stream);
            continue;
        }

        loop {
            let buf = match tokio::time::timeout(Duration::from_secs(5), read_framed(&mut stream)).await {
                Ok(buf) => buf,
                Err(_) => break,
            };
            let mut ba = ByteArray::new(&buf);
            let Ok(fixed_header) = FixedHeader::decode(&mut ba) else {
                break;
            };
            match fixed_header.packet_type() {
                PacketType::Publish { qos: QoS::AtLeastOnce, .. } => {
                    let mut ba = ByteArray::new(&buf);
                    let packet = PublishPacket::decode(&mut ba).unwrap();
                    write_framed(&mut stream, &PublishAckPacket::new(packet.packet_id().unwrap())).await;
                }
                PacketType::Subscribe => {
                    let mut ba = ByteArray::new(&buf);
                    let packet = SubscribePacket::decode(&mut ba).unwrap();
                    let acks = packet.topics().iter().map(|t| SubscribeAck::Granted(t.qos)).collect();
                    write_framed(&mut stream, &SubscribeAckPacket::new(packet.packet_id(), acks)).await;
                }
                PacketType::Disconnect => break,
                _ => {}
            }
        }
    }
}

#[tokio::test]
async fn connects_publishes_and_subscribes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(run_mock_broker(listener, false));

    let config = ClientConfigBuilder::new("127.0.0.1")
        .port(port)
        .client_id("test-client")
        .response_time_secs(2)
        .build();
    let client = Client::connect(config).await.unwrap();

    wait_until_connected(&client).await;

    client
        .publish("sensors/temp", QoS::AtMostOnce, &b"21.0"[..], false)
        .await
        .unwrap();

    client
        .publish("sensors/temp", QoS::AtLeastOnce, &b"21.5"[..], false)
        .await
        .unwrap();

    client
        .subscribe(vec![SubscribeTopic {
            topic: "sensors/+".to_string(),
            qos: QoS::AtLeastOnce,
        }])
        .await
        .unwrap();
}

#[tokio::test]
async fn reconnects_after_transport_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(run_mock_broker(listener, true));

    let config = ClientConfigBuilder::new("127.0.0.1")
        .port(port)
        .client_id("test-client-2")
        .response_time_secs(2)
        .build();
    let client = Client::connect(config).await.unwrap();

    wait_until_connected(&client).await;
    wait_until_disconnected(&client).await;
    wait_until_connected(&client).await;
}

#[tokio::test]
async fn initial_connect_fails_when_nothing_is_listening() {
    // Bind and immediately drop, so the port is very likely refused; no
    // supervisor is running yet to retry this on our behalf.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = ClientConfigBuilder::new("127.0.0.1")
        .port(port)
        .client_id("test-client-3")
        .response_time_secs(1)
        .build();

    let err = Client::connect(config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoError);
}

#[tokio::test]
async fn disconnect_is_terminal_and_never_auto_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(run_mock_broker(listener, false));

    let config = ClientConfigBuilder::new("127.0.0.1")
        .port(port)
        .client_id("test-client-4")
        .response_time_secs(2)
        .build();
    let client = Client::connect(config).await.unwrap();
    wait_until_connected(&client).await;

    client.disconnect().await.unwrap();
    assert!(!client.is_connected().await);

    let err = client
        .publish("sensors/temp", QoS::AtMostOnce, &b"21.0"[..], false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);

    let err = client
        .subscribe(vec![SubscribeTopic {
            topic: "sensors/+".to_string(),
            qos: QoS::AtLeastOnce,
        }])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);

    // No auto-reconnect: staying disconnected well past any backoff delay.
    sleep(Duration::from_millis(800)).await;
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn will_is_sent_on_connect_and_survives_a_timeout_triggered_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (seen_will_tx, seen_will_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(run_mock_broker_capturing_will(listener, seen_will_tx));

    let config = ClientConfigBuilder::new("127.0.0.1")
        .port(port)
        .client_id("test-client-5")
        .keepalive_secs(1)
        .ping_interval_secs(1)
        .response_time_secs(1)
        .will(WillConfig {
            topic: "t/dead".to_string(),
            message: "bye".to_string(),
            retain: false,
            qos: 0,
        })
        .build();
    let client = Client::connect(config).await.unwrap();

    let will = seen_will_rx.await.unwrap();
    assert_eq!(will.0, "t/dead");
    assert_eq!(will.1, b"bye");

    // The mock broker never answers PINGREQ, so the pinger's deadline
    // fires and the supervisor reconnects -- without ever having sent
    // DISCONNECT, exactly the case in which the will must fire broker-side.
    wait_until_disconnected(&client).await;
    wait_until_connected(&client).await;
}

/// Like `run_mock_broker`, but reports the first CONNECT's will fields
/// (if any) and then never answers anything else, so a keepalive-driven
/// client eventually times out waiting for PINGRESP.
async fn run_mock_broker_capturing_will(
    listener: TcpListener,
    seen_will_tx: tokio::sync::oneshot::Sender<(String, Vec<u8>)>,
) {
    let mut seen_will_tx = Some(seen_will_tx);
    loop {
        let (mut stream, _) = listener.accept().await.unwrap();

        let buf = read_framed(&mut stream).await;
        let mut ba = ByteArray::new(&buf);
        let connect = ConnectPacket::decode(&mut ba).unwrap();
        if let (Some(tx), Some(will)) = (seen_will_tx.take(), connect.will()) {
            let _ = tx.send((will.topic.clone(), will.message.clone()));
        }
        write_framed(&mut stream, &ConnectAckPacket::new(false, ConnectReturnCode::Accepted)).await;

        // Never answer PINGREQ or anything else; let the stream idle until
        // the client's own deadline gives up on it.
        loop {
            if tokio::time::timeout(Duration::from_secs(10), read_framed(&mut stream))
                .await
                .is_err()
            {
                break;
            }
        }
    }
}

async fn wait_until_connected(client: &Client) {
    for _ in 0..200 {
        if client.is_connected().await {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("client never reached Connected state");
}

async fn wait_until_disconnected(client: &Client) {
    for _ in 0..200 {
        if !client.is_connected().await {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("client never left Connected state after the transport dropped");
}
