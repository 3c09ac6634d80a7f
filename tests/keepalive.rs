//! Keepalive scenarios: flag mismatch closing the connection, lifetime
//! expiry against a mute server, and steady-state liveness.

mod common;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use rsocket::{
    ConnectionEvents,
    Frame,
    FrameCodec,
    Payload,
    RSocketClient,
    SetupParameters,
    TcpConnectionFactory,
};
use serial_test::serial;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};

/// Records lifecycle transitions for assertions.
struct RecordingEvents {
    closed: mpsc::UnboundedSender<String>,
    disconnected: mpsc::UnboundedSender<String>,
}

impl ConnectionEvents for RecordingEvents {
    fn on_disconnected(&self, reason: &str) { let _ = self.disconnected.send(reason.to_owned()); }

    fn on_closed(&self, reason: &str) { let _ = self.closed.send(reason.to_owned()); }
}

/// Read one length-prefixed frame from a raw socket.
async fn read_frame(stream: &mut TcpStream) -> Bytes {
    let mut len = [0u8; 3];
    stream.read_exact(&mut len).await.expect("length prefix");
    let len = usize::from(len[0]) << 16 | usize::from(len[1]) << 8 | usize::from(len[2]);
    let mut frame = vec![0u8; len];
    stream.read_exact(&mut frame).await.expect("frame body");
    Bytes::from(frame)
}

/// Write one length-prefixed frame to a raw socket.
async fn write_frame(stream: &mut TcpStream, frame: Bytes) {
    let len = frame.len();
    let prefix = [(len >> 16) as u8, (len >> 8) as u8, len as u8];
    stream.write_all(&prefix).await.expect("length prefix");
    stream.write_all(&frame).await.expect("frame body");
}

#[tokio::test]
#[serial]
async fn client_closes_when_keepalive_carries_the_respond_flag() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    // A hostile server that answers SETUP with a RESPOND-flagged keepalive,
    // which only clients may send.
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let setup = read_frame(&mut stream).await;
        let codec = FrameCodec::autodetect(&setup).expect("detect");
        write_frame(
            &mut stream,
            codec.encode(&Frame::Keepalive {
                respond: true,
                position: 0,
                data: Bytes::new(),
            }),
        )
        .await;
        stream
    });

    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    let (disconnected_tx, _disconnected_rx) = mpsc::unbounded_channel();
    let client = RSocketClient::connect_with(
        Arc::new(TcpConnectionFactory::new(addr.to_string())),
        SetupParameters::default(),
        Arc::new(rsocket::NoopResponder),
        Arc::new(RecordingEvents {
            closed: closed_tx,
            disconnected: disconnected_tx,
        }),
    )
    .await
    .expect("connect");

    let reason = timeout(Duration::from_secs(5), closed_rx.recv())
        .await
        .expect("close within deadline")
        .expect("close reason");
    assert_eq!(reason, "client received keepalive with respond flag");

    // The requester API degrades to errors, not panics.
    let error = client.request_response(Payload::from("late")).await;
    assert!(error.is_err());
    drop(server);
}

#[tokio::test]
#[serial]
async fn silent_server_trips_the_max_lifetime() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    // Accept, swallow SETUP, then never answer anything.
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let _setup = read_frame(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        stream
    });

    let (closed_tx, _closed_rx) = mpsc::unbounded_channel();
    let (disconnected_tx, mut disconnected_rx) = mpsc::unbounded_channel();
    let params = SetupParameters {
        keepalive_time: Duration::from_millis(50),
        max_lifetime: Duration::from_millis(250),
        ..SetupParameters::resumable()
    };
    let _client = RSocketClient::connect_with(
        Arc::new(TcpConnectionFactory::new(addr.to_string())),
        params,
        Arc::new(rsocket::NoopResponder),
        Arc::new(RecordingEvents {
            closed: closed_tx,
            disconnected: disconnected_tx,
        }),
    )
    .await
    .expect("connect");

    let reason = timeout(Duration::from_secs(5), disconnected_rx.recv())
        .await
        .expect("disconnect within deadline")
        .expect("disconnect reason");
    assert!(
        reason.contains("keepalive"),
        "expected a keepalive timeout, got: {reason}"
    );
    drop(server);
}

#[tokio::test]
#[serial]
async fn keepalives_hold_a_quiet_connection_open() {
    let (_server, addr) = common::start_resumable_server().await;
    let params = SetupParameters {
        keepalive_time: Duration::from_millis(50),
        max_lifetime: Duration::from_millis(400),
        ..SetupParameters::default()
    };
    let client = RSocketClient::connect(
        Arc::new(TcpConnectionFactory::new(addr.to_string())),
        params,
    )
    .await
    .expect("connect");

    // Stay idle well past the max lifetime; server echoes keep us alive.
    tokio::time::sleep(Duration::from_millis(900)).await;

    let mut values = client.request_stream(Payload::from("Jane"));
    values.request_n(2);
    assert_eq!(
        common::take_values(&mut values, 2).await,
        common::greetings("Jane", 2)
    );
}
