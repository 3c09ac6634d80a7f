//! Shared fixtures for the end-to-end scenarios.

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use futures::StreamExt;
use rsocket::{
    handler::{service_handler_from_fn, PayloadSource},
    ClientError,
    Payload,
    RSocketClient,
    RSocketError,
    RSocketServer,
    Responder,
    SessionServiceHandler,
    SetupParameters,
    StreamId,
    TcpConnectionFactory,
};
use rsocket::connection::PayloadStream;
use tokio::time::{timeout, Duration};

/// Maps a request naming someone into a bounded stream of greetings, the
/// shape the resumption demos use.
pub struct HelloStreamResponder;

impl Responder for HelloStreamResponder {
    fn handle_request_stream(
        &self,
        payload: Payload,
        _stream_id: StreamId,
    ) -> Result<PayloadSource, RSocketError> {
        let name = payload.data_utf8();
        Ok(Box::pin(futures::stream::iter(
            (1..=1000).map(move |i| Ok(Payload::from(format!("Hello {name} {i}!")))),
        )))
    }
}

/// A server that retains resumable sessions.
pub async fn start_resumable_server() -> (RSocketServer, SocketAddr) {
    let handler = Arc::new(SessionServiceHandler::new(Arc::new(HelloStreamResponder)));
    let server = RSocketServer::bind("127.0.0.1:0", handler)
        .await
        .expect("bind server");
    let addr = server.local_addr().expect("tcp server has an address");
    (server, addr)
}

/// A server that serves streams but retains nothing, so every resumption
/// attempt is rejected.
pub async fn start_plain_server() -> (RSocketServer, SocketAddr) {
    let handler = service_handler_from_fn(|_setup| {
        Ok(Arc::new(HelloStreamResponder) as Arc<dyn Responder>)
    });
    let server = RSocketServer::bind("127.0.0.1:0", handler)
        .await
        .expect("bind server");
    let addr = server.local_addr().expect("tcp server has an address");
    (server, addr)
}

pub async fn connect_client(addr: SocketAddr, resumable: bool) -> Result<RSocketClient, ClientError> {
    let params = if resumable {
        SetupParameters::resumable()
    } else {
        SetupParameters::default()
    };
    RSocketClient::connect(Arc::new(TcpConnectionFactory::new(addr.to_string())), params).await
}

/// Consume exactly `n` payloads as UTF-8 strings, failing on errors,
/// early completion, or a stall.
pub async fn take_values(stream: &mut PayloadStream, n: usize) -> Vec<String> {
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        let item = timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a payload")
            .expect("stream completed early")
            .expect("stream errored");
        values.push(item.data_utf8());
    }
    values
}

/// The expected greeting sequence for `name`, values `1..=n`.
pub fn greetings(name: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("Hello {name} {i}!")).collect()
}

/// Assert the stream yields no further value and no error: it may stall
/// (no credit) or end (canceled/completed), but never produce.
pub async fn assert_no_more_values(stream: &mut PayloadStream) {
    match timeout(Duration::from_millis(200), stream.next()).await {
        Err(_elapsed) => {}
        Ok(None) => {}
        Ok(Some(Ok(payload))) => panic!("unexpected value {:?}", payload.data_utf8()),
        Ok(Some(Err(error))) => panic!("unexpected stream error {error}"),
    }
}
