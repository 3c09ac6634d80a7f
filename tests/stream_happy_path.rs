//! Scenario: a credited hello stream consumed in two demand batches, then
//! canceled.

mod common;

use std::sync::Arc;

use rsocket::{
    transport::mem_listener,
    Payload,
    RSocketClient,
    RSocketServer,
    SessionServiceHandler,
    SetupParameters,
};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn ten_ordered_values_across_two_credit_batches() {
    let (_server, addr) = common::start_resumable_server().await;
    let client = common::connect_client(addr, false).await.expect("connect");

    let mut values = client.request_stream(Payload::from("Jane"));
    values.request_n(7);

    let mut received = common::take_values(&mut values, 3).await;
    // Demand three more once at least three values have arrived.
    values.request_n(3);
    received.extend(common::take_values(&mut values, 7).await);

    assert_eq!(received, common::greetings("Jane", 10));

    values.cancel();
    // The stream is gone on both sides: further demand yields nothing.
    values.request_n(50);
    common::assert_no_more_values(&mut values).await;

    // The connection survives the canceled stream.
    let mut second = client.request_stream(Payload::from("Joe"));
    second.request_n(2);
    assert_eq!(
        common::take_values(&mut second, 2).await,
        common::greetings("Joe", 2)
    );
}

#[tokio::test]
async fn hello_stream_over_the_in_memory_transport() {
    let (listener, connector) = mem_listener();
    let handler = Arc::new(SessionServiceHandler::new(Arc::new(
        common::HelloStreamResponder,
    )));
    let _server = RSocketServer::serve_mem(listener, handler);

    let client = RSocketClient::connect(Arc::new(connector), SetupParameters::default())
        .await
        .expect("connect");
    let mut values = client.request_stream(Payload::from("Jane"));
    values.request_n(3);
    assert_eq!(
        common::take_values(&mut values, 3).await,
        common::greetings("Jane", 3)
    );
}
