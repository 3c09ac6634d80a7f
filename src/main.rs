//! Demo binary: a hello-stream server and a warm-resuming client.

mod cli;

use std::{error::Error, sync::Arc};

use clap::Parser;
use futures::StreamExt;
use rsocket::{
    handler::PayloadSource,
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

/// Maps each request to a bounded greeting stream.
struct HelloStreamResponder;

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

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // The library logs through the `log` facade; give those records a sink
    // for the demo. Embedding applications install their own logger.
    env_logger::init();

    match cli::Cli::parse().command {
        cli::Command::Serve { port } => serve(port).await,
        cli::Command::Stream { host, port, name } => stream(&format!("{host}:{port}"), &name).await,
    }
}

async fn serve(port: u16) -> Result<(), Box<dyn Error>> {
    let handler = Arc::new(SessionServiceHandler::new(Arc::new(HelloStreamResponder)));
    let server = RSocketServer::bind(("0.0.0.0", port), handler).await?;
    println!("serving hello streams on port {port}");
    futures::future::pending::<()>().await;
    drop(server);
    Ok(())
}

async fn stream(addr: &str, name: &str) -> Result<(), Box<dyn Error>> {
    let factory = Arc::new(TcpConnectionFactory::new(addr));
    let client = RSocketClient::connect(factory, SetupParameters::resumable()).await?;

    let mut values = client.request_stream(Payload::from(name));
    values.request_n(7);
    let mut received = 0u32;
    while received < 3 {
        match values.next().await {
            Some(Ok(payload)) => {
                received += 1;
                println!("{}", payload.data_utf8());
            }
            Some(Err(error)) => return Err(error.into()),
            None => return Ok(()),
        }
    }

    println!("... disconnecting mid-stream");
    client.disconnect("demo-triggered disconnect").await;

    match client.resume().await {
        Ok(()) => println!("... resumed"),
        Err(error) => {
            println!("resumption failed: {error}");
            return Ok(());
        }
    }

    values.request_n(3);
    while received < 10 {
        match values.next().await {
            Some(Ok(payload)) => {
                received += 1;
                println!("{}", payload.data_utf8());
            }
            Some(Err(error)) => return Err(error.into()),
            None => break,
        }
    }
    values.cancel();
    client.close("demo finished");
    Ok(())
}
