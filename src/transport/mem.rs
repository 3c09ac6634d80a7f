//! In-memory duplex pair and listener, used by tests and the demo.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{
    BoxDuplexConnection, BoxFrameSink, BoxFrameSource, ConnectionFactory, DuplexConnection,
    FrameSink, FrameSource,
};

const CHANNEL_CAPACITY: usize = 64;

/// One end of an in-memory duplex pair. Natively framed.
pub struct MemConnection {
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

impl MemConnection {
    /// Create a connected pair of ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { tx: tx_a, rx: rx_b }, Self { tx: tx_b, rx: rx_a })
    }
}

impl DuplexConnection for MemConnection {
    fn split(self: Box<Self>) -> (BoxFrameSink, BoxFrameSource) {
        (Box::new(MemSink(self.tx)), Box::new(MemSource(self.rx)))
    }

    fn is_framed(&self) -> bool { true }
}

struct MemSink(mpsc::Sender<Bytes>);

#[async_trait]
impl FrameSink for MemSink {
    async fn send(&mut self, frame: Bytes) -> io::Result<()> {
        self.0
            .send(frame)
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))
    }
}

struct MemSource(mpsc::Receiver<Bytes>);

#[async_trait]
impl FrameSource for MemSource {
    async fn next_frame(&mut self) -> io::Result<Option<Bytes>> { Ok(self.0.recv().await) }
}

/// Accepts in-memory connections dialed through a [`MemConnector`].
pub struct MemListener {
    incoming: mpsc::Receiver<MemConnection>,
}

impl MemListener {
    /// Next inbound connection, or `None` once every connector is dropped.
    pub async fn accept(&mut self) -> Option<MemConnection> { self.incoming.recv().await }
}

/// Dials connections into a [`MemListener`].
#[derive(Clone)]
pub struct MemConnector {
    accept_tx: mpsc::Sender<MemConnection>,
}

/// Create a listener plus a connector dialing into it.
#[must_use]
pub fn mem_listener() -> (MemListener, MemConnector) {
    let (accept_tx, incoming) = mpsc::channel(CHANNEL_CAPACITY);
    (MemListener { incoming }, MemConnector { accept_tx })
}

#[async_trait]
impl ConnectionFactory for MemConnector {
    async fn connect(&self) -> io::Result<BoxDuplexConnection> {
        let (local, remote) = MemConnection::pair();
        self.accept_tx
            .send(remote)
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        Ok(Box::new(local))
    }
}
