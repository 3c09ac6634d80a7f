//! TCP transport glue.

use std::io;

use async_trait::async_trait;
use tokio::net::{TcpStream, ToSocketAddrs};

use super::{
    split_byte_stream, BoxDuplexConnection, BoxFrameSink, BoxFrameSource, ConnectionFactory,
    DuplexConnection,
};

/// A TCP duplex connection. TCP has no native framing, so frames gain a
/// 3-byte length prefix on this transport.
pub struct TcpConnection {
    stream: TcpStream,
}

impl TcpConnection {
    /// Dial `addr`.
    ///
    /// # Errors
    ///
    /// Propagates connection errors from the socket layer.
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Wrap an accepted stream.
    #[must_use]
    pub fn from_stream(stream: TcpStream) -> Self { Self { stream } }
}

impl DuplexConnection for TcpConnection {
    fn split(self: Box<Self>) -> (BoxFrameSink, BoxFrameSource) {
        split_byte_stream(self.stream)
    }

    fn is_framed(&self) -> bool { false }
}

/// Dials TCP connections to a fixed address.
#[derive(Clone, Debug)]
pub struct TcpConnectionFactory {
    addr: String,
}

impl TcpConnectionFactory {
    /// A factory for `addr` (`host:port`).
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self { Self { addr: addr.into() } }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    async fn connect(&self) -> io::Result<BoxDuplexConnection> {
        let connection = TcpConnection::connect(self.addr.as_str()).await?;
        Ok(Box::new(connection))
    }
}
