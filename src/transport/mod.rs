//! Duplex frame transports and framing glue.
//!
//! The protocol layer speaks whole frames over a [`DuplexConnection`]: an
//! ordered, reliable, frame-preserving duplex pipe. Byte-stream transports
//! (TCP) gain frame boundaries here through a 3-byte big-endian length
//! prefix; message transports (the in-memory pair) are natively framed and
//! report `is_framed() == true`.

mod mem;
mod tcp;

pub use mem::{mem_listener, MemConnection, MemConnector, MemListener};
pub use tcp::{TcpConnection, TcpConnectionFactory};

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Largest frame accepted on the wire (16 MiB, the length prefix ceiling).
pub const MAX_FRAME_LEN: usize = 0x00FF_FFFF;

/// Write half of a duplex connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one serialized frame.
    async fn send(&mut self, frame: Bytes) -> io::Result<()>;
}

/// Read half of a duplex connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame, or `None` on orderly shutdown.
    async fn next_frame(&mut self) -> io::Result<Option<Bytes>>;
}

/// Boxed write half.
pub type BoxFrameSink = Box<dyn FrameSink>;
/// Boxed read half.
pub type BoxFrameSource = Box<dyn FrameSource>;
/// Boxed duplex connection, as produced by a [`ConnectionFactory`].
pub type BoxDuplexConnection = Box<dyn DuplexConnection>;

/// An ordered, reliable, frame-preserving duplex pipe.
pub trait DuplexConnection: Send + 'static {
    /// Split into independently driven read and write halves.
    fn split(self: Box<Self>) -> (BoxFrameSink, BoxFrameSource);

    /// Whether the underlying transport preserves frame boundaries natively.
    /// When `false`, this layer owns the 3-byte length prefix.
    fn is_framed(&self) -> bool { false }
}

/// Dials fresh transports, so a client can both connect and later resume
/// onto a new connection.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open a new duplex connection to the peer.
    async fn connect(&self) -> io::Result<BoxDuplexConnection>;
}

/// A connection rebuilt from halves that were already split, used by the
/// acceptor after it has consumed the first frame.
pub(crate) struct SplitConnection {
    sink: BoxFrameSink,
    source: BoxFrameSource,
    framed: bool,
}

impl SplitConnection {
    pub(crate) fn new(sink: BoxFrameSink, source: BoxFrameSource, framed: bool) -> Self {
        Self {
            sink,
            source,
            framed,
        }
    }
}

impl DuplexConnection for SplitConnection {
    fn split(self: Box<Self>) -> (BoxFrameSink, BoxFrameSource) { (self.sink, self.source) }

    fn is_framed(&self) -> bool { self.framed }
}

fn length_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(3)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Split a byte stream into frame halves with the length-prefix codec.
pub(crate) fn split_byte_stream<T>(io: T) -> (BoxFrameSink, BoxFrameSource)
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (sink, source) = Framed::new(io, length_codec()).split();
    (
        Box::new(LengthPrefixedSink(sink)),
        Box::new(LengthPrefixedSource(source)),
    )
}

struct LengthPrefixedSink<T>(SplitSink<Framed<T, LengthDelimitedCodec>, Bytes>);

#[async_trait]
impl<T> FrameSink for LengthPrefixedSink<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&mut self, frame: Bytes) -> io::Result<()> { self.0.send(frame).await }
}

struct LengthPrefixedSource<T>(SplitStream<Framed<T, LengthDelimitedCodec>>);

#[async_trait]
impl<T> FrameSource for LengthPrefixedSource<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn next_frame(&mut self) -> io::Result<Option<Bytes>> {
        match self.0.next().await {
            Some(Ok(frame)) => Ok(Some(frame.freeze())),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }
}
