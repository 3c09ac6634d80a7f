//! An RSocket protocol core with warm resumption.
//!
//! This crate implements the connection and stream state machines of the
//! RSocket protocol — fire-and-forget, request/response, request/stream and
//! request/channel over any ordered, reliable, frame-preserving transport —
//! together with the resume manager that lets a session survive transport
//! loss: a new transport attaches, the peers exchange implied byte
//! positions, and in-flight streams continue without loss.
//!
//! The crate exposes three layers:
//! - [`client::RSocketClient`] / [`server::RSocketServer`]: embedding API.
//! - [`handler::Responder`] / [`handler::ServiceHandler`]: application hooks.
//! - [`transport`]: duplex transports (TCP, in-memory) and the framing glue
//!   for byte-stream transports.

mod acceptor;

pub mod client;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handler;
pub mod metrics;
pub mod payload;
pub mod registry;
pub mod resume;
pub mod server;
pub mod session;
pub mod setup;
pub mod stream;
pub mod transport;

pub use client::{ClientError, RSocketClient};
pub use connection::{ConnectionEvents, NoopConnectionEvents, PayloadStream, Status, StreamControlHandle};
pub use error::{ErrorCode, RSocketError, ResumeError, StreamError};
pub use frame::{Frame, FrameCodec, FrameType, ProtocolVersion, StreamId};
pub use handler::{NoopResponder, PayloadSource, Responder, ServiceHandler};
pub use payload::Payload;
pub use registry::ConnectionMode;
pub use resume::InMemoryResumeManager;
pub use server::RSocketServer;
pub use session::{ServerSessions, ServerState, SessionServiceHandler};
pub use setup::{ResumeToken, SetupParameters};
pub use transport::{
    ConnectionFactory, DuplexConnection, MemConnection, TcpConnection, TcpConnectionFactory,
};
