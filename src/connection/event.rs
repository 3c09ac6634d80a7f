//! Events driving a connection's executor.
//!
//! All mutation of connection state happens on the actor task; every public
//! operation and every transport or producer task posts one of these.

use std::io;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::{RSocketError, ResumeError, StreamError},
    frame::StreamId,
    handler::PayloadSource,
    payload::Payload,
    setup::ResumeParameters,
    transport::BoxDuplexConnection,
};

/// Sender half of a connection's event channel.
pub type EventSender = mpsc::UnboundedSender<Event>;
/// Receiver half of a connection's event channel.
pub(crate) type EventReceiver = mpsc::UnboundedReceiver<Event>;
/// Sink used to deliver stream items to an application consumer.
pub(crate) type PayloadSink = mpsc::UnboundedSender<Result<Payload, StreamError>>;

/// Decision hook evaluated during a server-side resume handshake.
pub type CanResumeFn = Box<dyn FnOnce(&[StreamId], &[StreamId]) -> bool + Send>;

/// Demand and cancellation signals from an application stream handle.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ControlCmd {
    /// Grant `n` more inbound payloads.
    RequestN(u32),
    /// Abandon the stream.
    Cancel,
}

/// Signals from a local producer pump feeding a stream.
pub(crate) enum LocalItem {
    /// The producer emitted a payload (one credit permit was consumed).
    Next(Payload),
    /// The producer finished.
    Complete,
    /// The producer failed.
    Error(RSocketError),
    /// A request/response handler resolved.
    Response(Result<Payload, RSocketError>),
}

/// An input for the connection actor.
pub enum Event {
    /// A frame arrived from the transport tagged with its generation.
    InboundFrame {
        generation: u64,
        bytes: Bytes,
    },
    /// The transport's reader or writer ended.
    TransportClosed {
        generation: u64,
        error: Option<io::Error>,
    },
    /// Fire-and-forget request from the application.
    Fnf { payload: Payload },
    /// Request/response from the application.
    Request {
        payload: Payload,
        reply: oneshot::Sender<Result<Payload, StreamError>>,
    },
    /// Open a requested stream; the initial frame follows the first
    /// request-n on `control`.
    OpenStream {
        payload: Payload,
        sink: PayloadSink,
        control: mpsc::UnboundedReceiver<ControlCmd>,
    },
    /// Open a channel fed by `source`.
    OpenChannel {
        source: PayloadSource,
        sink: PayloadSink,
        control: mpsc::UnboundedReceiver<ControlCmd>,
    },
    /// Demand or cancellation for a live stream.
    StreamControl {
        stream_id: StreamId,
        cmd: ControlCmd,
    },
    /// Local producer progress for a live stream.
    StreamLocal {
        stream_id: StreamId,
        item: LocalItem,
    },
    /// Connection-scoped metadata push.
    MetadataPush { metadata: Bytes },
    /// Client-side warm resume onto a fresh transport.
    Resume {
        transport: BoxDuplexConnection,
        reply: oneshot::Sender<Result<(), ResumeError>>,
    },
    /// Server-side resume handshake for an adopted session.
    ServerResume {
        transport: BoxDuplexConnection,
        params: ResumeParameters,
        can_resume: CanResumeFn,
        reply: oneshot::Sender<bool>,
    },
    /// Detach the transport, keeping streams when resumable.
    Disconnect {
        reason: String,
        done: oneshot::Sender<()>,
    },
    /// Terminal teardown.
    Close { reason: String },
}
