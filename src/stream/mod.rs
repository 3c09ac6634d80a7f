//! Per-stream state machines for the four interaction kinds.
//!
//! Each live stream is one [`StreamMachine`] — a synchronous transition
//! core identified by `(kind, role)` — plus its runtime attachments: the
//! downstream sink feeding the application and the credit semaphore gating
//! its local producer, if it has one. Transition methods never block and
//! never touch the connection; they return [`StreamEffect`] lists that the
//! connection interprets (emit a frame, deliver a payload, grant credit,
//! terminate).

mod requester;
mod responder;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use log::debug;
use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::{
    error::{ErrorCode, RSocketError, StreamError},
    payload::Payload,
};

/// The four interaction kinds a stream can follow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    /// One request frame, no response.
    FireAndForget,
    /// One request, exactly one payload or error back.
    RequestResponse,
    /// One request, a credited stream of payloads back.
    Stream,
    /// Credited payload streams in both directions.
    Channel,
}

/// Which side of the stream this machine plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamRole {
    /// The side that opened the stream.
    Requester,
    /// The side answering it.
    Responder,
}

/// Common lifecycle skeleton shared by every kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Constructed, initial request not yet on the wire.
    New,
    /// Initial request sent or received; both directions live.
    Open,
    /// The local side has completed; the remote may still emit.
    HalfClosedLocal,
    /// The remote side has completed; the local side may still emit.
    HalfClosedRemote,
    /// Terminal. All further inputs are dropped.
    Closed,
}

/// Why a stream reached its terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSignal {
    /// Both directions completed normally.
    Complete,
    /// Canceled by either side.
    Cancel,
    /// Terminated by a peer or protocol error.
    Error,
    /// Terminated by a local application error.
    ApplicationError,
}

/// Instruction emitted by a transition for the connection to execute.
#[derive(Debug)]
pub enum StreamEffect {
    /// Put the stream's initial REQUEST_* frame on the wire.
    SendInitialRequest {
        kind: StreamKind,
        initial_request_n: u32,
        payload: Payload,
        complete: bool,
    },
    /// Emit a PAYLOAD frame.
    SendPayload {
        payload: Payload,
        next: bool,
        complete: bool,
    },
    /// Emit a REQUEST_N frame granting the peer this many more emissions.
    SendRequestN(u32),
    /// Emit a CANCEL frame.
    SendCancel,
    /// Emit an ERROR frame with a stream-class code.
    SendError { code: ErrorCode, message: String },
    /// Hand a payload to the downstream consumer.
    DeliverNext(Payload),
    /// Signal normal completion downstream.
    DeliverComplete,
    /// Signal a terminal error downstream.
    DeliverError(StreamError),
    /// Add producer credit permits.
    GrantCredit(u32),
    /// Remove the stream: unregister, then fire terminal callbacks.
    Terminate(StreamSignal),
}

/// Where inbound payloads for this stream go.
pub(crate) enum DownstreamSink {
    /// No consumer (fire-and-forget, plain responders).
    None,
    /// Single-shot consumer for request/response.
    Response(Option<oneshot::Sender<Result<Payload, StreamError>>>),
    /// Ordered consumer for streams and channel directions.
    Stream(mpsc::UnboundedSender<Result<Payload, StreamError>>),
}

impl DownstreamSink {
    pub(crate) fn deliver_next(&mut self, payload: Payload) {
        match self {
            Self::None => {}
            Self::Response(slot) => {
                if let Some(tx) = slot.take() {
                    let _ = tx.send(Ok(payload));
                }
            }
            Self::Stream(tx) => {
                let _ = tx.send(Ok(payload));
            }
        }
    }

    pub(crate) fn deliver_error(&mut self, error: StreamError) {
        match self {
            Self::None => {}
            Self::Response(slot) => {
                if let Some(tx) = slot.take() {
                    let _ = tx.send(Err(error));
                }
            }
            Self::Stream(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }

    /// Signal completion by dropping the sender; consumers observe
    /// end-of-stream after draining buffered payloads.
    pub(crate) fn complete(&mut self) { *self = Self::None; }
}

/// A registered stream: transition core plus runtime attachments.
pub(crate) struct StreamEntry {
    pub(crate) machine: StreamMachine,
    pub(crate) sink: DownstreamSink,
    /// Permits for the local producer pump, when the stream has one.
    pub(crate) credit: Option<Arc<Semaphore>>,
}

impl StreamEntry {
    pub(crate) fn new(machine: StreamMachine, sink: DownstreamSink) -> Self {
        Self {
            machine,
            sink,
            credit: None,
        }
    }

    pub(crate) fn with_credit(
        machine: StreamMachine,
        sink: DownstreamSink,
        credit: Arc<Semaphore>,
    ) -> Self {
        Self {
            machine,
            sink,
            credit: Some(credit),
        }
    }
}

/// Transition core for one stream.
///
/// All methods are total: inputs that are invalid for the current state are
/// consumed without effects (logged at debug level), keeping terminal
/// handling idempotent.
#[derive(Debug)]
pub struct StreamMachine {
    kind: StreamKind,
    role: StreamRole,
    state: StreamState,
    /// Emissions the peer has granted us.
    outgoing_credit: u32,
    /// Emissions we have granted the peer.
    incoming_credit: u32,
    /// Requester: request payload (stream) or first channel item, held
    /// until the initial frame can go out.
    pending_payload: Option<Payload>,
    /// Channel requester: downstream credit accumulated before the initial
    /// frame is sent.
    pending_initial_n: u32,
    /// Channel requester: the local source completed before the initial
    /// frame went out.
    local_complete_pending: bool,
}

impl StreamMachine {
    /// A requester machine for `kind`. Request/response goes straight to
    /// `Open` and emits its request; stream and channel machines wait in
    /// `New` for the first downstream `request_n` / first local payload.
    pub(crate) fn requester(kind: StreamKind, payload: Option<Payload>) -> (Self, Vec<StreamEffect>) {
        debug_assert!(kind != StreamKind::FireAndForget, "fire-and-forget has no machine");
        let mut machine = Self {
            kind,
            role: StreamRole::Requester,
            state: StreamState::New,
            outgoing_credit: 0,
            incoming_credit: 0,
            pending_payload: payload,
            pending_initial_n: 0,
            local_complete_pending: false,
        };
        let mut effects = Vec::new();
        if kind == StreamKind::RequestResponse {
            machine.state = StreamState::Open;
            machine.incoming_credit = 1;
            effects.push(StreamEffect::SendInitialRequest {
                kind,
                initial_request_n: 0,
                payload: machine.pending_payload.take().unwrap_or_default(),
                complete: false,
            });
        }
        (machine, effects)
    }

    /// A responder machine for a freshly registered peer stream.
    pub(crate) fn responder(
        kind: StreamKind,
        initial_request_n: u32,
        remote_complete: bool,
    ) -> (Self, Vec<StreamEffect>) {
        let machine = Self {
            kind,
            role: StreamRole::Responder,
            state: if remote_complete {
                StreamState::HalfClosedRemote
            } else {
                StreamState::Open
            },
            outgoing_credit: initial_request_n,
            incoming_credit: 0,
            pending_payload: None,
            pending_initial_n: 0,
            local_complete_pending: false,
        };
        let effects = if initial_request_n > 0 && kind != StreamKind::RequestResponse {
            vec![StreamEffect::GrantCredit(initial_request_n)]
        } else {
            Vec::new()
        };
        (machine, effects)
    }

    pub(crate) fn kind(&self) -> StreamKind { self.kind }

    pub(crate) fn role(&self) -> StreamRole { self.role }

    pub(crate) fn state(&self) -> StreamState { self.state }

    pub(crate) fn outgoing_credit(&self) -> u32 { self.outgoing_credit }

    pub(crate) fn incoming_credit(&self) -> u32 { self.incoming_credit }

    fn is_closed(&self) -> bool { self.state == StreamState::Closed }

    fn terminate(&mut self, signal: StreamSignal) -> StreamEffect {
        self.state = StreamState::Closed;
        StreamEffect::Terminate(signal)
    }

    /// Inbound PAYLOAD frame.
    pub(crate) fn handle_payload(
        &mut self,
        payload: Payload,
        next: bool,
        complete: bool,
    ) -> Vec<StreamEffect> {
        if self.is_closed() {
            return Vec::new();
        }
        match self.role {
            StreamRole::Requester => self.requester_handle_payload(payload, next, complete),
            StreamRole::Responder => self.responder_handle_payload(payload, next, complete),
        }
    }

    /// Inbound REQUEST_N frame.
    pub(crate) fn handle_request_n(&mut self, n: u32) -> Vec<StreamEffect> {
        if self.is_closed() || n == 0 {
            return Vec::new();
        }
        let grants_local_producer = matches!(
            (self.role, self.kind),
            (StreamRole::Responder, StreamKind::Stream | StreamKind::Channel)
                | (StreamRole::Requester, StreamKind::Channel)
        );
        if grants_local_producer {
            self.outgoing_credit = self.outgoing_credit.saturating_add(n);
            vec![StreamEffect::GrantCredit(n)]
        } else {
            debug!("ignoring REQUEST_N on a {:?} {:?}", self.role, self.kind);
            Vec::new()
        }
    }

    /// Inbound CANCEL frame.
    pub(crate) fn handle_cancel(&mut self) -> Vec<StreamEffect> {
        if self.is_closed() {
            return Vec::new();
        }
        match self.role {
            StreamRole::Responder => vec![self.terminate(StreamSignal::Cancel)],
            StreamRole::Requester => {
                if self.kind == StreamKind::Channel {
                    vec![
                        StreamEffect::DeliverError(StreamError::Canceled),
                        self.terminate(StreamSignal::Cancel),
                    ]
                } else {
                    debug!("ignoring CANCEL on a requester {:?}", self.kind);
                    Vec::new()
                }
            }
        }
    }

    /// Inbound stream-class ERROR frame.
    pub(crate) fn handle_error(&mut self, error: StreamError) -> Vec<StreamEffect> {
        if self.is_closed() {
            return Vec::new();
        }
        vec![
            StreamEffect::DeliverError(error),
            self.terminate(StreamSignal::Error),
        ]
    }

    /// Application requests `n` more inbound payloads.
    pub(crate) fn local_request_n(&mut self, n: u32) -> Vec<StreamEffect> {
        if self.is_closed() || n == 0 {
            return Vec::new();
        }
        match self.role {
            StreamRole::Requester => self.requester_local_request_n(n),
            StreamRole::Responder => self.responder_local_request_n(n),
        }
    }

    /// Application abandons the stream.
    pub(crate) fn local_cancel(&mut self) -> Vec<StreamEffect> {
        if self.is_closed() {
            return Vec::new();
        }
        if self.state == StreamState::New {
            return vec![self.terminate(StreamSignal::Cancel)];
        }
        vec![StreamEffect::SendCancel, self.terminate(StreamSignal::Cancel)]
    }

    /// Local producer emitted a payload.
    pub(crate) fn local_next(&mut self, payload: Payload) -> Vec<StreamEffect> {
        if self.is_closed() {
            return Vec::new();
        }
        match self.role {
            StreamRole::Requester => self.requester_local_next(payload),
            StreamRole::Responder => self.responder_local_next(payload),
        }
    }

    /// Local producer completed.
    pub(crate) fn local_complete(&mut self) -> Vec<StreamEffect> {
        if self.is_closed() {
            return Vec::new();
        }
        match self.role {
            StreamRole::Requester => self.requester_local_complete(),
            StreamRole::Responder => self.responder_local_complete(),
        }
    }

    /// Local producer failed.
    pub(crate) fn local_error(&mut self, error: RSocketError) -> Vec<StreamEffect> {
        if self.is_closed() {
            return Vec::new();
        }
        vec![
            StreamEffect::SendError {
                code: error.code,
                message: error.message.clone(),
            },
            StreamEffect::DeliverError(StreamError::Application(error.message)),
            self.terminate(StreamSignal::ApplicationError),
        ]
    }

    /// Request/response responder produced its result.
    pub(crate) fn local_response(
        &mut self,
        result: Result<Payload, RSocketError>,
    ) -> Vec<StreamEffect> {
        if self.is_closed() {
            return Vec::new();
        }
        debug_assert_eq!(self.kind, StreamKind::RequestResponse);
        match result {
            Ok(payload) => vec![
                StreamEffect::SendPayload {
                    payload,
                    next: true,
                    complete: true,
                },
                self.terminate(StreamSignal::Complete),
            ],
            Err(error) => vec![
                StreamEffect::SendError {
                    code: error.code,
                    message: error.message,
                },
                self.terminate(StreamSignal::ApplicationError),
            ],
        }
    }
}
