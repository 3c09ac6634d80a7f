//! The per-connection state machine.
//!
//! A [`Connection`] is an actor: it owns the frame codec, the transport
//! binding, the stream registry and the resume manager, and it mutates them
//! only from its own task. Public operations — requester calls, resume,
//! disconnect — post [`Event`]s onto the actor's channel; transport reader
//! and writer tasks do the same, tagged with a transport generation so a
//! replaced transport's stragglers are inert.

mod dispatch;
mod event;
mod keepalive;
mod lifecycle;
mod output;
mod payload_stream;
mod streams;


pub(crate) use event::{CanResumeFn, Event, EventSender};
pub use payload_stream::{PayloadStream, StreamControlHandle};

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;

use log::debug;
use tokio::{
    sync::oneshot,
    time::{Duration, Instant},
};

use event::EventReceiver;
use keepalive::KeepaliveTimer;
use output::TransportBinding;

use crate::{
    error::ResumeError,
    frame::FrameCodec,
    handler::Responder,
    registry::{ConnectionMode, StreamRegistry},
    resume::InMemoryResumeManager,
    setup::ResumeToken,
};

/// Client RESUME frames carry this when no client position is available.
pub(crate) const UNSPECIFIED_RESUME_POSITION: u64 = u64::MAX;

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// No transport attached; streams are retained while resumable.
    Disconnected,
    /// Transport attached and the session established.
    Connected,
    /// A new transport is attached and RESUME is in flight.
    Resuming,
    /// Terminal.
    Closed,
}

/// Observer hooks for connection lifecycle transitions.
///
/// All methods default to no-ops; implementations must not block.
pub trait ConnectionEvents: Send + Sync + 'static {
    /// A transport was attached and the session (re-)established.
    fn on_connected(&self) {}
    /// The transport was lost or detached.
    fn on_disconnected(&self, reason: &str) { let _ = reason; }
    /// Streams paused, buffering emissions until resumption.
    fn on_streams_paused(&self) {}
    /// Streams resumed on a fresh transport.
    fn on_streams_resumed(&self) {}
    /// The connection reached its terminal state.
    fn on_closed(&self, reason: &str) { let _ = reason; }
}

/// The default, silent observer.
pub struct NoopConnectionEvents;

impl ConnectionEvents for NoopConnectionEvents {}

/// State machine for one connection, driven by [`Connection::run`].
pub(crate) struct Connection {
    mode: ConnectionMode,
    status: Status,
    codec: Option<FrameCodec>,
    resumable: bool,
    remote_resumable: bool,
    token: Option<ResumeToken>,
    registry: StreamRegistry,
    resume: InMemoryResumeManager,
    pending_output: VecDeque<Bytes>,
    transport: Option<TransportBinding>,
    transport_generation: u64,
    keepalive: Option<KeepaliveTimer>,
    next_keepalive_at: Option<Instant>,
    responder: Arc<dyn Responder>,
    events_tx: EventSender,
    resume_waiter: Option<oneshot::Sender<Result<(), ResumeError>>>,
    hooks: Arc<dyn ConnectionEvents>,
}

impl Connection {
    pub(crate) fn new(
        mode: ConnectionMode,
        responder: Arc<dyn Responder>,
        events_tx: EventSender,
        hooks: Arc<dyn ConnectionEvents>,
    ) -> Self {
        Self {
            mode,
            status: Status::Disconnected,
            codec: None,
            resumable: false,
            remote_resumable: false,
            token: None,
            registry: StreamRegistry::new(mode),
            resume: InMemoryResumeManager::new(),
            pending_output: VecDeque::new(),
            transport: None,
            transport_generation: 0,
            keepalive: None,
            next_keepalive_at: None,
            responder,
            events_tx,
            resume_waiter: None,
            hooks,
        }
    }

    /// Drive the connection until it closes.
    pub(crate) async fn run(mut self, mut events: EventReceiver) {
        loop {
            let keepalive_deadline = self
                .next_keepalive_at
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => self.close("all connection handles dropped"),
                },
                () = tokio::time::sleep_until(keepalive_deadline),
                    if self.next_keepalive_at.is_some() =>
                {
                    self.on_keepalive_tick();
                }
            }
            if self.status == Status::Closed {
                break;
            }
        }
        debug!("connection actor finished ({:?})", self.mode);
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::InboundFrame { generation, bytes } => self.process_frame(generation, bytes),
            Event::TransportClosed { generation, error } => {
                self.on_transport_closed(generation, error);
            }
            Event::Fnf { payload } => self.request_fnf(payload),
            Event::Request { payload, reply } => self.request_response(payload, reply),
            Event::OpenStream {
                payload,
                sink,
                control,
            } => self.open_stream(payload, sink, control),
            Event::OpenChannel {
                source,
                sink,
                control,
            } => self.open_channel(source, sink, control),
            Event::StreamControl { stream_id, cmd } => self.on_stream_control(stream_id, cmd),
            Event::StreamLocal { stream_id, item } => self.on_stream_local(stream_id, item),
            Event::MetadataPush { metadata } => self.metadata_push(metadata),
            Event::Resume { transport, reply } => self.try_client_resume(transport, reply),
            Event::ServerResume {
                transport,
                params,
                can_resume,
                reply,
            } => self.resume_server(transport, params, can_resume, reply),
            Event::Disconnect { reason, done } => {
                self.disconnect(&reason);
                let _ = done.send(());
            }
            Event::Close { reason } => self.close(&reason),
        }
    }

    pub(crate) fn status(&self) -> Status { self.status }

    fn is_current_generation(&self, generation: u64) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|binding| binding.generation == generation)
    }

    /// Schedule (or reschedule) the next client keepalive.
    fn arm_keepalive(&mut self) {
        self.next_keepalive_at = match (&self.keepalive, self.mode, self.status) {
            (Some(timer), ConnectionMode::Client, Status::Connected) => {
                Some(Instant::now() + timer.period())
            }
            _ => None,
        };
    }

    fn on_keepalive_tick(&mut self) {
        let Some(timer) = &self.keepalive else {
            self.next_keepalive_at = None;
            return;
        };
        if timer.is_expired() {
            self.disconnect_or_close("no keepalive acknowledgement within max lifetime");
            return;
        }
        self.send_keepalive();
        self.arm_keepalive();
    }
}
