//! Connection lifecycle transitions and the two resume handshakes.

use std::io;

use bytes::Bytes;
use log::{debug, warn};
use tokio::sync::oneshot;

use super::{keepalive::KeepaliveTimer, Connection, Status, UNSPECIFIED_RESUME_POSITION};
use crate::{
    error::{ErrorCode, ResumeError},
    frame::{Frame, FrameCodec, FrameDecodeError, StreamId},
    registry::ConnectionMode,
    setup::{ResumeParameters, SetupParameters},
    transport::BoxDuplexConnection,
};

impl Connection {
    /// Client side: select the codec, send SETUP on `transport` and enter
    /// `Connected`.
    ///
    /// # Errors
    ///
    /// Fails when `params` name an unsupported protocol version.
    pub(crate) fn connect_client_send_setup(
        &mut self,
        transport: BoxDuplexConnection,
        params: &SetupParameters,
    ) -> Result<(), FrameDecodeError> {
        debug_assert_eq!(self.mode, ConnectionMode::Client);
        let codec = FrameCodec::new(params.version)?;
        self.codec = Some(codec);
        self.resumable = params.resumable;
        self.remote_resumable = params.resumable;
        self.token = Some(params.token);
        self.keepalive = Some(KeepaliveTimer::new(params.keepalive_time, params.max_lifetime));
        self.attach_transport(transport);
        self.status = Status::Connected;
        self.hooks.on_connected();
        crate::metrics::connection_opened();
        self.output_frame_or_enqueue(&Frame::setup(params));
        self.arm_keepalive();
        Ok(())
    }

    /// Server side: bind the transport for a session whose SETUP the
    /// acceptor already consumed.
    pub(crate) fn connect_server(
        &mut self,
        transport: BoxDuplexConnection,
        codec: FrameCodec,
        setup: &SetupParameters,
    ) {
        debug_assert_eq!(self.mode, ConnectionMode::Server);
        self.codec = Some(codec);
        self.resumable = setup.resumable;
        self.remote_resumable = setup.resumable;
        self.token = setup.resumable.then_some(setup.token);
        self.attach_transport(transport);
        self.status = Status::Connected;
        self.hooks.on_connected();
        crate::metrics::connection_opened();
    }

    /// Reaction to the transport reader or writer ending.
    pub(super) fn on_transport_closed(&mut self, generation: u64, error: Option<io::Error>) {
        if !self.is_current_generation(generation) {
            debug!("ignoring terminal from a replaced transport (generation {generation})");
            return;
        }
        let reason = error.map_or_else(|| "transport closed".to_owned(), |error| error.to_string());
        self.disconnect_or_close(&reason);
    }

    /// `disconnect` when the session is resumable, `close` otherwise.
    pub(super) fn disconnect_or_close(&mut self, reason: &str) {
        if self.resumable {
            self.disconnect(reason);
        } else {
            self.close(reason);
        }
    }

    /// Detach the transport, keeping stream and resume state. Idempotent.
    pub(super) fn disconnect(&mut self, reason: &str) {
        if self.status == Status::Closed || self.transport.is_none() {
            return;
        }
        debug!("disconnect: {reason}");
        self.hooks.on_disconnected(reason);
        self.detach_transport();
        if let Some(waiter) = self.resume_waiter.take() {
            let _ = waiter.send(Err(ResumeError::Connection(reason.to_owned())));
        }
        self.status = Status::Disconnected;
        self.next_keepalive_at = None;
        self.hooks.on_streams_paused();
    }

    /// Terminal teardown: all streams end with an error, the transport
    /// drops, and the actor exits. Idempotent.
    pub(super) fn close(&mut self, reason: &str) {
        if self.status == Status::Closed {
            return;
        }
        debug!("close: {reason}");
        self.status = Status::Closed;
        if let Some(waiter) = self.resume_waiter.take() {
            let _ = waiter.send(Err(ResumeError::Connection(reason.to_owned())));
        }
        self.hooks.on_closed(reason);
        self.close_streams(reason);
        self.detach_transport();
        self.next_keepalive_at = None;
        crate::metrics::connection_closed();
    }

    /// Emit an ERROR frame, then close with its message.
    pub(super) fn close_with_error(&mut self, frame: Frame) {
        let message = match &frame {
            Frame::Error { code, data, .. } => {
                let message = String::from_utf8_lossy(data).into_owned();
                warn!("closing connection with {code}: {message}");
                message
            }
            _ => {
                debug_assert!(false, "close_with_error expects an ERROR frame");
                "protocol error".to_owned()
            }
        };
        if self.codec.is_some() {
            self.output_frame_or_enqueue(&frame);
        }
        crate::metrics::protocol_error();
        self.close(&message);
    }

    /// Client side: send RESUME on the fresh transport and await RESUME_OK.
    pub(super) fn try_client_resume(
        &mut self,
        transport: BoxDuplexConnection,
        reply: oneshot::Sender<Result<(), ResumeError>>,
    ) {
        if self.mode != ConnectionMode::Client || !self.resumable {
            let _ = reply.send(Err(ResumeError::NotResumable));
            return;
        }
        if self.status == Status::Closed {
            let _ = reply.send(Err(ResumeError::Connection("connection closed".to_owned())));
            return;
        }
        let (Some(codec), Some(token)) = (self.codec, self.token) else {
            let _ = reply.send(Err(ResumeError::Connection(
                "session was never established".to_owned(),
            )));
            return;
        };
        // An existing transport is replaced with a clear reason.
        self.disconnect("resuming client on a different connection");
        self.attach_transport(transport);
        self.status = Status::Resuming;
        self.resume_waiter = Some(reply);
        let frame = Frame::Resume {
            version: codec.version(),
            token,
            last_received_server_position: self.resume.implied_position(),
            first_available_client_position: self.resume.first_sent_position(),
        };
        debug!(
            "resuming session {token}: received {} first available {}",
            self.resume.implied_position(),
            self.resume.first_sent_position()
        );
        self.send_on_transport(codec.encode(&frame));
    }

    /// Client side: RESUME_OK arrived with a validated server position.
    pub(super) fn complete_client_resume(&mut self, position: u64) {
        if let Some(waiter) = self.resume_waiter.take() {
            let _ = waiter.send(Ok(()));
        }
        crate::metrics::resume_succeeded();
        self.resume_from_position(position);
        self.hooks.on_connected();
        if let Some(timer) = &mut self.keepalive {
            timer.acknowledged();
        }
        self.arm_keepalive();
    }

    /// Server side: validate the peer's positions and either accept with
    /// RESUME_OK plus replay, or reject and close.
    pub(super) fn resume_server(
        &mut self,
        transport: BoxDuplexConnection,
        params: ResumeParameters,
        can_resume: super::CanResumeFn,
        reply: oneshot::Sender<bool>,
    ) {
        if self.status == Status::Closed || !self.resumable || !self.remote_resumable {
            let _ = reply.send(false);
            return;
        }
        let Some(codec) = self.codec else {
            let _ = reply.send(false);
            return;
        };
        // Replace any transport the session still holds, then bind the new
        // one so handshake frames can flow at once.
        self.disconnect("resuming session on a new transport");
        self.attach_transport(transport);
        self.status = Status::Connected;

        if codec.version() != params.version {
            self.close_with_error(Frame::connection_error(format!(
                "resume version {} does not match negotiated {}",
                params.version,
                codec.version()
            )));
            let _ = reply.send(false);
            return;
        }

        let clean = self.resume.clean_stream_ids();
        let dirty = self.registry.open_stream_ids();
        if !can_resume(&clean, &dirty) {
            crate::metrics::resume_failed();
            self.close_with_error(Frame::error(
                StreamId::CONNECTION,
                ErrorCode::RejectedResume,
                "resumption declined",
            ));
            let _ = reply.send(false);
            return;
        }

        let client_position_ok = params.first_available_client_position
            == UNSPECIFIED_RESUME_POSITION
            || params.first_available_client_position <= self.resume.implied_position();
        if client_position_ok
            && self
                .resume
                .is_position_available(params.last_received_server_position)
        {
            let ok = Frame::ResumeOk {
                position: self.resume.implied_position(),
            };
            self.send_on_transport(codec.encode(&ok));
            crate::metrics::resume_succeeded();
            self.resume_from_position(params.last_received_server_position);
            self.hooks.on_connected();
            let _ = reply.send(true);
        } else {
            crate::metrics::resume_failed();
            self.close_with_error(Frame::error(
                StreamId::CONNECTION,
                ErrorCode::RejectedResume,
                format!(
                    "cannot resume: client position {} server position {} (first available {})",
                    params.first_available_client_position,
                    params.last_received_server_position,
                    self.resume.first_sent_position()
                ),
            ));
            let _ = reply.send(false);
        }
    }

    /// Replay the cache from `position`, then flush frames queued while the
    /// transport was away. Replay strictly precedes new output.
    pub(super) fn resume_from_position(&mut self, position: u64) {
        self.hooks.on_streams_resumed();
        let frames: Vec<Bytes> = self.resume.frames_from(position).cloned().collect();
        debug!("replaying {} cached frames from position {position}", frames.len());
        for bytes in frames {
            self.send_on_transport(bytes);
        }
        self.status = Status::Connected;
        self.flush_pending_output();
    }

    /// Handle an inbound connection-level ERROR frame.
    pub(super) fn on_connection_error_frame(&mut self, code: ErrorCode, data: &[u8]) {
        let message = String::from_utf8_lossy(data).into_owned();
        if matches!(code, ErrorCode::ConnectionError | ErrorCode::RejectedResume) {
            if let Some(waiter) = self.resume_waiter.take() {
                crate::metrics::resume_failed();
                let error = if code == ErrorCode::RejectedResume {
                    ResumeError::Rejected(message.clone())
                } else {
                    ResumeError::Connection(message.clone())
                };
                let _ = waiter.send(Err(error));
            }
        }
        self.close(&message);
    }

    /// Connection-level frames that may not arrive after establishment.
    pub(super) fn unexpected_connection_frame(&mut self, name: &str) {
        self.close_with_error(Frame::connection_error(format!(
            "unexpected {name} frame for stream 0"
        )));
    }
}
