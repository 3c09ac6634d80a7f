//! Inbound frame dispatch.
//!
//! Stream id zero is handled here (keepalive, resume handshake, errors,
//! metadata push); everything else routes to the owning stream machine, or
//! through the unknown-stream path that constructs responders.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};
use tokio::sync::Semaphore;

use super::{event::LocalItem, Connection, Event, PayloadStream, Status};
use crate::{
    error::{RSocketError, StreamError},
    frame::{Frame, FrameCodec, FrameType, StreamId},
    payload::Payload,
    registry::ConnectionMode,
    stream::{DownstreamSink, StreamEffect, StreamEntry, StreamKind, StreamMachine},
};

impl Connection {
    /// Entry point for a frame read off the transport.
    pub(super) fn process_frame(&mut self, generation: u64, bytes: Bytes) {
        if self.status == Status::Closed {
            return;
        }
        if !self.is_current_generation(generation) {
            debug!("dropping frame from a replaced transport (generation {generation})");
            return;
        }
        if self.codec.is_none() {
            // Servers see their first frame before SETUP parsing picks the
            // codec; clients are always initialized with one.
            match FrameCodec::autodetect(&bytes) {
                Some(codec) => self.codec = Some(codec),
                None => {
                    self.close_with_error(Frame::connection_error(
                        "cannot detect protocol version",
                    ));
                    return;
                }
            }
        }
        let Some(codec) = self.codec else { return };
        let Some(frame_type) = codec.peek_frame_type(&bytes) else {
            self.close_with_error(Frame::connection_error("invalid frame"));
            return;
        };
        let Some(stream_id) = codec.peek_stream_id(&bytes) else {
            self.close_with_error(Frame::connection_error("invalid frame"));
            return;
        };
        crate::metrics::frame_read();
        if self.resumable {
            self.resume.track_received(bytes.len(), frame_type);
        }
        if stream_id.is_connection() {
            self.handle_connection_frame(codec, frame_type, bytes);
            return;
        }
        // Stream traffic is disallowed while a resume handshake is pending.
        if self.resume_waiter.is_some() {
            self.close_with_error(Frame::connection_error(
                "received stream frame while resuming",
            ));
            return;
        }
        if self.registry.contains(stream_id) {
            self.handle_stream_frame(codec, stream_id, frame_type, bytes);
        } else {
            self.handle_unknown_stream(codec, stream_id, frame_type, bytes);
        }
    }

    fn decode_or_close(&mut self, codec: FrameCodec, bytes: Bytes) -> Option<Frame> {
        match codec.decode(bytes) {
            Ok(frame) => Some(frame),
            Err(error) => {
                self.close_with_error(Frame::connection_error(format!("invalid frame: {error}")));
                None
            }
        }
    }

    fn handle_connection_frame(&mut self, codec: FrameCodec, frame_type: FrameType, bytes: Bytes) {
        match frame_type {
            FrameType::Keepalive => {
                let Some(Frame::Keepalive {
                    respond,
                    position,
                    data,
                }) = self.decode_or_close(codec, bytes)
                else {
                    return;
                };
                if self.resumable {
                    self.resume.reset_up_to(position);
                }
                match self.mode {
                    ConnectionMode::Server => {
                        if respond {
                            self.write_keepalive(false, data);
                        } else {
                            self.close_with_error(Frame::connection_error(
                                "keepalive without flag",
                            ));
                        }
                    }
                    ConnectionMode::Client => {
                        if respond {
                            self.close_with_error(Frame::connection_error(
                                "client received keepalive with respond flag",
                            ));
                        } else if let Some(timer) = &mut self.keepalive {
                            timer.acknowledged();
                        }
                    }
                }
            }
            FrameType::MetadataPush => {
                let Some(Frame::MetadataPush { metadata }) = self.decode_or_close(codec, bytes)
                else {
                    return;
                };
                self.responder.handle_metadata_push(metadata);
            }
            FrameType::ResumeOk => {
                let Some(Frame::ResumeOk { position }) = self.decode_or_close(codec, bytes)
                else {
                    return;
                };
                if self.resume_waiter.is_none() {
                    self.close_with_error(Frame::connection_error(
                        "received RESUME_OK while not resuming",
                    ));
                    return;
                }
                if !self.resume.is_position_available(position) {
                    self.close_with_error(Frame::connection_error(format!(
                        "cannot resume, server position {position} is not available"
                    )));
                    return;
                }
                self.complete_client_resume(position);
            }
            FrameType::Error => {
                let Some(Frame::Error { code, data, .. }) = self.decode_or_close(codec, bytes)
                else {
                    return;
                };
                self.on_connection_error_frame(code, &data);
            }
            FrameType::Lease => {
                // Lease-based flow control is out of scope; the frame is
                // acknowledged and dropped.
                if let Some(Frame::Lease {
                    ttl_ms,
                    number_of_requests,
                    ..
                }) = self.decode_or_close(codec, bytes)
                {
                    debug!("ignoring LEASE (ttl {ttl_ms} ms, {number_of_requests} requests)");
                }
            }
            other => self.unexpected_connection_frame(&other.to_string()),
        }
    }

    fn handle_stream_frame(
        &mut self,
        codec: FrameCodec,
        stream_id: StreamId,
        frame_type: FrameType,
        bytes: Bytes,
    ) {
        let effects = match frame_type {
            FrameType::RequestN => {
                let Some(Frame::RequestN { n, .. }) = self.decode_or_close(codec, bytes) else {
                    return;
                };
                self.with_stream(stream_id, |machine| machine.handle_request_n(n))
            }
            FrameType::Cancel => {
                self.with_stream(stream_id, StreamMachine::handle_cancel)
            }
            FrameType::Payload => {
                let Some(Frame::Payload {
                    next,
                    complete,
                    payload,
                    ..
                }) = self.decode_or_close(codec, bytes)
                else {
                    return;
                };
                self.with_stream(stream_id, |machine| {
                    machine.handle_payload(payload, next, complete)
                })
            }
            FrameType::Error => {
                let Some(Frame::Error { code, data, .. }) = self.decode_or_close(codec, bytes)
                else {
                    return;
                };
                let error = StreamError::from_error_frame(
                    code,
                    String::from_utf8_lossy(&data).into_owned(),
                );
                self.with_stream(stream_id, |machine| machine.handle_error(error))
            }
            FrameType::Ext => {
                // Extension frames are ignorable by definition.
                debug!("ignoring EXT frame for stream {stream_id}");
                return;
            }
            other => {
                self.close_with_error(Frame::connection_error(format!(
                    "unexpected {other} frame for stream {stream_id}"
                )));
                return;
            }
        };
        self.apply_effects(stream_id, effects);
    }

    fn with_stream<F>(&mut self, stream_id: StreamId, transition: F) -> Vec<StreamEffect>
    where
        F: FnOnce(&mut StreamMachine) -> Vec<StreamEffect>,
    {
        self.registry
            .lookup(stream_id)
            .map(|entry| transition(&mut entry.machine))
            .unwrap_or_default()
    }

    /// Frames for ids with no registered stream: either the birth of a
    /// responder, or a stale duplicate to swallow, or a violation.
    fn handle_unknown_stream(
        &mut self,
        codec: FrameCodec,
        stream_id: StreamId,
        frame_type: FrameType,
        bytes: Bytes,
    ) {
        if !self.registry.register_peer_stream_id(stream_id) {
            // Stale or replayed id, most likely a duplicate delivered
            // around a resumption: consume without a frame in reply.
            debug!("ignoring {frame_type} for stale stream id {stream_id}");
            return;
        }
        match frame_type {
            FrameType::RequestChannel => {
                let Some(Frame::RequestChannel {
                    initial_request_n,
                    complete,
                    payload,
                    ..
                }) = self.decode_or_close(codec, bytes)
                else {
                    return;
                };
                self.accept_channel(stream_id, initial_request_n, complete, payload);
            }
            FrameType::RequestStream => {
                let Some(Frame::RequestStream {
                    initial_request_n,
                    payload,
                    ..
                }) = self.decode_or_close(codec, bytes)
                else {
                    return;
                };
                self.accept_stream(stream_id, initial_request_n, payload);
            }
            FrameType::RequestResponse => {
                let Some(Frame::RequestResponse { payload, .. }) =
                    self.decode_or_close(codec, bytes)
                else {
                    return;
                };
                self.accept_request_response(stream_id, payload);
            }
            FrameType::RequestFnf => {
                let Some(Frame::RequestFnf { payload, .. }) = self.decode_or_close(codec, bytes)
                else {
                    return;
                };
                // No stream tracking is necessary.
                let responder = Arc::clone(&self.responder);
                tokio::spawn(async move {
                    responder.handle_fire_and_forget(payload, stream_id).await;
                });
            }
            other => {
                warn!("unexpected {other} frame for unknown stream {stream_id}");
                self.close_with_error(Frame::connection_error(format!(
                    "unexpected {other} frame for stream {stream_id}"
                )));
            }
        }
    }

    fn accept_stream(&mut self, stream_id: StreamId, initial_request_n: u32, payload: Payload) {
        let (machine, effects) = StreamMachine::responder(StreamKind::Stream, initial_request_n, false);
        let credit = Arc::new(Semaphore::new(0));
        self.registry.add(
            stream_id,
            StreamEntry::with_credit(machine, DownstreamSink::None, Arc::clone(&credit)),
        );
        self.apply_effects(stream_id, effects);
        match self.responder.handle_request_stream(payload, stream_id) {
            Ok(source) => self.spawn_producer_pump(stream_id, credit, source),
            Err(error) => self.reject_responder_stream(stream_id, &error),
        }
    }

    fn accept_channel(
        &mut self,
        stream_id: StreamId,
        initial_request_n: u32,
        complete: bool,
        payload: Payload,
    ) {
        let (machine, effects) =
            StreamMachine::responder(StreamKind::Channel, initial_request_n, complete);
        let credit = Arc::new(Semaphore::new(0));
        let (payloads, sink, control) = PayloadStream::channel();
        self.registry.add(
            stream_id,
            StreamEntry::with_credit(
                machine,
                DownstreamSink::Stream(sink),
                Arc::clone(&credit),
            ),
        );
        self.apply_effects(stream_id, effects);
        // The request frame carries the channel's first inbound payload.
        if let Some(entry) = self.registry.lookup(stream_id) {
            entry.sink.deliver_next(payload);
            if complete {
                entry.sink.complete();
            }
        }
        self.spawn_control_forwarder(stream_id, control);
        match self.responder.handle_request_channel(payloads, stream_id) {
            Ok(source) => self.spawn_producer_pump(stream_id, credit, source),
            Err(error) => self.reject_responder_stream(stream_id, &error),
        }
    }

    fn accept_request_response(&mut self, stream_id: StreamId, payload: Payload) {
        let (machine, effects) = StreamMachine::responder(StreamKind::RequestResponse, 0, false);
        self.registry
            .add(stream_id, StreamEntry::new(machine, DownstreamSink::None));
        self.apply_effects(stream_id, effects);
        let responder = Arc::clone(&self.responder);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = responder.handle_request_response(payload, stream_id).await;
            let _ = events.send(Event::StreamLocal {
                stream_id,
                item: LocalItem::Response(result),
            });
        });
    }

    /// A responder handler declined a stream or channel at birth.
    fn reject_responder_stream(&mut self, stream_id: StreamId, error: &RSocketError) {
        self.output_frame_or_enqueue(&Frame::error(stream_id, error.code, error.message.clone()));
        if let Some(entry) = self.registry.remove(stream_id) {
            if let Some(credit) = &entry.credit {
                credit.close();
            }
        }
        self.resume.on_stream_closed(stream_id);
    }
}
