//! Requester-side stream creation, effect interpretation and teardown.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use log::debug;
use tokio::sync::{mpsc, oneshot, Semaphore};

use super::{
    event::{ControlCmd, LocalItem, PayloadSink},
    Connection, Event,
};
use crate::{
    error::StreamError,
    frame::{Frame, StreamId},
    handler::PayloadSource,
    payload::Payload,
    stream::{DownstreamSink, StreamEffect, StreamEntry, StreamKind, StreamMachine, StreamSignal},
};

impl Connection {
    /// Fire-and-forget: allocate an id, emit the frame, track nothing.
    pub(super) fn request_fnf(&mut self, payload: Payload) {
        let Some(stream_id) = self.allocate_stream_id() else {
            return;
        };
        self.output_frame_or_enqueue(&Frame::RequestFnf { stream_id, payload });
    }

    /// Request/response: the reply channel doubles as the downstream sink.
    pub(super) fn request_response(
        &mut self,
        payload: Payload,
        reply: oneshot::Sender<Result<Payload, StreamError>>,
    ) {
        let Some(stream_id) = self.allocate_stream_id() else {
            let _ = reply.send(Err(StreamError::Connection(
                "stream id space exhausted".to_owned(),
            )));
            return;
        };
        let (machine, effects) = StreamMachine::requester(
            StreamKind::RequestResponse,
            Some(payload),
        );
        self.registry.add(
            stream_id,
            StreamEntry::new(machine, DownstreamSink::Response(Some(reply))),
        );
        self.apply_effects(stream_id, effects);
    }

    /// Requested stream: the initial frame follows the first request-n.
    pub(super) fn open_stream(
        &mut self,
        payload: Payload,
        sink: PayloadSink,
        control: mpsc::UnboundedReceiver<ControlCmd>,
    ) {
        let Some(stream_id) = self.allocate_stream_id() else {
            let _ = sink.send(Err(StreamError::Connection(
                "stream id space exhausted".to_owned(),
            )));
            return;
        };
        let (machine, effects) = StreamMachine::requester(StreamKind::Stream, Some(payload));
        self.registry
            .add(stream_id, StreamEntry::new(machine, DownstreamSink::Stream(sink)));
        self.apply_effects(stream_id, effects);
        self.spawn_control_forwarder(stream_id, control);
    }

    /// Channel: the outbound pump starts with one permit so the first local
    /// payload can ride inside REQUEST_CHANNEL.
    pub(super) fn open_channel(
        &mut self,
        source: PayloadSource,
        sink: PayloadSink,
        control: mpsc::UnboundedReceiver<ControlCmd>,
    ) {
        let Some(stream_id) = self.allocate_stream_id() else {
            let _ = sink.send(Err(StreamError::Connection(
                "stream id space exhausted".to_owned(),
            )));
            return;
        };
        let (machine, effects) = StreamMachine::requester(StreamKind::Channel, None);
        let credit = Arc::new(Semaphore::new(1));
        self.registry.add(
            stream_id,
            StreamEntry::with_credit(machine, DownstreamSink::Stream(sink), Arc::clone(&credit)),
        );
        self.apply_effects(stream_id, effects);
        self.spawn_control_forwarder(stream_id, control);
        self.spawn_producer_pump(stream_id, credit, source);
    }

    /// Connection-scoped metadata push from the application.
    pub(super) fn metadata_push(&mut self, metadata: Bytes) {
        self.output_frame_or_enqueue(&Frame::MetadataPush { metadata });
    }

    /// Demand or cancellation from an application stream handle.
    pub(super) fn on_stream_control(&mut self, stream_id: StreamId, cmd: ControlCmd) {
        let Some(entry) = self.registry.lookup(stream_id) else {
            debug!("control for unknown stream {stream_id}");
            return;
        };
        let effects = match cmd {
            ControlCmd::RequestN(n) => entry.machine.local_request_n(n),
            ControlCmd::Cancel => entry.machine.local_cancel(),
        };
        self.apply_effects(stream_id, effects);
    }

    /// Progress from a local producer pump or responder task.
    pub(super) fn on_stream_local(&mut self, stream_id: StreamId, item: LocalItem) {
        let Some(entry) = self.registry.lookup(stream_id) else {
            debug!("local item for unknown stream {stream_id}");
            return;
        };
        let effects = match item {
            LocalItem::Next(payload) => entry.machine.local_next(payload),
            LocalItem::Complete => entry.machine.local_complete(),
            LocalItem::Error(error) => entry.machine.local_error(error),
            LocalItem::Response(result) => entry.machine.local_response(result),
        };
        self.apply_effects(stream_id, effects);
    }

    /// Allocate a local stream id, closing the connection on exhaustion
    /// before any partial frame is emitted.
    fn allocate_stream_id(&mut self) -> Option<StreamId> {
        match self.registry.next_stream_id() {
            Ok(stream_id) => Some(stream_id),
            Err(_) => {
                self.close_with_error(Frame::connection_error("reached maximum stream id"));
                None
            }
        }
    }

    /// Execute the instruction list a transition produced.
    pub(super) fn apply_effects(&mut self, stream_id: StreamId, effects: Vec<StreamEffect>) {
        for effect in effects {
            match effect {
                StreamEffect::SendInitialRequest {
                    kind,
                    initial_request_n,
                    payload,
                    complete,
                } => self.write_initial_request(stream_id, kind, initial_request_n, payload, complete),
                StreamEffect::SendPayload {
                    payload,
                    next,
                    complete,
                } => self.output_frame_or_enqueue(&Frame::Payload {
                    stream_id,
                    next,
                    complete,
                    follows: false,
                    payload,
                }),
                StreamEffect::SendRequestN(n) => {
                    self.output_frame_or_enqueue(&Frame::RequestN { stream_id, n });
                }
                StreamEffect::SendCancel => {
                    self.output_frame_or_enqueue(&Frame::Cancel { stream_id });
                }
                StreamEffect::SendError { code, message } => {
                    self.output_frame_or_enqueue(&Frame::error(stream_id, code, message));
                }
                StreamEffect::DeliverNext(payload) => {
                    if let Some(entry) = self.registry.lookup(stream_id) {
                        entry.sink.deliver_next(payload);
                    }
                }
                StreamEffect::DeliverComplete => {
                    if let Some(entry) = self.registry.lookup(stream_id) {
                        entry.sink.complete();
                    }
                }
                StreamEffect::DeliverError(error) => {
                    if let Some(entry) = self.registry.lookup(stream_id) {
                        entry.sink.deliver_error(error);
                    }
                }
                StreamEffect::GrantCredit(n) => {
                    if let Some(entry) = self.registry.lookup(stream_id) {
                        if let Some(credit) = &entry.credit {
                            credit.add_permits(n as usize);
                        }
                    }
                }
                StreamEffect::Terminate(signal) => self.end_stream(stream_id, signal),
            }
        }
    }

    /// Emit the initial REQUEST_* frame for a requester stream.
    fn write_initial_request(
        &mut self,
        stream_id: StreamId,
        kind: StreamKind,
        initial_request_n: u32,
        payload: Payload,
        complete: bool,
    ) {
        let frame = match kind {
            StreamKind::FireAndForget => Frame::RequestFnf { stream_id, payload },
            StreamKind::RequestResponse => Frame::RequestResponse { stream_id, payload },
            StreamKind::Stream => Frame::RequestStream {
                stream_id,
                initial_request_n,
                payload,
            },
            StreamKind::Channel => Frame::RequestChannel {
                stream_id,
                initial_request_n,
                complete,
                payload,
            },
        };
        self.output_frame_or_enqueue(&frame);
    }

    /// Remove a stream and fire its terminal bookkeeping. Idempotent: a
    /// second terminal for the same id finds nothing to remove.
    pub(super) fn end_stream(&mut self, stream_id: StreamId, signal: StreamSignal) {
        let Some(entry) = self.registry.remove(stream_id) else {
            return;
        };
        debug!(
            "{:?} {:?} stream {stream_id} ended with {signal:?}",
            entry.machine.role(),
            entry.machine.kind()
        );
        self.resume.on_stream_closed(stream_id);
        if let Some(credit) = &entry.credit {
            credit.close();
        }
        // Sinks drop here; consumers observe end-of-stream. Error terminals
        // already delivered their error through a preceding effect.
        drop(entry);
    }

    /// Terminate every stream with a connection-level error.
    pub(super) fn close_streams(&mut self, reason: &str) {
        for (stream_id, mut entry) in self.registry.drain() {
            if let Some(credit) = &entry.credit {
                credit.close();
            }
            entry
                .sink
                .deliver_error(StreamError::ConnectionClosed(reason.to_owned()));
            self.resume.on_stream_closed(stream_id);
        }
    }

    /// Forward demand/cancel signals from an application handle into the
    /// actor, bound to the allocated stream id.
    pub(super) fn spawn_control_forwarder(
        &self,
        stream_id: StreamId,
        mut control: mpsc::UnboundedReceiver<ControlCmd>,
    ) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(cmd) = control.recv().await {
                if events.send(Event::StreamControl { stream_id, cmd }).is_err() {
                    break;
                }
            }
        });
    }

    /// Pull payloads from a producer under credit permits and feed them to
    /// the actor. One item of lookahead keeps completion prompt: the item
    /// is pulled first, then a permit is acquired, so a source that ends
    /// needs no credit to report completion.
    pub(super) fn spawn_producer_pump(
        &self,
        stream_id: StreamId,
        credit: Arc<Semaphore>,
        mut source: PayloadSource,
    ) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            loop {
                match source.next().await {
                    Some(Ok(payload)) => match credit.acquire().await {
                        Ok(permit) => {
                            permit.forget();
                            if events
                                .send(Event::StreamLocal {
                                    stream_id,
                                    item: LocalItem::Next(payload),
                                })
                                .is_err()
                            {
                                break;
                            }
                        }
                        // Closed semaphore: the stream terminated.
                        Err(_) => break,
                    },
                    Some(Err(error)) => {
                        let _ = events.send(Event::StreamLocal {
                            stream_id,
                            item: LocalItem::Error(error),
                        });
                        break;
                    }
                    None => {
                        let _ = events.send(Event::StreamLocal {
                            stream_id,
                            item: LocalItem::Complete,
                        });
                        break;
                    }
                }
            }
        });
    }
}
