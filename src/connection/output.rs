//! Outbound path: transport binding and the send-or-enqueue rule.
//!
//! Frames reach the transport only while the connection is `Connected` and
//! no resume handshake is in flight; otherwise they queue in order on
//! `pending_output` and flush after the next successful transition, behind
//! any resume-cache replay.

use bytes::Bytes;
use log::{debug, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Connection, Event, Status};
use crate::{
    frame::Frame,
    transport::BoxDuplexConnection,
};

/// A live transport: unbounded writer queue plus the cancellation token
/// stopping its reader and writer tasks.
pub(super) struct TransportBinding {
    pub(super) writer: mpsc::UnboundedSender<Bytes>,
    pub(super) cancel: CancellationToken,
    pub(super) generation: u64,
}

impl Connection {
    /// Bind a transport: spawn its reader and writer tasks under a fresh
    /// generation.
    pub(super) fn attach_transport(&mut self, transport: BoxDuplexConnection) {
        debug_assert!(self.transport.is_none(), "attach over a live transport");
        self.transport_generation += 1;
        let generation = self.transport_generation;
        let (mut sink, mut source) = transport.split();
        let cancel = CancellationToken::new();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Bytes>();

        // The writer drains until its channel closes, so frames queued at
        // teardown (a final ERROR) still reach the wire.
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = writer_rx.recv().await {
                if let Err(error) = sink.send(frame).await {
                    let _ = events.send(Event::TransportClosed {
                        generation,
                        error: Some(error),
                    });
                    break;
                }
            }
        });

        let events = self.events_tx.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = reader_cancel.cancelled() => break,
                    frame = source.next_frame() => {
                        let closed = match frame {
                            Ok(Some(bytes)) => events
                                .send(Event::InboundFrame { generation, bytes })
                                .is_err(),
                            Ok(None) => {
                                let _ = events.send(Event::TransportClosed {
                                    generation,
                                    error: None,
                                });
                                true
                            }
                            Err(error) => {
                                let _ = events.send(Event::TransportClosed {
                                    generation,
                                    error: Some(error),
                                });
                                true
                            }
                        };
                        if closed {
                            break;
                        }
                    }
                }
            }
        });

        self.transport = Some(TransportBinding {
            writer: writer_tx,
            cancel,
            generation,
        });
    }

    /// Drop the transport binding, stopping its tasks.
    pub(super) fn detach_transport(&mut self) {
        if let Some(binding) = self.transport.take() {
            binding.cancel.cancel();
        }
    }

    /// Serialize and send a frame, or queue it while the transport is
    /// unavailable or a resume handshake is in flight.
    pub(super) fn output_frame_or_enqueue(&mut self, frame: &Frame) {
        let Some(codec) = self.codec else {
            warn!("dropping {} frame: no codec negotiated", frame.frame_type());
            return;
        };
        let bytes = codec.encode(frame);
        if self.can_output_now() {
            self.output_now(bytes);
        } else {
            debug!("queueing {} frame while {:?}", frame.frame_type(), self.status);
            self.pending_output.push_back(bytes);
        }
    }

    fn can_output_now(&self) -> bool {
        self.status == Status::Connected && self.resume_waiter.is_none() && self.transport.is_some()
    }

    /// Send serialized bytes immediately, tracking them for resumption.
    pub(super) fn output_now(&mut self, bytes: Bytes) {
        if self.resumable {
            if let Some(codec) = self.codec {
                if let (Some(frame_type), Some(stream_id)) =
                    (codec.peek_frame_type(&bytes), codec.peek_stream_id(&bytes))
                {
                    self.resume.track_sent(bytes.clone(), frame_type, stream_id);
                }
            }
        }
        crate::metrics::frame_written();
        self.send_on_transport(bytes);
    }

    /// Push bytes straight onto the transport writer, bypassing queueing
    /// and tracking. Used for handshake frames and cache replay.
    pub(super) fn send_on_transport(&mut self, bytes: Bytes) {
        if let Some(binding) = &self.transport {
            let _ = binding.writer.send(bytes);
        }
    }

    /// Flush queued frames after a transition back to `Connected`.
    pub(super) fn flush_pending_output(&mut self) {
        while self.can_output_now() {
            let Some(bytes) = self.pending_output.pop_front() else {
                break;
            };
            self.output_now(bytes);
        }
    }

    /// Emit a KEEPALIVE carrying our implied received position. Clients set
    /// the RESPOND flag; the server echo clears it.
    pub(super) fn write_keepalive(&mut self, respond: bool, data: Bytes) {
        let frame = Frame::Keepalive {
            respond,
            position: self.resume.implied_position(),
            data,
        };
        self.output_frame_or_enqueue(&frame);
    }

    /// Client-side periodic keepalive.
    pub(super) fn send_keepalive(&mut self) { self.write_keepalive(true, Bytes::new()); }
}
