//! Application-facing stream of payloads with explicit request-n control.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::mpsc;

use super::event::{ControlCmd, PayloadSink};
use crate::{error::StreamError, payload::Payload};

/// Consumer side of a requested stream, a channel's inbound direction, or a
/// responder channel's input.
///
/// Implements [`Stream`] over `Result<Payload, StreamError>`: payloads in
/// emission order, then either end-of-stream (completion) or one terminal
/// error. The producer emits nothing until credit is granted with
/// [`request_n`](Self::request_n); for requesters, the first grant also
/// puts the initial REQUEST frame on the wire.
pub struct PayloadStream {
    rx: mpsc::UnboundedReceiver<Result<Payload, StreamError>>,
    control: StreamControlHandle,
}

impl PayloadStream {
    /// Build a stream plus the internal sink and control receiver wired to
    /// a connection actor.
    pub(crate) fn channel() -> (
        Self,
        PayloadSink,
        mpsc::UnboundedReceiver<ControlCmd>,
    ) {
        let (sink, rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        (
            Self {
                rx,
                control: StreamControlHandle { tx: control_tx },
            },
            sink,
            control_rx,
        )
    }

    /// Grant the producer `n` more payloads.
    pub fn request_n(&self, n: u32) { self.control.request_n(n); }

    /// Abandon the stream. Later inbound payloads are dropped.
    pub fn cancel(&self) { self.control.cancel(); }

    /// A cloneable control handle usable while the stream is being
    /// consumed elsewhere.
    #[must_use]
    pub fn control(&self) -> StreamControlHandle { self.control.clone() }
}

impl Stream for PayloadStream {
    type Item = Result<Payload, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Demand and cancellation handle detached from the consuming half.
///
/// Operations on a dead connection or terminated stream are no-ops.
#[derive(Clone)]
pub struct StreamControlHandle {
    tx: mpsc::UnboundedSender<ControlCmd>,
}

impl StreamControlHandle {
    /// Grant the producer `n` more payloads.
    pub fn request_n(&self, n: u32) { let _ = self.tx.send(ControlCmd::RequestN(n)); }

    /// Abandon the stream.
    pub fn cancel(&self) { let _ = self.tx.send(ControlCmd::Cancel); }
}
