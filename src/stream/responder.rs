//! Responder-side transitions.

use log::debug;

use super::{StreamEffect, StreamKind, StreamMachine, StreamSignal, StreamState};
use crate::payload::Payload;

impl StreamMachine {
    pub(super) fn responder_handle_payload(
        &mut self,
        payload: Payload,
        next: bool,
        complete: bool,
    ) -> Vec<StreamEffect> {
        if self.kind != StreamKind::Channel {
            debug!("ignoring PAYLOAD on a {:?} responder", self.kind);
            return Vec::new();
        }
        let mut effects = Vec::new();
        if next {
            effects.push(StreamEffect::DeliverNext(payload));
        }
        if complete {
            effects.push(StreamEffect::DeliverComplete);
            if self.state == StreamState::HalfClosedLocal {
                effects.push(self.terminate(StreamSignal::Complete));
            } else {
                self.state = StreamState::HalfClosedRemote;
            }
        }
        effects
    }

    pub(super) fn responder_local_request_n(&mut self, n: u32) -> Vec<StreamEffect> {
        if self.kind == StreamKind::Channel {
            self.incoming_credit = self.incoming_credit.saturating_add(n);
            vec![StreamEffect::SendRequestN(n)]
        } else {
            debug!("ignoring request_n on a {:?} responder", self.kind);
            Vec::new()
        }
    }

    pub(super) fn responder_local_next(&mut self, payload: Payload) -> Vec<StreamEffect> {
        if !matches!(self.kind, StreamKind::Stream | StreamKind::Channel) {
            debug!("ignoring local payload on a {:?} responder", self.kind);
            return Vec::new();
        }
        self.outgoing_credit = self.outgoing_credit.saturating_sub(1);
        vec![StreamEffect::SendPayload {
            payload,
            next: true,
            complete: false,
        }]
    }

    pub(super) fn responder_local_complete(&mut self) -> Vec<StreamEffect> {
        match self.kind {
            StreamKind::Stream => vec![
                StreamEffect::SendPayload {
                    payload: Payload::default(),
                    next: false,
                    complete: true,
                },
                self.terminate(StreamSignal::Complete),
            ],
            StreamKind::Channel => {
                if self.state == StreamState::HalfClosedRemote {
                    vec![
                        StreamEffect::SendPayload {
                            payload: Payload::default(),
                            next: false,
                            complete: true,
                        },
                        self.terminate(StreamSignal::Complete),
                    ]
                } else {
                    self.state = StreamState::HalfClosedLocal;
                    vec![StreamEffect::SendPayload {
                        payload: Payload::default(),
                        next: false,
                        complete: true,
                    }]
                }
            }
            StreamKind::RequestResponse | StreamKind::FireAndForget => {
                debug!("ignoring completion on a {:?} responder", self.kind);
                Vec::new()
            }
        }
    }
}
