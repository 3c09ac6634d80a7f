//! Requester-side transitions.
//!
//! Requesters hold their initial frame back until the application shows
//! demand: a stream's REQUEST_STREAM goes out with the first `request_n`,
//! and a channel's REQUEST_CHANNEL goes out once both downstream credit and
//! the first local payload exist.

use log::debug;

use super::{StreamEffect, StreamKind, StreamMachine, StreamSignal, StreamState};
use crate::payload::Payload;

impl StreamMachine {
    pub(super) fn requester_handle_payload(
        &mut self,
        payload: Payload,
        next: bool,
        complete: bool,
    ) -> Vec<StreamEffect> {
        let mut effects = Vec::new();
        match self.kind {
            StreamKind::RequestResponse => {
                if next {
                    effects.push(StreamEffect::DeliverNext(payload));
                }
                // A response is terminal whether or not COMPLETE was set.
                effects.push(self.terminate(StreamSignal::Complete));
            }
            StreamKind::Stream => {
                if next {
                    self.incoming_credit = self.incoming_credit.saturating_sub(1);
                    effects.push(StreamEffect::DeliverNext(payload));
                }
                if complete {
                    effects.push(StreamEffect::DeliverComplete);
                    effects.push(self.terminate(StreamSignal::Complete));
                }
            }
            StreamKind::Channel => {
                if next {
                    self.incoming_credit = self.incoming_credit.saturating_sub(1);
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
            }
            StreamKind::FireAndForget => {
                debug!("ignoring PAYLOAD on a fire-and-forget requester");
            }
        }
        effects
    }

    pub(super) fn requester_local_request_n(&mut self, n: u32) -> Vec<StreamEffect> {
        match self.kind {
            StreamKind::Stream => {
                self.incoming_credit = self.incoming_credit.saturating_add(n);
                if self.state == StreamState::New {
                    self.state = StreamState::Open;
                    vec![StreamEffect::SendInitialRequest {
                        kind: StreamKind::Stream,
                        initial_request_n: n,
                        payload: self.pending_payload.take().unwrap_or_default(),
                        complete: false,
                    }]
                } else {
                    vec![StreamEffect::SendRequestN(n)]
                }
            }
            StreamKind::Channel => {
                self.incoming_credit = self.incoming_credit.saturating_add(n);
                if self.state == StreamState::New {
                    self.pending_initial_n = self.pending_initial_n.saturating_add(n);
                    if self.pending_payload.is_some() || self.local_complete_pending {
                        self.send_initial_channel()
                    } else {
                        Vec::new()
                    }
                } else {
                    vec![StreamEffect::SendRequestN(n)]
                }
            }
            StreamKind::RequestResponse | StreamKind::FireAndForget => {
                debug!("ignoring request_n on a {:?} requester", self.kind);
                Vec::new()
            }
        }
    }

    pub(super) fn requester_local_next(&mut self, payload: Payload) -> Vec<StreamEffect> {
        if self.kind != StreamKind::Channel {
            debug!("ignoring local payload on a {:?} requester", self.kind);
            return Vec::new();
        }
        if self.state == StreamState::New {
            self.pending_payload = Some(payload);
            if self.pending_initial_n > 0 {
                self.send_initial_channel()
            } else {
                Vec::new()
            }
        } else {
            self.outgoing_credit = self.outgoing_credit.saturating_sub(1);
            vec![StreamEffect::SendPayload {
                payload,
                next: true,
                complete: false,
            }]
        }
    }

    pub(super) fn requester_local_complete(&mut self) -> Vec<StreamEffect> {
        if self.kind != StreamKind::Channel {
            debug!("ignoring local completion on a {:?} requester", self.kind);
            return Vec::new();
        }
        match self.state {
            StreamState::New => {
                // Source finished before the initial frame went out; fold
                // the completion into REQUEST_CHANNEL once credit arrives.
                self.local_complete_pending = true;
                if self.pending_initial_n > 0 {
                    self.send_initial_channel()
                } else {
                    Vec::new()
                }
            }
            StreamState::HalfClosedRemote => vec![
                StreamEffect::SendPayload {
                    payload: Payload::default(),
                    next: false,
                    complete: true,
                },
                self.terminate(StreamSignal::Complete),
            ],
            _ => {
                self.state = StreamState::HalfClosedLocal;
                vec![StreamEffect::SendPayload {
                    payload: Payload::default(),
                    next: false,
                    complete: true,
                }]
            }
        }
    }

    /// Emit REQUEST_CHANNEL from the stashed first payload and accumulated
    /// downstream credit.
    fn send_initial_channel(&mut self) -> Vec<StreamEffect> {
        let complete = self.local_complete_pending;
        self.state = if complete {
            StreamState::HalfClosedLocal
        } else {
            StreamState::Open
        };
        let initial_request_n = std::mem::take(&mut self.pending_initial_n);
        vec![StreamEffect::SendInitialRequest {
            kind: StreamKind::Channel,
            initial_request_n,
            payload: self.pending_payload.take().unwrap_or_default(),
            complete,
        }]
    }
}
