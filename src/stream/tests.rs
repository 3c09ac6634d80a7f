//! Transition tests for the stream machines.

use proptest::prelude::*;
use rstest::rstest;

use super::{StreamEffect, StreamKind, StreamMachine, StreamSignal, StreamState};
use crate::{
    error::{RSocketError, StreamError},
    payload::Payload,
};

fn payload(text: &str) -> Payload { Payload::from(text) }

/// Compact effect tags for asserting emission order.
fn tags(effects: &[StreamEffect]) -> Vec<&'static str> {
    effects
        .iter()
        .map(|effect| match effect {
            StreamEffect::SendInitialRequest { .. } => "initial",
            StreamEffect::SendPayload { complete: true, next: false, .. } => "payload-complete",
            StreamEffect::SendPayload { complete: true, .. } => "payload-next-complete",
            StreamEffect::SendPayload { .. } => "payload-next",
            StreamEffect::SendRequestN(_) => "request-n",
            StreamEffect::SendCancel => "cancel",
            StreamEffect::SendError { .. } => "error",
            StreamEffect::DeliverNext(_) => "deliver-next",
            StreamEffect::DeliverComplete => "deliver-complete",
            StreamEffect::DeliverError(_) => "deliver-error",
            StreamEffect::GrantCredit(_) => "grant",
            StreamEffect::Terminate(_) => "terminate",
        })
        .collect()
}

mod stream_requester {
    use super::*;

    #[test]
    fn initial_frame_waits_for_first_request_n() {
        let (mut machine, effects) =
            StreamMachine::requester(StreamKind::Stream, Some(payload("Jane")));
        assert!(effects.is_empty());
        assert_eq!(machine.state(), StreamState::New);

        let effects = machine.local_request_n(7);
        assert_eq!(tags(&effects), ["initial"]);
        let StreamEffect::SendInitialRequest {
            kind,
            initial_request_n,
            ref payload,
            complete,
        } = effects[0]
        else {
            panic!("expected initial request");
        };
        assert_eq!(kind, StreamKind::Stream);
        assert_eq!(initial_request_n, 7);
        assert_eq!(payload.data_utf8(), "Jane");
        assert!(!complete);
        assert_eq!(machine.state(), StreamState::Open);
        assert_eq!(machine.incoming_credit(), 7);
    }

    #[test]
    fn later_demand_becomes_request_n_frames() {
        let (mut machine, _) = StreamMachine::requester(StreamKind::Stream, Some(payload("Jane")));
        machine.local_request_n(7);
        let effects = machine.local_request_n(3);
        assert_eq!(tags(&effects), ["request-n"]);
        assert_eq!(machine.incoming_credit(), 10);
    }

    #[test]
    fn payloads_are_delivered_and_complete_terminates() {
        let (mut machine, _) = StreamMachine::requester(StreamKind::Stream, Some(payload("Jane")));
        machine.local_request_n(2);
        let effects = machine.handle_payload(payload("one"), true, false);
        assert_eq!(tags(&effects), ["deliver-next"]);
        assert_eq!(machine.incoming_credit(), 1);

        let effects = machine.handle_payload(Payload::default(), false, true);
        assert_eq!(tags(&effects), ["deliver-complete", "terminate"]);
        assert_eq!(machine.state(), StreamState::Closed);
    }

    #[test]
    fn cancel_before_initial_sends_nothing() {
        let (mut machine, _) = StreamMachine::requester(StreamKind::Stream, Some(payload("Jane")));
        let effects = machine.local_cancel();
        assert_eq!(tags(&effects), ["terminate"]);
    }

    #[test]
    fn cancel_after_initial_emits_cancel_frame() {
        let (mut machine, _) = StreamMachine::requester(StreamKind::Stream, Some(payload("Jane")));
        machine.local_request_n(1);
        let effects = machine.local_cancel();
        assert_eq!(tags(&effects), ["cancel", "terminate"]);
    }

    #[test]
    fn inputs_after_terminal_are_dropped() {
        let (mut machine, _) = StreamMachine::requester(StreamKind::Stream, Some(payload("Jane")));
        machine.local_request_n(1);
        machine.local_cancel();
        assert!(machine.handle_payload(payload("late"), true, false).is_empty());
        assert!(machine.handle_error(StreamError::Canceled).is_empty());
        assert!(machine.local_request_n(5).is_empty());
        assert!(machine.local_cancel().is_empty());
    }

    #[test]
    fn error_frame_is_terminal() {
        let (mut machine, _) = StreamMachine::requester(StreamKind::Stream, Some(payload("Jane")));
        machine.local_request_n(1);
        let effects = machine.handle_error(StreamError::Application("boom".into()));
        assert_eq!(tags(&effects), ["deliver-error", "terminate"]);
    }
}

mod request_response {
    use super::*;

    #[test]
    fn requester_emits_immediately_and_expects_one_payload() {
        let (mut machine, effects) =
            StreamMachine::requester(StreamKind::RequestResponse, Some(payload("ping")));
        assert_eq!(tags(&effects), ["initial"]);
        assert_eq!(machine.state(), StreamState::Open);

        let effects = machine.handle_payload(payload("pong"), true, true);
        assert_eq!(tags(&effects), ["deliver-next", "terminate"]);
        assert_eq!(machine.state(), StreamState::Closed);
    }

    #[test]
    fn responder_sends_one_payload_then_closes() {
        let (mut machine, effects) = StreamMachine::responder(StreamKind::RequestResponse, 0, false);
        assert!(effects.is_empty());
        let effects = machine.local_response(Ok(payload("pong")));
        assert_eq!(tags(&effects), ["payload-next-complete", "terminate"]);
    }

    #[test]
    fn responder_failure_becomes_error_frame() {
        let (mut machine, _) = StreamMachine::responder(StreamKind::RequestResponse, 0, false);
        let effects = machine.local_response(Err(RSocketError::rejected("no")));
        assert_eq!(tags(&effects), ["error", "terminate"]);
    }

    #[test]
    fn peer_cancel_terminates_responder() {
        let (mut machine, _) = StreamMachine::responder(StreamKind::RequestResponse, 0, false);
        let effects = machine.handle_cancel();
        assert_eq!(tags(&effects), ["terminate"]);
        assert!(machine.local_response(Ok(payload("late"))).is_empty());
    }
}

mod stream_responder {
    use super::*;

    #[test]
    fn creation_grants_initial_credit() {
        let (machine, effects) = StreamMachine::responder(StreamKind::Stream, 7, false);
        assert_eq!(tags(&effects), ["grant"]);
        assert_eq!(machine.outgoing_credit(), 7);
    }

    #[test]
    fn emission_consumes_credit() {
        let (mut machine, _) = StreamMachine::responder(StreamKind::Stream, 2, false);
        let effects = machine.local_next(payload("Hello Jane 1!"));
        assert_eq!(tags(&effects), ["payload-next"]);
        assert_eq!(machine.outgoing_credit(), 1);
        machine.local_next(payload("Hello Jane 2!"));
        assert_eq!(machine.outgoing_credit(), 0);
    }

    #[test]
    fn request_n_tops_up_credit() {
        let (mut machine, _) = StreamMachine::responder(StreamKind::Stream, 1, false);
        let effects = machine.handle_request_n(3);
        assert_eq!(tags(&effects), ["grant"]);
        assert_eq!(machine.outgoing_credit(), 4);
    }

    #[test]
    fn completion_emits_complete_payload_then_terminates() {
        let (mut machine, _) = StreamMachine::responder(StreamKind::Stream, 1, false);
        let effects = machine.local_complete();
        assert_eq!(tags(&effects), ["payload-complete", "terminate"]);
    }

    #[test]
    fn zero_request_n_is_ignored() {
        let (mut machine, _) = StreamMachine::responder(StreamKind::Stream, 1, false);
        assert!(machine.handle_request_n(0).is_empty());
    }
}

mod channel {
    use super::*;

    #[test]
    fn initial_frame_needs_credit_and_first_payload() {
        let (mut machine, effects) = StreamMachine::requester(StreamKind::Channel, None);
        assert!(effects.is_empty());

        assert!(machine.local_request_n(5).is_empty());
        let effects = machine.local_next(payload("first"));
        assert_eq!(tags(&effects), ["initial"]);
        let StreamEffect::SendInitialRequest {
            initial_request_n, ..
        } = effects[0]
        else {
            panic!("expected initial request");
        };
        assert_eq!(initial_request_n, 5);
        assert_eq!(machine.state(), StreamState::Open);
    }

    #[test]
    fn first_payload_waits_for_credit() {
        let (mut machine, _) = StreamMachine::requester(StreamKind::Channel, None);
        assert!(machine.local_next(payload("first")).is_empty());
        let effects = machine.local_request_n(2);
        assert_eq!(tags(&effects), ["initial"]);
    }

    #[test]
    fn source_completing_before_initial_folds_into_request() {
        let (mut machine, _) = StreamMachine::requester(StreamKind::Channel, None);
        machine.local_next(payload("only"));
        machine.local_complete();
        let effects = machine.local_request_n(1);
        assert_eq!(tags(&effects), ["initial"]);
        let StreamEffect::SendInitialRequest { complete, .. } = effects[0] else {
            panic!("expected initial request");
        };
        assert!(complete);
        assert_eq!(machine.state(), StreamState::HalfClosedLocal);
    }

    #[test]
    fn both_directions_must_complete() {
        let (mut machine, _) = StreamMachine::requester(StreamKind::Channel, None);
        machine.local_request_n(4);
        machine.local_next(payload("first"));

        // Remote completes first: inbound side is done, outbound lives on.
        let effects = machine.handle_payload(Payload::default(), false, true);
        assert_eq!(tags(&effects), ["deliver-complete"]);
        assert_eq!(machine.state(), StreamState::HalfClosedRemote);

        let effects = machine.local_complete();
        assert_eq!(tags(&effects), ["payload-complete", "terminate"]);
    }

    #[test]
    fn responder_half_closes_in_either_order() {
        let (mut machine, _) = StreamMachine::responder(StreamKind::Channel, 3, false);
        let effects = machine.local_complete();
        assert_eq!(tags(&effects), ["payload-complete"]);
        assert_eq!(machine.state(), StreamState::HalfClosedLocal);

        let effects = machine.handle_payload(Payload::default(), false, true);
        assert_eq!(tags(&effects), ["deliver-complete", "terminate"]);
    }

    #[test]
    fn responder_opened_complete_starts_half_closed() {
        let (machine, _) = StreamMachine::responder(StreamKind::Channel, 1, true);
        assert_eq!(machine.state(), StreamState::HalfClosedRemote);
    }

    #[test]
    fn responder_grants_input_credit_with_request_n_frames() {
        let (mut machine, _) = StreamMachine::responder(StreamKind::Channel, 1, false);
        let effects = machine.local_request_n(8);
        assert_eq!(tags(&effects), ["request-n"]);
        assert_eq!(machine.incoming_credit(), 8);
    }

    #[test]
    fn peer_cancel_tears_down_both_directions() {
        let (mut machine, _) = StreamMachine::requester(StreamKind::Channel, None);
        machine.local_request_n(1);
        machine.local_next(payload("first"));
        let effects = machine.handle_cancel();
        assert_eq!(tags(&effects), ["deliver-error", "terminate"]);
    }
}

/// Random inputs keep every machine inside its grammar: nothing is emitted
/// after the terminal, and at most one terminal is ever produced.
#[derive(Clone, Debug)]
enum AnyInput {
    Payload { next: bool, complete: bool },
    RequestN(u32),
    Cancel,
    Error,
    LocalRequestN(u32),
    LocalCancel,
    LocalNext,
    LocalComplete,
    LocalError,
}

fn any_input() -> impl Strategy<Value = AnyInput> {
    prop_oneof![
        (any::<bool>(), any::<bool>())
            .prop_map(|(next, complete)| AnyInput::Payload { next, complete }),
        (0u32..16).prop_map(AnyInput::RequestN),
        Just(AnyInput::Cancel),
        Just(AnyInput::Error),
        (0u32..16).prop_map(AnyInput::LocalRequestN),
        Just(AnyInput::LocalCancel),
        Just(AnyInput::LocalNext),
        Just(AnyInput::LocalComplete),
        Just(AnyInput::LocalError),
    ]
}

fn apply(machine: &mut StreamMachine, input: &AnyInput) -> Vec<StreamEffect> {
    match input {
        AnyInput::Payload { next, complete } => {
            machine.handle_payload(payload("x"), *next, *complete)
        }
        AnyInput::RequestN(n) => machine.handle_request_n(*n),
        AnyInput::Cancel => machine.handle_cancel(),
        AnyInput::Error => machine.handle_error(StreamError::Canceled),
        AnyInput::LocalRequestN(n) => machine.local_request_n(*n),
        AnyInput::LocalCancel => machine.local_cancel(),
        AnyInput::LocalNext => machine.local_next(payload("y")),
        AnyInput::LocalComplete => machine.local_complete(),
        AnyInput::LocalError => machine.local_error(RSocketError::application("boom")),
    }
}

proptest! {
    #[test]
    fn machines_stay_inside_their_grammar(
        kind_pick in 0usize..3,
        requester in any::<bool>(),
        inputs in proptest::collection::vec(any_input(), 0..24),
    ) {
        let kind = [StreamKind::RequestResponse, StreamKind::Stream, StreamKind::Channel][kind_pick];
        let (mut machine, setup_effects) = if requester {
            StreamMachine::requester(kind, Some(payload("req")))
        } else {
            StreamMachine::responder(kind, 4, false)
        };

        let mut terminated = setup_effects
            .iter()
            .any(|effect| matches!(effect, StreamEffect::Terminate(_)));
        for input in &inputs {
            let effects = apply(&mut machine, input);
            if terminated {
                prop_assert!(effects.is_empty(), "effects after terminal: {effects:?}");
                continue;
            }
            for effect in &effects {
                if let StreamEffect::Terminate(signal) = effect {
                    prop_assert!(!terminated, "second terminal: {signal:?}");
                    terminated = true;
                }
            }
            // A terminal, once emitted, is the last effect of its batch.
            if let Some(pos) = effects
                .iter()
                .position(|effect| matches!(effect, StreamEffect::Terminate(_)))
            {
                prop_assert_eq!(pos, effects.len() - 1);
            }
        }
        prop_assert_eq!(terminated, machine.state() == StreamState::Closed);
    }

    /// Credit counters never underflow regardless of input order.
    #[test]
    fn credit_is_never_negative(inputs in proptest::collection::vec(any_input(), 0..32)) {
        let (mut machine, _) = StreamMachine::responder(StreamKind::Channel, 2, false);
        for input in &inputs {
            apply(&mut machine, input);
            // u32 counters saturate rather than wrap; reaching the extremes
            // would indicate wrap-around arithmetic.
            prop_assert!(machine.outgoing_credit() < u32::MAX);
            prop_assert!(machine.incoming_credit() < u32::MAX);
        }
    }
}

#[rstest]
#[case::complete(StreamSignal::Complete)]
#[case::cancel(StreamSignal::Cancel)]
fn terminate_reports_signal(#[case] signal: StreamSignal) {
    // Signals are carried verbatim through Terminate effects.
    let (mut machine, _) = StreamMachine::responder(StreamKind::Stream, 1, false);
    let effects = match signal {
        StreamSignal::Complete => machine.local_complete(),
        StreamSignal::Cancel => machine.handle_cancel(),
        _ => unreachable!(),
    };
    assert!(effects
        .iter()
        .any(|effect| matches!(effect, StreamEffect::Terminate(s) if *s == signal)));
}
