//! Metric helpers.
//!
//! Wraps the [`metrics`](https://docs.rs/metrics) crate behind the optional
//! `metrics` Cargo feature; with the feature off every helper is a no-op.

/// Name of the gauge tracking open connections.
pub const CONNECTIONS_ACTIVE: &str = "rsocket_connections_active";
/// Name of the counter tracking frames read off transports.
pub const FRAMES_READ: &str = "rsocket_frames_read_total";
/// Name of the counter tracking frames written to transports.
pub const FRAMES_WRITTEN: &str = "rsocket_frames_written_total";
/// Name of the counter tracking protocol violations.
pub const PROTOCOL_ERRORS: &str = "rsocket_protocol_errors_total";
/// Name of the counter tracking resume handshake outcomes, labelled by
/// `outcome`.
pub const RESUME_OUTCOMES: &str = "rsocket_resume_outcomes_total";

pub(crate) fn connection_opened() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

pub(crate) fn connection_closed() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

pub(crate) fn frame_read() {
    #[cfg(feature = "metrics")]
    metrics::counter!(FRAMES_READ).increment(1);
}

pub(crate) fn frame_written() {
    #[cfg(feature = "metrics")]
    metrics::counter!(FRAMES_WRITTEN).increment(1);
}

pub(crate) fn protocol_error() {
    #[cfg(feature = "metrics")]
    metrics::counter!(PROTOCOL_ERRORS).increment(1);
}

pub(crate) fn resume_succeeded() {
    #[cfg(feature = "metrics")]
    metrics::counter!(RESUME_OUTCOMES, "outcome" => "success").increment(1);
}

pub(crate) fn resume_failed() {
    #[cfg(feature = "metrics")]
    metrics::counter!(RESUME_OUTCOMES, "outcome" => "failure").increment(1);
}
