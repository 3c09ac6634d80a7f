//! Canonical error types and protocol error codes.
//!
//! Errors are layered the way the protocol treats them: setup-class codes
//! fail the whole connection, stream-class codes terminate a single stream,
//! and resumption failures surface as a distinguished [`ResumeError`] so
//! callers can fall back to a fresh connection.

use thiserror::Error;

/// Protocol error codes carried by ERROR frames.
///
/// Setup-class codes (`InvalidSetup`, `UnsupportedSetup`, `RejectedSetup`,
/// `RejectedResume`, `ConnectionError`) close the connection; stream-class
/// codes terminate only the stream they name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// The SETUP frame was malformed or arrived at the wrong time.
    InvalidSetup,
    /// The server does not support the requested setup (for example, an
    /// unknown protocol version).
    UnsupportedSetup,
    /// The server declined the setup.
    RejectedSetup,
    /// The server declined to resume the session.
    RejectedResume,
    /// A connection-level protocol violation.
    ConnectionError,
    /// The responder application failed while handling a request.
    ApplicationError,
    /// The responder declined the individual request.
    Rejected,
    /// The stream was canceled.
    Canceled,
    /// The request was invalid for the stream's current state.
    Invalid,
    /// A code this implementation does not recognise, preserved verbatim.
    Other(u32),
}

impl ErrorCode {
    /// Wire value of the code.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        match self {
            Self::InvalidSetup => 0x0001,
            Self::UnsupportedSetup => 0x0002,
            Self::RejectedSetup => 0x0003,
            Self::RejectedResume => 0x0004,
            Self::ConnectionError => 0x0101,
            Self::ApplicationError => 0x0201,
            Self::Rejected => 0x0202,
            Self::Canceled => 0x0203,
            Self::Invalid => 0x0204,
            Self::Other(code) => code,
        }
    }

    /// Decode a wire value, preserving unknown codes.
    #[must_use]
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0001 => Self::InvalidSetup,
            0x0002 => Self::UnsupportedSetup,
            0x0003 => Self::RejectedSetup,
            0x0004 => Self::RejectedResume,
            0x0101 => Self::ConnectionError,
            0x0201 => Self::ApplicationError,
            0x0202 => Self::Rejected,
            0x0203 => Self::Canceled,
            0x0204 => Self::Invalid,
            other => Self::Other(other),
        }
    }

    /// Returns `true` if the code must terminate the whole connection.
    #[must_use]
    pub fn is_connection_level(self) -> bool {
        matches!(
            self,
            Self::InvalidSetup
                | Self::UnsupportedSetup
                | Self::RejectedSetup
                | Self::RejectedResume
                | Self::ConnectionError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSetup => f.write_str("INVALID_SETUP"),
            Self::UnsupportedSetup => f.write_str("UNSUPPORTED_SETUP"),
            Self::RejectedSetup => f.write_str("REJECTED_SETUP"),
            Self::RejectedResume => f.write_str("REJECTED_RESUME"),
            Self::ConnectionError => f.write_str("CONNECTION_ERROR"),
            Self::ApplicationError => f.write_str("APPLICATION_ERROR"),
            Self::Rejected => f.write_str("REJECTED"),
            Self::Canceled => f.write_str("CANCELED"),
            Self::Invalid => f.write_str("INVALID"),
            Self::Other(code) => write!(f, "UNKNOWN({code:#06x})"),
        }
    }
}

/// Error raised by a responder while serving a request.
///
/// Responder handlers return this to terminate the stream with an ERROR
/// frame carrying the chosen stream-class code.
#[derive(Clone, Debug, Error)]
#[error("{code}: {message}")]
pub struct RSocketError {
    /// Stream-class error code to emit.
    pub code: ErrorCode,
    /// Human-readable message placed in the ERROR frame data.
    pub message: String,
}

impl RSocketError {
    /// An `APPLICATION_ERROR` with the given message.
    #[must_use]
    pub fn application(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::ApplicationError,
            message: message.into(),
        }
    }

    /// A `REJECTED` error with the given message.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Rejected,
            message: message.into(),
        }
    }

    /// An `INVALID` error with the given message.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Invalid,
            message: message.into(),
        }
    }
}

/// Terminal error observed by the consumer of a stream.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The responder application failed.
    #[error("application error: {0}")]
    Application(String),
    /// The responder declined the request.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// The stream was canceled.
    #[error("stream canceled")]
    Canceled,
    /// The request was invalid for the stream state.
    #[error("invalid request: {0}")]
    Invalid(String),
    /// The connection failed while the stream was open.
    #[error("connection error: {0}")]
    Connection(String),
    /// The connection was closed while the stream was open.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

impl StreamError {
    /// Map a stream-class ERROR frame onto the terminal the consumer sees.
    #[must_use]
    pub(crate) fn from_error_frame(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::Rejected => Self::Rejected(message),
            ErrorCode::Canceled => Self::Canceled,
            ErrorCode::Invalid => Self::Invalid(message),
            ErrorCode::ApplicationError => Self::Application(message),
            _ => Self::Connection(message),
        }
    }
}

/// Failure reported by [`resume`](crate::client::RSocketClient::resume).
///
/// A failed resumption always closes the old connection; the caller may then
/// open a fresh one.
#[derive(Debug, Error)]
pub enum ResumeError {
    /// The server rejected the resumption attempt.
    #[error("resumption rejected: {0}")]
    Rejected(String),
    /// A connection-level error occurred during the handshake.
    #[error("connection error during resumption: {0}")]
    Connection(String),
    /// The transport failed before the handshake finished.
    #[error("transport error during resumption: {0}")]
    Transport(#[from] std::io::Error),
    /// The session was not established as resumable.
    #[error("session is not resumable")]
    NotResumable,
}
