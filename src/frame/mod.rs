//! Typed frame model for the protocol's twelve interaction frame kinds plus
//! the session frames (SETUP, RESUME, RESUME_OK).
//!
//! Frames here never carry a length prefix; framing belongs to the
//! transport layer (see [`crate::transport`]).

mod codec;
mod version;


pub use codec::{FrameCodec, FrameDecodeError};
pub use version::ProtocolVersion;

use bytes::Bytes;

use crate::{
    error::ErrorCode,
    payload::Payload,
    setup::{ResumeToken, SetupParameters},
};

/// Identifier of a stream within a connection. Zero addresses the
/// connection itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u32);

impl StreamId {
    /// The connection-level stream.
    pub const CONNECTION: Self = Self(0);

    /// Returns `true` for the connection-level stream id.
    #[must_use]
    pub fn is_connection(self) -> bool { self.0 == 0 }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire discriminant of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameType {
    Setup,
    Lease,
    Keepalive,
    RequestResponse,
    RequestFnf,
    RequestStream,
    RequestChannel,
    RequestN,
    Cancel,
    Payload,
    Error,
    MetadataPush,
    Resume,
    ResumeOk,
    Ext,
}

impl FrameType {
    /// Whether frames of this type advance resume positions.
    ///
    /// Only stream-bearing frames count: session and keepalive traffic is
    /// excluded so both sides agree on implied positions regardless of
    /// keepalive cadence.
    #[must_use]
    pub fn is_resumable(self) -> bool {
        !matches!(
            self,
            Self::Setup
                | Self::Lease
                | Self::Keepalive
                | Self::Resume
                | Self::ResumeOk
                | Self::MetadataPush
        )
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Setup => "SETUP",
            Self::Lease => "LEASE",
            Self::Keepalive => "KEEPALIVE",
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::RequestFnf => "REQUEST_FNF",
            Self::RequestStream => "REQUEST_STREAM",
            Self::RequestChannel => "REQUEST_CHANNEL",
            Self::RequestN => "REQUEST_N",
            Self::Cancel => "CANCEL",
            Self::Payload => "PAYLOAD",
            Self::Error => "ERROR",
            Self::MetadataPush => "METADATA_PUSH",
            Self::Resume => "RESUME",
            Self::ResumeOk => "RESUME_OK",
            Self::Ext => "EXT",
        };
        f.write_str(name)
    }
}

/// Frame flag bits, using the current wire layout's positions.
///
/// Several bits are reused across frame kinds (RESPOND, RESUME_ENABLE and
/// FOLLOWS share a position); interpretation depends on the frame type, as
/// on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameFlags(pub u16);

impl FrameFlags {
    /// No flags set.
    pub const EMPTY: Self = Self(0);
    /// Frame can be ignored if not understood.
    pub const IGNORE: Self = Self(0x200);
    /// Metadata is present.
    pub const METADATA: Self = Self(0x100);
    /// More fragments follow this frame.
    pub const FOLLOWS: Self = Self(0x80);
    /// KEEPALIVE: the receiver must echo the frame back.
    pub const KEEPALIVE_RESPOND: Self = Self(0x80);
    /// SETUP: the client requests a resumable session.
    pub const RESUME_ENABLE: Self = Self(0x80);
    /// SETUP: the client honours LEASE frames.
    pub const LEASE: Self = Self(0x40);
    /// The stream is complete.
    pub const COMPLETE: Self = Self(0x40);
    /// PAYLOAD: the frame carries a value.
    pub const NEXT: Self = Self(0x20);

    /// Returns `true` when every bit of `flag` is set.
    #[must_use]
    pub fn contains(self, flag: Self) -> bool { self.0 & flag.0 == flag.0 }
}

impl std::ops::BitOr for FrameFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

impl std::ops::BitOrAssign for FrameFlags {
    fn bitor_assign(&mut self, rhs: Self) { self.0 |= rhs.0; }
}

/// A decoded protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Session establishment, first frame on a new connection.
    Setup {
        /// Client honours LEASE frames.
        lease: bool,
        version: ProtocolVersion,
        keepalive_time_ms: u32,
        max_lifetime_ms: u32,
        token: Option<ResumeToken>,
        metadata_mime: String,
        data_mime: String,
        payload: Payload,
    },
    /// Server grants the client a request budget. Acknowledged only.
    Lease {
        ttl_ms: u32,
        number_of_requests: u32,
        metadata: Option<Bytes>,
    },
    /// Liveness probe carrying the sender's implied received position.
    Keepalive {
        respond: bool,
        position: u64,
        data: Bytes,
    },
    /// Begin a request/response interaction.
    RequestResponse { stream_id: StreamId, payload: Payload },
    /// Fire-and-forget request.
    RequestFnf { stream_id: StreamId, payload: Payload },
    /// Begin a requested stream with an initial credit.
    RequestStream {
        stream_id: StreamId,
        initial_request_n: u32,
        payload: Payload,
    },
    /// Begin a bidirectional channel with an initial credit.
    RequestChannel {
        stream_id: StreamId,
        initial_request_n: u32,
        complete: bool,
        payload: Payload,
    },
    /// Grant the peer additional emission credit on a stream.
    RequestN { stream_id: StreamId, n: u32 },
    /// Requester abandons a stream.
    Cancel { stream_id: StreamId },
    /// Stream data and/or completion.
    Payload {
        stream_id: StreamId,
        next: bool,
        complete: bool,
        follows: bool,
        payload: Payload,
    },
    /// Terminate a stream (or the connection, at stream zero).
    Error {
        stream_id: StreamId,
        code: ErrorCode,
        data: Bytes,
    },
    /// Connection-scoped metadata, no stream.
    MetadataPush { metadata: Bytes },
    /// Client requests warm resumption of a prior session.
    Resume {
        version: ProtocolVersion,
        token: ResumeToken,
        last_received_server_position: u64,
        first_available_client_position: u64,
    },
    /// Server accepts resumption, naming its implied received position.
    ResumeOk { position: u64 },
    /// Extension frame, ignored unless understood.
    Ext {
        stream_id: StreamId,
        extended_type: u32,
        payload: Payload,
    },
}

impl Frame {
    /// The stream this frame addresses (zero for connection frames).
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Setup { .. }
            | Self::Lease { .. }
            | Self::Keepalive { .. }
            | Self::MetadataPush { .. }
            | Self::Resume { .. }
            | Self::ResumeOk { .. } => StreamId::CONNECTION,
            Self::RequestResponse { stream_id, .. }
            | Self::RequestFnf { stream_id, .. }
            | Self::RequestStream { stream_id, .. }
            | Self::RequestChannel { stream_id, .. }
            | Self::RequestN { stream_id, .. }
            | Self::Cancel { stream_id }
            | Self::Payload { stream_id, .. }
            | Self::Error { stream_id, .. }
            | Self::Ext { stream_id, .. } => *stream_id,
        }
    }

    /// The frame's wire discriminant.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Setup { .. } => FrameType::Setup,
            Self::Lease { .. } => FrameType::Lease,
            Self::Keepalive { .. } => FrameType::Keepalive,
            Self::RequestResponse { .. } => FrameType::RequestResponse,
            Self::RequestFnf { .. } => FrameType::RequestFnf,
            Self::RequestStream { .. } => FrameType::RequestStream,
            Self::RequestChannel { .. } => FrameType::RequestChannel,
            Self::RequestN { .. } => FrameType::RequestN,
            Self::Cancel { .. } => FrameType::Cancel,
            Self::Payload { .. } => FrameType::Payload,
            Self::Error { .. } => FrameType::Error,
            Self::MetadataPush { .. } => FrameType::MetadataPush,
            Self::Resume { .. } => FrameType::Resume,
            Self::ResumeOk { .. } => FrameType::ResumeOk,
            Self::Ext { .. } => FrameType::Ext,
        }
    }

    /// A connection-level ERROR frame with `CONNECTION_ERROR`.
    #[must_use]
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::Error {
            stream_id: StreamId::CONNECTION,
            code: ErrorCode::ConnectionError,
            data: Bytes::from(message.into()),
        }
    }

    /// A stream- or connection-level ERROR frame with an explicit code.
    #[must_use]
    pub fn error(stream_id: StreamId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            stream_id,
            code,
            data: Bytes::from(message.into()),
        }
    }

    /// A PAYLOAD frame carrying only the COMPLETE flag.
    #[must_use]
    pub fn payload_complete(stream_id: StreamId) -> Self {
        Self::Payload {
            stream_id,
            next: false,
            complete: true,
            follows: false,
            payload: Payload::default(),
        }
    }

    /// Build the SETUP frame announcing `params`.
    #[must_use]
    pub fn setup(params: &SetupParameters) -> Self {
        Self::Setup {
            lease: false,
            version: params.version,
            keepalive_time_ms: u32::try_from(params.keepalive_time.as_millis()).unwrap_or(u32::MAX),
            max_lifetime_ms: u32::try_from(params.max_lifetime.as_millis()).unwrap_or(u32::MAX),
            token: params.resumable.then_some(params.token),
            metadata_mime: params.metadata_mime.clone(),
            data_mime: params.data_mime.clone(),
            payload: params.payload.clone(),
        }
    }
}
