//! Wire codec for the supported protocol versions.
//!
//! The current layout (1.0) leads with the stream id; the legacy 0.x layout
//! leads with the frame type and widens the flag word. One codec instance is
//! selected per connection — by the client from its setup parameters, by the
//! server through [`FrameCodec::autodetect`] on the first received frame —
//! and never changes afterwards.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Frame, FrameFlags, FrameType, ProtocolVersion, StreamId};
use crate::{
    error::ErrorCode,
    payload::Payload,
    setup::{ResumeToken, RESUME_TOKEN_LEN},
};

/// Error produced while decoding a frame.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FrameDecodeError {
    /// The frame ended before a required field.
    #[error("frame truncated: {needed} more bytes required")]
    Truncated {
        /// Bytes missing for the next field.
        needed: usize,
    },
    /// The header named a frame type this version does not define.
    #[error("unknown frame type {0:#06x}")]
    UnknownType(u16),
    /// A SETUP or RESUME frame named a version this implementation cannot
    /// speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(ProtocolVersion),
    /// The resume token length field disagreed with the fixed token size.
    #[error("resume token length {0} is invalid")]
    InvalidTokenLength(usize),
    /// A MIME type string was not valid UTF-8.
    #[error("mime type is not valid UTF-8")]
    InvalidMime,
    /// The metadata length prefix pointed past the end of the frame.
    #[error("metadata length {length} exceeds remaining frame size {available}")]
    MetadataOverrun {
        /// Declared metadata length.
        length: usize,
        /// Bytes actually remaining.
        available: usize,
    },
}

/// Encoder/decoder for one protocol version.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameCodec {
    version: ProtocolVersion,
}

impl FrameCodec {
    /// Create a codec for `version`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameDecodeError::UnsupportedVersion`] when this
    /// implementation cannot serialize the version.
    pub fn new(version: ProtocolVersion) -> Result<Self, FrameDecodeError> {
        if version.is_supported() {
            Ok(Self { version })
        } else {
            Err(FrameDecodeError::UnsupportedVersion(version))
        }
    }

    /// A codec for the latest protocol version.
    #[must_use]
    pub fn latest() -> Self {
        Self {
            version: ProtocolVersion::LATEST,
        }
    }

    /// The version this codec speaks.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion { self.version }

    fn is_legacy(&self) -> bool { self.version.major == 0 }

    /// Detect the codec from the first frame a server receives, which must
    /// be SETUP or RESUME.
    ///
    /// Returns `None` when the bytes match neither supported layout.
    #[must_use]
    pub fn autodetect(frame: &[u8]) -> Option<Self> {
        // Current layout: zero stream id, then SETUP or RESUME in the high
        // six bits of the type/flags word, version at offset 6.
        if frame.len() >= 10 && frame[0..4] == [0, 0, 0, 0] {
            let ty = u16::from(frame[4]) >> 2;
            if ty == 0x01 || ty == 0x0D {
                let version = ProtocolVersion::new(
                    u16::from_be_bytes([frame[6], frame[7]]),
                    u16::from_be_bytes([frame[8], frame[9]]),
                );
                if version.major >= 1 {
                    return Self::new(version).ok();
                }
            }
        }
        // Legacy layout: type word first, zero stream id at offset 4,
        // version at offset 8.
        if frame.len() >= 12 && frame[4..8] == [0, 0, 0, 0] {
            let ty = u16::from_be_bytes([frame[0], frame[1]]);
            if ty == 0x0001 || ty == 0x000E {
                let version = ProtocolVersion::new(
                    u16::from_be_bytes([frame[8], frame[9]]),
                    u16::from_be_bytes([frame[10], frame[11]]),
                );
                if version.major == 0 {
                    return Self::new(version).ok();
                }
            }
        }
        None
    }

    /// Read the frame type without decoding the body.
    #[must_use]
    pub fn peek_frame_type(&self, frame: &[u8]) -> Option<FrameType> {
        if self.is_legacy() {
            if frame.len() < 2 {
                return None;
            }
            type_from_code_legacy(u16::from_be_bytes([frame[0], frame[1]]))
        } else {
            if frame.len() < 6 {
                return None;
            }
            type_from_code_v1(u16::from(frame[4]) >> 2)
        }
    }

    /// Read the stream id without decoding the body.
    #[must_use]
    pub fn peek_stream_id(&self, frame: &[u8]) -> Option<StreamId> {
        let range = if self.is_legacy() { 4..8 } else { 0..4 };
        let bytes: [u8; 4] = frame.get(range)?.try_into().ok()?;
        Some(StreamId(u32::from_be_bytes(bytes) & 0x7FFF_FFFF))
    }

    /// Serialize `frame` without a length prefix.
    #[must_use]
    pub fn encode(&self, frame: &Frame) -> Bytes {
        let mut dst = BytesMut::with_capacity(frame_size_hint(frame));
        match frame {
            Frame::Setup {
                lease,
                version,
                keepalive_time_ms,
                max_lifetime_ms,
                token,
                metadata_mime,
                data_mime,
                payload,
            } => {
                let mut flags = metadata_flag(&payload.metadata);
                if *lease {
                    flags |= FrameFlags::LEASE;
                }
                if token.is_some() {
                    flags |= FrameFlags::RESUME_ENABLE;
                }
                self.put_header(&mut dst, StreamId::CONNECTION, FrameType::Setup, flags);
                dst.put_u16(version.major);
                dst.put_u16(version.minor);
                dst.put_u32(*keepalive_time_ms);
                dst.put_u32(*max_lifetime_ms);
                if let Some(token) = token {
                    dst.put_u16(RESUME_TOKEN_LEN as u16);
                    dst.put_slice(token.as_slice());
                }
                put_mime(&mut dst, metadata_mime);
                put_mime(&mut dst, data_mime);
                put_payload(&mut dst, payload);
            }
            Frame::Lease {
                ttl_ms,
                number_of_requests,
                metadata,
            } => {
                self.put_header(
                    &mut dst,
                    StreamId::CONNECTION,
                    FrameType::Lease,
                    metadata_flag(metadata),
                );
                dst.put_u32(*ttl_ms);
                dst.put_u32(*number_of_requests);
                if let Some(meta) = metadata {
                    dst.put_slice(meta);
                }
            }
            Frame::Keepalive {
                respond,
                position,
                data,
            } => {
                let flags = if *respond {
                    FrameFlags::KEEPALIVE_RESPOND
                } else {
                    FrameFlags::EMPTY
                };
                self.put_header(&mut dst, StreamId::CONNECTION, FrameType::Keepalive, flags);
                dst.put_u64(*position);
                dst.put_slice(data);
            }
            Frame::RequestResponse { stream_id, payload } => {
                self.put_header(
                    &mut dst,
                    *stream_id,
                    FrameType::RequestResponse,
                    metadata_flag(&payload.metadata),
                );
                put_payload(&mut dst, payload);
            }
            Frame::RequestFnf { stream_id, payload } => {
                self.put_header(
                    &mut dst,
                    *stream_id,
                    FrameType::RequestFnf,
                    metadata_flag(&payload.metadata),
                );
                put_payload(&mut dst, payload);
            }
            Frame::RequestStream {
                stream_id,
                initial_request_n,
                payload,
            } => {
                self.put_header(
                    &mut dst,
                    *stream_id,
                    FrameType::RequestStream,
                    metadata_flag(&payload.metadata),
                );
                dst.put_u32(*initial_request_n);
                put_payload(&mut dst, payload);
            }
            Frame::RequestChannel {
                stream_id,
                initial_request_n,
                complete,
                payload,
            } => {
                let mut flags = metadata_flag(&payload.metadata);
                if *complete {
                    flags |= FrameFlags::COMPLETE;
                }
                self.put_header(&mut dst, *stream_id, FrameType::RequestChannel, flags);
                dst.put_u32(*initial_request_n);
                put_payload(&mut dst, payload);
            }
            Frame::RequestN { stream_id, n } => {
                self.put_header(&mut dst, *stream_id, FrameType::RequestN, FrameFlags::EMPTY);
                dst.put_u32(*n);
            }
            Frame::Cancel { stream_id } => {
                self.put_header(&mut dst, *stream_id, FrameType::Cancel, FrameFlags::EMPTY);
            }
            Frame::Payload {
                stream_id,
                next,
                complete,
                follows,
                payload,
            } => {
                let mut flags = metadata_flag(&payload.metadata);
                if *next {
                    flags |= FrameFlags::NEXT;
                }
                if *complete {
                    flags |= FrameFlags::COMPLETE;
                }
                if *follows {
                    flags |= FrameFlags::FOLLOWS;
                }
                self.put_header(&mut dst, *stream_id, FrameType::Payload, flags);
                put_payload(&mut dst, payload);
            }
            Frame::Error {
                stream_id,
                code,
                data,
            } => {
                self.put_header(&mut dst, *stream_id, FrameType::Error, FrameFlags::EMPTY);
                dst.put_u32(code.to_u32());
                dst.put_slice(data);
            }
            Frame::MetadataPush { metadata } => {
                self.put_header(
                    &mut dst,
                    StreamId::CONNECTION,
                    FrameType::MetadataPush,
                    FrameFlags::METADATA,
                );
                dst.put_slice(metadata);
            }
            Frame::Resume {
                version,
                token,
                last_received_server_position,
                first_available_client_position,
            } => {
                self.put_header(
                    &mut dst,
                    StreamId::CONNECTION,
                    FrameType::Resume,
                    FrameFlags::EMPTY,
                );
                dst.put_u16(version.major);
                dst.put_u16(version.minor);
                dst.put_u16(RESUME_TOKEN_LEN as u16);
                dst.put_slice(token.as_slice());
                dst.put_u64(*last_received_server_position);
                dst.put_u64(*first_available_client_position);
            }
            Frame::ResumeOk { position } => {
                self.put_header(
                    &mut dst,
                    StreamId::CONNECTION,
                    FrameType::ResumeOk,
                    FrameFlags::EMPTY,
                );
                dst.put_u64(*position);
            }
            Frame::Ext {
                stream_id,
                extended_type,
                payload,
            } => {
                let flags = FrameFlags::IGNORE | metadata_flag(&payload.metadata);
                self.put_header(&mut dst, *stream_id, FrameType::Ext, flags);
                dst.put_u32(*extended_type);
                put_payload(&mut dst, payload);
            }
        }
        dst.freeze()
    }

    /// Decode a frame from its serialized bytes (no length prefix).
    ///
    /// # Errors
    ///
    /// Returns a [`FrameDecodeError`] describing the first malformed field.
    pub fn decode(&self, mut frame: Bytes) -> Result<Frame, FrameDecodeError> {
        let (stream_id, frame_type, flags) = self.read_header(&mut frame)?;
        let has_metadata = flags.contains(FrameFlags::METADATA);
        match frame_type {
            FrameType::Setup => {
                need(&frame, 12)?;
                let version = ProtocolVersion::new(frame.get_u16(), frame.get_u16());
                if !version.is_supported() {
                    return Err(FrameDecodeError::UnsupportedVersion(version));
                }
                let keepalive_time_ms = frame.get_u32();
                let max_lifetime_ms = frame.get_u32();
                let token = if flags.contains(FrameFlags::RESUME_ENABLE) {
                    Some(read_token(&mut frame)?)
                } else {
                    None
                };
                let metadata_mime = read_mime(&mut frame)?;
                let data_mime = read_mime(&mut frame)?;
                let payload = read_payload(&mut frame, has_metadata)?;
                Ok(Frame::Setup {
                    lease: flags.contains(FrameFlags::LEASE),
                    version,
                    keepalive_time_ms,
                    max_lifetime_ms,
                    token,
                    metadata_mime,
                    data_mime,
                    payload,
                })
            }
            FrameType::Lease => {
                need(&frame, 8)?;
                let ttl_ms = frame.get_u32();
                let number_of_requests = frame.get_u32();
                let metadata = has_metadata.then(|| frame.split_to(frame.len()));
                Ok(Frame::Lease {
                    ttl_ms,
                    number_of_requests,
                    metadata,
                })
            }
            FrameType::Keepalive => {
                need(&frame, 8)?;
                let position = frame.get_u64();
                Ok(Frame::Keepalive {
                    respond: flags.contains(FrameFlags::KEEPALIVE_RESPOND),
                    position,
                    data: frame,
                })
            }
            FrameType::RequestResponse => Ok(Frame::RequestResponse {
                stream_id,
                payload: read_payload(&mut frame, has_metadata)?,
            }),
            FrameType::RequestFnf => Ok(Frame::RequestFnf {
                stream_id,
                payload: read_payload(&mut frame, has_metadata)?,
            }),
            FrameType::RequestStream => {
                need(&frame, 4)?;
                let initial_request_n = frame.get_u32();
                Ok(Frame::RequestStream {
                    stream_id,
                    initial_request_n,
                    payload: read_payload(&mut frame, has_metadata)?,
                })
            }
            FrameType::RequestChannel => {
                need(&frame, 4)?;
                let initial_request_n = frame.get_u32();
                Ok(Frame::RequestChannel {
                    stream_id,
                    initial_request_n,
                    complete: flags.contains(FrameFlags::COMPLETE),
                    payload: read_payload(&mut frame, has_metadata)?,
                })
            }
            FrameType::RequestN => {
                need(&frame, 4)?;
                Ok(Frame::RequestN {
                    stream_id,
                    n: frame.get_u32(),
                })
            }
            FrameType::Cancel => Ok(Frame::Cancel { stream_id }),
            FrameType::Payload => Ok(Frame::Payload {
                stream_id,
                next: flags.contains(FrameFlags::NEXT),
                complete: flags.contains(FrameFlags::COMPLETE),
                follows: flags.contains(FrameFlags::FOLLOWS),
                payload: read_payload(&mut frame, has_metadata)?,
            }),
            FrameType::Error => {
                need(&frame, 4)?;
                Ok(Frame::Error {
                    stream_id,
                    code: ErrorCode::from_u32(frame.get_u32()),
                    data: frame,
                })
            }
            FrameType::MetadataPush => Ok(Frame::MetadataPush { metadata: frame }),
            FrameType::Resume => {
                need(&frame, 4)?;
                let version = ProtocolVersion::new(frame.get_u16(), frame.get_u16());
                let token = read_token(&mut frame)?;
                need(&frame, 16)?;
                Ok(Frame::Resume {
                    version,
                    token,
                    last_received_server_position: frame.get_u64(),
                    first_available_client_position: frame.get_u64(),
                })
            }
            FrameType::ResumeOk => {
                need(&frame, 8)?;
                Ok(Frame::ResumeOk {
                    position: frame.get_u64(),
                })
            }
            FrameType::Ext => {
                need(&frame, 4)?;
                let extended_type = frame.get_u32();
                Ok(Frame::Ext {
                    stream_id,
                    extended_type,
                    payload: read_payload(&mut frame, has_metadata)?,
                })
            }
        }
    }

    fn put_header(&self, dst: &mut BytesMut, stream_id: StreamId, ty: FrameType, flags: FrameFlags) {
        if self.is_legacy() {
            dst.put_u16(type_code_legacy(ty));
            dst.put_u16(flags.0 << 6);
            dst.put_u32(stream_id.0);
        } else {
            dst.put_u32(stream_id.0);
            dst.put_u16((type_code_v1(ty) << 10) | flags.0);
        }
    }

    fn read_header(
        &self,
        frame: &mut Bytes,
    ) -> Result<(StreamId, FrameType, FrameFlags), FrameDecodeError> {
        if self.is_legacy() {
            need(frame, 8)?;
            let code = frame.get_u16();
            let flags = FrameFlags(frame.get_u16() >> 6);
            let stream_id = StreamId(frame.get_u32() & 0x7FFF_FFFF);
            let ty = type_from_code_legacy(code).ok_or(FrameDecodeError::UnknownType(code))?;
            Ok((stream_id, ty, flags))
        } else {
            need(frame, 6)?;
            let stream_id = StreamId(frame.get_u32() & 0x7FFF_FFFF);
            let word = frame.get_u16();
            let code = word >> 10;
            let ty = type_from_code_v1(code).ok_or(FrameDecodeError::UnknownType(code))?;
            Ok((stream_id, ty, FrameFlags(word & 0x03FF)))
        }
    }
}

fn need(frame: &Bytes, n: usize) -> Result<(), FrameDecodeError> {
    if frame.remaining() < n {
        Err(FrameDecodeError::Truncated {
            needed: n - frame.remaining(),
        })
    } else {
        Ok(())
    }
}

fn metadata_flag(metadata: &Option<Bytes>) -> FrameFlags {
    if metadata.is_some() {
        FrameFlags::METADATA
    } else {
        FrameFlags::EMPTY
    }
}

fn put_mime(dst: &mut BytesMut, mime: &str) {
    debug_assert!(mime.len() <= usize::from(u8::MAX), "mime type too long");
    let len = mime.len().min(usize::from(u8::MAX));
    dst.put_u8(len as u8);
    dst.put_slice(&mime.as_bytes()[..len]);
}

fn read_mime(frame: &mut Bytes) -> Result<String, FrameDecodeError> {
    need(frame, 1)?;
    let len = usize::from(frame.get_u8());
    need(frame, len)?;
    let raw = frame.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FrameDecodeError::InvalidMime)
}

fn read_token(frame: &mut Bytes) -> Result<ResumeToken, FrameDecodeError> {
    need(frame, 2)?;
    let len = usize::from(frame.get_u16());
    need(frame, len)?;
    let raw = frame.split_to(len);
    ResumeToken::try_from(raw.as_ref()).map_err(FrameDecodeError::InvalidTokenLength)
}

fn put_payload(dst: &mut BytesMut, payload: &Payload) {
    if let Some(meta) = &payload.metadata {
        dst.put_uint(meta.len() as u64, 3);
        dst.put_slice(meta);
    }
    dst.put_slice(&payload.data);
}

fn read_payload(frame: &mut Bytes, has_metadata: bool) -> Result<Payload, FrameDecodeError> {
    let metadata = if has_metadata {
        need(frame, 3)?;
        let len = usize::try_from(frame.get_uint(3)).unwrap_or(usize::MAX);
        if frame.remaining() < len {
            return Err(FrameDecodeError::MetadataOverrun {
                length: len,
                available: frame.remaining(),
            });
        }
        Some(frame.split_to(len))
    } else {
        None
    };
    let data = frame.split_to(frame.len());
    Ok(Payload { metadata, data })
}

fn frame_size_hint(frame: &Frame) -> usize {
    const HEADER: usize = 8;
    HEADER
        + match frame {
            Frame::Setup { payload, .. } => 64 + payload.len(),
            Frame::Lease { metadata, .. } => 8 + metadata.as_ref().map_or(0, Bytes::len),
            Frame::Keepalive { data, .. } => 8 + data.len(),
            Frame::RequestStream { payload, .. } | Frame::RequestChannel { payload, .. } => {
                7 + payload.len()
            }
            Frame::RequestResponse { payload, .. }
            | Frame::RequestFnf { payload, .. }
            | Frame::Payload { payload, .. } => 3 + payload.len(),
            Frame::RequestN { .. } => 4,
            Frame::Cancel { .. } => 0,
            Frame::Error { data, .. } => 4 + data.len(),
            Frame::MetadataPush { metadata } => metadata.len(),
            Frame::Resume { .. } => 38,
            Frame::ResumeOk { .. } => 8,
            Frame::Ext { payload, .. } => 7 + payload.len(),
        }
}

fn type_code_v1(ty: FrameType) -> u16 {
    match ty {
        FrameType::Setup => 0x01,
        FrameType::Lease => 0x02,
        FrameType::Keepalive => 0x03,
        FrameType::RequestResponse => 0x04,
        FrameType::RequestFnf => 0x05,
        FrameType::RequestStream => 0x06,
        FrameType::RequestChannel => 0x07,
        FrameType::RequestN => 0x08,
        FrameType::Cancel => 0x09,
        FrameType::Payload => 0x0A,
        FrameType::Error => 0x0B,
        FrameType::MetadataPush => 0x0C,
        FrameType::Resume => 0x0D,
        FrameType::ResumeOk => 0x0E,
        FrameType::Ext => 0x3F,
    }
}

fn type_from_code_v1(code: u16) -> Option<FrameType> {
    Some(match code {
        0x01 => FrameType::Setup,
        0x02 => FrameType::Lease,
        0x03 => FrameType::Keepalive,
        0x04 => FrameType::RequestResponse,
        0x05 => FrameType::RequestFnf,
        0x06 => FrameType::RequestStream,
        0x07 => FrameType::RequestChannel,
        0x08 => FrameType::RequestN,
        0x09 => FrameType::Cancel,
        0x0A => FrameType::Payload,
        0x0B => FrameType::Error,
        0x0C => FrameType::MetadataPush,
        0x0D => FrameType::Resume,
        0x0E => FrameType::ResumeOk,
        0x3F => FrameType::Ext,
        _ => return None,
    })
}

fn type_code_legacy(ty: FrameType) -> u16 {
    match ty {
        FrameType::Setup => 0x0001,
        FrameType::Lease => 0x0002,
        FrameType::Keepalive => 0x0003,
        FrameType::RequestResponse => 0x0004,
        FrameType::RequestFnf => 0x0005,
        FrameType::RequestStream => 0x0006,
        FrameType::RequestChannel => 0x0008,
        FrameType::RequestN => 0x0009,
        FrameType::Cancel => 0x000A,
        FrameType::Payload => 0x000B,
        FrameType::Error => 0x000C,
        FrameType::MetadataPush => 0x000D,
        FrameType::Resume => 0x000E,
        FrameType::ResumeOk => 0x000F,
        FrameType::Ext => 0xFFFF,
    }
}

fn type_from_code_legacy(code: u16) -> Option<FrameType> {
    Some(match code {
        0x0001 => FrameType::Setup,
        0x0002 => FrameType::Lease,
        0x0003 => FrameType::Keepalive,
        0x0004 => FrameType::RequestResponse,
        0x0005 => FrameType::RequestFnf,
        0x0006 => FrameType::RequestStream,
        0x0008 => FrameType::RequestChannel,
        0x0009 => FrameType::RequestN,
        0x000A => FrameType::Cancel,
        0x000B => FrameType::Payload,
        0x000C => FrameType::Error,
        0x000D => FrameType::MetadataPush,
        0x000E => FrameType::Resume,
        0x000F => FrameType::ResumeOk,
        0xFFFF => FrameType::Ext,
        _ => return None,
    })
}
