//! Session establishment and resumption parameters.

use std::time::Duration;

use rand::Rng;

use crate::{frame::ProtocolVersion, payload::Payload};

/// Length of a resume identification token in bytes.
pub const RESUME_TOKEN_LEN: usize = 16;

/// Longest accepted MIME type string, bounded by the one-byte wire length.
pub const MAX_MIME_LEN: usize = 255;

/// Opaque identity a client presents to rebind a session onto a new
/// transport. Servers map tokens to retained session state.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResumeToken([u8; RESUME_TOKEN_LEN]);

impl ResumeToken {
    /// Generate a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; RESUME_TOKEN_LEN];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing token bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; RESUME_TOKEN_LEN]) -> Self { Self(bytes) }

    /// Borrow the raw token bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.0 }
}

impl std::fmt::Debug for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResumeToken({self})")
    }
}

impl std::fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl TryFrom<&[u8]> for ResumeToken {
    type Error = usize;

    /// Fails with the offending length when `bytes` is not exactly
    /// [`RESUME_TOKEN_LEN`] long.
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; RESUME_TOKEN_LEN] = bytes.try_into().map_err(|_| bytes.len())?;
        Ok(Self(arr))
    }
}

/// Parameters a client sends in its SETUP frame.
#[derive(Clone, Debug)]
pub struct SetupParameters {
    /// Protocol version to speak; fixed for the connection lifetime.
    pub version: ProtocolVersion,
    /// Whether the session can be resumed after a transport failure.
    pub resumable: bool,
    /// Token identifying the session for later resumption.
    pub token: ResumeToken,
    /// Interval between client KEEPALIVE frames.
    pub keepalive_time: Duration,
    /// Longest silence from the server before the client gives the
    /// transport up.
    pub max_lifetime: Duration,
    /// MIME type of payload metadata.
    pub metadata_mime: String,
    /// MIME type of payload data.
    pub data_mime: String,
    /// Payload carried by the SETUP frame itself.
    pub payload: Payload,
}

impl Default for SetupParameters {
    fn default() -> Self {
        Self {
            version: ProtocolVersion::LATEST,
            resumable: false,
            token: ResumeToken::generate(),
            keepalive_time: Duration::from_secs(5),
            max_lifetime: Duration::from_secs(60),
            metadata_mime: "application/octet-stream".to_owned(),
            data_mime: "application/octet-stream".to_owned(),
            payload: Payload::default(),
        }
    }
}

impl SetupParameters {
    /// Default parameters with resumption enabled under a fresh token.
    #[must_use]
    pub fn resumable() -> Self {
        Self {
            resumable: true,
            ..Self::default()
        }
    }
}

/// Parameters decoded from an inbound RESUME frame.
#[derive(Clone, Debug)]
pub struct ResumeParameters {
    /// Protocol version the resuming client previously negotiated.
    pub version: ProtocolVersion,
    /// Token naming the session to rebind.
    pub token: ResumeToken,
    /// Implied position of server frames the client has received.
    pub last_received_server_position: u64,
    /// Earliest client position still replayable from the client's cache.
    pub first_available_client_position: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_differ() {
        assert_ne!(ResumeToken::generate().0, ResumeToken::generate().0);
    }

    #[test]
    fn token_display_is_hex() {
        let token = ResumeToken::from_bytes([0xAB; RESUME_TOKEN_LEN]);
        assert_eq!(token.to_string(), "ab".repeat(RESUME_TOKEN_LEN));
    }

    #[test]
    fn token_rejects_wrong_length() {
        assert_eq!(ResumeToken::try_from(&[0u8; 5][..]), Err(5));
    }

    #[test]
    fn defaults_are_not_resumable() {
        let params = SetupParameters::default();
        assert!(!params.resumable);
        assert_eq!(params.version, ProtocolVersion::LATEST);
        assert!(SetupParameters::resumable().resumable);
    }
}
