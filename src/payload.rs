//! Application payloads exchanged over streams.

use bytes::Bytes;

/// A unit of application data: optional metadata plus a data body.
///
/// Both halves are cheaply cloneable [`Bytes`] buffers; cloning a payload
/// never copies the underlying storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    /// Optional metadata bytes, present when the frame's METADATA flag is set.
    pub metadata: Option<Bytes>,
    /// Data bytes.
    pub data: Bytes,
}

impl Payload {
    /// Create a payload from data bytes with no metadata.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            metadata: None,
            data: data.into(),
        }
    }

    /// Create a payload carrying both data and metadata.
    #[must_use]
    pub fn with_metadata(data: impl Into<Bytes>, metadata: impl Into<Bytes>) -> Self {
        Self {
            metadata: Some(metadata.into()),
            data: data.into(),
        }
    }

    /// Interpret the data bytes as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn data_utf8(&self) -> String { String::from_utf8_lossy(&self.data).into_owned() }

    /// Serialized size in bytes: metadata plus data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metadata.as_ref().map_or(0, Bytes::len) + self.data.len()
    }

    /// Returns `true` when both metadata and data are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl From<&str> for Payload {
    fn from(data: &str) -> Self { Self::new(Bytes::copy_from_slice(data.as_bytes())) }
}

impl From<String> for Payload {
    fn from(data: String) -> Self { Self::new(Bytes::from(data)) }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self { Self::new(data) }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self { Self::new(Bytes::from(data)) }
}
