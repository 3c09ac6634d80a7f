//! Stream id allocation and the live-stream registry.

use std::collections::HashMap;

use log::debug;

use crate::{frame::StreamId, stream::StreamEntry};

/// Largest legal stream id (ids are 31-bit on the wire).
const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Which side of the connection this registry allocates for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Client mode: originates odd stream ids.
    Client,
    /// Server mode: originates even stream ids.
    Server,
}

/// Error returned when the id space is exhausted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct StreamIdExhausted;

/// Registry of live streams plus the id factories for both directions.
pub(crate) struct StreamRegistry {
    streams: HashMap<StreamId, StreamEntry>,
    mode: ConnectionMode,
    next_id: u32,
    last_peer_id: u32,
}

impl StreamRegistry {
    pub(crate) fn new(mode: ConnectionMode) -> Self {
        Self {
            streams: HashMap::new(),
            mode,
            next_id: match mode {
                ConnectionMode::Client => 1,
                ConnectionMode::Server => 2,
            },
            last_peer_id: 0,
        }
    }

    /// Test seam: start allocation close to the id-space ceiling.
    #[cfg(test)]
    pub(crate) fn with_next_id(mode: ConnectionMode, next_id: u32) -> Self {
        let mut registry = Self::new(mode);
        registry.next_id = next_id;
        registry
    }

    /// Allocate the next locally originated stream id.
    ///
    /// # Errors
    ///
    /// Returns [`StreamIdExhausted`] once the 31-bit id space is spent; the
    /// caller must close the connection without emitting a partial frame.
    pub(crate) fn next_stream_id(&mut self) -> Result<StreamId, StreamIdExhausted> {
        if self.next_id > MAX_STREAM_ID {
            return Err(StreamIdExhausted);
        }
        let id = StreamId(self.next_id);
        self.next_id += 2;
        Ok(id)
    }

    /// Accept a peer-originated stream id.
    ///
    /// Ids must strictly exceed the highest peer id seen so far and carry
    /// the peer's parity. Stale or replayed ids are rejected so duplicates
    /// arriving around a resumption are consumed silently.
    pub(crate) fn register_peer_stream_id(&mut self, id: StreamId) -> bool {
        let peer_parity = match self.mode {
            ConnectionMode::Client => 0,
            ConnectionMode::Server => 1,
        };
        if id.0 % 2 != peer_parity {
            debug!("rejecting peer stream id {id} with local parity");
            return false;
        }
        if id.0 <= self.last_peer_id {
            debug!(
                "rejecting replayed peer stream id {id} (last seen {})",
                self.last_peer_id
            );
            return false;
        }
        self.last_peer_id = id.0;
        true
    }

    pub(crate) fn add(&mut self, id: StreamId, entry: StreamEntry) {
        let previous = self.streams.insert(id, entry);
        debug_assert!(previous.is_none(), "stream {id} registered twice");
    }

    pub(crate) fn lookup(&mut self, id: StreamId) -> Option<&mut StreamEntry> {
        self.streams.get_mut(&id)
    }

    pub(crate) fn contains(&self, id: StreamId) -> bool { self.streams.contains_key(&id) }

    pub(crate) fn remove(&mut self, id: StreamId) -> Option<StreamEntry> {
        self.streams.remove(&id)
    }

    /// Remove and return every live stream, for connection teardown.
    pub(crate) fn drain(&mut self) -> Vec<(StreamId, StreamEntry)> {
        self.streams.drain().collect()
    }

    /// Ids of streams still open, in ascending order.
    pub(crate) fn open_stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.streams.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::client(ConnectionMode::Client, 1, 3)]
    #[case::server(ConnectionMode::Server, 2, 4)]
    fn ids_step_by_two_with_mode_parity(
        #[case] mode: ConnectionMode,
        #[case] first: u32,
        #[case] second: u32,
    ) {
        let mut registry = StreamRegistry::new(mode);
        assert_eq!(registry.next_stream_id(), Ok(StreamId(first)));
        assert_eq!(registry.next_stream_id(), Ok(StreamId(second)));
    }

    #[test]
    fn exhaustion_is_reported_once_the_ceiling_is_passed() {
        let mut registry = StreamRegistry::with_next_id(ConnectionMode::Client, MAX_STREAM_ID);
        assert_eq!(registry.next_stream_id(), Ok(StreamId(MAX_STREAM_ID)));
        assert_eq!(registry.next_stream_id(), Err(StreamIdExhausted));
        assert_eq!(registry.next_stream_id(), Err(StreamIdExhausted));
    }

    #[test]
    fn peer_ids_must_increase_strictly() {
        let mut registry = StreamRegistry::new(ConnectionMode::Server);
        assert!(registry.register_peer_stream_id(StreamId(1)));
        assert!(registry.register_peer_stream_id(StreamId(5)));
        assert!(!registry.register_peer_stream_id(StreamId(5)));
        assert!(!registry.register_peer_stream_id(StreamId(3)));
    }

    #[test]
    fn peer_ids_must_carry_peer_parity() {
        let mut server = StreamRegistry::new(ConnectionMode::Server);
        assert!(!server.register_peer_stream_id(StreamId(2)));
        assert!(server.register_peer_stream_id(StreamId(1)));

        let mut client = StreamRegistry::new(ConnectionMode::Client);
        assert!(!client.register_peer_stream_id(StreamId(3)));
        assert!(client.register_peer_stream_id(StreamId(2)));
    }
}
