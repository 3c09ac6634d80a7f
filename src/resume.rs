//! Sliding-window cache of sent frames and implied-position accounting.
//!
//! Both directions of a resumable session are measured in *implied
//! positions*: the running byte total of stream-bearing frames (see
//! [`FrameType::is_resumable`]). The sender keeps every tracked frame until
//! the peer acknowledges its position through a KEEPALIVE, so a new
//! transport can replay the unacknowledged suffix.

use std::collections::{BTreeSet, VecDeque};

use bytes::Bytes;

use crate::frame::{FrameType, StreamId};

/// A sent frame retained for replay.
#[derive(Clone, Debug)]
struct CachedFrame {
    /// Implied position at which the frame starts.
    position: u64,
    /// Stream the frame belongs to.
    stream_id: StreamId,
    /// Serialized frame bytes, without a length prefix.
    bytes: Bytes,
}

/// In-memory resume state for one connection.
///
/// Single-threaded under the connection's executor; the cache holds
/// positions in a strictly monotonic, contiguous order. Cached frames are
/// retained until the peer acknowledges their positions through a
/// KEEPALIVE — acknowledgment is the only eviction path, so
/// [`is_position_available`](Self::is_position_available) never lies about
/// what the peer may still need replayed.
#[derive(Debug, Default)]
pub struct InMemoryResumeManager {
    frames: VecDeque<CachedFrame>,
    first_sent_position: u64,
    last_sent_position: u64,
    implied_position: u64,
    cached_bytes: usize,
    /// Streams that terminated cleanly while this session was tracked.
    closed_streams: BTreeSet<StreamId>,
}

impl InMemoryResumeManager {
    /// An empty manager.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record a frame we sent. Non-resumable kinds are ignored.
    pub fn track_sent(&mut self, bytes: Bytes, frame_type: FrameType, stream_id: StreamId) {
        if !frame_type.is_resumable() {
            return;
        }
        let len = bytes.len();
        self.frames.push_back(CachedFrame {
            position: self.last_sent_position,
            stream_id,
            bytes,
        });
        self.last_sent_position += len as u64;
        self.cached_bytes += len;
    }

    /// Account a frame we received. Non-resumable kinds are ignored.
    pub fn track_received(&mut self, len: usize, frame_type: FrameType) {
        if frame_type.is_resumable() {
            self.implied_position += len as u64;
        }
    }

    /// Drop cached frames wholly below `position`, which the peer has
    /// acknowledged receiving.
    pub fn reset_up_to(&mut self, position: u64) {
        while let Some(front) = self.frames.front() {
            let end = front.position + front.bytes.len() as u64;
            if end > position {
                break;
            }
            self.cached_bytes -= front.bytes.len();
            self.frames.pop_front();
        }
        self.first_sent_position = self
            .frames
            .front()
            .map_or(self.last_sent_position, |front| front.position);
    }

    /// Whether the cache can replay from `position`.
    #[must_use]
    pub fn is_position_available(&self, position: u64) -> bool {
        self.first_sent_position <= position && position <= self.last_sent_position
    }

    /// Implied position of bytes received from the peer.
    #[must_use]
    pub fn implied_position(&self) -> u64 { self.implied_position }

    /// Position of the oldest cached frame (equals the newest when empty).
    #[must_use]
    pub fn first_sent_position(&self) -> u64 { self.first_sent_position }

    /// Position one past the newest cached frame.
    #[must_use]
    pub fn last_sent_position(&self) -> u64 { self.last_sent_position }

    /// Total bytes currently cached.
    #[must_use]
    pub fn cached_bytes(&self) -> usize { self.cached_bytes }

    /// Frames to replay on a fresh transport, oldest first, starting at the
    /// first frame whose position is at least `position`.
    pub fn frames_from(&self, position: u64) -> impl Iterator<Item = &Bytes> {
        self.frames
            .iter()
            .filter(move |frame| frame.position >= position)
            .map(|frame| &frame.bytes)
    }

    /// Ids of streams that still have unacknowledged frames in the cache,
    /// in id order.
    #[must_use]
    pub fn pending_stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.frames.iter().map(|frame| frame.stream_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Record that a stream terminated cleanly before any disconnect.
    pub fn on_stream_closed(&mut self, stream_id: StreamId) {
        self.closed_streams.insert(stream_id);
    }

    /// Streams that completed cleanly, in id order.
    #[must_use]
    pub fn clean_stream_ids(&self) -> Vec<StreamId> {
        self.closed_streams.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn frame_of(len: usize) -> Bytes { Bytes::from(vec![0xAB; len]) }

    fn tracked(manager: &mut InMemoryResumeManager, len: usize, stream: u32) {
        manager.track_sent(frame_of(len), FrameType::Payload, StreamId(stream));
    }

    #[test]
    fn positions_advance_by_frame_size() {
        let mut manager = InMemoryResumeManager::new();
        tracked(&mut manager, 10, 1);
        tracked(&mut manager, 4, 1);
        assert_eq!(manager.first_sent_position(), 0);
        assert_eq!(manager.last_sent_position(), 14);
        assert_eq!(manager.cached_bytes(), 14);
    }

    #[test]
    fn non_resumable_kinds_are_not_tracked() {
        let mut manager = InMemoryResumeManager::new();
        manager.track_sent(frame_of(10), FrameType::Keepalive, StreamId(0));
        manager.track_sent(frame_of(10), FrameType::Setup, StreamId(0));
        manager.track_received(10, FrameType::ResumeOk);
        assert_eq!(manager.last_sent_position(), 0);
        assert_eq!(manager.implied_position(), 0);
    }

    #[test]
    fn received_positions_accumulate() {
        let mut manager = InMemoryResumeManager::new();
        manager.track_received(10, FrameType::Payload);
        manager.track_received(6, FrameType::RequestN);
        assert_eq!(manager.implied_position(), 16);
    }

    #[rstest]
    #[case::exact_boundary(10, 10, 14)]
    #[case::mid_frame(12, 10, 14)]
    #[case::before_first(0, 0, 14)]
    fn reset_drops_only_acknowledged_prefix(
        #[case] ack: u64,
        #[case] expected_first: u64,
        #[case] expected_last: u64,
    ) {
        let mut manager = InMemoryResumeManager::new();
        tracked(&mut manager, 10, 1);
        tracked(&mut manager, 4, 3);
        manager.reset_up_to(ack);
        assert_eq!(manager.first_sent_position(), expected_first);
        assert_eq!(manager.last_sent_position(), expected_last);
        assert_eq!(
            manager.cached_bytes() as u64,
            manager.last_sent_position() - manager.first_sent_position()
        );
    }

    #[test]
    fn reset_past_end_empties_the_cache() {
        let mut manager = InMemoryResumeManager::new();
        tracked(&mut manager, 10, 1);
        manager.reset_up_to(99);
        assert_eq!(manager.first_sent_position(), 10);
        assert_eq!(manager.cached_bytes(), 0);
        assert!(manager.frames_from(0).next().is_none());
    }

    #[test]
    fn availability_window_tracks_first_and_last() {
        let mut manager = InMemoryResumeManager::new();
        tracked(&mut manager, 10, 1);
        tracked(&mut manager, 10, 1);
        manager.reset_up_to(10);
        assert!(!manager.is_position_available(0));
        assert!(manager.is_position_available(10));
        assert!(manager.is_position_available(20));
        assert!(!manager.is_position_available(21));
    }

    #[test]
    fn replay_starts_at_requested_position() {
        let mut manager = InMemoryResumeManager::new();
        tracked(&mut manager, 10, 1);
        tracked(&mut manager, 4, 3);
        tracked(&mut manager, 6, 1);
        let replayed: Vec<usize> = manager.frames_from(10).map(Bytes::len).collect();
        assert_eq!(replayed, vec![4, 6]);
        let all: Vec<usize> = manager.frames_from(0).map(Bytes::len).collect();
        assert_eq!(all, vec![10, 4, 6]);
    }

    #[test]
    fn only_acknowledgment_evicts_cached_frames() {
        let mut manager = InMemoryResumeManager::new();
        for _ in 0..8 {
            tracked(&mut manager, 64, 1);
        }
        // Memory pressure alone never moves the window.
        assert_eq!(manager.first_sent_position(), 0);
        assert_eq!(manager.cached_bytes(), 512);
        assert!(manager.is_position_available(0));

        manager.reset_up_to(128);
        assert_eq!(manager.first_sent_position(), 128);
        assert!(!manager.is_position_available(64));
    }

    #[test]
    fn pending_stream_ids_follow_the_window() {
        let mut manager = InMemoryResumeManager::new();
        tracked(&mut manager, 10, 1);
        tracked(&mut manager, 4, 3);
        tracked(&mut manager, 6, 1);
        assert_eq!(manager.pending_stream_ids(), vec![StreamId(1), StreamId(3)]);

        manager.reset_up_to(14);
        assert_eq!(manager.pending_stream_ids(), vec![StreamId(1)]);
    }

    #[test]
    fn closed_streams_are_reported_in_order() {
        let mut manager = InMemoryResumeManager::new();
        manager.on_stream_closed(StreamId(5));
        manager.on_stream_closed(StreamId(1));
        manager.on_stream_closed(StreamId(5));
        assert_eq!(manager.clean_stream_ids(), vec![StreamId(1), StreamId(5)]);
    }

    proptest! {
        /// After any tracking sequence and a reset, the cache byte-sum
        /// equals the window width and positions stay contiguous.
        #[test]
        fn cache_window_invariants(
            lens in proptest::collection::vec(1usize..64, 0..32),
            ack_fraction in 0.0f64..1.2,
        ) {
            let mut manager = InMemoryResumeManager::new();
            for (i, len) in lens.iter().enumerate() {
                tracked(&mut manager, *len, (i % 7) as u32 * 2 + 1);
            }
            let total = manager.last_sent_position();
            #[expect(
                clippy::cast_possible_truncation,
                clippy::cast_precision_loss,
                clippy::cast_sign_loss,
                reason = "test-only scaling of an acknowledgement point"
            )]
            let ack = ((total as f64) * ack_fraction) as u64;
            manager.reset_up_to(ack);

            prop_assert!(manager.first_sent_position() <= manager.last_sent_position());
            prop_assert_eq!(
                manager.cached_bytes() as u64,
                manager.last_sent_position() - manager.first_sent_position()
            );

            // Contiguity: each replayed frame starts where the previous ended.
            let mut expected = manager.first_sent_position();
            for frame in manager.frames_from(0) {
                prop_assert!(expected <= manager.last_sent_position());
                expected += frame.len() as u64;
            }
            prop_assert_eq!(expected, manager.last_sent_position());
            if ack <= total {
                prop_assert!(manager.first_sent_position() <= ack);
            }
        }
    }
}
