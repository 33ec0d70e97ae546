//! Pre-event ring buffer for motion-triggered recording

use bytes::Bytes;
use ::ringbuf::traits::{Consumer, Observer, RingBuffer};
use ::ringbuf::HeapRb;

/// Bounded FIFO of the most recent compressed frames
///
/// Owned by the worker thread. Past capacity the oldest frame is evicted.
/// A capacity of zero disables buffering.
pub struct PreEventBuffer {
    /// `None` when pre-trigger buffering is disabled
    ring: Option<HeapRb<Bytes>>,

    stats: Stats,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub frames_written: usize,
    pub frames_flushed: usize,
    pub frames_dropped: usize,
}

impl PreEventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: (capacity > 0).then(|| HeapRb::new(capacity)),
            stats: Stats::default(),
        }
    }

    /// Push a frame, evicting the oldest one when full
    pub fn push(&mut self, frame: Bytes) {
        let Some(ring) = self.ring.as_mut() else {
            return;
        };

        if ring.push_overwrite(frame).is_some() {
            self.stats.frames_dropped += 1;
        }
        self.stats.frames_written += 1;
    }

    /// Take every buffered frame, oldest first, leaving the buffer empty
    pub fn flush(&mut self) -> Vec<Bytes> {
        let Some(ring) = self.ring.as_mut() else {
            return Vec::new();
        };

        let frames: Vec<Bytes> = ring.pop_iter().collect();
        self.stats.frames_flushed += frames.len();
        frames
    }

    pub fn len(&self) -> usize {
        self.ring.as_ref().map_or(0, |ring| ring.occupied_len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.as_ref().map_or(0, |ring| ring.capacity().get())
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }
}
