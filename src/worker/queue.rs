use std::collections::VecDeque;

use crate::Frame;

pub const INBOUND_CAPACITY: usize = 30;

/// Bounded FIFO of raw frames awaiting transformation
///
/// Pushing never blocks. When a batch leaves more than `capacity` frames
/// queued, [`InboundQueue::enforce_capacity`] keeps every other frame
/// (indices 0, 2, 4, ...) so the survivors stay in order.
#[derive(Debug)]
pub struct InboundQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl Default for InboundQueue {
    fn default() -> Self {
        Self::with_capacity(INBOUND_CAPACITY)
    }
}

impl InboundQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Halve an over-capacity queue; returns the number of frames dropped
    pub fn enforce_capacity(&mut self) -> Option<usize> {
        if self.frames.len() <= self.capacity {
            return None;
        }

        let before = self.frames.len();
        let mut index = 0;
        self.frames.retain(|_| {
            let keep = index % 2 == 0;
            index += 1;
            keep
        });
        Some(before - self.frames.len())
    }

    /// Remove everything still queued
    pub fn clear(&mut self) -> usize {
        let n = self.frames.len();
        self.frames.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
