use std::collections::HashSet;

use hashlink::LinkedHashSet;

use crate::common::FrameId;

use super::Replacer;

/// Least-recently-unpinned replacement policy.
///
/// Eligible frames are kept in the order they were first unpinned; the
/// oldest one is evicted first. Unpinning a frame that is already eligible
/// does not move it. Pinned frames the replacer has seen are remembered in a
/// separate set so the total number of tracked frames stays within capacity.
pub struct LruReplacer {
    /// Eligible frames, least recently unpinned at the front
    unpinned: LinkedHashSet<FrameId>,
    /// Frames currently pinned
    pinned: HashSet<FrameId>,
    /// Maximum number of frames tracked at once
    max_frames: usize,
}

impl LruReplacer {
    pub fn new(max_frames: usize) -> Self {
        Self {
            unpinned: LinkedHashSet::with_capacity(max_frames),
            pinned: HashSet::with_capacity(max_frames),
            max_frames,
        }
    }

    /// Number of pinned frames being tracked.
    pub fn pinned_size(&self) -> usize {
        self.pinned.len()
    }

    /// Pinned plus eligible frames.
    pub fn tracked_size(&self) -> usize {
        self.unpinned.len() + self.pinned.len()
    }

    fn is_full(&self) -> bool {
        self.tracked_size() >= self.max_frames
    }
}

impl Replacer for LruReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        self.unpinned.pop_front()
    }

    fn pin(&mut self, frame_id: FrameId) {
        if !self.unpinned.remove(&frame_id) && !self.pinned.contains(&frame_id) && self.is_full() {
            return;
        }
        self.pinned.insert(frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if self.unpinned.contains(&frame_id) {
            return;
        }
        if !self.pinned.remove(&frame_id) && self.is_full() {
            return;
        }
        self.unpinned.insert(frame_id);
    }

    fn size(&self) -> usize {
        self.unpinned.len()
    }
}
