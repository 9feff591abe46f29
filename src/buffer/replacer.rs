use crate::common::FrameId;

/// Eviction policy for buffer frames.
///
/// A frame is a victim candidate only between its last `unpin` and the next
/// `pin`. Frames the replacer has never seen unpinned are never returned.
pub trait Replacer: Send {
    /// Removes and returns the frame to evict, if any is eligible.
    fn victim(&mut self) -> Option<FrameId>;

    /// Marks a frame as in use, removing it from eligibility.
    fn pin(&mut self, frame_id: FrameId);

    /// Marks a frame as eligible for eviction.
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of frames currently eligible for eviction.
    fn size(&self) -> usize;
}
