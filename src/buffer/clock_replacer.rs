use crate::common::FrameId;

use super::Replacer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockState {
    /// Pinned, evicted, or never unpinned
    Empty,
    /// Eligible and not yet passed by the hand
    Accessed,
    /// Eligible and already given its second chance
    Unused,
}

/// Second-chance (clock) replacement policy.
///
/// Each frame carries a reference state; the hand sweeps the frames,
/// demoting `Accessed` frames to `Unused` and evicting the first `Unused`
/// frame it meets.
pub struct ClockReplacer {
    states: Vec<ClockState>,
    hand: usize,
}

impl ClockReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            states: vec![ClockState::Empty; num_frames],
            hand: 0,
        }
    }

    fn set(&mut self, frame_id: FrameId, state: ClockState) {
        if let Some(slot) = self.states.get_mut(frame_id.as_usize()) {
            *slot = state;
        }
    }
}

impl Replacer for ClockReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        let n = self.states.len();
        if n == 0 {
            return None;
        }

        // One full sweep: remember the first frame that had already used
        // its second chance, and take the second chance from the rest.
        let mut victim = None;
        for step in 0..n {
            let i = (self.hand + step) % n;
            match self.states[i] {
                ClockState::Unused if victim.is_none() => victim = Some(i),
                ClockState::Accessed => self.states[i] = ClockState::Unused,
                _ => {}
            }
        }

        let victim = victim.or_else(|| {
            (0..n)
                .map(|step| (self.hand + step) % n)
                .find(|&i| self.states[i] == ClockState::Unused)
        })?;

        self.states[victim] = ClockState::Empty;
        self.hand = victim;
        Some(FrameId::new(victim as u32))
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.set(frame_id, ClockState::Empty);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        self.set(frame_id, ClockState::Accessed);
    }

    fn size(&self) -> usize {
        self.states
            .iter()
            .filter(|&&s| s != ClockState::Empty)
            .count()
    }
}
