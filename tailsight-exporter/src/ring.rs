//! Fixed-depth ring of per-window accumulators.

use std::collections::VecDeque;

/// One accumulator per recent window, newest at the back.
///
/// The ring is always full: it starts as `depth` zeros and every advance
/// pushes as many zero slots as it evicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingSeries {
    slots: VecDeque<u64>,
    depth: usize,
}

impl RingSeries {
    /// Create a ring of `depth` zero slots. A depth of zero is treated as one.
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            slots: std::iter::repeat_n(0, depth).collect(),
            depth,
        }
    }

    /// Push `steps` fresh zero slots, evicting the oldest. Capped at the depth.
    pub fn advance(&mut self, steps: usize) {
        for _ in 0..steps.min(self.depth) {
            self.slots.pop_front();
            self.slots.push_back(0);
        }
    }

    /// Add to the newest slot, saturating at `u64::MAX`.
    pub fn add(&mut self, n: u64) {
        if let Some(newest) = self.slots.back_mut() {
            *newest = newest.saturating_add(n);
        }
    }

    pub fn newest(&self) -> u64 {
        self.slots.back().copied().unwrap_or(0)
    }

    /// All slots, oldest first.
    pub fn slots(&self) -> Vec<u64> {
        self.slots.iter().copied().collect()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}
