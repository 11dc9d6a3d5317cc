//! Movement history ring for retrospective `catch_xy` queries.

use crate::config::HISTORY_LEN;
use kmbox_proto::MAX_CATCH_WINDOW_MS;

/// One recorded movement delta.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sample {
    pub dx: i32,
    pub dy: i32,
    pub t_ms: u32,
}

/// Fixed-capacity ring; the oldest sample is overwritten when full.
#[derive(Debug, Clone)]
pub struct MovementHistory {
    samples: [Sample; HISTORY_LEN],
    next: usize,
    len: usize,
}

impl MovementHistory {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            samples: [Sample { dx: 0, dy: 0, t_ms: 0 }; HISTORY_LEN],
            next: 0,
            len: 0,
        }
    }

    /// Record a delta. Zero deltas are not stored.
    ///
    /// A delta stamped with the same millisecond as the newest sample is
    /// added to that sample, so bursts within one tick use one slot.
    pub fn push(&mut self, dx: i16, dy: i16, t_ms: u32) {
        if dx == 0 && dy == 0 {
            return;
        }
        let (dx, dy) = (i32::from(dx), i32::from(dy));
        if self.len > 0 {
            let newest = &mut self.samples[(self.next + HISTORY_LEN - 1) % HISTORY_LEN];
            if newest.t_ms == t_ms {
                newest.dx += dx;
                newest.dy += dy;
                return;
            }
        }
        self.samples[self.next] = Sample { dx, dy, t_ms };
        self.next = (self.next + 1) % HISTORY_LEN;
        self.len = (self.len + 1).min(HISTORY_LEN);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Newest-first iterator over the stored samples.
    pub fn iter_newest(&self) -> impl Iterator<Item = &Sample> + '_ {
        (1..=self.len).map(move |back| &self.samples[(self.next + HISTORY_LEN - back) % HISTORY_LEN])
    }

    /// Sum of the deltas recorded within `duration_ms` of `now_ms`.
    ///
    /// Walks newest-first and stops at the first sample older than the
    /// window. The window is clamped to one second.
    #[must_use]
    pub fn sum_since(&self, now_ms: u32, duration_ms: u32) -> (i32, i32) {
        let window = duration_ms.min(MAX_CATCH_WINDOW_MS);
        self.iter_newest()
            .take_while(|s| now_ms.saturating_sub(s.t_ms) <= window)
            .fold((0, 0), |(sx, sy), s| (sx + s.dx, sy + s.dy))
    }

    pub fn clear(&mut self) {
        self.next = 0;
        self.len = 0;
    }
}

impl Default for MovementHistory {
    fn default() -> Self {
        Self::new()
    }
}
