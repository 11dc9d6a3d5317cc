//! Deterministic linear congruential generator for click and release timings.

/// 32-bit LCG (Numerical Recipes constants).
#[derive(Clone, Debug)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    #[must_use]
    pub const fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Next raw value.
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.state
    }

    /// Uniform-ish value in `min..=max`.
    #[inline]
    pub fn range_inclusive(&mut self, min: u32, max: u32) -> u32 {
        debug_assert!(min <= max);
        let span = max - min + 1;
        // High bits of an LCG are the well-mixed ones.
        min + (self.next_u32() >> 16) % span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_sequence() {
        let mut a = Lcg::new(42);
        let mut b = Lcg::new(42);
        for _ in 0..16 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn test_range_bounds() {
        let mut rng = Lcg::new(7);
        for _ in 0..1000 {
            let v = rng.range_inclusive(125, 175);
            assert!((125..=175).contains(&v));
        }
    }

    #[test]
    fn test_range_covers_both_ends() {
        let mut rng = Lcg::new(1);
        let mut seen_min = false;
        let mut seen_max = false;
        for _ in 0..10_000 {
            match rng.range_inclusive(75, 80) {
                75 => seen_min = true,
                80 => seen_max = true,
                _ => {}
            }
        }
        assert!(seen_min && seen_max);
    }
}
