//! Board button gesture decoder: debounce, hold tracking, hold-to-reset.

use crate::config::{BUTTON_DEBOUNCE_MS, RESET_HOLD_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gesture {
    Pressed,
    /// Held past the reset threshold. Fires once per press.
    ResetRequested,
    Released { held_ms: u32 },
}

pub struct ButtonGesture {
    raw: bool,
    raw_since: u32,
    stable: bool,
    pressed_at: u32,
    reset_fired: bool,
}

impl ButtonGesture {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            raw: false,
            raw_since: 0,
            stable: false,
            pressed_at: 0,
            reset_fired: false,
        }
    }

    /// Feed one sample (`true` = pressed).
    pub fn sample(&mut self, pressed: bool, now_ms: u32) -> Option<Gesture> {
        if pressed != self.raw {
            self.raw = pressed;
            self.raw_since = now_ms;
        }

        let settled = now_ms.wrapping_sub(self.raw_since) >= BUTTON_DEBOUNCE_MS;
        if settled && self.raw != self.stable {
            self.stable = self.raw;
            if self.stable {
                self.pressed_at = now_ms;
                self.reset_fired = false;
                return Some(Gesture::Pressed);
            }
            return Some(Gesture::Released {
                held_ms: now_ms.wrapping_sub(self.pressed_at),
            });
        }

        if self.stable && !self.reset_fired && now_ms.wrapping_sub(self.pressed_at) >= RESET_HOLD_MS {
            self.reset_fired = true;
            return Some(Gesture::ResetRequested);
        }
        None
    }

    /// Debounced state.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.stable
    }

    /// Held and not yet consumed by a reset.
    #[must_use]
    pub fn nudging(&self) -> bool {
        self.stable && !self.reset_fired
    }
}

impl Default for ButtonGesture {
    fn default() -> Self {
        Self::new()
    }
}
