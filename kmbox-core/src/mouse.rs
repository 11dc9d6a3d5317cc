//! Virtual mouse state.
//!
//! The single source of truth for the next downstream mouse report. Physical
//! samples from the upstream device and command-driven overrides are merged
//! here; [`VirtualMouse::update`] advances forced releases and click
//! sequences, and [`VirtualMouse::report`] drains the accumulators into one
//! outgoing report.

use kmbox_proto::{Axis, Button};

use crate::config::{
    CLICK_PRESS_MAX_MS, CLICK_PRESS_MIN_MS, RELEASE_HOLD_MAX_MS, RELEASE_HOLD_MIN_MS, RNG_SEED,
};
use crate::history::MovementHistory;
use crate::rng::Lcg;

/// Emitted axis and wheel values stay within the descriptor's logical range.
const AXIS_LIMIT: i16 = 127;

/// Per-button override state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonState {
    /// What the outgoing report carries.
    pub is_pressed: bool,
    /// A command currently dictates the value.
    pub is_forced: bool,
    /// Physical transitions are ignored.
    pub is_locked: bool,
    /// Deadline at which a forced release reverts; zero when none is pending.
    pub release_time: u32,
    pub is_clicking: bool,
    pub click_release_start: u32,
    pub click_end_time: u32,
}

/// Canonical mouse sample, both for upstream input and downstream output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MouseReport {
    pub buttons: u8,
    pub x: i8,
    pub y: i8,
    pub wheel: i8,
    pub pan: i8,
}

impl MouseReport {
    /// Size of the downstream report body (without report ID).
    pub const LEN: usize = 5;

    /// Serialize as `buttons, x, y, wheel, pan`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        [
            self.buttons,
            self.x as u8,
            self.y as u8,
            self.wheel as u8,
            self.pan as u8,
        ]
    }
}

pub struct VirtualMouse {
    physical_buttons: u8,
    buttons: [ButtonState; Button::COUNT],
    acc_x: i16,
    acc_y: i16,
    wheel: i8,
    lock_mx: bool,
    lock_my: bool,
    callback_enabled: bool,
    last_button_state: u8,
    last_update_time: u32,
    history: MovementHistory,
    rng: Lcg,
}

impl VirtualMouse {
    #[must_use]
    pub const fn new() -> Self {
        Self::with_seed(RNG_SEED)
    }

    /// Create with an explicit timing seed.
    #[must_use]
    pub const fn with_seed(seed: u32) -> Self {
        Self {
            physical_buttons: 0,
            buttons: [ButtonState {
                is_pressed: false,
                is_forced: false,
                is_locked: false,
                release_time: 0,
                is_clicking: false,
                click_release_start: 0,
                click_end_time: 0,
            }; Button::COUNT],
            acc_x: 0,
            acc_y: 0,
            wheel: 0,
            lock_mx: false,
            lock_my: false,
            callback_enabled: false,
            last_button_state: 0,
            last_update_time: 0,
            history: MovementHistory::new(),
            rng: Lcg::new(seed),
        }
    }

    // Supervisor

    /// Advance forced releases and click phases, then re-derive every
    /// button from physical state where no override applies.
    ///
    /// Returns the new button mask when the change stream is enabled and
    /// the mask differs from the last one reported.
    pub fn update(&mut self, now_ms: u32) -> Option<u8> {
        self.last_update_time = now_ms;
        let physical = self.physical_buttons;

        for button in Button::ALL {
            let physical_pressed = physical & button.mask() != 0;
            let state = &mut self.buttons[button.index()];

            if state.is_clicking {
                if now_ms >= state.click_end_time {
                    state.is_clicking = false;
                    state.is_forced = false;
                    state.click_release_start = 0;
                    state.click_end_time = 0;
                    state.is_pressed = physical_pressed && !state.is_locked;
                } else if now_ms >= state.click_release_start {
                    state.is_pressed = false;
                } else {
                    state.is_pressed = true;
                }
            } else if state.is_forced && !state.is_pressed && state.release_time > 0 {
                if now_ms >= state.release_time {
                    state.is_forced = false;
                    state.release_time = 0;
                    if !state.is_locked {
                        state.is_pressed = physical_pressed;
                    }
                }
            } else if !state.is_forced && !state.is_locked {
                state.is_pressed = physical_pressed;
            }
        }

        let mask = self.buttons_mask();
        if self.callback_enabled && mask != self.last_button_state {
            self.last_button_state = mask;
            return Some(mask);
        }
        None
    }

    // Commands

    /// Force a button pressed, or released for a random hold before it
    /// reverts to physical. Cancels any click in progress.
    pub fn force_button(&mut self, button: Button, pressed: bool, now_ms: u32) {
        let hold = self.rng.range_inclusive(RELEASE_HOLD_MIN_MS, RELEASE_HOLD_MAX_MS);
        let state = &mut self.buttons[button.index()];
        state.is_clicking = false;
        state.click_release_start = 0;
        state.click_end_time = 0;
        state.is_forced = true;
        state.is_pressed = pressed;
        state.release_time = if pressed { 0 } else { now_ms.saturating_add(hold) };
    }

    /// Start a press-then-release click sequence.
    pub fn click(&mut self, button: Button, now_ms: u32) {
        let press = self.rng.range_inclusive(CLICK_PRESS_MIN_MS, CLICK_PRESS_MAX_MS);
        let release = self.rng.range_inclusive(RELEASE_HOLD_MIN_MS, RELEASE_HOLD_MAX_MS);
        let state = &mut self.buttons[button.index()];
        state.is_clicking = true;
        state.is_forced = true;
        state.is_pressed = true;
        state.release_time = 0;
        state.click_release_start = now_ms.saturating_add(press);
        state.click_end_time = state.click_release_start.saturating_add(release);
    }

    /// Accumulate movement from any source, dropping locked axes first.
    pub fn add_movement(&mut self, dx: i16, dy: i16, now_ms: u32) {
        let dx = if self.lock_mx { 0 } else { dx };
        let dy = if self.lock_my { 0 } else { dy };
        self.acc_x = self.acc_x.saturating_add(dx);
        self.acc_y = self.acc_y.saturating_add(dy);
        self.history.push(dx, dy, now_ms);
    }

    /// Accumulate wheel movement, saturating at ±127.
    ///
    /// The lower bound is -127 rather than `i8::MIN`: the report descriptor
    /// declares a logical range of -127..=127 for the wheel, the same as for
    /// the axes, so -128 is never emitted.
    pub fn add_wheel(&mut self, delta: i16) {
        let sum = i16::from(self.wheel).saturating_add(delta);
        self.wheel = sum.clamp(-AXIS_LIMIT, AXIS_LIMIT) as i8;
    }

    pub fn set_axis_lock(&mut self, axis: Axis, locked: bool) {
        match axis {
            Axis::X => self.lock_mx = locked,
            Axis::Y => self.lock_my = locked,
        }
    }

    /// Lock or unlock a button against physical input.
    ///
    /// Locking a button that no command is driving masks it out
    /// immediately.
    pub fn set_button_lock(&mut self, button: Button, locked: bool) {
        let state = &mut self.buttons[button.index()];
        state.is_locked = locked;
        if locked && !state.is_forced {
            state.is_pressed = false;
        }
    }

    /// Enable or disable the button-change stream. Enabling arms it at the
    /// current mask so only later changes are reported.
    pub fn set_button_stream(&mut self, enabled: bool) {
        self.callback_enabled = enabled;
        self.last_button_state = self.buttons_mask();
    }

    /// Sum of recorded movement over the last `duration_ms`.
    #[must_use]
    pub fn catch_xy(&self, duration_ms: u32, now_ms: u32) -> (i32, i32) {
        self.history.sum_since(now_ms, duration_ms)
    }

    // Physical input

    /// Latch the upstream button mask (low five bits).
    pub fn set_physical_buttons(&mut self, mask: u8) {
        self.physical_buttons = mask & Button::MASK_ALL;
    }

    /// Apply one decoded upstream report.
    pub fn apply_physical(&mut self, report: &MouseReport, now_ms: u32) {
        self.set_physical_buttons(report.buttons);
        self.add_movement(i16::from(report.x), i16::from(report.y), now_ms);
        if report.wheel != 0 {
            self.add_wheel(i16::from(report.wheel));
        }
    }

    // Emission

    /// Build the next outgoing report, draining the accumulators.
    pub fn report(&mut self) -> MouseReport {
        let wheel = self.wheel;
        self.wheel = 0;
        MouseReport {
            buttons: self.buttons_mask(),
            x: drain_axis(&mut self.acc_x),
            y: drain_axis(&mut self.acc_y),
            wheel,
            pan: 0,
        }
    }

    /// Put back the movement of a report that never left the device.
    ///
    /// Buttons are not restored; the next report carries the current mask.
    /// History is untouched since the movement was recorded on arrival.
    pub fn restore(&mut self, report: &MouseReport) {
        self.acc_x = self.acc_x.saturating_add(i16::from(report.x));
        self.acc_y = self.acc_y.saturating_add(i16::from(report.y));
        if report.wheel != 0 {
            self.add_wheel(i16::from(report.wheel));
        }
    }

    // Queries

    #[must_use]
    pub fn buttons_mask(&self) -> u8 {
        Button::ALL
            .iter()
            .filter(|b| self.buttons[b.index()].is_pressed)
            .fold(0, |mask, b| mask | b.mask())
    }

    #[must_use]
    pub fn is_pressed(&self, button: Button) -> bool {
        self.buttons[button.index()].is_pressed
    }

    #[must_use]
    pub fn button_state(&self, button: Button) -> &ButtonState {
        &self.buttons[button.index()]
    }

    #[must_use]
    pub fn axis_locked(&self, axis: Axis) -> bool {
        match axis {
            Axis::X => self.lock_mx,
            Axis::Y => self.lock_my,
        }
    }

    #[must_use]
    pub fn button_locked(&self, button: Button) -> bool {
        self.buttons[button.index()].is_locked
    }

    #[must_use]
    pub fn button_stream_enabled(&self) -> bool {
        self.callback_enabled
    }

    #[must_use]
    pub fn physical_buttons(&self) -> u8 {
        self.physical_buttons
    }

    /// Movement still waiting to be emitted.
    #[must_use]
    pub fn pending_movement(&self) -> (i16, i16) {
        (self.acc_x, self.acc_y)
    }

    #[must_use]
    pub fn last_update_time(&self) -> u32 {
        self.last_update_time
    }

    /// Drop all physical input, e.g. after upstream detach.
    pub fn clear_physical(&mut self) {
        self.physical_buttons = 0;
    }
}

impl Default for VirtualMouse {
    fn default() -> Self {
        Self::new()
    }
}

/// Clamp the accumulator to one report's range and subtract exactly what
/// was emitted.
fn drain_axis(acc: &mut i16) -> i8 {
    let out = (*acc).clamp(-AXIS_LIMIT, AXIS_LIMIT);
    *acc -= out;
    out as i8
}
