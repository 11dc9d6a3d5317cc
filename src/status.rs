//! Status LED.
//!
//! A base blink rate shows the downstream port state. Status events from
//! either core briefly override it.

use embedded_hal::digital::OutputPin;
use kmbox_core::config::VISUAL_INTERVAL_MS;
use kmbox_core::StatusEvent;

/// Blink half-periods (ms).
pub const BLINK_NOT_MOUNTED_MS: u32 = 250;
pub const BLINK_MOUNTED_MS: u32 = 1000;
pub const BLINK_SUSPENDED_MS: u32 = 2500;

const FRAME_MS: u32 = VISUAL_INTERVAL_MS as u32;

/// Frames the LED stays dark after activity.
const ACTIVITY_FRAMES: u32 = 1;

/// Frames of fast blinking after an upstream disconnect.
const DISCONNECT_FRAMES: u32 = 6;

/// Downstream port state driving the base pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum PortState {
    NotMounted,
    Mounted,
    Suspended,
}

impl PortState {
    fn half_period_ms(self) -> u32 {
        match self {
            Self::NotMounted => BLINK_NOT_MOUNTED_MS,
            Self::Mounted => BLINK_MOUNTED_MS,
            Self::Suspended => BLINK_SUSPENDED_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overlay {
    None,
    Activity { since: u32 },
    Disconnect { since: u32 },
    Resetting,
}

pub struct StatusLed<P> {
    pin: P,
    overlay: Overlay,
}

impl<P: OutputPin> StatusLed<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            overlay: Overlay::None,
        }
    }

    pub fn on_event(&mut self, event: StatusEvent, now_ms: u32) {
        self.overlay = match (event, self.overlay) {
            (StatusEvent::ResetPending(_), _) => Overlay::Resetting,
            (StatusEvent::ResetSuccess(_) | StatusEvent::ResetFailed(_), _) => Overlay::None,
            // A reset in progress wins over everything else.
            (_, Overlay::Resetting) => Overlay::Resetting,
            (StatusEvent::DisconnectFlash, _) => Overlay::Disconnect { since: now_ms },
            (StatusEvent::ActivityFlash, Overlay::Disconnect { since }) => Overlay::Disconnect { since },
            (StatusEvent::ActivityFlash, _) => Overlay::Activity { since: now_ms },
            (StatusEvent::StatusChanged, current) => current,
        };
    }

    /// Drive the pin for the current frame.
    pub fn render(&mut self, now_ms: u32, port: PortState) {
        let frame = now_ms / FRAME_MS;
        let on = match self.overlay {
            Overlay::Resetting => frame % 2 == 0,
            Overlay::Disconnect { since } if now_ms.wrapping_sub(since) < DISCONNECT_FRAMES * FRAME_MS => {
                frame % 2 == 0
            }
            Overlay::Activity { since } if now_ms.wrapping_sub(since) < ACTIVITY_FRAMES * FRAME_MS => false,
            _ => {
                self.overlay = Overlay::None;
                (now_ms / port.half_period_ms()) % 2 == 0
            }
        };
        let _ = if on { self.pin.set_high() } else { self.pin.set_low() };
    }
}
