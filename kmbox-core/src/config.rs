//! Application-wide constants and compile-time configuration.
//!
//! Timing parameters, buffer sizes, and the default downstream identity
//! live here so they can be tuned in one place.

// Cadence

/// Downstream HID polling interval (ms).
pub const DEVICE_POLL_MS: u64 = 8;

/// Watchdog supervisor task interval (ms).
pub const WATCHDOG_TASK_INTERVAL_MS: u64 = 100;

/// Status LED refresh interval (ms).
pub const VISUAL_INTERVAL_MS: u64 = 50;

/// Board button sampling / debounce interval (ms).
pub const BUTTON_DEBOUNCE_MS: u32 = 10;

// Serial link

/// Default command link baud rate.
pub const LINK_BAUD: u32 = 115_200;

/// Command link baud rate on the alternate pin pair.
pub const LINK_BAUD_ALT: u32 = 250_000;

/// Serial ingest ring size. Power of two; the DMA write address wraps on it.
pub const SERIAL_RING_SIZE: usize = 2048;

/// How long a bare CR waits for a following LF before the line completes (ms).
pub const CR_LOOKAHEAD_MS: u32 = 2;

// Virtual mouse

/// Movement history capacity (entries, one per millisecond at most).
pub const HISTORY_LEN: usize = 1024;

/// Forced release hold window (ms, inclusive).
pub const RELEASE_HOLD_MIN_MS: u32 = 125;
pub const RELEASE_HOLD_MAX_MS: u32 = 175;

/// Click press phase window (ms, inclusive).
pub const CLICK_PRESS_MIN_MS: u32 = 75;
pub const CLICK_PRESS_MAX_MS: u32 = 125;

/// Seed for the timing LCG. Fixed so click timings are reproducible.
pub const RNG_SEED: u32 = 0x4B4D_4258;

/// Per-tick Y delta injected while the board button is held with no upstream mouse.
pub const NUDGE_DELTA_Y: i16 = -4;

// USB identity

/// Default downstream VID/PID ("pid.codes" open-source test VID).
pub const DEFAULT_VID: u16 = 0x1209;
pub const DEFAULT_PID: u16 = 0x0001;

/// Fallback downstream strings when no upstream device is attached.
pub const DEFAULT_MANUFACTURER: &str = "KMBox";
pub const DEFAULT_PRODUCT: &str = "KMBox Composite HID";

/// Serial token used when no identity can be derived.
pub const DEFAULT_SERIAL: &str = "KMBox_0000";

/// Downstream `bcdDevice`.
pub const DEVICE_RELEASE: u16 = 0x0100;

/// Downstream bus power draw (mA).
pub const MAX_POWER_MA: u16 = 100;

/// Capacity of each cloned string descriptor (UTF-8 bytes).
pub const MAX_STRING_LEN: usize = 64;

/// Capacity of the runtime report descriptor.
pub const MAX_REPORT_DESCRIPTOR_LEN: usize = 512;

/// Disconnect hold time during a forced re-enumeration (ms).
pub const REENUMERATE_DISCONNECT_MS: u64 = 500;

/// Settle time after reconnecting during a forced re-enumeration (ms).
pub const REENUMERATE_SETTLE_MS: u64 = 250;

// Recovery

/// Consecutive downstream transfer errors that mark the device stack for reset.
pub const DEVICE_ERROR_THRESHOLD: u32 = 50;

/// Window the consecutive errors must fall within (ms).
pub const DEVICE_ERROR_WINDOW_MS: u32 = 1_000;

/// Board button hold time that resets both USB stacks (ms).
pub const RESET_HOLD_MS: u32 = 3_000;

/// Minimum time between stack resets (ms).
pub const RESET_COOLDOWN_MS: u32 = 2_000;

// Liveness

/// A core without a heartbeat for this long is unresponsive (ms).
pub const CORE_TIMEOUT_MS: u32 = 30_000;

/// Interval between hardware watchdog updates (ms).
pub const HARDWARE_UPDATE_INTERVAL_MS: u32 = 5_000;

/// Hardware watchdog period (ms). The RP2040 tops out a little above 8 s.
pub const HARDWARE_TIMEOUT_MS: u32 = 8_000;

/// The supervisor beats for both cores during this start-up window (ms).
pub const STARTUP_GRACE_MS: u32 = 3_000;
