//! Hardware watchdog glue for the liveness supervisor.

use embassy_rp::watchdog::Watchdog;
use embassy_time::Duration;
use kmbox_core::HardwareWatchdog;

pub struct RpWatchdog {
    inner: Watchdog,
}

impl RpWatchdog {
    pub fn new(mut inner: Watchdog) -> Self {
        // Keep running under a debugger so a halted core still resets.
        inner.pause_on_debug(false);
        Self { inner }
    }
}

impl HardwareWatchdog for RpWatchdog {
    fn start(&mut self, timeout_ms: u32) {
        self.inner.start(Duration::from_millis(u64::from(timeout_ms)));
    }

    fn feed(&mut self) {
        self.inner.feed();
    }

    fn force_reset(&mut self) {
        self.inner.trigger_reset();
    }
}
