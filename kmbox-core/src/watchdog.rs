//! Dual-core liveness supervisor.
//!
//! Each core stamps its [`Heartbeat`] on every task loop. The supervisor
//! ticks on the device core and pets the hardware watchdog only while both
//! stamps are recent. Once a core has been silent for `CORE_TIMEOUT_MS` the
//! hardware timer starves; if the system somehow stays unhealthy for
//! `2 * CORE_TIMEOUT_MS` the supervisor forces the reset itself.

use portable_atomic::{AtomicU32, Ordering};

use crate::config::{
    CORE_TIMEOUT_MS, HARDWARE_TIMEOUT_MS, HARDWARE_UPDATE_INTERVAL_MS, STARTUP_GRACE_MS,
};

/// Execution contexts that report liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CoreId {
    /// Downstream stack, shell, supervisor.
    Device = 0,
    /// Upstream host stack.
    Host = 1,
}

impl CoreId {
    pub const ALL: [CoreId; 2] = [CoreId::Device, CoreId::Host];
}

/// Monotonic per-core liveness stamp, written by one core and read by the
/// other.
pub struct Heartbeat {
    count: AtomicU32,
    last_ms: AtomicU32,
}

impl Heartbeat {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            last_ms: AtomicU32::new(0),
        }
    }

    pub fn beat(&self, now_ms: u32) {
        self.last_ms.store(now_ms, Ordering::Release);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn last_ms(&self) -> u32 {
        self.last_ms.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Both cores' heartbeats. Lives in a `static`.
pub struct Heartbeats {
    cores: [Heartbeat; 2],
}

impl Heartbeats {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cores: [Heartbeat::new(), Heartbeat::new()],
        }
    }

    pub fn beat(&self, core: CoreId, now_ms: u32) {
        self.core(core).beat(now_ms);
    }

    #[must_use]
    pub fn core(&self, core: CoreId) -> &Heartbeat {
        &self.cores[core as usize]
    }
}

impl Default for Heartbeats {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware reset timer.
pub trait HardwareWatchdog {
    /// Arm with the given period.
    fn start(&mut self, timeout_ms: u32);
    /// Restart the countdown.
    fn feed(&mut self);
    /// Reset the chip as soon as possible.
    fn force_reset(&mut self);
}

/// Outcome of one supervisor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verdict {
    /// Both cores alive.
    Healthy,
    /// A core is silent; the hardware timer is not being fed.
    Starving,
    /// Unhealthy too long; reset forced.
    Reset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WatchdogStats {
    pub hardware_updates: u32,
    pub timeout_warnings: u32,
    pub system_healthy: bool,
    pub responsive: [bool; 2],
}

pub struct LivenessSupervisor {
    started_ms: u32,
    last_feed_ms: Option<u32>,
    unhealthy_since: Option<u32>,
    stats: WatchdogStats,
}

impl LivenessSupervisor {
    /// Arm the hardware timer and start the grace period.
    pub fn start<W: HardwareWatchdog>(hw: &mut W, now_ms: u32) -> Self {
        hw.start(HARDWARE_TIMEOUT_MS);
        info!("watchdog armed, {} ms", HARDWARE_TIMEOUT_MS);
        Self {
            started_ms: now_ms,
            last_feed_ms: None,
            unhealthy_since: None,
            stats: WatchdogStats {
                system_healthy: true,
                responsive: [true, true],
                ..WatchdogStats::default()
            },
        }
    }

    /// One supervisor pass.
    pub fn tick<W: HardwareWatchdog>(&mut self, now_ms: u32, beats: &Heartbeats, hw: &mut W) -> Verdict {
        if now_ms.wrapping_sub(self.started_ms) < STARTUP_GRACE_MS {
            for core in CoreId::ALL {
                beats.beat(core, now_ms);
            }
        }

        for core in CoreId::ALL {
            let silent = now_ms.saturating_sub(beats.core(core).last_ms());
            let responsive = silent <= CORE_TIMEOUT_MS;
            let was = self.stats.responsive[core as usize];
            if was && !responsive {
                self.stats.timeout_warnings += 1;
                warn!("{:?} core unresponsive for {} ms", core, silent);
            } else if !was && responsive {
                info!("{:?} core responsive again", core);
            }
            self.stats.responsive[core as usize] = responsive;
        }

        let healthy = self.stats.responsive.iter().all(|&r| r);
        self.stats.system_healthy = healthy;

        if !healthy {
            let since = *self.unhealthy_since.get_or_insert(now_ms);
            if now_ms.wrapping_sub(since) > 2 * CORE_TIMEOUT_MS {
                error!("system unhealthy too long, forcing reset");
                hw.force_reset();
                return Verdict::Reset;
            }
            return Verdict::Starving;
        }

        self.unhealthy_since = None;
        let due = self
            .last_feed_ms
            .map_or(true, |last| now_ms.wrapping_sub(last) >= HARDWARE_UPDATE_INTERVAL_MS);
        if due {
            hw.feed();
            self.last_feed_ms = Some(now_ms);
            self.stats.hardware_updates += 1;
        }
        Verdict::Healthy
    }

    #[must_use]
    pub fn stats(&self) -> WatchdogStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockWatchdog {
        timeout: u32,
        feeds: u32,
        resets: u32,
    }

    impl HardwareWatchdog for MockWatchdog {
        fn start(&mut self, timeout_ms: u32) {
            self.timeout = timeout_ms;
        }
        fn feed(&mut self) {
            self.feeds += 1;
        }
        fn force_reset(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn test_grace_period_beats_for_both_cores() {
        let beats = Heartbeats::new();
        let mut hw = MockWatchdog::default();
        let mut sup = LivenessSupervisor::start(&mut hw, 0);
        assert_eq!(hw.timeout, HARDWARE_TIMEOUT_MS);

        assert_eq!(sup.tick(2_000, &beats, &mut hw), Verdict::Healthy);
        assert_eq!(beats.core(CoreId::Host).last_ms(), 2_000);
        assert_eq!(hw.feeds, 1);
    }

    #[test]
    fn test_feeds_at_update_interval() {
        let beats = Heartbeats::new();
        let mut hw = MockWatchdog::default();
        let mut sup = LivenessSupervisor::start(&mut hw, 0);

        for t in (0..20_000).step_by(100) {
            beats.beat(CoreId::Device, t);
            beats.beat(CoreId::Host, t);
            sup.tick(t, &beats, &mut hw);
        }
        // t = 0, 5000, 10000, 15000
        assert_eq!(hw.feeds, 4);
        assert_eq!(sup.stats().hardware_updates, 4);
    }

    #[test]
    fn test_silent_core_stops_feeding() {
        let beats = Heartbeats::new();
        let mut hw = MockWatchdog::default();
        let mut sup = LivenessSupervisor::start(&mut hw, 0);

        let mut last_feed_t = 0;
        let mut t = 0;
        while t < 120_000 {
            beats.beat(CoreId::Device, t);
            if t < 10_000 {
                beats.beat(CoreId::Host, t);
            }
            let before = hw.feeds;
            sup.tick(t, &beats, &mut hw);
            if hw.feeds > before {
                last_feed_t = t;
            }
            t += 100;
        }
        // No feed once the host core has been silent past the timeout.
        assert!(last_feed_t <= 10_000 + CORE_TIMEOUT_MS);
        assert_eq!(sup.stats().timeout_warnings, 1);
        assert!(!sup.stats().system_healthy);
        assert!(!sup.stats().responsive[CoreId::Host as usize]);
        assert!(hw.resets >= 1);
    }

    #[test]
    fn test_recovery_clears_unhealthy() {
        let beats = Heartbeats::new();
        let mut hw = MockWatchdog::default();
        let mut sup = LivenessSupervisor::start(&mut hw, 0);

        beats.beat(CoreId::Device, 40_000);
        assert_eq!(sup.tick(40_000, &beats, &mut hw), Verdict::Starving);
        beats.beat(CoreId::Host, 40_100);
        beats.beat(CoreId::Device, 40_100);
        assert_eq!(sup.tick(40_100, &beats, &mut hw), Verdict::Healthy);
        assert_eq!(hw.resets, 0);
    }
}
