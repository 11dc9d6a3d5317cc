//! Stack reset coordination and downstream error accounting.
//!
//! Resets are requested (by the board button or by the downstream error
//! threshold), carried out by the firmware, then completed here. A cooldown
//! after every completed reset refuses new requests so a flaky bus cannot
//! make the stacks oscillate.

use core::fmt;

use crate::config::{DEVICE_ERROR_THRESHOLD, DEVICE_ERROR_WINDOW_MS, RESET_COOLDOWN_MS};
use crate::events::{EventSink, StackTarget, StatusEvent};

/// Error type for reset requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetError {
    /// A reset completed too recently.
    Cooldown { remaining_ms: u32 },
}

impl fmt::Display for ResetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooldown { remaining_ms } => write!(f, "reset cooldown, {} ms remaining", remaining_ms),
        }
    }
}

/// Consecutive errors that all fall within a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorWindow {
    count: u32,
    first_ms: u32,
}

impl ErrorWindow {
    #[must_use]
    pub const fn new() -> Self {
        Self { count: 0, first_ms: 0 }
    }

    /// Record one error. Returns `true` once the threshold is reached.
    pub fn record(&mut self, now_ms: u32) -> bool {
        if self.count == 0 || now_ms.wrapping_sub(self.first_ms) > DEVICE_ERROR_WINDOW_MS {
            self.count = 0;
            self.first_ms = now_ms;
        }
        self.count += 1;
        self.count >= DEVICE_ERROR_THRESHOLD
    }

    /// A success breaks the run.
    pub fn clear(&mut self) {
        self.count = 0;
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Per-stack connection state tracked for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StackState {
    pub connected: bool,
    pub errors: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetStats {
    pub completed: u32,
    pub failed: u32,
    pub refused: u32,
}

pub struct ResetCoordinator {
    pending: Option<StackTarget>,
    last_reset_ms: Option<u32>,
    device: StackState,
    host: StackState,
    device_errors: ErrorWindow,
    stats: ResetStats,
}

impl ResetCoordinator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: None,
            last_reset_ms: None,
            device: StackState { connected: false, errors: 0 },
            host: StackState { connected: false, errors: 0 },
            device_errors: ErrorWindow::new(),
            stats: ResetStats { completed: 0, failed: 0, refused: 0 },
        }
    }

    /// Request a reset of `target`.
    ///
    /// Repeated requests merge into the pending one. Requests inside the
    /// post-reset cooldown are refused.
    pub fn request<E: EventSink>(
        &mut self,
        target: StackTarget,
        now_ms: u32,
        events: &mut E,
    ) -> Result<(), ResetError> {
        if let Some(last) = self.last_reset_ms {
            let elapsed = now_ms.wrapping_sub(last);
            if elapsed < RESET_COOLDOWN_MS {
                self.stats.refused += 1;
                let remaining_ms = RESET_COOLDOWN_MS - elapsed;
                warn!("reset of {:?} refused, cooldown {} ms", target, remaining_ms);
                return Err(ResetError::Cooldown { remaining_ms });
            }
        }

        let merged = self.pending.map_or(target, |p| p.merge(target));
        if self.pending != Some(merged) {
            info!("reset requested: {:?}", merged);
            self.pending = Some(merged);
            events.emit(StatusEvent::ResetPending(merged));
        }
        Ok(())
    }

    pub fn reset_device_stack<E: EventSink>(&mut self, now_ms: u32, events: &mut E) -> Result<(), ResetError> {
        self.request(StackTarget::Device, now_ms, events)
    }

    pub fn reset_host_stack<E: EventSink>(&mut self, now_ms: u32, events: &mut E) -> Result<(), ResetError> {
        self.request(StackTarget::Host, now_ms, events)
    }

    pub fn reset_both<E: EventSink>(&mut self, now_ms: u32, events: &mut E) -> Result<(), ResetError> {
        self.request(StackTarget::Both, now_ms, events)
    }

    /// Take the pending request for execution.
    pub fn take_pending(&mut self) -> Option<StackTarget> {
        self.pending.take()
    }

    #[must_use]
    pub fn pending(&self) -> Option<StackTarget> {
        self.pending
    }

    /// Finish a reset the firmware carried out. Clears the error counters
    /// and connection state of the affected stacks and starts the cooldown.
    pub fn complete<E: EventSink>(&mut self, target: StackTarget, ok: bool, now_ms: u32, events: &mut E) {
        if target.includes_device() {
            self.device = StackState::default();
            self.device_errors.clear();
        }
        if target.includes_host() {
            self.host = StackState::default();
        }
        self.last_reset_ms = Some(now_ms);

        if ok {
            self.stats.completed += 1;
            info!("reset of {:?} complete", target);
            events.emit(StatusEvent::ResetSuccess(target));
        } else {
            self.stats.failed += 1;
            error!("reset of {:?} failed", target);
            events.emit(StatusEvent::ResetFailed(target));
        }
    }

    /// Count a failed downstream transfer; crossing the threshold marks the
    /// device stack for reset.
    pub fn record_device_error<E: EventSink>(&mut self, now_ms: u32, events: &mut E) -> bool {
        self.device.errors = self.device.errors.saturating_add(1);
        if !self.device_errors.record(now_ms) {
            return false;
        }
        warn!("{} consecutive downstream errors", self.device_errors.count());
        self.device_errors.clear();
        self.request(StackTarget::Device, now_ms, events).is_ok()
    }

    pub fn record_device_success(&mut self) {
        self.device_errors.clear();
    }

    pub fn set_device_connected(&mut self, connected: bool) {
        self.device.connected = connected;
    }

    pub fn set_host_connected(&mut self, connected: bool) {
        self.host.connected = connected;
    }

    #[must_use]
    pub fn device(&self) -> StackState {
        self.device
    }

    #[must_use]
    pub fn host(&self) -> StackState {
        self.host
    }

    #[must_use]
    pub fn stats(&self) -> ResetStats {
        self.stats
    }
}

impl Default for ResetCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;

    #[test]
    fn test_request_emits_pending_once() {
        let mut r = ResetCoordinator::new();
        let mut log = EventLog::default();
        r.reset_device_stack(0, &mut log).unwrap();
        r.reset_device_stack(1, &mut log).unwrap();
        assert_eq!(log.events(), &[StatusEvent::ResetPending(StackTarget::Device)]);

        r.reset_host_stack(2, &mut log).unwrap();
        assert_eq!(r.pending(), Some(StackTarget::Both));
    }

    #[test]
    fn test_cooldown_after_complete() {
        let mut r = ResetCoordinator::new();
        let mut log = EventLog::default();
        r.reset_both(0, &mut log).unwrap();
        let target = r.take_pending().unwrap();
        r.complete(target, true, 100, &mut log);
        assert!(log.contains(StatusEvent::ResetSuccess(StackTarget::Both)));

        assert_eq!(
            r.reset_both(600, &mut log),
            Err(ResetError::Cooldown { remaining_ms: 1500 })
        );
        assert_eq!(r.stats().refused, 1);
        assert!(r.reset_both(100 + RESET_COOLDOWN_MS, &mut log).is_ok());
    }

    #[test]
    fn test_failed_reset_reported() {
        let mut r = ResetCoordinator::new();
        let mut log = EventLog::default();
        r.reset_host_stack(0, &mut log).unwrap();
        r.complete(StackTarget::Host, false, 5, &mut log);
        assert!(log.contains(StatusEvent::ResetFailed(StackTarget::Host)));
        assert_eq!(r.stats().failed, 1);
    }

    #[test]
    fn test_error_threshold_marks_device() {
        let mut r = ResetCoordinator::new();
        let mut log = EventLog::default();
        for i in 0..DEVICE_ERROR_THRESHOLD - 1 {
            assert!(!r.record_device_error(i, &mut log));
        }
        assert!(r.record_device_error(DEVICE_ERROR_THRESHOLD, &mut log));
        assert_eq!(r.pending(), Some(StackTarget::Device));
    }

    #[test]
    fn test_success_breaks_error_run() {
        let mut r = ResetCoordinator::new();
        let mut log = EventLog::default();
        for i in 0..DEVICE_ERROR_THRESHOLD - 1 {
            r.record_device_error(i, &mut log);
        }
        r.record_device_success();
        assert!(!r.record_device_error(100, &mut log));
        assert_eq!(r.pending(), None);
    }

    #[test]
    fn test_errors_outside_window_restart_count() {
        let mut w = ErrorWindow::new();
        for _ in 0..DEVICE_ERROR_THRESHOLD - 1 {
            w.record(0);
        }
        assert!(!w.record(DEVICE_ERROR_WINDOW_MS + 1));
        assert_eq!(w.count(), 1);
    }

    #[test]
    fn test_complete_clears_device_state() {
        let mut r = ResetCoordinator::new();
        let mut log = EventLog::default();
        r.set_device_connected(true);
        r.record_device_error(0, &mut log);
        r.complete(StackTarget::Device, true, 10, &mut log);
        assert_eq!(r.device(), StackState::default());
    }
}
