//! Downstream report sink and the pump that feeds it.

use core::fmt;
use core::future::Future;

use crate::events::EventSink;
use crate::mouse::MouseReport;
use crate::reset::ResetCoordinator;

/// Error type for output operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputError {
    /// USB/communication I/O error.
    Io,
    /// Device not ready (not configured, or suspended).
    NotReady,
    /// Report dropped (host not polling fast enough).
    Dropped,
    /// Endpoint busy.
    Busy,
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io => write!(f, "I/O error"),
            Self::NotReady => write!(f, "device not ready"),
            Self::Dropped => write!(f, "report dropped"),
            Self::Busy => write!(f, "endpoint busy"),
        }
    }
}

/// Async trait for downstream mouse report sinks.
///
/// # `no_std` Compatibility
///
/// All implementations must be `#![no_std]` compatible with no heap allocation.
pub trait OutputSink {
    /// Send one mouse report.
    ///
    /// May wait until the previous report has left the endpoint.
    fn send(&mut self, report: &MouseReport) -> impl Future<Output = Result<(), OutputError>>;

    /// Check if the output is ready to accept data.
    fn is_ready(&self) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PumpStats {
    pub sent: u32,
    pub errors: u32,
    pub skipped: u32,
}

/// Forwards reports from the virtual mouse to an [`OutputSink`], feeding
/// transfer failures into the reset coordinator.
pub struct ReportPump<O> {
    output: O,
    stats: PumpStats,
}

impl<O: OutputSink> ReportPump<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            stats: PumpStats::default(),
        }
    }

    /// Send one report if the sink is ready.
    ///
    /// Only touches the sink and the counters, so callers can run it
    /// without holding the state the outcome is later recorded into.
    pub async fn send(&mut self, report: &MouseReport) -> Result<(), OutputError> {
        if !self.output.is_ready() {
            self.stats.skipped += 1;
            return Err(OutputError::NotReady);
        }

        match self.output.send(report).await {
            Ok(()) => {
                trace!("sent {:?}", report);
                self.stats.sent += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.errors += 1;
                debug!("downstream send failed: {:?}", e);
                Err(e)
            }
        }
    }

    /// Feed the outcome of [`Self::send`] into the reset coordinator.
    ///
    /// Reports skipped while the device is not mounted are not errors.
    /// Consecutive failures past the threshold request a device stack reset.
    pub fn record<E: EventSink>(
        &self,
        result: Result<(), OutputError>,
        now_ms: u32,
        resets: &mut ResetCoordinator,
        events: &mut E,
    ) {
        match result {
            Ok(()) => resets.record_device_success(),
            Err(OutputError::NotReady) => {}
            Err(_) => {
                resets.record_device_error(now_ms, events);
            }
        }
    }

    /// [`Self::send`] followed by [`Self::record`].
    pub async fn process_one<E: EventSink>(
        &mut self,
        report: &MouseReport,
        now_ms: u32,
        resets: &mut ResetCoordinator,
        events: &mut E,
    ) -> Result<(), OutputError> {
        let result = self.send(report).await;
        self.record(result, now_ms, resets, events);
        result
    }

    #[must_use]
    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    /// Get a reference to the output sink.
    pub fn output(&self) -> &O {
        &self.output
    }

    /// Get a mutable reference to the output sink.
    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    /// Decompose into the output sink.
    pub fn into_inner(self) -> O {
        self.output
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::DEVICE_ERROR_THRESHOLD;
    use crate::events::{EventLog, StackTarget, StatusEvent};
    use core::pin::pin;
    use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
    use std::vec::Vec;

    struct MockOutput {
        sent: Vec<MouseReport>,
        ready: bool,
        fail: bool,
    }

    impl MockOutput {
        fn new() -> Self {
            Self {
                sent: Vec::new(),
                ready: true,
                fail: false,
            }
        }
    }

    impl OutputSink for MockOutput {
        fn send(&mut self, report: &MouseReport) -> impl Future<Output = Result<(), OutputError>> {
            let result = if self.fail {
                Err(OutputError::Io)
            } else {
                self.sent.push(*report);
                Ok(())
            };
            core::future::ready(result)
        }

        fn is_ready(&self) -> bool {
            self.ready
        }
    }

    /// Simple blocking executor for testing async code.
    fn block_on<F: Future>(f: F) -> F::Output {
        fn noop_raw_waker() -> RawWaker {
            fn noop(_: *const ()) {}
            fn clone(_: *const ()) -> RawWaker {
                noop_raw_waker()
            }
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
            RawWaker::new(core::ptr::null(), &VTABLE)
        }

        // SAFETY: the vtable functions never touch the data pointer.
        let waker = unsafe { Waker::from_raw(noop_raw_waker()) };
        let mut cx = Context::from_waker(&waker);
        let mut f = pin!(f);

        match f.as_mut().poll(&mut cx) {
            Poll::Ready(output) => output,
            Poll::Pending => panic!("Mock future returned Pending unexpectedly"),
        }
    }

    #[test]
    fn test_sends_report() {
        let mut pump = ReportPump::new(MockOutput::new());
        let mut resets = ResetCoordinator::new();
        let mut log = EventLog::default();
        let report = MouseReport { buttons: 1, x: 3, y: -3, wheel: 0, pan: 0 };

        let result = block_on(pump.process_one(&report, 0, &mut resets, &mut log));
        assert!(result.is_ok());
        assert_eq!(pump.output().sent, [report]);
        assert_eq!(pump.stats().sent, 1);
    }

    #[test]
    fn test_not_ready_skips() {
        let mut output = MockOutput::new();
        output.ready = false;
        let mut pump = ReportPump::new(output);
        let mut resets = ResetCoordinator::new();
        let mut log = EventLog::default();

        let result = block_on(pump.process_one(&MouseReport::default(), 0, &mut resets, &mut log));
        assert_eq!(result, Err(OutputError::NotReady));
        assert_eq!(pump.stats().skipped, 1);
        assert_eq!(pump.stats().errors, 0);
        assert!(pump.output().sent.is_empty());
    }

    #[test]
    fn test_error_run_requests_device_reset() {
        let mut output = MockOutput::new();
        output.fail = true;
        let mut pump = ReportPump::new(output);
        let mut resets = ResetCoordinator::new();
        let mut log = EventLog::default();

        for t in 0..DEVICE_ERROR_THRESHOLD {
            let r = block_on(pump.process_one(&MouseReport::default(), t * 8 / 10, &mut resets, &mut log));
            assert_eq!(r, Err(OutputError::Io));
        }
        assert_eq!(resets.pending(), Some(StackTarget::Device));
        assert!(log.contains(StatusEvent::ResetPending(StackTarget::Device)));
    }

    #[test]
    fn test_send_leaves_resets_to_record() {
        let mut output = MockOutput::new();
        output.fail = true;
        let mut pump = ReportPump::new(output);
        let mut resets = ResetCoordinator::new();
        let mut log = EventLog::default();

        let mut results = Vec::new();
        for _ in 0..DEVICE_ERROR_THRESHOLD {
            results.push(block_on(pump.send(&MouseReport::default())));
        }
        assert_eq!(pump.stats().errors, DEVICE_ERROR_THRESHOLD);
        assert_eq!(resets.pending(), None);

        for (t, result) in results.into_iter().enumerate() {
            pump.record(result, t as u32, &mut resets, &mut log);
        }
        assert_eq!(resets.pending(), Some(StackTarget::Device));
    }

    #[test]
    fn test_not_ready_is_not_an_error_run() {
        let mut pump = ReportPump::new(MockOutput::new());
        let mut resets = ResetCoordinator::new();
        let mut log = EventLog::default();

        for t in 0..DEVICE_ERROR_THRESHOLD * 2 {
            pump.record(Err(OutputError::NotReady), t, &mut resets, &mut log);
        }
        assert_eq!(resets.pending(), None);
        assert!(log.events().is_empty());
    }
}
