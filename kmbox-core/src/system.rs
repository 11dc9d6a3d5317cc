//! Device-side aggregate: everything the downstream core owns.

use kmbox_proto::{format_button_event, MAX_RESPONSE_SIZE};

use crate::config::NUDGE_DELTA_Y;
use crate::events::{EventSink, StatusEvent};
use crate::gesture::{ButtonGesture, Gesture};
use crate::mouse::{MouseReport, VirtualMouse};
use crate::passthrough::UpstreamEvent;
use crate::reset::{ResetCoordinator, ResetError};
use crate::shell::{CommandShell, Response};

/// Output of one device tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Report to submit downstream.
    pub report: MouseReport,
    /// Button-change notification for the command link, if enabled.
    pub button_event: Option<Response>,
}

/// Virtual mouse, command shell, board button, and reset coordination,
/// owned by the downstream core.
pub struct DeviceSide {
    pub mouse: VirtualMouse,
    pub shell: CommandShell,
    pub gesture: ButtonGesture,
    pub resets: ResetCoordinator,
    upstream_mouse: bool,
    upstream_connected: bool,
}

impl DeviceSide {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mouse: VirtualMouse::new(),
            shell: CommandShell::new(),
            gesture: ButtonGesture::new(),
            resets: ResetCoordinator::new(),
            upstream_mouse: false,
            upstream_connected: false,
        }
    }

    /// Feed bytes from the command link, handing each response to `emit`.
    pub fn handle_serial<E: EventSink>(
        &mut self,
        bytes: &[u8],
        now_ms: u32,
        events: &mut E,
        mut emit: impl FnMut(&[u8]),
    ) {
        let mouse = &mut self.mouse;
        self.shell.feed_slice(bytes, now_ms, mouse, |response| {
            events.emit(StatusEvent::ActivityFlash);
            emit(response);
        });
    }

    /// Complete a pending CR-terminated line once the link is idle.
    pub fn poll_serial(&mut self, now_ms: u32) -> Option<Response> {
        self.shell.poll(now_ms, &mut self.mouse)
    }

    /// Apply a message from the host core.
    pub fn apply_upstream<E: EventSink>(&mut self, event: UpstreamEvent, now_ms: u32, events: &mut E) {
        match event {
            UpstreamEvent::Mouse(report) => self.mouse.apply_physical(&report, now_ms),
            UpstreamEvent::Keyboard { .. } => {}
            UpstreamEvent::Mounted { mouse, .. } => {
                self.upstream_connected = true;
                self.upstream_mouse |= mouse;
                self.resets.set_host_connected(true);
                events.emit(StatusEvent::StatusChanged);
            }
            UpstreamEvent::Unmounted { attached, mouse_present } => {
                self.upstream_mouse = mouse_present;
                if !mouse_present {
                    self.mouse.clear_physical();
                }
                self.upstream_connected = attached;
                self.resets.set_host_connected(attached);
            }
        }
    }

    /// Sample the board button. A long hold requests a reset of both stacks.
    pub fn sample_button<E: EventSink>(
        &mut self,
        pressed: bool,
        now_ms: u32,
        events: &mut E,
    ) -> Option<Result<(), ResetError>> {
        match self.gesture.sample(pressed, now_ms)? {
            Gesture::ResetRequested => Some(self.resets.reset_both(now_ms, events)),
            Gesture::Pressed | Gesture::Released { .. } => None,
        }
    }

    /// One downstream polling step: nudge, button update, report drain.
    pub fn tick(&mut self, now_ms: u32) -> Tick {
        let button_event = self.supervise(now_ms);
        Tick {
            report: self.take_report(),
            button_event,
        }
    }

    /// Nudge and button update without draining the accumulators.
    ///
    /// Returns the button-change notification, if enabled.
    pub fn supervise(&mut self, now_ms: u32) -> Option<Response> {
        if self.gesture.nudging() && !self.upstream_mouse {
            self.mouse.add_movement(0, NUDGE_DELTA_Y, now_ms);
        }
        self.mouse.update(now_ms).and_then(render_button_event)
    }

    /// Drain the accumulators into the next downstream report.
    pub fn take_report(&mut self) -> MouseReport {
        self.mouse.report()
    }

    /// Return a report the downstream port did not deliver.
    pub fn requeue(&mut self, report: &MouseReport) {
        self.mouse.restore(report);
    }

    #[must_use]
    pub fn upstream_mouse(&self) -> bool {
        self.upstream_mouse
    }

    #[must_use]
    pub fn upstream_connected(&self) -> bool {
        self.upstream_connected
    }

    /// Forget upstream state after a host stack reset.
    pub fn clear_upstream(&mut self) {
        self.upstream_mouse = false;
        self.upstream_connected = false;
        self.mouse.clear_physical();
    }
}

impl Default for DeviceSide {
    fn default() -> Self {
        Self::new()
    }
}

fn render_button_event(mask: u8) -> Option<Response> {
    let mut buf = [0u8; MAX_RESPONSE_SIZE];
    let len = format_button_event(&mut buf, mask).ok()?;
    Response::from_slice(&buf[..len]).ok()
}
