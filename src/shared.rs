//! State and queues shared between tasks and across the two cores.
//!
//! Every cross-core primitive here is built on `CriticalSectionRawMutex`,
//! which embassy-rp backs with a hardware spinlock.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::pipe::Pipe;
use embassy_sync::signal::Signal;
use kmbox_core::{DeviceSide, DownstreamDescriptors, EventSink, Heartbeats, MouseReport, StatusEvent, UpstreamEvent};

/// Depth of the host-to-device event queue.
pub const UPSTREAM_QUEUE: usize = 32;

/// Depth of the downstream report queue.
pub const REPORT_QUEUE: usize = 4;

/// Depth of the status event queue.
pub const STATUS_QUEUE: usize = 16;

/// Outgoing command link bytes (echo, prompt, getter values, button events).
pub const TX_PIPE_SIZE: usize = 512;

/// Virtual mouse, shell, gesture, and resets. Core 0 only.
pub static DEVICE: Mutex<CriticalSectionRawMutex, DeviceSide> = Mutex::new(DeviceSide::new());

pub static HEARTBEATS: Heartbeats = Heartbeats::new();

/// Core 1 to core 0: decoded upstream traffic.
pub static UPSTREAM: Channel<CriticalSectionRawMutex, UpstreamEvent, UPSTREAM_QUEUE> = Channel::new();

pub static STATUS: Channel<CriticalSectionRawMutex, StatusEvent, STATUS_QUEUE> = Channel::new();

/// Reports drained from the virtual mouse, waiting for the endpoint.
///
/// Only drained while there is room, so movement that does not fit stays
/// in the accumulators.
pub static REPORTS: Channel<CriticalSectionRawMutex, MouseReport, REPORT_QUEUE> = Channel::new();

/// Descriptors the downstream port should serve. `None` means defaults.
pub static SERVED: BlockingMutex<CriticalSectionRawMutex, RefCell<Option<DownstreamDescriptors>>> =
    BlockingMutex::new(RefCell::new(None));

/// Raised when [`SERVED`] changed and the port must re-enumerate.
pub static IDENTITY_CHANGED: Signal<CriticalSectionRawMutex, ()> = Signal::new();

pub static DEVICE_RESET: Signal<CriticalSectionRawMutex, ()> = Signal::new();
pub static HOST_RESET: Signal<CriticalSectionRawMutex, ()> = Signal::new();

pub static TX_PIPE: Pipe<CriticalSectionRawMutex, TX_PIPE_SIZE> = Pipe::new();

/// Snapshot of the served descriptors.
pub fn served() -> DownstreamDescriptors {
    SERVED.lock(|cell| cell.borrow().clone().unwrap_or_default())
}

/// Publish new downstream descriptors and request re-enumeration.
pub fn publish_served(descriptors: DownstreamDescriptors) {
    SERVED.lock(|cell| *cell.borrow_mut() = Some(descriptors));
    IDENTITY_CHANGED.signal(());
}

/// Queue bytes for the command link. Bytes that do not fit are dropped.
pub fn transmit(bytes: &[u8]) {
    let mut rest = bytes;
    while !rest.is_empty() {
        match TX_PIPE.try_write(rest) {
            Ok(n) => rest = &rest[n..],
            Err(_) => {
                defmt::warn!("tx pipe full, dropped {} bytes", rest.len());
                return;
            }
        }
    }
}

/// Forwards status events to the LED task. Full queue drops the event.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusQueue;

impl EventSink for StatusQueue {
    fn emit(&mut self, event: StatusEvent) {
        let _ = STATUS.try_send(event);
    }
}
