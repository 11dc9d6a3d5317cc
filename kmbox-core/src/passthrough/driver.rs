//! Upstream USB host driver seam.
//!
//! A [`UsbHostDriver`] owns the upstream port. It produces [`HostEvent`]s
//! and carries out [`DriverCommand`]s. [`HostBridge`] sits between it and
//! the [`Passthrough`]: mounted devices are served from their
//! [`MountSnapshot`]s, and transfer re-arms are queued until the driver
//! collects them.

use core::future::Future;

use heapless::{Deque, Vec};

use super::host::MAX_UPSTREAM_DESCRIPTOR;
use super::{
    DeviceDescriptor, DownstreamDescriptors, HostError, HostStack, MountSnapshot, Passthrough,
    UpstreamEvent,
};
use crate::events::EventSink;

/// Devices reachable through one hub level.
pub const MAX_UPSTREAM_DEVICES: usize = 4;

/// Per-device HID report buffer.
pub const MAX_HOST_REPORT: usize = 128;

/// Commands queued for the driver between two dispatches.
pub const MAX_DRIVER_COMMANDS: usize = 8;

/// Messages from the host driver.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A HID interface finished enumeration.
    Mounted {
        snapshot: MountSnapshot,
        instance: u8,
        report_descriptor: Vec<u8, MAX_UPSTREAM_DESCRIPTOR>,
    },
    Unmounted { addr: u8, instance: u8 },
    /// An interrupt IN transfer completed.
    Report {
        addr: u8,
        instance: u8,
        data: Vec<u8, MAX_HOST_REPORT>,
    },
}

impl HostEvent {
    /// Mount event; a report descriptor past [`MAX_UPSTREAM_DESCRIPTOR`]
    /// is truncated.
    pub fn mounted(snapshot: MountSnapshot, instance: u8, report_descriptor: &[u8]) -> Self {
        Self::Mounted {
            snapshot,
            instance,
            report_descriptor: truncated(report_descriptor),
        }
    }

    /// Report event; bytes past [`MAX_HOST_REPORT`] are dropped.
    pub fn report(addr: u8, instance: u8, data: &[u8]) -> Self {
        Self::Report {
            addr,
            instance,
            data: truncated(data),
        }
    }
}

/// Requests for the host driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverCommand {
    /// Queue the next interrupt IN transfer.
    Rearm { addr: u8, instance: u8 },
    /// Drop every device and restart the bus.
    ResetBus,
}

/// Transport that owns the upstream USB port.
pub trait UsbHostDriver {
    /// Wait for the next mount, unmount, or completed transfer.
    fn next_event(&mut self) -> impl Future<Output = HostEvent>;

    /// Carry out one request from the passthrough.
    fn execute(&mut self, command: DriverCommand);
}

/// What one driver event changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeOutput {
    /// The served descriptors changed; the downstream port must re-enumerate.
    pub reenumerate: bool,
    /// Message for the device side.
    pub event: Option<UpstreamEvent>,
}

struct Entry {
    snapshot: MountSnapshot,
    /// Bit per mounted HID instance.
    instances: u32,
}

/// Mounted devices plus the commands waiting for the driver.
#[derive(Default)]
struct Devices {
    mounted: Vec<Entry, MAX_UPSTREAM_DEVICES>,
    commands: Deque<DriverCommand, MAX_DRIVER_COMMANDS>,
    rejected: u32,
}

impl Devices {
    fn get_mut(&mut self, addr: u8) -> Result<&mut MountSnapshot, HostError> {
        self.mounted
            .iter_mut()
            .find(|e| e.snapshot.addr == addr)
            .map(|e| &mut e.snapshot)
            .ok_or(HostError::Disconnected)
    }

    fn insert(&mut self, snapshot: MountSnapshot, instance: u8) {
        let bit = 1 << (instance % 32);
        if let Some(entry) = self.mounted.iter_mut().find(|e| e.snapshot.addr == snapshot.addr) {
            entry.snapshot = snapshot;
            entry.instances |= bit;
        } else if self.mounted.push(Entry { snapshot, instances: bit }).is_err() {
            warn!("upstream device table full");
        }
    }

    fn remove(&mut self, addr: u8, instance: u8) {
        let bit = 1 << (instance % 32);
        for entry in self.mounted.iter_mut().filter(|e| e.snapshot.addr == addr) {
            entry.instances &= !bit;
        }
        self.mounted.retain(|e| e.instances != 0);
    }

    /// Queue a command, coalescing with an identical one still pending.
    fn queue(&mut self, command: DriverCommand) -> Result<(), HostError> {
        if self.commands.iter().any(|c| *c == command) {
            return Ok(());
        }
        self.commands.push_back(command).map_err(|_| {
            self.rejected += 1;
            warn!("driver command queue full, dropped {:?}", command);
            HostError::Timeout
        })
    }
}

impl HostStack for Devices {
    fn device_descriptor(&mut self, addr: u8) -> Result<DeviceDescriptor, HostError> {
        self.get_mut(addr)?.device_descriptor(addr)
    }

    fn string_descriptor(&mut self, addr: u8, index: u8, buf: &mut [u8]) -> Result<usize, HostError> {
        self.get_mut(addr)?.string_descriptor(addr, index, buf)
    }

    fn receive_report(&mut self, addr: u8, instance: u8) -> Result<(), HostError> {
        self.get_mut(addr)?.receive_report(addr, instance)?;
        self.queue(DriverCommand::Rearm { addr, instance })
    }
}

/// Passthrough engine plus the device table it reads descriptors from.
pub struct HostBridge {
    passthrough: Passthrough,
    devices: Devices,
}

impl HostBridge {
    #[must_use]
    pub fn new() -> Self {
        Self {
            passthrough: Passthrough::new(),
            devices: Devices::default(),
        }
    }

    /// Run one driver event through the passthrough.
    pub fn process<E: EventSink>(&mut self, event: HostEvent, events: &mut E) -> BridgeOutput {
        match event {
            HostEvent::Mounted {
                snapshot,
                instance,
                report_descriptor,
            } => {
                let addr = snapshot.addr;
                self.devices.insert(snapshot, instance);
                match self
                    .passthrough
                    .on_mount(&mut self.devices, addr, instance, &report_descriptor, events)
                {
                    Ok(transition) => BridgeOutput {
                        reenumerate: transition.reenumerate,
                        event: Some(transition.event),
                    },
                    Err(_) => {
                        self.devices.remove(addr, instance);
                        BridgeOutput::default()
                    }
                }
            }
            HostEvent::Unmounted { addr, instance } => {
                let transition = self.passthrough.on_unmount(addr, instance, events);
                self.devices.remove(addr, instance);
                BridgeOutput {
                    reenumerate: transition.reenumerate,
                    event: Some(transition.event),
                }
            }
            HostEvent::Report { addr, instance, data } => BridgeOutput {
                reenumerate: false,
                event: self.passthrough.on_report(&mut self.devices, addr, instance, &data),
            },
        }
    }

    /// Forget every upstream device and ask the driver to restart the bus.
    pub fn reset(&mut self) -> BridgeOutput {
        info!("host stack reset");
        self.devices = Devices {
            rejected: self.devices.rejected,
            ..Devices::default()
        };
        let reenumerate = self.passthrough.reset();
        let _ = self.devices.queue(DriverCommand::ResetBus);
        BridgeOutput {
            reenumerate,
            event: Some(UpstreamEvent::Unmounted {
                attached: false,
                mouse_present: false,
            }),
        }
    }

    /// Oldest command waiting for the driver.
    pub fn next_command(&mut self) -> Option<DriverCommand> {
        self.devices.commands.pop_front()
    }

    /// Hand every pending command to `driver`, oldest first.
    pub fn dispatch<D: UsbHostDriver>(&mut self, driver: &mut D) {
        while let Some(command) = self.next_command() {
            driver.execute(command);
        }
    }

    /// Commands dropped because the queue was full.
    #[must_use]
    pub fn rejected_commands(&self) -> u32 {
        self.devices.rejected
    }

    #[must_use]
    pub fn served(&self) -> &DownstreamDescriptors {
        self.passthrough.served()
    }

    #[must_use]
    pub fn passthrough(&self) -> &Passthrough {
        &self.passthrough
    }
}

impl Default for HostBridge {
    fn default() -> Self {
        Self::new()
    }
}

fn truncated<const N: usize>(raw: &[u8]) -> Vec<u8, N> {
    Vec::from_slice(&raw[..raw.len().min(N)]).unwrap_or_default()
}
