//! Platform-agnostic KMBox engine.
//!
//! Everything that decides *what* the interposer does lives here, with no
//! dependency on a particular chip or USB stack, so it runs unchanged on
//! the firmware and on a development host.
//!
//! # Overview
//!
//! - [`ring`]: single-producer/single-consumer serial ingest ring, filled by
//!   DMA or by a per-byte receive path ([`SerialRing`])
//! - [`shell`]: line assembly, command execution, echo and prompt
//!   ([`CommandShell`])
//! - [`mouse`]: virtual mouse state merging physical input with forced
//!   buttons, clicks, locks, and movement ([`VirtualMouse`])
//! - [`passthrough`]: upstream mount/report handling, identity cloning,
//!   runtime report descriptors ([`Passthrough`]), and the seam to the
//!   upstream host driver ([`HostBridge`], [`UsbHostDriver`])
//! - [`reset`]: stack reset requests, cooldown, and downstream error runs
//!   ([`ResetCoordinator`])
//! - [`watchdog`]: per-core heartbeats gating the hardware watchdog
//!   ([`LivenessSupervisor`])
//! - [`output`]: downstream report sink trait and pump ([`ReportPump`])
//! - [`system`]: the device-core aggregate ([`DeviceSide`])
//!
//! # Example
//!
//! ```
//! use kmbox_core::{DeviceSide, NoEvents};
//!
//! let mut side = DeviceSide::new();
//! let mut echoed = Vec::new();
//! side.handle_serial(b"km.move(10, -4)\r\n", 0, &mut NoEvents, |r| echoed.extend_from_slice(r));
//! assert_eq!(echoed, b"km.move(10, -4)\r\n>>> ");
//!
//! let tick = side.tick(8);
//! assert_eq!((tick.report.x, tick.report.y), (10, -4));
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Log through defmt (for embedded targets)
//! - **`log`**: Log through the `log` facade

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod fmt;

pub mod config;
pub mod events;
pub mod gesture;
pub mod history;
pub mod mouse;
pub mod output;
pub mod passthrough;
pub mod reset;
pub mod ring;
pub mod rng;
pub mod shell;
pub mod system;
pub mod watchdog;

pub use events::{EventLog, EventSink, NoEvents, StackTarget, StatusEvent};
pub use gesture::{ButtonGesture, Gesture};
pub use history::MovementHistory;
pub use mouse::{ButtonState, MouseReport, VirtualMouse};
pub use output::{OutputError, OutputSink, PumpStats, ReportPump};
pub use passthrough::{
    BridgeOutput, DeviceIdentity, DownstreamDescriptors, DriverCommand, HostBridge, HostError,
    HostEvent, HostStack, MountSnapshot, Passthrough, PassthroughStats, Transition, UpstreamEvent,
    UsbHostDriver,
};
pub use reset::{ResetCoordinator, ResetError};
pub use ring::{RingError, RingLine, RingReader, RingStats, RingWriter, SerialRing};
pub use shell::{CommandShell, Response, ShellStats};
pub use system::{DeviceSide, Tick};
pub use watchdog::{CoreId, HardwareWatchdog, Heartbeats, LivenessSupervisor, Verdict};
