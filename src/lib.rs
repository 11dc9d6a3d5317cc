//! KMBox firmware for the RP2040.
//!
//! Core 0 runs the downstream USB port, the command link, the board button,
//! the status LED, and the watchdog supervisor. Core 1 runs the upstream
//! passthrough. All decisions are made by [`kmbox_core`]; this crate wires
//! it to the hardware.

#![no_std]

use embassy_rp::bind_interrupts;
use embassy_rp::peripherals::{UART1, USB};
use embassy_time::Instant;

pub mod input;
pub mod output;
pub mod shared;
pub mod status;
pub mod watchdog;

pub use input::{run_host, CommandLink, DetachedPort, SerialError};
pub use output::{port_ready, port_state, run_port, UsbHidOutput};
pub use status::{PortState, StatusLed};
pub use watchdog::RpWatchdog;

bind_interrupts!(pub struct Irqs {
    UART1_IRQ => embassy_rp::uart::InterruptHandler<UART1>;
    USBCTRL_IRQ => embassy_rp::usb::InterruptHandler<USB>;
});

/// Milliseconds since boot, wrapping after ~49 days.
pub fn now_ms() -> u32 {
    Instant::now().as_millis() as u32
}
