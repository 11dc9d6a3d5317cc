//! Upstream host-stack seam.

use core::fmt;

use heapless::Vec;

use super::identity::DeviceDescriptor;

/// Largest raw string descriptor: header plus 126 UTF-16 units.
pub const MAX_RAW_STRING: usize = 254;

/// Enumeration buffer for upstream report descriptors.
pub const MAX_UPSTREAM_DESCRIPTOR: usize = 1024;

/// Error type for upstream host operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostError {
    /// The device stalled the control request.
    Stall,
    /// The request did not complete in time.
    Timeout,
    /// The device is gone.
    Disconnected,
    /// The returned descriptor could not be decoded.
    Malformed,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stall => write!(f, "request stalled"),
            Self::Timeout => write!(f, "request timed out"),
            Self::Disconnected => write!(f, "device disconnected"),
            Self::Malformed => write!(f, "malformed descriptor"),
        }
    }
}

/// Operations the passthrough needs from the upstream USB host stack.
///
/// Descriptor reads are synchronous and may block for tens of
/// milliseconds during mount.
pub trait HostStack {
    /// Read the 18-byte device descriptor of `addr`.
    fn device_descriptor(&mut self, addr: u8) -> Result<DeviceDescriptor, HostError>;

    /// Read raw string descriptor `index` (US English) into `buf`,
    /// returning its length.
    fn string_descriptor(&mut self, addr: u8, index: u8, buf: &mut [u8]) -> Result<usize, HostError>;

    /// Arm the interrupt IN transfer for the next report of `instance`.
    fn receive_report(&mut self, addr: u8, instance: u8) -> Result<(), HostError>;
}

/// Descriptors captured by a host driver at enumeration time.
///
/// Serves [`HostStack`] reads from memory so the passthrough can run
/// away from the driver that performed the control transfers.
#[derive(Debug, Clone, Default)]
pub struct MountSnapshot {
    pub addr: u8,
    pub device: [u8; DeviceDescriptor::LEN],
    pub manufacturer: Vec<u8, MAX_RAW_STRING>,
    pub product: Vec<u8, MAX_RAW_STRING>,
    pub serial: Vec<u8, MAX_RAW_STRING>,
    /// Reports armed through this snapshot, for the driver to act on.
    pub armed: u8,
}

impl MountSnapshot {
    /// Capture raw descriptors. Strings longer than [`MAX_RAW_STRING`] are
    /// truncated.
    pub fn new(
        addr: u8,
        device: [u8; DeviceDescriptor::LEN],
        manufacturer: &[u8],
        product: &[u8],
        serial: &[u8],
    ) -> Self {
        Self {
            addr,
            device,
            manufacturer: truncated(manufacturer),
            product: truncated(product),
            serial: truncated(serial),
            armed: 0,
        }
    }

    fn string_for(&self, index: u8) -> Option<&[u8]> {
        let d = DeviceDescriptor::parse(&self.device)?;
        match index {
            0 => None,
            i if i == d.manufacturer_index => Some(self.manufacturer.as_slice()),
            i if i == d.product_index => Some(self.product.as_slice()),
            i if i == d.serial_index => Some(self.serial.as_slice()),
            _ => None,
        }
    }
}

impl HostStack for MountSnapshot {
    fn device_descriptor(&mut self, addr: u8) -> Result<DeviceDescriptor, HostError> {
        if addr != self.addr {
            return Err(HostError::Disconnected);
        }
        DeviceDescriptor::parse(&self.device).ok_or(HostError::Malformed)
    }

    fn string_descriptor(&mut self, addr: u8, index: u8, buf: &mut [u8]) -> Result<usize, HostError> {
        if addr != self.addr {
            return Err(HostError::Disconnected);
        }
        let raw = self
            .string_for(index)
            .filter(|s| !s.is_empty())
            .ok_or(HostError::Stall)?;
        let len = raw.len().min(buf.len());
        buf[..len].copy_from_slice(&raw[..len]);
        Ok(len)
    }

    fn receive_report(&mut self, addr: u8, _instance: u8) -> Result<(), HostError> {
        if addr != self.addr {
            return Err(HostError::Disconnected);
        }
        self.armed = self.armed.wrapping_add(1);
        Ok(())
    }
}

fn truncated(raw: &[u8]) -> Vec<u8, MAX_RAW_STRING> {
    let len = raw.len().min(MAX_RAW_STRING);
    Vec::from_slice(&raw[..len]).unwrap_or_default()
}
