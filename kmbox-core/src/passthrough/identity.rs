//! Attached-device identity and the downstream descriptor set built from it.

use core::fmt::Write;

use heapless::String;

use super::descriptor::{default_descriptor, ReportDescriptor};
use crate::config::{
    DEFAULT_MANUFACTURER, DEFAULT_PID, DEFAULT_PRODUCT, DEFAULT_SERIAL, DEFAULT_VID,
    MAX_STRING_LEN,
};

/// Cloned string descriptor text.
pub type DescriptorString = String<MAX_STRING_LEN>;

/// Standard USB string descriptor type code.
const STRING_DESCRIPTOR_TYPE: u8 = 0x03;

/// Fields of an upstream device descriptor the passthrough uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceDescriptor {
    pub vid: u16,
    pub pid: u16,
    pub bcd_device: u16,
    pub manufacturer_index: u8,
    pub product_index: u8,
    pub serial_index: u8,
}

impl DeviceDescriptor {
    /// Standard device descriptor length.
    pub const LEN: usize = 18;

    /// Decode a raw 18-byte device descriptor.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < Self::LEN || raw[1] != 0x01 {
            return None;
        }
        Some(Self {
            vid: u16::from_le_bytes([raw[8], raw[9]]),
            pid: u16::from_le_bytes([raw[10], raw[11]]),
            bcd_device: u16::from_le_bytes([raw[12], raw[13]]),
            manufacturer_index: raw[14],
            product_index: raw[15],
            serial_index: raw[16],
        })
    }
}

/// Identity cloned from an upstream HID device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vid: u16,
    pub pid: u16,
    pub manufacturer: DescriptorString,
    pub product: DescriptorString,
    pub serial: DescriptorString,
    pub has_serial: bool,
}

impl DeviceIdentity {
    #[must_use]
    pub fn new(vid: u16, pid: u16) -> Self {
        Self {
            vid,
            pid,
            manufacturer: DescriptorString::new(),
            product: DescriptorString::new(),
            serial: DescriptorString::new(),
            has_serial: false,
        }
    }

    /// Set the serial; an empty string leaves the device without one.
    pub fn set_serial(&mut self, serial: DescriptorString) {
        self.has_serial = !serial.is_empty();
        self.serial = serial;
    }
}

/// Convert a raw USB string descriptor (UTF-16LE) to ASCII text.
///
/// Code points outside ASCII become `'?'`. Trailing NULs are dropped and
/// the text is truncated at capacity.
#[must_use]
pub fn decode_string_descriptor(raw: &[u8]) -> DescriptorString {
    let mut out = DescriptorString::new();
    if raw.len() < 2 || raw[1] != STRING_DESCRIPTOR_TYPE {
        return out;
    }
    let end = usize::from(raw[0]).min(raw.len());
    let units = raw
        .get(2..end)
        .unwrap_or(&[])
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));

    for decoded in char::decode_utf16(units) {
        let c = match decoded {
            Ok(c) if c.is_ascii() => c,
            _ => '?',
        };
        if out.push(c).is_err() {
            break;
        }
    }
    while out.ends_with('\0') {
        out.pop();
    }
    out
}

/// `KMBox_<VID>_<PID>` in upper-case hex.
#[must_use]
pub fn fallback_serial(vid: u16, pid: u16) -> DescriptorString {
    let mut out = DescriptorString::new();
    if write!(out, "KMBox_{:04X}_{:04X}", vid, pid).is_err() {
        out.clear();
        let _ = out.push_str(DEFAULT_SERIAL);
    }
    out
}

fn text(s: &str) -> DescriptorString {
    let mut out = DescriptorString::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

/// Everything the downstream port serves: device identity, strings, and
/// the HID report descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamDescriptors {
    pub vid: u16,
    pub pid: u16,
    pub manufacturer: DescriptorString,
    pub product: DescriptorString,
    /// `None` leaves `iSerialNumber` unset.
    pub serial: Option<DescriptorString>,
    pub report_descriptor: ReportDescriptor,
    /// Identity is cloned from an attached device.
    pub cloned: bool,
}

impl DownstreamDescriptors {
    /// Fixed identity served while no upstream device is attached.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            vid: DEFAULT_VID,
            pid: DEFAULT_PID,
            manufacturer: text(DEFAULT_MANUFACTURER),
            product: text(DEFAULT_PRODUCT),
            serial: Some(text(DEFAULT_SERIAL)),
            report_descriptor: default_descriptor(),
            cloned: false,
        }
    }

    /// Descriptors for a cloned identity. Empty upstream strings fall back
    /// to the defaults; the serial is only advertised if the device had one.
    #[must_use]
    pub fn cloned(identity: &DeviceIdentity, report_descriptor: Option<ReportDescriptor>) -> Self {
        let or_default = |s: &DescriptorString, fallback: &str| {
            if s.is_empty() {
                text(fallback)
            } else {
                s.clone()
            }
        };
        Self {
            vid: identity.vid,
            pid: identity.pid,
            manufacturer: or_default(&identity.manufacturer, DEFAULT_MANUFACTURER),
            product: or_default(&identity.product, DEFAULT_PRODUCT),
            serial: identity.has_serial.then(|| identity.serial.clone()),
            report_descriptor: report_descriptor.unwrap_or_else(default_descriptor),
            cloned: true,
        }
    }

    /// Serial text for any request, derived from the identity when the
    /// device has none.
    #[must_use]
    pub fn serial_or_fallback(&self) -> DescriptorString {
        match &self.serial {
            Some(s) => s.clone(),
            None => fallback_serial(self.vid, self.pid),
        }
    }

    /// Whether serving `other` requires the host to re-enumerate.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        self.vid != other.vid
            || self.pid != other.pid
            || self.report_descriptor != other.report_descriptor
    }
}

impl Default for DownstreamDescriptors {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_descriptor(text: &[u16]) -> std::vec::Vec<u8> {
        let mut raw = std::vec![(2 + text.len() * 2) as u8, STRING_DESCRIPTOR_TYPE];
        for unit in text {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        raw
    }

    #[test]
    fn test_decode_ascii() {
        let units: std::vec::Vec<u16> = "Logitech".encode_utf16().collect();
        let s = decode_string_descriptor(&string_descriptor(&units));
        assert_eq!(s.as_str(), "Logitech");
    }

    #[test]
    fn test_decode_non_ascii_replaced() {
        // "Zowie®" plus an astral-plane character (one '?').
        let units: std::vec::Vec<u16> = "Zowie\u{00AE}\u{1F5B1}".encode_utf16().collect();
        let s = decode_string_descriptor(&string_descriptor(&units));
        assert_eq!(s.as_str(), "Zowie??");
    }

    #[test]
    fn test_decode_respects_length_byte() {
        let mut raw = string_descriptor(&[u16::from(b'A'), u16::from(b'B')]);
        raw[0] = 4;
        assert_eq!(decode_string_descriptor(&raw).as_str(), "A");
    }

    #[test]
    fn test_decode_rejects_wrong_type() {
        assert!(decode_string_descriptor(&[4, 0x02, b'A', 0]).is_empty());
        assert!(decode_string_descriptor(&[]).is_empty());
    }

    #[test]
    fn test_decode_strips_trailing_nul() {
        let raw = string_descriptor(&[u16::from(b'X'), 0, 0]);
        assert_eq!(decode_string_descriptor(&raw).as_str(), "X");
    }

    #[test]
    fn test_device_descriptor_parse() {
        let raw = [
            18, 0x01, 0x00, 0x02, 0, 0, 0, 64, 0x6D, 0x04, 0x2B, 0xC0, 0x01, 0x02, 1, 2, 3, 1,
        ];
        let d = DeviceDescriptor::parse(&raw).unwrap();
        assert_eq!(d.vid, 0x046D);
        assert_eq!(d.pid, 0xC02B);
        assert_eq!(d.bcd_device, 0x0201);
        assert_eq!((d.manufacturer_index, d.product_index, d.serial_index), (1, 2, 3));
        assert!(DeviceDescriptor::parse(&raw[..10]).is_none());
    }

    #[test]
    fn test_fallback_serial_format() {
        assert_eq!(fallback_serial(0x046D, 0xC02B).as_str(), "KMBox_046D_C02B");
    }

    #[test]
    fn test_cloned_without_serial() {
        let mut id = DeviceIdentity::new(0x1234, 0x5678);
        id.set_serial(DescriptorString::new());
        let d = DownstreamDescriptors::cloned(&id, None);
        assert!(d.cloned);
        assert_eq!(d.serial, None);
        assert_eq!(d.serial_or_fallback().as_str(), "KMBox_1234_5678");
        assert_eq!(d.manufacturer.as_str(), DEFAULT_MANUFACTURER);
        assert_eq!(d.report_descriptor, default_descriptor());
    }

    #[test]
    fn test_differs_from() {
        let defaults = DownstreamDescriptors::defaults();
        let mut id = DeviceIdentity::new(DEFAULT_VID, DEFAULT_PID);
        id.product = text("Other");
        let same_ids = DownstreamDescriptors::cloned(&id, None);
        assert!(!defaults.differs_from(&same_ids));

        let other = DownstreamDescriptors::cloned(&DeviceIdentity::new(1, 2), None);
        assert!(defaults.differs_from(&other));
    }
}
