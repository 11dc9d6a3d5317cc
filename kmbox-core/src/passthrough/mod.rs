//! HID passthrough engine.
//!
//! Runs next to the upstream host stack. On mount it walks the device's
//! report descriptor, clones the device identity, and decides whether the
//! downstream port must re-enumerate. Upstream reports are decoded into the
//! canonical [`MouseReport`] and handed to the device side as
//! [`UpstreamEvent`]s; nothing here touches the virtual mouse directly.

pub mod descriptor;
pub mod driver;
pub mod host;
pub mod identity;

pub use descriptor::{DescriptorInfo, ReportDescriptor};
pub use driver::{BridgeOutput, DriverCommand, HostBridge, HostEvent, UsbHostDriver};
pub use host::{HostError, HostStack, MountSnapshot};
pub use identity::{
    decode_string_descriptor, fallback_serial, DescriptorString, DeviceDescriptor,
    DeviceIdentity, DownstreamDescriptors,
};

use crate::events::{EventSink, StatusEvent};
use crate::mouse::MouseReport;
use host::MAX_RAW_STRING;

/// Emitted axis values stay within the descriptor's logical range.
const AXIS_LIMIT: i16 = 127;

/// Messages from the host side to the device side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpstreamEvent {
    /// An upstream HID interface mounted.
    Mounted { mouse: bool, keyboard: bool },
    /// An upstream HID interface went away.
    Unmounted { attached: bool, mouse_present: bool },
    /// Decoded physical mouse sample.
    Mouse(MouseReport),
    /// Keyboard report observed (not forwarded).
    Keyboard { modifiers: u8 },
}

/// Result of an upstream mount or unmount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    /// Served descriptors changed; the downstream port must disconnect and
    /// reconnect before serving them.
    pub reenumerate: bool,
    /// Message for the device side.
    pub event: UpstreamEvent,
}

/// Upstream counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PassthroughStats {
    pub mounts: u32,
    pub unmounts: u32,
    pub mount_failures: u32,
    pub mouse_reports: u32,
    pub keyboard_reports: u32,
    pub ignored_reports: u32,
    pub rearm_failures: u32,
    pub last_modifiers: u8,
}

/// One upstream HID interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interface {
    addr: u8,
    instance: u8,
    report_id: Option<u8>,
}

impl Interface {
    fn matches(&self, addr: u8, instance: u8) -> bool {
        self.addr == addr && self.instance == instance
    }
}

/// The device whose identity is being cloned.
#[derive(Debug, Clone)]
struct Attached {
    addr: u8,
    identity: DeviceIdentity,
    /// Bit per mounted HID instance.
    instances: u32,
}

pub struct Passthrough {
    attached: Option<Attached>,
    mouse: Option<Interface>,
    keyboard: Option<Interface>,
    runtime_descriptor: Option<ReportDescriptor>,
    served: DownstreamDescriptors,
    generation: u32,
    stats: PassthroughStats,
}

impl Passthrough {
    #[must_use]
    pub fn new() -> Self {
        Self {
            attached: None,
            mouse: None,
            keyboard: None,
            runtime_descriptor: None,
            served: DownstreamDescriptors::defaults(),
            generation: 0,
            stats: PassthroughStats::default(),
        }
    }

    /// Handle an upstream HID interface mount.
    ///
    /// Reads the device and string descriptors through `host`, clones the
    /// identity, and arms the first report transfer.
    pub fn on_mount<H: HostStack, E: EventSink>(
        &mut self,
        host: &mut H,
        addr: u8,
        instance: u8,
        report_descriptor: &[u8],
        events: &mut E,
    ) -> Result<Transition, HostError> {
        let device = host.device_descriptor(addr).inspect_err(|e| {
            warn!("upstream {} device descriptor read failed: {:?}", addr, e);
            self.stats.mount_failures += 1;
        })?;
        let info = descriptor::inspect(report_descriptor);
        self.stats.mounts += 1;
        info!(
            "upstream mount addr={} instance={} vid={:#x} pid={:#x} mouse={} keyboard={}",
            addr, instance, device.vid, device.pid, info.has_mouse, info.has_keyboard
        );

        let replaces_identity = match &self.attached {
            None => true,
            Some(current) => {
                current.addr != addr && info.has_mouse && self.mouse.map_or(true, |m| m.addr != current.addr)
            }
        };
        if replaces_identity {
            let identity = read_identity(host, addr, &device);
            self.attached = Some(Attached {
                addr,
                identity,
                instances: 0,
            });
        }
        if let Some(attached) = self.attached.as_mut().filter(|a| a.addr == addr) {
            attached.instances |= 1 << (instance % 32);
        }

        if info.has_mouse && self.mouse.is_none() {
            self.mouse = Some(Interface {
                addr,
                instance,
                report_id: info.mouse_report_id,
            });
            self.runtime_descriptor = descriptor::splice(report_descriptor, &info);
            if self.runtime_descriptor.is_none() {
                debug!("upstream mouse layout not canonical, serving default descriptor");
            }
        }
        if info.has_keyboard && self.keyboard.is_none() {
            self.keyboard = Some(Interface {
                addr,
                instance,
                report_id: info.keyboard_report_id,
            });
        }

        let reenumerate = self.refresh_served();
        self.arm(host, addr, instance);
        events.emit(StatusEvent::StatusChanged);

        Ok(Transition {
            reenumerate,
            event: UpstreamEvent::Mounted {
                mouse: info.has_mouse,
                keyboard: info.has_keyboard,
            },
        })
    }

    /// Handle an upstream HID interface unmount.
    pub fn on_unmount<E: EventSink>(&mut self, addr: u8, instance: u8, events: &mut E) -> Transition {
        self.stats.unmounts += 1;
        info!("upstream unmount addr={} instance={}", addr, instance);

        if self.mouse.is_some_and(|m| m.matches(addr, instance)) {
            self.mouse = None;
            self.runtime_descriptor = None;
        }
        if self.keyboard.is_some_and(|k| k.matches(addr, instance)) {
            self.keyboard = None;
        }
        if let Some(attached) = self.attached.as_mut().filter(|a| a.addr == addr) {
            attached.instances &= !(1 << (instance % 32));
            if attached.instances == 0 {
                self.attached = None;
            }
        }

        let reenumerate = self.refresh_served();
        events.emit(StatusEvent::DisconnectFlash);
        events.emit(StatusEvent::StatusChanged);

        Transition {
            reenumerate,
            event: UpstreamEvent::Unmounted {
                attached: self.attached.is_some() || self.keyboard.is_some() || self.mouse.is_some(),
                mouse_present: self.mouse.is_some(),
            },
        }
    }

    /// Decode one upstream report and re-arm the transfer.
    pub fn on_report<H: HostStack>(
        &mut self,
        host: &mut H,
        addr: u8,
        instance: u8,
        report: &[u8],
    ) -> Option<UpstreamEvent> {
        let event = self.decode(addr, instance, report);
        self.arm(host, addr, instance);
        event
    }

    fn decode(&mut self, addr: u8, instance: u8, report: &[u8]) -> Option<UpstreamEvent> {
        if let Some(mouse) = self.mouse.filter(|m| m.matches(addr, instance)) {
            if let Some(decoded) = strip_report_id(report, mouse.report_id).and_then(decode_mouse_report) {
                self.stats.mouse_reports += 1;
                trace!("upstream mouse {:?}", decoded);
                return Some(UpstreamEvent::Mouse(decoded));
            }
        }
        if let Some(keyboard) = self.keyboard.filter(|k| k.matches(addr, instance)) {
            if let Some(&modifiers) = strip_report_id(report, keyboard.report_id).and_then(|r| r.first()) {
                self.stats.keyboard_reports += 1;
                self.stats.last_modifiers = modifiers;
                return Some(UpstreamEvent::Keyboard { modifiers });
            }
        }
        self.stats.ignored_reports += 1;
        None
    }

    fn arm<H: HostStack>(&mut self, host: &mut H, addr: u8, instance: u8) {
        if let Err(e) = host.receive_report(addr, instance) {
            warn!("upstream {} re-arm failed: {:?}", addr, e);
            self.stats.rearm_failures += 1;
        }
    }

    /// Recompute the served descriptor set; returns whether it changed in a
    /// way the host must re-enumerate for.
    fn refresh_served(&mut self) -> bool {
        let next = match &self.attached {
            Some(a) => DownstreamDescriptors::cloned(&a.identity, self.runtime_descriptor.clone()),
            None => DownstreamDescriptors::defaults(),
        };
        if !self.served.differs_from(&next) {
            return false;
        }
        info!(
            "downstream identity {:#x}:{:#x} -> {:#x}:{:#x}",
            self.served.vid, self.served.pid, next.vid, next.pid
        );
        self.served = next;
        self.generation = self.generation.wrapping_add(1);
        true
    }

    /// Descriptors the downstream port should currently serve.
    #[must_use]
    pub fn served(&self) -> &DownstreamDescriptors {
        &self.served
    }

    /// Bumped on every change that requires re-enumeration.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Identity of the attached device, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.attached.as_ref().map(|a| &a.identity)
    }

    #[must_use]
    pub fn mouse_present(&self) -> bool {
        self.mouse.is_some()
    }

    #[must_use]
    pub fn stats(&self) -> PassthroughStats {
        self.stats
    }

    /// Forget all upstream state, as after a host stack reset.
    pub fn reset(&mut self) -> bool {
        self.attached = None;
        self.mouse = None;
        self.keyboard = None;
        self.runtime_descriptor = None;
        self.refresh_served()
    }
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::new()
    }
}

fn read_identity<H: HostStack>(host: &mut H, addr: u8, device: &DeviceDescriptor) -> DeviceIdentity {
    let mut identity = DeviceIdentity::new(device.vid, device.pid);
    let mut raw = [0u8; MAX_RAW_STRING];
    let mut read = |index: u8| -> DescriptorString {
        if index == 0 {
            return DescriptorString::new();
        }
        match host.string_descriptor(addr, index, &mut raw) {
            Ok(len) => decode_string_descriptor(&raw[..len]),
            Err(e) => {
                debug!("string {} read failed: {:?}", index, e);
                DescriptorString::new()
            }
        }
    };
    identity.manufacturer = read(device.manufacturer_index);
    identity.product = read(device.product_index);
    let serial = read(device.serial_index);
    identity.set_serial(serial);
    identity
}

/// Drop a leading report ID; reports for other IDs yield `None`.
fn strip_report_id(report: &[u8], report_id: Option<u8>) -> Option<&[u8]> {
    match report_id {
        None => Some(report),
        Some(id) => match report.split_first() {
            Some((&first, rest)) if first == id => Some(rest),
            _ => None,
        },
    }
}

fn clamp_axis(value: i16) -> i8 {
    value.clamp(-AXIS_LIMIT, AXIS_LIMIT) as i8
}

/// Decode an upstream mouse report body.
///
/// Eight-byte bodies use the extended layout: buttons in byte 0, a wheel
/// value in whichever of bytes 1..=3 is non-zero first, and 16-bit X/Y in
/// bytes 4..8. Anything else is read as leading `buttons, x, y, wheel, pan`.
#[must_use]
pub fn decode_mouse_report(body: &[u8]) -> Option<MouseReport> {
    if body.len() == 8 {
        let wheel = body[1..4].iter().copied().find(|&b| b != 0).unwrap_or(0);
        return Some(MouseReport {
            buttons: body[0] & 0x1F,
            x: clamp_axis(i16::from_le_bytes([body[4], body[5]])),
            y: clamp_axis(i16::from_le_bytes([body[6], body[7]])),
            wheel: wheel as i8,
            pan: 0,
        });
    }

    let (&buttons, rest) = body.split_first()?;
    let byte = |i: usize| rest.get(i).map_or(0, |&b| b as i8);
    Some(MouseReport {
        buttons,
        x: byte(0),
        y: byte(1),
        wheel: byte(2),
        pan: byte(3),
    })
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::config::{DEFAULT_PID, DEFAULT_VID};
    use crate::events::EventLog;
    use std::vec::Vec;

    fn string(text: &str) -> heapless::Vec<u8, MAX_RAW_STRING> {
        let mut raw = heapless::Vec::new();
        let units: Vec<u16> = text.encode_utf16().collect();
        raw.push((2 + units.len() * 2) as u8).unwrap();
        raw.push(0x03).unwrap();
        for u in units {
            raw.extend_from_slice(&u.to_le_bytes()).unwrap();
        }
        raw
    }

    fn snapshot(addr: u8, vid: u16, pid: u16, serial: &str) -> MountSnapshot {
        let [vl, vh] = vid.to_le_bytes();
        let [pl, ph] = pid.to_le_bytes();
        MountSnapshot {
            addr,
            device: [18, 1, 0, 2, 0, 0, 0, 64, vl, vh, pl, ph, 0, 1, 1, 2, 3, 1],
            manufacturer: string("Acme"),
            product: string("Pointer"),
            serial: string(serial),
            armed: 0,
        }
    }

    #[test]
    fn test_mount_clones_identity_and_reenumerates() {
        let mut p = Passthrough::new();
        let mut host = snapshot(1, 0x046D, 0xC077, "ABC123");
        let mut events = EventLog::default();

        let t = p
            .on_mount(&mut host, 1, 0, descriptor::MOUSE_SEGMENT, &mut events)
            .unwrap();
        assert!(t.reenumerate);
        assert_eq!(t.event, UpstreamEvent::Mounted { mouse: true, keyboard: false });
        assert_eq!(host.armed, 1);

        let served = p.served();
        assert!(served.cloned);
        assert_eq!((served.vid, served.pid), (0x046D, 0xC077));
        assert_eq!(served.manufacturer.as_str(), "Acme");
        assert_eq!(served.product.as_str(), "Pointer");
        assert_eq!(served.serial.as_ref().map(|s| s.as_str()), Some("ABC123"));
        assert!(p.mouse_present());
        assert_eq!(p.generation(), 1);
        assert!(events.contains(StatusEvent::StatusChanged));
    }

    #[test]
    fn test_same_identity_second_interface_no_reenumerate() {
        let mut p = Passthrough::new();
        let mut host = snapshot(1, 0x1111, 0x2222, "");
        let mut events = EventLog::default();

        p.on_mount(&mut host, 1, 0, descriptor::MOUSE_SEGMENT, &mut events)
            .unwrap();
        let t = p
            .on_mount(&mut host, 1, 1, descriptor::CONSUMER_SEGMENT, &mut events)
            .unwrap();
        assert!(!t.reenumerate);
        assert_eq!(p.served().serial, None);
        assert_eq!(p.served().serial_or_fallback().as_str(), "KMBox_1111_2222");
    }

    #[test]
    fn test_unmount_reverts_to_defaults() {
        let mut p = Passthrough::new();
        let mut host = snapshot(3, 0x1234, 0x5678, "S");
        let mut events = EventLog::default();

        p.on_mount(&mut host, 3, 0, descriptor::MOUSE_SEGMENT, &mut events)
            .unwrap();
        let t = p.on_unmount(3, 0, &mut events);
        assert!(t.reenumerate);
        assert_eq!(
            t.event,
            UpstreamEvent::Unmounted { attached: false, mouse_present: false }
        );
        assert!(!p.served().cloned);
        assert_eq!((p.served().vid, p.served().pid), (DEFAULT_VID, DEFAULT_PID));
        assert!(p.identity().is_none());
        assert!(events.contains(StatusEvent::DisconnectFlash));
    }

    #[test]
    fn test_mount_failure_keeps_defaults() {
        let mut p = Passthrough::new();
        let mut host = snapshot(1, 0x1234, 0x5678, "S");
        host.device[1] = 0x02;
        let mut events = EventLog::default();

        let r = p.on_mount(&mut host, 1, 0, descriptor::MOUSE_SEGMENT, &mut events);
        assert_eq!(r, Err(HostError::Malformed));
        assert!(!p.served().cloned);
        assert_eq!(p.stats().mount_failures, 1);
    }

    #[test]
    fn test_reports_routed_by_interface_and_id() {
        let mut p = Passthrough::new();
        let mut host = snapshot(1, 0x1234, 0x5678, "S");
        let mut events = EventLog::default();
        p.on_mount(&mut host, 1, 0, descriptor::MOUSE_SEGMENT, &mut events)
            .unwrap();
        p.on_mount(&mut host, 1, 1, descriptor::KEYBOARD_SEGMENT, &mut events)
            .unwrap();

        // Mouse report with ID 2 prefix.
        let e = p.on_report(&mut host, 1, 0, &[2, 0x01, 5, 0xFB, 0, 0]);
        assert_eq!(
            e,
            Some(UpstreamEvent::Mouse(MouseReport { buttons: 1, x: 5, y: -5, wheel: 0, pan: 0 }))
        );
        // Wrong report ID on the mouse interface.
        assert_eq!(p.on_report(&mut host, 1, 0, &[3, 0x01, 0x00]), None);
        // Keyboard report.
        assert_eq!(
            p.on_report(&mut host, 1, 1, &[1, 0x02, 0, 4, 0, 0, 0, 0, 0]),
            Some(UpstreamEvent::Keyboard { modifiers: 0x02 })
        );
        // Unknown interface.
        assert_eq!(p.on_report(&mut host, 1, 7, &[0; 4]), None);

        let stats = p.stats();
        assert_eq!(stats.mouse_reports, 1);
        assert_eq!(stats.keyboard_reports, 1);
        assert_eq!(stats.ignored_reports, 2);
        assert_eq!(stats.last_modifiers, 0x02);
        // Two mounts plus four reports.
        assert_eq!(host.armed, 6);
    }

    #[test]
    fn test_decode_extended_layout() {
        // buttons, wheel in byte 2, X=300, Y=-2
        let body = [0xE3, 0, 0xFF, 0x05, 0x2C, 0x01, 0xFE, 0xFF];
        let r = decode_mouse_report(&body).unwrap();
        assert_eq!(r.buttons, 0x03);
        assert_eq!(r.x, 127);
        assert_eq!(r.y, -2);
        assert_eq!(r.wheel, -1);
    }

    #[test]
    fn test_decode_leading_bytes() {
        assert_eq!(
            decode_mouse_report(&[0x04, 0x10, 0xF0]),
            Some(MouseReport { buttons: 4, x: 16, y: -16, wheel: 0, pan: 0 })
        );
        assert_eq!(decode_mouse_report(&[]), None);
    }
}
