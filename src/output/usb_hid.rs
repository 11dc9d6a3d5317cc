//! Downstream composite HID port.
//!
//! The embassy-usb device is built from the currently served
//! [`DownstreamDescriptors`](kmbox_core::DownstreamDescriptors). When the
//! identity changes or a device stack reset is requested, the device is
//! disabled, held disconnected, and built again so the host re-enumerates.

use defmt::{info, warn};
use embassy_futures::select::{select, select3, Either3};
use embassy_rp::peripherals::USB;
use embassy_rp::usb::Driver;
use embassy_rp::Peri;
use embassy_time::{with_timeout, Duration, Timer};
use embassy_usb::class::hid::{Config as HidConfig, HidBootProtocol, HidSubclass, HidWriter, State};
use embassy_usb::{Builder, Config as UsbConfig};
use kmbox_core::config::{DEVICE_RELEASE, MAX_POWER_MA, REENUMERATE_DISCONNECT_MS, REENUMERATE_SETTLE_MS};
use kmbox_core::passthrough::descriptor::MOUSE_REPORT_ID;
use kmbox_core::{EventSink, MouseReport, OutputError, OutputSink, ReportPump, StatusEvent};
use portable_atomic::{AtomicBool, Ordering};

use crate::shared::{self, StatusQueue, DEVICE, DEVICE_RESET, IDENTITY_CHANGED, REPORTS};
use crate::status::PortState;
use crate::{now_ms, Irqs};

/// Interrupt IN packet size. Covers the keyboard report plus its ID.
const MAX_PACKET: usize = 16;

/// A write still waiting for the endpoint by now is abandoned. The packet
/// is only handed to the endpoint once it is free, so an abandoned write
/// never reaches the host.
const SEND_TIMEOUT: Duration = Duration::from_millis(20);

type UsbDriver<'d> = Driver<'d, USB>;

static CONFIGURED: AtomicBool = AtomicBool::new(false);
static SUSPENDED: AtomicBool = AtomicBool::new(false);

/// Whether the host has configured the port and it is not suspended.
pub fn port_ready() -> bool {
    port_state() == PortState::Mounted
}

pub fn port_state() -> PortState {
    if !CONFIGURED.load(Ordering::Acquire) {
        PortState::NotMounted
    } else if SUSPENDED.load(Ordering::Acquire) {
        PortState::Suspended
    } else {
        PortState::Mounted
    }
}

/// Tracks configuration and bus suspend for [`port_ready`].
struct PortHandler;

impl embassy_usb::Handler for PortHandler {
    fn enabled(&mut self, enabled: bool) {
        if !enabled {
            CONFIGURED.store(false, Ordering::Release);
        }
    }

    fn reset(&mut self) {
        CONFIGURED.store(false, Ordering::Release);
        SUSPENDED.store(false, Ordering::Release);
    }

    fn configured(&mut self, configured: bool) {
        info!("downstream configured: {}", configured);
        CONFIGURED.store(configured, Ordering::Release);
        StatusQueue.emit(StatusEvent::StatusChanged);
    }

    fn suspended(&mut self, suspended: bool) {
        info!("downstream suspended: {}", suspended);
        SUSPENDED.store(suspended, Ordering::Release);
        StatusQueue.emit(StatusEvent::StatusChanged);
    }
}

/// USB HID mouse output on report ID 2.
pub struct UsbHidOutput<'d> {
    writer: HidWriter<'d, UsbDriver<'d>, MAX_PACKET>,
}

impl<'d> UsbHidOutput<'d> {
    pub fn new(writer: HidWriter<'d, UsbDriver<'d>, MAX_PACKET>) -> Self {
        Self { writer }
    }
}

impl OutputSink for UsbHidOutput<'_> {
    async fn send(&mut self, report: &MouseReport) -> Result<(), OutputError> {
        let mut packet = [0u8; 1 + MouseReport::LEN];
        packet[0] = MOUSE_REPORT_ID;
        packet[1..].copy_from_slice(&report.to_bytes());
        match with_timeout(SEND_TIMEOUT, self.writer.write(&packet)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(OutputError::Io),
            Err(_) => Err(OutputError::Busy),
        }
    }

    fn is_ready(&self) -> bool {
        port_ready()
    }
}

/// Configure the HID interface serving `report_descriptor`.
pub fn configure_usb_hid<'d>(
    builder: &mut Builder<'d, UsbDriver<'d>>,
    state: &'d mut State<'d>,
    report_descriptor: &'d [u8],
) -> HidWriter<'d, UsbDriver<'d>, MAX_PACKET> {
    let config = HidConfig {
        report_descriptor,
        request_handler: None,
        poll_ms: 1,
        max_packet_size: MAX_PACKET as u16,
        hid_subclass: HidSubclass::No,
        hid_boot_protocol: HidBootProtocol::None,
    };

    HidWriter::new(builder, state, config)
}

/// Run the downstream port forever, rebuilding it on every identity change
/// or device stack reset.
pub async fn run_port(mut usb: Peri<'static, USB>) -> ! {
    let mut settle = false;
    loop {
        let served = shared::served();
        info!(
            "serving {:#x}:{:#x} serial {=str} cloned={}",
            served.vid,
            served.pid,
            served.serial_or_fallback().as_str(),
            served.cloned
        );

        let driver = Driver::new(usb.reborrow(), Irqs);

        let mut usb_config = UsbConfig::new(served.vid, served.pid);
        usb_config.manufacturer = Some(served.manufacturer.as_str());
        usb_config.product = Some(served.product.as_str());
        usb_config.serial_number = served.serial.as_deref();
        usb_config.device_class = 0x00;
        usb_config.device_sub_class = 0x00;
        usb_config.device_protocol = 0x00;
        usb_config.composite_with_iads = false;
        usb_config.device_release = DEVICE_RELEASE;
        usb_config.supports_remote_wakeup = true;
        usb_config.max_power = MAX_POWER_MA;
        usb_config.max_packet_size_0 = 64;

        let mut config_descriptor = [0u8; 256];
        let mut bos_descriptor = [0u8; 256];
        let mut msos_descriptor = [0u8; 256];
        let mut control_buf = [0u8; 64];
        let mut handler = PortHandler;
        let mut state = State::new();

        let mut builder = Builder::new(
            driver,
            usb_config,
            &mut config_descriptor,
            &mut bos_descriptor,
            &mut msos_descriptor,
            &mut control_buf,
        );
        builder.handler(&mut handler);
        let writer = configure_usb_hid(&mut builder, &mut state, &served.report_descriptor);
        let mut device = builder.build();
        let mut pump = ReportPump::new(UsbHidOutput::new(writer));

        let pump_loop = async {
            if settle {
                Timer::after_millis(REENUMERATE_SETTLE_MS).await;
            }
            loop {
                let report = REPORTS.receive().await;
                let result = pump.send(&report).await;

                let mut side = DEVICE.lock().await;
                pump.record(result, now_ms(), &mut side.resets, &mut StatusQueue);
                if result.is_err() {
                    side.requeue(&report);
                }
            }
        };

        match select3(
            device.run(),
            pump_loop,
            select(IDENTITY_CHANGED.wait(), DEVICE_RESET.wait()),
        )
        .await
        {
            Either3::First(_) | Either3::Second(_) => {}
            Either3::Third(_) => info!("downstream re-enumerating"),
        }

        let stats = pump.stats();
        if stats.errors > 0 {
            warn!("downstream errors before rebuild: {}", stats.errors);
        }

        device.disable().await;
        CONFIGURED.store(false, Ordering::Release);
        SUSPENDED.store(false, Ordering::Release);
        Timer::after_millis(REENUMERATE_DISCONNECT_MS).await;
        settle = true;
    }
}
