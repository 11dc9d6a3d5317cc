#![no_std]
#![no_main]

use defmt::{info, warn};
use defmt_rtt as _;
use embassy_executor::Executor;
use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::multicore::{spawn_core1, Stack};
use embassy_rp::peripherals::USB;
use embassy_rp::uart::{Async, Config as UartConfig, Uart, UartTx};
use embassy_rp::watchdog::Watchdog;
use embassy_rp::Peri;
use embassy_sync::channel::TrySendError;
use embassy_time::{Duration, Ticker};
use kmbox::input::{AlignedRing, LinkRing};
use kmbox::shared::{
    transmit, StatusQueue, DEVICE, DEVICE_RESET, HEARTBEATS, HOST_RESET, REPORTS, STATUS, TX_PIPE,
    UPSTREAM,
};
use kmbox::{
    now_ms, port_ready, port_state, run_host, run_port, CommandLink, DetachedPort, Irqs, RpWatchdog,
    SerialError, StatusLed,
};
use kmbox_core::config::{
    BUTTON_DEBOUNCE_MS, DEVICE_POLL_MS, VISUAL_INTERVAL_MS, WATCHDOG_TASK_INTERVAL_MS,
};
use kmbox_core::{CoreId, EventSink, LivenessSupervisor, StatusEvent, Verdict};
use static_cell::StaticCell;

#[cfg(feature = "serial-irq")]
use kmbox::input::ByteIngest;
#[cfg(not(feature = "link-250k"))]
use kmbox_core::config::LINK_BAUD;
#[cfg(feature = "link-250k")]
use kmbox_core::config::LINK_BAUD_ALT;
#[cfg(not(feature = "serial-irq"))]
use kmbox::input::DmaIngest;

#[cfg(feature = "dev-panic")]
use panic_probe as _;
#[cfg(feature = "prod-panic")]
use panic_reset as _;

/// Interval between statistics log lines (ms).
const STATS_INTERVAL_MS: u32 = 10_000;

/// Command link polling interval (ms).
const SERIAL_POLL_MS: u64 = 1;

static mut CORE1_STACK: Stack<16384> = Stack::new();
static EXECUTOR0: StaticCell<Executor> = StaticCell::new();
static EXECUTOR1: StaticCell<Executor> = StaticCell::new();

/// Serial ingest ring.
static RING: StaticCell<AlignedRing> = StaticCell::new();

#[cortex_m_rt::entry]
fn main() -> ! {
    info!("KMBox starting...");

    let p = embassy_rp::init(embassy_rp::config::Config::default());

    // --- Core 1: upstream passthrough ---
    spawn_core1(
        p.CORE1,
        // SAFETY: the stack is handed to core 1 exactly once, here.
        unsafe { &mut *core::ptr::addr_of_mut!(CORE1_STACK) },
        move || {
            let executor1 = EXECUTOR1.init(Executor::new());
            executor1.run(|spawner| spawner.spawn(host_task().unwrap()))
        },
    );

    // --- Command link ---
    let mut uart_config = UartConfig::default();
    #[cfg(not(feature = "link-250k"))]
    let uart = {
        uart_config.baudrate = LINK_BAUD;
        Uart::new(p.UART1, p.PIN_8, p.PIN_9, Irqs, p.DMA_CH0, p.DMA_CH1, uart_config)
    };
    #[cfg(feature = "link-250k")]
    let uart = {
        uart_config.baudrate = LINK_BAUD_ALT;
        Uart::new(p.UART1, p.PIN_4, p.PIN_5, Irqs, p.DMA_CH0, p.DMA_CH1, uart_config)
    };
    let (tx, rx) = uart.split();

    let ring = RING.init(AlignedRing(LinkRing::new()));
    let (writer, reader) = ring.0.split();

    #[cfg(not(feature = "serial-irq"))]
    let link = CommandLink::new(reader, defmt::unwrap!(DmaIngest::new(rx, p.DMA_CH2, writer)));
    #[cfg(feature = "serial-irq")]
    let (link, ingest) = (CommandLink::new(reader), ByteIngest::new(rx, writer));

    // --- Board I/O ---
    let led = Output::new(p.PIN_25, Level::Low);
    let button = Input::new(p.PIN_15, Pull::Up);
    let watchdog = Watchdog::new(p.WATCHDOG);
    let usb = p.USB;

    // --- Core 0: device side ---
    let executor0 = EXECUTOR0.init(Executor::new());
    executor0.run(move |spawner| {
        spawner.spawn(watchdog_task(watchdog).unwrap());
        spawner.spawn(usb_task(usb).unwrap());
        spawner.spawn(device_task().unwrap());
        spawner.spawn(serial_task(link).unwrap());
        #[cfg(feature = "serial-irq")]
        spawner.spawn(ingest_task(ingest).unwrap());
        spawner.spawn(tx_task(tx).unwrap());
        spawner.spawn(status_task(led).unwrap());
        spawner.spawn(button_task(button).unwrap());
        info!("KMBox initialized");
    })
}

/// USB device task - serves the downstream port.
#[embassy_executor::task]
async fn usb_task(usb: Peri<'static, USB>) {
    run_port(usb).await
}

/// Device task - drains upstream events, ticks the virtual mouse, and
/// queues the next downstream report while the port can take it.
#[embassy_executor::task]
async fn device_task() {
    let mut ticker = Ticker::every(Duration::from_millis(DEVICE_POLL_MS));
    let mut last_stats = 0u32;
    loop {
        ticker.next().await;
        let now = now_ms();
        HEARTBEATS.beat(CoreId::Device, now);

        let mut side = DEVICE.lock().await;
        while let Ok(event) = UPSTREAM.try_receive() {
            side.apply_upstream(event, now, &mut StatusQueue);
        }
        side.resets.set_device_connected(port_ready());

        let button_event = side.supervise(now);
        if port_ready() {
            if let Err(TrySendError::Full(report)) = REPORTS.try_send(side.take_report()) {
                side.requeue(&report);
            }
        }

        if let Some(target) = side.resets.take_pending() {
            info!("resetting {} stack", target);
            if target.includes_device() {
                DEVICE_RESET.signal(());
            }
            if target.includes_host() {
                side.clear_upstream();
                HOST_RESET.signal(());
            }
            side.resets.complete(target, true, now, &mut StatusQueue);
        }

        if now.wrapping_sub(last_stats) >= STATS_INTERVAL_MS {
            last_stats = now;
            info!("shell {} resets {}", side.shell.stats(), side.resets.stats());
        }
        drop(side);

        if let Some(event) = button_event {
            transmit(&event);
        }
    }
}

/// Serial task - feeds received bytes through the command shell.
#[embassy_executor::task]
async fn serial_task(mut link: CommandLink) {
    let mut ticker = Ticker::every(Duration::from_millis(SERIAL_POLL_MS));
    let mut last_stats = 0u32;
    loop {
        ticker.next().await;
        let now = now_ms();
        let bytes = link.receive();

        let mut side = DEVICE.lock().await;
        if !bytes.is_empty() {
            side.handle_serial(bytes, now, &mut StatusQueue, transmit);
        }
        if let Some(response) = side.poll_serial(now) {
            StatusQueue.emit(StatusEvent::ActivityFlash);
            transmit(&response);
        }
        drop(side);

        if now.wrapping_sub(last_stats) >= STATS_INTERVAL_MS {
            last_stats = now;
            info!("link {}", link.stats());
        }
    }
}

/// Ingest task - per-byte receive into the ring.
#[cfg(feature = "serial-irq")]
#[embassy_executor::task]
async fn ingest_task(mut ingest: ByteIngest) {
    ingest.run().await
}

/// TX task - drains queued responses onto the command link.
#[embassy_executor::task]
async fn tx_task(mut tx: UartTx<'static, Async>) {
    let mut buf = [0u8; 64];
    loop {
        let n = TX_PIPE.read(&mut buf).await;
        if let Err(e) = tx.write(&buf[..n]).await {
            warn!("link write failed: {}", SerialError::from(e));
        }
    }
}

/// Status task - renders the LED from port state and status events.
#[embassy_executor::task]
async fn status_task(led: Output<'static>) {
    let mut led = StatusLed::new(led);
    let mut ticker = Ticker::every(Duration::from_millis(VISUAL_INTERVAL_MS));
    loop {
        ticker.next().await;
        let now = now_ms();
        while let Ok(event) = STATUS.try_receive() {
            led.on_event(event, now);
        }
        led.render(now, port_state());
    }
}

/// Button task - samples the active-low board button.
#[embassy_executor::task]
async fn button_task(button: Input<'static>) {
    let mut ticker = Ticker::every(Duration::from_millis(u64::from(BUTTON_DEBOUNCE_MS)));
    loop {
        ticker.next().await;
        let pressed = button.is_low();
        let mut side = DEVICE.lock().await;
        if let Some(Err(e)) = side.sample_button(pressed, now_ms(), &mut StatusQueue) {
            warn!("board reset refused: {}", e);
        }
    }
}

/// Watchdog task - feeds the hardware watchdog only while both cores beat.
#[embassy_executor::task]
async fn watchdog_task(watchdog: Watchdog) {
    let mut hw = RpWatchdog::new(watchdog);
    let mut supervisor = LivenessSupervisor::start(&mut hw, now_ms());
    let mut ticker = Ticker::every(Duration::from_millis(WATCHDOG_TASK_INTERVAL_MS));
    loop {
        ticker.next().await;
        if supervisor.tick(now_ms(), &HEARTBEATS, &mut hw) == Verdict::Reset {
            loop {
                cortex_m::asm::nop();
            }
        }
    }
}

/// Host task (core 1) - owns the upstream port and runs the passthrough.
#[embassy_executor::task]
async fn host_task() {
    let mut port = DetachedPort;
    run_host(&mut port).await
}
