//! Upstream intake on core 1.
//!
//! [`run_host`] owns the upstream [`UsbHostDriver`]: it is the only
//! consumer of the driver's events and the only issuer of its commands.
//! Decoded traffic goes to core 0 over [`UPSTREAM`]; new downstream
//! descriptors are published for the USB task.

use defmt::{info, trace, warn};
use embassy_futures::select::{select3, Either3};
use embassy_time::Timer;
use kmbox_core::{CoreId, DriverCommand, HostBridge, HostEvent, UsbHostDriver};

use crate::now_ms;
use crate::shared::{self, StatusQueue, HEARTBEATS, HOST_RESET, UPSTREAM};

/// Core 1 beats at least this often while the upstream port is idle (ms).
pub const HOST_IDLE_BEAT_MS: u64 = 1_000;

/// Driver for a board with no upstream transport wired.
///
/// Never reports a device, so the downstream port keeps its default
/// identity. Commands are accepted and dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedPort;

impl UsbHostDriver for DetachedPort {
    async fn next_event(&mut self) -> HostEvent {
        core::future::pending().await
    }

    fn execute(&mut self, command: DriverCommand) {
        trace!("no upstream port for {}", command);
    }
}

/// Run the upstream side forever.
pub async fn run_host<D: UsbHostDriver>(driver: &mut D) -> ! {
    let mut bridge = HostBridge::new();
    let mut rejected = 0;
    info!("upstream passthrough ready");
    loop {
        HEARTBEATS.beat(CoreId::Host, now_ms());
        let output = match select3(
            driver.next_event(),
            HOST_RESET.wait(),
            Timer::after_millis(HOST_IDLE_BEAT_MS),
        )
        .await
        {
            Either3::First(event) => bridge.process(event, &mut StatusQueue),
            Either3::Second(()) => bridge.reset(),
            Either3::Third(()) => continue,
        };

        if output.reenumerate {
            shared::publish_served(bridge.served().clone());
        }
        bridge.dispatch(driver);
        if bridge.rejected_commands() != rejected {
            rejected = bridge.rejected_commands();
            warn!("driver commands dropped: {}", rejected);
        }
        if let Some(event) = output.event {
            UPSTREAM.send(event).await;
        }
    }
}
