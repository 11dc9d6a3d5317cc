pub mod usb_hid;

pub use usb_hid::{configure_usb_hid, port_ready, port_state, run_port, UsbHidOutput};
