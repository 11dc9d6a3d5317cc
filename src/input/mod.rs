pub mod uart;
pub mod upstream;

#[cfg(feature = "serial-irq")]
pub use uart::ByteIngest;
#[cfg(not(feature = "serial-irq"))]
pub use uart::DmaIngest;
pub use uart::{AlignedRing, CommandLink, LinkRing, LinkStats, SerialError};
pub use upstream::{run_host, DetachedPort};
