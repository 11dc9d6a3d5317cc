//! Command link UART: ring ingest on the receive side.

#[cfg(not(feature = "serial-irq"))]
use core::sync::atomic::{compiler_fence, Ordering};

use defmt::{warn, Format};
use embassy_rp::uart::{Async, Error as UartError, UartRx};
use kmbox_core::config::SERIAL_RING_SIZE;
use kmbox_core::{RingError, RingReader, RingStats, RingWriter, SerialRing};

#[cfg(not(feature = "serial-irq"))]
use embassy_rp::pac;
#[cfg(not(feature = "serial-irq"))]
use embassy_rp::peripherals::DMA_CH2;
#[cfg(not(feature = "serial-irq"))]
use embassy_rp::Peri;

pub type LinkRing = SerialRing<SERIAL_RING_SIZE>;

/// Ring storage aligned to its own size, so the DMA write address can wrap
/// on it in hardware.
#[repr(C, align(2048))]
pub struct AlignedRing(pub LinkRing);

const _: () = assert!(core::mem::align_of::<AlignedRing>() == SERIAL_RING_SIZE);

/// Bytes handed to the shell per poll.
pub const CHUNK_SIZE: usize = 128;

/// Error type for the command link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum SerialError {
    /// Ring storage is not aligned for DMA ring wrapping.
    Misaligned,
    /// Receive FIFO overrun or ring overflow.
    Overrun,
    /// Line break detected.
    Break,
    /// UART framing error.
    Framing,
    /// UART parity error.
    Parity,
    /// UART error not listed above.
    Unknown,
}

impl From<UartError> for SerialError {
    fn from(e: UartError) -> Self {
        match e {
            UartError::Overrun => SerialError::Overrun,
            UartError::Break => SerialError::Break,
            UartError::Parity => SerialError::Parity,
            UartError::Framing => SerialError::Framing,
            _ => SerialError::Unknown,
        }
    }
}

impl From<RingError> for SerialError {
    fn from(_: RingError) -> Self {
        SerialError::Overrun
    }
}

/// DMA channel used for ring ingest.
#[cfg(not(feature = "serial-irq"))]
const DMA_CHANNEL: usize = 2;

/// DREQ for UART1 RX.
#[cfg(not(feature = "serial-irq"))]
const TREQ_UART1_RX: u8 = 23;

/// Free space the reader must make before a stalled DMA channel restarts.
#[cfg(not(feature = "serial-irq"))]
const RESUME_FREE: usize = SERIAL_RING_SIZE / 2;

/// UART1 RX DMA writing straight into the ring.
///
/// The channel runs in write-ring mode with an effectively endless transfer
/// count. [`DmaIngest::poll`] publishes the hardware write index. On
/// overflow the channel is stopped and restarted at the ring head once the
/// reader has drained.
#[cfg(not(feature = "serial-irq"))]
pub struct DmaIngest {
    // Held so the async RX half and channel stay claimed.
    _rx: UartRx<'static, Async>,
    _channel: Peri<'static, DMA_CH2>,
    writer: RingWriter<'static, SERIAL_RING_SIZE>,
    base: u32,
    stalled: bool,
}

#[cfg(not(feature = "serial-irq"))]
impl DmaIngest {
    pub fn new(
        rx: UartRx<'static, Async>,
        channel: Peri<'static, DMA_CH2>,
        writer: RingWriter<'static, SERIAL_RING_SIZE>,
    ) -> Result<Self, SerialError> {
        let (ptr, len) = writer.dma_target();
        let base = ptr as u32;
        if base % len as u32 != 0 {
            return Err(SerialError::Misaligned);
        }

        pac::UART1.uartdmacr().modify(|w| w.set_rxdmae(true));

        let mut ingest = Self {
            _rx: rx,
            _channel: channel,
            writer,
            base,
            stalled: false,
        };
        ingest.arm(0);
        Ok(ingest)
    }

    fn arm(&mut self, index: usize) {
        let ch = pac::DMA.ch(DMA_CHANNEL);
        ch.read_addr().write_value(pac::UART1.uartdr().as_ptr() as u32);
        ch.write_addr().write_value(self.base + index as u32);
        ch.trans_count().write_value(u32::MAX);
        compiler_fence(Ordering::SeqCst);
        ch.ctrl_trig().write(|w| {
            w.set_treq_sel(pac::dma::vals::TreqSel::from_bits(TREQ_UART1_RX));
            w.set_data_size(pac::dma::vals::DataSize::SIZE_BYTE);
            w.set_incr_read(false);
            w.set_incr_write(true);
            w.set_ring_sel(true);
            w.set_ring_size(SERIAL_RING_SIZE.trailing_zeros() as u8);
            w.set_chain_to(DMA_CHANNEL as u8);
            w.set_irq_quiet(true);
            w.set_en(true);
        });
        compiler_fence(Ordering::SeqCst);
    }

    fn stop(&mut self) {
        let ch = pac::DMA.ch(DMA_CHANNEL);
        pac::DMA.chan_abort().modify(|m| m.set_chan_abort(1 << DMA_CHANNEL));
        while ch.ctrl_trig().read().busy() {}
        compiler_fence(Ordering::SeqCst);
    }

    /// Publish bytes written since the last poll.
    pub fn poll(&mut self) -> Result<usize, SerialError> {
        if self.stalled {
            if self.writer.free() >= RESUME_FREE {
                let head = self.writer.head_index();
                self.arm(head);
                self.stalled = false;
            }
            return Ok(0);
        }

        let ch = pac::DMA.ch(DMA_CHANNEL);
        let index = ch.write_addr().read().wrapping_sub(self.base) as usize;
        match self.writer.commit_dma_index(index) {
            Ok(n) => {
                if !ch.ctrl_trig().read().busy() {
                    // Transfer count exhausted; continue from where it stopped.
                    self.arm(self.writer.head_index());
                }
                Ok(n)
            }
            Err(e) => {
                warn!("serial ring overflow: {}", e);
                self.stop();
                self.stalled = true;
                Err(e.into())
            }
        }
    }
}

/// Per-byte async receive feeding the ring.
#[cfg(feature = "serial-irq")]
pub struct ByteIngest {
    rx: UartRx<'static, Async>,
    writer: RingWriter<'static, SERIAL_RING_SIZE>,
}

#[cfg(feature = "serial-irq")]
impl ByteIngest {
    pub fn new(rx: UartRx<'static, Async>, writer: RingWriter<'static, SERIAL_RING_SIZE>) -> Self {
        Self { rx, writer }
    }

    /// Receive one byte into the ring.
    pub async fn receive(&mut self) -> Result<(), SerialError> {
        let mut byte = [0u8; 1];
        self.rx.read(&mut byte).await?;
        self.writer.push(&byte)?;
        Ok(())
    }

    /// Receive forever.
    pub async fn run(&mut self) -> ! {
        loop {
            if let Err(e) = self.receive().await {
                warn!("serial receive error: {}", e);
            }
        }
    }
}

/// Command link counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Format)]
pub struct LinkStats {
    /// Ring counters; `errors` holds the bytes lost to overflow.
    pub ring: RingStats,
    /// Times the DMA channel was stopped on overflow.
    pub overruns: u32,
}

/// Reading side of the command link.
pub struct CommandLink {
    reader: RingReader<'static, SERIAL_RING_SIZE>,
    #[cfg(not(feature = "serial-irq"))]
    dma: DmaIngest,
    chunk: [u8; CHUNK_SIZE],
    overruns: u32,
}

impl CommandLink {
    #[cfg(not(feature = "serial-irq"))]
    pub fn new(reader: RingReader<'static, SERIAL_RING_SIZE>, dma: DmaIngest) -> Self {
        Self {
            reader,
            dma,
            chunk: [0; CHUNK_SIZE],
            overruns: 0,
        }
    }

    #[cfg(feature = "serial-irq")]
    pub fn new(reader: RingReader<'static, SERIAL_RING_SIZE>) -> Self {
        Self {
            reader,
            chunk: [0; CHUNK_SIZE],
            overruns: 0,
        }
    }

    /// Bytes received since the last call, oldest first.
    pub fn receive(&mut self) -> &[u8] {
        #[cfg(not(feature = "serial-irq"))]
        if self.dma.poll().is_err() {
            self.overruns += 1;
        }
        let n = self.reader.read_chunk(&mut self.chunk);
        &self.chunk[..n]
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            ring: self.reader.stats(),
            overruns: self.overruns,
        }
    }
}
