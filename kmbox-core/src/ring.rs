//! Serial ingest ring.
//!
//! A power-of-two byte ring with exactly one writer and one reader. The
//! writer is either a per-byte receive path ([`RingWriter::push`]) or a DMA
//! channel whose write address wraps on the ring size in hardware; in that
//! case the writer only publishes the hardware index
//! ([`RingWriter::commit_dma_index`]).
//!
//! `head` is stored only by the writer and `tail` only by the reader. Each
//! side reads the other's index with `Acquire` and publishes its own with
//! `Release`, so no lock is taken between them.

use core::cell::UnsafeCell;

use kmbox_proto::Terminator;
use portable_atomic::{AtomicU32, AtomicUsize, Ordering};

/// Error type for ring writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RingError {
    /// Unread bytes would reach `size - 1`; `dropped` bytes were discarded.
    Overflow { dropped: usize },
}

/// Counters for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RingStats {
    /// Bytes accepted into the ring.
    pub received: u32,
    /// Bytes lost to overflow.
    pub errors: u32,
    /// Bytes waiting for the reader.
    pub available: usize,
}

/// A complete line taken from the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RingLine {
    /// Bytes copied into the caller's buffer (possibly truncated).
    pub len: usize,
    /// Terminator that ended the line.
    pub terminator: Terminator,
}

/// Byte storage plus the two indices.
///
/// `repr(C)` keeps the buffer at offset zero so a wrapper with
/// `#[repr(align(N))]` aligns the buffer itself, as DMA ring wrapping needs.
#[repr(C)]
pub struct SerialRing<const N: usize> {
    buf: UnsafeCell<[u8; N]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    received: AtomicU32,
    errors: AtomicU32,
}

// SAFETY: the buffer is only reached through the split halves. The writer
// touches bytes at or after `head`, the reader bytes in `tail..head`, and
// the index protocol keeps those regions disjoint.
unsafe impl<const N: usize> Sync for SerialRing<N> {}

impl<const N: usize> SerialRing<N> {
    const MASK: usize = N - 1;

    /// Create an empty ring.
    ///
    /// # Panics
    ///
    /// If `N` is not a power of two or is smaller than 512.
    #[must_use]
    pub const fn new() -> Self {
        assert!(
            N.is_power_of_two() && N >= 512,
            "serial ring size must be a power of two >= 512"
        );
        Self {
            buf: UnsafeCell::new([0; N]),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            received: AtomicU32::new(0),
            errors: AtomicU32::new(0),
        }
    }

    /// Split into the single writer and single reader.
    pub fn split(&mut self) -> (RingWriter<'_, N>, RingReader<'_, N>) {
        let ring: &Self = self;
        (RingWriter { ring }, RingReader { ring })
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> RingStats {
        RingStats {
            received: self.received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            available: self.unread(),
        }
    }

    #[inline]
    fn unread(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) & Self::MASK
    }

    #[inline]
    fn byte_at(&self, index: usize) -> u8 {
        // SAFETY: index is masked into bounds and lies in the reader's region.
        unsafe { (*self.buf.get())[index & Self::MASK] }
    }
}

impl<const N: usize> Default for SerialRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The producing half.
pub struct RingWriter<'a, const N: usize> {
    ring: &'a SerialRing<N>,
}

impl<const N: usize> RingWriter<'_, N> {
    /// Largest number of unread bytes the writer will leave in the ring.
    pub const HIGH_WATER: usize = N - 2;

    /// Append bytes from the per-byte receive path.
    ///
    /// Returns the number of bytes stored. Bytes that do not fit are
    /// counted as errors and the call reports [`RingError::Overflow`].
    pub fn push(&mut self, bytes: &[u8]) -> Result<usize, RingError> {
        let mut head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);
        let room = Self::HIGH_WATER - (head.wrapping_sub(tail) & SerialRing::<N>::MASK);
        let take = bytes.len().min(room);

        for &b in &bytes[..take] {
            // SAFETY: `head` is outside the reader's region while room remains.
            unsafe { (*self.ring.buf.get())[head] = b };
            head = (head + 1) & SerialRing::<N>::MASK;
        }
        if take > 0 {
            self.ring.head.store(head, Ordering::Release);
            self.ring.received.fetch_add(take as u32, Ordering::Relaxed);
        }

        let dropped = bytes.len() - take;
        if dropped > 0 {
            self.ring.errors.fetch_add(dropped as u32, Ordering::Relaxed);
            return Err(RingError::Overflow { dropped });
        }
        Ok(take)
    }

    /// Start address and length of the storage, for programming a DMA channel.
    #[must_use]
    pub fn dma_target(&self) -> (*mut u8, usize) {
        (self.ring.buf.get().cast::<u8>(), N)
    }

    /// Publish the index a DMA channel has written up to.
    ///
    /// `index` is the hardware write address minus the buffer start, modulo
    /// `N`. An unchanged index never advances `head`. If accepting the new
    /// bytes would leave `size - 1` or more unread, nothing is accepted,
    /// the bytes are counted as errors, and the caller must stop the DMA
    /// and re-arm it at [`Self::head_index`] once the reader has drained.
    pub fn commit_dma_index(&mut self, index: usize) -> Result<usize, RingError> {
        let index = index & SerialRing::<N>::MASK;
        let head = self.ring.head.load(Ordering::Relaxed);
        let tail = self.ring.tail.load(Ordering::Acquire);

        let advanced = index.wrapping_sub(head) & SerialRing::<N>::MASK;
        if advanced == 0 {
            return Ok(0);
        }

        let unread = index.wrapping_sub(tail) & SerialRing::<N>::MASK;
        let was_unread = head.wrapping_sub(tail) & SerialRing::<N>::MASK;
        if unread > Self::HIGH_WATER || unread < was_unread {
            self.ring.errors.fetch_add(advanced as u32, Ordering::Relaxed);
            return Err(RingError::Overflow { dropped: advanced });
        }

        self.ring.head.store(index, Ordering::Release);
        self.ring.received.fetch_add(advanced as u32, Ordering::Relaxed);
        Ok(advanced)
    }

    /// Current write index.
    #[must_use]
    pub fn head_index(&self) -> usize {
        self.ring.head.load(Ordering::Relaxed)
    }

    /// Free space before the high-water mark.
    #[must_use]
    pub fn free(&self) -> usize {
        Self::HIGH_WATER - self.ring.unread()
    }
}

/// The consuming half.
pub struct RingReader<'a, const N: usize> {
    ring: &'a SerialRing<N>,
}

impl<const N: usize> RingReader<'_, N> {
    /// Bytes available to read.
    #[inline]
    #[must_use]
    pub fn available(&self) -> usize {
        self.ring.unread()
    }

    /// Counters of the underlying ring.
    #[must_use]
    pub fn stats(&self) -> RingStats {
        self.ring.stats()
    }

    /// Copy up to `buf.len()` bytes without line semantics.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> usize {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let n = self.available().min(buf.len());
        for (i, slot) in buf[..n].iter_mut().enumerate() {
            *slot = self.ring.byte_at(tail + i);
        }
        if n > 0 {
            self.ring
                .tail
                .store((tail + n) & SerialRing::<N>::MASK, Ordering::Release);
        }
        n
    }

    /// Take the next complete line.
    ///
    /// Scans from `tail` toward `head` for the first CR or LF. A CR directly
    /// followed by LF is consumed as one CRLF terminator. A CR that is the
    /// last byte received may still be followed by its LF, so the line is
    /// held back; call [`Self::flush_line`] once the link has been idle for
    /// the lookahead window. Lines longer than `buf` are truncated silently.
    /// Returns `None`, consuming nothing, when no complete line is available.
    pub fn read_line(&mut self, buf: &mut [u8]) -> Option<RingLine> {
        self.take_line(buf, false)
    }

    /// Like [`Self::read_line`], but a trailing CR ends the line.
    pub fn flush_line(&mut self, buf: &mut [u8]) -> Option<RingLine> {
        self.take_line(buf, true)
    }

    fn take_line(&mut self, buf: &mut [u8], idle: bool) -> Option<RingLine> {
        let tail = self.ring.tail.load(Ordering::Relaxed);
        let available = self.available();

        let offset = (0..available).find(|&i| matches!(self.ring.byte_at(tail + i), b'\r' | b'\n'))?;

        let terminator = match self.ring.byte_at(tail + offset) {
            b'\r' if offset + 1 == available && !idle => return None,
            b'\r' if offset + 1 < available && self.ring.byte_at(tail + offset + 1) == b'\n' => {
                Terminator::CrLf
            }
            b'\r' => Terminator::Cr,
            _ => Terminator::Lf,
        };

        let len = offset.min(buf.len());
        for (i, slot) in buf[..len].iter_mut().enumerate() {
            *slot = self.ring.byte_at(tail + i);
        }

        let consumed = offset + terminator.len();
        self.ring
            .tail
            .store((tail + consumed) & SerialRing::<N>::MASK, Ordering::Release);
        Some(RingLine { len, terminator })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_line_terminators() {
        let mut ring = SerialRing::<512>::new();
        let (mut w, mut r) = ring.split();
        w.push(b"km.left(1)\r\nkm.right(0)\nm(1,2)\r").unwrap();

        let mut buf = [0u8; 64];
        let line = r.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..line.len], b"km.left(1)");
        assert_eq!(line.terminator, Terminator::CrLf);

        let line = r.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..line.len], b"km.right(0)");
        assert_eq!(line.terminator, Terminator::Lf);

        // Trailing CR waits for a possible LF.
        assert!(r.read_line(&mut buf).is_none());
        assert_eq!(r.available(), 7);

        let line = r.flush_line(&mut buf).unwrap();
        assert_eq!(&buf[..line.len], b"m(1,2)");
        assert_eq!(line.terminator, Terminator::Cr);

        assert_eq!(r.available(), 0);
        assert!(r.read_line(&mut buf).is_none());
    }

    #[test]
    fn test_crlf_split_across_writes() {
        let mut ring = SerialRing::<512>::new();
        let (mut w, mut r) = ring.split();
        let mut buf = [0u8; 64];

        w.push(b"km.left(1)\r").unwrap();
        assert!(r.read_line(&mut buf).is_none());

        w.push(b"\nkm.left(0)\rkm").unwrap();
        let line = r.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..line.len], b"km.left(1)");
        assert_eq!(line.terminator, Terminator::CrLf);

        // A CR followed by anything but LF completes immediately.
        let line = r.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..line.len], b"km.left(0)");
        assert_eq!(line.terminator, Terminator::Cr);
        assert_eq!(r.available(), 2);
    }

    #[test]
    fn test_partial_line_not_consumed() {
        let mut ring = SerialRing::<512>::new();
        let (mut w, mut r) = ring.split();
        w.push(b"km.lef").unwrap();

        let mut buf = [0u8; 64];
        assert!(r.read_line(&mut buf).is_none());
        assert_eq!(r.available(), 6);

        w.push(b"t(1)\n").unwrap();
        let line = r.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..line.len], b"km.left(1)");
    }

    #[test]
    fn test_long_line_truncated() {
        let mut ring = SerialRing::<512>::new();
        let (mut w, mut r) = ring.split();
        w.push(b"0123456789\nok\n").unwrap();

        let mut buf = [0u8; 4];
        let line = r.read_line(&mut buf).unwrap();
        assert_eq!(line.len, 4);
        assert_eq!(&buf, b"0123");

        let line = r.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..line.len], b"ok");
    }

    #[test]
    fn test_read_chunk_wraps() {
        let mut ring = SerialRing::<512>::new();
        let (mut w, mut r) = ring.split();
        let mut sink = [0u8; 500];

        w.push(&[0xAA; 500]).unwrap();
        assert_eq!(r.read_chunk(&mut sink), 500);

        let data: [u8; 40] = core::array::from_fn(|i| i as u8);
        w.push(&data).unwrap();
        let mut out = [0u8; 64];
        assert_eq!(r.read_chunk(&mut out), 40);
        assert_eq!(&out[..40], &data);
    }

    #[test]
    fn test_push_overflow_counts_errors() {
        let mut ring = SerialRing::<512>::new();
        {
            let (mut w, _r) = ring.split();
            assert_eq!(w.push(&[1; 500]), Ok(500));
            assert_eq!(w.free(), 10);
            assert_eq!(w.push(&[1; 20]), Err(RingError::Overflow { dropped: 10 }));
        }
        let stats = ring.stats();
        assert_eq!(stats.received, 510);
        assert_eq!(stats.errors, 10);
        assert_eq!(stats.available, 510);
    }

    #[test]
    fn test_zero_length_never_advances() {
        let mut ring = SerialRing::<512>::new();
        let (mut w, r) = ring.split();
        assert_eq!(w.push(&[]), Ok(0));
        assert_eq!(w.commit_dma_index(0), Ok(0));
        assert_eq!(w.head_index(), 0);
        assert_eq!(r.available(), 0);
    }

    #[test]
    fn test_dma_commit_and_read() {
        let mut ring = SerialRing::<512>::new();
        let (mut w, mut r) = ring.split();

        // Simulate the DMA engine writing into the storage.
        let (ptr, len) = w.dma_target();
        assert_eq!(len, 512);
        for (i, &b) in b"km.move(1, 2)\n".iter().enumerate() {
            // SAFETY: test writes within bounds, like the DMA engine would.
            unsafe { ptr.add(i).write(b) };
        }
        assert_eq!(w.commit_dma_index(14), Ok(14));

        let mut buf = [0u8; 64];
        let line = r.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..line.len], b"km.move(1, 2)");
    }

    #[test]
    fn test_dma_commit_wraps_modulo_size() {
        let mut ring = SerialRing::<512>::new();
        let (mut w, mut r) = ring.split();
        let mut sink = [0u8; 512];

        assert_eq!(w.commit_dma_index(400), Ok(400));
        assert_eq!(r.read_chunk(&mut sink), 400);
        // Hardware index wrapped past the end.
        assert_eq!(w.commit_dma_index(512 + 10), Ok(122));
        assert_eq!(r.available(), 122);
    }

    #[test]
    fn test_dma_overflow_rejected() {
        let mut ring = SerialRing::<512>::new();
        let (mut w, r) = ring.split();
        assert_eq!(w.commit_dma_index(510), Ok(510));
        assert_eq!(
            w.commit_dma_index(511),
            Err(RingError::Overflow { dropped: 1 })
        );
        assert_eq!(w.head_index(), 510);
        assert_eq!(r.available(), 510);
        assert_eq!(r.stats().errors, 1);
        assert_eq!(r.stats().received, 510);
    }

    #[test]
    #[should_panic]
    fn test_non_power_of_two_panics() {
        let _ring = SerialRing::<600>::new();
    }
}
