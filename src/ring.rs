// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Single-producer single-consumer ring of length-prefixed byte messages,
// laid out inside a shared memory region.
//
// Positions are free-running byte counters; a message is a native-endian
// u32 length followed by the payload and may wrap around the end of the
// data area. A message becomes visible to the reader only once the writer
// publishes the new write position, so reads are always whole messages.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cache-line-padded header stored in front of the data area.
#[repr(C)]
struct Header {
    write_pos: AtomicU64,
    _pad0: [u8; 64 - 8],
    read_pos: AtomicU64,
    _pad1: [u8; 64 - 8],
}

const _: () = assert!(std::mem::size_of::<Header>() == 128);

const LEN_PREFIX: usize = std::mem::size_of::<u32>();

/// Outcome of [`ByteRing::read`] when a message does not fit the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Oversized(pub usize);

/// View of a ring living in memory owned by someone else (a shm mapping).
pub(crate) struct ByteRing {
    base: *mut u8,
    capacity: usize,
}

// Safety: the producer and consumer each touch only their own index and
// synchronise the data area through acquire/release on the positions.
unsafe impl Send for ByteRing {}
unsafe impl Sync for ByteRing {}

impl ByteRing {
    /// Bytes of shared memory needed for a ring with `capacity` data bytes.
    pub(crate) const fn footprint(capacity: usize) -> usize {
        let total = std::mem::size_of::<Header>() + capacity;
        (total + 63) & !63
    }

    /// # Safety
    /// `base` must be 64-byte aligned, point to at least
    /// `footprint(capacity)` bytes, and outlive the returned view.
    pub(crate) unsafe fn from_raw(base: *mut u8, capacity: usize) -> Self {
        Self { base, capacity }
    }

    fn hdr(&self) -> &Header {
        unsafe { &*(self.base as *const Header) }
    }

    fn data(&self) -> *mut u8 {
        unsafe { self.base.add(std::mem::size_of::<Header>()) }
    }

    fn copy_in(&self, pos: u64, src: &[u8]) {
        let start = (pos % self.capacity as u64) as usize;
        let first = src.len().min(self.capacity - start);
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.data().add(start), first);
            std::ptr::copy_nonoverlapping(src.as_ptr().add(first), self.data(), src.len() - first);
        }
    }

    fn copy_out(&self, pos: u64, dst: &mut [u8]) {
        let start = (pos % self.capacity as u64) as usize;
        let first = dst.len().min(self.capacity - start);
        unsafe {
            std::ptr::copy_nonoverlapping(self.data().add(start), dst.as_mut_ptr(), first);
            std::ptr::copy_nonoverlapping(self.data(), dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }

    // --- Producer API (single writer) ---

    /// Append one message. Returns `false` if the ring lacks room for it.
    pub(crate) fn write(&self, msg: &[u8]) -> bool {
        let hdr = self.hdr();
        let w = hdr.write_pos.load(Ordering::Relaxed);
        let r = hdr.read_pos.load(Ordering::Acquire);
        let used = w.wrapping_sub(r) as usize;
        let need = LEN_PREFIX + msg.len();
        if used > self.capacity || need > self.capacity - used {
            return false;
        }
        self.copy_in(w, &(msg.len() as u32).to_ne_bytes());
        self.copy_in(w.wrapping_add(LEN_PREFIX as u64), msg);
        hdr.write_pos.store(w.wrapping_add(need as u64), Ordering::Release);
        true
    }

    // --- Consumer API (single reader) ---

    /// Pop the next message into `out`.
    ///
    /// `Ok(None)` when the ring is empty. A message longer than `out` is
    /// consumed and reported as `Err(Oversized(len))`.
    pub(crate) fn read(&self, out: &mut [u8]) -> Result<Option<usize>, Oversized> {
        let hdr = self.hdr();
        let r = hdr.read_pos.load(Ordering::Relaxed);
        let w = hdr.write_pos.load(Ordering::Acquire);
        if w.wrapping_sub(r) < LEN_PREFIX as u64 {
            return Ok(None);
        }
        let mut prefix = [0u8; LEN_PREFIX];
        self.copy_out(r, &mut prefix);
        let len = u32::from_ne_bytes(prefix) as usize;
        let next = r.wrapping_add((LEN_PREFIX + len) as u64);
        if len > out.len() {
            hdr.read_pos.store(next, Ordering::Release);
            return Err(Oversized(len));
        }
        self.copy_out(r.wrapping_add(LEN_PREFIX as u64), &mut out[..len]);
        hdr.read_pos.store(next, Ordering::Release);
        Ok(Some(len))
    }

    /// Drop every pending message. Reader side only.
    pub(crate) fn discard_all(&self) {
        let hdr = self.hdr();
        let w = hdr.write_pos.load(Ordering::Acquire);
        hdr.read_pos.store(w, Ordering::Release);
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        let hdr = self.hdr();
        hdr.write_pos.load(Ordering::Acquire) == hdr.read_pos.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Heap-backed ring storage with the alignment shm mappings give us.
    struct Backing {
        words: Vec<u64>,
    }

    impl Backing {
        fn new(capacity: usize) -> Self {
            Self {
                words: vec![0u64; ByteRing::footprint(capacity) / 8 + 8],
            }
        }

        fn ring(&mut self, capacity: usize) -> ByteRing {
            let ptr = self.words.as_mut_ptr() as *mut u8;
            let aligned = ((ptr as usize + 63) & !63) as *mut u8;
            unsafe { ByteRing::from_raw(aligned, capacity) }
        }
    }

    #[test]
    fn empty_ring_reads_none() {
        let mut b = Backing::new(64);
        let ring = b.ring(64);
        let mut out = [0u8; 16];
        assert!(ring.is_empty());
        assert_eq!(ring.read(&mut out), Ok(None));
    }

    #[test]
    fn messages_keep_boundaries_and_order() {
        let mut b = Backing::new(256);
        let ring = b.ring(256);
        assert!(ring.write(b"abc"));
        assert!(ring.write(b""));
        assert!(ring.write(b"defgh"));

        let mut out = [0u8; 16];
        assert_eq!(ring.read(&mut out), Ok(Some(3)));
        assert_eq!(&out[..3], b"abc");
        assert_eq!(ring.read(&mut out), Ok(Some(0)));
        assert_eq!(ring.read(&mut out), Ok(Some(5)));
        assert_eq!(&out[..5], b"defgh");
        assert_eq!(ring.read(&mut out), Ok(None));
    }

    #[test]
    fn full_ring_rejects_then_recovers() {
        let mut b = Backing::new(32);
        let ring = b.ring(32);
        // 4 + 12 = 16 bytes per message: exactly two fit.
        assert!(ring.write(&[1u8; 12]));
        assert!(ring.write(&[2u8; 12]));
        assert!(!ring.write(&[3u8; 1]));

        let mut out = [0u8; 12];
        assert_eq!(ring.read(&mut out), Ok(Some(12)));
        assert!(ring.write(&[3u8; 12]));
    }

    #[test]
    fn messages_wrap_around_the_end() {
        let mut b = Backing::new(40);
        let ring = b.ring(40);
        let mut out = [0u8; 32];
        for round in 0u8..20 {
            let msg: Vec<u8> = (0..11).map(|i| i ^ round).collect();
            assert!(ring.write(&msg));
            assert_eq!(ring.read(&mut out), Ok(Some(11)));
            assert_eq!(&out[..11], &msg[..]);
        }
    }

    #[test]
    fn oversized_message_is_consumed() {
        let mut b = Backing::new(64);
        let ring = b.ring(64);
        assert!(ring.write(&[9u8; 10]));
        assert!(ring.write(&[7u8; 2]));
        let mut small = [0u8; 4];
        assert_eq!(ring.read(&mut small), Err(Oversized(10)));
        assert_eq!(ring.read(&mut small), Ok(Some(2)));
        assert_eq!(&small[..2], &[7, 7]);
    }

    #[test]
    fn discard_all_empties_the_ring() {
        let mut b = Backing::new(64);
        let ring = b.ring(64);
        ring.write(b"one");
        ring.write(b"two");
        ring.discard_all();
        assert!(ring.is_empty());
        assert!(ring.write(b"three"));
    }
}
