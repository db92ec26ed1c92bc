//! SPSC ring engine over the shared control block and the backing byte area.
//!
//! Cursor arithmetic is plain modulo on the producer-chosen capacity; one
//! byte of slack is always reserved so a full ring never shows
//! `write_cursor == read_cursor`. Zero grants are flow control, never errors.

use crate::layout::ControlBlock;
use crate::sync::Ordering;
use core::ptr::NonNull;
use tracing::trace;

/// Borrowed view of one channel direction. Cheap to construct; endpoints
/// build one per operation.
pub struct Ring<'a> {
    ctrl: &'a ControlBlock,
    data: NonNull<u8>,
    capacity: u32,
}

impl<'a> Ring<'a> {
    /// # Safety
    ///
    /// `data` must point to at least `capacity` bytes that stay mapped and
    /// writable for `'a`, and `capacity` must match `ctrl.capacity()`.
    pub(crate) unsafe fn new(ctrl: &'a ControlBlock, data: NonNull<u8>, capacity: u32) -> Self {
        debug_assert!(capacity >= 2);
        Ring {
            ctrl,
            data,
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn control(&self) -> &ControlBlock {
        self.ctrl
    }

    /// Bytes the producer may write right now. The `- 1` keeps the slack
    /// byte that disambiguates empty from full.
    pub fn free_space(&self) -> u32 {
        let read = self.ctrl.read_cursor.load(Ordering::Acquire);
        let write = self.ctrl.write_cursor.load(Ordering::Relaxed);
        (read + self.capacity - write - 1) % self.capacity
    }

    /// Bytes the consumer may read right now.
    pub fn available(&self) -> u32 {
        let write = self.ctrl.write_cursor.load(Ordering::Acquire);
        let read = self.ctrl.read_cursor.load(Ordering::Relaxed);
        (write + self.capacity - read) % self.capacity
    }

    /// Producer side: clamp `requested` against free space. Never blocks.
    pub fn reserve_write(&self, requested: u32) -> u32 {
        let grant = requested.min(self.free_space());
        trace!(requested, grant, "reserve_write");
        grant
    }

    /// Consumer side: clamp `requested` against available data. Never blocks.
    pub fn reserve_read(&self, requested: u32) -> u32 {
        let grant = requested.min(self.available());
        trace!(requested, grant, "reserve_read");
        grant
    }

    /// Copy `src` into the ring at the write cursor and publish the advance.
    ///
    /// The caller must hold a grant of at least `src.len()` from
    /// [`reserve_write`](Self::reserve_write).
    pub fn copy_in(&self, src: &[u8]) {
        let grant = src.len() as u32;
        debug_assert!(grant <= self.free_space());

        let cursor = self.ctrl.write_cursor.load(Ordering::Relaxed);
        let first = grant.min(self.capacity - cursor) as usize;
        let rest = grant as usize - first;
        debug_assert_eq!(first + rest, grant as usize);

        let dst = unsafe {
            core::slice::from_raw_parts_mut(self.data.as_ptr(), self.capacity as usize)
        };
        let cursor = cursor as usize;
        dst[cursor..cursor + first].copy_from_slice(&src[..first]);
        dst[..rest].copy_from_slice(&src[first..]);

        self.advance_write(grant);
    }

    /// Copy from the ring at the read cursor into `dst` and publish the
    /// advance. The caller must hold a grant of at least `dst.len()` from
    /// [`reserve_read`](Self::reserve_read).
    pub fn copy_out(&self, dst: &mut [u8]) {
        let grant = dst.len() as u32;
        debug_assert!(grant <= self.available());

        let cursor = self.ctrl.read_cursor.load(Ordering::Relaxed);
        let first = grant.min(self.capacity - cursor) as usize;
        let rest = grant as usize - first;
        debug_assert_eq!(first + rest, grant as usize);

        let src =
            unsafe { core::slice::from_raw_parts(self.data.as_ptr(), self.capacity as usize) };
        let cursor = cursor as usize;
        dst[..first].copy_from_slice(&src[cursor..cursor + first]);
        dst[first..].copy_from_slice(&src[..rest]);

        self.advance_read(grant);
    }

    fn advance_write(&self, grant: u32) {
        let cursor = self.ctrl.write_cursor.load(Ordering::Relaxed);
        let next = (cursor + grant) % self.capacity;
        trace!(cursor, grant, next, "advance_write");
        self.ctrl.write_cursor.store(next, Ordering::Release);
    }

    fn advance_read(&self, grant: u32) {
        let cursor = self.ctrl.read_cursor.load(Ordering::Relaxed);
        let next = (cursor + grant) % self.capacity;
        trace!(cursor, grant, next, "advance_read");
        self.ctrl.read_cursor.store(next, Ordering::Release);
    }
}

/// Which cursor an endpoint owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::layout::ControlBlock;
    use rstest::*;

    struct Harness {
        ctrl: Box<ControlBlock>,
        data: Vec<u8>,
    }

    impl Harness {
        fn new(capacity: u32) -> Self {
            Harness {
                ctrl: Box::new(ControlBlock::new(capacity)),
                data: vec![0u8; capacity as usize],
            }
        }

        fn ring(&mut self) -> Ring<'_> {
            let data = NonNull::new(self.data.as_mut_ptr()).unwrap();
            unsafe { Ring::new(&self.ctrl, data, self.ctrl.capacity()) }
        }
    }

    #[fixture]
    fn small() -> Harness {
        Harness::new(8)
    }

    #[rstest]
    fn empty_ring_reports_slack(mut small: Harness) {
        let ring = small.ring();
        assert_eq!(ring.free_space(), 7);
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.reserve_read(100), 0);
    }

    #[rstest]
    fn grant_is_clamped_to_free_space(mut small: Harness) {
        let ring = small.ring();
        assert_eq!(ring.reserve_write(100), 7);
        ring.copy_in(&[1, 2, 3, 4, 5]);
        assert_eq!(ring.reserve_write(100), 2);
    }

    #[rstest]
    fn full_ring_never_collides_cursors(mut small: Harness) {
        let ring = small.ring();
        let grant = ring.reserve_write(100);
        ring.copy_in(&vec![0xab; grant as usize]);
        assert_eq!(ring.free_space(), 0);
        assert_eq!(ring.reserve_write(1), 0);
        assert_ne!(
            small.ctrl.write_cursor.load(Ordering::Relaxed),
            small.ctrl.read_cursor.load(Ordering::Relaxed)
        );
    }

    #[test]
    fn wraparound_split_is_exact() {
        // Start three bytes before the end; capacity - 1 bytes must split
        // into 3 at the tail and capacity - 4 at the front.
        let capacity = 16u32;
        let mut h = Harness::new(capacity);
        h.ctrl.read_cursor.store(capacity - 3, Ordering::Relaxed);
        h.ctrl.write_cursor.store(capacity - 3, Ordering::Relaxed);

        let payload: Vec<u8> = (0..capacity - 1).map(|i| i as u8).collect();
        let ring = h.ring();
        assert_eq!(ring.reserve_write(capacity - 1), capacity - 1);
        ring.copy_in(&payload);

        assert_eq!(&h.data[(capacity - 3) as usize..], &payload[..3]);
        assert_eq!(&h.data[..(capacity - 4) as usize], &payload[3..]);

        let ring = h.ring();
        let mut out = vec![0u8; (capacity - 1) as usize];
        assert_eq!(ring.reserve_read(capacity - 1), capacity - 1);
        ring.copy_out(&mut out);
        assert_eq!(out, payload);
    }

    #[test]
    fn ten_bytes_through_capacity_eight() {
        let mut h = Harness::new(8);
        let bytes: Vec<u8> = (0u8..10).collect();
        let mut received = Vec::new();
        let mut out = [0u8; 10];

        let ring = h.ring();
        assert_eq!(ring.reserve_write(6), 6);
        ring.copy_in(&bytes[..6]);

        let grant = ring.reserve_read(10);
        assert_eq!(grant, 6);
        ring.copy_out(&mut out[..6]);
        received.extend_from_slice(&out[..6]);

        assert_eq!(ring.reserve_write(4), 4);
        ring.copy_in(&bytes[6..]);

        let grant = ring.reserve_read(10);
        assert_eq!(grant, 4);
        ring.copy_out(&mut out[..4]);
        received.extend_from_slice(&out[..4]);

        assert_eq!(received, bytes);
        assert_eq!(h.ctrl.write_cursor.load(Ordering::Relaxed), 2);
        assert_eq!(h.ctrl.read_cursor.load(Ordering::Relaxed), 2);
        assert_eq!(h.ring().free_space(), 7);
    }

    #[rstest]
    #[case::one_byte(1)]
    #[case::half(4)]
    #[case::all_usable(7)]
    fn copy_round_trip(mut small: Harness, #[case] len: u32) {
        let payload: Vec<u8> = (0..len).map(|i| (0x30 + i) as u8).collect();
        let ring = small.ring();
        assert_eq!(ring.reserve_write(len), len);
        ring.copy_in(&payload);

        let mut out = vec![0u8; len as usize];
        assert_eq!(ring.reserve_read(len), len);
        ring.copy_out(&mut out);
        assert_eq!(out, payload);
        assert_eq!(ring.available(), 0);
    }
}
