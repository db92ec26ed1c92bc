//! Shared control block living at the start of the mapped data region.
//!
//! Both peers see this struct at the same offset of region B. Every field is
//! four bytes wide and the layout is frozen by `MAGIC`/`VERSION`, so two
//! independently built binaries can attach to the same channel.
//!
//! Ownership discipline (single writer per field):
//! - `write_cursor`, `wait_intent_producer`, `peer_id_producer`, `check_byte`,
//!   `run_flag` are written only by the producer.
//! - `read_cursor`, `wait_intent_consumer`, `peer_id_consumer`, `closed` are
//!   written only by the consumer.
//! - `magic`, `version`, `capacity` are written once by the creating side
//!   before the channel is published and are read-only afterwards.
//!
//! Cross-owner reads of the cursors use acquire ordering paired with the
//! owner's release store; that pairing is what publishes the bytes moved by
//! the ring engine. The wait-intent flags use sequentially consistent
//! accesses because the check-then-block handshake needs the flag store and
//! the reserve retry behind it to be globally ordered.

use crate::error::IvringError;
use crate::sync::{fence, AtomicU32, Ordering};

pub const MAGIC: u32 = 0x6976_7230; // "ivr0"
pub const VERSION: u32 = 1;

/// Upper capacity bound. Keeps the `read + capacity` cursor arithmetic of
/// the ring engine inside `u32`.
pub const MAX_CAPACITY: u32 = i32::MAX as u32;

#[repr(C)]
pub struct ControlBlock {
    magic: u32,
    version: u32,
    capacity: AtomicU32,
    pub(crate) read_cursor: AtomicU32,
    pub(crate) write_cursor: AtomicU32,
    closed: AtomicU32,
    run_flag: AtomicU32,
    pub(crate) wait_intent_producer: AtomicU32,
    pub(crate) wait_intent_consumer: AtomicU32,
    peer_id_producer: AtomicU32,
    peer_id_consumer: AtomicU32,
    check_byte: AtomicU32,
}

// The control block must fit in the first page of region B.
#[cfg(not(feature = "loom"))]
const _: () = assert!(std::mem::size_of::<ControlBlock>() <= 4096);

impl ControlBlock {
    /// Fresh, open channel state. Written into shared memory exactly once by
    /// the creating side before the peer learns about the region.
    pub fn new(capacity: u32) -> Self {
        ControlBlock {
            magic: MAGIC,
            version: VERSION,
            capacity: AtomicU32::new(capacity),
            read_cursor: AtomicU32::new(0),
            write_cursor: AtomicU32::new(0),
            closed: AtomicU32::new(0),
            run_flag: AtomicU32::new(1),
            wait_intent_producer: AtomicU32::new(0),
            wait_intent_consumer: AtomicU32::new(0),
            peer_id_producer: AtomicU32::new(0),
            peer_id_consumer: AtomicU32::new(0),
            check_byte: AtomicU32::new(0),
        }
    }

    /// Attaching-side check that the creating side runs a compatible layout.
    pub fn validate(&self) -> Result<(), IvringError> {
        if self.magic != MAGIC {
            return Err(IvringError::BadLayout {
                expected: MAGIC,
                found: self.magic,
            });
        }
        if self.version != VERSION {
            return Err(IvringError::BadVersion {
                expected: VERSION,
                found: self.version,
            });
        }
        Self::check_capacity(self.capacity())
    }

    /// Capacity 0 would divide by zero in the cursor arithmetic and capacity
    /// 1 leaves no room next to the slack byte; both are refused at setup,
    /// as is anything past [`MAX_CAPACITY`].
    pub(crate) fn check_capacity(capacity: u32) -> Result<(), IvringError> {
        if !(2..=MAX_CAPACITY).contains(&capacity) {
            return Err(IvringError::CapacityOutOfRange(capacity));
        }
        Ok(())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity.load(Ordering::Acquire)
    }

    /// Terminal flag, consumer-owned, 0 -> 1 once.
    pub fn close(&self) {
        self.closed.store(1, Ordering::Release);
    }

    /// Cooperative stop request, producer-owned.
    pub fn request_stop(&self) {
        self.run_flag.store(0, Ordering::Release);
    }

    /// True once either side has initiated shutdown.
    pub fn shutdown_requested(&self) -> bool {
        self.closed.load(Ordering::Acquire) != 0 || self.run_flag.load(Ordering::Acquire) == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) != 0
    }

    pub fn publish_producer_id(&self, id: u32) {
        self.peer_id_producer.store(id, Ordering::Release);
    }

    pub fn publish_consumer_id(&self, id: u32) {
        self.peer_id_consumer.store(id, Ordering::Release);
    }

    pub fn producer_id(&self) -> u32 {
        self.peer_id_producer.load(Ordering::Acquire)
    }

    pub fn consumer_id(&self) -> u32 {
        self.peer_id_consumer.load(Ordering::Acquire)
    }

    pub fn publish_check_byte(&self, byte: u8) {
        self.check_byte.store(byte as u32, Ordering::Release);
    }

    pub fn check_byte(&self) -> u8 {
        self.check_byte.load(Ordering::Acquire) as u8
    }

    /// Observed by the consumer after draining a grant to decide whether the
    /// producer parked itself on the interrupt line.
    ///
    /// The fence orders the caller's cursor advance before this load. The
    /// waiter runs the mirror image (intent store, fence, reserve retry);
    /// without a fence on both sides the two stores can sit in store buffers
    /// while both loads read stale values, and the wakeup is lost.
    pub fn producer_waiting(&self) -> bool {
        fence(Ordering::SeqCst);
        self.wait_intent_producer.load(Ordering::SeqCst) != 0
    }

    /// Observed by the producer after publishing a grant. Same fence pairing
    /// as [`producer_waiting`](Self::producer_waiting).
    pub fn consumer_waiting(&self) -> bool {
        fence(Ordering::SeqCst);
        self.wait_intent_consumer.load(Ordering::SeqCst) != 0
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_fresh_block() {
        let block = ControlBlock::new(4096);
        assert!(block.validate().is_ok());
        assert_eq!(block.capacity(), 4096);
        assert!(!block.shutdown_requested());
    }

    #[test]
    fn validate_rejects_foreign_magic() {
        let mut block = ControlBlock::new(4096);
        block.magic = 0xdead_beef;
        match block.validate() {
            Err(IvringError::BadLayout { found, .. }) => assert_eq!(found, 0xdead_beef),
            other => panic!("expected BadLayout, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_newer_version() {
        let mut block = ControlBlock::new(4096);
        block.version = VERSION + 1;
        assert!(matches!(
            block.validate(),
            Err(IvringError::BadVersion { .. })
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_capacity() {
        for capacity in [0, 1, MAX_CAPACITY + 1, u32::MAX] {
            let block = ControlBlock::new(capacity);
            assert!(matches!(
                block.validate(),
                Err(IvringError::CapacityOutOfRange(found)) if found == capacity
            ));
        }
    }

    #[test]
    fn shutdown_is_monotonic_per_side() {
        let block = ControlBlock::new(64);
        block.request_stop();
        assert!(block.shutdown_requested());
        assert!(!block.is_closed());
        block.close();
        assert!(block.is_closed());
    }

    #[test]
    fn fields_are_word_sized() {
        assert_eq!(std::mem::size_of::<ControlBlock>(), 12 * 4);
        assert_eq!(std::mem::align_of::<ControlBlock>(), 4);
    }
}
