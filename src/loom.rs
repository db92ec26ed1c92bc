//! Loom model checks for the check-then-block handshake.
//!
//! Run with: `RUSTFLAGS="--cfg loom" cargo test --features loom --release`

#[cfg(all(test, feature = "loom"))]
mod tests {
    use crate::layout::ControlBlock;
    use crate::ring::Ring;
    use crate::signal::{EventSignal, Signal};
    use crate::wait::{prepare_read, prepare_write, SpinBudget};
    use core::cell::UnsafeCell;
    use core::ptr::NonNull;
    use loom::{model::Builder, thread};
    use std::sync::Arc;

    struct Channel {
        ctrl: ControlBlock,
        data: UnsafeCell<[u8; 16]>,
    }

    unsafe impl Send for Channel {}
    unsafe impl Sync for Channel {}

    impl Channel {
        fn new(capacity: u32) -> Arc<Self> {
            Arc::new(Channel {
                ctrl: ControlBlock::new(capacity),
                data: UnsafeCell::new([0u8; 16]),
            })
        }

        fn ring(&self) -> Ring<'_> {
            let data = NonNull::new(self.data.get() as *mut u8).unwrap();
            unsafe { Ring::new(&self.ctrl, data, 8) }
        }
    }

    fn builder() -> Builder {
        let mut builder = Builder::new();
        if builder.preemption_bound.is_none() {
            builder.preemption_bound = Some(3);
        }
        builder
    }

    /// The core race: the producer finishes a write concurrently with the
    /// consumer publishing its wait intent. Without the re-check after the
    /// intent store, the consumer blocks forever on a notification the
    /// producer never sent. Loom flags the lost wakeup as a deadlock.
    #[test]
    fn reader_never_misses_a_wakeup() {
        builder().check(|| {
            let chan = Channel::new(8);
            let (consumer_sig, producer_sig) = EventSignal::pair().unwrap();

            let producer = {
                let chan = chan.clone();
                thread::spawn(move || {
                    let ring = chan.ring();
                    let grant = ring.reserve_write(3);
                    assert_eq!(grant, 3);
                    ring.copy_in(b"abc");
                    if chan.ctrl.consumer_waiting() {
                        producer_sig.notify().unwrap();
                    }
                })
            };

            let mut out = [0u8; 3];
            let mut got = 0usize;
            while got < 3 {
                let ring = chan.ring();
                let grant = prepare_read(&ring, (3 - got) as u32, SpinBudget::NONE, &consumer_sig)
                    .unwrap();
                assert!(grant > 0, "channel is never shut down in this model");
                ring.copy_out(&mut out[got..got + grant as usize]);
                got += grant as usize;
            }
            assert_eq!(&out, b"abc");

            producer.join().unwrap();
        });
    }

    /// Symmetric direction: a full ring, the producer parks, the consumer
    /// drains and must not strand it.
    #[test]
    fn writer_never_misses_a_wakeup() {
        builder().check(|| {
            let chan = Channel::new(8);
            let (consumer_sig, producer_sig) = EventSignal::pair().unwrap();

            // Pre-fill to capacity - 1 so the writer has no space.
            {
                let ring = chan.ring();
                let grant = ring.reserve_write(7);
                assert_eq!(grant, 7);
                ring.copy_in(&[0x55; 7]);
            }

            let consumer = {
                let chan = chan.clone();
                thread::spawn(move || {
                    let ring = chan.ring();
                    let mut out = [0u8; 4];
                    let grant = ring.reserve_read(4);
                    assert_eq!(grant, 4);
                    ring.copy_out(&mut out);
                    if chan.ctrl.producer_waiting() {
                        consumer_sig.notify().unwrap();
                    }
                })
            };

            let ring = chan.ring();
            let grant = prepare_write(&ring, 2, SpinBudget::NONE, &producer_sig).unwrap();
            assert!(grant > 0);
            ring.copy_in(&vec![0xaa; grant as usize]);

            consumer.join().unwrap();
        });
    }

    /// Close is observed by a parked producer: the consumer both sets the
    /// terminal flag and kicks unconditionally, mirroring `Consumer::close`.
    #[test]
    fn close_unparks_the_writer() {
        builder().check(|| {
            let chan = Channel::new(8);
            let (consumer_sig, producer_sig) = EventSignal::pair().unwrap();

            {
                let ring = chan.ring();
                ring.copy_in(&[0x11; 7]);
            }

            let closer = {
                let chan = chan.clone();
                thread::spawn(move || {
                    chan.ctrl.close();
                    consumer_sig.notify().unwrap();
                })
            };

            let ring = chan.ring();
            let grant = prepare_write(&ring, 1, SpinBudget::NONE, &producer_sig).unwrap();
            assert_eq!(grant, 0, "no space ever appears, only the close");

            closer.join().unwrap();
        });
    }
}
