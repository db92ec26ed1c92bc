//! # ivring - SPSC stream transport over ivshmem shared memory
//!
//! Zero-copy byte channel between two peers sharing a memory region (two
//! VMs, or a VM and its host, through the ivshmem PCI device), with a
//! doorbell register as the cross-peer wakeup sideband.
//!
//! The channel is strictly single-producer/single-consumer. The producer
//! owns the write cursor, the consumer the read cursor; no locks are
//! involved, correctness rests on acquire/release cursor publication plus a
//! wait-intent handshake that closes the check-then-block race (see
//! [`wait`]).
//!
//! ## Same-host usage
//!
//! Device-free channels run over a memfd region and an eventfd pair, which
//! is also how the test suite exercises the transport:
//!
//! ```rust
//! use ivring::{page_size, Consumer, EventSignal, Producer, SharedRegion, SpinBudget};
//!
//! let region = SharedRegion::create(2 * page_size())?;
//! region.init_control(region.data_len() as u32)?;
//! let peer = SharedRegion::from_fd(region.clone_fd()?, 0, region.len())?;
//!
//! let (consumer_signal, producer_signal) = EventSignal::pair()?;
//! let mut consumer = Consumer::new(region, consumer_signal, SpinBudget::default())?;
//! let mut producer = Producer::new(peer, producer_signal, SpinBudget::default())?;
//!
//! producer.write(b"hello")?;
//! let mut buf = [0u8; 16];
//! let n = consumer.read(&mut buf)?;
//! assert_eq!(&buf[..n], b"hello");
//! # Ok::<(), ivring::IvringError>(())
//! ```
//!
//! ## Device-backed usage
//!
//! The `stream_server` binary (consumer role) creates the control block in
//! region B of the device and publishes its peer id; `stream_client`
//! (producer role) attaches, completes the identity handshake and pumps
//! data. See [`device`] for the register-page contract.

pub use consumer::Consumer;
pub use device::{IvshmemDevice, IvshmemSignal, DEFAULT_VECTOR};
pub use error::IvringError;
pub use layout::ControlBlock;
pub use memory::{page_size, SharedRegion};
pub use producer::Producer;
pub use ring::Ring;
pub use signal::{EventSignal, Signal};
pub use wait::{prepare_read, prepare_write, SpinBudget};

pub mod consumer;
pub mod device;
pub mod error;
pub mod layout;
#[cfg(all(test, feature = "loom"))]
pub(crate) mod loom;
pub mod memory;
pub mod producer;
pub mod ring;
pub mod signal;
pub(crate) mod sync;
pub mod wait;
