//! Peer wakeup seam.
//!
//! The transport core only ever needs two verbs: kick the peer, and block
//! until kicked. The ivshmem doorbell (`device.rs`) and the eventfd-backed
//! in-process implementation below both satisfy [`Signal`]; under loom the
//! eventfd is replaced by a condvar stand-in.

use crate::error::IvringError;

/// One direction of the sideband wakeup channel.
///
/// `notify` carries no payload and is fire-and-forget: kicks delivered while
/// the peer is not waiting coalesce. `wait` returns on "at least one
/// notification since the last wait" and promises nothing about grants.
pub trait Signal {
    fn notify(&self) -> Result<(), IvringError>;
    fn wait(&self) -> Result<(), IvringError>;
}

#[cfg(not(feature = "loom"))]
pub use real::EventSignal;

#[cfg(not(feature = "loom"))]
mod real {
    use super::Signal;
    use crate::error::IvringError;
    use nix::sys::eventfd::{EfdFlags, EventFd};
    use std::os::fd::{AsFd, BorrowedFd};

    /// Eventfd-backed signal: waits on its own eventfd, kicks the peer's.
    ///
    /// Used by same-host channels and by the test harness; the device-backed
    /// transport uses [`IvshmemSignal`](crate::device::IvshmemSignal) instead.
    pub struct EventSignal {
        own: EventFd,
        peer: EventFd,
    }

    impl EventSignal {
        /// Two crossed signals: what one side notifies, the other waits on.
        pub fn pair() -> Result<(EventSignal, EventSignal), IvringError> {
            let a = new_eventfd()?;
            let b = new_eventfd()?;
            let a2 = clone_eventfd(&a)?;
            let b2 = clone_eventfd(&b)?;
            Ok((
                EventSignal { own: a, peer: b2 },
                EventSignal { own: b, peer: a2 },
            ))
        }

        pub fn wait_fd(&self) -> BorrowedFd<'_> {
            self.own.as_fd()
        }
    }

    impl Signal for EventSignal {
        fn notify(&self) -> Result<(), IvringError> {
            self.peer
                .write(1)
                .map_err(|e| IvringError::NotifyFailed(e.to_string()))?;
            Ok(())
        }

        fn wait(&self) -> Result<(), IvringError> {
            self.own
                .read()
                .map_err(|e| IvringError::WaitFailed(e.to_string()))?;
            Ok(())
        }
    }

    fn new_eventfd() -> Result<EventFd, IvringError> {
        EventFd::from_value_and_flags(0, EfdFlags::EFD_CLOEXEC)
            .map_err(|e| IvringError::EventfdCreation(e.to_string()))
    }

    #[allow(unused_unsafe)]
    fn clone_eventfd(fd: &EventFd) -> Result<EventFd, IvringError> {
        let owned = fd
            .as_fd()
            .try_clone_to_owned()
            .map_err(|e| IvringError::EventfdCreation(e.to_string()))?;
        // The duplicated fd is a valid eventfd by construction.
        Ok(unsafe { EventFd::from_owned_fd(owned) })
    }
}

#[cfg(feature = "loom")]
pub use model::EventSignal;

#[cfg(feature = "loom")]
mod model {
    use super::Signal;
    use crate::error::IvringError;
    use loom::sync::{Condvar, Mutex};
    use std::sync::Arc;

    struct Cell {
        condvar: Condvar,
        pending: Mutex<bool>,
    }

    impl Cell {
        fn new() -> Arc<Self> {
            Arc::new(Cell {
                condvar: Condvar::new(),
                pending: Mutex::new(false),
            })
        }
    }

    /// Condvar stand-in for the eventfd pair, explorable by loom.
    pub struct EventSignal {
        own: Arc<Cell>,
        peer: Arc<Cell>,
    }

    impl EventSignal {
        pub fn pair() -> Result<(EventSignal, EventSignal), IvringError> {
            let a = Cell::new();
            let b = Cell::new();
            Ok((
                EventSignal {
                    own: a.clone(),
                    peer: b.clone(),
                },
                EventSignal { own: b, peer: a },
            ))
        }
    }

    impl Signal for EventSignal {
        fn notify(&self) -> Result<(), IvringError> {
            let mut pending = self.peer.pending.lock().unwrap();
            *pending = true;
            self.peer.condvar.notify_one();
            Ok(())
        }

        fn wait(&self) -> Result<(), IvringError> {
            let mut pending = self.own.pending.lock().unwrap();
            while !*pending {
                pending = self.own.condvar.wait(pending).unwrap();
            }
            *pending = false;
            Ok(())
        }
    }
}
