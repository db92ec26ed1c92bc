//! ivshmem UIO device: register page, data region mapping, interrupt read.
//!
//! The kernel side (the uio_ivshmem driver) is an external collaborator; this
//! module only consumes what it exposes through the device file:
//!
//! - offset 0: one page of registers (region A),
//! - offset page_size: the shared data region (region B),
//! - `read(fd)`: blocks until an interrupt, yielding a 4-byte event counter.

use crate::error::IvringError;
use crate::memory::{page_size, SharedRegion};
use crate::signal::Signal;
use core::ptr::NonNull;
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::num::NonZero;
use std::os::fd::AsFd;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Interrupt vector this transport rings. UIO exposes a single line.
pub const DEFAULT_VECTOR: u16 = 0;

/// Register page layout of the ivshmem PCI device (region A). All access
/// goes through volatile reads/writes; the doorbell is write-only.
#[repr(C)]
struct RegisterBlock {
    intr_mask: u32,
    intr_status: u32,
    iv_position: u32,
    doorbell: u32,
    iv_live_list: u32,
}

pub struct IvshmemDevice {
    file: File,
    regs: NonNull<RegisterBlock>,
    page_size: usize,
}

unsafe impl Send for IvshmemDevice {}
unsafe impl Sync for IvshmemDevice {}

impl IvshmemDevice {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IvringError> {
        let page = page_size();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;

        let regs = unsafe {
            mmap(
                None,
                NonZero::new(page).expect("page size is non-zero"),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                file.as_fd(),
                0,
            )?
        };
        let regs = NonNull::new(regs.as_ptr() as *mut RegisterBlock)
            .expect("mmap returned a non-null mapping");

        let device = IvshmemDevice {
            file,
            regs,
            page_size: page,
        };
        debug!(iv_position = device.iv_position(), "opened ivshmem device");
        Ok(device)
    }

    /// This peer's identity as assigned by the hypervisor.
    pub fn iv_position(&self) -> u32 {
        unsafe { core::ptr::addr_of!((*self.regs.as_ptr()).iv_position).read_volatile() }
    }

    /// Single-write notification: `(peer_id << 16) | vector`. No ack, no
    /// queueing; kicks coalesce on the receiving side.
    pub fn ring_doorbell(&self, peer_id: u32, vector: u16) {
        let message = (peer_id << 16) | vector as u32;
        unsafe {
            core::ptr::addr_of_mut!((*self.regs.as_ptr()).doorbell).write_volatile(message);
        }
    }

    /// Block until the peer rings this side's vector. The counter value only
    /// says "at least one interrupt happened"; it is discarded.
    pub fn wait_interrupt(&self) -> Result<(), IvringError> {
        let mut counter = [0u8; 4];
        let n = (&self.file).read(&mut counter)?;
        if n != counter.len() {
            return Err(IvringError::ShortInterruptRead(n));
        }
        Ok(())
    }

    /// Map region B: the control page plus `capacity` data bytes, starting
    /// one page into the device file.
    pub fn map_region(&self, capacity: u32) -> Result<SharedRegion, IvringError> {
        let len = self.page_size + align_up(capacity as usize, self.page_size);
        let fd = self.file.as_fd().try_clone_to_owned()?;
        SharedRegion::from_fd(fd, self.page_size as i64, len)
    }

    /// Attaching side: map just the control page to learn the capacity the
    /// creating side published, then drop that mapping again.
    pub fn probe_capacity(&self) -> Result<u32, IvringError> {
        let fd = self.file.as_fd().try_clone_to_owned()?;
        let probe = SharedRegion::from_fd(fd, self.page_size as i64, 2 * self.page_size)?;
        probe.control().validate()?;
        Ok(probe.control().capacity())
    }
}

impl Drop for IvshmemDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(
                NonNull::new_unchecked(self.regs.as_ptr() as *mut _),
                self.page_size,
            );
        }
    }
}

fn align_up(value: usize, page: usize) -> usize {
    value.div_ceil(page) * page
}

/// Doorbell-backed [`Signal`]: notify writes the doorbell register addressed
/// to the peer, wait blocks on the device's interrupt counter.
pub struct IvshmemSignal {
    device: Arc<IvshmemDevice>,
    peer_id: u32,
    vector: u16,
}

impl IvshmemSignal {
    pub fn new(device: Arc<IvshmemDevice>, peer_id: u32, vector: u16) -> Self {
        IvshmemSignal {
            device,
            peer_id,
            vector,
        }
    }
}

impl Signal for IvshmemSignal {
    fn notify(&self) -> Result<(), IvringError> {
        self.device.ring_doorbell(self.peer_id, self.vector);
        Ok(())
    }

    fn wait(&self) -> Result<(), IvringError> {
        self.device.wait_interrupt()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::align_up;

    #[test]
    fn align_up_rounds_to_page_multiples() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
    }
}
