//! Mapping lifecycle for the shared data region (region B).
//!
//! The first page of the region holds the [`ControlBlock`], the rest is the
//! ring's backing store. Regions come from two places: a memfd created here
//! (same-host channels, tests) or the ivshmem device fd mapped at the page
//! offset (`device.rs`).

use crate::error::IvringError;
use crate::layout::ControlBlock;
use core::ptr::NonNull;
use nix::sys::memfd::{memfd_create, MFdFlags};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use nix::unistd::ftruncate;
use std::num::NonZero;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

pub struct SharedRegion {
    ptr: NonNull<u8>,
    len: usize,
    page_size: usize,
    fd: OwnedFd,
}

impl SharedRegion {
    /// Create a fresh memfd-backed region of `len` bytes (control page
    /// included). `len` must be page-aligned and leave room for data beyond
    /// the control page.
    pub fn create(len: usize) -> Result<Self, IvringError> {
        let page = page_size();
        validate_len(len, page)?;

        let fd = memfd_create(c"ivring", MFdFlags::MFD_CLOEXEC)?;
        ftruncate(&fd, len as i64)?;
        let ptr = map_fd(fd.as_fd(), 0, len)?;

        Ok(SharedRegion {
            ptr,
            len,
            page_size: page,
            fd,
        })
    }

    /// Map an existing region (memfd clone or device fd) at `offset`.
    pub fn from_fd(fd: OwnedFd, offset: i64, len: usize) -> Result<Self, IvringError> {
        let page = page_size();
        validate_len(len, page)?;
        let ptr = map_fd(fd.as_fd(), offset, len)?;

        Ok(SharedRegion {
            ptr,
            len,
            page_size: page,
            fd,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Usable ring capacity: everything past the control page.
    pub fn data_len(&self) -> usize {
        self.len - self.page_size
    }

    pub fn data_ptr(&self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(self.page_size)) }
    }

    /// Stamp a fresh control block into the first page. Creating side only,
    /// before the peer is told about the region.
    pub fn init_control(&self, capacity: u32) -> Result<(), IvringError> {
        ControlBlock::check_capacity(capacity)?;
        if capacity as usize > self.data_len() {
            return Err(IvringError::CapacityTooLarge {
                capacity,
                data_len: self.data_len(),
            });
        }
        unsafe {
            (self.ptr.as_ptr() as *mut ControlBlock).write(ControlBlock::new(capacity));
        }
        Ok(())
    }

    /// View of the control block at the start of the region.
    pub fn control(&self) -> &ControlBlock {
        unsafe { &*(self.ptr.as_ptr() as *const ControlBlock) }
    }

    /// Duplicate the backing fd so a second mapping (the other endpoint, or
    /// another process after fd passing) can attach.
    pub fn clone_fd(&self) -> Result<OwnedFd, IvringError> {
        Ok(self.fd.as_fd().try_clone_to_owned()?)
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(NonNull::new_unchecked(self.ptr.as_ptr() as *mut _), self.len);
        }
    }
}

unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

fn validate_len(len: usize, page: usize) -> Result<(), IvringError> {
    if len % page != 0 {
        return Err(IvringError::SizeNotAligned(len));
    }
    if len < 2 * page {
        return Err(IvringError::SizeTooSmall(len));
    }
    Ok(())
}

fn map_fd(fd: BorrowedFd<'_>, offset: i64, len: usize) -> Result<NonNull<u8>, IvringError> {
    let ptr = unsafe {
        mmap(
            None,
            NonZero::new(len).expect("validated non-zero length"),
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            fd,
            offset,
        )?
    };
    Ok(unsafe { NonNull::new_unchecked(ptr.as_ptr() as *mut u8) })
}
