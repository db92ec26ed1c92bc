//! Consumer endpoint: owns the read cursor, drains the ring on shutdown.

use crate::error::IvringError;
use crate::memory::SharedRegion;
use crate::ring::Ring;
use crate::signal::Signal;
use crate::wait::{prepare_read, SpinBudget};
use core::ptr::NonNull;
use tracing::trace;

pub struct Consumer<S: Signal> {
    region: SharedRegion,
    signal: S,
    budget: SpinBudget,
    verify: Option<u8>,
    bytes_read: u64,
}

impl<S: Signal> Consumer<S> {
    /// Attach to an already initialized region.
    pub fn new(region: SharedRegion, signal: S, budget: SpinBudget) -> Result<Self, IvringError> {
        let ctrl = region.control();
        ctrl.validate()?;
        let capacity = ctrl.capacity();
        if capacity as usize > region.data_len() {
            return Err(IvringError::CapacityTooLarge {
                capacity,
                data_len: region.data_len(),
            });
        }
        Ok(Consumer {
            region,
            signal,
            budget,
            verify: None,
            bytes_read: 0,
        })
    }

    /// Debug self-test: every received byte must equal `pattern`. A mismatch
    /// is a protocol violation and fails the read; it means the ring
    /// algorithm or ordering discipline is broken and must not be masked.
    pub fn with_verify(mut self, pattern: u8) -> Self {
        self.verify = Some(pattern);
        self
    }

    fn ring(&self) -> Ring<'_> {
        let ctrl = self.region.control();
        let data = self.region.data_ptr();
        unsafe { Ring::new(ctrl, NonNull::new_unchecked(data.as_ptr()), ctrl.capacity()) }
    }

    /// Read up to `buf.len()` bytes. Returns 0 only after shutdown was
    /// requested and the ring is fully drained.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, IvringError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let ring = self.ring();
        let grant = prepare_read(&ring, buf.len() as u32, self.budget, &self.signal)?;
        if grant == 0 {
            return Ok(0);
        }
        let grant = grant as usize;
        ring.copy_out(&mut buf[..grant]);

        if let Some(pattern) = self.verify {
            for (offset, &byte) in buf[..grant].iter().enumerate() {
                if byte != pattern {
                    return Err(IvringError::PatternMismatch {
                        offset: self.bytes_read as usize + offset,
                        expected: pattern,
                        found: byte,
                    });
                }
            }
        }

        // Intent-gated doorbell: only kick a producer that parked itself.
        if ring.control().producer_waiting() {
            trace!(grant, "kicking waiting producer");
            self.signal.notify()?;
        }
        self.bytes_read += grant as u64;
        Ok(grant)
    }

    /// Terminal close. Once set the producer stops writing; this side may
    /// keep draining until [`read`](Self::read) returns 0.
    pub fn close(&self) -> Result<(), IvringError> {
        self.region.control().close();
        // Unconditional kick so a parked producer re-samples the flag.
        self.signal.notify()
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn control(&self) -> &crate::layout::ControlBlock {
        self.region.control()
    }
}
