//! Producer endpoint: owns the write cursor of one channel.

use crate::error::IvringError;
use crate::memory::SharedRegion;
use crate::ring::Ring;
use crate::signal::Signal;
use crate::wait::{prepare_write, SpinBudget};
use core::ptr::NonNull;
use tracing::trace;

pub struct Producer<S: Signal> {
    region: SharedRegion,
    signal: S,
    budget: SpinBudget,
    bytes_written: u64,
}

impl<S: Signal> Producer<S> {
    /// Attach to an already initialized region. Validates the control block
    /// and that the published capacity fits the mapping.
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
        Ok(Producer {
            region,
            signal,
            budget,
            bytes_written: 0,
        })
    }

    fn ring(&self) -> Ring<'_> {
        let ctrl = self.region.control();
        let data = self.region.data_ptr();
        unsafe { Ring::new(ctrl, NonNull::new_unchecked(data.as_ptr()), ctrl.capacity()) }
    }

    /// Write as much of `buf` as one grant allows. Spins, then blocks, per
    /// the wait strategy. Returns the number of bytes moved, or 0 once
    /// shutdown has been requested (partial writes are normal flow control).
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, IvringError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let ring = self.ring();
        let grant = prepare_write(&ring, buf.len() as u32, self.budget, &self.signal)?;
        if grant == 0 {
            return Ok(0);
        }
        ring.copy_in(&buf[..grant as usize]);

        // Intent-gated doorbell: only kick a consumer that parked itself.
        if ring.control().consumer_waiting() {
            trace!(grant, "kicking waiting consumer");
            self.signal.notify()?;
        }
        self.bytes_written += grant as u64;
        Ok(grant as usize)
    }

    /// Write the whole of `buf`, looping over grants. Returns the bytes
    /// actually moved, which is short only if shutdown was requested.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<usize, IvringError> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.write(&buf[done..])?;
            if n == 0 {
                break;
            }
            done += n;
        }
        Ok(done)
    }

    /// Cooperative stop request towards the consumer. The consumer drains
    /// what is in flight, then observes the cleared run flag.
    pub fn request_stop(&self) -> Result<(), IvringError> {
        self.region.control().request_stop();
        // Unconditional kick so a parked consumer re-samples the flag.
        self.signal.notify()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn control(&self) -> &crate::layout::ControlBlock {
        self.region.control()
    }
}
