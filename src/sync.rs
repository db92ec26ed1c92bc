//! Atomic primitives, switchable to loom for model checking.

#[cfg(not(feature = "loom"))]
pub(crate) use std::sync::atomic::{fence, AtomicU32, Ordering};

#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::{fence, AtomicU32, Ordering};

#[cfg(not(feature = "loom"))]
#[inline(always)]
pub(crate) fn spin_hint() {
    std::hint::spin_loop();
}

#[cfg(feature = "loom")]
pub(crate) fn spin_hint() {
    loom::thread::yield_now();
}
