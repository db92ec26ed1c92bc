//! Hybrid spin/block flow control.
//!
//! Each attempted reserve goes through a three-state machine:
//!
//! - `Spinning`: busy-retry the reserve until the budget deadline. Under
//!   sustained load this is the only state ever visited.
//! - `IntentPublished`: the wait-intent flag is set; retry the reserve once
//!   more behind a full fence before committing to sleep. A grant appearing
//!   here means the peer progressed before it could see the flag, so its
//!   notification may already have been skipped; take the grant and clear
//!   the flag. Skipping this retry reintroduces the missed-wakeup deadlock.
//! - `Blocked`: wait on the interrupt channel, clear the flag on wakeup, and
//!   retry from the top. A wakeup promises "at least one notification", not
//!   a grant.

use crate::layout::ControlBlock;
use crate::ring::{Ring, Role};
use crate::signal::Signal;
use crate::sync::{fence, spin_hint, AtomicU32, Ordering};
use crate::IvringError;
use std::time::{Duration, Instant};
use tracing::trace;

/// Wall-clock budget for the busy-spin phase.
#[derive(Clone, Copy, Debug)]
pub struct SpinBudget(pub Duration);

impl SpinBudget {
    /// Matches the 100us poll window the transport was tuned with.
    pub const fn new(window: Duration) -> Self {
        SpinBudget(window)
    }

    /// Skip straight to the intent handshake after one reserve attempt.
    pub const NONE: SpinBudget = SpinBudget(Duration::ZERO);
}

impl Default for SpinBudget {
    fn default() -> Self {
        SpinBudget(Duration::from_micros(100))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WaitState {
    Spinning,
    IntentPublished,
    Blocked,
}

/// Producer-side reserve with flow control. Returns a non-zero grant, or 0
/// once shutdown has been requested.
pub fn prepare_write<S: Signal>(
    ring: &Ring<'_>,
    requested: u32,
    budget: SpinBudget,
    signal: &S,
) -> Result<u32, IvringError> {
    debug_assert!(requested > 0);
    prepare(ring, requested, budget, signal, Role::Producer)
}

/// Consumer-side reserve with flow control. Returns a non-zero grant, or 0
/// once shutdown has been requested and the ring is drained.
pub fn prepare_read<S: Signal>(
    ring: &Ring<'_>,
    requested: u32,
    budget: SpinBudget,
    signal: &S,
) -> Result<u32, IvringError> {
    debug_assert!(requested > 0);
    prepare(ring, requested, budget, signal, Role::Consumer)
}

fn prepare<S: Signal>(
    ring: &Ring<'_>,
    requested: u32,
    budget: SpinBudget,
    signal: &S,
    role: Role,
) -> Result<u32, IvringError> {
    let ctrl = ring.control();
    let intent = intent_flag(ctrl, role);
    let mut state = WaitState::Spinning;

    loop {
        state = match state {
            WaitState::Spinning => {
                let deadline = Instant::now() + budget.0;
                loop {
                    if done(ring, role) {
                        return Ok(0);
                    }
                    let grant = match role {
                        Role::Producer => ring.reserve_write(requested),
                        Role::Consumer => ring.reserve_read(requested),
                    };
                    if grant > 0 {
                        return Ok(grant);
                    }
                    if Instant::now() >= deadline {
                        break;
                    }
                    spin_hint();
                }
                intent.store(1, Ordering::SeqCst);
                fence(Ordering::SeqCst);
                trace!(?role, "wait intent published");
                WaitState::IntentPublished
            }
            WaitState::IntentPublished => {
                // This retry pairs with the peer's post-transfer intent
                // check: the fences on both sides guarantee that either this
                // reserve sees the advanced cursor or the peer sees the flag.
                let grant = match role {
                    Role::Producer => ring.reserve_write(requested),
                    Role::Consumer => ring.reserve_read(requested),
                };
                if grant > 0 {
                    intent.store(0, Ordering::SeqCst);
                    trace!(?role, grant, "wait intent cancelled");
                    return Ok(grant);
                } else if done(ring, role) {
                    intent.store(0, Ordering::SeqCst);
                    return Ok(0);
                } else {
                    WaitState::Blocked
                }
            }
            WaitState::Blocked => {
                trace!(?role, "blocking on interrupt");
                let waited = signal.wait();
                intent.store(0, Ordering::SeqCst);
                waited?;
                WaitState::Spinning
            }
        };
    }
}

fn intent_flag(ctrl: &ControlBlock, role: Role) -> &AtomicU32 {
    match role {
        Role::Producer => &ctrl.wait_intent_producer,
        Role::Consumer => &ctrl.wait_intent_consumer,
    }
}

/// Shutdown test per role: the producer stops as soon as either side asked
/// for it; the consumer first drains whatever is still in the ring.
fn done(ring: &Ring<'_>, role: Role) -> bool {
    match role {
        Role::Producer => ring.control().shutdown_requested(),
        Role::Consumer => ring.control().shutdown_requested() && ring.available() == 0,
    }
}
