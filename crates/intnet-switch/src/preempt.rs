//! Restricted execution contexts.
//!
//! Callers that must not block or yield (the equivalent of running with
//! preemption disabled) hold a [`NoPreemptGuard`]. The switch then refuses to
//! yield on full receive rings and only hands frames to trunk directions that
//! declared they can transmit from such contexts.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Marks the current thread as non-preemptible until dropped. Guards nest.
#[derive(Debug)]
pub struct NoPreemptGuard {
    _not_send: PhantomData<*const ()>,
}

impl NoPreemptGuard {
    pub fn enter() -> Self {
        DEPTH.with(|d| d.set(d.get() + 1));
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for NoPreemptGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

pub fn preemption_enabled() -> bool {
    DEPTH.with(|d| d.get() == 0)
}
