//! Processing pass counter and phase tracking

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// What the runtime is currently doing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    Evaluating = 1,
    Committing = 2,
    ExecutingEffects = 3,
    Terminated = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::Idle,
            1 => Phase::Evaluating,
            2 => Phase::Committing,
            3 => Phase::ExecutingEffects,
            _ => Phase::Terminated,
        }
    }
}

/// Monotonic pass counter shared by every node of one runtime.
///
/// Any committed state transition advances the counter; a running pass that
/// sees the counter move abandons its remaining commit work and re-evaluates.
#[derive(Debug)]
pub struct ProcessingPass {
    counter: AtomicU64,
    phase: AtomicU8,
    applying: AtomicBool,
}

impl Default for ProcessingPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingPass {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            phase: AtomicU8::new(Phase::Idle as u8),
            applying: AtomicBool::new(false),
        }
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Record a committed state transition
    pub(crate) fn advance(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Move to `phase`. `Terminated` is absorbing.
    pub(crate) fn enter(&self, phase: Phase) {
        let _ = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != Phase::Terminated as u8).then_some(phase as u8)
            });
    }

    pub(crate) fn terminate(&self) {
        self.phase.store(Phase::Terminated as u8, Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.phase() == Phase::Terminated
    }

    pub(crate) fn is_applying(&self) -> bool {
        self.applying.load(Ordering::Acquire)
    }

    /// Mark a transition as being applied. `None` if one already is.
    pub(crate) fn begin_apply(&self) -> Option<ApplyGuard<'_>> {
        if self.applying.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(ApplyGuard { pass: self })
        }
    }
}

pub(crate) struct ApplyGuard<'a> {
    pass: &'a ProcessingPass,
}

impl Drop for ApplyGuard<'_> {
    fn drop(&mut self) {
        self.pass.applying.store(false, Ordering::Release);
    }
}
