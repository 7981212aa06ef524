//! Serialized update queue
//!
//! All externally originating work (new inputs, listener invocations, action
//! events) enters the engine through an [`UpdateQueue`]. Any thread may post;
//! at most one thread drains at a time. The poster that finds the queue
//! unowned claims it with a single compare-and-swap and drains until empty,
//! so there is no dedicated engine thread.
//!
//! Posting from the draining thread itself (an effect sending a new input,
//! an action emitting synchronously on start) runs the update inline.

use crossbeam::queue::SegQueue;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// A unit of queued work
pub type Update = Box<dyn FnOnce() + Send>;

const UNOWNED: u64 = 0;

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(UNOWNED) };
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Token identifying the current thread, never `UNOWNED`
fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| {
        if token.get() == UNOWNED {
            token.set(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
        }
        token.get()
    })
}

/// FIFO of pending updates with single-owner draining
pub struct UpdateQueue {
    owner: AtomicU64,
    pending: SegQueue<Update>,
}

impl Default for UpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self {
            owner: AtomicU64::new(UNOWNED),
            pending: SegQueue::new(),
        }
    }

    /// Submit an update.
    ///
    /// Runs inline when called from the draining thread. Otherwise the update
    /// is appended, and the caller drains the queue if no other thread does.
    pub fn post(&self, update: impl FnOnce() + Send + 'static) {
        if self.is_owned_by_current_thread() {
            update();
            return;
        }
        self.pending.push(Box::new(update));
        self.drain();
    }

    /// Submit an update that never runs inline.
    ///
    /// On the draining thread it runs after the update in progress returns.
    pub fn defer(&self, update: impl FnOnce() + Send + 'static) {
        self.pending.push(Box::new(update));
        if !self.is_owned_by_current_thread() {
            self.drain();
        }
    }

    /// Whether the current thread is draining this queue
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == thread_token()
    }

    /// Number of updates waiting to be drained
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn drain(&self) {
        let me = thread_token();
        loop {
            if self
                .owner
                .compare_exchange(UNOWNED, me, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // the current owner will pick our update up
                return;
            }
            {
                let _owner = OwnerGuard { queue: self };
                while let Some(update) = self.pending.pop() {
                    update();
                }
            }
            // an update pushed between the last pop and the release has no owner
            if self.pending.is_empty() {
                return;
            }
        }
    }
}

/// Releases ownership, also when an update unwinds
struct OwnerGuard<'a> {
    queue: &'a UpdateQueue,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.queue.owner.store(UNOWNED, Ordering::Release);
    }
}
