//! Execution-class dispatch for effects and events

use crate::error::panic_message;
use crate::plugins;
use crate::transition::ExecutionClass;
use crossbeam::channel::{self, Receiver, SendError, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A unit of work handed to a dispatcher
pub type Job = Box<dyn FnOnce() + Send>;

/// Runs jobs for one execution class
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job);
}

/// Runs every job on the calling thread
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Runs jobs one at a time, in dispatch order, on a named worker thread.
///
/// The worker exits once every clone of the dispatcher is dropped.
#[derive(Clone, Debug)]
pub struct ThreadDispatcher {
    name: String,
    jobs: Sender<Job>,
}

impl ThreadDispatcher {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (jobs, rx) = channel::unbounded::<Job>();
        let worker = name.clone();
        if let Err(err) = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(&worker, rx))
        {
            tracing::error!(dispatcher = %name, error = %err, "failed to spawn dispatch thread");
        }
        Self { name, jobs }
    }
}

fn run_worker(name: &str, jobs: Receiver<Job>) {
    for job in jobs {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
            tracing::error!(dispatcher = %name, error = %panic_message(&*payload), "dispatched job panicked");
        }
    }
    tracing::trace!(dispatcher = %name, "dispatch thread exiting");
}

impl Dispatcher for ThreadDispatcher {
    fn dispatch(&self, job: Job) {
        if let Err(SendError(job)) = self.jobs.send(job) {
            tracing::warn!(dispatcher = %self.name, "dispatch thread unavailable; running job inline");
            job();
        }
    }
}

/// Run `job` according to `class`, using the installed dispatchers
pub(crate) fn dispatch(class: ExecutionClass, job: Job) {
    let dispatcher = match class {
        ExecutionClass::Immediate => None,
        ExecutionClass::Main => plugins::current_plugins().and_then(|p| p.main_dispatcher.clone()),
        ExecutionClass::Background => {
            plugins::current_plugins().and_then(|p| p.background_dispatcher.clone())
        }
    };
    match dispatcher {
        Some(dispatcher) => dispatcher.dispatch(job),
        None => job(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;

    #[test]
    fn test_inline_dispatcher_runs_now() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        InlineDispatcher.dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_thread_dispatcher_names_thread() {
        let (tx, rx) = mpsc::channel();
        ThreadDispatcher::new("weft-bg").dispatch(Box::new(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        }));
        let name = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("weft-bg"));
    }

    #[test]
    fn test_thread_dispatcher_keeps_dispatch_order() {
        let (tx, rx) = mpsc::channel();
        let dispatcher = ThreadDispatcher::new("weft-bg");
        let slow = tx.clone();
        dispatcher.dispatch(Box::new(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            slow.send("first").unwrap();
        }));
        dispatcher.dispatch(Box::new(|| panic!("job failed")));
        dispatcher.dispatch(Box::new(move || tx.send("second").unwrap()));

        let timeout = std::time::Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "first");
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "second");
    }

    #[test]
    fn test_immediate_class_runs_inline() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        dispatch(
            ExecutionClass::Immediate,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
