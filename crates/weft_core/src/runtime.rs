//! Weft Runtime
//!
//! The root runtime owns the root component instance, feeds it inputs,
//! drives processing passes and publishes outputs.
//!
//! ```ignore
//! let runtime = RootRuntime::builder(Counter)
//!     .config(RuntimeConfig::standard().with_name("counter"))
//!     .on_error(|err| eprintln!("{err}"))
//!     .build();
//!
//! let outputs = runtime.subscribe();
//! runtime.start();
//! let view = outputs.recv().unwrap();
//! view.increment.send(());
//! ```

use crate::children::ChildNode;
use crate::component::Component;
use crate::config::RuntimeConfig;
use crate::engine::{Driver, Engine, RuntimeHooks};
use crate::error::{panic_message, EngineError};
use crate::inspect::{Inspector, TraceEvent};
use crate::manager::ComponentManager;
use crate::pass::Phase;
use crate::snapshot::NodeSnapshot;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum RootSlot<C: Component> {
    /// No input yet
    Pending(C),
    Live(Arc<ComponentManager<C>>),
    Closed,
}

struct Outputs<O> {
    last: Option<O>,
    subscribers: Vec<Sender<O>>,
}

struct RuntimeCore<C: Component> {
    engine: Arc<Engine>,
    root: Mutex<RootSlot<C>>,
    /// Latest input not yet picked up by the queue
    pending_input: Mutex<Option<C::Input>>,
    input: Mutex<Option<C::Input>>,
    outputs: Mutex<Outputs<C::Output>>,
    running: AtomicBool,
    terminated: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<C: Component> RuntimeCore<C> {
    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn root(&self) -> Option<Arc<ComponentManager<C>>> {
        match &*self.root.lock() {
            RootSlot::Live(root) => Some(Arc::clone(root)),
            RootSlot::Pending(_) | RootSlot::Closed => None,
        }
    }

    /// Runs on the queue-owning thread
    fn apply_pending_input(&self) {
        let Some(input) = self.pending_input.lock().take() else {
            return;
        };
        if self.is_terminated() {
            return;
        }
        *self.input.lock() = Some(input);
        // a pass already running must not emit for the previous input
        self.engine.pass.advance();
        self.process();
    }

    fn evaluate_root(&self, input: &C::Input) -> Option<(Arc<ComponentManager<C>>, C::Output)> {
        let root = {
            let mut slot = self.root.lock();
            if let RootSlot::Pending(_) = &*slot {
                if let RootSlot::Pending(component) = std::mem::replace(&mut *slot, RootSlot::Closed) {
                    *slot = RootSlot::Live(ComponentManager::new(
                        component,
                        input.clone(),
                        None,
                        None,
                        &self.engine,
                    ));
                }
            }
            match &*slot {
                RootSlot::Live(root) => Arc::clone(root),
                RootSlot::Pending(_) | RootSlot::Closed => return None,
            }
        };
        let output = root.evaluate(input);
        Some((root, output))
    }

    fn evaluation_error(&self, payload: Box<dyn Any + Send>) -> EngineError {
        let failed = self.engine.take_failure();
        match payload.downcast::<EngineError>() {
            Ok(err) => *err,
            Err(payload) => EngineError::Evaluation {
                kind: failed.unwrap_or(C::KIND),
                message: panic_message(&*payload),
            },
        }
    }

    /// Submit runtime work. Inside an evaluation or a transition the node
    /// locks are held, so the work waits for the current update to finish.
    fn post(&self, job: impl FnOnce() + Send + 'static) {
        let pass = &self.engine.pass;
        if pass.is_applying() || pass.phase() == Phase::Evaluating {
            tracing::trace!(root = %C::KIND, "deferring runtime call made during an update");
            self.engine.queue.defer(job);
        } else {
            self.engine.queue.post(job);
        }
    }

    /// Evaluate, commit, run effects; repeat until a pass completes with no
    /// state change, then emit.
    fn process(&self) {
        if self.is_terminated() {
            return;
        }
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let _running = RunningGuard(&self.running);
        self.engine
            .inspect(|| TraceEvent::RunStarted { root: C::KIND });

        let limit = self.engine.config.max_passes_per_update;
        let mut passes = 0u32;
        loop {
            if self.is_terminated() {
                break;
            }
            let Some(input) = self.input.lock().clone() else {
                break;
            };
            if passes >= limit {
                self.fail(EngineError::RunawayUpdate {
                    kind: C::KIND,
                    passes,
                });
                break;
            }
            passes += 1;

            let pass = self.engine.pass.current();
            self.engine.pass.enter(Phase::Evaluating);
            let (root, output) =
                match catch_unwind(AssertUnwindSafe(|| self.evaluate_root(&input))) {
                    Ok(Some(evaluated)) => evaluated,
                    Ok(None) => break,
                    Err(payload) => {
                        let err = self.evaluation_error(payload);
                        self.fail(err);
                        break;
                    }
                };

            self.engine.pass.enter(Phase::Committing);
            if !root.commit(pass) || self.engine.pass.current() != pass {
                tracing::debug!(root = %C::KIND, pass, "state changed during commit; re-evaluating");
                continue;
            }

            self.engine.pass.enter(Phase::ExecutingEffects);
            let executed = self.engine.drain_effects();
            if executed > 0 {
                self.engine
                    .inspect(|| TraceEvent::EffectsExecuted { count: executed });
            }
            if self.engine.pass.current() != pass {
                tracing::debug!(root = %C::KIND, pass, "state changed during effects; re-evaluating");
                continue;
            }
            // effects queued by effects run in the next pass
            if self.engine.has_pending_effects() {
                continue;
            }

            if !self.is_terminated() {
                self.emit(output, pass);
            }
            break;
        }

        self.engine.pass.enter(Phase::Idle);
        self.engine
            .inspect(|| TraceEvent::RunFinished { root: C::KIND, passes });
    }

    fn emit(&self, output: C::Output, pass: u64) {
        {
            let mut outputs = self.outputs.lock();
            if outputs.last.as_ref() == Some(&output) {
                tracing::trace!(root = %C::KIND, "output unchanged");
                return;
            }
            outputs
                .subscribers
                .retain(|subscriber| subscriber.send(output.clone()).is_ok());
            outputs.last = Some(output);
        }
        tracing::trace!(root = %C::KIND, pass, "output emitted");
        self.engine
            .inspect(|| TraceEvent::OutputEmitted { root: C::KIND, pass });
    }

    fn fail(&self, err: EngineError) {
        self.engine.report(err);
        self.shutdown();
    }

    /// Tear the tree down exactly once
    fn shutdown(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.engine.pass.terminate();
        self.pending_input.lock().take();
        let slot = std::mem::replace(&mut *self.root.lock(), RootSlot::Closed);
        if let RootSlot::Live(root) = slot {
            root.terminate();
        }
        // effects of termination transitions still run, exactly once
        while self.engine.drain_effects() > 0 {}
        self.outputs.lock().subscribers.clear();
        tracing::debug!(runtime = %self.engine.config.name, root = %C::KIND, "runtime terminated");
    }
}

impl<C: Component> Driver for RuntimeCore<C> {
    fn run(&self) {
        self.process();
    }
}

/// Configures and builds a [`RootRuntime`]
pub struct RuntimeBuilder<C: Component> {
    component: C,
    config: RuntimeConfig,
    hooks: RuntimeHooks,
}

impl<C: Component> RuntimeBuilder<C> {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Handler for errors reported by this runtime
    pub fn on_error(mut self, handler: impl Fn(&EngineError) + Send + Sync + 'static) -> Self {
        self.hooks.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn inspector(mut self, inspector: impl Inspector + 'static) -> Self {
        self.hooks.inspector = Some(Arc::new(inspector));
        self
    }

    pub fn build(self) -> RootRuntime<C> {
        let engine = Engine::new(self.config, self.hooks);
        let core = Arc::new(RuntimeCore {
            engine: Arc::clone(&engine),
            root: Mutex::new(RootSlot::Pending(self.component)),
            pending_input: Mutex::new(None),
            input: Mutex::new(None),
            outputs: Mutex::new(Outputs {
                last: None,
                subscribers: Vec::new(),
            }),
            running: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        });
        let driver: Arc<dyn Driver> = core.clone();
        engine.bind_driver(Arc::downgrade(&driver));
        tracing::debug!(runtime = %engine.config.name, root = %C::KIND, "runtime created");
        RootRuntime { core }
    }
}

/// Entry point: owns the root component and drives the tree
pub struct RootRuntime<C: Component> {
    core: Arc<RuntimeCore<C>>,
}

impl<C: Component> RootRuntime<C> {
    pub fn new(component: C) -> Self {
        Self::builder(component).build()
    }

    pub fn builder(component: C) -> RuntimeBuilder<C> {
        RuntimeBuilder {
            component,
            config: RuntimeConfig::default(),
            hooks: RuntimeHooks::default(),
        }
    }

    /// Feed a new root input. Callable from any thread; inputs that arrive
    /// before the previous one is processed are conflated (latest wins).
    pub fn send_input(&self, input: C::Input) {
        let core = &self.core;
        if core.is_terminated() {
            tracing::debug!(root = %C::KIND, "input ignored: runtime terminated");
            return;
        }
        if core.pending_input.lock().replace(input).is_some() {
            tracing::trace!(root = %C::KIND, "input conflated");
            return;
        }
        let job = Arc::clone(core);
        core.post(move || job.apply_pending_input());
    }

    /// Stream of distinct outputs, starting with the current one if any.
    /// Ends when the runtime terminates.
    pub fn subscribe(&self) -> OutputStream<C::Output> {
        let (tx, rx) = channel::unbounded();
        let mut outputs = self.core.outputs.lock();
        if let Some(last) = &outputs.last {
            let _ = tx.send(last.clone());
        }
        if !self.core.is_terminated() {
            outputs.subscribers.push(tx);
        }
        OutputStream { rx }
    }

    pub fn last_output(&self) -> Option<C::Output> {
        self.core.outputs.lock().last.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.core.is_terminated()
    }

    /// Current processing pass counter
    pub fn pass(&self) -> u64 {
        self.core.engine.pass.current()
    }

    pub fn phase(&self) -> Phase {
        self.core.engine.pass.phase()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.core.engine.config
    }

    /// The live tree, or `None` before the first input and after termination
    pub fn snapshot(&self) -> Option<NodeSnapshot> {
        self.core.root().map(|root| root.snapshot())
    }

    /// Get statistics about the runtime
    pub fn stats(&self) -> RuntimeStats {
        let snapshot = self.snapshot();
        let (nodes, running_actions) = snapshot
            .as_ref()
            .map(|root| (root.node_count(), count_running(root)))
            .unwrap_or((0, 0));
        RuntimeStats {
            pass: self.pass(),
            phase: self.phase(),
            nodes,
            running_actions,
            queued_updates: self.core.engine.queue.len(),
        }
    }

    /// Terminate the tree: every component terminated, every action stopped.
    /// Idempotent; also runs on drop.
    pub fn terminate(&self) {
        let core = Arc::clone(&self.core);
        self.core.post(move || core.shutdown());
    }

    #[cfg(test)]
    pub(crate) fn queue(&self) -> &crate::queue::UpdateQueue {
        &self.core.engine.queue
    }
}

impl<C: Component<Input = ()>> RootRuntime<C> {
    /// Start a runtime whose root takes no input
    pub fn start(&self) {
        self.send_input(());
    }
}

impl<C: Component> Drop for RootRuntime<C> {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn count_running(node: &NodeSnapshot) -> usize {
    node.running_actions() + node.children.iter().map(count_running).sum::<usize>()
}

/// Statistics about the runtime
#[derive(Debug, Clone)]
pub struct RuntimeStats {
    pub pass: u64,
    pub phase: Phase,
    pub nodes: usize,
    pub running_actions: usize,
    pub queued_updates: usize,
}

/// Outputs published by a [`RootRuntime`]
pub struct OutputStream<O> {
    rx: Receiver<O>,
}

impl<O> OutputStream<O> {
    /// Block until the next output; `None` once the runtime terminated
    pub fn recv(&self) -> Option<O> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<O> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<O> {
        self.rx.try_recv().ok()
    }

    /// Every output received so far
    pub fn drain(&self) -> Vec<O> {
        self.rx.try_iter().collect()
    }
}

impl<O> Iterator for OutputStream<O> {
    type Item = O;

    fn next(&mut self) -> Option<O> {
        self.rx.recv().ok()
    }
}
