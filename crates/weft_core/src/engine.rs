//! State shared by every node of one runtime

use crate::component::ComponentKind;
use crate::config::RuntimeConfig;
use crate::dispatch;
use crate::error::{panic_message, EngineError};
use crate::inspect::{Inspector, TraceEvent};
use crate::pass::ProcessingPass;
use crate::plugins::{self, ErrorHandler};
use crate::queue::UpdateQueue;
use crate::transition::{Effect, Effects};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};

/// Drives a processing pass when a transition commits outside of one
pub(crate) trait Driver: Send + Sync {
    fn run(&self);
}

/// Hooks scoped to a single runtime
#[derive(Clone, Default)]
pub(crate) struct RuntimeHooks {
    pub error_handler: Option<ErrorHandler>,
    pub inspector: Option<Arc<dyn Inspector>>,
}

struct PendingEffect {
    kind: ComponentKind,
    effect: Effect,
}

pub(crate) struct Engine {
    pub queue: UpdateQueue,
    pub pass: ProcessingPass,
    pub config: RuntimeConfig,
    hooks: RuntimeHooks,
    effects: Mutex<VecDeque<PendingEffect>>,
    driver: OnceLock<Weak<dyn Driver>>,
    failed: Mutex<Option<ComponentKind>>,
}

impl Engine {
    pub fn new(config: RuntimeConfig, hooks: RuntimeHooks) -> Arc<Self> {
        Arc::new(Self {
            queue: UpdateQueue::new(),
            pass: ProcessingPass::new(),
            config,
            hooks,
            effects: Mutex::new(VecDeque::new()),
            driver: OnceLock::new(),
            failed: Mutex::new(None),
        })
    }

    pub fn bind_driver(&self, driver: Weak<dyn Driver>) {
        if self.driver.set(driver).is_err() {
            tracing::warn!(runtime = %self.config.name, "engine driver already bound");
        }
    }

    /// Process pending state, unless a pass is already running
    pub fn run(&self) {
        if let Some(driver) = self.driver.get().and_then(Weak::upgrade) {
            driver.run();
        }
    }

    pub fn enqueue_effects(&self, kind: ComponentKind, effects: Effects) {
        if effects.is_empty() {
            return;
        }
        let mut queue = self.effects.lock();
        queue.extend(effects.into_iter().map(|effect| PendingEffect { kind, effect }));
    }

    pub fn has_pending_effects(&self) -> bool {
        !self.effects.lock().is_empty()
    }

    /// Run the effects queued so far in commit order. Effects queued while
    /// these run are left for the next drain.
    pub fn drain_effects(self: &Arc<Self>) -> usize {
        let batch = std::mem::take(&mut *self.effects.lock());
        let mut executed = 0;
        for PendingEffect { kind, effect } in batch {
            let (class, run) = effect.into_parts();
            let engine = Arc::clone(self);
            dispatch::dispatch(
                class,
                Box::new(move || {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(run)) {
                        engine.report(EngineError::Effect {
                            kind,
                            source: anyhow::anyhow!(panic_message(&*payload)),
                        });
                    }
                }),
            );
            executed += 1;
        }
        executed
    }

    /// Send a listener or action event through the configured execution class
    pub fn dispatch_event(&self, job: impl FnOnce() + Send + 'static) {
        dispatch::dispatch(self.config.event_dispatch, Box::new(job));
    }

    /// Log `err` and hand it to the runtime and process-wide handlers
    pub fn report(&self, err: EngineError) {
        if err.is_terminal() {
            tracing::error!(runtime = %self.config.name, kind = %err.kind(), error = %err, "runtime failed");
        } else {
            tracing::warn!(runtime = %self.config.name, kind = %err.kind(), error = %err, "engine error");
        }
        if let Some(handler) = &self.hooks.error_handler {
            handler(&err);
        }
        if let Some(handler) = plugins::current_plugins().and_then(|p| p.error_handler.clone()) {
            handler(&err);
        }
    }

    /// Notify inspectors; the event is only built when one is installed
    pub fn inspect(&self, event: impl FnOnce() -> TraceEvent) {
        let global = plugins::current_plugins().and_then(|p| p.inspector.clone());
        if self.hooks.inspector.is_none() && global.is_none() {
            return;
        }
        let event = event();
        if let Some(inspector) = &self.hooks.inspector {
            inspector.on_event(&event);
        }
        if let Some(inspector) = global {
            inspector.on_event(&event);
        }
    }

    /// Remember the innermost component whose evaluation unwound
    pub fn note_failure(&self, kind: ComponentKind) {
        self.failed.lock().get_or_insert(kind);
    }

    pub fn take_failure(&self) -> Option<ComponentKind> {
        self.failed.lock().take()
    }
}
