//! Per-instance component manager
//!
//! A [`ComponentManager`] owns one component instance: its current input
//! and state, the frame of its last evaluation, its children, its listener
//! cells and its actions.
//!
//! # Locking
//!
//! Node interiors are only touched on the queue-owning thread. The node lock
//! is held across an evaluation (user code there cannot trigger transitions)
//! but never while user code that may emit runs: action start and stop,
//! cancellation hooks and child termination all happen after the lock is
//! released. Failing to take the lock while applying a transition therefore
//! means a transition was applied from inside another one.

use crate::action::{ActionManager, PendingStart, StoppingAction};
use crate::children::{ChildNode, ChildrenRegistry};
use crate::component::{Component, ComponentKind};
use crate::context::{Context, TransitionContext};
use crate::engine::Engine;
use crate::error::{panic_message, EngineError};
use crate::frame::Frame;
use crate::inspect::TraceEvent;
use crate::key::{ChildId, Key, Resolved};
use crate::link::NodeLink;
use crate::listener::{ListenerRegistry, Origin};
use crate::snapshot::NodeSnapshot;
use crate::transition::Transition;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, panic_any, AssertUnwindSafe};
use std::sync::{Arc, Weak};

struct NodeInner<C: Component> {
    input: C::Input,
    state: C::State,
    frame: Option<Frame<C::Output>>,
    children: ChildrenRegistry,
    listeners: ListenerRegistry,
    actions: ActionManager,
}

pub(crate) struct ComponentManager<C: Component> {
    component: C,
    key: Option<ChildId>,
    this: Weak<Self>,
    link: Arc<NodeLink>,
    engine: Arc<Engine>,
    inner: Mutex<NodeInner<C>>,
}

/// Records the innermost component whose evaluation unwinds
struct FailureScope<'a> {
    engine: &'a Engine,
    kind: ComponentKind,
}

impl Drop for FailureScope<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.engine.note_failure(self.kind);
        }
    }
}

impl<C: Component> ComponentManager<C> {
    /// Create an instance. Runs `initial_state`; does not evaluate.
    pub fn new(
        component: C,
        input: C::Input,
        key: Option<ChildId>,
        parent: Option<&Arc<NodeLink>>,
        engine: &Arc<Engine>,
    ) -> Arc<Self> {
        let state = component.initial_state(&input);
        let link = match parent {
            Some(parent) => NodeLink::child(parent),
            None => NodeLink::root(),
        };
        tracing::debug!(kind = %C::KIND, key = ?key.as_ref().map(ToString::to_string), "component created");
        engine.inspect(|| TraceEvent::ComponentStarted {
            kind: C::KIND,
            key: key.clone(),
        });
        Arc::new_cyclic(|this| Self {
            component,
            key,
            this: this.clone(),
            link,
            engine: Arc::clone(engine),
            inner: Mutex::new(NodeInner {
                input,
                state,
                frame: None,
                children: ChildrenRegistry::default(),
                listeners: ListenerRegistry::default(),
                actions: ActionManager::default(),
            }),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.link.is_alive()
    }

    /// Whether the instance currently holds `input`
    pub fn has_input(&self, input: &C::Input) -> bool {
        self.inner.lock().input == *input
    }

    /// Produce the output for `input`, reusing the last frame when neither
    /// the input nor anything in this subtree changed.
    pub fn evaluate(&self, input: &C::Input) -> C::Output {
        let _scope = FailureScope {
            engine: &self.engine,
            kind: C::KIND,
        };
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(frame) = &inner.frame {
            if inner.input == *input && !self.link.is_invalidated() {
                tracing::trace!(kind = %C::KIND, "reusing frame");
                self.engine.inspect(|| TraceEvent::EvaluateFinished {
                    kind: C::KIND,
                    evaluated: false,
                });
                return frame.output.clone();
            }
        }

        self.engine
            .inspect(|| TraceEvent::EvaluateStarted { kind: C::KIND });
        if inner.input != *input {
            tracing::trace!(kind = %C::KIND, "input changed");
            self.engine
                .inspect(|| TraceEvent::InputChanged { kind: C::KIND });
            self.component
                .input_changed(&inner.input, input, &mut inner.state);
            inner.input = input.clone();
        }
        self.link.clear_invalidated();

        let generation = self.link.generation() + 1;
        let frame = self.run_evaluation(inner, generation, false);
        if self.engine.config.validate_evaluations {
            let second = self.run_evaluation(inner, generation, true);
            if let Some(diff) = frame.diff(&second) {
                panic_any(EngineError::Validation {
                    kind: C::KIND,
                    diff,
                });
            }
        }

        inner.children.finish_round();
        inner.listeners.finish_round();
        inner.actions.finish_round();
        let output = frame.output.clone();
        self.link.publish(frame.generation);
        inner.frame = Some(frame);

        self.engine.inspect(|| TraceEvent::EvaluateFinished {
            kind: C::KIND,
            evaluated: true,
        });
        output
    }

    fn run_evaluation(
        &self,
        inner: &mut NodeInner<C>,
        generation: u64,
        validating: bool,
    ) -> Frame<C::Output> {
        let NodeInner {
            input,
            state,
            children,
            listeners,
            actions,
            ..
        } = inner;
        children.begin_round();
        listeners.begin_round();
        actions.begin_round();

        let output = {
            let mut ctx = Context {
                input: &*input,
                state: &*state,
                manager: &self.this,
                link: &self.link,
                engine: &self.engine,
                children: &mut *children,
                listeners: &mut *listeners,
                actions: &mut *actions,
                generation,
                validating,
            };
            self.component.evaluate(&mut ctx)
        };

        Frame {
            output,
            actions: actions.declared(),
            children: children.declared(),
            generation,
        }
    }

    /// Apply an event's transition: commit state, then queue effects.
    ///
    /// Listener events never reach a terminated instance. Action events can,
    /// while the action is being stopped; for those only effects are kept.
    pub fn apply(
        &self,
        key: &Resolved<Key>,
        origin: Origin,
        handler: impl FnOnce(&TransitionContext<'_, C>) -> Transition<C::State>,
    ) {
        let alive = self.is_alive();
        if !alive && origin == Origin::Listener {
            tracing::trace!(kind = %C::KIND, key = %key, "dropping transition for terminated component");
            return;
        }
        let reentrant = || EngineError::ReentrantTransition {
            kind: C::KIND,
            key: key.to_string(),
        };
        let Some(applying) = self.engine.pass.begin_apply() else {
            panic_any(reentrant());
        };
        let Some(mut inner) = self.inner.try_lock() else {
            panic_any(reentrant());
        };

        let result = {
            let ctx = TransitionContext::new(&inner.input, &inner.state);
            catch_unwind(AssertUnwindSafe(|| handler(&ctx)))
        };
        let transition = match result {
            Ok(transition) => transition,
            Err(payload) => {
                drop(inner);
                drop(applying);
                self.engine.report(origin.error(
                    C::KIND,
                    key.to_string(),
                    anyhow::anyhow!(panic_message(&*payload)),
                ));
                return;
            }
        };

        let result = transition.kind();
        let (state, effects) = transition.into_parts();
        let stateful = alive && state.is_some();
        match state {
            Some(state) if alive => inner.state = state,
            Some(_) => {
                tracing::debug!(kind = %C::KIND, key = %key, "discarding state of terminated component")
            }
            None => {}
        }
        drop(inner);

        if stateful {
            self.link.invalidate();
            self.engine.pass.advance();
        }
        self.engine.enqueue_effects(C::KIND, effects);
        drop(applying);

        tracing::trace!(kind = %C::KIND, key = %key, result = ?result, "transition applied");
        self.engine.inspect(|| TraceEvent::Transition {
            kind: C::KIND,
            key: key.clone(),
            result,
        });
        self.engine.run();
    }

    fn stop_all(&self, actions: Vec<StoppingAction>) {
        for action in actions {
            action.stop(C::KIND, &self.engine);
        }
    }

    /// Start `pending` in order while the pass stays at `pass`
    fn start_pending(&self, pending: Vec<PendingStart>, pass: u64) -> bool {
        let mut pending = pending.into_iter();
        while let Some(start) = pending.next() {
            if self.engine.pass.current() != pass || !self.link.is_alive() {
                let rest: Vec<PendingStart> = std::iter::once(start).chain(pending).collect();
                tracing::debug!(kind = %C::KIND, deferred = rest.len(), "pass moved; deferring action starts");
                self.inner.lock().actions.restore_pending(rest);
                return false;
            }
            let outcome = start.start(C::KIND, &self.engine);
            let orphan = self.inner.lock().actions.record(outcome);
            if let Some(orphan) = orphan {
                orphan.stop(C::KIND, &self.engine);
            }
        }
        true
    }
}

impl<C: Component> ChildNode for ComponentManager<C> {
    fn kind(&self) -> ComponentKind {
        C::KIND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn terminate(&self) {
        if !self.link.mark_dead() {
            return;
        }
        let (children, actions) = {
            let mut inner = self.inner.lock();
            inner.listeners.clear();
            (inner.children.take_all(), inner.actions.take_all())
        };
        for child in children {
            child.terminate();
        }
        self.stop_all(actions);

        tracing::debug!(kind = %C::KIND, "component terminated");
        self.engine.inspect(|| TraceEvent::ComponentTerminated {
            kind: C::KIND,
            key: self.key.clone(),
        });
    }

    fn commit(&self, pass: u64) -> bool {
        if !self.link.is_alive() {
            return true;
        }
        let (detached, stopping, pending, children) = {
            let mut inner = self.inner.lock();
            (
                inner.children.take_detached(),
                inner.actions.take_stopping(),
                inner.actions.take_pending(),
                inner.children.live(),
            )
        };

        for child in detached {
            child.terminate();
        }
        self.stop_all(stopping);
        if !self.start_pending(pending, pass) {
            return false;
        }
        children
            .iter()
            .all(|child| self.engine.pass.current() == pass && child.commit(pass))
    }

    fn snapshot(&self) -> NodeSnapshot {
        let (actions, children) = {
            let inner = self.inner.lock();
            (inner.actions.snapshot(), inner.children.live())
        };
        NodeSnapshot {
            kind: C::KIND,
            key: self.key.clone(),
            actions,
            children: children.iter().map(|child| child.snapshot()).collect(),
        }
    }
}
