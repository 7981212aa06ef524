//! Evaluation and transition contexts
//!
//! [`Context`] is handed to [`Component::evaluate`]. It exposes the input and
//! the current state, and is the only way to declare listeners, children and
//! actions. Declarations that do not name a key are keyed by their call site,
//! so they must not move between evaluations (declare them unconditionally,
//! or give them an explicit key).
//!
//! [`TransitionContext`] is handed to transition closures when an event is
//! delivered. It sees the state current at delivery time, not the state of
//! the evaluation that declared the closure.

use crate::action::{
    Action, ActionManager, BoundAction, Declared, Emitter, OnData, OnStart, OnTerminate,
};
use crate::children::{ChildNode, ChildrenRegistry};
use crate::component::Component;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::key::{ChildKey, Key};
use crate::link::NodeLink;
use crate::listener::{CellRole, Listener, ListenerCell, ListenerRegistry, Origin, TransitionSink};
use crate::manager::ComponentManager;
use crate::transition::Transition;
use std::hash::Hash;
use std::panic::panic_any;
use std::sync::{Arc, Weak};

/// Snapshot of one component during evaluation
pub struct Context<'a, C: Component> {
    pub(crate) input: &'a C::Input,
    pub(crate) state: &'a C::State,
    pub(crate) manager: &'a Weak<ComponentManager<C>>,
    pub(crate) link: &'a Arc<NodeLink>,
    pub(crate) engine: &'a Arc<Engine>,
    pub(crate) children: &'a mut ChildrenRegistry,
    pub(crate) listeners: &'a mut ListenerRegistry,
    pub(crate) actions: &'a mut ActionManager,
    pub(crate) generation: u64,
    pub(crate) validating: bool,
}

impl<'a, C: Component> Context<'a, C> {
    pub fn input(&self) -> &'a C::Input {
        self.input
    }

    pub fn state(&self) -> &'a C::State {
        self.state
    }

    /// Declare a listener keyed by its call site
    #[track_caller]
    pub fn listener<E, F>(&mut self, transition: F) -> Listener<E>
    where
        E: Send + 'static,
        F: Fn(&TransitionContext<'_, C>, E) -> Transition<C::State> + Send + Sync + 'static,
    {
        self.keyed_listener(Key::location(), transition)
    }

    /// Declare a listener under an explicit key
    pub fn keyed_listener<E, F>(&mut self, key: impl Into<Key>, transition: F) -> Listener<E>
    where
        E: Send + 'static,
        F: Fn(&TransitionContext<'_, C>, E) -> Transition<C::State> + Send + Sync + 'static,
    {
        let (link, engine) = (self.link, self.engine);
        let cell = self.listeners.declare::<E>(key.into(), |id| {
            ListenerCell::new(
                C::KIND,
                id,
                Arc::clone(link),
                Arc::clone(engine),
                CellRole::Listener,
            )
        });
        cell.repoint(
            Arc::new(TransitionSink {
                manager: self.manager.clone(),
                key: cell.key().clone(),
                origin: Origin::Listener,
                handler: transition,
            }),
            self.generation,
        );
        Listener::from_cell(cell)
    }

    /// Declare a child keyed by its call site and return its output
    #[track_caller]
    pub fn child<K: Component>(&mut self, component: K, input: K::Input) -> K::Output {
        self.keyed_child(Key::location(), component, input)
    }

    /// Declare a child under an explicit key and return its output.
    ///
    /// The instance is created on first declaration; later declarations
    /// under the same key reuse it and drop `component`.
    pub fn keyed_child<K: Component>(
        &mut self,
        key: impl Into<Key>,
        component: K,
        input: K::Input,
    ) -> K::Output {
        let resolved = self.children.resolve(ChildKey {
            kind: K::KIND,
            key: key.into(),
        });
        let id = resolved.id;
        if resolved.first_collision {
            self.engine.report(EngineError::DuplicateChildKey {
                kind: C::KIND,
                child: K::KIND,
                key: id.key.key.to_string(),
                index: id.index,
            });
        }

        let (link, engine) = (self.link, self.engine);
        let node = self.children.get_or_insert_with(&id, || {
            let node: Arc<dyn ChildNode> =
                ComponentManager::new(component, input.clone(), Some(id.clone()), Some(link), engine);
            node
        });
        let Some(child) = node.as_any().downcast_ref::<ComponentManager<K>>() else {
            panic_any(EngineError::KindConflict {
                kind: K::KIND,
                key: id.to_string(),
            });
        };

        if self.validating && !child.has_input(&input) {
            panic_any(EngineError::Validation {
                kind: C::KIND,
                diff: format!("child `{id}` received a different input on the second evaluation"),
            });
        }
        child.evaluate(&input)
    }

    /// Declare an action keyed by its call site and [`Action::key`]
    #[track_caller]
    pub fn action<A, F>(&mut self, action: A, on_event: F)
    where
        A: Action,
        F: Fn(&TransitionContext<'_, C>, A::Event) -> Transition<C::State> + Send + Sync + 'static,
    {
        self.declare_action(Key::location(), action, on_event);
    }

    /// Declare an action keyed by `key` and [`Action::key`]
    pub fn keyed_action<A, F>(&mut self, key: impl Into<Key>, action: A, on_event: F)
    where
        A: Action,
        F: Fn(&TransitionContext<'_, C>, A::Event) -> Transition<C::State> + Send + Sync + 'static,
    {
        self.declare_action(key.into(), action, on_event);
    }

    /// Transition once, when this declaration first starts
    #[track_caller]
    pub fn on_start<F>(&mut self, transition: F)
    where
        F: Fn(&TransitionContext<'_, C>) -> Transition<C::State> + Send + Sync + 'static,
    {
        self.action(OnStart, move |ctx, ()| transition(ctx));
    }

    /// Transition once, when this declaration is removed or the component terminates
    #[track_caller]
    pub fn on_terminate<F>(&mut self, transition: F)
    where
        F: Fn(&TransitionContext<'_, C>) -> Transition<C::State> + Send + Sync + 'static,
    {
        self.action(OnTerminate, move |ctx, ()| transition(ctx));
    }

    /// Transition with `data` whenever it changes
    #[track_caller]
    pub fn on_data<T, F>(&mut self, data: T, transition: F)
    where
        T: Hash + Send + 'static,
        F: Fn(&TransitionContext<'_, C>, T) -> Transition<C::State> + Send + Sync + 'static,
    {
        self.action(OnData::new(data), transition);
    }

    fn declare_action<A, F>(&mut self, scope: Key, action: A, on_event: F)
    where
        A: Action,
        F: Fn(&TransitionContext<'_, C>, A::Event) -> Transition<C::State> + Send + Sync + 'static,
    {
        let (link, engine) = (self.link, self.engine);
        let declared = self.actions.declare::<A::Event>(scope.pair(action.key()), |id| {
            ListenerCell::new(
                C::KIND,
                id,
                Arc::clone(link),
                Arc::clone(engine),
                CellRole::Action,
            )
        });
        let (cell, fresh) = match declared {
            Declared::Existing(cell) => (cell, false),
            Declared::New(cell) => (cell, true),
        };
        cell.repoint(
            Arc::new(TransitionSink {
                manager: self.manager.clone(),
                key: cell.key().clone(),
                origin: Origin::Action,
                handler: on_event,
            }),
            self.generation,
        );
        if fresh {
            let runner = Box::new(BoundAction {
                action,
                emitter: Emitter::from_cell(Arc::clone(&cell)),
            });
            self.actions.insert_pending(cell, runner);
        }
    }
}

/// The input and current state seen by a transition closure
pub struct TransitionContext<'a, C: Component> {
    input: &'a C::Input,
    state: &'a C::State,
}

impl<'a, C: Component> TransitionContext<'a, C> {
    pub(crate) fn new(input: &'a C::Input, state: &'a C::State) -> Self {
        Self { input, state }
    }

    pub fn input(&self) -> &'a C::Input {
        self.input
    }

    pub fn state(&self) -> &'a C::State {
        self.state
    }
}
