//! Transitions and side effects
//!
//! A listener or action handler answers an event with a [`Transition`]: a
//! new state, a list of effects, both, or nothing. The engine commits the
//! state first and queues the effects afterwards, so an effect always
//! observes the state its transition produced.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Where an effect (or a dispatched event) runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionClass {
    /// On the thread that drains the update queue, before the pass completes
    #[default]
    Immediate,
    /// On the installed main dispatcher (inline when none is installed)
    Main,
    /// On the installed background dispatcher (inline when none is installed)
    Background,
}

/// A deferred side effect, executed exactly once after its transition commits
pub struct Effect {
    class: ExecutionClass,
    run: Box<dyn FnOnce() + Send>,
}

impl Effect {
    pub fn new(class: ExecutionClass, run: impl FnOnce() + Send + 'static) -> Self {
        Self {
            class,
            run: Box::new(run),
        }
    }

    pub fn immediate(run: impl FnOnce() + Send + 'static) -> Self {
        Self::new(ExecutionClass::Immediate, run)
    }

    pub fn main(run: impl FnOnce() + Send + 'static) -> Self {
        Self::new(ExecutionClass::Main, run)
    }

    pub fn background(run: impl FnOnce() + Send + 'static) -> Self {
        Self::new(ExecutionClass::Background, run)
    }

    pub fn class(&self) -> ExecutionClass {
        self.class
    }

    pub(crate) fn into_parts(self) -> (ExecutionClass, Box<dyn FnOnce() + Send>) {
        (self.class, self.run)
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect").field("class", &self.class).finish()
    }
}

/// Effects in the order they were produced
pub type Effects = SmallVec<[Effect; 2]>;

/// Shape of a transition, for tracing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    None,
    Stateful,
    OnlyEffects,
}

/// Result of handling one event
#[must_use = "a transition does nothing unless returned to the engine"]
pub enum Transition<S> {
    /// Nothing changes
    None,
    /// A new state, then the given effects
    Stateful { state: S, effects: Effects },
    /// Effects only; the state is untouched
    OnlyEffects(Effects),
}

impl<S> Default for Transition<S> {
    fn default() -> Self {
        Transition::None
    }
}

impl<S> Transition<S> {
    pub fn none() -> Self {
        Transition::None
    }

    /// Move to `state` with no effects
    pub fn to(state: S) -> Self {
        Transition::Stateful {
            state,
            effects: Effects::new(),
        }
    }

    /// Move to `state`, then run `effect`
    pub fn to_with(state: S, effect: Effect) -> Self {
        let mut effects = Effects::new();
        effects.push(effect);
        Transition::Stateful { state, effects }
    }

    /// Run `effect` without changing state
    pub fn effect(effect: Effect) -> Self {
        let mut effects = Effects::new();
        effects.push(effect);
        Transition::OnlyEffects(effects)
    }

    /// Run `run` on the draining thread without changing state
    pub fn run(run: impl FnOnce() + Send + 'static) -> Self {
        Self::effect(Effect::immediate(run))
    }

    /// Append an effect after the ones already present
    pub fn with_effect(self, effect: Effect) -> Self {
        match self {
            Transition::None => Self::effect(effect),
            Transition::Stateful { state, mut effects } => {
                effects.push(effect);
                Transition::Stateful { state, effects }
            }
            Transition::OnlyEffects(mut effects) => {
                effects.push(effect);
                Transition::OnlyEffects(effects)
            }
        }
    }

    /// Combine with a transition that happens afterwards.
    ///
    /// The later state wins; effects keep their order (this one's first).
    pub fn merge(self, next: Transition<S>) -> Self {
        match (self, next) {
            (Transition::None, next) => next,
            (this, Transition::None) => this,
            (
                Transition::Stateful { mut effects, .. },
                Transition::Stateful {
                    state,
                    effects: more,
                },
            ) => {
                effects.extend(more);
                Transition::Stateful { state, effects }
            }
            (Transition::Stateful { state, mut effects }, Transition::OnlyEffects(more)) => {
                effects.extend(more);
                Transition::Stateful { state, effects }
            }
            (
                Transition::OnlyEffects(mut effects),
                Transition::Stateful {
                    state,
                    effects: more,
                },
            ) => {
                effects.extend(more);
                Transition::Stateful { state, effects }
            }
            (Transition::OnlyEffects(mut effects), Transition::OnlyEffects(more)) => {
                effects.extend(more);
                Transition::OnlyEffects(effects)
            }
        }
    }

    /// Chain a transition computed from the state this one leads to
    /// (or `current` when this one does not change state).
    pub fn and_then(self, current: &S, f: impl FnOnce(&S) -> Transition<S>) -> Self {
        let next = match &self {
            Transition::Stateful { state, .. } => f(state),
            Transition::None | Transition::OnlyEffects(_) => f(current),
        };
        self.merge(next)
    }

    pub fn state(&self) -> Option<&S> {
        match self {
            Transition::Stateful { state, .. } => Some(state),
            Transition::None | Transition::OnlyEffects(_) => None,
        }
    }

    pub fn effects(&self) -> &[Effect] {
        match self {
            Transition::None => &[],
            Transition::Stateful { effects, .. } | Transition::OnlyEffects(effects) => effects.as_slice(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Transition::None)
    }

    pub fn kind(&self) -> TransitionKind {
        match self {
            Transition::None => TransitionKind::None,
            Transition::Stateful { .. } => TransitionKind::Stateful,
            Transition::OnlyEffects(_) => TransitionKind::OnlyEffects,
        }
    }

    pub(crate) fn into_parts(self) -> (Option<S>, Effects) {
        match self {
            Transition::None => (None, Effects::new()),
            Transition::Stateful { state, effects } => (Some(state), effects),
            Transition::OnlyEffects(effects) => (None, effects),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Transition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::None => f.write_str("None"),
            Transition::Stateful { state, effects } => f
                .debug_struct("Stateful")
                .field("state", state)
                .field("effects", &effects.len())
                .finish(),
            Transition::OnlyEffects(effects) => {
                f.debug_tuple("OnlyEffects").field(&effects.len()).finish()
            }
        }
    }
}
