//! The evaluation contract implemented by user components.

use crate::context::Context;
use std::fmt;

/// Stable tag naming a component type.
///
/// Used for keying children and for attributing errors and trace events.
/// Tags must be unique per component type: two types sharing a tag under the
/// same key is reported as a kind conflict.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentKind(&'static str);

impl ComponentKind {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentKind({})", self.0)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A pure function from (Input, State) to Output plus declarations.
///
/// `evaluate` must be deterministic: given the same input and state it must
/// return an equal output and declare the same children and actions. It must
/// not mutate anything observable; state changes happen only through the
/// transitions returned by listeners and actions it declares.
///
/// ```ignore
/// struct Counter;
///
/// impl Component for Counter {
///     type Input = ();
///     type State = i32;
///     type Output = CounterView;
///
///     const KIND: ComponentKind = ComponentKind::new("counter");
///
///     fn initial_state(&self, _: &()) -> i32 {
///         0
///     }
///
///     fn evaluate(&self, ctx: &mut Context<'_, Self>) -> CounterView {
///         let count = *ctx.state();
///         CounterView {
///             count,
///             increment: ctx.listener(|t, ()| Transition::to(*t.state() + 1)),
///         }
///     }
/// }
/// ```
pub trait Component: Sized + Send + Sync + 'static {
    type Input: Clone + PartialEq + Send + 'static;
    type State: Send + 'static;
    type Output: Clone + PartialEq + Send + 'static;

    /// Tag identifying this component type
    const KIND: ComponentKind;

    /// State of a freshly created instance
    fn initial_state(&self, input: &Self::Input) -> Self::State;

    /// Called before re-evaluation when the parent passes a different input
    fn input_changed(
        &self,
        _previous: &Self::Input,
        _current: &Self::Input,
        _state: &mut Self::State,
    ) {
    }

    /// Produce the output and declare children, listeners, and actions
    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> Self::Output;
}
