//! Long-lived side-effecting processes declared during evaluation
//!
//! An action is declared by an evaluation, started once after the
//! evaluation commits, kept running for as long as later evaluations keep
//! declaring it under the same key, and stopped exactly once when they stop
//! (or when the declaring component terminates).
//!
//! ```ignore
//! ctx.action(Poll::every(Duration::from_secs(5)), |t, reading| {
//!     Transition::to(t.state().with_reading(reading))
//! });
//! ```

mod builtin;
mod lifecycle;

pub use builtin::{from_fn, ActionFn, OnData, OnStart, OnTerminate};
pub(crate) use lifecycle::{ActionManager, Declared, PendingStart, StoppingAction};

use crate::component::ComponentKind;
use crate::error::Result;
use crate::key::{Key, Resolved};
use crate::listener::ListenerCell;
use std::fmt;
use std::sync::Arc;

/// A long-lived process that emits events into its declaring component.
pub trait Action: Send + 'static {
    type Event: Send + 'static;

    /// Identity within the declaring component, combined with the declaration site.
    /// Two declarations with equal keys are the same running action.
    fn key(&self) -> Key {
        Key::Unit
    }

    /// Start the process. Events sent through `emitter` are applied as
    /// transitions of the declaring component. The returned hook runs once
    /// when the action is stopped.
    fn start(self, emitter: Emitter<Self::Event>) -> anyhow::Result<Cancelable>;
}

/// Cancellation hook returned by [`Action::start`]
pub struct Cancelable(Option<Box<dyn FnOnce() + Send>>);

impl Cancelable {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(cancel)))
    }

    /// Nothing to cancel
    pub fn noop() -> Self {
        Self(None)
    }

    pub(crate) fn cancel(mut self) {
        if let Some(cancel) = self.0.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Cancelable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cancelable").field(&self.0.is_some()).finish()
    }
}

/// Sends events from a running action into its component.
///
/// Cloneable and usable from any thread. Once the action is stopped every
/// send is a silent no-op.
pub struct Emitter<E> {
    cell: Arc<ListenerCell<E>>,
}

impl<E: Send + 'static> Emitter<E> {
    pub(crate) fn from_cell(cell: Arc<ListenerCell<E>>) -> Self {
        Self { cell }
    }

    /// Queue `event` for delivery.
    ///
    /// # Panics
    ///
    /// Panics when invoked from inside an evaluation or another transition
    /// on the queue-owning thread.
    pub fn send(&self, event: E) {
        if let Err(err) = self.try_send(event) {
            panic!("{err}");
        }
    }

    pub fn try_send(&self, event: E) -> Result<()> {
        self.cell.submit(event)
    }

    /// False once the action has been stopped
    pub fn is_active(&self) -> bool {
        self.cell.is_active()
    }

    pub fn key(&self) -> &Resolved<Key> {
        self.cell.key()
    }
}

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<E> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

/// Lifecycle status of a declared action, as seen in snapshots
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionStatus {
    /// Declared but not started yet
    Pending,
    Running,
    /// Start returned an error or panicked
    Failed,
}

/// A declared action in a [`NodeSnapshot`](crate::snapshot::NodeSnapshot)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionSnapshot {
    pub key: Resolved<Key>,
    pub status: ActionStatus,
}

/// Type-erased start of a declared action
pub(crate) trait StartAction: Send {
    fn start(self: Box<Self>) -> anyhow::Result<Cancelable>;
}

pub(crate) struct BoundAction<A: Action> {
    pub action: A,
    pub emitter: Emitter<A::Event>,
}

impl<A: Action> StartAction for BoundAction<A> {
    fn start(self: Box<Self>) -> anyhow::Result<Cancelable> {
        let BoundAction { action, emitter } = *self;
        action.start(emitter)
    }
}

/// Owner of a failing action, for error attribution
pub(crate) fn action_error(kind: ComponentKind, key: &Resolved<Key>, source: anyhow::Error) -> crate::error::EngineError {
    crate::error::EngineError::Action {
        kind,
        key: key.to_string(),
        source,
    }
}
