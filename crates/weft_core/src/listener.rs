//! Event listeners declared during evaluation
//!
//! A [`Listener`] is the handle a component hands out (usually inside its
//! output) so that events can reach it later. Each listener is backed by a
//! cell owned by the declaring node. Re-declaring the same key in the next
//! evaluation reuses the cell and repoints it at the new transition closure,
//! so the handle stays equal across evaluations and inputs carrying it stay
//! equal too.
//!
//! Events are never applied synchronously by the caller. `send` posts a
//! delivery job to the runtime's update queue; the job looks up the latest
//! closure, runs it against the current state and commits the transition.

use crate::component::{Component, ComponentKind};
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::key::{Key, KeyRound, Resolved};
use crate::link::NodeLink;
use crate::pass::Phase;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Receives delivered events on the queue-owning thread
pub(crate) trait EventSink<E>: Send + Sync {
    fn deliver(&self, event: E);
}

/// Type-erased control over a cell
pub(crate) trait CellControl: Send + Sync {
    fn disable(&self);
}

/// What a cell delivers for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CellRole {
    /// Rejects events once superseded; silent once the component terminates
    Listener,
    /// Never stale; live until the action is stopped
    Action,
}

pub(crate) struct ListenerCell<E> {
    kind: ComponentKind,
    key: Resolved<Key>,
    link: Arc<NodeLink>,
    engine: Arc<Engine>,
    role: CellRole,
    declared_in: AtomicU64,
    enabled: AtomicBool,
    sink: RwLock<Option<Arc<dyn EventSink<E>>>>,
}

impl<E: Send + 'static> ListenerCell<E> {
    pub fn new(
        kind: ComponentKind,
        key: Resolved<Key>,
        link: Arc<NodeLink>,
        engine: Arc<Engine>,
        role: CellRole,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            key,
            link,
            engine,
            role,
            declared_in: AtomicU64::new(0),
            enabled: AtomicBool::new(true),
            sink: RwLock::new(None),
        })
    }

    pub fn key(&self) -> &Resolved<Key> {
        &self.key
    }

    /// Point at the closure declared by the evaluation of `generation`
    pub fn repoint(&self, sink: Arc<dyn EventSink<E>>, generation: u64) {
        *self.sink.write() = Some(sink);
        self.declared_in.store(generation, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
            && (self.role == CellRole::Action || self.link.is_alive())
    }

    fn is_stale(&self) -> bool {
        self.role == CellRole::Listener
            && self.declared_in.load(Ordering::Acquire) < self.link.generation()
    }

    fn error(&self, make: impl FnOnce(ComponentKind, String) -> EngineError) -> EngineError {
        make(self.kind, self.key.to_string())
    }

    pub fn submit(self: &Arc<Self>, event: E) -> Result<()> {
        if !self.is_active() {
            tracing::trace!(kind = %self.kind, key = %self.key, "dropping event for inactive listener");
            return Ok(());
        }
        if self.is_stale() {
            return Err(self.error(|kind, key| EngineError::StaleTransition { kind, key }));
        }
        if self.engine.queue.is_owned_by_current_thread() {
            if self.engine.pass.phase() == Phase::Evaluating {
                return Err(
                    self.error(|kind, key| EngineError::TransitionDuringEvaluation { kind, key })
                );
            }
            if self.engine.pass.is_applying() {
                return Err(self.error(|kind, key| EngineError::ReentrantTransition { kind, key }));
            }
        }

        let cell = Arc::clone(self);
        let engine = Arc::clone(&self.engine);
        self.engine
            .dispatch_event(move || engine.queue.post(move || cell.deliver(event)));
        Ok(())
    }

    fn deliver(&self, event: E) {
        if !self.is_active() {
            tracing::trace!(kind = %self.kind, key = %self.key, "dropping event for inactive listener");
            return;
        }
        if self.is_stale() {
            tracing::debug!(kind = %self.kind, key = %self.key, "dropping event that went stale in the queue");
            return;
        }
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            sink.deliver(event);
        }
    }
}

impl<E: Send + 'static> CellControl for ListenerCell<E> {
    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }
}

/// Handle to a transition declared with `Context::listener`.
///
/// Cheap to clone. Two handles are equal when they refer to the same
/// declaration of the same component instance.
pub struct Listener<E> {
    cell: Arc<ListenerCell<E>>,
}

impl<E: Send + 'static> Listener<E> {
    pub(crate) fn from_cell(cell: Arc<ListenerCell<E>>) -> Self {
        Self { cell }
    }

    /// Queue `event` for delivery.
    ///
    /// # Panics
    ///
    /// Panics when the listener is stale or is invoked from inside an
    /// evaluation or another transition. Use [`Listener::try_send`] to get
    /// these as errors instead.
    pub fn send(&self, event: E) {
        if let Err(err) = self.try_send(event) {
            panic!("{err}");
        }
    }

    /// Queue `event` for delivery. Events for terminated components are
    /// dropped and return `Ok`.
    pub fn try_send(&self, event: E) -> Result<()> {
        self.cell.submit(event)
    }

    pub fn kind(&self) -> ComponentKind {
        self.cell.kind
    }

    pub fn key(&self) -> &Resolved<Key> {
        self.cell.key()
    }

    /// Whether the declaring component is still alive
    pub fn is_active(&self) -> bool {
        self.cell.is_active()
    }
}

impl<E> Clone for Listener<E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<E> PartialEq for Listener<E> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<E> Eq for Listener<E> {}

impl<E> fmt::Debug for Listener<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({}:{})", self.cell.kind, self.cell.key)
    }
}

/// Where a transition came from, for error attribution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Origin {
    Listener,
    Action,
}

impl Origin {
    pub fn error(self, kind: ComponentKind, key: String, source: anyhow::Error) -> EngineError {
        match self {
            Origin::Listener => EngineError::Transition { kind, key, source },
            Origin::Action => EngineError::Action { kind, key, source },
        }
    }
}

/// Delivers events to a node's transition closure
pub(crate) struct TransitionSink<C: Component, F> {
    pub manager: std::sync::Weak<crate::manager::ComponentManager<C>>,
    pub key: Resolved<Key>,
    pub origin: Origin,
    pub handler: F,
}

impl<C, E, F> EventSink<E> for TransitionSink<C, F>
where
    C: Component,
    F: Fn(&crate::context::TransitionContext<'_, C>, E) -> crate::transition::Transition<C::State>
        + Send
        + Sync,
{
    fn deliver(&self, event: E) {
        if let Some(manager) = self.manager.upgrade() {
            manager.apply(&self.key, self.origin, |ctx| (self.handler)(ctx, event));
        }
    }
}

/// Listener cells of one node, keyed by resolved declaration key
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    cells: FxHashMap<Resolved<Key>, Arc<dyn Any + Send + Sync>>,
    round: KeyRound<Key>,
}

impl ListenerRegistry {
    pub fn begin_round(&mut self) {
        self.round.begin();
    }

    /// Get the cell for `key`, creating it on first declaration
    pub fn declare<E: Send + 'static>(
        &mut self,
        key: Key,
        create: impl FnOnce(Resolved<Key>) -> Arc<ListenerCell<E>>,
    ) -> Arc<ListenerCell<E>> {
        let id = self.round.resolve(key);
        if let Some(existing) = self.cells.get(&id) {
            if let Ok(cell) = Arc::clone(existing).downcast::<ListenerCell<E>>() {
                return cell;
            }
        }
        let cell = create(id.clone());
        let erased: Arc<dyn Any + Send + Sync> = cell.clone();
        self.cells.insert(id, erased);
        cell
    }

    /// Forget cells the latest evaluation did not declare
    pub fn finish_round(&mut self) {
        let round = &self.round;
        self.cells.retain(|id, _| round.contains(id));
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}
