//! Built-in actions

use super::{Action, Cancelable, Emitter};
use crate::key::Key;
use std::hash::Hash;
use std::marker::PhantomData;

/// Action built from a closure, see [`from_fn`]
pub struct ActionFn<E, F> {
    key: Key,
    start: F,
    _event: PhantomData<fn() -> E>,
}

/// Build an action from a key and a start closure.
///
/// ```ignore
/// ctx.action(
///     action::from_fn("ticker", |emitter| {
///         let handle = spawn_ticker(move || emitter.send(()));
///         Ok(Cancelable::new(move || handle.stop()))
///     }),
///     |t, ()| Transition::to(t.state() + 1),
/// );
/// ```
pub fn from_fn<E, F>(key: impl Into<Key>, start: F) -> ActionFn<E, F>
where
    E: Send + 'static,
    F: FnOnce(Emitter<E>) -> anyhow::Result<Cancelable> + Send + 'static,
{
    ActionFn {
        key: key.into(),
        start,
        _event: PhantomData,
    }
}

impl<E, F> Action for ActionFn<E, F>
where
    E: Send + 'static,
    F: FnOnce(Emitter<E>) -> anyhow::Result<Cancelable> + Send + 'static,
{
    type Event = E;

    fn key(&self) -> Key {
        self.key.clone()
    }

    fn start(self, emitter: Emitter<E>) -> anyhow::Result<Cancelable> {
        (self.start)(emitter)
    }
}

/// Emits once when started
#[derive(Clone, Copy, Debug, Default)]
pub struct OnStart;

impl Action for OnStart {
    type Event = ();

    fn start(self, emitter: Emitter<()>) -> anyhow::Result<Cancelable> {
        emitter.try_send(())?;
        Ok(Cancelable::noop())
    }
}

/// Emits once when stopped (removed from evaluation or component terminated)
#[derive(Clone, Copy, Debug, Default)]
pub struct OnTerminate;

impl Action for OnTerminate {
    type Event = ();

    fn start(self, emitter: Emitter<()>) -> anyhow::Result<Cancelable> {
        Ok(Cancelable::new(move || {
            if let Err(err) = emitter.try_send(()) {
                tracing::debug!(error = %err, "termination event not delivered");
            }
        }))
    }
}

/// Emits `data` when started. Keyed by the value, so new data restarts it.
#[derive(Clone, Debug)]
pub struct OnData<T> {
    data: T,
}

impl<T> OnData<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T> Action for OnData<T>
where
    T: Hash + Send + 'static,
{
    type Event = T;

    fn key(&self) -> Key {
        Key::hashed(&self.data)
    }

    fn start(self, emitter: Emitter<T>) -> anyhow::Result<Cancelable> {
        emitter.try_send(self.data)?;
        Ok(Cancelable::noop())
    }
}
