//! Keyed diff of declared actions and their start/stop lifecycle

use super::{action_error, ActionSnapshot, ActionStatus, Cancelable, StartAction};
use crate::component::ComponentKind;
use crate::engine::Engine;
use crate::error::panic_message;
use crate::inspect::TraceEvent;
use crate::key::{Key, KeyRound, Resolved};
use crate::listener::{CellControl, ListenerCell};
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

enum Status {
    Pending(Box<dyn StartAction>),
    /// Taken out for starting; no lock is held while it runs
    Starting,
    Running(Cancelable),
    Failed,
}

struct ActionEntry {
    cell: Arc<dyn Any + Send + Sync>,
    control: Arc<dyn CellControl>,
    status: Status,
}

/// Outcome of declaring an action key
pub(crate) enum Declared<E> {
    /// Already running (or pending) under this key
    Existing(Arc<ListenerCell<E>>),
    /// First declaration; the caller inserts the pending start
    New(Arc<ListenerCell<E>>),
}

/// An action taken out of the manager to be started
pub(crate) struct PendingStart {
    key: Resolved<Key>,
    control: Arc<dyn CellControl>,
    runner: Box<dyn StartAction>,
}

pub(crate) enum StartOutcome {
    Started {
        key: Resolved<Key>,
        control: Arc<dyn CellControl>,
        cancel: Cancelable,
    },
    Failed {
        key: Resolved<Key>,
    },
}

impl PendingStart {
    /// Run the start with no lock held. Failures are reported, never unwound.
    pub fn start(self, kind: ComponentKind, engine: &Engine) -> StartOutcome {
        let PendingStart {
            key,
            control,
            runner,
        } = self;
        let source = match catch_unwind(AssertUnwindSafe(move || runner.start())) {
            Ok(Ok(cancel)) => {
                tracing::debug!(kind = %kind, key = %key, "action started");
                engine.inspect(|| TraceEvent::ActionStarted {
                    kind,
                    key: key.clone(),
                });
                return StartOutcome::Started {
                    key,
                    control,
                    cancel,
                };
            }
            Ok(Err(err)) => err,
            Err(payload) => anyhow::anyhow!(panic_message(&*payload)),
        };
        control.disable();
        engine.report(action_error(kind, &key, source));
        StartOutcome::Failed { key }
    }
}

/// An action removed from the manager, waiting to be stopped
pub(crate) struct StoppingAction {
    key: Resolved<Key>,
    control: Arc<dyn CellControl>,
    status: Status,
}

impl StoppingAction {
    /// Run the cancellation hook once, then silence the emitter
    pub fn stop(self, kind: ComponentKind, engine: &Engine) {
        let StoppingAction {
            key,
            control,
            status,
        } = self;
        if let Status::Running(cancel) = status {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || cancel.cancel())) {
                engine.report(action_error(
                    kind,
                    &key,
                    anyhow::anyhow!(panic_message(&*payload)),
                ));
            }
            tracing::debug!(kind = %kind, key = %key, "action stopped");
            engine.inspect(|| TraceEvent::ActionStopped {
                kind,
                key: key.clone(),
            });
        }
        control.disable();
    }
}

/// Declared actions of one node, in declaration order
#[derive(Default)]
pub(crate) struct ActionManager {
    entries: FxIndexMap<Resolved<Key>, ActionEntry>,
    round: KeyRound<Key>,
    stopping: Vec<StoppingAction>,
}

impl ActionManager {
    pub fn begin_round(&mut self) {
        self.round.begin();
    }

    pub fn declare<E: Send + 'static>(
        &mut self,
        key: Key,
        create: impl FnOnce(Resolved<Key>) -> Arc<ListenerCell<E>>,
    ) -> Declared<E> {
        let id = self.round.resolve(key);
        if let Some(entry) = self.entries.get(&id) {
            match Arc::clone(&entry.cell).downcast::<ListenerCell<E>>() {
                Ok(cell) => return Declared::Existing(cell),
                Err(_) => {
                    // same key, different event type: a different action
                    if let Some(old) = self.entries.shift_remove(&id) {
                        self.stopping.push(StoppingAction {
                            key: id.clone(),
                            control: old.control,
                            status: old.status,
                        });
                    }
                }
            }
        }
        Declared::New(create(id))
    }

    pub fn insert_pending<E: Send + 'static>(
        &mut self,
        cell: Arc<ListenerCell<E>>,
        runner: Box<dyn StartAction>,
    ) {
        let id = cell.key().clone();
        let control: Arc<dyn CellControl> = cell.clone();
        let erased: Arc<dyn Any + Send + Sync> = cell;
        self.entries.insert(
            id,
            ActionEntry {
                cell: erased,
                control,
                status: Status::Pending(runner),
            },
        );
    }

    /// Move actions the latest evaluation did not declare to the stop list
    pub fn finish_round(&mut self) {
        let stale: Vec<Resolved<Key>> = self
            .entries
            .keys()
            .filter(|id| !self.round.contains(id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(entry) = self.entries.shift_remove(&id) {
                self.stopping.push(StoppingAction {
                    key: id,
                    control: entry.control,
                    status: entry.status,
                });
            }
        }
    }

    /// Resolved keys declared by the latest evaluation, in order
    pub fn declared(&self) -> Vec<Resolved<Key>> {
        self.round.declared().to_vec()
    }

    pub fn take_stopping(&mut self) -> Vec<StoppingAction> {
        std::mem::take(&mut self.stopping)
    }

    /// Take every not-yet-started action, in declaration order
    pub fn take_pending(&mut self) -> Vec<PendingStart> {
        let mut pending = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if let Status::Pending(_) = entry.status {
                if let Status::Pending(runner) = std::mem::replace(&mut entry.status, Status::Starting) {
                    pending.push(PendingStart {
                        key: id.clone(),
                        control: Arc::clone(&entry.control),
                        runner,
                    });
                }
            }
        }
        pending
    }

    /// Put back starts that were abandoned because the pass moved
    pub fn restore_pending(&mut self, rest: Vec<PendingStart>) {
        for start in rest {
            if let Some(entry) = self.entries.get_mut(&start.key) {
                if let Status::Starting = entry.status {
                    entry.status = Status::Pending(start.runner);
                }
            }
        }
    }

    /// Record a start. Returns the action to stop right away when its entry
    /// disappeared while it was starting.
    pub fn record(&mut self, outcome: StartOutcome) -> Option<StoppingAction> {
        match outcome {
            StartOutcome::Started {
                key,
                control,
                cancel,
            } => match self.entries.get_mut(&key) {
                Some(entry) if matches!(entry.status, Status::Starting) => {
                    entry.status = Status::Running(cancel);
                    None
                }
                _ => Some(StoppingAction {
                    key,
                    control,
                    status: Status::Running(cancel),
                }),
            },
            StartOutcome::Failed { key } => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.status = Status::Failed;
                }
                None
            }
        }
    }

    /// Remove everything for termination: live actions in declaration order,
    /// then ones already waiting to stop
    pub fn take_all(&mut self) -> Vec<StoppingAction> {
        let mut all: Vec<StoppingAction> = self
            .entries
            .drain(..)
            .map(|(key, entry)| StoppingAction {
                key,
                control: entry.control,
                status: entry.status,
            })
            .collect();
        all.append(&mut self.stopping);
        all
    }

    pub fn snapshot(&self) -> Vec<ActionSnapshot> {
        self.entries
            .iter()
            .map(|(key, entry)| ActionSnapshot {
                key: key.clone(),
                status: match entry.status {
                    Status::Pending(_) | Status::Starting => ActionStatus::Pending,
                    Status::Running(_) => ActionStatus::Running,
                    Status::Failed => ActionStatus::Failed,
                },
            })
            .collect()
    }
}
