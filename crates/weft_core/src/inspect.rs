//! Lifecycle tracing hooks

use crate::component::ComponentKind;
use crate::key::{ChildId, Key, Resolved};
use crate::transition::TransitionKind;

/// Something the engine did
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum TraceEvent {
    /// An update started processing
    RunStarted { root: ComponentKind },
    /// An update finished after `passes` evaluation passes
    RunFinished { root: ComponentKind, passes: u32 },
    ComponentStarted {
        kind: ComponentKind,
        key: Option<ChildId>,
    },
    ComponentTerminated {
        kind: ComponentKind,
        key: Option<ChildId>,
    },
    EvaluateStarted { kind: ComponentKind },
    /// `evaluated` is false when the cached frame was reused
    EvaluateFinished { kind: ComponentKind, evaluated: bool },
    InputChanged { kind: ComponentKind },
    ActionStarted {
        kind: ComponentKind,
        key: Resolved<Key>,
    },
    ActionStopped {
        kind: ComponentKind,
        key: Resolved<Key>,
    },
    Transition {
        kind: ComponentKind,
        key: Resolved<Key>,
        result: TransitionKind,
    },
    EffectsExecuted { count: usize },
    OutputEmitted { root: ComponentKind, pass: u64 },
}

/// Observer of engine lifecycle events
pub trait Inspector: Send + Sync {
    fn on_event(&self, event: &TraceEvent);
}

impl<F> Inspector for F
where
    F: Fn(&TraceEvent) + Send + Sync,
{
    fn on_event(&self, event: &TraceEvent) {
        self(event)
    }
}

/// Inspector that writes every event to `tracing`
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingInspector;

impl Inspector for TracingInspector {
    fn on_event(&self, event: &TraceEvent) {
        tracing::trace!(target: "weft_core::inspect", event = ?event, "engine event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_inspector() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let inspector: Arc<dyn Inspector> = Arc::new(move |event: &TraceEvent| {
            sink.lock().unwrap().push(event.clone());
        });

        let event = TraceEvent::EvaluateStarted {
            kind: ComponentKind::new("list"),
        };
        inspector.on_event(&event);
        TracingInspector.on_event(&event);

        assert_eq!(*seen.lock().unwrap(), vec![event]);
    }
}
