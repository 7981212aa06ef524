//! Error types for weft_core

use crate::component::ComponentKind;
use std::any::Any;
use thiserror::Error;

/// Errors raised or reported by the engine.
///
/// Recoverable errors (duplicate keys, failing actions, failing effects) are
/// routed to the error hooks and never unwind into evaluation. Usage errors
/// (stale or re-entrant transitions) are raised at the call site. Terminal
/// errors (evaluation panics, validation failures, runaway updates) are
/// reported once and tear the runtime down.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Two children resolved to the same key in one evaluation
    #[error("`{kind}` declared child `{child}` with duplicate key `{key}`; remapped to index {index}")]
    DuplicateChildKey {
        kind: ComponentKind,
        child: ComponentKind,
        key: String,
        index: u32,
    },

    /// An action failed to start, failed to stop, or its event handler panicked
    #[error("action `{key}` of `{kind}` failed: {source}")]
    Action {
        kind: ComponentKind,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A listener's transition handler panicked
    #[error("listener `{key}` of `{kind}` failed: {source}")]
    Transition {
        kind: ComponentKind,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// A committed effect panicked
    #[error("effect queued by `{kind}` failed: {source}")]
    Effect {
        kind: ComponentKind,
        #[source]
        source: anyhow::Error,
    },

    /// A listener was invoked after the evaluation that declared it was superseded
    #[error("listener `{key}` of `{kind}` is stale: the latest evaluation did not declare it")]
    StaleTransition { kind: ComponentKind, key: String },

    /// A listener was invoked synchronously from inside an evaluation
    #[error("listener `{key}` of `{kind}` was invoked while the tree is evaluating")]
    TransitionDuringEvaluation { kind: ComponentKind, key: String },

    /// A transition fired while another transition was being applied
    #[error("listener `{key}` of `{kind}` fired while another transition was being applied")]
    ReentrantTransition { kind: ComponentKind, key: String },

    /// Two component types share a kind tag under the same key
    #[error("kind `{kind}` is used by more than one component type (key `{key}`)")]
    KindConflict { kind: ComponentKind, key: String },

    /// Validation mode caught a non-idempotent evaluation
    #[error("evaluation of `{kind}` is not idempotent: {diff}")]
    Validation { kind: ComponentKind, diff: String },

    /// An evaluation panicked
    #[error("evaluation of `{kind}` panicked: {message}")]
    Evaluation { kind: ComponentKind, message: String },

    /// One update kept invalidating itself
    #[error("update of `{kind}` did not settle after {passes} evaluation passes")]
    RunawayUpdate { kind: ComponentKind, passes: u32 },
}

impl EngineError {
    /// The component the error is attributed to
    pub fn kind(&self) -> ComponentKind {
        match self {
            EngineError::DuplicateChildKey { kind, .. }
            | EngineError::Action { kind, .. }
            | EngineError::Transition { kind, .. }
            | EngineError::Effect { kind, .. }
            | EngineError::StaleTransition { kind, .. }
            | EngineError::TransitionDuringEvaluation { kind, .. }
            | EngineError::ReentrantTransition { kind, .. }
            | EngineError::KindConflict { kind, .. }
            | EngineError::Validation { kind, .. }
            | EngineError::Evaluation { kind, .. }
            | EngineError::RunawayUpdate { kind, .. } => *kind,
        }
    }

    /// Whether the runtime is torn down after this error
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineError::Validation { .. }
                | EngineError::Evaluation { .. }
                | EngineError::RunawayUpdate { .. }
                | EngineError::KindConflict { .. }
        )
    }
}

/// Result type for weft_core operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Render a panic payload as text
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(err) = payload.downcast_ref::<EngineError>() {
        err.to_string()
    } else {
        "non-string panic payload".to_string()
    }
}
