//! Runtime configuration presets.

use crate::transition::ExecutionClass;
use serde::{Deserialize, Serialize};

/// Configuration for a root runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Evaluate every non-cached component twice and fail on any difference.
    pub validate_evaluations: bool,
    /// Where listener and action events are dispatched before they enter the queue.
    pub event_dispatch: ExecutionClass,
    /// Evaluation passes one update may take before it is treated as runaway.
    pub max_passes_per_update: u32,
    /// Runtime name (for log and trace identification).
    pub name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl RuntimeConfig {
    /// Standard configuration for general use.
    pub fn standard() -> Self {
        Self {
            validate_evaluations: false,
            event_dispatch: ExecutionClass::Immediate,
            max_passes_per_update: 1_000,
            name: "weft".to_string(),
        }
    }

    /// Testing configuration: every evaluation is checked for idempotence.
    pub fn testing() -> Self {
        Self {
            validate_evaluations: true,
            event_dispatch: ExecutionClass::Immediate,
            max_passes_per_update: 100,
            name: "weft_test".to_string(),
        }
    }

    /// Set the runtime name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enable or disable evaluation validation.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_evaluations = validate;
        self
    }

    /// Set the execution class events are dispatched on.
    pub fn with_event_dispatch(mut self, class: ExecutionClass) -> Self {
        self.event_dispatch = class;
        self
    }

    /// Set the runaway-update pass limit.
    pub fn with_max_passes(mut self, max: u32) -> Self {
        self.max_passes_per_update = max.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert!(!RuntimeConfig::standard().validate_evaluations);
        assert!(RuntimeConfig::testing().validate_evaluations);
        assert_eq!(RuntimeConfig::default(), RuntimeConfig::standard());
    }

    #[test]
    fn test_builders() {
        let config = RuntimeConfig::standard()
            .with_name("checkout")
            .with_validation(true)
            .with_event_dispatch(ExecutionClass::Background)
            .with_max_passes(0);
        assert_eq!(config.name, "checkout");
        assert!(config.validate_evaluations);
        assert_eq!(config.event_dispatch, ExecutionClass::Background);
        assert_eq!(config.max_passes_per_update, 1);
    }

    #[test]
    fn test_serde_fills_missing_fields() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{ "validate_evaluations": true, "event_dispatch": "main" }"#)
                .unwrap();
        assert!(config.validate_evaluations);
        assert_eq!(config.event_dispatch, ExecutionClass::Main);
        assert_eq!(config.max_passes_per_update, 1_000);
        assert_eq!(config.name, "weft");

        let json = serde_json::to_string(&RuntimeConfig::testing()).unwrap();
        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RuntimeConfig::testing());
    }
}
