//! # Engine Configuration
//!
//! Execution limits and log sizing. All fields have defaults from
//! [`crate::primitives`], so a partial configuration file is valid.

use crate::primitives::{DEFAULT_LOG_CAPACITY, DEFAULT_MAX_CALL_DEPTH, DEFAULT_MAX_STEPS};
use crate::types::TesseraError;
use serde::{Deserialize, Serialize};

/// Budget applied to every sandbox call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Maximum nesting of script function calls.
    pub max_call_depth: usize,
    /// Maximum statements, loop iterations and calls per session call.
    pub max_steps: u64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: ExecutionLimits,
    /// Number of entries the evaluation log retains.
    pub log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: ExecutionLimits::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Reject zero limits.
    pub fn validate(&self) -> Result<(), TesseraError> {
        if self.limits.max_call_depth == 0 {
            return Err(TesseraError::ConfigError(
                "limits.max_call_depth must be at least 1".into(),
            ));
        }
        if self.limits.max_steps == 0 {
            return Err(TesseraError::ConfigError(
                "limits.max_steps must be at least 1".into(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(TesseraError::ConfigError(
                "log_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"limits":{"max_steps":10}}"#).expect("parse");
        assert_eq!(config.limits.max_steps, 10);
        assert_eq!(config.limits.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(config.log_capacity, DEFAULT_LOG_CAPACITY);
    }

    #[test]
    fn zero_limits_rejected() {
        let mut config = EngineConfig::default();
        config.limits.max_steps = 0;
        assert!(matches!(
            config.validate(),
            Err(TesseraError::ConfigError(_))
        ));
    }
}
