//! Session configuration.
//!
//! A [`SessionConfig`] controls how a [`Session`](crate::Session) propagates
//! changes, which self-checks it runs and how large it may grow. It can be
//! built in code or loaded from TOML:
//!
//! ```
//! use greystream::{EnvironmentMode, PropagationMode, SessionConfig};
//!
//! let config = SessionConfig::from_toml_str(r#"
//!     environment_mode = "full_assert"
//!     propagation = "immediate"
//!
//!     [limits]
//!     max_tuples = 50000
//! "#).unwrap();
//!
//! assert_eq!(config.environment_mode, EnvironmentMode::FullAssert);
//! assert_eq!(config.propagation, PropagationMode::Immediate);
//! assert_eq!(config.limits.max_tuples, 50_000);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resource_limits::ResourceLimits;

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Per-session configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SessionConfig {
    /// Self-checks performed on every score calculation.
    pub environment_mode: EnvironmentMode,

    /// When queued changes walk the network.
    pub propagation: PropagationMode,

    /// Growth limits.
    pub limits: ResourceLimits,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_file(path)
    }

    /// Loads configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(limit) = self.limits.first_zero_limit() {
            return Err(ConfigError::Invalid(format!("{} must be positive", limit)));
        }
        Ok(())
    }

    pub fn with_environment_mode(mut self, mode: EnvironmentMode) -> Self {
        self.environment_mode = mode;
        self
    }

    pub fn with_propagation(mut self, propagation: PropagationMode) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Self-check level of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentMode {
    /// No self-checks.
    #[default]
    Production,

    /// Checks internal bookkeeping after each score calculation.
    FastAssert,

    /// Additionally rebuilds the score from scratch and compares.
    FullAssert,
}

impl EnvironmentMode {
    pub fn is_asserted(self) -> bool {
        !matches!(self, EnvironmentMode::Production)
    }
}

/// When fact changes are pushed through the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationMode {
    /// Changes are queued until `flush` or `calculate_score`.
    #[default]
    Batched,

    /// Every insert, update and retract flushes before returning.
    Immediate,
}
