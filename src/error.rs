//error.rs
//! Error types for the greystream engine

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for greystream operations
pub type Result<T> = std::result::Result<T, GreynetError>;

/// Main error type for greystream operations
#[derive(Debug, Error)]
pub enum GreynetError {
    #[error("Fact {type_name}#{id} already exists in the session")]
    DuplicateFact { type_name: String, id: i64 },

    #[error("Fact {type_name}#{id} not found in the session")]
    FactNotFound { type_name: String, id: i64 },

    #[error("Resource limit exceeded: {limit_type} - {details}")]
    ResourceLimit {
        limit_type: String,
        details: String,
    },

    #[error("Invalid tuple index: {reason}")]
    InvalidIndex { reason: String },

    #[error("Invalid tuple arity: expected {expected}, got {actual}")]
    InvalidArity { expected: usize, actual: usize },

    #[error("Type mismatch: expected {expected}, found {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Constraint building error: {details}")]
    ConstraintBuilder { details: String },

    #[error("Incompatible join arities: {left} + {right} exceeds the maximum tuple arity {max}")]
    IncompatibleJoinArity { left: usize, right: usize, max: usize },

    #[error("Node definition already has children; it must be shared before children attach")]
    ChildAttachedBeforeSharing,

    #[error("Constraint {0} is defined more than once")]
    DuplicateConstraint(String),

    #[error("Constraint {0} not found")]
    ConstraintNotFound(String),

    #[error("Constraint factory was already finalized by build()")]
    FactoryFinalized,

    #[error("Arithmetic overflow: {details}")]
    Overflow { details: String },

    #[error("Consistency check failed: {details}")]
    ConsistencyViolation { details: String },

    #[error("Score corruption: incremental score {incremental} differs from rebuilt score {rebuilt}")]
    ScoreCorruption { incremental: String, rebuilt: String },

    #[error("Session was poisoned by an earlier propagation failure and must be discarded")]
    SessionPoisoned,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Other(String),
}

impl GreynetError {
    pub fn duplicate_fact(type_name: impl Into<String>, id: i64) -> Self {
        Self::DuplicateFact {
            type_name: type_name.into(),
            id,
        }
    }

    pub fn fact_not_found(type_name: impl Into<String>, id: i64) -> Self {
        Self::FactNotFound {
            type_name: type_name.into(),
            id,
        }
    }

    pub fn resource_limit(limit_type: impl Into<String>, details: impl Into<String>) -> Self {
        Self::ResourceLimit {
            limit_type: limit_type.into(),
            details: details.into(),
        }
    }

    pub fn invalid_index(reason: impl Into<String>) -> Self {
        Self::InvalidIndex {
            reason: reason.into(),
        }
    }

    pub fn invalid_arity(expected: usize, actual: usize) -> Self {
        Self::InvalidArity { expected, actual }
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn constraint_builder_error(details: impl Into<String>) -> Self {
        Self::ConstraintBuilder {
            details: details.into(),
        }
    }

    pub fn overflow(details: impl Into<String>) -> Self {
        Self::Overflow {
            details: details.into(),
        }
    }

    pub fn consistency_violation(details: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            details: details.into(),
        }
    }

    /// Whether the session that produced this error can no longer be trusted.
    ///
    /// Lookup failures are detected before anything is mutated; everything else
    /// may have left a partial insert/retract pair behind.
    pub fn poisons_session(&self) -> bool {
        !matches!(
            self,
            Self::DuplicateFact { .. }
                | Self::FactNotFound { .. }
                | Self::ConstraintNotFound(_)
                | Self::SessionPoisoned
                | Self::Config(_)
        )
    }
}

impl From<String> for GreynetError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}

impl From<&str> for GreynetError {
    fn from(msg: &str) -> Self {
        Self::Other(msg.to_string())
    }
}
