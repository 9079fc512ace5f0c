//resource_limits.rs
//! Resource limits guarding a session against unbounded growth

use serde::{Deserialize, Serialize};

use crate::error::{GreynetError, Result};

/// Resource limits to prevent unbounded growth and ensure system stability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ResourceLimits {
    /// Maximum number of live tuples across all nodes of a session
    pub max_tuples: usize,
    /// Maximum number of facts inserted into a session
    pub max_facts: usize,
    /// Maximum tuples drained by a single flush
    pub max_operations_per_flush: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_tuples: 10_000_000,
            max_facts: 1_000_000,
            max_operations_per_flush: 10_000_000,
        }
    }
}

impl ResourceLimits {
    /// Create conservative limits for small systems
    pub fn conservative() -> Self {
        Self {
            max_tuples: 100_000,
            max_facts: 50_000,
            max_operations_per_flush: 100_000,
        }
    }

    /// Create aggressive limits for high-performance systems
    pub fn aggressive() -> Self {
        Self {
            max_tuples: 100_000_000,
            max_facts: 10_000_000,
            max_operations_per_flush: 100_000_000,
        }
    }

    /// Check if tuple count would exceed limits
    pub fn check_tuple_limit(&self, current_tuples: usize) -> Result<()> {
        if current_tuples > self.max_tuples {
            return Err(GreynetError::resource_limit(
                "max_tuples",
                format!("Current: {}, Limit: {}", current_tuples, self.max_tuples),
            ));
        }
        Ok(())
    }

    pub fn check_fact_limit(&self, current_facts: usize) -> Result<()> {
        if current_facts > self.max_facts {
            return Err(GreynetError::resource_limit(
                "max_facts",
                format!("Current: {}, Limit: {}", current_facts, self.max_facts),
            ));
        }
        Ok(())
    }

    pub fn check_operation_limit(&self, current_ops: usize) -> Result<()> {
        if current_ops > self.max_operations_per_flush {
            return Err(GreynetError::resource_limit(
                "operations_per_flush",
                format!(
                    "Current: {}, Limit: {}",
                    current_ops, self.max_operations_per_flush
                ),
            ));
        }
        Ok(())
    }

    /// Returns the name of the first limit that is zero, if any.
    pub(crate) fn first_zero_limit(&self) -> Option<&'static str> {
        if self.max_tuples == 0 {
            Some("max_tuples")
        } else if self.max_facts == 0 {
            Some("max_facts")
        } else if self.max_operations_per_flush == 0 {
            Some("max_operations_per_flush")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_checks() {
        let limits = ResourceLimits::conservative();
        assert!(limits.check_tuple_limit(100_000).is_ok());
        assert!(limits.check_tuple_limit(100_001).is_err());
        assert!(limits.check_fact_limit(50_001).is_err());
        assert!(limits.first_zero_limit().is_none());
    }
}
