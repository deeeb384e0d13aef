//! Configuration structures for strata collections.

use crate::{Result, StrataError};
use serde::{Deserialize, Serialize};

/// Configuration for a B-tree handle.
///
/// The order is a runtime parameter of the handle, not persisted with the
/// tree; every participant reading the same root must use the same order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Maximum number of children of an internal node. Minimum 3.
    pub order: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self { order: 128 }
    }
}

impl TreeConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.order < 3 {
            return Err(StrataError::InvalidParameter {
                name: "order".to_string(),
                value: self.order.to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration for the transaction driver of the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of attempts for one transaction closure before the
    /// driver gives up. Covers both restart signals and commit conflicts.
    pub max_attempts: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_attempts: 64 }
    }
}

impl StoreConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(StrataError::InvalidParameter {
                name: "max_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_config_defaults() {
        let config = TreeConfig::default();
        assert_eq!(config.order, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tree_config_minimum_order() {
        assert!(TreeConfig { order: 3 }.validate().is_ok());
        assert!(TreeConfig { order: 2 }.validate().is_err());
        assert!(TreeConfig { order: 0 }.validate().is_err());
    }

    #[test]
    fn test_tree_config_serde_roundtrip() {
        let original = TreeConfig { order: 7 };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: TreeConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_store_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.max_attempts, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_config_zero_attempts_rejected() {
        let config = StoreConfig { max_attempts: 0 };
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "invalid parameter: max_attempts = 0");
    }

    #[test]
    fn test_store_config_serde_roundtrip() {
        let original = StoreConfig { max_attempts: 8 };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StoreConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
