use serde::{Deserialize, Serialize};

use crate::core::{OrmError, Result};

/// What `close()` does when writing back a dirty entity fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Attempt every dirty entity, clear the context, then report all
    /// failures together as `OrmError::Flush`.
    #[default]
    CollectErrors,
    /// Stop at the first failure and return it. Cached entities and their
    /// snapshots are kept and the context stays open, so `close()` may be
    /// retried.
    AbortOnFirst,
}

/// Behaviour knobs of a `PersistenceContext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub flush_policy: FlushPolicy,

    /// Treat an UPDATE that affects anything other than exactly one row as
    /// a flush failure.
    pub strict_update_count: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            flush_policy: FlushPolicy::default(),
            strict_update_count: true,
        }
    }
}

impl ContextConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    pub fn strict_update_count(mut self, strict: bool) -> Self {
        self.strict_update_count = strict;
        self
    }

    /// Parses a JSON document; missing keys take their defaults.
    ///
    /// ```
    /// # use entitymap::{ContextConfig, FlushPolicy};
    /// let config = ContextConfig::from_json(r#"{"flush_policy": "abort_on_first"}"#).unwrap();
    /// assert_eq!(config.flush_policy, FlushPolicy::AbortOnFirst);
    /// assert!(config.strict_update_count);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            OrmError::configuration("ContextConfig", format!("invalid JSON: {}", e))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            OrmError::configuration("ContextConfig", format!("cannot serialize: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert_eq!(config.flush_policy, FlushPolicy::CollectErrors);
        assert!(config.strict_update_count);
    }

    #[test]
    fn test_from_json_fills_missing_keys() {
        let config = ContextConfig::from_json(r#"{"strict_update_count": false}"#).unwrap();
        assert_eq!(config.flush_policy, FlushPolicy::CollectErrors);
        assert!(!config.strict_update_count);

        let round = ContextConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(round, config);
    }

    #[test]
    fn test_invalid_json_is_configuration_error() {
        let err = ContextConfig::from_json(r#"{"flush_policy": "sometimes"}"#).unwrap_err();
        assert!(err.is_configuration());
    }
}
