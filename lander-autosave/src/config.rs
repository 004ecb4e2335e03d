//! Engine configuration.
//!
//! Every struct deserializes with `#[serde(default)]`, so a host can supply
//! a partial JSON object and get defaults for the rest.

use serde::{Deserialize, Serialize};

use crate::conflict::ResolutionStrategy;
use crate::error::EngineError;

/// When and how drafts are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoSaveConfig {
    /// Master switch for opportunistic saves. `force_save` ignores it.
    pub enabled: bool,
    /// Quiet period after the last trigger before a debounced save fires.
    pub debounce_ms: u64,
    /// Periodic dirty check. Default: 1s.
    pub tick_interval_ms: u64,
    /// Maximum queued change events kept for the save audit trail.
    pub max_queue_size: usize,
    /// First retry delay after a failed save.
    pub backoff_base_ms: u64,
    /// Retry delay ceiling.
    pub backoff_max_ms: u64,
    /// Ask the gateway for the remote draft before saving queued changes.
    pub check_remote_before_save: bool,
    /// Record a user snapshot after every successful `force_save`.
    pub snapshot_on_manual_save: bool,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 500,
            tick_interval_ms: 1000,
            max_queue_size: 100,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            check_remote_before_save: true,
            snapshot_on_manual_save: true,
        }
    }
}

/// Snapshot history limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    pub max_snapshots: usize,
    /// Auto-snapshot after this many recorded changes.
    pub auto_snapshot_interval: usize,
    pub enable_compression: bool,
    /// Snapshots older than this are stored compressed. Default: 30 minutes.
    pub compress_after_ms: u64,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 50,
            auto_snapshot_interval: 5,
            enable_compression: true,
            compress_after_ms: 30 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    /// Strategy applied as soon as a conflict is detected. `None` leaves
    /// conflicts for the host to resolve and blocks saving meanwhile.
    pub auto_strategy: Option<ResolutionStrategy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub auto_save: AutoSaveConfig,
    pub versioning: VersionConfig,
    pub conflict: ConflictConfig,
}

impl EngineConfig {
    /// Config for testing (short timers, tiny history).
    pub fn for_testing() -> Self {
        Self {
            auto_save: AutoSaveConfig {
                debounce_ms: 50,
                tick_interval_ms: 100,
                backoff_base_ms: 100,
                backoff_max_ms: 800,
                ..AutoSaveConfig::default()
            },
            versioning: VersionConfig {
                max_snapshots: 10,
                auto_snapshot_interval: 1,
                ..VersionConfig::default()
            },
            conflict: ConflictConfig::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Validation(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: &str| Err(EngineError::Validation(msg.to_string()));
        // Conflict resolution pushes two snapshots and must stay undoable.
        if self.versioning.max_snapshots < 2 {
            return invalid("max_snapshots must be at least 2");
        }
        if self.versioning.auto_snapshot_interval == 0 {
            return invalid("auto_snapshot_interval must be at least 1");
        }
        if self.auto_save.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be at least 1");
        }
        if self.auto_save.backoff_max_ms < self.auto_save.backoff_base_ms {
            return invalid("backoff_max_ms must not be below backoff_base_ms");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_observed_behaviour() {
        let config = EngineConfig::default();
        assert_eq!(config.versioning.auto_snapshot_interval, 5);
        assert_eq!(config.versioning.max_snapshots, 50);
        assert_eq!(config.auto_save.tick_interval_ms, 1000);
        assert!(config.conflict.auto_strategy.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"versioning": {"max_snapshots": 3}, "conflict": {"auto_strategy": "server-wins"}}"#,
        )
        .unwrap();
        assert_eq!(config.versioning.max_snapshots, 3);
        assert_eq!(config.versioning.auto_snapshot_interval, 5);
        assert_eq!(config.auto_save, AutoSaveConfig::default());
        assert_eq!(
            config.conflict.auto_strategy,
            Some(ResolutionStrategy::ServerWins)
        );
    }

    #[test]
    fn test_rejects_zero_history() {
        let err = EngineConfig::from_json_str(r#"{"versioning": {"max_snapshots": 0}}"#);
        assert!(matches!(err, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_rejects_single_snapshot_history() {
        let mut config = EngineConfig::default();
        config.versioning.max_snapshots = 1;
        assert!(matches!(config.validate(), Err(EngineError::Validation(_))));
        config.versioning.max_snapshots = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let mut config = EngineConfig::default();
        config.auto_save.backoff_max_ms = 10;
        assert!(config.validate().is_err());
    }
}
