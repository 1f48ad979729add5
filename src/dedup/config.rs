//! Deduplication configuration.

use std::time::Duration;

/// Configuration for the deduplication engine.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `FEEDGATE_DEDUP_ENABLED` | bool | `true` | Enable deduplication |
/// | `FEEDGATE_DEDUP_BULK_TTL_SECS` | u64 | `600` | Replay window for completed batches |
/// | `FEEDGATE_DEDUP_VOLATILE_FIELDS` | csv | see below | Fields ignored by fingerprints |
///
/// # Example
///
/// ```rust
/// use feedgate::dedup::DedupConfig;
/// use std::time::Duration;
///
/// let config = DedupConfig::default();
/// assert!(config.enabled);
/// assert_eq!(config.bulk_ttl, Duration::from_secs(600));
/// assert!(config.volatile_fields.iter().any(|f| f == "lastChecked"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupConfig {
    /// Enable/disable deduplication entirely.
    pub enabled: bool,

    /// How long a completed batch suppresses identical batches.
    pub bulk_ttl: Duration,

    /// Field names excluded from fingerprints at every nesting level.
    ///
    /// These carry observation metadata (poll timestamps) rather than content.
    pub volatile_fields: Vec<String>,

    /// Field names tried in order to find a record's external identifier.
    pub id_fields: Vec<String>,

    /// TTL for per-record snapshots. `None` uses the namespace default.
    pub snapshot_ttl: Option<Duration>,
}

const DEFAULT_VOLATILE_FIELDS: &[&str] = &[
    "lastChecked",
    "last_checked",
    "updatedAt",
    "updated_at",
    "lastUpdated",
    "last_updated",
    "fetchedAt",
    "fetched_at",
];

const DEFAULT_ID_FIELDS: &[&str] = &["id", "externalId", "external_id", "cameraId", "camera_id"];

impl DedupConfig {
    /// Creates a configuration from environment variables.
    ///
    /// Falls back to defaults for any unset variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("FEEDGATE_DEDUP_ENABLED") {
            self.enabled = v.to_lowercase() != "false" && v != "0";
        }
        if let Some(secs) = std::env::var("FEEDGATE_DEDUP_BULK_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.bulk_ttl = Duration::from_secs(secs);
        }
        if let Ok(v) = std::env::var("FEEDGATE_DEDUP_VOLATILE_FIELDS") {
            self.volatile_fields = split_csv(&v);
        }
        self
    }

    /// Builder method to set enabled state.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Builder method to set the batch replay window.
    #[must_use]
    pub const fn with_bulk_ttl(mut self, ttl: Duration) -> Self {
        self.bulk_ttl = ttl;
        self
    }

    /// Builder method to set the volatile fields.
    #[must_use]
    pub fn with_volatile_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.volatile_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set the identifier fields.
    #[must_use]
    pub fn with_id_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set the snapshot TTL.
    #[must_use]
    pub const fn with_snapshot_ttl(mut self, ttl: Duration) -> Self {
        self.snapshot_ttl = Some(ttl);
        self
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bulk_ttl: Duration::from_secs(600),
            volatile_fields: DEFAULT_VOLATILE_FIELDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            id_fields: DEFAULT_ID_FIELDS.iter().map(|s| (*s).to_string()).collect(),
            snapshot_ttl: None,
        }
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DedupConfig::default();
        assert!(config.enabled);
        assert_eq!(config.bulk_ttl, Duration::from_secs(600));
        assert_eq!(config.id_fields[0], "id");
        assert!(config.snapshot_ttl.is_none());
    }

    #[test]
    fn test_builder_methods() {
        let config = DedupConfig::default()
            .with_enabled(false)
            .with_bulk_ttl(Duration::from_secs(60))
            .with_volatile_fields(["polledAt"])
            .with_id_fields(["sensor"])
            .with_snapshot_ttl(Duration::from_secs(5));

        assert!(!config.enabled);
        assert_eq!(config.bulk_ttl, Duration::from_secs(60));
        assert_eq!(config.volatile_fields, vec!["polledAt".to_string()]);
        assert_eq!(config.id_fields, vec!["sensor".to_string()]);
        assert_eq!(config.snapshot_ttl, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_split_csv() {
        assert_eq!(split_csv(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_csv("").is_empty());
    }
}
