//! Configuration management.
//!
//! Configuration is layered: built-in defaults, then a TOML file, then
//! `FEEDGATE_*` environment variables.
//!
//! # File Format
//!
//! ```toml
//! sink_breaker = "database"
//!
//! [queue]
//! tick_interval_ms = 1000
//! max_retries = 3
//!
//! [dedup]
//! bulk_ttl_secs = 600
//! volatile_fields = ["lastChecked", "updatedAt"]
//!
//! [[cache.namespaces]]
//! name = "snapshots"
//! ttl_secs = 3600
//! max_entries = 50000
//!
//! [breakers.database]
//! failure_threshold = 5
//! reset_timeout_ms = 30000
//!
//! [logging]
//! format = "json"
//! filter = "feedgate=debug"
//!
//! [metrics]
//! enabled = true
//! port = 9090
//! ```

use crate::cache::{
    AGGREGATES_NAMESPACE, DEDUP_NAMESPACE, NamespaceConfig, RESULTS_NAMESPACE, SNAPSHOT_NAMESPACE,
};
use crate::dedup::DedupConfig;
use crate::observability::{LoggingConfig, MetricsConfig};
use crate::queue::QueueConfig;
use crate::resilience::{BreakerConfig, DATABASE_BREAKER};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for feedgate.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedgateConfig {
    /// Job queue settings.
    pub queue: QueueConfig,
    /// Deduplication settings.
    pub dedup: DedupConfig,
    /// Cache namespaces created at startup.
    pub namespaces: Vec<NamespaceConfig>,
    /// Circuit breakers created at startup.
    pub breakers: Vec<BreakerConfig>,
    /// Name of the breaker guarding sink calls; `None` disables it.
    pub sink_breaker: Option<String>,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Metrics settings.
    pub metrics: MetricsConfig,
}

impl Default for FeedgateConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            dedup: DedupConfig::default(),
            namespaces: default_namespaces(),
            breakers: BreakerConfig::defaults(),
            sink_breaker: Some(DATABASE_BREAKER.to_string()),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// The namespaces every pipeline needs, with their default policies.
#[must_use]
pub fn default_namespaces() -> Vec<NamespaceConfig> {
    vec![
        NamespaceConfig::new(DEDUP_NAMESPACE, Duration::from_secs(600), 10_000),
        NamespaceConfig::new(SNAPSHOT_NAMESPACE, Duration::from_secs(3600), 50_000),
        NamespaceConfig::new(RESULTS_NAMESPACE, Duration::from_secs(600), 1_000),
        NamespaceConfig::new(AGGREGATES_NAMESPACE, Duration::from_secs(300), 100),
    ]
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Breaker guarding sink calls; empty string disables it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sink_breaker: Option<String>,
    /// Queue section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueConfig>,
    /// Dedup section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup: Option<ConfigFileDedup>,
    /// Cache section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<ConfigFileCache>,
    /// Breakers keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub breakers: BTreeMap<String, ConfigFileBreaker>,
    /// Logging section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
    /// Metrics section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

/// Dedup section in config file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFileDedup {
    /// Enable deduplication.
    pub enabled: Option<bool>,
    /// Batch replay window in seconds.
    pub bulk_ttl_secs: Option<u64>,
    /// Snapshot TTL in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_ttl_secs: Option<u64>,
    /// Fields ignored by fingerprints.
    pub volatile_fields: Option<Vec<String>>,
    /// Fields holding record identifiers, in priority order.
    pub id_fields: Option<Vec<String>>,
}

/// Cache section in config file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFileCache {
    /// Namespaces; entries replace the default with the same name.
    #[serde(default)]
    pub namespaces: Vec<ConfigFileNamespace>,
}

/// One cache namespace in config file.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFileNamespace {
    /// Namespace name.
    pub name: String,
    /// Default TTL in seconds; 0 disables expiry.
    pub ttl_secs: u64,
    /// Capacity.
    pub max_entries: usize,
}

/// One breaker in config file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFileBreaker {
    /// Failures before opening.
    pub failure_threshold: Option<u32>,
    /// Open duration in milliseconds.
    pub reset_timeout_ms: Option<u64>,
}

impl FeedgateConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration: `path` if given, else the default location, then
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid config file.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/Library/Application Support/feedgate/` on macOS)
    /// 2. XDG config dir (`~/.config/feedgate/`)
    ///
    /// Returns default configuration if no readable config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        Self::default_paths()
            .into_iter()
            .filter(|path| path.exists())
            .find_map(|path| {
                Self::load_from_file(&path)
                    .inspect_err(|e| tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable config file"))
                    .ok()
            })
            .unwrap_or_default()
    }

    /// Candidate config file locations, in lookup order.
    #[must_use]
    pub fn default_paths() -> Vec<PathBuf> {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Vec::new();
        };
        let platform = base_dirs.config_dir().join("feedgate").join("config.toml");
        let xdg = base_dirs
            .home_dir()
            .join(".config")
            .join("feedgate")
            .join("config.toml");
        if platform == xdg {
            vec![platform]
        } else {
            vec![platform, xdg]
        }
    }

    /// Converts a `ConfigFile` to `FeedgateConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(name) = file.sink_breaker {
            config.sink_breaker = (!name.is_empty()).then_some(name);
        }
        if let Some(queue) = file.queue {
            config.queue = queue;
        }
        if let Some(dedup) = file.dedup {
            if let Some(v) = dedup.enabled {
                config.dedup.enabled = v;
            }
            if let Some(secs) = dedup.bulk_ttl_secs {
                config.dedup.bulk_ttl = Duration::from_secs(secs);
            }
            config.dedup.snapshot_ttl = dedup.snapshot_ttl_secs.map(Duration::from_secs);
            if let Some(fields) = dedup.volatile_fields {
                config.dedup.volatile_fields = fields;
            }
            if let Some(fields) = dedup.id_fields {
                config.dedup.id_fields = fields;
            }
        }
        if let Some(cache) = file.cache {
            for ns in cache.namespaces {
                let replacement =
                    NamespaceConfig::new(ns.name, Duration::from_secs(ns.ttl_secs), ns.max_entries);
                match config.namespaces.iter_mut().find(|c| c.name == replacement.name) {
                    Some(existing) => *existing = replacement,
                    None => config.namespaces.push(replacement),
                }
            }
        }
        for (name, entry) in file.breakers {
            let index = config
                .breakers
                .iter()
                .position(|b| b.name == name)
                .unwrap_or_else(|| {
                    config.breakers.push(BreakerConfig::new(name.clone(), 5, 30_000));
                    config.breakers.len() - 1
                });
            let breaker = &mut config.breakers[index];
            if let Some(v) = entry.failure_threshold {
                breaker.failure_threshold = v.max(1);
            }
            if let Some(v) = entry.reset_timeout_ms {
                breaker.reset_timeout_ms = v;
            }
        }
        if let Some(logging) = file.logging {
            config.logging = logging;
        }
        if let Some(metrics) = file.metrics {
            config.metrics = metrics;
        }

        config
    }

    /// Applies `FEEDGATE_*` environment overrides to every section.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.queue = self.queue.with_env_overrides();
        self.dedup = self.dedup.with_env_overrides();
        self.breakers = self
            .breakers
            .into_iter()
            .map(BreakerConfig::with_env_overrides)
            .collect();
        if let Ok(name) = std::env::var("FEEDGATE_SINK_BREAKER") {
            self.sink_breaker = (!name.is_empty()).then_some(name);
        }
        self.logging = self.logging.with_env_overrides();
        self.metrics = self.metrics.with_env_overrides();
        self
    }

    /// Renders the configuration in config file form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        let file = ConfigFile {
            sink_breaker: Some(self.sink_breaker.clone().unwrap_or_default()),
            queue: Some(self.queue.clone()),
            dedup: Some(ConfigFileDedup {
                enabled: Some(self.dedup.enabled),
                bulk_ttl_secs: Some(self.dedup.bulk_ttl.as_secs()),
                snapshot_ttl_secs: self.dedup.snapshot_ttl.map(|d| d.as_secs()),
                volatile_fields: Some(self.dedup.volatile_fields.clone()),
                id_fields: Some(self.dedup.id_fields.clone()),
            }),
            cache: Some(ConfigFileCache {
                namespaces: self
                    .namespaces
                    .iter()
                    .map(|ns| ConfigFileNamespace {
                        name: ns.name.clone(),
                        ttl_secs: ns.default_ttl.as_secs(),
                        max_entries: ns.max_entries,
                    })
                    .collect(),
            }),
            breakers: self
                .breakers
                .iter()
                .map(|b| {
                    (
                        b.name.clone(),
                        ConfigFileBreaker {
                            failure_threshold: Some(b.failure_threshold),
                            reset_timeout_ms: Some(b.reset_timeout_ms),
                        },
                    )
                })
                .collect(),
            logging: Some(self.logging.clone()),
            metrics: Some(self.metrics.clone()),
        };
        toml::to_string_pretty(&file).map_err(|e| Error::OperationFailed {
            operation: "serialize_config".to_string(),
            cause: e.to_string(),
        })
    }

    /// Sets the queue configuration.
    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Sets the dedup configuration.
    #[must_use]
    pub fn with_dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    /// Sets the breaker configurations.
    #[must_use]
    pub fn with_breakers(mut self, breakers: Vec<BreakerConfig>) -> Self {
        self.breakers = breakers;
        self
    }

    /// Sets the breaker guarding sink calls.
    #[must_use]
    pub fn with_sink_breaker(mut self, name: Option<&str>) -> Self {
        self.sink_breaker = name.map(ToString::to_string);
        self
    }
}
