//! Configuration for the cache framework
//!
//! One TOML file describes default cache settings, per-cache overrides,
//! historical access and logging:
//!
//! ```toml
//! [defaults]
//! max_entries = 50000
//! eviction_policy = "lru"
//!
//! [caches.TaxRules]
//! load_on_invalidate = true
//! compression_threshold = 64
//!
//! [historical]
//! enabled = true
//! ```

use crate::cache::EvictionPolicy;
use crate::historical::BucketGranularity;
use crate::monitoring::LoggingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Entry bound of one store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Unbounded,
    Bounded(usize),
}

/// Settings of one cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum resident keys; absent means unbounded
    pub max_entries: Option<usize>,
    /// Victim selection when over `max_entries`
    pub eviction_policy: EvictionPolicy,
    /// Entry lifetime for the `ttl` policy
    pub ttl_secs: Option<u64>,
    /// Reload invalidated keys immediately instead of on next access
    pub load_on_invalidate: bool,
    /// Minimum record count for an idle entry to be compressed; absent disables compression
    pub compression_threshold: Option<usize>,
    /// Idle time before an entry qualifies for compression
    pub compress_after_idle_secs: u64,
    /// Bucket width for historical stores
    pub bucket_granularity: BucketGranularity,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: None,
            eviction_policy: EvictionPolicy::Lru,
            ttl_secs: None,
            load_on_invalidate: false,
            compression_threshold: None,
            compress_after_idle_secs: 300,
            bucket_granularity: BucketGranularity::default(),
        }
    }
}

impl CacheSettings {
    pub fn capacity(&self) -> Capacity {
        match self.max_entries {
            Some(n) => Capacity::Bounded(n),
            None => Capacity::Unbounded,
        }
    }

    /// TTL applied to new entries; only the `ttl` policy expires entries
    pub fn entry_ttl(&self) -> Option<u64> {
        match self.eviction_policy {
            EvictionPolicy::Ttl => self.ttl_secs,
            _ => None,
        }
    }

    /// Validate one cache's settings
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.capacity() == Capacity::Bounded(0) {
            return Err(anyhow::anyhow!("Cache {}: max_entries cannot be 0", name));
        }

        if self.eviction_policy == EvictionPolicy::Ttl {
            match self.ttl_secs {
                None => {
                    return Err(anyhow::anyhow!(
                        "Cache {}: ttl policy requires ttl_secs",
                        name
                    ))
                }
                Some(0) => return Err(anyhow::anyhow!("Cache {}: ttl_secs cannot be 0", name)),
                Some(_) => {}
            }
        }

        if self.compression_threshold == Some(0) {
            return Err(anyhow::anyhow!(
                "Cache {}: compression_threshold cannot be 0",
                name
            ));
        }

        Ok(())
    }
}

/// Historical (past ticket date) access
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalSettings {
    /// Route requests with a past ticket date to historical stores
    pub enabled: bool,
}

/// Whole framework configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    /// Settings for caches without their own section
    pub defaults: CacheSettings,
    /// Per-cache sections; a section replaces `defaults` as a whole
    pub caches: HashMap<String, CacheSettings>,
    pub historical: HistoricalSettings,
    pub logging: LoggingConfig,
}

impl FrameworkConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: FrameworkConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        info!(
            path = %path.display(),
            caches = config.caches.len(),
            historical = config.historical.enabled,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Load from `path` when it exists, else built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                info!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.defaults.validate("defaults")?;
        for (name, settings) in &self.caches {
            settings.validate(name)?;
        }
        Ok(())
    }

    /// Effective settings of a cache
    pub fn settings_for(&self, name: &str) -> &CacheSettings {
        self.caches.get(name).unwrap_or(&self.defaults)
    }
}
