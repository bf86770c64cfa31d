//! Structured logging system with tracing
//!
//! Provides configurable logging with JSON output and slow load logging

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Keep only this many slow loads in memory
const MAX_SLOW_LOADS: usize = 1000;

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub level: String,

    /// Enable JSON format output
    pub json_format: bool,

    /// Enable slow load logging
    pub slow_load_logging: bool,

    /// Slow load threshold in milliseconds
    pub slow_load_threshold_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            json_format: false,
            slow_load_logging: true,
            slow_load_threshold_ms: 100,
        }
    }
}

impl LoggingConfig {
    /// Parse log level from string
    pub fn parse_level(&self) -> Level {
        match self.level.to_uppercase().as_str() {
            "ERROR" => Level::ERROR,
            "WARN" => Level::WARN,
            "INFO" => Level::INFO,
            "DEBUG" => Level::DEBUG,
            "TRACE" => Level::TRACE,
            _ => Level::INFO,
        }
    }
}

/// Install the global subscriber and build the slow load logger.
///
/// `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<SlowLoadLogger> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.parse_level().as_str()));

    let subscriber = Registry::default().with(env_filter);

    if config.json_format {
        let json_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true);

        subscriber
            .with(json_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install subscriber: {}", e))?;
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .compact();

        subscriber
            .with(fmt_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install subscriber: {}", e))?;
    }

    tracing::info!(
        "Logging initialized: level={}, json={}, slow_loads={}",
        config.level,
        config.json_format,
        config.slow_load_logging
    );

    Ok(SlowLoadLogger::new(
        Duration::from_millis(config.slow_load_threshold_ms),
        config.slow_load_logging,
    ))
}

/// Records backing-store loads that took longer than a threshold
#[derive(Debug)]
pub struct SlowLoadLogger {
    threshold: Duration,
    enabled: bool,
    loads: Arc<RwLock<Vec<SlowLoad>>>,
}

/// Slow load record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowLoad {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub cache: String,
    pub key: String,
    pub records: Option<usize>,
}

/// In-progress load
pub struct LoadTracker {
    start_time: Instant,
    cache: String,
    key: String,
}

impl SlowLoadLogger {
    pub fn new(threshold: Duration, enabled: bool) -> Self {
        Self {
            threshold,
            enabled,
            loads: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Start timing a load
    pub fn start_load(&self, cache: &str, key: String) -> LoadTracker {
        LoadTracker {
            start_time: Instant::now(),
            cache: cache.to_string(),
            key,
        }
    }

    /// Finish timing a load; `records` is `None` for failed loads
    pub fn finish_load(&self, tracker: LoadTracker, records: Option<usize>) {
        if !self.enabled {
            return;
        }

        let duration = tracker.start_time.elapsed();
        if duration < self.threshold {
            return;
        }

        let slow_load = SlowLoad {
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            cache: tracker.cache,
            key: tracker.key,
            records,
        };

        tracing::warn!(
            target: "slow_load",
            duration_ms = slow_load.duration_ms,
            cache = %slow_load.cache,
            key = %slow_load.key,
            records = ?slow_load.records,
            "Slow load detected"
        );

        let mut loads = self.loads.write();
        loads.push(slow_load);
        if loads.len() > MAX_SLOW_LOADS {
            let len = loads.len();
            loads.drain(0..len - MAX_SLOW_LOADS);
        }
    }

    /// Get recent slow loads, newest first
    pub fn get_slow_loads(&self, limit: usize) -> Vec<SlowLoad> {
        let loads = self.loads.read();
        loads.iter().rev().take(limit).cloned().collect()
    }

    /// Get slow load statistics
    pub fn get_stats(&self) -> SlowLoadStats {
        let loads = self.loads.read();
        let threshold_ms = self.threshold.as_millis() as u64;

        if loads.is_empty() {
            return SlowLoadStats {
                threshold_ms,
                ..Default::default()
            };
        }

        let total_count = loads.len();
        let total_duration: u64 = loads.iter().map(|l| l.duration_ms).sum();

        SlowLoadStats {
            total_count,
            avg_duration_ms: total_duration / total_count as u64,
            max_duration_ms: loads.iter().map(|l| l.duration_ms).max().unwrap_or(0),
            threshold_ms,
        }
    }
}

/// Slow load statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlowLoadStats {
    pub total_count: usize,
    pub avg_duration_ms: u64,
    pub max_duration_ms: u64,
    pub threshold_ms: u64,
}
