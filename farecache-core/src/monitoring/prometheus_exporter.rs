//! Prometheus metrics exporter
//!
//! Renders per-cache statistics in the Prometheus text exposition format.
//! Serving the text is left to the embedding process.

use crate::monitoring::metrics::CacheReport;
use anyhow::Result;
use prometheus::{
    register_gauge_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

/// Prometheus metrics exporter
pub struct PrometheusExporter {
    registry: Registry,
    metrics: PrometheusMetrics,
}

/// Prometheus metric instances, all labelled by cache name
struct PrometheusMetrics {
    hits: IntCounterVec,
    misses: IntCounterVec,
    loads: IntCounterVec,
    load_failures: IntCounterVec,
    coalesced_waits: IntCounterVec,
    invalidations: IntCounterVec,
    evictions: IntCounterVec,
    expirations: IntCounterVec,
    compressions: IntCounterVec,
    decompressions: IntCounterVec,

    entries: IntGaugeVec,
    hit_rate: GaugeVec,
    avg_load_ms: GaugeVec,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry)?;

        Ok(Self { registry, metrics })
    }

    /// Update Prometheus metrics from cache reports
    pub fn update_metrics(&self, reports: &[CacheReport]) {
        let m = &self.metrics;

        // Counters are cumulative in the stores; mirror them
        for counter in [
            &m.hits,
            &m.misses,
            &m.loads,
            &m.load_failures,
            &m.coalesced_waits,
            &m.invalidations,
            &m.evictions,
            &m.expirations,
            &m.compressions,
            &m.decompressions,
        ] {
            counter.reset();
        }

        for report in reports {
            let labels = [report.name.as_str()];
            let s = &report.stats;

            m.hits.with_label_values(&labels).inc_by(s.hits);
            m.misses.with_label_values(&labels).inc_by(s.misses);
            m.loads.with_label_values(&labels).inc_by(s.loads);
            m.load_failures.with_label_values(&labels).inc_by(s.load_failures);
            m.coalesced_waits.with_label_values(&labels).inc_by(s.coalesced_waits);
            m.invalidations.with_label_values(&labels).inc_by(s.invalidations);
            m.evictions.with_label_values(&labels).inc_by(s.evictions);
            m.expirations.with_label_values(&labels).inc_by(s.expirations);
            m.compressions.with_label_values(&labels).inc_by(s.compressions);
            m.decompressions.with_label_values(&labels).inc_by(s.decompressions);

            m.entries.with_label_values(&labels).set(report.entries as i64);
            m.hit_rate.with_label_values(&labels).set(s.hit_rate);
            m.avg_load_ms.with_label_values(&labels).set(s.avg_load_ms);
        }
    }

    /// Text exposition of everything registered
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut output = Vec::new();
        encoder.encode(&metric_families, &mut output)?;
        Ok(String::from_utf8(output)?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounterVec> {
    Ok(register_int_counter_vec_with_registry!(
        Opts::new(name, help),
        &["cache"],
        registry
    )?)
}

impl PrometheusMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let hits = counter(registry, "farecache_hits_total", "Lookups answered from memory")?;
        let misses = counter(registry, "farecache_misses_total", "Lookups that needed a load")?;
        let loads = counter(registry, "farecache_loads_total", "Successful backing store loads")?;
        let load_failures = counter(
            registry,
            "farecache_load_failures_total",
            "Failed backing store loads",
        )?;
        let coalesced_waits = counter(
            registry,
            "farecache_coalesced_waits_total",
            "Lookups that waited on another caller's load",
        )?;
        let invalidations = counter(
            registry,
            "farecache_invalidations_total",
            "Invalidation events applied",
        )?;
        let evictions = counter(
            registry,
            "farecache_evictions_total",
            "Entries evicted to stay within capacity",
        )?;
        let expirations = counter(registry, "farecache_expirations_total", "Entries expired by TTL")?;
        let compressions = counter(
            registry,
            "farecache_compressions_total",
            "Entries moved to compressed form",
        )?;
        let decompressions = counter(
            registry,
            "farecache_decompressions_total",
            "Entries restored from compressed form",
        )?;

        let entries = register_int_gauge_vec_with_registry!(
            Opts::new("farecache_entries", "Resident entries"),
            &["cache"],
            registry
        )?;
        let hit_rate = register_gauge_vec_with_registry!(
            Opts::new("farecache_hit_rate", "Hit ratio between 0 and 1"),
            &["cache"],
            registry
        )?;
        let avg_load_ms = register_gauge_vec_with_registry!(
            Opts::new("farecache_avg_load_milliseconds", "Mean backing store load time"),
            &["cache"],
            registry
        )?;

        Ok(Self {
            hits,
            misses,
            loads,
            load_failures,
            coalesced_waits,
            invalidations,
            evictions,
            expirations,
            compressions,
            decompressions,
            entries,
            hit_rate,
            avg_load_ms,
        })
    }
}
