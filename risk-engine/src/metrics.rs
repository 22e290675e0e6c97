//! Prometheus metrics for the risk engine
//!
//! # Metrics
//!
//! - `risk_evaluations_total` - Evaluations that produced a result
//! - `risk_evaluations_by_level_total{level}` - Results per risk level
//! - `risk_blacklist_overrides_total` - Evaluations short-circuited by the blacklist
//! - `risk_degraded_signals_total{signal}` - Signals omitted because their source failed
//! - `risk_rule_compile_failures_total` - Rules skipped at load time
//! - `risk_evaluation_duration_seconds` - End-to-end evaluation latency
//!
//! Collectors built with [`RiskMetrics::for_service`] carry a constant
//! `service` label.

use crate::types::RiskLevel;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Metrics collector
///
/// Collectors live on a private registry so several engines can coexist in
/// one process.
#[derive(Clone)]
pub struct RiskMetrics {
    pub evaluations_total: IntCounter,
    pub evaluations_by_level: IntCounterVec,
    pub blacklist_overrides: IntCounter,
    pub degraded_signals: IntCounterVec,
    pub rule_compile_failures: IntCounter,
    pub evaluation_duration: Histogram,
    pub registry: Arc<Registry>,
}

impl RiskMetrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create a collector whose series are labelled `service="<name>"`
    pub fn for_service(service_name: &str) -> prometheus::Result<Self> {
        let labels = HashMap::from([("service".to_string(), service_name.to_string())]);
        Self::with_registry(Registry::new_custom(None, Some(labels))?)
    }

    fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let registry = Arc::new(registry);

        let evaluations_total = IntCounter::with_opts(Opts::new(
            "risk_evaluations_total",
            "Evaluations that produced a result",
        ))?;
        registry.register(Box::new(evaluations_total.clone()))?;

        let evaluations_by_level = IntCounterVec::new(
            Opts::new("risk_evaluations_by_level_total", "Results per risk level"),
            &["level"],
        )?;
        registry.register(Box::new(evaluations_by_level.clone()))?;

        let blacklist_overrides = IntCounter::with_opts(Opts::new(
            "risk_blacklist_overrides_total",
            "Evaluations short-circuited by the blacklist",
        ))?;
        registry.register(Box::new(blacklist_overrides.clone()))?;

        let degraded_signals = IntCounterVec::new(
            Opts::new(
                "risk_degraded_signals_total",
                "Signals omitted because their source failed",
            ),
            &["signal"],
        )?;
        registry.register(Box::new(degraded_signals.clone()))?;

        let rule_compile_failures = IntCounter::with_opts(Opts::new(
            "risk_rule_compile_failures_total",
            "Rules skipped at load time",
        ))?;
        registry.register(Box::new(rule_compile_failures.clone()))?;

        let evaluation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "risk_evaluation_duration_seconds",
                "End-to-end evaluation latency",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(evaluation_duration.clone()))?;

        Ok(Self {
            evaluations_total,
            evaluations_by_level,
            blacklist_overrides,
            degraded_signals,
            rule_compile_failures,
            evaluation_duration,
            registry,
        })
    }

    /// Record a completed evaluation
    pub fn record_evaluation(&self, level: RiskLevel, duration_seconds: f64) {
        self.evaluations_total.inc();
        self.evaluations_by_level
            .with_label_values(&[level.as_str()])
            .inc();
        self.evaluation_duration.observe(duration_seconds);
    }

    pub fn record_blacklist_override(&self) {
        self.blacklist_overrides.inc();
    }

    /// Record a signal that was omitted
    pub fn record_degraded(&self, signal: &str) {
        self.degraded_signals.with_label_values(&[signal]).inc();
    }

    pub fn record_rule_compile_failures(&self, count: usize) {
        self.rule_compile_failures.inc_by(count as u64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = RiskMetrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_independent_registries() {
        let a = RiskMetrics::new().unwrap();
        let b = RiskMetrics::new().unwrap();
        a.record_evaluation(RiskLevel::High, 0.002);
        assert_eq!(a.evaluations_total.get(), 1);
        assert_eq!(b.evaluations_total.get(), 0);
    }

    #[test]
    fn test_level_and_signal_labels() {
        let metrics = RiskMetrics::new().unwrap();
        metrics.record_evaluation(RiskLevel::Critical, 0.001);
        metrics.record_evaluation(RiskLevel::Critical, 0.001);
        metrics.record_degraded("remote");
        metrics.record_rule_compile_failures(3);

        assert_eq!(
            metrics
                .evaluations_by_level
                .with_label_values(&["critical"])
                .get(),
            2
        );
        assert_eq!(metrics.degraded_signals.with_label_values(&["remote"]).get(), 1);
        assert_eq!(metrics.rule_compile_failures.get(), 3);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_service_label() {
        let metrics = RiskMetrics::for_service("checkout-risk").unwrap();
        metrics.record_blacklist_override();

        let families = metrics.registry().gather();
        let overrides = families
            .iter()
            .find(|f| f.get_name() == "risk_blacklist_overrides_total")
            .unwrap();
        let labels = overrides.get_metric()[0].get_label();
        assert!(labels
            .iter()
            .any(|l| l.get_name() == "service" && l.get_value() == "checkout-risk"));
    }
}
