//! Observability for the SNMP subsystem
//!
//! Provides:
//! - Prometheus metrics (poll latency, devices, discovery, traps, queue)
//! - Structured lifecycle events through tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Poll latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Registered once per process; `None` when registration failed
static GLOBAL_METRICS: OnceLock<Option<SnmpMetricsInner>> = OnceLock::new();

struct SnmpMetricsInner {
    collection_latency_seconds: HistogramVec,
    devices_monitored: IntGauge,
    collection_errors: IntCounterVec,
    unreachable_polls: IntCounter,
    discovery_probes: IntCounter,
    discovery_promotions: IntCounter,
    discovery_demotions: IntCounter,
    traps_received: IntCounter,
    traps_dropped: IntCounterVec,
    trap_decode_failures: IntCounter,
    job_queue_send_failures: IntCounter,
}

impl SnmpMetricsInner {
    fn register() -> prometheus::Result<Self> {
        Ok(Self {
            collection_latency_seconds: register_histogram_vec!(
                "snmp_collection_latency_seconds",
                "Time spent polling one device",
                &["kind"],
                LATENCY_BUCKETS.to_vec()
            )?,
            devices_monitored: register_int_gauge!(
                "snmp_devices_monitored",
                "Number of static and discovered devices"
            )?,
            collection_errors: register_int_counter_vec!(
                "snmp_collection_errors_total",
                "Device polls that reported an error",
                &["kind"]
            )?,
            unreachable_polls: register_int_counter!(
                "snmp_unreachable_polls_total",
                "Device polls where the device did not answer"
            )?,
            discovery_probes: register_int_counter!(
                "snmp_discovery_probes_total",
                "Discovery probes sent"
            )?,
            discovery_promotions: register_int_counter!(
                "snmp_discovery_promotions_total",
                "Addresses added to the discovered device set"
            )?,
            discovery_demotions: register_int_counter!(
                "snmp_discovery_demotions_total",
                "Devices removed from the discovered device set"
            )?,
            traps_received: register_int_counter!(
                "snmp_traps_received_total",
                "Trap packets received"
            )?,
            traps_dropped: register_int_counter_vec!(
                "snmp_traps_dropped_total",
                "Trap packets dropped before forwarding",
                &["reason"]
            )?,
            trap_decode_failures: register_int_counter!(
                "snmp_trap_decode_failures_total",
                "Trap datagrams that could not be decoded"
            )?,
            job_queue_send_failures: register_int_counter!(
                "snmp_job_queue_send_failures_total",
                "Jobs that could not be queued"
            )?,
        })
    }
}

/// Handle to the process-wide SNMP metrics; clones share the same metrics
#[derive(Clone)]
pub struct SnmpMetrics {
    _private: (),
}

impl Default for SnmpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SnmpMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match SnmpMetricsInner::register() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register SNMP metrics, metrics disabled");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&SnmpMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn observe_collection_latency(&self, kind: &str, duration_secs: f64) {
        if let Some(m) = self.inner() {
            m.collection_latency_seconds
                .with_label_values(&[kind])
                .observe(duration_secs);
        }
    }

    pub fn set_devices_monitored(&self, count: i64) {
        if let Some(m) = self.inner() {
            m.devices_monitored.set(count);
        }
    }

    pub fn inc_collection_errors(&self, kind: &str) {
        if let Some(m) = self.inner() {
            m.collection_errors.with_label_values(&[kind]).inc();
        }
    }

    pub fn inc_unreachable_polls(&self) {
        if let Some(m) = self.inner() {
            m.unreachable_polls.inc();
        }
    }

    pub fn inc_discovery_probes(&self) {
        if let Some(m) = self.inner() {
            m.discovery_probes.inc();
        }
    }

    pub fn inc_discovery_promotions(&self) {
        if let Some(m) = self.inner() {
            m.discovery_promotions.inc();
        }
    }

    pub fn inc_discovery_demotions(&self) {
        if let Some(m) = self.inner() {
            m.discovery_demotions.inc();
        }
    }

    pub fn inc_traps_received(&self) {
        if let Some(m) = self.inner() {
            m.traps_received.inc();
        }
    }

    /// `reason` is `queue_full` or `community`
    pub fn inc_traps_dropped(&self, reason: &str) {
        if let Some(m) = self.inner() {
            m.traps_dropped.with_label_values(&[reason]).inc();
        }
    }

    pub fn inc_trap_decode_failures(&self) {
        if let Some(m) = self.inner() {
            m.trap_decode_failures.inc();
        }
    }

    pub fn inc_job_queue_send_failures(&self) {
        if let Some(m) = self.inner() {
            m.job_queue_send_failures.inc();
        }
    }

    /// Current dropped-trap count for one reason
    pub fn traps_dropped(&self, reason: &str) -> u64 {
        self.inner()
            .map(|m| m.traps_dropped.with_label_values(&[reason]).get())
            .unwrap_or(0)
    }
}

/// Structured logger for SNMP lifecycle events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, static_devices: usize, subnets: usize) {
        info!(
            event = "snmp_started",
            node = %self.node_name,
            agent_version = %version,
            static_devices = static_devices,
            subnets = subnets,
            "SNMP subsystem started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "snmp_shutdown",
            node = %self.node_name,
            reason = %reason,
            "SNMP subsystem shutting down"
        );
    }

    pub fn log_device_promoted(&self, ip: &str, subnet: &str) {
        info!(
            event = "device_promoted",
            node = %self.node_name,
            device_ip = %ip,
            subnet = %subnet,
            "Discovered device added"
        );
    }

    pub fn log_device_demoted(&self, ip: &str, subnet: &str) {
        info!(
            event = "device_demoted",
            node = %self.node_name,
            device_ip = %ip,
            subnet = %subnet,
            "Discovered device removed"
        );
    }

    pub fn log_profile_detected(&self, ip: &str, sys_object_id: &str, profile: &str) {
        info!(
            event = "profile_detected",
            node = %self.node_name,
            device_ip = %ip,
            sys_object_id = %sys_object_id,
            profile = %profile,
            "Detected device profile"
        );
    }

    pub fn log_trap_dropped(&self, source: &str, reason: &str) {
        warn!(
            event = "trap_dropped",
            node = %self.node_name,
            source = %source,
            reason = %reason,
            "Dropped trap packet"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snmp_metrics_handles_share_registry() {
        let metrics = SnmpMetrics::new();
        let other = SnmpMetrics::new();

        metrics.observe_collection_latency("metric", 0.2);
        metrics.set_devices_monitored(3);
        metrics.inc_unreachable_polls();

        let before = other.traps_dropped("queue_full");
        metrics.inc_traps_dropped("queue_full");
        assert_eq!(other.traps_dropped("queue_full"), before + 1);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("edge-1");
        assert_eq!(logger.node_name, "edge-1");
    }
}
