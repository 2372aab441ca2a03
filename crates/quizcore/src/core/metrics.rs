//! Prometheus metrics for the quiz dispatch subsystem
//!
//! Tracks:
//! - Delivery outcomes (sent, failed, recovered by retry)
//! - Queue depth and busy workers
//! - Process resource usage and throttling state
//! - Broadcast fan-out results
//!
//! Metrics live in their own [`Registry`] owned by the application context,
//! so tests can build as many instances as they like.

use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,

    // ======================
    // DELIVERY
    // ======================
    pub quiz_sent_total: IntCounter,
    pub quiz_failed_total: IntCounter,
    pub quiz_retry_success_total: IntCounter,
    /// Labels: outcome (limit_reached/skipped)
    pub quiz_skipped_total: IntCounterVec,

    // ======================
    // QUEUE / POOL
    // ======================
    pub queue_depth: IntGauge,
    pub queue_rejected_total: IntCounter,
    pub active_workers: IntGauge,

    // ======================
    // RESOURCES
    // ======================
    pub process_memory_bytes: IntGauge,
    pub process_cpu_percent: Gauge,
    pub throttled: IntGauge,
    /// Labels: tier (cpu_warning/memory_warning/cpu_critical/memory_critical/memory_emergency)
    pub mitigations_total: IntCounterVec,

    // ======================
    // BROADCAST
    // ======================
    pub broadcast_sent_total: IntCounter,
    pub broadcast_failed_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let quiz_sent_total = IntCounter::new("quiz_sent_total", "Quiz polls delivered")?;
        let quiz_failed_total = IntCounter::new("quiz_failed_total", "Quiz deliveries abandoned")?;
        let quiz_retry_success_total = IntCounter::new(
            "quiz_retry_success_total",
            "Quiz deliveries that succeeded after at least one retry",
        )?;
        let quiz_skipped_total = IntCounterVec::new(
            Opts::new("quiz_skipped_total", "Quiz tasks that ended without a delivery attempt"),
            &["outcome"],
        )?;
        let queue_depth = IntGauge::new("quiz_queue_depth", "Pending quiz tasks")?;
        let queue_rejected_total = IntCounter::new("quiz_queue_rejected_total", "Quiz tasks refused at enqueue")?;
        let active_workers = IntGauge::new("quiz_active_workers", "Quiz deliveries currently executing")?;
        let process_memory_bytes = IntGauge::new("quiz_process_memory_bytes", "Resident memory of the bot process")?;
        let process_cpu_percent = Gauge::new("quiz_process_cpu_percent", "CPU usage of the bot process")?;
        let throttled = IntGauge::new("quiz_throttled", "1 while any mitigation is active")?;
        let mitigations_total = IntCounterVec::new(
            Opts::new("quiz_mitigations_total", "Mitigation tiers applied by the resource monitor"),
            &["tier"],
        )?;
        let broadcast_sent_total = IntCounter::new("quiz_broadcast_sent_total", "Broadcast messages delivered")?;
        let broadcast_failed_total = IntCounter::new("quiz_broadcast_failed_total", "Broadcast messages that failed")?;

        registry.register(Box::new(quiz_sent_total.clone()))?;
        registry.register(Box::new(quiz_failed_total.clone()))?;
        registry.register(Box::new(quiz_retry_success_total.clone()))?;
        registry.register(Box::new(quiz_skipped_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(queue_rejected_total.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;
        registry.register(Box::new(process_memory_bytes.clone()))?;
        registry.register(Box::new(process_cpu_percent.clone()))?;
        registry.register(Box::new(throttled.clone()))?;
        registry.register(Box::new(mitigations_total.clone()))?;
        registry.register(Box::new(broadcast_sent_total.clone()))?;
        registry.register(Box::new(broadcast_failed_total.clone()))?;

        Ok(Self {
            registry,
            quiz_sent_total,
            quiz_failed_total,
            quiz_retry_success_total,
            quiz_skipped_total,
            queue_depth,
            queue_rejected_total,
            active_workers,
            process_memory_bytes,
            process_cpu_percent,
            throttled,
            mitigations_total,
            broadcast_sent_total,
            broadcast_failed_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<(String, String), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        let body = String::from_utf8_lossy(&buffer).into_owned();
        Ok((encoder.format_type().to_string(), body))
    }
}
