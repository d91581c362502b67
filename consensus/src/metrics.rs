//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring block processing. Everything is
//! registered in a registry owned by the [`Metrics`] value, so several
//! consensus sets can live in one process.
//!
//! # Metrics
//!
//! - `consensus_blocks_accepted_total` - Blocks stored, on any branch
//! - `consensus_blocks_rejected_total` - Blocks rejected
//! - `consensus_dos_blocks_total` - Blocks rejected as denial-of-service
//! - `consensus_reorganizations_total` - Best-path reorganizations
//! - `consensus_blocks_reverted_total` - Blocks removed from the best path
//! - `consensus_blocks_applied_total` - Blocks added to the best path
//! - `consensus_diffs_committed_total` - Diffs committed while applying
//! - `consensus_height` - Height of the best path
//! - `consensus_notify_duration_seconds` - Time to get a round acknowledged

use crate::processor::AcceptOutcome;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Blocks stored on any branch
    pub blocks_accepted: IntCounter,

    /// Blocks rejected
    pub blocks_rejected: IntCounter,

    /// Blocks rejected as denial-of-service
    pub dos_blocks: IntCounter,

    /// Reorganizations
    pub reorganizations: IntCounter,

    /// Blocks reverted from the best path
    pub blocks_reverted: IntCounter,

    /// Blocks applied to the best path
    pub blocks_applied: IntCounter,

    /// Diffs committed by applied blocks
    pub diffs_committed: IntCounter,

    /// Best path height
    pub height: IntGauge,

    /// Notification round duration
    pub notify_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        let blocks_accepted = counter(
            "consensus_blocks_accepted_total",
            "Blocks stored, on any branch",
        )?;
        let blocks_rejected = counter("consensus_blocks_rejected_total", "Blocks rejected")?;
        let dos_blocks = counter(
            "consensus_dos_blocks_total",
            "Blocks rejected as denial-of-service",
        )?;
        let reorganizations = counter(
            "consensus_reorganizations_total",
            "Best-path reorganizations",
        )?;
        let blocks_reverted = counter(
            "consensus_blocks_reverted_total",
            "Blocks removed from the best path",
        )?;
        let blocks_applied = counter(
            "consensus_blocks_applied_total",
            "Blocks added to the best path",
        )?;
        let diffs_committed = counter(
            "consensus_diffs_committed_total",
            "Diffs committed while applying blocks",
        )?;

        let height = IntGauge::new("consensus_height", "Height of the best path")?;
        registry.register(Box::new(height.clone()))?;

        let notify_duration = Histogram::with_opts(
            HistogramOpts::new(
                "consensus_notify_duration_seconds",
                "Time for all subscribers to acknowledge an update",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(notify_duration.clone()))?;

        Ok(Self {
            blocks_accepted,
            blocks_rejected,
            dos_blocks,
            reorganizations,
            blocks_reverted,
            blocks_applied,
            diffs_committed,
            height,
            notify_duration,
            registry,
        })
    }

    /// Record a successful acceptance
    pub fn record_accepted(&self, outcome: &AcceptOutcome) {
        self.blocks_accepted.inc();

        if let AcceptOutcome::Reorganized(_) = outcome {
            self.reorganizations.inc();
        }
        if let Some(update) = outcome.update() {
            self.blocks_reverted.inc_by(update.reverted_blocks.len() as u64);
            self.blocks_applied.inc_by(update.applied_blocks.len() as u64);
            self.diffs_committed.inc_by(
                update
                    .applied_blocks
                    .iter()
                    .map(|b| b.diffs.len() as u64)
                    .sum(),
            );
            self.height.set(update.height as i64);
        }
    }

    /// Record a rejection
    pub fn record_rejected(&self, dos: bool) {
        self.blocks_rejected.inc();
        if dos {
            self.dos_blocks.inc();
        }
    }

    /// Record how long a notification round took
    pub fn record_notify_duration(&self, duration_seconds: f64) {
        self.notify_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
