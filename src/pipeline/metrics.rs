// src/pipeline/metrics.rs
//
// Process-level observability. Counts samples, clamps, rejects, stage
// transitions, and write failures across all sessions in this run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct MonitorMetrics {
    pub samples_processed: Arc<AtomicU64>,
    pub samples_clamped: Arc<AtomicU64>,
    pub no_face_frames: Arc<AtomicU64>,
    pub ticks_rejected: Arc<AtomicU64>,
    pub stage_transitions: Arc<AtomicU64>,
    pub autopilot_triggers: Arc<AtomicU64>,
    pub log_write_failures: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl MonitorMetrics {
    pub fn new() -> Self {
        Self {
            samples_processed: Arc::new(AtomicU64::new(0)),
            samples_clamped: Arc::new(AtomicU64::new(0)),
            no_face_frames: Arc::new(AtomicU64::new(0)),
            ticks_rejected: Arc::new(AtomicU64::new(0)),
            stage_transitions: Arc::new(AtomicU64::new(0)),
            autopilot_triggers: Arc::new(AtomicU64::new(0)),
            log_write_failures: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples_per_sec(&self) -> f64 {
        let samples = self.samples_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            samples as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
            samples_clamped: self.samples_clamped.load(Ordering::Relaxed),
            no_face_frames: self.no_face_frames.load(Ordering::Relaxed),
            ticks_rejected: self.ticks_rejected.load(Ordering::Relaxed),
            stage_transitions: self.stage_transitions.load(Ordering::Relaxed),
            autopilot_triggers: self.autopilot_triggers.load(Ordering::Relaxed),
            log_write_failures: self.log_write_failures.load(Ordering::Relaxed),
            samples_per_sec: self.samples_per_sec(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub samples_processed: u64,
    pub samples_clamped: u64,
    pub no_face_frames: u64,
    pub ticks_rejected: u64,
    pub stage_transitions: u64,
    pub autopilot_triggers: u64,
    pub log_write_failures: u64,
    pub samples_per_sec: f64,
    pub elapsed_secs: f64,
}
