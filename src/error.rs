// src/error.rs

use thiserror::Error;

/// Closed error taxonomy for the monitoring pipeline.
///
/// Signal-quality problems (out-of-range ratios, NaN) are clamped upstream
/// and never surface here. Everything below is either a lifecycle violation
/// the caller must hear about, or a persistence failure that degrades the
/// forensic record without touching the alert path.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Tick timestamps must be strictly monotonic; dwell computations
    /// depend on it. The offending tick is rejected and state retained.
    #[error("out-of-order sample: {current_ms:.1}ms does not advance past {last_ms:.1}ms")]
    OutOfOrder { last_ms: f64, current_ms: f64 },

    /// Append attempted on a sealed session log.
    #[error("session {session_id} is sealed")]
    SessionSealed { session_id: String },

    /// Operation rejected because the autopilot trigger is latched for
    /// this session; only a new session clears it.
    #[error("autopilot trigger is latched; start a new session to reset")]
    TriggerLatched,

    /// Forensic log write failed. Reported asynchronously; never blocks
    /// or suppresses escalation.
    #[error("forensic log write failed: {0}")]
    Persistence(#[from] std::io::Error),
}
