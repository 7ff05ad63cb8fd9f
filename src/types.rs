use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub input: InputConfig,
    pub normalizer: NormalizerConfig,
    pub fusion: FusionConfig,
    pub escalation: EscalationConfig,
    pub recorder: RecorderConfig,
    pub grading: GradingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub session_dir: String,
    pub report_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    pub window_size: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self { window_size: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    pub ear_close_threshold: f32,
    pub mar_yawn_threshold: f32,
    pub ear_weight: f32,
    pub mar_weight: f32,
    pub closure_saturation_ms: f64,
    pub yawn_saturation_ms: f64,
    /// Reopening rate (EAR units/s) that cancels an in-progress closure run.
    pub reopen_rate: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            ear_close_threshold: 0.20,
            mar_yawn_threshold: 0.40,
            ear_weight: 0.7,
            mar_weight: 0.3,
            closure_saturation_ms: 2000.0,
            yawn_saturation_ms: 3000.0,
            reopen_rate: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    pub warning_threshold: f32,
    pub alarm_threshold: f32,
    pub critical_threshold: f32,
    pub warning_dwell_ms: f64,
    pub alarm_dwell_ms: f64,
    pub critical_dwell_ms: f64,
    pub recovery_window_ms: f64,
    /// WARNING held this long without recovery escalates on its own.
    pub max_warning_ms: f64,
    /// ALARM held this long without acknowledgment hands over to autopilot.
    pub max_alarm_ms: f64,
    pub no_face_grace_ms: f64,
    pub min_confidence: f32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 0.25,
            alarm_threshold: 0.45,
            critical_threshold: 0.60,
            warning_dwell_ms: 1500.0,
            alarm_dwell_ms: 1000.0,
            critical_dwell_ms: 800.0,
            recovery_window_ms: 4000.0,
            max_warning_ms: 30000.0,
            max_alarm_ms: 15000.0,
            no_face_grace_ms: 2000.0,
            min_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Record a ratio snapshot every N face samples.
    pub snapshot_interval: u32,
    pub persist_forensic_log: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: 10,
            persist_forensic_log: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingConfig {
    pub max_recovery_ms: f64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            max_recovery_ms: 20000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// One frame of geometric ratios from the landmark collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RatioSample {
    pub timestamp_ms: f64,
    pub ear: f32,
    pub mar: f32,
}

/// Per-frame input at the sensor boundary: ratios, or an explicit
/// no-face-detected signal.
#[derive(Debug, Clone, Copy)]
pub enum SensorFrame {
    Face(RatioSample),
    NoFace { timestamp_ms: f64 },
}

impl SensorFrame {
    pub fn timestamp_ms(&self) -> f64 {
        match self {
            Self::Face(sample) => sample.timestamp_ms,
            Self::NoFace { timestamp_ms } => *timestamp_ms,
        }
    }
}

/// Smoothed sample with derivative estimates, produced by the normalizer.
#[derive(Debug, Clone, Copy)]
pub struct NormalizedSample {
    pub timestamp_ms: f64,
    pub ear: f32,
    pub mar: f32,
    /// EAR rate of change, units per second.
    pub ear_velocity: f32,
    /// MAR rate of change, units per second.
    pub mar_velocity: f32,
    /// Raw input was out of range or non-finite and got clamped.
    pub clamped: bool,
    /// Fraction of the smoothing window currently filled [0, 1].
    pub window_fill: f32,
}

/// Instantaneous classification derived from the normalized signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionScore {
    pub timestamp_ms: f64,
    pub fatigue_score: f32,
    pub yawn_score: f32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertStage {
    Nominal,
    Warning,
    Alarm,
    AutopilotTrigger,
}

impl AlertStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nominal => "NOMINAL",
            Self::Warning => "WARNING",
            Self::Alarm => "ALARM",
            Self::AutopilotTrigger => "AUTOPILOT_TRIGGER",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            Self::Nominal => 0,
            Self::Warning => 1,
            Self::Alarm => 2,
            Self::AutopilotTrigger => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AutopilotTrigger)
    }
}

/// Which signal crossed the stage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerCause {
    Fatigue,
    Yawn,
    NoFace,
}

impl TriggerCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fatigue => "fatigue",
            Self::Yawn => "yawn",
            Self::NoFace => "no_face",
        }
    }
}

/// Immutable record of one stage transition, appended to the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransitionEvent {
    pub from_stage: AlertStage,
    pub to_stage: AlertStage,
    pub timestamp_ms: f64,
    pub cause: TriggerCause,
    pub severity: f32,
    pub confidence: f32,
    /// Classifier output at the moment of transition, when a face was visible.
    pub score: Option<FusionScore>,
}

/// One-shot handoff signal emitted on entering AUTOPILOT_TRIGGER.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AutopilotTrigger {
    pub timestamp_ms: f64,
    pub cause: TriggerCause,
    pub severity: f32,
}

/// Result of one processing tick.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub stage: AlertStage,
    pub transition: Option<StageTransitionEvent>,
    pub trigger: Option<AutopilotTrigger>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyGrade {
    S,
    A,
    F,
}

impl SafetyGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S => "S",
            Self::A => "A",
            Self::F => "F",
        }
    }
}

/// Per-session tallies for the declassified report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub snapshot_count: u64,
    pub microsleep_count: u32,
    pub yawn_event_count: u32,
    pub no_face_escalations: u32,
    pub mean_ear: f32,
    pub mean_mar: f32,
    pub duration_ms: f64,
}

/// Post-session analysis of one sealed log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub grade: SafetyGrade,
    pub total_alarm_ms: f64,
    pub trigger_count: u32,
    pub mean_recovery_ms: Option<f64>,
    pub completed_recoveries: u32,
    pub unrecovered_episodes: u32,
    pub summary: SessionSummary,
}
