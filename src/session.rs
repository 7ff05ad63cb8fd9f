// src/session.rs
//
// One monitored operator session. Owns the whole pipeline — normalizer,
// fusion classifier, escalation machine, forensic recorder — and threads
// each sensor frame through it synchronously, in timestamp order. There
// is no ambient alert state anywhere: everything lives here and dies with
// the session.

use crate::error::MonitorError;
use crate::escalation::EscalationStateMachine;
use crate::fusion::FusionClassifier;
use crate::grader::SessionGrader;
use crate::normalizer::SignalNormalizer;
use crate::pipeline::{EventBus, MonitorMetrics, PipelineEvent};
use crate::recorder::{ForensicRecorder, SessionLog};
use crate::types::{
    AlertStage, Config, EscalationConfig, FusionConfig, GradeReport, GradingConfig,
    NormalizerConfig, RecorderConfig, SensorFrame, TickOutcome,
};
use std::path::Path;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_PENDING_EVENTS: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub normalizer: NormalizerConfig,
    pub fusion: FusionConfig,
    pub escalation: EscalationConfig,
    pub recorder: RecorderConfig,
    pub grading: GradingConfig,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            normalizer: config.normalizer.clone(),
            fusion: config.fusion.clone(),
            escalation: config.escalation.clone(),
            recorder: config.recorder.clone(),
            grading: config.grading.clone(),
        }
    }
}

pub struct Session {
    id: String,
    settings: SessionSettings,
    normalizer: SignalNormalizer,
    classifier: FusionClassifier,
    machine: EscalationStateMachine,
    recorder: ForensicRecorder,
    bus: EventBus,
    metrics: MonitorMetrics,
    samples_since_snapshot: u32,
    pending_flush: Option<JoinHandle<()>>,
    stopped: bool,
}

impl Session {
    /// Start a fresh session. With a forensic directory, records are also
    /// streamed to `<dir>/<session-id>.forensic.jsonl` on the background
    /// write path.
    pub fn start(
        settings: SessionSettings,
        metrics: MonitorMetrics,
        forensic_dir: Option<&Path>,
    ) -> Result<Self, MonitorError> {
        let id = Uuid::new_v4().to_string();
        let recorder = match forensic_dir {
            Some(dir) => {
                let path = dir.join(format!("{}.forensic.jsonl", id));
                ForensicRecorder::with_jsonl_sink(&id, &path)?
            }
            None => ForensicRecorder::in_memory(&id),
        };

        info!("✓ Session {} started", id);

        Ok(Self {
            normalizer: SignalNormalizer::new(&settings.normalizer),
            classifier: FusionClassifier::new(&settings.fusion),
            machine: EscalationStateMachine::new(&settings.escalation),
            recorder,
            bus: EventBus::new(MAX_PENDING_EVENTS),
            metrics,
            samples_since_snapshot: 0,
            pending_flush: None,
            stopped: false,
            settings,
            id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stage(&self) -> AlertStage {
        self.machine.stage()
    }

    pub fn log(&self) -> &SessionLog {
        self.recorder.log()
    }

    /// Process one sensor frame through the full pipeline.
    ///
    /// Rejected frames (out-of-order timestamps, stopped session) leave
    /// every component untouched.
    pub fn process(&mut self, frame: SensorFrame) -> Result<TickOutcome, MonitorError> {
        if self.stopped {
            return Err(MonitorError::SessionSealed {
                session_id: self.id.clone(),
            });
        }

        let timestamp_ms = frame.timestamp_ms();
        if let Err(e) = self.machine.check_ordering(timestamp_ms) {
            self.metrics.inc(&self.metrics.ticks_rejected);
            return Err(e);
        }

        let outcome = match frame {
            SensorFrame::Face(sample) => {
                let normalized = self.normalizer.normalize(sample);
                if normalized.clamped {
                    self.metrics.inc(&self.metrics.samples_clamped);
                }
                let score = self.classifier.classify(&normalized);
                let outcome = self.machine.tick(timestamp_ms, Some(&score))?;

                self.metrics.inc(&self.metrics.samples_processed);
                self.samples_since_snapshot += 1;
                if self.samples_since_snapshot >= self.settings.recorder.snapshot_interval {
                    self.samples_since_snapshot = 0;
                    self.recorder.record_snapshot(sample)?;
                }
                outcome
            }
            SensorFrame::NoFace { timestamp_ms } => {
                self.metrics.inc(&self.metrics.no_face_frames);
                self.machine.tick(timestamp_ms, None)?
            }
        };

        if let Some(event) = &outcome.transition {
            self.recorder.record_transition(event.clone())?;
            self.metrics.inc(&self.metrics.stage_transitions);
            self.bus.publish(PipelineEvent::StageChanged(event.clone()));
        }
        if let Some(trigger) = outcome.trigger {
            self.metrics.inc(&self.metrics.autopilot_triggers);
            self.bus.publish(PipelineEvent::AutopilotEngaged(trigger));
        }

        Ok(outcome)
    }

    /// Operator acknowledgment at the control boundary.
    pub fn acknowledge(&mut self, timestamp_ms: f64) -> Result<(), MonitorError> {
        if self.stopped {
            return Err(MonitorError::SessionSealed {
                session_id: self.id.clone(),
            });
        }
        self.machine.acknowledge(timestamp_ms)
    }

    /// Pending alert events for the actuation boundary.
    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        self.bus.drain()
    }

    /// Stop the session: seal the log immediately and discard in-flight
    /// classification state. Idempotent.
    pub fn stop(&mut self, timestamp_ms: f64) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.normalizer.reset();
        self.classifier.reset();
        info!(
            "Session {} stopped at {:.1}ms in stage {}",
            self.id,
            timestamp_ms,
            self.machine.stage().as_str()
        );
        self.pending_flush = self.recorder.seal(timestamp_ms);
    }

    /// Wait for the forensic writer to drain after `stop`.
    pub async fn wait_for_flush(&mut self) {
        if let Some(task) = self.pending_flush.take() {
            if task.await.is_err() {
                warn!("Forensic writer task for session {} panicked", self.id);
            }
        }
        let failures = self.recorder.write_failures();
        if failures > 0 {
            self.metrics
                .log_write_failures
                .fetch_add(failures, std::sync::atomic::Ordering::Relaxed);
            warn!(
                "Session {} completed with {} forensic write failure(s)",
                self.id, failures
            );
        }
    }

    /// Grade the sealed log. Fails on a live session.
    pub fn grade(&self) -> Result<GradeReport, MonitorError> {
        SessionGrader::new(&self.settings.grading).grade(self.recorder.log())
    }
}

/// Enforces the one-active-session rule: installing a new session stops
/// and seals its predecessor before the new one becomes active.
pub struct SessionSupervisor {
    active: Option<Session>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn install(&mut self, session: Session, now_ms: f64) -> Option<Session> {
        let previous = self.active.take().map(|mut prev| {
            warn!(
                "Session {} superseded by {}, sealing",
                prev.id(),
                session.id()
            );
            prev.stop(now_ms);
            prev
        });
        self.active = Some(session);
        previous
    }

    pub fn active_mut(&mut self) -> Option<&mut Session> {
        self.active.as_mut()
    }

    pub fn take_active(&mut self) -> Option<Session> {
        self.active.take()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
