// src/grader.rs
//
// Post-session analysis over one sealed forensic log. Pure: the same log
// always yields the same report.

use crate::error::MonitorError;
use crate::recorder::SessionLog;
use crate::types::{
    AlertStage, GradeReport, GradingConfig, SafetyGrade, SessionSummary, TriggerCause,
};
use tracing::info;

pub struct SessionGrader {
    config: GradingConfig,
}

impl SessionGrader {
    pub fn new(config: &GradingConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Grade a sealed session log. Rejects unsealed logs: grading a live
    /// session would not be reproducible.
    pub fn grade(&self, log: &SessionLog) -> Result<GradeReport, MonitorError> {
        if !log.is_sealed() {
            return Err(MonitorError::SessionSealed {
                session_id: log.session_id().to_string(),
            });
        }

        let end_ms = log
            .sealed_at_ms()
            .or_else(|| log.records().last().map(|r| r.timestamp_ms()))
            .unwrap_or(0.0);

        let mut total_alarm_ms = 0.0;
        let mut trigger_count: u32 = 0;
        let mut recovery_times: Vec<f64> = Vec::new();
        let mut unrecovered_episodes: u32 = 0;
        let mut bounds_exceeded = false;

        let mut alarm_entered_ms: Option<f64> = None;
        let mut episode_started_ms: Option<f64> = None;

        for event in log.transitions() {
            // Time spent in ALARM.
            if event.to_stage == AlertStage::Alarm {
                alarm_entered_ms = Some(event.timestamp_ms);
            } else if event.from_stage == AlertStage::Alarm {
                if let Some(entered) = alarm_entered_ms.take() {
                    total_alarm_ms += event.timestamp_ms - entered;
                }
            }

            if event.to_stage == AlertStage::AutopilotTrigger {
                trigger_count += 1;
            }

            // Recovery episodes: first departure from NOMINAL until the
            // next return to it.
            if event.from_stage == AlertStage::Nominal && event.to_stage == AlertStage::Warning {
                episode_started_ms = Some(event.timestamp_ms);
            } else if event.to_stage == AlertStage::Nominal {
                if let Some(started) = episode_started_ms.take() {
                    recovery_times.push(event.timestamp_ms - started);
                }
            }
        }

        // Open intervals at session end.
        if let Some(entered) = alarm_entered_ms {
            total_alarm_ms += end_ms - entered;
        }
        if let Some(started) = episode_started_ms {
            unrecovered_episodes += 1;
            if end_ms - started > self.config.max_recovery_ms {
                bounds_exceeded = true;
            }
        }
        if recovery_times
            .iter()
            .any(|&t| t > self.config.max_recovery_ms)
        {
            bounds_exceeded = true;
        }

        let mean_recovery_ms = if recovery_times.is_empty() {
            None
        } else {
            Some(recovery_times.iter().sum::<f64>() / recovery_times.len() as f64)
        };

        let had_activity = log.transitions().next().is_some();
        let grade = if trigger_count > 0 || bounds_exceeded {
            SafetyGrade::F
        } else if had_activity {
            SafetyGrade::A
        } else {
            SafetyGrade::S
        };

        let summary = self.summarize(log, end_ms);

        info!(
            "Session {} graded {} (alarm {:.0}ms, {} trigger(s), {} recoveries)",
            log.session_id(),
            grade.as_str(),
            total_alarm_ms,
            trigger_count,
            recovery_times.len()
        );

        Ok(GradeReport {
            grade,
            total_alarm_ms,
            trigger_count,
            mean_recovery_ms,
            completed_recoveries: recovery_times.len() as u32,
            unrecovered_episodes,
            summary,
        })
    }

    fn summarize(&self, log: &SessionLog, end_ms: f64) -> SessionSummary {
        let mut summary = SessionSummary::default();

        let mut ear_sum = 0.0f64;
        let mut mar_sum = 0.0f64;
        for sample in log.snapshots() {
            summary.snapshot_count += 1;
            ear_sum += sample.ear as f64;
            mar_sum += sample.mar as f64;
        }
        if summary.snapshot_count > 0 {
            summary.mean_ear = (ear_sum / summary.snapshot_count as f64) as f32;
            summary.mean_mar = (mar_sum / summary.snapshot_count as f64) as f32;
        }

        for event in log.transitions() {
            if event.from_stage == AlertStage::Nominal && event.to_stage == AlertStage::Warning {
                match event.cause {
                    TriggerCause::Fatigue => summary.microsleep_count += 1,
                    TriggerCause::Yawn => summary.yawn_event_count += 1,
                    TriggerCause::NoFace => {}
                }
            }
            if event.cause == TriggerCause::NoFace
                && event.to_stage.rank() > event.from_stage.rank()
            {
                summary.no_face_escalations += 1;
            }
        }

        summary.duration_ms = log
            .started_at_ms()
            .map(|start| (end_ms - start).max(0.0))
            .unwrap_or(0.0);

        summary
    }
}
