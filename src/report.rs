// src/report.rs
//
// Per-session declassified report at the persistence boundary: the ordered
// transition log, summary statistics, and the safety grade, in both a
// machine-readable JSON document and a human-readable text rendering.
// Contains numeric vectors and timestamps only.

use crate::recorder::SessionLog;
use crate::types::{GradeReport, StageTransitionEvent};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub generated_at: String,
    pub started_at_ms: Option<f64>,
    pub sealed_at_ms: Option<f64>,
    #[serde(flatten)]
    pub analysis: GradeReport,
    pub transitions: Vec<StageTransitionEvent>,
}

pub fn build(log: &SessionLog, analysis: &GradeReport) -> SessionReport {
    SessionReport {
        session_id: log.session_id().to_string(),
        generated_at: Utc::now().to_rfc3339(),
        started_at_ms: log.started_at_ms(),
        sealed_at_ms: log.sealed_at_ms(),
        analysis: analysis.clone(),
        transitions: log.transitions().cloned().collect(),
    }
}

pub fn write_json(report: &SessionReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    Ok(())
}

pub fn write_text(report: &SessionReport, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report at {}", path.display()))?;
    write!(file, "{}", render_text(report))?;
    Ok(())
}

fn render_text(report: &SessionReport) -> String {
    let summary = &report.analysis.summary;
    let mut out = String::new();
    let rule = "=".repeat(50);
    let thin_rule = "-".repeat(50);

    out.push_str(&rule);
    out.push_str("\n        OPERATOR VIGILANCE SESSION REPORT\n");
    out.push_str(&rule);
    out.push('\n');
    out.push_str(&format!("SESSION:      {}\n", report.session_id));
    out.push_str(&format!("GENERATED:    {}\n", report.generated_at));
    out.push_str(&format!("DURATION:     {:.1}s\n", summary.duration_ms / 1000.0));
    out.push_str(&format!("FINAL GRADE:  {}\n", report.analysis.grade.as_str()));
    out.push_str(&thin_rule);
    out.push('\n');
    out.push_str(&format!("MICROSLEEP EVENTS:   {}\n", summary.microsleep_count));
    out.push_str(&format!("YAWN EVENTS:         {}\n", summary.yawn_event_count));
    out.push_str(&format!(
        "NO-FACE ESCALATIONS: {}\n",
        summary.no_face_escalations
    ));
    out.push_str(&format!(
        "TOTAL ALARM TIME:    {:.1}s\n",
        report.analysis.total_alarm_ms / 1000.0
    ));
    out.push_str(&format!(
        "AUTOPILOT TRIGGERS:  {}\n",
        report.analysis.trigger_count
    ));
    match report.analysis.mean_recovery_ms {
        Some(mean) => out.push_str(&format!("MEAN RECOVERY:       {:.1}s\n", mean / 1000.0)),
        None => out.push_str("MEAN RECOVERY:       n/a\n"),
    }
    out.push_str(&format!("AVG EYE OPENNESS:    {:.3}\n", summary.mean_ear));
    out.push_str(&format!("AVG MOUTH RATIO:     {:.3}\n", summary.mean_mar));
    out.push_str(&thin_rule);
    out.push('\n');

    if report.transitions.is_empty() {
        out.push_str("NO STAGE TRANSITIONS RECORDED\n");
    } else {
        out.push_str("TRANSITIONS:\n");
        let t0 = report.started_at_ms.unwrap_or(0.0);
        for event in &report.transitions {
            out.push_str(&format!(
                "  +{:>7.1}s  {} → {}  ({}, severity {:.2})\n",
                (event.timestamp_ms - t0) / 1000.0,
                event.from_stage.as_str(),
                event.to_stage.as_str(),
                event.cause.as_str(),
                event.severity
            ));
        }
    }
    out.push_str(&rule);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AlertStage, GradeReport, SafetyGrade, SessionSummary, TriggerCause,
    };

    fn sample_report() -> SessionReport {
        SessionReport {
            session_id: "test-session".to_string(),
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            started_at_ms: Some(1000.0),
            sealed_at_ms: Some(31_000.0),
            analysis: GradeReport {
                grade: SafetyGrade::A,
                total_alarm_ms: 0.0,
                trigger_count: 0,
                mean_recovery_ms: Some(12_000.0),
                completed_recoveries: 1,
                unrecovered_episodes: 0,
                summary: SessionSummary {
                    snapshot_count: 3,
                    microsleep_count: 1,
                    yawn_event_count: 0,
                    no_face_escalations: 0,
                    mean_ear: 0.27,
                    mean_mar: 0.12,
                    duration_ms: 30_000.0,
                },
            },
            transitions: vec![StageTransitionEvent {
                from_stage: AlertStage::Nominal,
                to_stage: AlertStage::Warning,
                timestamp_ms: 4000.0,
                cause: TriggerCause::Fatigue,
                severity: 0.52,
                confidence: 1.0,
                score: None,
            }],
        }
    }

    #[test]
    fn test_text_rendering_carries_grade_and_transitions() {
        let text = render_text(&sample_report());
        assert!(text.contains("FINAL GRADE:  A"));
        assert!(text.contains("MICROSLEEP EVENTS:   1"));
        assert!(text.contains("NOMINAL → WARNING"));
        assert!(text.contains("+    3.0s"));
    }

    #[test]
    fn test_json_report_round_trips_grade() {
        let json = serde_json::to_string(&sample_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["grade"], "A");
        assert_eq!(value["session_id"], "test-session");
        assert_eq!(value["transitions"][0]["to_stage"], "Warning");
    }
}
