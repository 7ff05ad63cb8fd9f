// src/main.rs

mod config;
mod error;
mod escalation;
mod fusion;
mod grader;
mod normalizer;
mod pipeline;
mod recorder;
mod report;
mod session;
mod types;

use anyhow::{Context, Result};
use error::MonitorError;
use pipeline::{MonitorMetrics, PipelineEvent};
use serde::Deserialize;
use session::{Session, SessionSettings, SessionSupervisor};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use types::{Config, RatioSample, SensorFrame};
use walkdir::WalkDir;

/// One line of the per-frame input stream from the landmark collaborator.
#[derive(Debug, Deserialize)]
struct RawFrameRecord {
    timestamp_ms: f64,
    #[serde(default)]
    ear: Option<f32>,
    #[serde(default)]
    mar: Option<f32>,
    #[serde(default)]
    no_face: bool,
    /// Operator pressed the acknowledgment control on this frame.
    #[serde(default)]
    ack: bool,
}

impl From<RawFrameRecord> for SensorFrame {
    fn from(record: RawFrameRecord) -> Self {
        match (record.no_face, record.ear, record.mar) {
            (false, Some(ear), Some(mar)) => SensorFrame::Face(RatioSample {
                timestamp_ms: record.timestamp_ms,
                ear,
                mar,
            }),
            // An explicit no-face flag, or a frame with missing ratios,
            // both mean the collaborator had nothing to measure.
            _ => SensorFrame::NoFace {
                timestamp_ms: record.timestamp_ms,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vigilance_monitor=info".to_string()),
        )
        .init();

    info!("🛩 Operator Vigilance Monitor starting");

    let config = Config::load("config.yaml")?;
    info!("✓ Configuration loaded");
    info!(
        "Escalation thresholds: warning={:.2}, alarm={:.2}, critical={:.2}",
        config.escalation.warning_threshold,
        config.escalation.alarm_threshold,
        config.escalation.critical_threshold
    );
    info!(
        "Dwell windows: warning={:.0}ms, alarm={:.0}ms, critical={:.0}ms, recovery={:.0}ms",
        config.escalation.warning_dwell_ms,
        config.escalation.alarm_dwell_ms,
        config.escalation.critical_dwell_ms,
        config.escalation.recovery_window_ms
    );

    let session_files = find_session_files(&config.input.session_dir)?;
    if session_files.is_empty() {
        error!("No session files found in {}", config.input.session_dir);
        return Ok(());
    }
    info!("Found {} session file(s) to replay", session_files.len());

    std::fs::create_dir_all(&config.input.report_dir)
        .with_context(|| format!("Failed to create report dir {}", config.input.report_dir))?;

    let metrics = MonitorMetrics::new();
    let mut supervisor = SessionSupervisor::new();

    for (idx, path) in session_files.iter().enumerate() {
        info!("========================================");
        info!(
            "Replaying session {}/{}: {}",
            idx + 1,
            session_files.len(),
            path.display()
        );
        info!("========================================");

        if let Err(e) = replay_session(path, &config, &mut supervisor, &metrics).await {
            error!("Session replay failed for {}: {:#}", path.display(), e);
        }
    }

    let summary = metrics.summary();
    info!(
        "Run complete: {} samples ({:.1}/s), {} no-face frames, {} clamped, {} rejected ticks",
        summary.samples_processed,
        summary.samples_per_sec,
        summary.no_face_frames,
        summary.samples_clamped,
        summary.ticks_rejected
    );
    info!(
        "Alerts: {} stage transitions, {} autopilot trigger(s), {} forensic write failure(s)",
        summary.stage_transitions, summary.autopilot_triggers, summary.log_write_failures
    );

    Ok(())
}

/// Stream one recorded sample file through a fresh session, then seal,
/// grade, and write the reports.
async fn replay_session(
    path: &Path,
    config: &Config,
    supervisor: &mut SessionSupervisor,
    metrics: &MonitorMetrics,
) -> Result<()> {
    let report_dir = PathBuf::from(&config.input.report_dir);
    let forensic_dir = config
        .recorder
        .persist_forensic_log
        .then_some(report_dir.as_path());

    let session = Session::start(SessionSettings::from(config), metrics.clone(), forensic_dir)?;
    // Installing atomically seals any session a previous replay left behind.
    if let Some(previous) = supervisor.install(session, 0.0) {
        warn!("Sealed leftover session {}", previous.id());
    }

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open session file {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut last_timestamp_ms = 0.0f64;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RawFrameRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!("{}:{}: skipping malformed record: {}", path.display(), line_no + 1, e);
                continue;
            }
        };
        let session = supervisor
            .active_mut()
            .context("No active session during replay")?;

        if record.ack {
            if let Err(e) = session.acknowledge(record.timestamp_ms) {
                warn!("{}:{}: acknowledgment rejected: {}", path.display(), line_no + 1, e);
            }
            continue;
        }

        let frame = SensorFrame::from(record);
        match session.process(frame) {
            Ok(_) => {
                last_timestamp_ms = frame.timestamp_ms();
                actuate(session.drain_events());
            }
            Err(e @ MonitorError::OutOfOrder { .. }) => {
                warn!("{}:{}: {}", path.display(), line_no + 1, e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut session = supervisor
        .take_active()
        .context("No active session to seal")?;
    session.stop(last_timestamp_ms);
    session.wait_for_flush().await;

    let analysis = session.grade()?;
    let session_report = report::build(session.log(), &analysis);
    let json_path = report_dir.join(format!("{}.report.json", session.id()));
    let text_path = report_dir.join(format!("{}.report.txt", session.id()));
    report::write_json(&session_report, &json_path)?;
    report::write_text(&session_report, &text_path)?;

    info!(
        "✓ Session {} ended in {}, graded {} (alarm {:.1}s, {} trigger(s)); report at {}",
        session.id(),
        session.stage().as_str(),
        analysis.grade.as_str(),
        analysis.total_alarm_ms / 1000.0,
        analysis.trigger_count,
        json_path.display()
    );

    Ok(())
}

/// Output boundary toward the alert/autopilot actuation channel.
fn actuate(events: Vec<PipelineEvent>) {
    for event in events {
        match event {
            PipelineEvent::StageChanged(transition) => {
                info!(
                    "⚠ ALERT STAGE {} → {} at {:.1}ms (cause: {}, severity {:.2})",
                    transition.from_stage.as_str(),
                    transition.to_stage.as_str(),
                    transition.timestamp_ms,
                    transition.cause.as_str(),
                    transition.severity
                );
            }
            PipelineEvent::AutopilotEngaged(trigger) => {
                error!(
                    "🚨 AUTOPILOT HANDOFF ENGAGED at {:.1}ms (cause: {}, severity {:.2})",
                    trigger.timestamp_ms,
                    trigger.cause.as_str(),
                    trigger.severity
                );
            }
        }
    }
}

fn find_session_files(dir: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("jsonl"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_with_ratios_maps_to_face_frame() {
        let record: RawFrameRecord =
            serde_json::from_str(r#"{"timestamp_ms": 33.0, "ear": 0.28, "mar": 0.12}"#).unwrap();
        match SensorFrame::from(record) {
            SensorFrame::Face(sample) => {
                assert_eq!(sample.timestamp_ms, 33.0);
                assert!((sample.ear - 0.28).abs() < 1e-6);
            }
            other => panic!("expected face frame, got {:?}", other),
        }
    }

    #[test]
    fn test_no_face_flag_and_missing_ratios_map_to_no_face() {
        let flagged: RawFrameRecord =
            serde_json::from_str(r#"{"timestamp_ms": 33.0, "no_face": true}"#).unwrap();
        assert!(matches!(
            SensorFrame::from(flagged),
            SensorFrame::NoFace { .. }
        ));

        let missing: RawFrameRecord =
            serde_json::from_str(r#"{"timestamp_ms": 66.0, "ear": 0.3}"#).unwrap();
        assert!(matches!(
            SensorFrame::from(missing),
            SensorFrame::NoFace { .. }
        ));
    }
}
