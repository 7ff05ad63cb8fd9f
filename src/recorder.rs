// src/recorder.rs
//
// Append-only forensic record of one monitoring session: stage transitions
// plus periodic ratio snapshots, in occurrence order. Stores numeric
// vectors and timestamps only, never imagery.
//
// The in-memory log is authoritative and is what the grader consumes.
// Durable persistence runs on a decoupled write path: records are handed
// to a writer task over an unbounded FIFO channel, so the alert path never
// waits on disk and write failures surface asynchronously as a counter.

use crate::error::MonitorError;
use crate::types::{RatioSample, StageTransitionEvent};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    Transition(StageTransitionEvent),
    Snapshot(RatioSample),
}

impl LogRecord {
    pub fn timestamp_ms(&self) -> f64 {
        match self {
            Self::Transition(event) => event.timestamp_ms,
            Self::Snapshot(sample) => sample.timestamp_ms,
        }
    }
}

/// Ordered event log owned by exactly one session. Sealed at session end;
/// a sealed log permanently rejects appends.
#[derive(Debug, Clone)]
pub struct SessionLog {
    session_id: String,
    started_at_ms: Option<f64>,
    sealed_at_ms: Option<f64>,
    records: Vec<LogRecord>,
}

impl SessionLog {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            started_at_ms: None,
            sealed_at_ms: None,
            records: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed_at_ms.is_some()
    }

    pub fn started_at_ms(&self) -> Option<f64> {
        self.started_at_ms
    }

    pub fn sealed_at_ms(&self) -> Option<f64> {
        self.sealed_at_ms
    }

    pub fn append(&mut self, record: LogRecord) -> Result<(), MonitorError> {
        if self.is_sealed() {
            return Err(MonitorError::SessionSealed {
                session_id: self.session_id.clone(),
            });
        }
        if self.started_at_ms.is_none() {
            self.started_at_ms = Some(record.timestamp_ms());
        }
        self.records.push(record);
        Ok(())
    }

    /// Seal the log. Idempotent; the first seal timestamp wins.
    pub fn seal(&mut self, timestamp_ms: f64) {
        if self.sealed_at_ms.is_none() {
            self.sealed_at_ms = Some(timestamp_ms);
            info!(
                "Session {} log sealed at {:.1}ms ({} records)",
                self.session_id,
                timestamp_ms,
                self.records.len()
            );
        }
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn transitions(&self) -> impl Iterator<Item = &StageTransitionEvent> {
        self.records.iter().filter_map(|r| match r {
            LogRecord::Transition(event) => Some(event),
            _ => None,
        })
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &RatioSample> {
        self.records.iter().filter_map(|r| match r {
            LogRecord::Snapshot(sample) => Some(sample),
            _ => None,
        })
    }
}

pub struct ForensicRecorder {
    log: SessionLog,
    sink: Option<mpsc::UnboundedSender<String>>,
    sink_task: Option<JoinHandle<()>>,
    write_failures: Arc<AtomicU64>,
}

impl ForensicRecorder {
    /// Recorder without durable persistence; the in-memory log still
    /// carries the full session.
    pub fn in_memory(session_id: &str) -> Self {
        Self {
            log: SessionLog::new(session_id),
            sink: None,
            sink_task: None,
            write_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Recorder that additionally streams each record as a JSONL line via
    /// a background writer task. Must be created inside a tokio runtime.
    pub fn with_jsonl_sink(session_id: &str, path: &Path) -> Result<Self, MonitorError> {
        let file = std::fs::File::create(path)?;
        let write_failures = Arc::new(AtomicU64::new(0));

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let failures = Arc::clone(&write_failures);
        let sink_path = path.display().to_string();
        let task = tokio::spawn(async move {
            let mut writer = std::io::BufWriter::new(file);
            while let Some(line) = rx.recv().await {
                if let Err(e) = writeln!(writer, "{}", line) {
                    failures.fetch_add(1, Ordering::Relaxed);
                    error!("Forensic log write to {} failed: {}", sink_path, e);
                }
            }
            if let Err(e) = writer.flush() {
                failures.fetch_add(1, Ordering::Relaxed);
                error!("Forensic log flush of {} failed: {}", sink_path, e);
            }
            debug!("Forensic sink {} closed", sink_path);
        });

        info!("Forensic log for session {} at {}", session_id, path.display());

        Ok(Self {
            log: SessionLog::new(session_id),
            sink: Some(tx),
            sink_task: Some(task),
            write_failures,
        })
    }

    pub fn record_transition(&mut self, event: StageTransitionEvent) -> Result<(), MonitorError> {
        self.record(LogRecord::Transition(event))
    }

    pub fn record_snapshot(&mut self, sample: RatioSample) -> Result<(), MonitorError> {
        self.record(LogRecord::Snapshot(sample))
    }

    fn record(&mut self, record: LogRecord) -> Result<(), MonitorError> {
        self.log.append(record.clone())?;
        self.persist(&record);
        Ok(())
    }

    /// Hand the record to the background writer. Failures here degrade the
    /// durable copy only; the in-memory log already holds the record.
    fn persist(&self, record: &LogRecord) {
        let Some(sink) = &self.sink else {
            return;
        };
        match serde_json::to_string(record) {
            Ok(line) => {
                if sink.send(line).is_err() {
                    self.write_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Forensic sink closed early; record not persisted");
                }
            }
            Err(e) => {
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to serialize forensic record: {}", e);
            }
        }
    }

    /// Seal the log and close the write path. Returns the writer task so
    /// the caller can await the final flush.
    pub fn seal(&mut self, timestamp_ms: f64) -> Option<JoinHandle<()>> {
        self.log.seal(timestamp_ms);
        self.sink = None;
        self.sink_task.take()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertStage, TriggerCause};

    fn transition(ts: f64) -> StageTransitionEvent {
        StageTransitionEvent {
            from_stage: AlertStage::Nominal,
            to_stage: AlertStage::Warning,
            timestamp_ms: ts,
            cause: TriggerCause::Fatigue,
            severity: 0.5,
            confidence: 1.0,
            score: None,
        }
    }

    fn snapshot(ts: f64) -> RatioSample {
        RatioSample {
            timestamp_ms: ts,
            ear: 0.3,
            mar: 0.1,
        }
    }

    #[test]
    fn test_records_preserve_occurrence_order() {
        let mut recorder = ForensicRecorder::in_memory("s1");
        recorder.record_snapshot(snapshot(100.0)).unwrap();
        recorder.record_transition(transition(200.0)).unwrap();
        recorder.record_snapshot(snapshot(300.0)).unwrap();

        let timestamps: Vec<f64> = recorder
            .log()
            .records()
            .iter()
            .map(|r| r.timestamp_ms())
            .collect();
        assert_eq!(timestamps, vec![100.0, 200.0, 300.0]);
        assert_eq!(recorder.log().started_at_ms(), Some(100.0));
    }

    #[test]
    fn test_sealed_log_rejects_appends() {
        let mut recorder = ForensicRecorder::in_memory("s1");
        recorder.record_snapshot(snapshot(100.0)).unwrap();
        recorder.seal(500.0);

        let result = recorder.record_transition(transition(600.0));
        assert!(matches!(
            result,
            Err(MonitorError::SessionSealed { .. })
        ));
        assert!(recorder.log().is_sealed());
        assert_eq!(recorder.log().sealed_at_ms(), Some(500.0));
        assert_eq!(recorder.log().records().len(), 1);
    }

    #[test]
    fn test_seal_is_idempotent() {
        let mut recorder = ForensicRecorder::in_memory("s1");
        recorder.seal(500.0);
        recorder.seal(900.0);
        assert_eq!(recorder.log().sealed_at_ms(), Some(500.0));
    }

    #[tokio::test]
    async fn test_jsonl_sink_writes_every_record_in_order() {
        let path = std::env::temp_dir().join(format!(
            "forensic-test-{}.jsonl",
            uuid::Uuid::new_v4()
        ));
        let mut recorder = ForensicRecorder::with_jsonl_sink("s1", &path).unwrap();

        recorder.record_snapshot(snapshot(100.0)).unwrap();
        recorder.record_transition(transition(200.0)).unwrap();
        recorder.record_snapshot(snapshot(300.0)).unwrap();

        if let Some(task) = recorder.seal(400.0) {
            task.await.unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: LogRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.timestamp_ms(), 100.0);
        let second: LogRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.timestamp_ms(), 200.0);

        assert_eq!(recorder.write_failures(), 0);
        std::fs::remove_file(&path).ok();
    }
}
