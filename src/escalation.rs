// src/escalation.rs
//
// OPERATOR ALERT ESCALATION - CORE CONTROL LOOP
//
// Consumes fusion scores tick by tick and walks the alert ladder:
//
//   NOMINAL -> WARNING -> ALARM -> AUTOPILOT_TRIGGER
//
// Escalation is fast and sensitive (short per-stage dwell windows);
// de-escalation is slow and conservative (a single long recovery window),
// so the two directions never flap against each other. AUTOPILOT_TRIGGER
// is terminal for the session: the trigger fires exactly once and only a
// new session clears it.
//
// Dwell accounting is time-based, not frame-based. An interval only
// counts toward a dwell window when the condition held at both of its
// ends, so a window of W ms genuinely means W ms of sustained signal.

use crate::error::MonitorError;
use crate::types::{
    AlertStage, AutopilotTrigger, EscalationConfig, FusionScore, StageTransitionEvent,
    TickOutcome, TriggerCause,
};
use tracing::{debug, info, warn};

/// Severity assigned to a no-face condition that outlived its grace period.
/// An operator who is not facing the sensor is treated as a sustained
/// critical signal.
const NO_FACE_SEVERITY: f32 = 1.0;

#[derive(Debug, Clone, Copy)]
struct SignalState {
    severity: f32,
    cause: TriggerCause,
    confidence: f32,
    recovery_evidence: bool,
}

pub struct EscalationStateMachine {
    config: EscalationConfig,

    stage: AlertStage,
    last_timestamp_ms: Option<f64>,
    /// Fail-safe clock: stage entry time, restarted by operator acknowledgment.
    fail_safe_started_ms: f64,

    above_warning_ms: f64,
    above_alarm_ms: f64,
    above_critical_ms: f64,
    below_recovery_ms: f64,
    prev_signal: Option<SignalState>,

    no_face_since_ms: Option<f64>,
    trigger_fired: bool,
}

impl EscalationStateMachine {
    pub fn new(config: &EscalationConfig) -> Self {
        Self {
            config: config.clone(),
            stage: AlertStage::Nominal,
            last_timestamp_ms: None,
            fail_safe_started_ms: 0.0,
            above_warning_ms: 0.0,
            above_alarm_ms: 0.0,
            above_critical_ms: 0.0,
            below_recovery_ms: 0.0,
            prev_signal: None,
            no_face_since_ms: None,
            trigger_fired: false,
        }
    }

    pub fn stage(&self) -> AlertStage {
        self.stage
    }

    pub fn trigger_fired(&self) -> bool {
        self.trigger_fired
    }

    /// Reject a timestamp that does not advance past the last accepted tick.
    pub fn check_ordering(&self, timestamp_ms: f64) -> Result<(), MonitorError> {
        if let Some(last) = self.last_timestamp_ms {
            if timestamp_ms <= last {
                return Err(MonitorError::OutOfOrder {
                    last_ms: last,
                    current_ms: timestamp_ms,
                });
            }
        }
        Ok(())
    }

    /// Process one tick. `score` is `None` when the sensor reported
    /// no-face-detected for this frame.
    pub fn tick(
        &mut self,
        timestamp_ms: f64,
        score: Option<&FusionScore>,
    ) -> Result<TickOutcome, MonitorError> {
        self.check_ordering(timestamp_ms)?;

        let dt_ms = self
            .last_timestamp_ms
            .map(|last| timestamp_ms - last)
            .unwrap_or(0.0);
        self.last_timestamp_ms = Some(timestamp_ms);

        if self.stage.is_terminal() {
            // Latched. Ticks are accepted but nothing can change until an
            // external reset starts a new session.
            debug!("Tick at {:.1}ms ignored: trigger latched", timestamp_ms);
            return Ok(self.outcome(None, None));
        }

        let signal = self.evaluate_signal(timestamp_ms, score);
        self.update_dwell_windows(&signal, dt_ms);

        let (transition, trigger) = match &signal {
            Some(sig) => self.evaluate_transition(timestamp_ms, sig, score),
            // Grace period after losing the face: hold everything.
            None => (None, None),
        };

        Ok(self.outcome(transition, trigger))
    }

    /// Operator acknowledgment: restarts the fail-safe clock in WARNING or
    /// ALARM. Rejected once the trigger is latched.
    pub fn acknowledge(&mut self, timestamp_ms: f64) -> Result<(), MonitorError> {
        if self.stage.is_terminal() {
            warn!("Acknowledgment rejected at {:.1}ms: trigger latched", timestamp_ms);
            return Err(MonitorError::TriggerLatched);
        }
        if self.stage != AlertStage::Nominal {
            info!(
                "Operator acknowledged {} at {:.1}ms, fail-safe clock restarted",
                self.stage.as_str(),
                timestamp_ms
            );
        }
        self.fail_safe_started_ms = timestamp_ms;
        Ok(())
    }

    /// Full reset, as performed by a new session.
    pub fn reset(&mut self) {
        let config = self.config.clone();
        *self = Self::new(&config);
    }

    fn outcome(
        &self,
        transition: Option<StageTransitionEvent>,
        trigger: Option<AutopilotTrigger>,
    ) -> TickOutcome {
        TickOutcome {
            stage: self.stage,
            transition,
            trigger,
        }
    }

    /// Map the tick input onto a severity signal. Returns `None` during the
    /// no-face grace period, which freezes all dwell accounting.
    fn evaluate_signal(
        &mut self,
        timestamp_ms: f64,
        score: Option<&FusionScore>,
    ) -> Option<SignalState> {
        match score {
            Some(score) => {
                self.no_face_since_ms = None;
                let (severity, cause) = if score.fatigue_score >= score.yawn_score {
                    (score.fatigue_score, TriggerCause::Fatigue)
                } else {
                    (score.yawn_score, TriggerCause::Yawn)
                };
                Some(SignalState {
                    severity,
                    cause,
                    confidence: score.confidence,
                    recovery_evidence: severity < self.config.warning_threshold,
                })
            }
            None => {
                let since = *self.no_face_since_ms.get_or_insert(timestamp_ms);
                if timestamp_ms - since >= self.config.no_face_grace_ms {
                    // Operator has been away from the sensor too long; that
                    // is itself a critical signal, with full confidence.
                    Some(SignalState {
                        severity: NO_FACE_SEVERITY,
                        cause: TriggerCause::NoFace,
                        confidence: 1.0,
                        recovery_evidence: false,
                    })
                } else {
                    debug!(
                        "No face at {:.1}ms, within grace ({:.0}ms elapsed)",
                        timestamp_ms,
                        timestamp_ms - since
                    );
                    None
                }
            }
        }
    }

    fn update_dwell_windows(&mut self, signal: &Option<SignalState>, dt_ms: f64) {
        let sig = match signal {
            Some(sig) => *sig,
            None => {
                // Grace tick: freeze accumulated values, break continuity so
                // the interval spanning the gap never counts as sustained.
                self.prev_signal = None;
                return;
            }
        };

        if let Some(prev) = self.prev_signal {
            let warn_t = self.config.warning_threshold;
            let alarm_t = self.config.alarm_threshold;
            let crit_t = self.config.critical_threshold;

            if sig.severity >= warn_t && prev.severity >= warn_t {
                self.above_warning_ms += dt_ms;
            }
            if sig.severity >= alarm_t && prev.severity >= alarm_t {
                self.above_alarm_ms += dt_ms;
            }
            if sig.severity >= crit_t && prev.severity >= crit_t {
                self.above_critical_ms += dt_ms;
            }
            if sig.recovery_evidence && prev.recovery_evidence {
                self.below_recovery_ms += dt_ms;
            }
        }

        if sig.severity < self.config.warning_threshold {
            self.above_warning_ms = 0.0;
        }
        if sig.severity < self.config.alarm_threshold {
            self.above_alarm_ms = 0.0;
        }
        if sig.severity < self.config.critical_threshold {
            self.above_critical_ms = 0.0;
        }
        if !sig.recovery_evidence {
            self.below_recovery_ms = 0.0;
        }

        self.prev_signal = Some(sig);
    }

    /// Evaluate at most one stage transition for this tick.
    fn evaluate_transition(
        &mut self,
        timestamp_ms: f64,
        sig: &SignalState,
        score: Option<&FusionScore>,
    ) -> (Option<StageTransitionEvent>, Option<AutopilotTrigger>) {
        let stage_elapsed_ms = timestamp_ms - self.fail_safe_started_ms;
        let confident = sig.confidence >= self.config.min_confidence;

        match self.stage {
            AlertStage::Nominal => {
                if self.above_warning_ms >= self.config.warning_dwell_ms {
                    let event = self.transition(AlertStage::Warning, timestamp_ms, sig, score);
                    return (Some(event), None);
                }
            }

            AlertStage::Warning => {
                let sustained = self.above_alarm_ms >= self.config.alarm_dwell_ms;
                let timed_out = stage_elapsed_ms >= self.config.max_warning_ms;
                if sustained || timed_out {
                    if !confident {
                        debug!(
                            "ALARM escalation suppressed at {:.1}ms: confidence {:.2} below {:.2}",
                            timestamp_ms, sig.confidence, self.config.min_confidence
                        );
                    } else {
                        if timed_out && !sustained {
                            warn!(
                                "⏰ WARNING held {:.0}ms without recovery, escalating",
                                stage_elapsed_ms
                            );
                        }
                        let event = self.transition(AlertStage::Alarm, timestamp_ms, sig, score);
                        return (Some(event), None);
                    }
                } else if self.below_recovery_ms >= self.config.recovery_window_ms {
                    let event = self.transition(AlertStage::Nominal, timestamp_ms, sig, score);
                    return (Some(event), None);
                }
            }

            AlertStage::Alarm => {
                let sustained = self.above_critical_ms >= self.config.critical_dwell_ms;
                let timed_out = stage_elapsed_ms >= self.config.max_alarm_ms;
                if sustained || timed_out {
                    if !confident {
                        debug!(
                            "Trigger suppressed at {:.1}ms: confidence {:.2} below {:.2}",
                            timestamp_ms, sig.confidence, self.config.min_confidence
                        );
                    } else {
                        if timed_out && !sustained {
                            warn!(
                                "⏰ ALARM unacknowledged for {:.0}ms, handing over",
                                stage_elapsed_ms
                            );
                        }
                        let event =
                            self.transition(AlertStage::AutopilotTrigger, timestamp_ms, sig, score);
                        self.trigger_fired = true;
                        let trigger = AutopilotTrigger {
                            timestamp_ms,
                            cause: sig.cause,
                            severity: sig.severity,
                        };
                        info!(
                            "🚨 AUTOPILOT TRIGGER at {:.1}ms (cause: {}, severity {:.2})",
                            timestamp_ms,
                            sig.cause.as_str(),
                            sig.severity
                        );
                        return (Some(event), Some(trigger));
                    }
                } else if self.below_recovery_ms >= self.config.recovery_window_ms {
                    let event = self.transition(AlertStage::Warning, timestamp_ms, sig, score);
                    return (Some(event), None);
                }
            }

            AlertStage::AutopilotTrigger => {}
        }

        (None, None)
    }

    fn transition(
        &mut self,
        to: AlertStage,
        timestamp_ms: f64,
        sig: &SignalState,
        score: Option<&FusionScore>,
    ) -> StageTransitionEvent {
        let from = self.stage;
        info!(
            "Stage: {} → {} at {:.1}ms (cause: {}, severity {:.2})",
            from.as_str(),
            to.as_str(),
            timestamp_ms,
            sig.cause.as_str(),
            sig.severity
        );

        self.stage = to;
        self.fail_safe_started_ms = timestamp_ms;
        self.below_recovery_ms = 0.0;

        StageTransitionEvent {
            from_stage: from,
            to_stage: to,
            timestamp_ms,
            cause: sig.cause,
            severity: sig.severity,
            confidence: sig.confidence,
            score: score.copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EscalationConfig {
        EscalationConfig {
            warning_threshold: 0.3,
            alarm_threshold: 0.6,
            critical_threshold: 0.85,
            warning_dwell_ms: 2000.0,
            alarm_dwell_ms: 1000.0,
            critical_dwell_ms: 1000.0,
            recovery_window_ms: 5000.0,
            max_warning_ms: 60_000.0,
            max_alarm_ms: 20_000.0,
            no_face_grace_ms: 2000.0,
            min_confidence: 0.5,
        }
    }

    fn score(ts: f64, fatigue: f32) -> FusionScore {
        FusionScore {
            timestamp_ms: ts,
            fatigue_score: fatigue,
            yawn_score: 0.0,
            confidence: 1.0,
        }
    }

    /// Feed a constant fatigue score at 1Hz over [from, to], collecting
    /// transitions.
    fn drive(
        machine: &mut EscalationStateMachine,
        from_s: u64,
        to_s: u64,
        fatigue: f32,
    ) -> Vec<StageTransitionEvent> {
        let mut events = Vec::new();
        for t in from_s..=to_s {
            let ts = t as f64 * 1000.0;
            let outcome = machine.tick(ts, Some(&score(ts, fatigue))).unwrap();
            events.extend(outcome.transition);
        }
        events
    }

    #[test]
    fn test_sustained_alarm_score_reaches_alarm() {
        let mut machine = EscalationStateMachine::new(&test_config());
        drive(&mut machine, 0, 10, 0.7);
        assert!(machine.stage().rank() >= AlertStage::Alarm.rank());
        assert_ne!(machine.stage(), AlertStage::AutopilotTrigger); // 0.7 < critical
    }

    #[test]
    fn test_escalation_never_skips_a_stage() {
        let mut machine = EscalationStateMachine::new(&test_config());
        let events = drive(&mut machine, 0, 20, 0.95);
        assert!(!events.is_empty());
        for event in &events {
            assert_eq!(
                event.to_stage.rank(),
                event.from_stage.rank() + 1,
                "{:?} skipped a stage",
                event
            );
        }
    }

    #[test]
    fn test_single_spike_does_not_alert() {
        let mut machine = EscalationStateMachine::new(&test_config());
        drive(&mut machine, 0, 3, 0.1);
        // One spike frame, then back to normal.
        machine.tick(4000.0, Some(&score(4000.0, 0.95))).unwrap();
        drive(&mut machine, 5, 10, 0.1);
        assert_eq!(machine.stage(), AlertStage::Nominal);
    }

    #[test]
    fn test_deescalation_waits_for_full_recovery_window() {
        let mut machine = EscalationStateMachine::new(&test_config());
        drive(&mut machine, 0, 2, 0.5);
        assert_eq!(machine.stage(), AlertStage::Warning);

        // Recovery starts at t=3s; the window is 5s of sustained low signal,
        // which has fully elapsed only at t=8s.
        let events = drive(&mut machine, 3, 7, 0.05);
        assert!(events.is_empty(), "de-escalated early: {:?}", events);
        assert_eq!(machine.stage(), AlertStage::Warning);

        let events = drive(&mut machine, 8, 8, 0.05);
        assert_eq!(events.len(), 1);
        assert_eq!(machine.stage(), AlertStage::Nominal);
    }

    #[test]
    fn test_recovery_interrupted_by_relapse_starts_over() {
        let mut machine = EscalationStateMachine::new(&test_config());
        drive(&mut machine, 0, 2, 0.5);
        assert_eq!(machine.stage(), AlertStage::Warning);

        drive(&mut machine, 3, 6, 0.05); // 3s of recovery progress
        drive(&mut machine, 7, 8, 0.5); // relapse wipes it
        let events = drive(&mut machine, 9, 13, 0.05); // only 4s below again
        assert!(events.is_empty());
        assert_eq!(machine.stage(), AlertStage::Warning);
    }

    #[test]
    fn test_trigger_is_terminal_and_fires_once() {
        let mut machine = EscalationStateMachine::new(&test_config());
        let mut triggers = 0;
        for t in 0..=30 {
            let ts = t as f64 * 1000.0;
            let fatigue = if t <= 10 { 0.95 } else { 0.0 };
            let outcome = machine.tick(ts, Some(&score(ts, fatigue))).unwrap();
            if outcome.trigger.is_some() {
                triggers += 1;
            }
        }
        assert_eq!(triggers, 1);
        assert_eq!(machine.stage(), AlertStage::AutopilotTrigger);
        assert!(machine.trigger_fired());

        // Acknowledgment cannot clear the latch.
        assert!(matches!(
            machine.acknowledge(31_000.0),
            Err(MonitorError::TriggerLatched)
        ));
    }

    #[test]
    fn test_out_of_order_tick_is_rejected_and_state_retained() {
        let mut machine = EscalationStateMachine::new(&test_config());
        drive(&mut machine, 0, 2, 0.5);
        assert_eq!(machine.stage(), AlertStage::Warning);

        let result = machine.tick(1500.0, Some(&score(1500.0, 0.0)));
        assert!(matches!(result, Err(MonitorError::OutOfOrder { .. })));
        assert_eq!(machine.stage(), AlertStage::Warning);

        // Duplicate timestamp is equally invalid.
        let result = machine.tick(2000.0, Some(&score(2000.0, 0.0)));
        assert!(matches!(result, Err(MonitorError::OutOfOrder { .. })));

        // A later tick is accepted again.
        assert!(machine.tick(3000.0, Some(&score(3000.0, 0.5))).is_ok());
    }

    #[test]
    fn test_low_confidence_caps_escalation_at_warning() {
        let mut machine = EscalationStateMachine::new(&test_config());
        for t in 0..=20 {
            let ts = t as f64 * 1000.0;
            let mut s = score(ts, 0.95);
            s.confidence = 0.2;
            machine.tick(ts, Some(&s)).unwrap();
        }
        assert_eq!(machine.stage(), AlertStage::Warning);
    }

    #[test]
    fn test_warning_timeout_escalates_without_alarm_score() {
        let config = EscalationConfig {
            max_warning_ms: 5000.0,
            ..test_config()
        };
        let mut machine = EscalationStateMachine::new(&config);
        // 0.4 sits between warning (0.3) and alarm (0.6) thresholds.
        let events = drive(&mut machine, 0, 10, 0.4);
        assert_eq!(machine.stage(), AlertStage::Alarm);
        let alarm_entry = events.iter().find(|e| e.to_stage == AlertStage::Alarm);
        assert!(alarm_entry.is_some());
    }

    #[test]
    fn test_acknowledge_restarts_warning_fail_safe() {
        let config = EscalationConfig {
            max_warning_ms: 5000.0,
            ..test_config()
        };
        let mut machine = EscalationStateMachine::new(&config);
        drive(&mut machine, 0, 2, 0.4); // WARNING at t=2s
        assert_eq!(machine.stage(), AlertStage::Warning);

        machine.acknowledge(4000.0).unwrap();
        drive(&mut machine, 5, 8, 0.4); // fail-safe restarted, 5s not yet elapsed
        assert_eq!(machine.stage(), AlertStage::Warning);
        drive(&mut machine, 9, 9, 0.4); // t=9s: 5s past the acknowledgment
        assert_eq!(machine.stage(), AlertStage::Alarm);
    }

    #[test]
    fn test_unacknowledged_alarm_hands_over() {
        let config = EscalationConfig {
            max_warning_ms: 4000.0,
            max_alarm_ms: 6000.0,
            ..test_config()
        };
        let mut machine = EscalationStateMachine::new(&config);
        let mut trigger_count = 0;
        for t in 0..=20 {
            let ts = t as f64 * 1000.0;
            // Never reaches the critical threshold; only fail-safes escalate.
            let outcome = machine.tick(ts, Some(&score(ts, 0.4))).unwrap();
            if outcome.trigger.is_some() {
                trigger_count += 1;
            }
        }
        assert_eq!(machine.stage(), AlertStage::AutopilotTrigger);
        assert_eq!(trigger_count, 1);
    }

    #[test]
    fn test_no_face_escalates_like_sustained_critical() {
        let mut with_no_face = EscalationStateMachine::new(&test_config());
        for t in 0..=10 {
            let ts = t as f64 * 1000.0;
            with_no_face.tick(ts, None).unwrap();
        }
        assert_eq!(with_no_face.stage(), AlertStage::AutopilotTrigger);
        assert!(with_no_face.trigger_fired());
    }

    #[test]
    fn test_no_face_within_grace_is_inert() {
        let mut machine = EscalationStateMachine::new(&test_config());
        machine.tick(0.0, None).unwrap();
        machine.tick(1000.0, None).unwrap();
        assert_eq!(machine.stage(), AlertStage::Nominal);

        // Face returns before the 2s grace elapses: nothing accumulated.
        let events = drive(&mut machine, 2, 8, 0.05);
        assert!(events.is_empty());
        assert_eq!(machine.stage(), AlertStage::Nominal);
    }

    #[test]
    fn test_no_face_freezes_recovery_progress() {
        let mut machine = EscalationStateMachine::new(&test_config());
        drive(&mut machine, 0, 2, 0.5);
        assert_eq!(machine.stage(), AlertStage::Warning);

        // 3s of recovery, then the face disappears. Absence is not
        // evidence of recovery, so the window must not complete at t=8s.
        drive(&mut machine, 3, 6, 0.05);
        machine.tick(7000.0, None).unwrap();
        machine.tick(8000.0, None).unwrap();
        assert_eq!(machine.stage(), AlertStage::Warning);
    }

    #[test]
    fn test_yawn_signal_escalates_and_is_recorded_as_cause() {
        let mut machine = EscalationStateMachine::new(&test_config());
        let mut entry = None;
        for t in 0..=5 {
            let ts = t as f64 * 1000.0;
            let s = FusionScore {
                timestamp_ms: ts,
                fatigue_score: 0.1,
                yawn_score: 0.5,
                confidence: 1.0,
            };
            let outcome = machine.tick(ts, Some(&s)).unwrap();
            if let Some(event) = outcome.transition {
                entry = Some(event);
            }
        }
        let entry = entry.expect("expected a WARNING entry");
        assert_eq!(entry.to_stage, AlertStage::Warning);
        assert_eq!(entry.cause, TriggerCause::Yawn);
    }
}
