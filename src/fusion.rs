// src/fusion.rs
//
// Combines the normalized EAR/MAR signals into an instantaneous fatigue
// classification. Both sub-scores scale with how long the signal has sat
// past its threshold, so a normal blink scores near zero while a sustained
// closure ramps toward 1.0. The yawn score is deliberately kept out of the
// weighted sum's shadow: yawning is a precursor signal and the escalation
// machine evaluates it independently.

use crate::types::{FusionConfig, FusionScore, NormalizedSample};

pub struct FusionClassifier {
    config: FusionConfig,
    closed_ms: f64,
    yawn_ms: f64,
    last_timestamp_ms: Option<f64>,
}

impl FusionClassifier {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            config: config.clone(),
            closed_ms: 0.0,
            yawn_ms: 0.0,
            last_timestamp_ms: None,
        }
    }

    pub fn classify(&mut self, sample: &NormalizedSample) -> FusionScore {
        let dt_ms = self
            .last_timestamp_ms
            .map(|last| (sample.timestamp_ms - last).max(0.0))
            .unwrap_or(0.0);
        self.last_timestamp_ms = Some(sample.timestamp_ms);

        let eye_score = self.eye_closure_score(sample, dt_ms);
        let yawn_score = self.yawn_score(sample, dt_ms);

        let fatigue_score = (self.config.ear_weight * eye_score
            + self.config.mar_weight * yawn_score)
            .clamp(0.0, 1.0);

        FusionScore {
            timestamp_ms: sample.timestamp_ms,
            fatigue_score,
            yawn_score,
            confidence: sample.window_fill.clamp(0.0, 1.0),
        }
    }

    /// How closed the eyes are, scaled by how long they have stayed closed.
    fn eye_closure_score(&mut self, sample: &NormalizedSample, dt_ms: f64) -> f32 {
        let threshold = self.config.ear_close_threshold;

        if sample.ear < threshold {
            // A fast reopening mid-run means the closure is already ending
            // (blink recovery); don't keep crediting it.
            if sample.ear_velocity > self.config.reopen_rate {
                self.closed_ms = 0.0;
            } else {
                self.closed_ms += dt_ms;
            }
        } else {
            self.closed_ms = 0.0;
        }

        let depth = ((threshold - sample.ear) / threshold).clamp(0.0, 1.0);
        let ramp = (self.closed_ms / self.config.closure_saturation_ms).min(1.0) as f32;
        depth * ramp
    }

    /// How wide the mouth is past the yawn threshold, scaled by duration.
    fn yawn_score(&mut self, sample: &NormalizedSample, dt_ms: f64) -> f32 {
        let threshold = self.config.mar_yawn_threshold;

        if sample.mar > threshold {
            if sample.mar_velocity < -self.config.reopen_rate {
                self.yawn_ms = 0.0;
            } else {
                self.yawn_ms += dt_ms;
            }
        } else {
            self.yawn_ms = 0.0;
        }

        let depth = ((sample.mar - threshold) / threshold).clamp(0.0, 1.0);
        let ramp = (self.yawn_ms / self.config.yawn_saturation_ms).min(1.0) as f32;
        depth * ramp
    }

    /// Reset for a new session.
    pub fn reset(&mut self) {
        self.closed_ms = 0.0;
        self.yawn_ms = 0.0;
        self.last_timestamp_ms = None;
    }
}
