// src/normalizer.rs

use crate::types::{NormalizedSample, NormalizerConfig, RatioSample};
use std::collections::VecDeque;
use tracing::debug;

/// Upper bound for a physically plausible mouth aspect ratio.
const MAR_MAX: f32 = 3.0;

/// Temporal smoother for raw EAR/MAR samples using a sliding window.
///
/// Single-frame sensor noise (a blink, a landmark glitch) is averaged out
/// before classification. During warm-up the partial window is used as-is;
/// the fill fraction is reported so downstream confidence can reflect it.
pub struct SignalNormalizer {
    window: VecDeque<(f32, f32)>,
    window_size: usize,
    previous: Option<(f64, f32, f32)>,
}

impl SignalNormalizer {
    pub fn new(config: &NormalizerConfig) -> Self {
        let window_size = config.window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            previous: None,
        }
    }

    /// Clamp, smooth, and differentiate one raw sample.
    pub fn normalize(&mut self, raw: RatioSample) -> NormalizedSample {
        let (ear, ear_clamped) = clamp_ratio(raw.ear, 0.0, 1.0);
        let (mar, mar_clamped) = clamp_ratio(raw.mar, 0.0, MAR_MAX);
        let clamped = ear_clamped || mar_clamped;

        if clamped {
            debug!(
                "Clamped malformed sample at {:.1}ms: ear={} mar={}",
                raw.timestamp_ms, raw.ear, raw.mar
            );
        }

        self.window.push_back((ear, mar));
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let count = self.window.len() as f32;
        let smoothed_ear = self.window.iter().map(|(e, _)| e).sum::<f32>() / count;
        let smoothed_mar = self.window.iter().map(|(_, m)| m).sum::<f32>() / count;

        let (ear_velocity, mar_velocity) = match self.previous {
            Some((prev_ts, prev_ear, prev_mar)) => {
                let dt_s = ((raw.timestamp_ms - prev_ts) / 1000.0) as f32;
                if dt_s > 0.0 {
                    (
                        (smoothed_ear - prev_ear) / dt_s,
                        (smoothed_mar - prev_mar) / dt_s,
                    )
                } else {
                    (0.0, 0.0)
                }
            }
            None => (0.0, 0.0),
        };

        self.previous = Some((raw.timestamp_ms, smoothed_ear, smoothed_mar));

        NormalizedSample {
            timestamp_ms: raw.timestamp_ms,
            ear: smoothed_ear,
            mar: smoothed_mar,
            ear_velocity,
            mar_velocity,
            clamped,
            window_fill: self.window.len() as f32 / self.window_size as f32,
        }
    }

    /// Reset for a new session.
    pub fn reset(&mut self) {
        self.window.clear();
        self.previous = None;
    }
}

/// Clamp into [lo, hi]; non-finite values pin to the low bound.
fn clamp_ratio(value: f32, lo: f32, hi: f32) -> (f32, bool) {
    if !value.is_finite() {
        return (lo, true);
    }
    if value < lo {
        (lo, true)
    } else if value > hi {
        (hi, true)
    } else {
        (value, false)
    }
}
