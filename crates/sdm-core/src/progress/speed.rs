//! Exponential moving averages for throughput.

use std::time::Instant;

/// `ema = α·x + (1-α)·ema_prev`, seeded with the first sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

impl Ema {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn update(&mut self, sample: f64) -> f64 {
        let next = match self.value {
            None => sample,
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }

    pub fn is_seeded(&self) -> bool {
        self.value.is_some()
    }
}

/// Turns a growing byte counter into a smoothed bytes/second rate.
///
/// The EMA is seeded by the first sample that observed bytes, so a slow start
/// (connection setup) does not drag the average down.
#[derive(Debug, Clone)]
pub struct SpeedMeter {
    ema: Ema,
    last_bytes: u64,
    last_at: Instant,
}

impl SpeedMeter {
    pub fn new(alpha: f64, bytes: u64, now: Instant) -> Self {
        Self {
            ema: Ema::new(alpha),
            last_bytes: bytes,
            last_at: now,
        }
    }

    /// Feed the counter's current value; returns the smoothed rate.
    pub fn sample(&mut self, bytes: u64, now: Instant) -> f64 {
        let dt = now.saturating_duration_since(self.last_at).as_secs_f64();
        if dt <= 0.0 {
            return self.ema.value();
        }
        // The counter can shrink when an unranged chunk is discarded.
        let delta = bytes.saturating_sub(self.last_bytes);
        self.last_bytes = bytes;
        self.last_at = now;
        if delta == 0 && !self.ema.is_seeded() {
            return 0.0;
        }
        self.ema.update(delta as f64 / dt)
    }

    pub fn speed(&self) -> f64 {
        self.ema.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn closed_form(alpha: f64, samples: &[f64]) -> f64 {
        let n = samples.len();
        let mut out = (1.0 - alpha).powi(n as i32 - 1) * samples[0];
        for (k, s) in samples.iter().enumerate().skip(1) {
            out += alpha * (1.0 - alpha).powi((n - 1 - k) as i32) * s;
        }
        out
    }

    #[test]
    fn incremental_matches_closed_form() {
        let samples = [100.0, 250.0, 0.0, 75.5, 1000.0, 420.0, 3.0];
        for alpha in [0.1, 0.3, 0.5, 1.0] {
            let mut ema = Ema::new(alpha);
            let mut last = 0.0;
            for s in samples {
                last = ema.update(s);
            }
            let want = closed_form(alpha, &samples);
            assert!((last - want).abs() < 1e-9, "alpha {alpha}: {last} vs {want}");
        }
    }

    #[test]
    fn alpha_one_tracks_latest() {
        let mut ema = Ema::new(1.0);
        ema.update(5.0);
        assert_eq!(ema.update(9.0), 9.0);
    }

    #[test]
    fn meter_seeds_on_first_bytes() {
        let t0 = Instant::now();
        let mut m = SpeedMeter::new(0.5, 0, t0);
        assert_eq!(m.sample(0, t0 + Duration::from_secs(1)), 0.0);
        assert_eq!(m.sample(0, t0 + Duration::from_secs(2)), 0.0);
        // First non-zero sample seeds directly.
        assert_eq!(m.sample(1000, t0 + Duration::from_secs(3)), 1000.0);
        // Then smooths: 0.5 * 3000 + 0.5 * 1000.
        assert_eq!(m.sample(4000, t0 + Duration::from_secs(4)), 2000.0);
        // Idle tick decays.
        assert_eq!(m.sample(4000, t0 + Duration::from_secs(5)), 1000.0);
        assert_eq!(m.speed(), 1000.0);
    }

    #[test]
    fn meter_ignores_zero_interval_and_shrink() {
        let t0 = Instant::now();
        let mut m = SpeedMeter::new(1.0, 500, t0);
        assert_eq!(m.sample(900, t0), 0.0);
        assert_eq!(m.sample(100, t0 + Duration::from_secs(1)), 0.0);
        assert_eq!(m.sample(600, t0 + Duration::from_secs(2)), 500.0);
    }
}
