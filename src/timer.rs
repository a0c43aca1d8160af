use std::time::Duration;

use crate::SeededRng;

// In seconds.
const JITTER_RANGE: f32 = 0.5;

/// Retransmission interval for a flight.
///
/// Without backoff the interval stays at `start_rto`. With backoff it doubles
/// per attempt and gets a jitter between -0.25s and 0.25s.
pub struct FlightBackoff {
    start_rto: Duration,
    backoff: bool,
    retries: Option<usize>,
    rto: Duration,
    jitter: f32,
    left: Option<usize>,
}

impl FlightBackoff {
    pub fn new(
        start_rto: Duration,
        backoff: bool,
        retries: Option<usize>,
        rng: &mut SeededRng,
    ) -> Self {
        let jitter = if backoff { Self::jitter(rng) } else { 0.0 };
        Self {
            start_rto,
            backoff,
            retries,
            rto: start_rto,
            jitter,
            left: retries,
        }
    }

    pub fn reset(&mut self, rng: &mut SeededRng) {
        self.rto = self.start_rto;
        self.jitter = if self.backoff { Self::jitter(rng) } else { 0.0 };
        self.left = self.retries;
    }

    pub fn rto(&self) -> Duration {
        if self.jitter < 0.0 {
            let duration = Duration::from_secs_f32(self.jitter.abs());
            self.rto.saturating_sub(duration)
        } else {
            self.rto + Duration::from_secs_f32(self.jitter)
        }
        .max(Duration::from_millis(50))
    }

    // A value between -0.25s and 0.25s
    fn jitter(rng: &mut SeededRng) -> f32 {
        rng.random::<f32>() * JITTER_RANGE - (JITTER_RANGE / 2.0)
    }

    pub fn attempt(&mut self, rng: &mut SeededRng) {
        if let Some(left) = self.left {
            let Some(n) = left.checked_sub(1) else {
                return;
            };
            self.left = Some(n);
        }

        if self.backoff {
            self.jitter = Self::jitter(rng);
            self.rto = self.rto.saturating_mul(2);
        }
    }

    pub fn can_retry(&self) -> bool {
        self.left.map(|l| l > 0).unwrap_or(true)
    }
}
