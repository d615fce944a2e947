//! Adaptive rate control: a smoothed health score in `[0, 1]` scales an
//! endpoint's allowed rate between a floor and a ceiling. Every observed
//! outcome nudges the score by a fixed step rather than jumping straight to
//! 0 or 1, so a single blip does not collapse throughput.

use std::sync::atomic::{AtomicU64, Ordering};

const SCALE: f64 = 1_000_000.0;
const STEP: f64 = 0.05;

pub struct AdaptiveRateController {
    min_rate: f64,
    max_rate: f64,
    health_scaled: AtomicU64,
}

impl AdaptiveRateController {
    pub fn new(min_rate: f64, max_rate: f64) -> Self {
        Self { min_rate, max_rate, health_scaled: AtomicU64::new((1.0 * SCALE) as u64) }
    }

    pub fn health_score(&self) -> f64 {
        self.health_scaled.load(Ordering::Acquire) as f64 / SCALE
    }

    /// `current_rate = min_rate + (max_rate - min_rate) * health_score`.
    pub fn current_rate(&self) -> f64 {
        self.min_rate + (self.max_rate - self.min_rate) * self.health_score()
    }

    pub fn record_outcome(&self, success: bool) {
        let target = if success { 1.0 } else { 0.0 };
        loop {
            let current_scaled = self.health_scaled.load(Ordering::Acquire);
            let current = current_scaled as f64 / SCALE;
            let updated = current + STEP * (target - current);
            let updated_scaled = (updated.clamp(0.0, 1.0) * SCALE) as u64;
            if self
                .health_scaled
                .compare_exchange(current_scaled, updated_scaled, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_max_rate() {
        let controller = AdaptiveRateController::new(10.0, 100.0);
        assert_eq!(controller.current_rate(), 100.0);
    }

    #[test]
    fn sustained_failures_drag_the_rate_toward_the_floor() {
        let controller = AdaptiveRateController::new(10.0, 100.0);
        for _ in 0..200 {
            controller.record_outcome(false);
        }
        assert!(controller.current_rate() < 15.0);
    }

    #[test]
    fn recovery_after_failures_is_gradual_not_instant() {
        let controller = AdaptiveRateController::new(10.0, 100.0);
        for _ in 0..200 {
            controller.record_outcome(false);
        }
        controller.record_outcome(true);
        assert!(controller.current_rate() < 100.0);
        assert!(controller.current_rate() > 10.0);
    }
}
