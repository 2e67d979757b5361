//! Remaining-time estimate from recent unit durations.

use std::collections::VecDeque;
use std::time::Duration;

/// Exponential moving average over the last `window` unit durations,
/// scaled by the number of units left.
///
/// A slow first file does not dominate once a few more have completed, and a
/// sudden slowdown (network share, larger RAWs) shows up within a few units.
#[derive(Debug, Clone)]
pub struct EtaEstimator {
    alpha: f64,
    window: usize,
    samples: VecDeque<Duration>,
}

impl EtaEstimator {
    pub fn new(window: usize, alpha: f64) -> Self {
        let window = window.max(1);
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Record how long one completed unit took.
    pub fn record(&mut self, took: Duration) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(took);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Smoothed duration of one unit, or `None` before any unit completed.
    pub fn average(&self) -> Option<Duration> {
        let mut samples = self.samples.iter();
        let first = samples.next()?.as_secs_f64();
        let ema = samples.fold(first, |ema, s| {
            self.alpha * s.as_secs_f64() + (1.0 - self.alpha) * ema
        });
        Some(Duration::from_secs_f64(ema.max(0.0)))
    }

    /// Estimated time for `remaining` more units.
    pub fn estimate(&self, remaining: usize) -> Option<Duration> {
        let per_unit = self.average()?;
        Some(per_unit.mul_f64(remaining as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn no_estimate_before_first_sample() {
        let eta = EtaEstimator::new(10, 0.3);
        assert_eq!(eta.estimate(5), None);
    }

    #[test]
    fn constant_durations_give_exact_estimate() {
        let mut eta = EtaEstimator::new(10, 0.3);
        for _ in 0..4 {
            eta.record(Duration::from_millis(200));
        }
        let estimate = eta.estimate(6).unwrap();
        assert!((estimate.as_secs_f64() - 1.2).abs() < 1e-6, "{estimate:?}");
        assert_eq!(eta.estimate(0), Some(Duration::ZERO));
    }

    #[test]
    fn window_forgets_old_samples() {
        let mut eta = EtaEstimator::new(2, 0.5);
        eta.record(Duration::from_secs(100));
        eta.record(Duration::from_secs(1));
        eta.record(Duration::from_secs(1));
        assert_eq!(eta.sample_count(), 2);
        assert_eq!(eta.average(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn recent_samples_weigh_more() {
        let mut eta = EtaEstimator::new(10, 0.5);
        eta.record(Duration::from_secs(1));
        eta.record(Duration::from_secs(3));
        // 0.5 * 3 + 0.5 * 1
        assert_eq!(eta.average(), Some(Duration::from_secs(2)));
    }

    proptest! {
        #[test]
        fn estimate_is_bounded_by_slowest_and_fastest_unit(
            millis in proptest::collection::vec(1u64..5_000, 1..50),
            remaining in 0usize..200,
            alpha in 0.05f64..1.0,
        ) {
            let mut eta = EtaEstimator::new(20, alpha);
            for m in &millis {
                eta.record(Duration::from_millis(*m));
            }
            let window: Vec<u64> = millis.iter().rev().take(20).copied().collect();
            let lo = *window.iter().min().unwrap() as f64 / 1000.0;
            let hi = *window.iter().max().unwrap() as f64 / 1000.0;

            let per_unit = eta.average().unwrap().as_secs_f64();
            prop_assert!(per_unit >= lo - 1e-6 && per_unit <= hi + 1e-6);

            let total = eta.estimate(remaining).unwrap().as_secs_f64();
            prop_assert!((total - per_unit * remaining as f64).abs() < 1e-3);
        }
    }
}
