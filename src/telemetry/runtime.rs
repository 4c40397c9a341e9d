use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RuntimeEstimate {
    pub hours: f64,
    pub minutes: f64,
    /// Output figure the estimate was computed from.
    pub average_output_w: f64,
}

/// Time-to-empty from available energy and a trailing mean of total output.
///
/// Until the window holds more than `min_samples` entries the instantaneous
/// output is used instead of the mean.
#[derive(Debug, Clone)]
pub struct RuntimeEstimator {
    window: VecDeque<f64>,
    capacity: usize,
    min_samples: usize,
}

impl RuntimeEstimator {
    pub fn new(capacity: usize, min_samples: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            min_samples,
        }
    }

    pub fn record(&mut self, output_w: f64) {
        if !output_w.is_finite() || self.capacity == 0 {
            return;
        }
        while self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(output_w);
    }

    pub fn samples(&self) -> usize {
        self.window.len()
    }

    pub fn average_output(&self, instantaneous_w: f64) -> f64 {
        if self.window.len() <= self.min_samples {
            return instantaneous_w;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }

    /// `None` while charging or idle (output <= 0) or when no energy is left.
    pub fn estimate(&self, output_w: f64, available_kwh: f64) -> Option<RuntimeEstimate> {
        if output_w.is_nan() || output_w <= 0.0 || available_kwh.is_nan() || available_kwh <= 0.0 {
            return None;
        }
        let average_output_w = self.average_output(output_w);
        if average_output_w.is_nan() || average_output_w <= 0.0 {
            return None;
        }
        let hours = available_kwh * 1000.0 / average_output_w;
        hours.is_finite().then_some(RuntimeEstimate {
            hours,
            minutes: hours * 60.0,
            average_output_w,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_kwh_at_one_kilowatt() {
        let est = RuntimeEstimator::new(300, 10);
        let r = est.estimate(1000.0, 5.0).unwrap();
        assert_eq!(r.hours, 5.0);
        assert_eq!(r.minutes, 300.0);
    }

    #[test]
    fn test_no_estimate_without_load_or_energy() {
        let est = RuntimeEstimator::new(300, 10);
        assert_eq!(est.estimate(0.0, 5.0), None);
        assert_eq!(est.estimate(-250.0, 5.0), None);
        assert_eq!(est.estimate(1000.0, 0.0), None);
        assert_eq!(est.estimate(f64::NAN, 5.0), None);
    }

    #[test]
    fn test_uses_instantaneous_until_enough_samples() {
        let mut est = RuntimeEstimator::new(300, 4);
        for _ in 0..4 {
            est.record(500.0);
        }
        assert_eq!(est.average_output(2000.0), 2000.0);
        est.record(500.0);
        assert_eq!(est.average_output(2000.0), 500.0);
        let r = est.estimate(2000.0, 1.0).unwrap();
        assert_eq!(r.hours, 2.0);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut est = RuntimeEstimator::new(3, 1);
        for w in [100.0, 100.0, 100.0, 400.0, 400.0, 400.0] {
            est.record(w);
        }
        assert_eq!(est.samples(), 3);
        assert_eq!(est.average_output(0.0), 400.0);
    }

    #[test]
    fn test_never_negative() {
        let mut est = RuntimeEstimator::new(10, 1);
        est.record(-3000.0);
        est.record(-3000.0);
        // Net charging on average even though this instant draws power.
        assert_eq!(est.estimate(100.0, 4.0), None);
    }

    #[test]
    fn test_exactly_min_samples_is_not_enough() {
        let mut est = RuntimeEstimator::new(300, 10);
        for _ in 0..10 {
            est.record(500.0);
        }
        assert_eq!(est.average_output(2000.0), 2000.0);
        est.record(500.0);
        assert_eq!(est.average_output(2000.0), 500.0);
    }
}
