use std::collections::BTreeMap;

/// Running per-circuit maximum of observed load, in watts. Never decays.
#[derive(Debug, Clone, Default)]
pub struct PeakTracker {
    peaks: BTreeMap<u8, f64>,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, circuit: u8, value: f64) {
        if value.is_nan() {
            return;
        }
        let peak = self.peaks.entry(circuit).or_insert(value);
        if value > *peak {
            *peak = value;
        }
    }

    pub fn get(&self, circuit: u8) -> Option<f64> {
        self.peaks.get(&circuit).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_keeps_maximum() {
        let mut peaks = PeakTracker::new();
        for v in [0.5, 0.2, 0.9, 0.3] {
            peaks.update(4, v);
        }
        assert_eq!(peaks.get(4), Some(0.9));
    }

    #[test]
    fn test_peak_is_monotonic() {
        let mut peaks = PeakTracker::new();
        let mut previous = f64::MIN;
        for v in [120.0, 80.0, 1500.0, 0.0, f64::NAN, 900.0, 1500.5] {
            peaks.update(1, v);
            let now = peaks.get(1).unwrap();
            assert!(now >= previous);
            previous = now;
        }
        assert_eq!(peaks.get(1), Some(1500.5));
    }

    #[test]
    fn test_circuits_are_independent() {
        let mut peaks = PeakTracker::new();
        peaks.update(0, 10.0);
        peaks.update(1, 20.0);
        assert_eq!(peaks.get(0), Some(10.0));
        assert_eq!(peaks.get(1), Some(20.0));
        assert_eq!(peaks.get(2), None);
    }
}
