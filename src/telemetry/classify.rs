//! Threshold profiles and the tiers they map readings onto.
//!
//! Every `classify` here is total: NaN and absurd sensor values land in a tier
//! instead of failing, and tiers never regress as the input grows (or, for
//! [`FloorProfile`], as it shrinks).

use serde::{Deserialize, Serialize};

/// Temperature severity, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempTier {
    Optimal,
    Warning,
    Critical,
    ShutdownImminent,
}

/// Load-style severity, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Ok,
    Warning,
    Critical,
}

/// Breakpoints in °C. `shutdown` is the rated cut-off reported in alerts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureProfile {
    pub optimal: f64,
    pub warning: f64,
    pub critical: f64,
    pub shutdown: f64,
}

impl TemperatureProfile {
    pub const BATTERY: Self = Self {
        optimal: 40.0,
        warning: 45.0,
        critical: 59.0,
        shutdown: 60.0,
    };

    pub const INVERTER: Self = Self {
        optimal: 40.0,
        warning: 54.0,
        critical: 64.0,
        shutdown: 65.0,
    };

    pub fn classify(&self, celsius: f64) -> TempTier {
        if celsius.is_nan() || celsius <= self.optimal {
            TempTier::Optimal
        } else if celsius <= self.warning {
            TempTier::Warning
        } else if celsius <= self.critical {
            TempTier::Critical
        } else {
            TempTier::ShutdownImminent
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), String> {
        let points = [self.optimal, self.warning, self.critical, self.shutdown];
        if points.iter().any(|p| !p.is_finite()) {
            return Err(format!("{name}: thresholds must be finite"));
        }
        if !(self.optimal < self.warning && self.warning < self.critical && self.critical <= self.shutdown) {
            return Err(format!(
                "{name}: thresholds must ascend (optimal < warning < critical <= shutdown)"
            ));
        }
        Ok(())
    }
}

/// Percent breakpoints where a higher value is worse: circuit load, leg
/// imbalance, inverter output load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    pub warning: f64,
    pub critical: f64,
}

impl LoadProfile {
    pub const CIRCUIT_LOAD: Self = Self {
        warning: 80.0,
        critical: 90.0,
    };

    pub const LEG_IMBALANCE: Self = Self {
        warning: 20.0,
        critical: 40.0,
    };

    pub fn classify(&self, percent: f64) -> Tier {
        if percent.is_nan() || percent < self.warning {
            Tier::Ok
        } else if percent < self.critical {
            Tier::Warning
        } else {
            Tier::Critical
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), String> {
        if !self.warning.is_finite() || !self.critical.is_finite() {
            return Err(format!("{name}: thresholds must be finite"));
        }
        if self.warning >= self.critical {
            return Err(format!("{name}: warning must be below critical"));
        }
        Ok(())
    }
}

/// Breakpoints where a lower value is worse: state of charge, hours of runtime left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloorProfile {
    pub warning: f64,
    pub critical: f64,
}

impl FloorProfile {
    pub const STATE_OF_CHARGE: Self = Self {
        warning: 30.0,
        critical: 15.0,
    };

    pub const RUNTIME_HOURS: Self = Self {
        warning: 4.0,
        critical: 1.0,
    };

    pub fn classify(&self, value: f64) -> Tier {
        if value.is_nan() || value <= self.critical {
            Tier::Critical
        } else if value <= self.warning {
            Tier::Warning
        } else {
            Tier::Ok
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), String> {
        if !self.warning.is_finite() || !self.critical.is_finite() {
            return Err(format!("{name}: thresholds must be finite"));
        }
        if self.critical >= self.warning {
            return Err(format!("{name}: critical must be below warning"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWEEP: [f64; 14] = [
        -1e9, -40.0, 0.0, 20.0, 40.0, 40.1, 45.0, 50.0, 59.0, 59.5, 60.0, 64.5, 120.0, 1e9,
    ];

    #[test]
    fn test_battery_temperature_tiers() {
        let p = TemperatureProfile::BATTERY;
        assert_eq!(p.classify(25.0), TempTier::Optimal);
        assert_eq!(p.classify(40.0), TempTier::Optimal);
        assert_eq!(p.classify(42.0), TempTier::Warning);
        assert_eq!(p.classify(45.0), TempTier::Warning);
        assert_eq!(p.classify(50.0), TempTier::Critical);
        assert_eq!(p.classify(59.0), TempTier::Critical);
        assert_eq!(p.classify(59.5), TempTier::ShutdownImminent);
    }

    #[test]
    fn test_temperature_is_total() {
        let p = TemperatureProfile::INVERTER;
        assert_eq!(p.classify(-273.0), TempTier::Optimal);
        assert_eq!(p.classify(f64::NEG_INFINITY), TempTier::Optimal);
        assert_eq!(p.classify(f64::INFINITY), TempTier::ShutdownImminent);
        assert_eq!(p.classify(f64::NAN), TempTier::Optimal);
    }

    #[test]
    fn test_tiers_are_monotonic() {
        for profile in [TemperatureProfile::BATTERY, TemperatureProfile::INVERTER] {
            let tiers: Vec<_> = SWEEP.iter().map(|v| profile.classify(*v)).collect();
            assert!(tiers.windows(2).all(|w| w[0] <= w[1]), "{tiers:?}");
        }
        for profile in [LoadProfile::CIRCUIT_LOAD, LoadProfile::LEG_IMBALANCE] {
            let tiers: Vec<_> = SWEEP.iter().map(|v| profile.classify(*v)).collect();
            assert!(tiers.windows(2).all(|w| w[0] <= w[1]), "{tiers:?}");
        }
        // Floor profiles get worse as the value drops.
        let tiers: Vec<_> = SWEEP
            .iter()
            .rev()
            .map(|v| FloorProfile::STATE_OF_CHARGE.classify(*v))
            .collect();
        assert!(tiers.windows(2).all(|w| w[0] <= w[1]), "{tiers:?}");
    }

    #[test]
    fn test_load_profile_boundaries() {
        let p = LoadProfile::CIRCUIT_LOAD;
        assert_eq!(p.classify(79.9), Tier::Ok);
        assert_eq!(p.classify(80.0), Tier::Warning);
        assert_eq!(p.classify(89.9), Tier::Warning);
        assert_eq!(p.classify(90.0), Tier::Critical);
        assert_eq!(p.classify(-5.0), Tier::Ok);
        assert_eq!(p.classify(1e12), Tier::Critical);
    }

    #[test]
    fn test_floor_profile() {
        let p = FloorProfile::STATE_OF_CHARGE;
        assert_eq!(p.classify(80.0), Tier::Ok);
        assert_eq!(p.classify(30.0), Tier::Warning);
        assert_eq!(p.classify(16.0), Tier::Warning);
        assert_eq!(p.classify(15.0), Tier::Critical);
        assert_eq!(p.classify(f64::NAN), Tier::Critical);
    }

    #[test]
    fn test_validate_rejects_unordered() {
        let bad = TemperatureProfile {
            optimal: 50.0,
            warning: 45.0,
            critical: 59.0,
            shutdown: 60.0,
        };
        assert!(bad.validate("battery").is_err());
        assert!(TemperatureProfile::BATTERY.validate("battery").is_ok());

        let bad = LoadProfile {
            warning: 90.0,
            critical: 80.0,
        };
        assert!(bad.validate("circuit_load").is_err());

        let bad = FloorProfile {
            warning: 10.0,
            critical: 20.0,
        };
        assert!(bad.validate("state_of_charge").is_err());
    }
}
