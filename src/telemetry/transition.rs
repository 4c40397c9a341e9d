//! Edge-triggered alerting.
//!
//! The detector remembers the last value it saw per entity and only speaks
//! when a new value lands on the other side of a boundary. The first
//! observation of an entity is recorded silently. When one sample skips past
//! several boundaries at once, only the most severe alert is returned.

use crate::telemetry::classify::{LoadProfile, TemperatureProfile};
use crate::telemetry::events::Alert;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct TransitionDetector {
    temperatures: HashMap<String, f64>,
    connectivity: HashMap<String, bool>,
    circuit_watts: HashMap<u8, f64>,
    circuit_load: HashMap<u8, f64>,
    leg_imbalance: Option<f64>,
}

impl TransitionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A temperature of exactly zero means the sensor field was absent; it is
    /// neither compared nor remembered.
    pub fn temperature(
        &mut self,
        entity: &str,
        label: &str,
        celsius: f64,
        profile: &TemperatureProfile,
    ) -> Option<Alert> {
        if celsius == 0.0 || celsius.is_nan() {
            return None;
        }
        let previous = self.temperatures.insert(entity.to_string(), celsius)?;

        if celsius > profile.critical && previous <= profile.critical {
            Some(Alert::error(format!(
                "{label} CRITICAL TEMP: {celsius:.1}°C (shutdown at {:.0}°C)",
                profile.shutdown
            )))
        } else if celsius > profile.warning && previous <= profile.warning {
            Some(Alert::warning(format!("{label} HIGH TEMP: {celsius:.1}°C")))
        } else if celsius <= profile.optimal && previous > profile.optimal {
            Some(Alert::info(format!("{label} temp normal: {celsius:.1}°C")))
        } else {
            None
        }
    }

    pub fn connectivity(&mut self, entity: &str, label: &str, online: bool) -> Option<Alert> {
        let previous = self.connectivity.insert(entity.to_string(), online)?;
        match (previous, online) {
            (false, true) => Some(Alert::info(format!("{label} online"))),
            (true, false) => Some(Alert::warning(format!("{label} offline"))),
            _ => None,
        }
    }

    /// On/off around the noise floor: energized strictly above `floor_w`.
    pub fn circuit_power(
        &mut self,
        circuit: u8,
        label: &str,
        watts: f64,
        amps: f64,
        floor_w: f64,
    ) -> Option<Alert> {
        let previous = self.circuit_watts.insert(circuit, watts)?;
        let (was_on, is_on) = (previous > floor_w, watts > floor_w);
        match (was_on, is_on) {
            (false, true) => Some(Alert::info(format!("{label} ON ({amps:.1}A)"))),
            (true, false) => Some(Alert::info(format!("{label} OFF"))),
            _ => None,
        }
    }

    /// Percent of breaker rating. The warning and critical boundaries are
    /// checked independently, so a slow climb reports both.
    pub fn circuit_load(
        &mut self,
        circuit: u8,
        label: &str,
        percent: f64,
        profile: &LoadProfile,
    ) -> Option<Alert> {
        if percent.is_nan() {
            return None;
        }
        let previous = self.circuit_load.insert(circuit, percent)?;

        if percent >= profile.critical && previous < profile.critical {
            Some(Alert::error(format!("{label} CRITICAL {percent:.0}% limit!")))
        } else if percent >= profile.warning && previous < profile.warning {
            Some(Alert::warning(format!("{label} at {percent:.0}% limit!")))
        } else if percent < profile.warning && previous >= profile.warning {
            Some(Alert::info(format!("{label} load normal: {percent:.0}%")))
        } else {
            None
        }
    }

    /// Strictly above a boundary is a crossing; landing exactly on the
    /// warning boundary from above is a recovery.
    pub fn leg_imbalance(
        &mut self,
        percent: f64,
        leg1_w: f64,
        leg2_w: f64,
        profile: &LoadProfile,
    ) -> Option<Alert> {
        if percent.is_nan() {
            return None;
        }
        let previous = self.leg_imbalance.replace(percent)?;

        if percent > profile.critical && previous <= profile.critical {
            Some(Alert::error(format!(
                "LEG IMBALANCE: {percent:.0}% (L1: {:.1}kW, L2: {:.1}kW)",
                leg1_w / 1000.0,
                leg2_w / 1000.0
            )))
        } else if percent > profile.warning && previous <= profile.warning {
            Some(Alert::warning(format!("Leg imbalance: {percent:.0}%")))
        } else if percent <= profile.warning && previous > profile.warning {
            Some(Alert::info(format!("Leg balance restored: {percent:.0}%")))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::events::Severity;

    const BATTERY: TemperatureProfile = TemperatureProfile::BATTERY;
    const LOAD: LoadProfile = LoadProfile::CIRCUIT_LOAD;

    fn temps(d: &mut TransitionDetector, values: &[f64]) -> Vec<Alert> {
        values
            .iter()
            .filter_map(|v| d.temperature("pack-1", "Pack 1", *v, &BATTERY))
            .collect()
    }

    #[test]
    fn test_first_observation_is_silent() {
        let mut d = TransitionDetector::new();
        assert_eq!(d.temperature("pack-1", "Pack 1", 62.0, &BATTERY), None);
        assert_eq!(d.connectivity("pack-1", "Pack 1", false), None);
        assert_eq!(d.circuit_power(0, "Kitchen", 500.0, 4.0, 10.0), None);
        assert_eq!(d.circuit_load(0, "Kitchen", 95.0, &LOAD), None);
        assert_eq!(d.leg_imbalance(55.0, 3000.0, 900.0, &LoadProfile::LEG_IMBALANCE), None);
    }

    #[test]
    fn test_rising_temperature_warns_once() {
        let mut d = TransitionDetector::new();
        let alerts = temps(&mut d, &[38.0, 44.0, 46.0, 47.0, 48.0]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].message, "Pack 1 HIGH TEMP: 46.0°C");
    }

    #[test]
    fn test_oscillating_below_boundary_is_silent() {
        let mut d = TransitionDetector::new();
        assert!(temps(&mut d, &[41.0, 44.9, 42.0, 45.0, 43.0, 44.0]).is_empty());
    }

    #[test]
    fn test_one_above_then_below_recovers_once() {
        let mut d = TransitionDetector::new();
        let alerts = temps(&mut d, &[39.0, 46.0, 39.5, 38.0]);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[1].severity, Severity::Info);
        assert_eq!(alerts[1].message, "Pack 1 temp normal: 39.5°C");
    }

    #[test]
    fn test_jump_reports_most_severe_only() {
        let mut d = TransitionDetector::new();
        let alerts = temps(&mut d, &[30.0, 61.0]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Error);
        assert_eq!(alerts[0].message, "Pack 1 CRITICAL TEMP: 61.0°C (shutdown at 60°C)");
    }

    #[test]
    fn test_absent_temperature_is_ignored() {
        let mut d = TransitionDetector::new();
        // The zero sample neither fires nor resets the remembered value.
        let alerts = temps(&mut d, &[46.0, 0.0, 47.0]);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_entities_are_tracked_separately() {
        let mut d = TransitionDetector::new();
        d.temperature("pack-1", "Pack 1", 30.0, &BATTERY);
        d.temperature("pack-2", "Pack 2", 50.0, &BATTERY);
        assert!(d.temperature("pack-2", "Pack 2", 50.0, &BATTERY).is_none());
        assert!(d.temperature("pack-1", "Pack 1", 50.0, &BATTERY).is_some());
    }

    #[test]
    fn test_connectivity_transitions() {
        let mut d = TransitionDetector::new();
        assert_eq!(d.connectivity("panel", "Smart Panel", true), None);
        assert_eq!(d.connectivity("panel", "Smart Panel", true), None);
        let off = d.connectivity("panel", "Smart Panel", false).unwrap();
        assert_eq!(off, Alert::warning("Smart Panel offline"));
        assert_eq!(d.connectivity("panel", "Smart Panel", false), None);
        let on = d.connectivity("panel", "Smart Panel", true).unwrap();
        assert_eq!(on, Alert::info("Smart Panel online"));
    }

    #[test]
    fn test_circuit_turns_on_once() {
        let mut d = TransitionDetector::new();
        assert_eq!(d.circuit_power(2, "Office", 5.0, 0.0, 10.0), None);
        let on = d.circuit_power(2, "Office", 15.0, 0.1, 10.0).unwrap();
        assert_eq!(on, Alert::info("Office ON (0.1A)"));
        assert_eq!(d.circuit_power(2, "Office", 20.0, 0.2, 10.0), None);
        assert_eq!(d.circuit_power(2, "Office", 20.0, 0.2, 10.0), None);
        // Exactly at the floor counts as off.
        let off = d.circuit_power(2, "Office", 10.0, 0.1, 10.0).unwrap();
        assert_eq!(off, Alert::info("Office OFF"));
    }

    #[test]
    fn test_circuit_load_warning_then_critical() {
        let mut d = TransitionDetector::new();
        assert_eq!(d.circuit_load(0, "Kitchen", 70.0, &LOAD), None);
        let warn = d.circuit_load(0, "Kitchen", 85.0, &LOAD).unwrap();
        assert_eq!(warn, Alert::warning("Kitchen at 85% limit!"));
        let crit = d.circuit_load(0, "Kitchen", 95.0, &LOAD).unwrap();
        assert_eq!(crit, Alert::error("Kitchen CRITICAL 95% limit!"));
        assert_eq!(d.circuit_load(0, "Kitchen", 96.0, &LOAD), None);
        // Dropping to the warning band is not a recovery.
        assert_eq!(d.circuit_load(0, "Kitchen", 85.0, &LOAD), None);
        let normal = d.circuit_load(0, "Kitchen", 50.0, &LOAD).unwrap();
        assert_eq!(normal.severity, Severity::Info);
    }

    #[test]
    fn test_circuit_load_jump_is_critical_only() {
        let mut d = TransitionDetector::new();
        d.circuit_load(3, "Garage", 10.0, &LOAD);
        let alert = d.circuit_load(3, "Garage", 99.0, &LOAD).unwrap();
        assert_eq!(alert.severity, Severity::Error);
    }

    #[test]
    fn test_leg_imbalance_crossings() {
        let profile = LoadProfile::LEG_IMBALANCE;
        let mut d = TransitionDetector::new();
        assert_eq!(d.leg_imbalance(10.0, 1100.0, 900.0, &profile), None);
        let warn = d.leg_imbalance(25.0, 1250.0, 750.0, &profile).unwrap();
        assert_eq!(warn, Alert::warning("Leg imbalance: 25%"));
        let crit = d.leg_imbalance(50.0, 3000.0, 1000.0, &profile).unwrap();
        assert_eq!(crit, Alert::error("LEG IMBALANCE: 50% (L1: 3.0kW, L2: 1.0kW)"));
        assert_eq!(d.leg_imbalance(45.0, 2900.0, 1100.0, &profile), None);
        let restored = d.leg_imbalance(5.0, 1050.0, 950.0, &profile).unwrap();
        assert_eq!(restored.severity, Severity::Info);
    }

    #[test]
    fn test_leg_imbalance_exact_boundaries() {
        let profile = LoadProfile::LEG_IMBALANCE;
        let mut d = TransitionDetector::new();
        assert_eq!(d.leg_imbalance(10.0, 1100.0, 900.0, &profile), None);
        assert_eq!(d.leg_imbalance(20.0, 1200.0, 800.0, &profile), None);
        assert_eq!(
            d.leg_imbalance(25.0, 1250.0, 750.0, &profile),
            Some(Alert::warning("Leg imbalance: 25%"))
        );
        assert_eq!(
            d.leg_imbalance(20.0, 1200.0, 800.0, &profile),
            Some(Alert::info("Leg balance restored: 20%"))
        );

        d.leg_imbalance(30.0, 1300.0, 700.0, &profile);
        assert_eq!(d.leg_imbalance(40.0, 1400.0, 600.0, &profile), None);
        assert_eq!(
            d.leg_imbalance(41.0, 1410.0, 590.0, &profile).map(|a| a.severity),
            Some(Severity::Error)
        );
    }
}
