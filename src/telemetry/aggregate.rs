use crate::telemetry::extract::{CircuitReading, DeviceReading};
use serde::Serialize;

/// System-wide figures for one cycle. Always rebuilt from the current
/// readings, never patched incrementally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Aggregate {
    pub total_input_w: f64,
    pub total_output_w: f64,
    pub average_soc: f64,
    pub reporting_devices: usize,
    pub available_kwh: f64,
    pub leg1_w: f64,
    pub leg2_w: f64,
    pub imbalance_pct: f64,
}

/// One battery's current reading and its rated capacity in Wh.
#[derive(Debug, Clone, Copy)]
pub struct BatteryInput {
    pub reading: DeviceReading,
    pub capacity_wh: f64,
}

/// One circuit's current reading and its static leg (1 or 2).
#[derive(Debug, Clone, Copy)]
pub struct CircuitInput {
    pub reading: CircuitReading,
    pub leg: u8,
}

pub fn aggregate(batteries: &[BatteryInput], circuits: &[CircuitInput]) -> Aggregate {
    let online: Vec<&BatteryInput> = batteries.iter().filter(|b| b.reading.online).collect();

    let total_input_w = online.iter().map(|b| b.reading.watts_in).sum();
    let total_output_w = online.iter().map(|b| b.reading.watts_out).sum();

    // A zero state of charge means "not reported"; those packs count neither
    // towards the average nor towards available capacity.
    let reporting: Vec<&&BatteryInput> = online
        .iter()
        .filter(|b| b.reading.state_of_charge > 0.0)
        .collect();
    let reporting_devices = reporting.len();
    let (average_soc, available_kwh) = if reporting_devices == 0 {
        (0.0, 0.0)
    } else {
        let avg = reporting.iter().map(|b| b.reading.state_of_charge).sum::<f64>()
            / reporting_devices as f64;
        let capacity_wh: f64 = reporting.iter().map(|b| b.capacity_wh).sum();
        (avg, avg / 100.0 * capacity_wh / 1000.0)
    };

    let leg_total = |leg: u8| -> f64 {
        circuits
            .iter()
            .filter(|c| c.leg == leg)
            .map(|c| c.reading.watts)
            .sum()
    };
    let (leg1_w, leg2_w) = (leg_total(1), leg_total(2));

    Aggregate {
        total_input_w,
        total_output_w,
        average_soc,
        reporting_devices,
        available_kwh,
        leg1_w,
        leg2_w,
        imbalance_pct: leg_imbalance(leg1_w, leg2_w),
    }
}

/// `|L1 - L2| / (L1 + L2) * 100`, or 0 when the legs carry no power.
pub fn leg_imbalance(leg1_w: f64, leg2_w: f64) -> f64 {
    let total = leg1_w + leg2_w;
    if total <= 0.0 || !total.is_finite() {
        return 0.0;
    }
    (leg1_w - leg2_w).abs() / total * 100.0
}
