//! Field extraction from raw device payloads.
//!
//! Each canonical field is backed by an ordered list of [`FieldSource`]s. The
//! first source that resolves to a present, non-zero number wins; when none do
//! the field is zero. Supporting a new firmware revision means adding a source
//! to a table, not writing new lookup code.

use crate::config::CircuitConfig;
use jsonpath_lib as jsonpath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where to find one value in a payload.
///
/// The path is addressed by its first character:
/// - `$...` is a JSONPath expression (`$.inv.outTemp`)
/// - `/...` is a JSON pointer (`/breakers/3/kw`)
/// - anything else is a literal top-level key, dots included
///   (`hs_yj751_bms_slave_addr.1.soc`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldSource {
    Path(String),
    Scaled { path: String, scale: f64 },
}

impl FieldSource {
    pub fn path(&self) -> &str {
        match self {
            FieldSource::Path(p) => p,
            FieldSource::Scaled { path, .. } => path,
        }
    }

    pub fn scale(&self) -> f64 {
        match self {
            FieldSource::Path(_) => 1.0,
            FieldSource::Scaled { scale, .. } => *scale,
        }
    }

    /// Resolve this source against a payload. Missing, non-numeric and
    /// non-finite values all come back as `None`.
    pub fn resolve(&self, payload: &Value) -> Option<f64> {
        let raw = lookup(payload, self.path())?;
        let n = as_number(&raw)? * self.scale();
        n.is_finite().then_some(n)
    }
}

impl From<&str> for FieldSource {
    fn from(path: &str) -> Self {
        FieldSource::Path(path.to_string())
    }
}

/// Precedence tables for battery pack payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryFields {
    pub state_of_charge: Vec<FieldSource>,
    pub watts_in: Vec<FieldSource>,
    pub watts_out: Vec<FieldSource>,
    pub temperature: Vec<FieldSource>,
}

impl Default for BatteryFields {
    fn default() -> Self {
        Self {
            state_of_charge: sources(&[
                "hs_yj751_bms_slave_addr.1.soc",
                "$.hs_yj751_pd_appshow_addr.soc",
                "$.soc",
            ]),
            watts_in: sources(&[
                "$.hs_yj751_pd_appshow_addr.wattsInSum",
                "$.hs_yj751_pd_backend_addr.bmsInputWatts",
                "hs_yj751_bms_slave_addr.1.inputWatts",
                "$.wattsInSum",
            ]),
            watts_out: sources(&[
                "$.hs_yj751_pd_appshow_addr.wattsOutSum",
                "$.hs_yj751_pd_backend_addr.bmsOutputWatts",
                "hs_yj751_bms_slave_addr.1.outputWatts",
                "$.wattsOutSum",
            ]),
            temperature: sources(&[
                "hs_yj751_bms_slave_addr.1.temp",
                "hs_yj751_bms_slave_addr.1.cellTemp",
                "hs_yj751_bms_slave_addr.1.maxCellTemp",
                "$.batt",
            ]),
        }
    }
}

/// Precedence tables for the distribution panel itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelFields {
    /// Every source is read and the hottest one reported.
    pub inverter_temperature: Vec<FieldSource>,
}

impl Default for PanelFields {
    fn default() -> Self {
        Self {
            inverter_temperature: sources(&["$.inv.dcInTemp", "$.inv.outTemp", "$.invt"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldTables {
    #[serde(default)]
    pub battery: BatteryFields,
    #[serde(default)]
    pub panel: PanelFields,
}

/// Canonical per-device snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviceReading {
    pub state_of_charge: f64,
    pub watts_in: f64,
    pub watts_out: f64,
    pub temperature: f64,
    pub online: bool,
}

/// Canonical per-circuit snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CircuitReading {
    pub index: u8,
    pub watts: f64,
    pub amps: f64,
    pub voltage: f64,
    pub is_energized: bool,
}

#[derive(Debug, Clone)]
struct CircuitFields {
    index: u8,
    power: Vec<FieldSource>,
    amps: Vec<FieldSource>,
    voltage: Vec<FieldSource>,
}

/// Turns raw payloads into canonical readings. Built once from configuration.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    battery: BatteryFields,
    panel: PanelFields,
    circuits: Vec<CircuitFields>,
    noise_floor_w: f64,
}

impl FieldExtractor {
    pub fn new(tables: &FieldTables, circuits: &[CircuitConfig], noise_floor_w: f64) -> Self {
        let circuits = circuits
            .iter()
            .map(|c| CircuitFields {
                index: c.index,
                power: c.power_sources(),
                amps: c.amps_sources(),
                voltage: c.voltage_sources(),
            })
            .collect();
        Self {
            battery: tables.battery.clone(),
            panel: tables.panel.clone(),
            circuits,
            noise_floor_w,
        }
    }

    /// `online` comes from the transport's connectivity signal; it is never
    /// inferred from the payload.
    pub fn battery(&self, payload: &Value, online: bool) -> DeviceReading {
        DeviceReading {
            state_of_charge: first_present(payload, &self.battery.state_of_charge),
            watts_in: first_present(payload, &self.battery.watts_in),
            watts_out: first_present(payload, &self.battery.watts_out),
            temperature: first_present(payload, &self.battery.temperature),
            online,
        }
    }

    pub fn circuits(&self, payload: &Value) -> Vec<CircuitReading> {
        self.circuits
            .iter()
            .map(|c| {
                let watts = first_present(payload, &c.power);
                CircuitReading {
                    index: c.index,
                    watts,
                    amps: first_present(payload, &c.amps),
                    voltage: first_present(payload, &c.voltage),
                    is_energized: watts > self.noise_floor_w,
                }
            })
            .collect()
    }

    pub fn inverter_temperature(&self, payload: &Value) -> f64 {
        self.panel
            .inverter_temperature
            .iter()
            .filter_map(|s| s.resolve(payload))
            .fold(0.0, f64::max)
    }
}

/// First non-zero value across `sources`, in order; zero if none.
pub fn first_present(payload: &Value, sources: &[FieldSource]) -> f64 {
    sources
        .iter()
        .filter_map(|s| s.resolve(payload))
        .find(|v| *v != 0.0)
        .unwrap_or(0.0)
}

fn lookup(payload: &Value, path: &str) -> Option<Value> {
    if path.starts_with('$') {
        jsonpath::select(payload, path)
            .ok()
            .and_then(|v| v.into_iter().next().cloned())
    } else if path.starts_with('/') {
        payload.pointer(path).cloned()
    } else {
        payload.get(path).cloned()
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn sources(paths: &[&str]) -> Vec<FieldSource> {
    paths.iter().map(|p| FieldSource::from(*p)).collect()
}
