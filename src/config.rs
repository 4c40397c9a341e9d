use crate::error::{AppError, Result};
use crate::telemetry::classify::{FloorProfile, LoadProfile, TemperatureProfile};
use crate::telemetry::extract::{FieldSource, FieldTables};
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub poll: Option<PollConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    pub devices: Vec<DeviceConfig>,
    #[serde(default = "default_circuits")]
    pub circuits: Vec<CircuitConfig>,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Field precedence tables; the built-in tables cover known firmware.
    #[serde(default)]
    pub fields: FieldTables,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: Option<u64>,
    pub clean_session: Option<bool>,
    #[serde(default)]
    pub qos: u8,
}

fn default_mqtt_port() -> u16 {
    8883
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Returns `{"code": "0", "data": [{"sn": ..., "online": 0|1}]}`.
    pub device_list_url: Option<String>,
    /// Per-device quota URL; `{sn}` is replaced with the device serial.
    pub quota_url: String,
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_poll_interval() -> u64 {
    1
}

fn default_poll_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

fn default_server_host() -> String {
    "0.0.0.0".into()
}

fn default_server_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Battery,
    Panel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    /// Serial used by the polling transport.
    pub serial: Option<String>,
    /// MQTT topic filter (`+` and `#` wildcards allowed).
    pub topic: Option<String>,
    /// Overrides `monitor.battery_capacity_wh` for this pack.
    pub capacity_wh: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub index: u8,
    pub name: String,
    pub leg: u8,
    pub breaker_amps: f64,
    /// Panel label such as "L11"; derives the reference firmware field names
    /// when no explicit sources are given.
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub power: Vec<FieldSource>,
    #[serde(default)]
    pub amps: Vec<FieldSource>,
    #[serde(default)]
    pub voltage: Vec<FieldSource>,
}

impl CircuitConfig {
    pub fn power_sources(&self) -> Vec<FieldSource> {
        self.sources_or_derived(&self.power, "hs_yj751_pd_appshow_addr", "Pwr")
    }

    pub fn amps_sources(&self) -> Vec<FieldSource> {
        self.sources_or_derived(&self.amps, "hs_yj751_pd_backend_addr", "Amp")
    }

    pub fn voltage_sources(&self) -> Vec<FieldSource> {
        self.sources_or_derived(&self.voltage, "hs_yj751_pd_backend_addr", "Vol")
    }

    fn sources_or_derived(&self, explicit: &[FieldSource], block: &str, suffix: &str) -> Vec<FieldSource> {
        if !explicit.is_empty() {
            return explicit.to_vec();
        }
        match &self.display {
            Some(label) => vec![FieldSource::Path(format!("$.{block}.outAc{label}{suffix}"))],
            None => Vec::new(),
        }
    }
}

/// Reference panel: six circuits per leg, indexed 0..12.
pub fn default_circuits() -> Vec<CircuitConfig> {
    const TABLE: [(&str, u8, f64, &str); 12] = [
        ("Kitchen", 1, 20.0, "L11"),
        ("Living Room", 1, 20.0, "L12"),
        ("Circuit L13", 1, 15.0, "L13"),
        ("Master Bedroom", 1, 15.0, "L14"),
        ("Circuit L15", 1, 15.0, "L15"),
        ("Circuit L16", 1, 20.0, "L16"),
        ("Garage", 2, 20.0, "L21"),
        ("Office", 2, 15.0, "L22"),
        ("Circuit L23", 2, 15.0, "L23"),
        ("Circuit L24", 2, 15.0, "L24"),
        ("Circuit L25", 2, 20.0, "L25"),
        ("Circuit L26", 2, 20.0, "L26"),
    ];
    TABLE
        .iter()
        .enumerate()
        .map(|(i, (name, leg, breaker, display))| CircuitConfig {
            index: i as u8,
            name: (*name).to_string(),
            leg: *leg,
            breaker_amps: *breaker,
            display: Some((*display).to_string()),
            power: Vec::new(),
            amps: Vec::new(),
            voltage: Vec::new(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_battery_temperature")]
    pub battery_temperature: TemperatureProfile,
    #[serde(default = "default_inverter_temperature")]
    pub inverter_temperature: TemperatureProfile,
    #[serde(default = "default_circuit_load")]
    pub circuit_load: LoadProfile,
    #[serde(default = "default_leg_imbalance")]
    pub leg_imbalance: LoadProfile,
    /// Total output as percent of `monitor.inverter_output_w`.
    #[serde(default = "default_circuit_load")]
    pub output_load: LoadProfile,
    #[serde(default = "default_state_of_charge")]
    pub state_of_charge: FloorProfile,
    #[serde(default = "default_runtime_hours")]
    pub runtime_hours: FloorProfile,
    /// Circuits drawing more than this are considered on.
    #[serde(default = "default_circuit_on_watts")]
    pub circuit_on_watts: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            battery_temperature: default_battery_temperature(),
            inverter_temperature: default_inverter_temperature(),
            circuit_load: default_circuit_load(),
            leg_imbalance: default_leg_imbalance(),
            output_load: default_circuit_load(),
            state_of_charge: default_state_of_charge(),
            runtime_hours: default_runtime_hours(),
            circuit_on_watts: default_circuit_on_watts(),
        }
    }
}

fn default_battery_temperature() -> TemperatureProfile {
    TemperatureProfile::BATTERY
}
fn default_inverter_temperature() -> TemperatureProfile {
    TemperatureProfile::INVERTER
}
fn default_circuit_load() -> LoadProfile {
    LoadProfile::CIRCUIT_LOAD
}
fn default_leg_imbalance() -> LoadProfile {
    LoadProfile::LEG_IMBALANCE
}
fn default_state_of_charge() -> FloorProfile {
    FloorProfile::STATE_OF_CHARGE
}
fn default_runtime_hours() -> FloorProfile {
    FloorProfile::RUNTIME_HOURS
}
fn default_circuit_on_watts() -> f64 {
    10.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_battery_capacity_wh")]
    pub battery_capacity_wh: f64,
    #[serde(default = "default_inverter_output_w")]
    pub inverter_output_w: f64,
    /// Trailing output samples kept for the runtime average.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_aging_after_secs")]
    pub aging_after_secs: u64,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            battery_capacity_wh: default_battery_capacity_wh(),
            inverter_output_w: default_inverter_output_w(),
            history_window: default_history_window(),
            min_samples: default_min_samples(),
            event_capacity: default_event_capacity(),
            aging_after_secs: default_aging_after_secs(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_battery_capacity_wh() -> f64 {
    6144.0
}
fn default_inverter_output_w() -> f64 {
    7200.0
}
fn default_history_window() -> usize {
    300
}
fn default_min_samples() -> usize {
    10
}
fn default_event_capacity() -> usize {
    50
}
fn default_aging_after_secs() -> u64 {
    10
}
fn default_stale_after_secs() -> u64 {
    30
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// `MQTT_USERNAME` / `MQTT_PASSWORD` override the broker credentials.
    /// Invalid topology or thresholds fail here, never per sample.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut cfg = Self::parse(&raw)?;

        if let Some(mqtt) = cfg.mqtt.as_mut() {
            if let Ok(username) = std::env::var("MQTT_USERNAME") {
                mqtt.username = Some(username);
            }
            if let Ok(password) = std::env::var("MQTT_PASSWORD") {
                mqtt.password = Some(password);
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let cfg = Self::parse(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn parse(raw: &str) -> Result<Self> {
        let expanded = expand_env_placeholders(raw)?;
        Ok(serde_yaml::from_str(&expanded)?)
    }

    pub fn device(&self, id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn capacity_wh(&self, device: &DeviceConfig) -> f64 {
        device.capacity_wh.unwrap_or(self.monitor.battery_capacity_wh)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AppError::Config(msg));

        if self.devices.is_empty() {
            return invalid("config must include at least one device".into());
        }
        let mut ids = HashSet::new();
        for d in &self.devices {
            if d.id.is_empty() {
                return invalid("device id cannot be empty".into());
            }
            if !ids.insert(d.id.as_str()) {
                return invalid(format!("duplicate device id: {}", d.id));
            }
            let capacity = self.capacity_wh(d);
            if d.kind == DeviceKind::Battery && !(capacity.is_finite() && capacity > 0.0) {
                return invalid(format!("device {}: capacity must be positive", d.id));
            }
        }

        let mut indexes = HashSet::new();
        for c in &self.circuits {
            if !indexes.insert(c.index) {
                return invalid(format!("duplicate circuit index: {}", c.index));
            }
            if c.leg != 1 && c.leg != 2 {
                return invalid(format!("circuit {}: leg must be 1 or 2", c.index));
            }
            if !(c.breaker_amps.is_finite() && c.breaker_amps > 0.0) {
                return invalid(format!("circuit {}: breaker rating must be positive", c.index));
            }
        }

        let t = &self.thresholds;
        t.battery_temperature
            .validate("battery_temperature")
            .and_then(|_| t.inverter_temperature.validate("inverter_temperature"))
            .and_then(|_| t.circuit_load.validate("circuit_load"))
            .and_then(|_| t.leg_imbalance.validate("leg_imbalance"))
            .and_then(|_| t.output_load.validate("output_load"))
            .and_then(|_| t.state_of_charge.validate("state_of_charge"))
            .and_then(|_| t.runtime_hours.validate("runtime_hours"))
            .map_err(AppError::Config)?;
        if !(t.circuit_on_watts.is_finite() && t.circuit_on_watts >= 0.0) {
            return invalid("circuit_on_watts must be non-negative".into());
        }

        let m = &self.monitor;
        if !(m.battery_capacity_wh.is_finite() && m.battery_capacity_wh > 0.0) {
            return invalid("battery_capacity_wh must be positive".into());
        }
        if !(m.inverter_output_w.is_finite() && m.inverter_output_w > 0.0) {
            return invalid("inverter_output_w must be positive".into());
        }
        if m.event_capacity == 0 {
            return invalid("event_capacity must be at least 1".into());
        }
        if m.min_samples >= m.history_window {
            return invalid("history_window must be larger than min_samples".into());
        }
        if m.aging_after_secs >= m.stale_after_secs {
            return invalid("aging_after_secs must be below stale_after_secs".into());
        }

        if let Some(poll) = &self.poll {
            if poll.interval_secs == 0 || poll.timeout_secs == 0 {
                return invalid("poll interval and timeout must be non-zero".into());
            }
            for (name, value) in &poll.headers {
                if HeaderName::from_bytes(name.as_bytes()).is_err() {
                    return invalid(format!("poll header name is invalid: {name}"));
                }
                if HeaderValue::from_str(value).is_err() {
                    return invalid(format!("poll header value is invalid for {name}"));
                }
            }
        }
        Ok(())
    }
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$"; JSONPath sources such as "$.soc" are left alone.
fn expand_env_placeholders(input: &str) -> std::result::Result<String, anyhow::Error> {
    use anyhow::Context;

    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close)
            .with_context(|| format!("unterminated env placeholder: missing '{close}'"))?;
        let val = std::env::var(&var)
            .with_context(|| format!("missing environment variable: {}", var))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Consumes up to and including `end`.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
