//! The shared telemetry state.
//!
//! [`Monitor`] owns everything derived from incoming payloads behind a single
//! lock. Transports call the `on_*` entry points; presentation reads cloned
//! snapshots and formats them after the lock is released.

use crate::config::{Config, DeviceKind};
use crate::error::{AppError, Result};
use crate::telemetry::aggregate::{aggregate, BatteryInput, CircuitInput};
use crate::telemetry::{
    Alert, CircuitReading, DeviceReading, Event, EventLog, EventOrder, FieldExtractor,
    PeakTracker, RuntimeEstimate, RuntimeEstimator, Severity, TempTier, Tier, TransitionDetector,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

const INVERTER_ENTITY: &str = "inverter";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemSnapshot {
    /// Time of the payload this snapshot was computed from.
    pub timestamp: Option<DateTime<Utc>>,
    pub total_input_w: f64,
    pub total_output_w: f64,
    pub average_soc: f64,
    pub reporting_devices: usize,
    pub available_kwh: f64,
    pub leg1_w: f64,
    pub leg2_w: f64,
    pub imbalance_pct: f64,
    pub runtime: Option<RuntimeEstimate>,
    pub output_load_pct: f64,
    pub inverter_temperature: f64,
    pub active_circuits: usize,
    pub tiers: SnapshotTiers,
    pub devices: Vec<DeviceSummary>,
    pub circuits: Vec<CircuitSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotTiers {
    pub state_of_charge: Tier,
    pub output_load: Tier,
    pub leg_imbalance: Tier,
    pub inverter_temperature: Option<TempTier>,
    pub runtime: Option<Tier>,
}

impl Default for SnapshotTiers {
    fn default() -> Self {
        Self {
            state_of_charge: Tier::Critical,
            output_load: Tier::Ok,
            leg_imbalance: Tier::Ok,
            inverter_temperature: None,
            runtime: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub reading: Option<DeviceReading>,
    pub remaining_kwh: f64,
    pub soc_tier: Option<Tier>,
    pub temperature_tier: Option<TempTier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSummary {
    pub index: u8,
    pub name: String,
    pub leg: u8,
    pub breaker_amps: f64,
    pub reading: Option<CircuitReading>,
    pub load_pct: f64,
    pub load_tier: Tier,
    pub peak_w: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    NoData,
    Fresh,
    Aging,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub freshness: Freshness,
    pub last_update: Option<DateTime<Utc>>,
    pub age_secs: Option<f64>,
    pub successes: u64,
    pub failures: u64,
    pub success_rate_pct: f64,
}

#[derive(Debug, Clone)]
struct DeviceState {
    /// Last explicit connectivity signal from the transport, if any.
    online: Option<bool>,
    reading: Option<DeviceReading>,
    last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct MonitorState {
    detector: TransitionDetector,
    devices: BTreeMap<String, DeviceState>,
    circuits: BTreeMap<u8, CircuitReading>,
    inverter_temperature: f64,
    runtime: RuntimeEstimator,
    events: EventLog,
    peaks: PeakTracker,
    snapshot: SystemSnapshot,
    last_update: Option<DateTime<Utc>>,
    successes: u64,
    failures: u64,
}

pub struct Monitor {
    config: Config,
    extractor: FieldExtractor,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new(config: Config) -> Self {
        let extractor = FieldExtractor::new(
            &config.fields,
            &config.circuits,
            config.thresholds.circuit_on_watts,
        );
        let devices = config
            .devices
            .iter()
            .map(|d| {
                (
                    d.id.clone(),
                    DeviceState {
                        online: None,
                        reading: None,
                        last_seen: None,
                    },
                )
            })
            .collect();
        let state = MonitorState {
            detector: TransitionDetector::new(),
            devices,
            circuits: BTreeMap::new(),
            inverter_temperature: 0.0,
            runtime: RuntimeEstimator::new(
                config.monitor.history_window,
                config.monitor.min_samples,
            ),
            events: EventLog::new(config.monitor.event_capacity),
            peaks: PeakTracker::new(),
            snapshot: SystemSnapshot::default(),
            last_update: None,
            successes: 0,
            failures: 0,
        };
        let monitor = Self {
            config,
            extractor,
            state: Mutex::new(state),
        };
        {
            let mut state = monitor.lock();
            let snapshot = monitor.build_snapshot(&mut state, None, false);
            state.snapshot = snapshot;
        }
        monitor
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn on_reading(&self, device_id: &str, payload: &Value) -> Result<()> {
        self.on_reading_at(device_id, payload, Utc::now())
    }

    pub fn on_reading_at(&self, device_id: &str, payload: &Value, now: DateTime<Utc>) -> Result<()> {
        let device = self
            .config
            .device(device_id)
            .ok_or_else(|| AppError::UnknownDevice(device_id.to_string()))?;

        let mut state = self.lock();
        let mut alerts = Vec::new();

        match device.kind {
            DeviceKind::Battery => {
                let online = state
                    .devices
                    .get(device_id)
                    .and_then(|d| d.online)
                    .unwrap_or(true);
                let reading = self.extractor.battery(payload, online);
                alerts.extend(state.detector.temperature(
                    device_id,
                    &device.name,
                    reading.temperature,
                    &self.config.thresholds.battery_temperature,
                ));
                if let Some(d) = state.devices.get_mut(device_id) {
                    d.reading = Some(reading);
                }
            }
            DeviceKind::Panel => {
                let readings = self.extractor.circuits(payload);
                for (circuit, reading) in self.config.circuits.iter().zip(&readings) {
                    let load_pct = reading.amps / circuit.breaker_amps * 100.0;
                    alerts.extend(state.detector.circuit_power(
                        circuit.index,
                        &circuit.name,
                        reading.watts,
                        reading.amps,
                        self.config.thresholds.circuit_on_watts,
                    ));
                    alerts.extend(state.detector.circuit_load(
                        circuit.index,
                        &circuit.name,
                        load_pct,
                        &self.config.thresholds.circuit_load,
                    ));
                    state.peaks.update(circuit.index, reading.watts);
                }
                state.circuits = readings.into_iter().map(|r| (r.index, r)).collect();

                let inverter = self.extractor.inverter_temperature(payload);
                alerts.extend(state.detector.temperature(
                    INVERTER_ENTITY,
                    "Inverter",
                    inverter,
                    &self.config.thresholds.inverter_temperature,
                ));
                if inverter > 0.0 {
                    state.inverter_temperature = inverter;
                }
            }
        }

        if let Some(d) = state.devices.get_mut(device_id) {
            d.last_seen = Some(now);
        }
        state.last_update = Some(now);
        state.successes += 1;

        // Panel readings never change total output.
        let sample = device.kind == DeviceKind::Battery;
        let snapshot = self.build_snapshot(&mut state, Some(now), sample);
        if device.kind == DeviceKind::Panel {
            alerts.extend(state.detector.leg_imbalance(
                snapshot.imbalance_pct,
                snapshot.leg1_w,
                snapshot.leg2_w,
                &self.config.thresholds.leg_imbalance,
            ));
        }
        state.snapshot = snapshot;

        for alert in alerts {
            push_event(&mut state.events, alert, now);
        }
        debug!(device = %device_id, "reading applied");
        Ok(())
    }

    pub fn on_connectivity_change(&self, device_id: &str, online: bool) -> Result<()> {
        self.on_connectivity_change_at(device_id, online, Utc::now())
    }

    pub fn on_connectivity_change_at(
        &self,
        device_id: &str,
        online: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let device = self
            .config
            .device(device_id)
            .ok_or_else(|| AppError::UnknownDevice(device_id.to_string()))?;

        let mut state = self.lock();
        let alert = state.detector.connectivity(device_id, &device.name, online);

        let changed = match state.devices.get_mut(device_id) {
            Some(d) if d.online != Some(online) => {
                d.online = Some(online);
                if let Some(r) = d.reading {
                    d.reading = Some(DeviceReading { online, ..r });
                }
                true
            }
            _ => false,
        };
        if changed {
            let timestamp = state.snapshot.timestamp;
            let snapshot = self.build_snapshot(&mut state, timestamp, false);
            state.snapshot = snapshot;
        }
        if let Some(alert) = alert {
            push_event(&mut state.events, alert, now);
        }
        Ok(())
    }

    /// Transport or parse failure at the ingestion boundary. The last good
    /// snapshot is kept as is.
    pub fn on_transport_error(&self, source: &str, message: &str) {
        self.on_transport_error_at(source, message, Utc::now())
    }

    pub fn on_transport_error_at(&self, source: &str, message: &str, now: DateTime<Utc>) {
        let mut state = self.lock();
        state.failures += 1;
        push_event(&mut state.events, Alert::error(format!("{source}: {message}")), now);
    }

    /// A transport (re)established its session.
    pub fn on_transport_connected(&self, source: &str) {
        self.on_transport_connected_at(source, Utc::now())
    }

    pub fn on_transport_connected_at(&self, source: &str, now: DateTime<Utc>) {
        let mut state = self.lock();
        push_event(&mut state.events, Alert::info(format!("{source} connected")), now);
    }

    pub fn current_snapshot(&self) -> SystemSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn recent_events(&self, order: EventOrder) -> Vec<Event> {
        self.lock().events.to_vec(order)
    }

    /// `None` for circuits that are not configured; 0 until first observed.
    pub fn peak(&self, circuit: u8) -> Option<f64> {
        if !self.config.circuits.iter().any(|c| c.index == circuit) {
            return None;
        }
        Some(self.lock().peaks.get(circuit).unwrap_or(0.0))
    }

    pub fn peaks(&self) -> BTreeMap<u8, f64> {
        let state = self.lock();
        self.config
            .circuits
            .iter()
            .map(|c| (c.index, state.peaks.get(c.index).unwrap_or(0.0)))
            .collect()
    }

    pub fn status(&self) -> MonitorStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> MonitorStatus {
        let (last_update, successes, failures) = {
            let state = self.lock();
            (state.last_update, state.successes, state.failures)
        };
        let age_secs = last_update.map(|t| ((now - t).num_milliseconds() as f64 / 1000.0).max(0.0));
        let m = &self.config.monitor;
        let freshness = match age_secs {
            None => Freshness::NoData,
            Some(age) if age < m.aging_after_secs as f64 => Freshness::Fresh,
            Some(age) if age < m.stale_after_secs as f64 => Freshness::Aging,
            Some(_) => Freshness::Stale,
        };
        let attempts = successes + failures;
        let success_rate_pct = if attempts == 0 {
            100.0
        } else {
            successes as f64 / attempts as f64 * 100.0
        };
        MonitorStatus {
            freshness,
            last_update,
            age_secs,
            successes,
            failures,
            success_rate_pct,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Everything derived for one cycle, computed before it is assigned.
    /// `sample` feeds this cycle's total output into the runtime window.
    fn build_snapshot(
        &self,
        state: &mut MonitorState,
        timestamp: Option<DateTime<Utc>>,
        sample: bool,
    ) -> SystemSnapshot {
        let cfg = &self.config;
        let thresholds = &cfg.thresholds;

        let batteries: Vec<BatteryInput> = cfg
            .devices
            .iter()
            .filter(|d| d.kind == DeviceKind::Battery)
            .filter_map(|d| {
                let reading = state.devices.get(&d.id)?.reading?;
                Some(BatteryInput {
                    reading,
                    capacity_wh: cfg.capacity_wh(d),
                })
            })
            .collect();
        let circuits: Vec<CircuitInput> = cfg
            .circuits
            .iter()
            .filter_map(|c| {
                Some(CircuitInput {
                    reading: *state.circuits.get(&c.index)?,
                    leg: c.leg,
                })
            })
            .collect();

        let agg = aggregate(&batteries, &circuits);
        if sample {
            state.runtime.record(agg.total_output_w);
        }
        let runtime = state.runtime.estimate(agg.total_output_w, agg.available_kwh);
        let output_load_pct = (agg.total_output_w / cfg.monitor.inverter_output_w * 100.0).max(0.0);

        let devices = cfg
            .devices
            .iter()
            .map(|d| {
                let ds = state.devices.get(&d.id);
                let reading = ds.and_then(|s| s.reading);
                let last_seen = ds.and_then(|s| s.last_seen);
                let online = ds.and_then(|s| s.online).unwrap_or(last_seen.is_some());
                let battery = reading.filter(|_| d.kind == DeviceKind::Battery);
                DeviceSummary {
                    id: d.id.clone(),
                    name: d.name.clone(),
                    kind: d.kind,
                    online,
                    last_seen,
                    reading,
                    remaining_kwh: battery
                        .map(|r| r.state_of_charge / 100.0 * cfg.capacity_wh(d) / 1000.0)
                        .unwrap_or(0.0),
                    soc_tier: battery
                        .filter(|r| r.state_of_charge > 0.0)
                        .map(|r| thresholds.state_of_charge.classify(r.state_of_charge)),
                    temperature_tier: battery
                        .filter(|r| r.temperature != 0.0)
                        .map(|r| thresholds.battery_temperature.classify(r.temperature)),
                }
            })
            .collect();

        let circuit_summaries = cfg
            .circuits
            .iter()
            .map(|c| {
                let reading = state.circuits.get(&c.index).copied();
                let load_pct = reading.map(|r| r.amps / c.breaker_amps * 100.0).unwrap_or(0.0);
                CircuitSummary {
                    index: c.index,
                    name: c.name.clone(),
                    leg: c.leg,
                    breaker_amps: c.breaker_amps,
                    reading,
                    load_pct,
                    load_tier: thresholds.circuit_load.classify(load_pct),
                    peak_w: state.peaks.get(c.index).unwrap_or(0.0),
                }
            })
            .collect();

        SystemSnapshot {
            timestamp,
            total_input_w: agg.total_input_w,
            total_output_w: agg.total_output_w,
            average_soc: agg.average_soc,
            reporting_devices: agg.reporting_devices,
            available_kwh: agg.available_kwh,
            leg1_w: agg.leg1_w,
            leg2_w: agg.leg2_w,
            imbalance_pct: agg.imbalance_pct,
            runtime,
            output_load_pct,
            inverter_temperature: state.inverter_temperature,
            active_circuits: circuits.iter().filter(|c| c.reading.is_energized).count(),
            tiers: SnapshotTiers {
                state_of_charge: thresholds.state_of_charge.classify(agg.average_soc),
                output_load: thresholds.output_load.classify(output_load_pct),
                leg_imbalance: thresholds.leg_imbalance.classify(agg.imbalance_pct),
                inverter_temperature: (state.inverter_temperature > 0.0)
                    .then(|| thresholds.inverter_temperature.classify(state.inverter_temperature)),
                runtime: runtime.map(|r| thresholds.runtime_hours.classify(r.hours)),
            },
            devices,
            circuits: circuit_summaries,
        }
    }
}

fn push_event(log: &mut EventLog, alert: Alert, now: DateTime<Utc>) {
    match alert.severity {
        Severity::Info => info!(event = %alert.message, "telemetry event"),
        Severity::Warning => warn!(event = %alert.message, "telemetry event"),
        Severity::Error => error!(event = %alert.message, "telemetry event"),
    }
    log.push(Event::from_alert(alert, now));
}
