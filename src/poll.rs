use crate::config::{DeviceConfig, PollConfig};
use crate::error::{AppError, Result};
use crate::monitor::Monitor;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// REST polling transport: device connectivity plus one quota request per
/// device serial, repeated every `interval_secs`.
pub struct Poller {
    client: reqwest::Client,
    cfg: PollConfig,
    devices: Vec<DeviceConfig>,
    monitor: Arc<Monitor>,
}

impl Poller {
    pub fn new(cfg: PollConfig, devices: &[DeviceConfig], monitor: Arc<Monitor>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .default_headers(build_headers(&cfg)?)
            .build()?;
        let devices = devices
            .iter()
            .filter(|d| d.serial.is_some())
            .cloned()
            .collect();
        Ok(Self {
            client,
            cfg,
            devices,
            monitor,
        })
    }

    pub async fn run(self) {
        info!(
            devices = self.devices.len(),
            interval_secs = self.cfg.interval_secs,
            "polling started"
        );
        let mut interval = tokio::time::interval(Duration::from_secs(self.cfg.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.poll_once().await;
        }
    }

    /// One cycle. Every failure is recorded and the cycle moves on.
    pub async fn poll_once(&self) {
        if let Some(url) = &self.cfg.device_list_url {
            match self.fetch(url).await.and_then(parse_device_list) {
                Ok(list) => {
                    for device in &self.devices {
                        let Some(sn) = device.serial.as_deref() else {
                            continue;
                        };
                        let online = is_listed_online(&list, sn);
                        if let Err(e) = self.monitor.on_connectivity_change(&device.id, online) {
                            warn!(device = %device.id, error = %e, "connectivity update failed");
                        }
                    }
                }
                Err(e) => self.fail("device list", &e),
            }
        }

        for device in &self.devices {
            let Some(sn) = device.serial.as_deref() else {
                continue;
            };
            let url = quota_url(&self.cfg.quota_url, sn);
            match self.fetch(&url).await {
                Ok(data) => {
                    if let Err(e) = self.monitor.on_reading(&device.id, &data) {
                        self.fail(&device.id, &e);
                    } else {
                        debug!(device = %device.id, "quota applied");
                    }
                }
                Err(e) => self.fail(&device.id, &e),
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Value> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Api(format!("HTTP {}", status.as_u16())));
        }
        let body: Value = resp.json().await?;
        parse_envelope(body)
    }

    fn fail(&self, what: &str, err: &AppError) {
        warn!(target_name = %what, error = %err, "poll request failed");
        self.monitor.on_transport_error("poll", &format!("{what}: {err}"));
    }
}

fn build_headers(cfg: &PollConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in &cfg.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::Config(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::Config(format!("invalid header value for {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

pub fn quota_url(template: &str, serial: &str) -> String {
    template.replace("{sn}", serial)
}

/// Cloud responses carry `code` as "0" (string) or 0 (number) on success.
pub fn parse_envelope(body: Value) -> Result<Value> {
    let ok = match body.get("code") {
        Some(Value::String(s)) => s == "0",
        Some(Value::Number(n)) => n.as_i64() == Some(0),
        _ => false,
    };
    if !ok {
        let code = body.get("code").cloned().unwrap_or(Value::Null);
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(AppError::Api(format!("code {code}: {message}")));
    }
    match body {
        Value::Object(mut obj) => Ok(obj.remove("data").unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

/// `(serial, online)` pairs from the device list `data` array.
pub fn parse_device_list(data: Value) -> Result<Vec<(String, bool)>> {
    let items = data
        .as_array()
        .ok_or_else(|| AppError::Api("device list data is not an array".into()))?;
    Ok(items
        .iter()
        .filter_map(|item| {
            let sn = item.get("sn")?.as_str()?.to_string();
            let online = match item.get("online") {
                Some(Value::Bool(b)) => *b,
                Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
                Some(Value::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
                _ => false,
            };
            Some((sn, online))
        })
        .collect())
}

/// A serial missing from a successfully fetched list is offline.
pub fn is_listed_online(list: &[(String, bool)], serial: &str) -> bool {
    list.iter().any(|(sn, online)| sn == serial && *online)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_envelope_success() {
        let data = parse_envelope(json!({ "code": "0", "message": "Success", "data": { "soc": 5 } }))
            .unwrap();
        assert_eq!(data, json!({ "soc": 5 }));
        let data = parse_envelope(json!({ "code": 0, "data": [1] })).unwrap();
        assert_eq!(data, json!([1]));
    }

    #[test]
    fn test_parse_envelope_api_error() {
        let err = parse_envelope(json!({ "code": "8521", "message": "signature is wrong" }))
            .unwrap_err();
        assert!(matches!(err, AppError::Api(_)));
        assert!(err.to_string().contains("signature is wrong"), "{err}");
        assert!(parse_envelope(json!({ "data": {} })).is_err());
    }

    #[test]
    fn test_parse_device_list() {
        let list = parse_device_list(json!([
            { "sn": "PACK01", "online": 1 },
            { "sn": "PACK02", "online": 0 },
            { "sn": "PANEL01", "online": true },
            { "online": 1 }
        ]))
        .unwrap();
        assert_eq!(
            list,
            vec![
                ("PACK01".to_string(), true),
                ("PACK02".to_string(), false),
                ("PANEL01".to_string(), true),
            ]
        );
        assert!(parse_device_list(json!({ "sn": "x" })).is_err());
    }

    #[test]
    fn test_missing_serial_is_offline() {
        let list = vec![("PACK01".to_string(), true), ("PACK02".to_string(), false)];
        assert!(is_listed_online(&list, "PACK01"));
        assert!(!is_listed_online(&list, "PACK02"));
        assert!(!is_listed_online(&list, "PACK03"));
        assert!(!is_listed_online(&[], "PACK01"));
    }

    #[test]
    fn test_quota_url() {
        assert_eq!(
            quota_url("https://api.example.com/iot-open/sign/device/quota/all?sn={sn}", "PACK01"),
            "https://api.example.com/iot-open/sign/device/quota/all?sn=PACK01"
        );
    }

    #[test]
    fn test_build_headers_rejects_invalid_name() {
        let cfg = PollConfig {
            device_list_url: None,
            quota_url: "http://localhost/{sn}".into(),
            interval_secs: 1,
            timeout_secs: 5,
            headers: BTreeMap::from([("bad header".to_string(), "x".to_string())]),
        };
        assert!(matches!(build_headers(&cfg), Err(AppError::Config(_))));
    }
}
