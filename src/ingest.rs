use crate::config::DeviceConfig;
use crate::error::AppError;
use crate::monitor::Monitor;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Routes incoming MQTT messages to the devices whose topic filters match.
pub struct Ingestor {
    monitor: Arc<Monitor>,
    routes: Vec<Route>,
}

#[derive(Debug, Clone)]
struct Route {
    device_id: String,
    filter: String,
}

impl Ingestor {
    pub fn new(monitor: Arc<Monitor>, devices: &[DeviceConfig]) -> Self {
        let routes = devices
            .iter()
            .filter_map(|d| {
                d.topic.as_ref().map(|t| Route {
                    device_id: d.id.clone(),
                    filter: t.clone(),
                })
            })
            .collect();
        Self { monitor, routes }
    }

    pub fn topic_filters(&self) -> Vec<String> {
        self.routes.iter().map(|r| r.filter.clone()).collect()
    }

    /// Returns how many devices the message was applied to. A malformed
    /// payload is an error for the caller to log; it never touches state.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<usize, AppError> {
        let matching: Vec<&Route> = self
            .routes
            .iter()
            .filter(|r| topic_matches(&r.filter, topic))
            .collect();
        if matching.is_empty() {
            debug!(topic = %topic, "no device for topic; skipping message");
            return Ok(0);
        }

        let json: Value = serde_json::from_slice(payload)?;
        let body = unwrap_envelope(json);
        for route in &matching {
            self.monitor.on_reading(&route.device_id, &body)?;
            debug!(topic = %topic, device = %route.device_id, "message applied");
        }
        Ok(matching.len())
    }
}

/// Cloud payloads wrap the device fields in `params` (MQTT) or `data` (REST).
pub fn unwrap_envelope(json: Value) -> Value {
    match json {
        Value::Object(mut obj) => {
            for key in ["params", "data"] {
                if matches!(obj.get(key), Some(Value::Object(_))) {
                    if let Some(inner) = obj.remove(key) {
                        return inner;
                    }
                }
            }
            Value::Object(obj)
        }
        other => other,
    }
}

pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let fseg: Vec<&str> = filter.split('/').collect();
    let tseg: Vec<&str> = topic.split('/').collect();
    for (i, f) in fseg.iter().enumerate() {
        match *f {
            "#" => return true,
            "+" => {
                if i >= tseg.len() {
                    return false;
                }
            }
            _ => {
                if i >= tseg.len() || *f != tseg[i] {
                    return false;
                }
            }
        }
    }
    fseg.len() == tseg.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::telemetry::EventOrder;
    use serde_json::json;

    fn ingestor() -> (Arc<Monitor>, Ingestor) {
        let cfg = Config::from_yaml(
            r#"
devices:
  - { id: panel, name: "Smart Panel", kind: panel, topic: "open/+/PANEL01/status" }
  - { id: pack-1, name: "Pack #1", kind: battery, topic: "open/+/PACK01/status" }
  - { id: pack-2, name: "Pack #2", kind: battery }
"#,
        )
        .unwrap();
        let monitor = Arc::new(Monitor::new(cfg.clone()));
        let ingestor = Ingestor::new(monitor.clone(), &cfg.devices);
        (monitor, ingestor)
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("a/#", "a/b/c/d"));
        assert!(topic_matches("open/+/PANEL01/status", "open/key/PANEL01/status"));
        assert!(!topic_matches("a/+/c", "a/b/c/d"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }

    #[test]
    fn test_unwrap_envelope() {
        assert_eq!(unwrap_envelope(json!({ "params": { "soc": 5 } })), json!({ "soc": 5 }));
        assert_eq!(
            unwrap_envelope(json!({ "code": "0", "data": { "soc": 6 } })),
            json!({ "soc": 6 })
        );
        assert_eq!(unwrap_envelope(json!({ "soc": 7 })), json!({ "soc": 7 }));
        // A scalar `data` field is device data, not an envelope.
        assert_eq!(unwrap_envelope(json!({ "data": 1 })), json!({ "data": 1 }));
    }

    #[test]
    fn test_routes_message_to_device() {
        let (monitor, ingestor) = ingestor();
        let payload = json!({ "params": { "soc": 64.0, "wattsOutSum": 300 } }).to_string();
        let applied = ingestor
            .handle_message("open/key/PACK01/status", payload.as_bytes())
            .unwrap();
        assert_eq!(applied, 1);
        let snap = monitor.current_snapshot();
        assert_eq!(snap.average_soc, 64.0);
        assert_eq!(snap.total_output_w, 300.0);
    }

    #[test]
    fn test_unrouted_topic_is_skipped() {
        let (_, ingestor) = ingestor();
        assert_eq!(ingestor.handle_message("other/topic", b"not json").unwrap(), 0);
        assert_eq!(ingestor.topic_filters().len(), 2);
    }

    #[test]
    fn test_malformed_payload_leaves_state_alone() {
        let (monitor, ingestor) = ingestor();
        let err = ingestor
            .handle_message("open/key/PACK01/status", b"{ not json")
            .unwrap_err();
        assert!(matches!(err, AppError::Json(_)));
        assert_eq!(monitor.status().successes, 0);
        assert!(monitor.recent_events(EventOrder::Newest).is_empty());
    }
}
