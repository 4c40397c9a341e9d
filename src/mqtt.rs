use crate::config::MqttConfig;
use crate::error::AppError;
use crate::ingest::Ingestor;
use crate::monitor::Monitor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

// Use the MQTT v5 API surface only
use rumqttc::v5 as mqtt5;
use rumqttc::Transport;

pub type MqttOptions = mqtt5::MqttOptions;
pub type AsyncClient = mqtt5::AsyncClient;
pub type EventLoop = mqtt5::EventLoop;
pub type V5Publish = mqtt5::mqttbytes::v5::Publish;

pub enum MqttEvent {
    Connected,
    Publish(V5Publish),
}

pub fn build_options(cfg: &MqttConfig) -> MqttOptions {
    let client_id = format!("panel-telemetry-{}", Uuid::new_v4());
    let mut opts = MqttOptions::new(client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.unwrap_or(30)));
    opts.set_clean_start(cfg.clean_session.unwrap_or(true));
    if let (Some(u), Some(p)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if cfg.port == 8883 {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

pub fn new(options: MqttOptions) -> (AsyncClient, EventLoop) {
    mqtt5::AsyncClient::new(options, 50)
}

pub fn qos(v: u8) -> mqtt5::mqttbytes::QoS {
    match v {
        2 => mqtt5::mqttbytes::QoS::ExactlyOnce,
        1 => mqtt5::mqttbytes::QoS::AtLeastOnce,
        _ => mqtt5::mqttbytes::QoS::AtMostOnce,
    }
}

pub async fn next_event(eventloop: &mut EventLoop) -> Result<MqttEvent, AppError> {
    loop {
        match eventloop.poll().await {
            Ok(mqtt5::Event::Incoming(mqtt5::Incoming::Publish(p))) => {
                return Ok(MqttEvent::Publish(p))
            }
            Ok(mqtt5::Event::Incoming(mqtt5::Incoming::ConnAck(_))) => {
                return Ok(MqttEvent::Connected)
            }
            Ok(_) => continue,
            Err(e) => return Err(AppError::Mqtt(e.to_string())),
        }
    }
}

/// Subscribe loop for the process lifetime. Broker and payload failures are
/// recorded on the monitor and never end the loop.
pub async fn run_subscriber(cfg: MqttConfig, ingestor: Ingestor, monitor: Arc<Monitor>) {
    let (client, mut eventloop) = new(build_options(&cfg));
    let filters = ingestor.topic_filters();

    loop {
        match next_event(&mut eventloop).await {
            Ok(MqttEvent::Connected) => {
                info!(host = %cfg.host, port = cfg.port, "MQTT connected");
                monitor.on_transport_connected("MQTT");
                // Subscriptions do not survive a clean reconnect.
                for filter in &filters {
                    if let Err(e) = client.subscribe(filter.clone(), qos(cfg.qos)).await {
                        warn!(topic = %filter, error = %e, "subscribe failed");
                        monitor.on_transport_error("mqtt", &format!("subscribe {filter}: {e}"));
                    }
                }
                info!("subscribed to {} device topic(s)", filters.len());
            }
            Ok(MqttEvent::Publish(msg)) => {
                let topic = match std::str::from_utf8(&msg.topic) {
                    Ok(s) => s.to_string(),
                    Err(_) => {
                        warn!(topic_bytes = ?msg.topic, "non-utf8 topic; skipping message");
                        continue;
                    }
                };
                if let Err(e) = ingestor.handle_message(&topic, msg.payload.as_ref()) {
                    warn!(topic = %topic, error = %e, "processing failed for incoming message");
                    monitor.on_transport_error("mqtt", &e.to_string());
                }
            }
            Err(e) => {
                warn!("mqtt error: {e}; reconnecting after short delay");
                monitor.on_transport_error("mqtt", &e.to_string());
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
