//! MQTT device channel.
//!
//! Control messages are published to `iot/{target}/control` at
//! least-once delivery. Device acknowledgements arrive asynchronously on
//! the retained `iot/+/status` subscription; the channel caches the last
//! status per device but never correlates it back to an individual publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, NetworkOptions, Packet, QoS};
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use intentd_core::config::MqttConfig;
use intentd_core::errors::ChannelError;
use intentd_core::{ControlEnvelope, DeviceChannel};

const STATUS_FILTER: &str = "iot/+/status";

fn control_topic(target: &str) -> String {
    format!("iot/{target}/control")
}

/// Device id out of an `iot/{device}/status` topic.
fn status_target(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("iot"), Some(target), Some("status"), None) if !target.is_empty() => Some(target),
        _ => None,
    }
}

/// Backoff applied between broker reconnect attempts. The event loop
/// retries forever; only the delay is bounded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 500, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

pub struct MqttDeviceChannel {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    statuses: Arc<Mutex<HashMap<String, Value>>>,
    event_loop: JoinHandle<()>,
}

impl MqttDeviceChannel {
    /// Opens the broker link and starts the background event loop. Returns
    /// immediately; `is_connected` flips once the broker acknowledges the
    /// session.
    pub fn connect(config: &MqttConfig, reconnect_policy: ReconnectPolicy) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password.expose_secret());
        }

        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(config.connect_timeout_secs);

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        event_loop.set_network_options(network_options);
        let connected = Arc::new(AtomicBool::new(false));
        let statuses = Arc::new(Mutex::new(HashMap::new()));

        let loop_client = client.clone();
        let loop_connected = connected.clone();
        let loop_statuses = statuses.clone();
        let event_loop = tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        attempt = 0;
                        loop_connected.store(true, Ordering::SeqCst);
                        info!("mqtt broker session established");
                        if let Err(error) =
                            loop_client.subscribe(STATUS_FILTER, QoS::AtLeastOnce).await
                        {
                            warn!(error = %error, "status subscription failed");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(target) = status_target(&publish.topic) else {
                            debug!(topic = %publish.topic, "ignoring message on unexpected topic");
                            continue;
                        };
                        match serde_json::from_slice::<Value>(&publish.payload) {
                            Ok(status) => {
                                debug!(target = %target, "device status received");
                                if let Ok(mut cache) = loop_statuses.lock() {
                                    cache.insert(target.to_string(), status);
                                }
                            }
                            Err(error) => {
                                warn!(target = %target, error = %error, "unparseable device status");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(error) => {
                        loop_connected.store(false, Ordering::SeqCst);
                        let delay = reconnect_policy.backoff(attempt);
                        warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "mqtt connection lost; reconnecting"
                        );
                        attempt = attempt.saturating_add(1);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });

        Self { client, connected, statuses, event_loop }
    }

    /// Last retained status payload seen for a device, if any.
    pub fn device_status(&self, target: &str) -> Option<Value> {
        self.statuses.lock().ok().and_then(|cache| cache.get(target).cloned())
    }

    pub fn known_devices(&self) -> Vec<String> {
        self.statuses.lock().map(|cache| cache.keys().cloned().collect()).unwrap_or_default()
    }

    /// Sends the broker disconnect and stops the event loop.
    pub async fn shutdown(&self) {
        if let Err(error) = self.client.disconnect().await {
            warn!(error = %error, "mqtt disconnect failed");
        }
        self.connected.store(false, Ordering::SeqCst);
        self.event_loop.abort();
    }
}

#[async_trait]
impl DeviceChannel for MqttDeviceChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish_control(
        &self,
        target: &str,
        envelope: &ControlEnvelope,
    ) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }

        let payload = envelope.to_payload().to_string();
        self.client
            .publish(control_topic(target), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|error| ChannelError::PublishRejected(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use intentd_core::config::MqttConfig;
    use intentd_core::errors::ChannelError;
    use intentd_core::{ControlEnvelope, DeviceChannel};
    use serde_json::Map;

    use super::{control_topic, status_target, MqttDeviceChannel, ReconnectPolicy};

    fn test_config() -> MqttConfig {
        MqttConfig {
            host: "localhost".to_string(),
            port: 1,
            client_id: "intentd-test".to_string(),
            username: None,
            password: None,
            connect_timeout_secs: 1,
        }
    }

    #[test]
    fn control_and_status_topics_follow_the_iot_convention() {
        assert_eq!(control_topic("esp32-audio-1"), "iot/esp32-audio-1/control");
        assert_eq!(status_target("iot/node-3/status"), Some("node-3"));
        assert_eq!(status_target("iot/node-3/control"), None);
        assert_eq!(status_target("other/node-3/status"), None);
        assert_eq!(status_target("iot//status"), None);
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = ReconnectPolicy { base_delay_ms: 250, max_delay_ms: 5_000 };
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(10), Duration::from_millis(5_000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(5_000));
    }

    #[tokio::test]
    async fn publishing_before_the_session_is_up_is_rejected() {
        let channel = MqttDeviceChannel::connect(&test_config(), ReconnectPolicy::default());

        assert!(!channel.is_connected());
        let envelope = ControlEnvelope::hardware("RESET", Map::new());
        let result = channel.publish_control("esp32-audio-1", &envelope).await;

        assert_eq!(result, Err(ChannelError::NotConnected));
        channel.shutdown().await;
    }
}
