//! Enforcement routing.
//!
//! Each compiled policy is dispatched to one of two backends: the
//! message-oriented device channel (MQTT-style, addressed by target) or the
//! network channel (local traffic-control rules keyed by interface +
//! target classifier). Routing is decided by policy kind; the envelope
//! shape on the device channel is decided by the target's naming class.
//! Dispatch is fire-and-forget at the message layer: acknowledgements
//! arrive asynchronously on a separate status subscription and are not
//! correlated back here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::errors::ChannelError;
use crate::policy::{Policy, PolicyId, PolicyKind};

/// Which backend a policy was dispatched to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Device,
    Network,
}

/// Control message for the device channel. Hardware-class targets
/// (`esp32*`) understand the strict `{command, <field>}` envelope;
/// simulated nodes take the looser `{type, <fields>}` envelope. The shapes
/// are deliberately distinct types: a device ignores the one it does not
/// speak, and nothing in the router converts between them.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlEnvelope {
    Hardware { command: String, fields: Map<String, Value> },
    Simulated { update: String, fields: Map<String, Value> },
}

impl ControlEnvelope {
    pub fn hardware(command: &str, fields: Map<String, Value>) -> Self {
        Self::Hardware { command: command.to_string(), fields }
    }

    pub fn simulated(update: &str, fields: Map<String, Value>) -> Self {
        Self::Simulated { update: update.to_string(), fields }
    }

    /// Wire payload. Hardware envelopes key the operation as `command`,
    /// simulated envelopes as `type`.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Hardware { command, fields } => {
                let mut payload = Map::new();
                payload.insert("command".to_string(), json!(command));
                payload.extend(fields.clone());
                Value::Object(payload)
            }
            Self::Simulated { update, fields } => {
                let mut payload = Map::new();
                payload.insert("type".to_string(), json!(update));
                payload.extend(fields.clone());
                Value::Object(payload)
            }
        }
    }
}

/// A traffic-control rule for the network backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrafficRule {
    pub kind: PolicyKind,
    pub target: String,
    pub parameters: Map<String, Value>,
}

/// Message-oriented device backend. Reconnection and backoff are the
/// channel's own concern; the router only observes connectivity.
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    fn is_connected(&self) -> bool;
    async fn publish_control(
        &self,
        target: &str,
        envelope: &ControlEnvelope,
    ) -> Result<(), ChannelError>;
}

/// Local traffic-control backend.
#[async_trait]
pub trait NetworkChannel: Send + Sync {
    async fn apply_rule(&self, rule: &TrafficRule) -> Result<(), ChannelError>;
}

/// Transient outcome of dispatching one policy. Surfaced to the caller,
/// never persisted by the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnforcementResult {
    pub policy_id: PolicyId,
    pub success: bool,
    pub backend: Backend,
    pub applied_at: DateTime<Utc>,
}

/// Backend selection by policy kind.
pub fn backend_for(kind: PolicyKind) -> Backend {
    match kind {
        PolicyKind::TrafficShaping | PolicyKind::BandwidthLimit | PolicyKind::RoutingPriority => {
            Backend::Network
        }
        PolicyKind::QosControl
        | PolicyKind::DeviceConfig
        | PolicyKind::SampleRate
        | PolicyKind::DeviceControl
        | PolicyKind::PublishInterval
        | PolicyKind::AudioGain => Backend::Device,
    }
}

/// Hardware-class naming convention: anything in the esp32 family.
pub fn is_hardware_target(target: &str) -> bool {
    target.to_ascii_lowercase().starts_with("esp32")
}

/// Dispatches policies to the device or network backend. All failure is
/// reported as an unsuccessful result; nothing here is fatal to the caller
/// and nothing is retried at this layer.
pub struct EnforcementRouter {
    device: Arc<dyn DeviceChannel>,
    network: Arc<dyn NetworkChannel>,
}

impl EnforcementRouter {
    pub fn new(device: Arc<dyn DeviceChannel>, network: Arc<dyn NetworkChannel>) -> Self {
        Self { device, network }
    }

    pub async fn apply(&self, policy: &Policy) -> EnforcementResult {
        let backend = backend_for(policy.kind);
        let success = match backend {
            Backend::Device => self.apply_device(policy).await,
            Backend::Network => self.apply_network(policy).await,
        };

        EnforcementResult { policy_id: policy.id.clone(), success, backend, applied_at: Utc::now() }
    }

    async fn apply_device(&self, policy: &Policy) -> bool {
        if !self.device.is_connected() {
            warn!(
                policy_id = %policy.id,
                target = %policy.target,
                "device channel not connected; policy dropped without retry"
            );
            return false;
        }

        let Some(envelope) = device_envelope(policy) else {
            warn!(
                policy_id = %policy.id,
                kind = ?policy.kind,
                "policy kind has no device envelope mapping"
            );
            return false;
        };

        match self.device.publish_control(&policy.target, &envelope).await {
            Ok(()) => {
                info!(
                    policy_id = %policy.id,
                    target = %policy.target,
                    kind = ?policy.kind,
                    "control message dispatched"
                );
                true
            }
            Err(error) => {
                warn!(
                    policy_id = %policy.id,
                    target = %policy.target,
                    error = %error,
                    "device channel rejected control message"
                );
                false
            }
        }
    }

    async fn apply_network(&self, policy: &Policy) -> bool {
        let rule = TrafficRule {
            kind: policy.kind,
            target: policy.target.clone(),
            parameters: policy.parameters.clone(),
        };

        match self.network.apply_rule(&rule).await {
            Ok(()) => {
                info!(policy_id = %policy.id, target = %policy.target, "traffic rule applied");
                true
            }
            Err(error) => {
                warn!(
                    policy_id = %policy.id,
                    target = %policy.target,
                    error = %error,
                    "traffic rule application failed"
                );
                false
            }
        }
    }
}

/// Builds the control envelope for a device-side policy. QoS control picks
/// its shape from the target class; configuration updates always use the
/// simulated shape; the remaining kinds are hardware commands. Network-side
/// kinds have no mapping here.
pub fn device_envelope(policy: &Policy) -> Option<ControlEnvelope> {
    let envelope = match policy.kind {
        PolicyKind::QosControl => {
            if is_hardware_target(&policy.target) {
                ControlEnvelope::hardware(
                    "SET_QOS",
                    fields(&[("qos", param_or(policy, "mqtt_qos", json!(1)))]),
                )
            } else {
                ControlEnvelope::simulated(
                    "qos_update",
                    fields(&[
                        ("qos", param_or(policy, "mqtt_qos", json!(0))),
                        ("reliable_delivery", param_or(policy, "reliable_delivery", json!(false))),
                    ]),
                )
            }
        }
        PolicyKind::DeviceConfig => ControlEnvelope::simulated(
            "config_update",
            fields(&[
                ("sampling_rate", param_or(policy, "sampling_rate", Value::Null)),
                ("enabled", param_or(policy, "enabled", json!(true))),
                ("priority", param_or(policy, "priority", json!("normal"))),
            ]),
        ),
        PolicyKind::SampleRate => ControlEnvelope::hardware(
            "SET_SAMPLE_RATE",
            fields(&[("sample_rate", param_or(policy, "sample_rate", json!(16000)))]),
        ),
        PolicyKind::DeviceControl => {
            let command =
                policy.parameter("command").and_then(Value::as_str).unwrap_or("ENABLE").to_string();
            ControlEnvelope::Hardware { command, fields: Map::new() }
        }
        PolicyKind::PublishInterval => ControlEnvelope::hardware(
            "SET_PUBLISH_INTERVAL",
            fields(&[("interval_ms", param_or(policy, "interval_ms", json!(10_000)))]),
        ),
        PolicyKind::AudioGain => ControlEnvelope::hardware(
            "SET_AUDIO_GAIN",
            fields(&[("gain", param_or(policy, "gain", json!(1.0)))]),
        ),
        PolicyKind::TrafficShaping | PolicyKind::BandwidthLimit | PolicyKind::RoutingPriority => {
            return None
        }
    };

    Some(envelope)
}

fn param_or(policy: &Policy, name: &str, default: Value) -> Value {
    policy.parameter(name).cloned().unwrap_or(default)
}

fn fields(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries.iter().map(|(name, value)| ((*name).to_string(), value.clone())).collect()
}
