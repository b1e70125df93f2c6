//! Intent → policy compilation rules.
//!
//! Each intent kind owns an independent rule set. Malformed or missing
//! numeric parameters degrade to the documented default for that rule;
//! compilation never fails. Numeric domains (sample rate, gain, publish
//! interval, priority) are clamped here so the enforcement router never
//! receives an out-of-domain value.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use super::{Policy, PolicyIdSeq, PolicyKind};
use crate::intent::{IntentKind, ParamValue, ParsedIntent};

/// Sample rates the audio hardware supports. Requests snap to the nearest
/// entry; exact ties resolve to the lower rate.
pub const VALID_SAMPLE_RATES: [u32; 4] = [8000, 16000, 44100, 48000];
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Audio gain domain, as a multiplier.
pub const GAIN_RANGE: std::ops::RangeInclusive<f64> = 0.1..=10.0;
pub const DEFAULT_GAIN: f64 = 1.0;

/// Telemetry publish interval domain in milliseconds.
pub const INTERVAL_RANGE_MS: std::ops::RangeInclusive<i64> = 1_000..=60_000;
pub const DEFAULT_INTERVAL_MS: i64 = 10_000;

const DEFAULT_AUDIO_TARGET: &str = "esp32-audio-1";

/// Compiles parsed intents into zero or more concrete policies. Pure apart
/// from the injected id sequence; identical input yields identical
/// kind/target/parameter/priority sequences.
pub struct PolicyCompiler {
    ids: Arc<PolicyIdSeq>,
}

impl PolicyCompiler {
    pub fn new(ids: Arc<PolicyIdSeq>) -> Self {
        Self { ids }
    }

    pub fn compile(&self, intent: &ParsedIntent) -> Vec<Policy> {
        let policies = match intent.kind {
            IntentKind::Priority => self.priority_policies(intent),
            IntentKind::Bandwidth => self.bandwidth_policies(intent),
            IntentKind::Latency => self.latency_policies(intent),
            IntentKind::Qos => self.qos_policies(intent),
            IntentKind::SampleRate => self.sample_rate_policies(intent),
            IntentKind::DeviceControl => self.device_control_policies(intent),
            IntentKind::PublishInterval => self.publish_interval_policies(intent),
            IntentKind::AudioGain => self.audio_gain_policies(intent),
            IntentKind::General => Vec::new(),
        };

        debug!(kind = ?intent.kind, count = policies.len(), "compiled policies from intent");
        policies
    }

    /// Priority intents fan out into a traffic-shaping policy and a
    /// routing-priority policy for the same target.
    fn priority_policies(&self, intent: &ParsedIntent) -> Vec<Policy> {
        let target = intent
            .target_device()
            .or_else(|| intent.parameter("device_id").and_then(ParamValue::first))
            .unwrap_or("unknown")
            .to_string();

        vec![
            Policy::new(
                self.ids.next_id(),
                PolicyKind::TrafficShaping,
                target.clone(),
                object(json!({
                    "class": "high_priority",
                    "rate": "100mbit",
                    "ceil": "200mbit",
                    "burst": "32k",
                })),
                9,
            ),
            Policy::new(
                self.ids.next_id(),
                PolicyKind::RoutingPriority,
                target,
                object(json!({ "tos": "0x10", "priority": "high" })),
                8,
            ),
        ]
    }

    /// Bandwidth intents with no extractable numeric value compile to zero
    /// policies. Fail-open on purpose: "limit bandwidth" without a number
    /// is not actionable and is dropped silently rather than rejected.
    fn bandwidth_policies(&self, intent: &ParsedIntent) -> Vec<Policy> {
        let limit = if let Some(param) = intent.parameter("bandwidth_limit") {
            param.first().map(|value| format!("{value}{}", param.get(1).unwrap_or("mbps")))
        } else if let Some(param) = intent.parameter("throttle") {
            param.get(1).map(|value| format!("{value}mbps"))
        } else {
            None
        };

        let Some(limit) = limit else {
            debug!("no actionable bandwidth parameter; emitting no policies");
            return Vec::new();
        };

        vec![Policy::new(
            self.ids.next_id(),
            PolicyKind::BandwidthLimit,
            target_or(intent, "all"),
            object(json!({ "rate": limit, "ceil": limit, "burst": "15k" })),
            7,
        )]
    }

    fn latency_policies(&self, intent: &ParsedIntent) -> Vec<Policy> {
        vec![Policy::new(
            self.ids.next_id(),
            PolicyKind::TrafficShaping,
            target_or(intent, "all"),
            object(json!({
                "class": "low_latency",
                "netem_delay": "0ms",
                "priority": "express",
                "queue": "fq_codel",
            })),
            9,
        )]
    }

    fn qos_policies(&self, intent: &ParsedIntent) -> Vec<Policy> {
        let qos_level = first_parse::<i64>(intent, "qos_level").unwrap_or(1);
        let reliable_delivery = qos_level == 1 || qos_level == 2;

        vec![Policy::new(
            self.ids.next_id(),
            PolicyKind::QosControl,
            target_or(intent, "all"),
            object(json!({
                "mqtt_qos": qos_level,
                "reliable_delivery": reliable_delivery,
                "retain": true,
            })),
            6,
        )]
    }

    fn sample_rate_policies(&self, intent: &ParsedIntent) -> Vec<Policy> {
        let requested = match first_parse::<u32>(intent, "sample_rate") {
            // Values below 1000 are kHz notation.
            Some(value) if value < 1000 => value * 1000,
            Some(value) => value,
            None => DEFAULT_SAMPLE_RATE,
        };
        let sample_rate = snap_sample_rate(requested);

        vec![Policy::new(
            self.ids.next_id(),
            PolicyKind::SampleRate,
            target_or(intent, DEFAULT_AUDIO_TARGET),
            object(json!({ "sample_rate": sample_rate, "command": "SET_SAMPLE_RATE" })),
            7,
        )]
    }

    fn device_control_policies(&self, intent: &ParsedIntent) -> Vec<Policy> {
        let (command, captured) = if let Some(param) = intent.parameter("enable_device") {
            ("ENABLE", param.first())
        } else if let Some(param) = intent.parameter("disable_device") {
            ("DISABLE", param.first())
        } else if let Some(param) = intent.parameter("reset_device") {
            ("RESET", param.first())
        } else {
            ("ENABLE", None)
        };

        let target =
            captured.or_else(|| intent.target_device()).unwrap_or("unknown").to_string();

        vec![Policy::new(
            self.ids.next_id(),
            PolicyKind::DeviceControl,
            target,
            object(json!({ "command": command })),
            8,
        )]
    }

    fn publish_interval_policies(&self, intent: &ParsedIntent) -> Vec<Policy> {
        let interval_ms = match first_parse::<i64>(intent, "interval_value") {
            // Values up to 60 are seconds; anything larger is already ms.
            Some(value) if value <= 60 => value * 1000,
            Some(value) => value,
            None => DEFAULT_INTERVAL_MS,
        }
        .clamp(*INTERVAL_RANGE_MS.start(), *INTERVAL_RANGE_MS.end());

        vec![Policy::new(
            self.ids.next_id(),
            PolicyKind::PublishInterval,
            target_or(intent, DEFAULT_AUDIO_TARGET),
            object(json!({ "interval_ms": interval_ms, "command": "SET_PUBLISH_INTERVAL" })),
            5,
        )]
    }

    fn audio_gain_policies(&self, intent: &ParsedIntent) -> Vec<Policy> {
        let gain = first_parse::<f64>(intent, "gain_value")
            .unwrap_or(DEFAULT_GAIN)
            .clamp(*GAIN_RANGE.start(), *GAIN_RANGE.end());

        vec![Policy::new(
            self.ids.next_id(),
            PolicyKind::AudioGain,
            target_or(intent, DEFAULT_AUDIO_TARGET),
            object(json!({ "gain": gain, "command": "SET_AUDIO_GAIN" })),
            5,
        )]
    }
}

fn target_or(intent: &ParsedIntent, fallback: &str) -> String {
    intent.target_device().unwrap_or(fallback).to_string()
}

fn first_parse<T: std::str::FromStr>(intent: &ParsedIntent, name: &str) -> Option<T> {
    intent.parameter(name).and_then(ParamValue::first).and_then(|value| value.parse().ok())
}

/// Nearest valid rate by absolute difference; ascending scan with a strict
/// comparison resolves exact ties to the lower rate.
fn snap_sample_rate(requested: u32) -> u32 {
    let mut best = VALID_SAMPLE_RATES[0];
    let mut best_distance = best.abs_diff(requested);
    for rate in VALID_SAMPLE_RATES {
        let distance = rate.abs_diff(requested);
        if distance < best_distance {
            best = rate;
            best_distance = distance;
        }
    }
    best
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
