//! Lexical intent parser.
//!
//! Classification walks [`CLASSIFIER_PRECEDENCE`] in order and stops at the
//! first keyword hit; extraction then runs every category's regex family
//! against the lower-cased text regardless of the classified kind, so a
//! "qos + priority" sentence contributes parameters from both families while
//! only the kind stays singular. Parsing is total: input that matches
//! nothing comes back as [`IntentKind::General`] with empty parameters.

use std::collections::BTreeMap;

use regex::Regex;
use tracing::debug;

use super::{IntentKind, ParamValue, ParsedIntent, RawIntent};

pub const PARAM_TARGET_DEVICE: &str = "target_device";

/// Keyword classifier, evaluated strictly in this order. QoS is checked
/// before audio gain so that "qos level" never collides with the gain
/// family's "level" keyword.
pub const CLASSIFIER_PRECEDENCE: [(IntentKind, &[&str]); 8] = [
    (IntentKind::Qos, &["qos", "quality of service", "reliable delivery"]),
    (IntentKind::SampleRate, &["sample rate", "sampling", "audio rate", "khz", " hz"]),
    (IntentKind::AudioGain, &["gain", "amplify", "boost", "audio volume", "audio level"]),
    (
        IntentKind::PublishInterval,
        &[
            "publish interval",
            "telemetry rate",
            "telemetry",
            "reporting",
            "send data",
            "report every",
            "report telemetry",
        ],
    ),
    (
        IntentKind::DeviceControl,
        &["enable", "disable", "start", "stop", "activate", "deactivate", "reset"],
    ),
    (IntentKind::Priority, &["priority", "prioritize", "critical"]),
    (IntentKind::Bandwidth, &["bandwidth", "throttle", "limit"]),
    (IntentKind::Latency, &["latency", "delay", "response"]),
];

struct PatternFamily {
    kind: IntentKind,
    patterns: Vec<(Regex, &'static str)>,
}

struct TargetResolvers {
    device_token: Regex,
    esp32_token: Regex,
    trailing_for: Regex,
}

/// Parses free-text goal statements into typed, parameterized intents.
pub struct IntentParser {
    families: Vec<PatternFamily>,
    resolvers: TargetResolvers,
}

impl Default for IntentParser {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).unwrap_or_else(|error| panic!("static intent pattern `{source}`: {error}"))
}

impl IntentParser {
    pub fn new() -> Self {
        let families = vec![
            PatternFamily {
                kind: IntentKind::Priority,
                patterns: vec![
                    (pattern(r"prioritize\s+(?:device|node)\s+(\S+)"), "device_id"),
                    (pattern(r"high\s+priority\s+(?:for\s+)?(\S+)"), "device_id"),
                    (pattern(r"priority\s+(\d+)"), "priority_level"),
                ],
            },
            PatternFamily {
                kind: IntentKind::Bandwidth,
                patterns: vec![
                    (
                        pattern(r"limit\s+bandwidth\s+(?:to\s+)?(\d+)\s*(mbps|kbps|gbps)?"),
                        "bandwidth_limit",
                    ),
                    (
                        pattern(r"allocate\s+(\d+)\s*(mbps|kbps|gbps)?\s+(?:to|for)\s+(\S+)"),
                        "bandwidth_allocation",
                    ),
                    (pattern(r"throttle\s+(\S+)\s+(?:to\s+)?(\d+)"), "throttle"),
                ],
            },
            PatternFamily {
                kind: IntentKind::Latency,
                patterns: vec![
                    (pattern(r"reduce\s+latency\s+(?:to\s+)?(\d+)\s*ms"), "latency_target"),
                    (pattern(r"latency\s+(?:below|under)\s+(\d+)"), "latency_threshold"),
                    (pattern(r"minimize\s+latency\s+(?:for\s+)?(\S+)?"), "low_latency"),
                ],
            },
            PatternFamily {
                kind: IntentKind::Qos,
                patterns: vec![
                    (pattern(r"qos\s+(?:level\s+)?(\d+)"), "qos_level"),
                    (pattern(r"quality\s+of\s+service\s+(\d+)"), "qos_level"),
                    (pattern(r"reliable\s+delivery\s+(?:for\s+)?(\S+)"), "reliable_delivery"),
                ],
            },
            PatternFamily {
                kind: IntentKind::SampleRate,
                patterns: vec![
                    (pattern(r"(?:set\s+)?sample\s*rate\s+(?:to\s+)?(\d+)\s*(?:hz|khz)?"), "sample_rate"),
                    (
                        pattern(r"(?:change|reduce|increase)\s+sampling\s+(?:rate\s+)?(?:to\s+)?(\d+)"),
                        "sample_rate",
                    ),
                    (pattern(r"audio\s+(?:sample\s*)?rate\s+(\d+)"), "sample_rate"),
                    (pattern(r"(\d+)\s*(?:hz|khz)\s+(?:sample|sampling|audio)"), "sample_rate"),
                ],
            },
            PatternFamily {
                kind: IntentKind::DeviceControl,
                patterns: vec![
                    (pattern(r"(?:enable|start|activate)\s+(?:device\s+)?(\S+)"), "enable_device"),
                    (pattern(r"(?:disable|stop|deactivate)\s+(?:device\s+)?(\S+)"), "disable_device"),
                    (pattern(r"reset\s+(?:device\s+)?(\S+)"), "reset_device"),
                ],
            },
            PatternFamily {
                kind: IntentKind::PublishInterval,
                patterns: vec![
                    (
                        pattern(
                            r"(?:set\s+)?(?:publish|telemetry|reporting)\s+(?:interval|rate)\s+(?:to\s+)?(\d+)\s*(?:ms|seconds?|s)?",
                        ),
                        "interval_value",
                    ),
                    (
                        pattern(r"(?:send|report)\s+(?:data|telemetry)\s+every\s+(\d+)\s*(?:ms|seconds?|s)?"),
                        "interval_value",
                    ),
                    (
                        pattern(r"(?:reduce|increase)\s+(?:publish|telemetry)\s+(?:frequency|rate)?\s*(?:to\s+)?(\d+)"),
                        "interval_value",
                    ),
                ],
            },
            PatternFamily {
                kind: IntentKind::AudioGain,
                patterns: vec![
                    (pattern(r"(?:set\s+)?(?:audio\s+)?gain\s+(?:to\s+)?(\d+\.?\d*)[x%]?"), "gain_value"),
                    (pattern(r"(?:amplify|boost)\s+(?:audio\s+)?(?:by\s+)?(\d+\.?\d*)[x%]?"), "gain_value"),
                    (
                        pattern(r"(?:reduce|lower|decrease)\s+(?:audio\s+)?(?:volume|level|gain)\s+(?:to\s+)?(\d+\.?\d*)"),
                        "gain_value",
                    ),
                    (pattern(r"(?:set\s+)?audio\s+(?:volume|level)\s+(?:to\s+)?(\d+\.?\d*)"), "gain_value"),
                ],
            },
        ];

        let resolvers = TargetResolvers {
            device_token: pattern(r"(?:device|node)[-_]?(\w+)"),
            esp32_token: pattern(r"esp32[-_]?(audio[-_]?\d*|\d+)"),
            trailing_for: pattern(r"for\s+(esp32[-\w]*|node[-\w]*|\S+[-_]\d+)"),
        };

        Self { families, resolvers }
    }

    /// Parse a goal statement. Always returns a structure; unmatched input
    /// yields `General` with empty parameters.
    pub fn parse(&self, text: &str) -> ParsedIntent {
        let lowered = text.to_lowercase();
        let kind = classify(&lowered);

        let mut parameters = BTreeMap::new();
        for family in &self.families {
            for (regex, param_name) in &family.patterns {
                if let Some(captures) = regex.captures(&lowered) {
                    let groups: Vec<String> = captures
                        .iter()
                        .skip(1)
                        .flatten()
                        .map(|group| group.as_str().to_string())
                        .collect();
                    parameters.insert((*param_name).to_string(), ParamValue::Captures(groups));
                }
            }
        }

        if let Some(target) = self.resolve_target(&lowered) {
            parameters.insert(PARAM_TARGET_DEVICE.to_string(), ParamValue::Scalar(target));
        }

        let parsed = ParsedIntent { kind, parameters, raw_text: text.to_string() };
        debug!(
            kind = ?parsed.kind,
            parameter_count = parsed.parameters.len(),
            target = parsed.target_device().unwrap_or("none"),
            "parsed intent"
        );
        parsed
    }

    /// Parse a submitted [`RawIntent`]. A caller-supplied kind hint only
    /// applies when the classifier itself came up empty.
    pub fn parse_raw(&self, raw: &RawIntent) -> ParsedIntent {
        let mut parsed = self.parse(&raw.text);
        if parsed.kind == IntentKind::General {
            if let Some(hint) = raw.kind_hint {
                parsed.kind = hint;
            }
        }
        parsed
    }

    /// Target resolution, first match wins: an explicit device/node token,
    /// then an esp32 hardware token, then a trailing `for <token>` clause.
    fn resolve_target(&self, lowered: &str) -> Option<String> {
        if let Some(captures) = self.resolvers.device_token.captures(lowered) {
            return Some(normalize_node_target(&captures[1]));
        }
        if let Some(captures) = self.resolvers.esp32_token.captures(lowered) {
            return Some(normalize_esp32_target(&captures[1]));
        }
        if let Some(captures) = self.resolvers.trailing_for.captures(lowered) {
            return Some(captures[1].to_string());
        }
        None
    }
}

fn classify(lowered: &str) -> IntentKind {
    for (kind, keywords) in CLASSIFIER_PRECEDENCE {
        if keywords.iter().any(|keyword| lowered.contains(keyword)) {
            return kind;
        }
    }
    IntentKind::General
}

/// Simulated-node identifiers are always surfaced as `node-<id>`.
fn normalize_node_target(captured: &str) -> String {
    format!("node-{captured}")
}

/// Hardware tokens normalize to `esp32-audio-<n>`, `<n>` defaulting to 1
/// when the label carries no index ("esp32-audio", "esp32_audio").
fn normalize_esp32_target(label: &str) -> String {
    let digits: String = label
        .trim_start_matches("audio")
        .trim_matches(|ch| ch == '-' || ch == '_')
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    if digits.is_empty() {
        "esp32-audio-1".to_string()
    } else {
        format!("esp32-audio-{digits}")
    }
}
