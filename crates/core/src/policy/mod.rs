//! Policy records compiled from parsed intents.

pub mod compiler;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Priority range every policy is clamped into.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

/// Backend-addressable instruction kind. The device-side and network-side
/// subsets are routed to different enforcement channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    TrafficShaping,
    QosControl,
    RoutingPriority,
    DeviceConfig,
    BandwidthLimit,
    SampleRate,
    DeviceControl,
    PublishInterval,
    AudioGain,
}

/// Stable, sortable policy identifier (`policy-<zero-padded sequence>`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub String);

impl std::fmt::Display for PolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic policy-id source, injected into the compiler rather than held
/// as hidden process-wide state. Never resets within a run; ids from one
/// sequence sort in creation order.
#[derive(Debug, Default)]
pub struct PolicyIdSeq {
    counter: AtomicU64,
}

impl PolicyIdSeq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> PolicyId {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        PolicyId(format!("policy-{sequence:08}"))
    }
}

/// A compiled, backend-addressable instruction derived from an intent.
///
/// Invariants enforced at construction: `target` is non-empty (defaulted
/// upstream, never blank) and `priority` sits in [`PRIORITY_RANGE`]. Numeric
/// parameters are clamped to their documented domains by the compiler, so
/// the enforcement router never sees an out-of-domain value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub kind: PolicyKind,
    pub target: String,
    pub parameters: Map<String, Value>,
    pub priority: u8,
}

impl Policy {
    pub fn new(
        id: PolicyId,
        kind: PolicyKind,
        target: impl Into<String>,
        parameters: Map<String, Value>,
        priority: u8,
    ) -> Self {
        let target = target.into();
        debug_assert!(!target.is_empty(), "policy target must be non-empty");
        Self {
            id,
            kind,
            target,
            parameters,
            priority: priority.clamp(*PRIORITY_RANGE.start(), *PRIORITY_RANGE.end()),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }
}
