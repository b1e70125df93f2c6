//! Intent acquisition types.
//!
//! A [`RawIntent`] is the operator's free-text goal statement; parsing turns
//! it into a [`ParsedIntent`] exactly once. Re-parsing produces a fresh
//! value, never a mutation.

pub mod parser;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::ValidationFailure;

/// Operator-supplied goal statement, immutable once submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIntent {
    pub text: String,
    /// Caller-supplied classification hint; advisory only.
    pub kind_hint: Option<IntentKind>,
}

impl RawIntent {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), kind_hint: None }
    }
}

/// Primary classification of an intent. Exactly one kind per intent; an
/// unclassifiable statement is `General`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Priority,
    Bandwidth,
    Latency,
    Qos,
    SampleRate,
    DeviceControl,
    PublishInterval,
    AudioGain,
    General,
}

/// An extracted parameter value. Single-token resolutions (like the target
/// device) are scalars; regex families contribute their capture groups as an
/// ordered list. The two are distinct on purpose so consumers never have to
/// guess which shape they were handed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(String),
    Captures(Vec<String>),
}

impl ParamValue {
    /// First usable value: the scalar itself, or the first capture group.
    pub fn first(&self) -> Option<&str> {
        match self {
            ParamValue::Scalar(value) => Some(value.as_str()),
            ParamValue::Captures(groups) => groups.first().map(String::as_str),
        }
    }

    /// Capture group by index; scalars expose themselves at index 0.
    pub fn get(&self, index: usize) -> Option<&str> {
        match self {
            ParamValue::Scalar(value) => (index == 0).then_some(value.as_str()),
            ParamValue::Captures(groups) => groups.get(index).map(String::as_str),
        }
    }
}

/// Result of parsing one [`RawIntent`]. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub kind: IntentKind,
    pub parameters: BTreeMap<String, ParamValue>,
    pub raw_text: String,
}

impl ParsedIntent {
    /// The resolved target device, when any resolver matched.
    pub fn target_device(&self) -> Option<&str> {
        self.parameters.get(parser::PARAM_TARGET_DEVICE).and_then(ParamValue::first)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        self.parameters.get(name)
    }

    /// The only two rejection conditions on the request path: an intent
    /// that could not be classified, or one with nothing extracted from it.
    /// Everything else is accepted, even when semantically odd.
    pub fn validate(&self) -> Result<(), ValidationFailure> {
        if self.kind == IntentKind::General {
            return Err(ValidationFailure::UnclassifiedIntent);
        }
        if self.parameters.is_empty() {
            return Err(ValidationFailure::NoParameters);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{IntentKind, ParamValue, ParsedIntent};
    use crate::errors::ValidationFailure;

    fn intent_with(kind: IntentKind, parameters: BTreeMap<String, ParamValue>) -> ParsedIntent {
        ParsedIntent { kind, parameters, raw_text: "test".to_string() }
    }

    #[test]
    fn general_intent_fails_validation_before_parameter_check() {
        let mut parameters = BTreeMap::new();
        parameters.insert("anything".to_string(), ParamValue::Scalar("x".to_string()));

        let result = intent_with(IntentKind::General, parameters).validate();
        assert_eq!(result, Err(ValidationFailure::UnclassifiedIntent));
    }

    #[test]
    fn classified_intent_without_parameters_is_rejected() {
        let result = intent_with(IntentKind::Latency, BTreeMap::new()).validate();
        assert_eq!(result, Err(ValidationFailure::NoParameters));
    }

    #[test]
    fn param_value_first_reads_scalars_and_capture_lists() {
        let scalar = ParamValue::Scalar("node-1".to_string());
        assert_eq!(scalar.first(), Some("node-1"));
        assert_eq!(scalar.get(0), Some("node-1"));
        assert_eq!(scalar.get(1), None);

        let captures = ParamValue::Captures(vec!["100".to_string(), "mbps".to_string()]);
        assert_eq!(captures.first(), Some("100"));
        assert_eq!(captures.get(1), Some("mbps"));
        assert_eq!(captures.get(2), None);
    }
}
