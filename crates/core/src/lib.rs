pub mod config;
pub mod enforce;
pub mod errors;
pub mod feedback;
pub mod intent;
pub mod pipeline;
pub mod policy;

pub use config::{
    AppConfig, ConfigError, ConfigOverrides, FeedbackConfig, LoadOptions, LogFormat,
    LoggingConfig, MetricsConfig, MqttConfig, NetworkConfig, ServerConfig,
};
pub use enforce::{
    backend_for, is_hardware_target, Backend, ControlEnvelope, DeviceChannel, EnforcementResult,
    EnforcementRouter, NetworkChannel, TrafficRule,
};
pub use errors::{ChannelError, FeedbackError, MetricsError, ValidationFailure};
pub use feedback::{
    AdjustmentAction, FeedbackController, IntentGoal, MetricsSource, Recommendation, Satisfaction,
    Violation,
};
pub use intent::parser::IntentParser;
pub use intent::{IntentKind, ParamValue, ParsedIntent, RawIntent};
pub use pipeline::{IntentService, SubmittedIntent};
pub use policy::compiler::PolicyCompiler;
pub use policy::{Policy, PolicyId, PolicyIdSeq, PolicyKind};
