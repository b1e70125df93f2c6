use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub network: NetworkConfig,
    pub metrics: MetricsConfig,
    pub feedback: FeedbackConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub connect_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub interface: String,
    /// Log traffic-control commands instead of executing them.
    pub dry_run: bool,
}

#[derive(Clone, Debug)]
pub struct MetricsConfig {
    pub prometheus_url: String,
    pub query_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct FeedbackConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Dispatch recommended adjustments automatically instead of only
    /// logging them.
    pub auto_apply: bool,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub mqtt_host: Option<String>,
    pub mqtt_port: Option<u16>,
    pub network_interface: Option<String>,
    pub network_dry_run: Option<bool>,
    pub prometheus_url: Option<String>,
    pub feedback_enabled: Option<bool>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                host: "localhost".to_string(),
                port: 1883,
                client_id: "intentd".to_string(),
                username: None,
                password: None,
                connect_timeout_secs: 10,
            },
            network: NetworkConfig { interface: "eth0".to_string(), dry_run: false },
            metrics: MetricsConfig {
                prometheus_url: "http://localhost:9090".to_string(),
                query_timeout_secs: 5,
            },
            feedback: FeedbackConfig { enabled: true, interval_secs: 30, auto_apply: false },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("intentd.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(mqtt) = patch.mqtt {
            if let Some(host) = mqtt.host {
                self.mqtt.host = host;
            }
            if let Some(port) = mqtt.port {
                self.mqtt.port = port;
            }
            if let Some(client_id) = mqtt.client_id {
                self.mqtt.client_id = client_id;
            }
            if let Some(username) = mqtt.username {
                self.mqtt.username = Some(username);
            }
            if let Some(password_value) = mqtt.password {
                self.mqtt.password = Some(secret_value(password_value));
            }
            if let Some(connect_timeout_secs) = mqtt.connect_timeout_secs {
                self.mqtt.connect_timeout_secs = connect_timeout_secs;
            }
        }

        if let Some(network) = patch.network {
            if let Some(interface) = network.interface {
                self.network.interface = interface;
            }
            if let Some(dry_run) = network.dry_run {
                self.network.dry_run = dry_run;
            }
        }

        if let Some(metrics) = patch.metrics {
            if let Some(prometheus_url) = metrics.prometheus_url {
                self.metrics.prometheus_url = prometheus_url;
            }
            if let Some(query_timeout_secs) = metrics.query_timeout_secs {
                self.metrics.query_timeout_secs = query_timeout_secs;
            }
        }

        if let Some(feedback) = patch.feedback {
            if let Some(enabled) = feedback.enabled {
                self.feedback.enabled = enabled;
            }
            if let Some(interval_secs) = feedback.interval_secs {
                self.feedback.interval_secs = interval_secs;
            }
            if let Some(auto_apply) = feedback.auto_apply {
                self.feedback.auto_apply = auto_apply;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("INTENTD_MQTT_HOST") {
            self.mqtt.host = value;
        }
        if let Some(value) = read_env("INTENTD_MQTT_PORT") {
            self.mqtt.port = parse_u16("INTENTD_MQTT_PORT", &value)?;
        }
        if let Some(value) = read_env("INTENTD_MQTT_CLIENT_ID") {
            self.mqtt.client_id = value;
        }
        if let Some(value) = read_env("INTENTD_MQTT_USERNAME") {
            self.mqtt.username = Some(value);
        }
        if let Some(value) = read_env("INTENTD_MQTT_PASSWORD") {
            self.mqtt.password = Some(secret_value(value));
        }
        if let Some(value) = read_env("INTENTD_MQTT_CONNECT_TIMEOUT_SECS") {
            self.mqtt.connect_timeout_secs =
                parse_u64("INTENTD_MQTT_CONNECT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("INTENTD_NETWORK_INTERFACE") {
            self.network.interface = value;
        }
        if let Some(value) = read_env("INTENTD_NETWORK_DRY_RUN") {
            self.network.dry_run = parse_bool("INTENTD_NETWORK_DRY_RUN", &value)?;
        }

        if let Some(value) = read_env("INTENTD_PROMETHEUS_URL") {
            self.metrics.prometheus_url = value;
        }
        if let Some(value) = read_env("INTENTD_METRICS_QUERY_TIMEOUT_SECS") {
            self.metrics.query_timeout_secs =
                parse_u64("INTENTD_METRICS_QUERY_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("INTENTD_FEEDBACK_ENABLED") {
            self.feedback.enabled = parse_bool("INTENTD_FEEDBACK_ENABLED", &value)?;
        }
        if let Some(value) = read_env("INTENTD_FEEDBACK_INTERVAL_SECS") {
            self.feedback.interval_secs = parse_u64("INTENTD_FEEDBACK_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("INTENTD_FEEDBACK_AUTO_APPLY") {
            self.feedback.auto_apply = parse_bool("INTENTD_FEEDBACK_AUTO_APPLY", &value)?;
        }

        if let Some(value) = read_env("INTENTD_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("INTENTD_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("INTENTD_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("INTENTD_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("INTENTD_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("INTENTD_LOGGING_LEVEL").or_else(|| read_env("INTENTD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("INTENTD_LOGGING_FORMAT").or_else(|| read_env("INTENTD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(mqtt_host) = overrides.mqtt_host {
            self.mqtt.host = mqtt_host;
        }
        if let Some(mqtt_port) = overrides.mqtt_port {
            self.mqtt.port = mqtt_port;
        }
        if let Some(network_interface) = overrides.network_interface {
            self.network.interface = network_interface;
        }
        if let Some(network_dry_run) = overrides.network_dry_run {
            self.network.dry_run = network_dry_run;
        }
        if let Some(prometheus_url) = overrides.prometheus_url {
            self.metrics.prometheus_url = prometheus_url;
        }
        if let Some(feedback_enabled) = overrides.feedback_enabled {
            self.feedback.enabled = feedback_enabled;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_mqtt(&self.mqtt)?;
        validate_network(&self.network)?;
        validate_metrics(&self.metrics)?;
        validate_feedback(&self.feedback)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("intentd.toml"), PathBuf::from("config/intentd.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_mqtt(mqtt: &MqttConfig) -> Result<(), ConfigError> {
    if mqtt.host.trim().is_empty() {
        return Err(ConfigError::Validation("mqtt.host must not be empty".to_string()));
    }

    if mqtt.port == 0 {
        return Err(ConfigError::Validation("mqtt.port must be greater than zero".to_string()));
    }

    if mqtt.client_id.trim().is_empty() {
        return Err(ConfigError::Validation("mqtt.client_id must not be empty".to_string()));
    }

    if mqtt.connect_timeout_secs == 0 || mqtt.connect_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "mqtt.connect_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    // Username/password go together on most brokers.
    if mqtt.username.is_some() {
        let missing = mqtt
            .password
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "mqtt.password is required when mqtt.username is set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_network(network: &NetworkConfig) -> Result<(), ConfigError> {
    if network.interface.trim().is_empty() {
        return Err(ConfigError::Validation("network.interface must not be empty".to_string()));
    }

    Ok(())
}

fn validate_metrics(metrics: &MetricsConfig) -> Result<(), ConfigError> {
    let url = metrics.prometheus_url.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "metrics.prometheus_url must start with http:// or https://".to_string(),
        ));
    }

    if metrics.query_timeout_secs == 0 || metrics.query_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "metrics.query_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_feedback(feedback: &FeedbackConfig) -> Result<(), ConfigError> {
    if feedback.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "feedback.interval_secs must be greater than zero".to_string(),
        ));
    }

    if feedback.auto_apply && !feedback.enabled {
        return Err(ConfigError::Validation(
            "feedback.auto_apply requires feedback.enabled".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    mqtt: Option<MqttPatch>,
    network: Option<NetworkPatch>,
    metrics: Option<MetricsPatch>,
    feedback: Option<FeedbackPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct MqttPatch {
    host: Option<String>,
    port: Option<u16>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
    connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NetworkPatch {
    interface: Option<String>,
    dry_run: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct MetricsPatch {
    prometheus_url: Option<String>,
    query_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FeedbackPatch {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    auto_apply: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_cleanly() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.mqtt.host == "localhost", "default mqtt host should be localhost")?;
        ensure(config.mqtt.port == 1883, "default mqtt port should be 1883")?;
        ensure(config.feedback.enabled, "feedback should be enabled by default")?;
        ensure(!config.feedback.auto_apply, "auto apply should be opt-in")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_MQTT_PASSWORD", "from-env-secret");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("intentd.toml");
            fs::write(
                &path,
                r#"
[mqtt]
username = "intentd"
password = "${TEST_MQTT_PASSWORD}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let password = config
                .mqtt
                .password
                .as_ref()
                .map(|value| value.expose_secret().to_string())
                .unwrap_or_default();
            ensure(password == "from-env-secret", "password should be loaded from environment")
        })();

        clear_vars(&["TEST_MQTT_PASSWORD"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTENTD_MQTT_HOST", "broker-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("intentd.toml");
            fs::write(
                &path,
                r#"
[mqtt]
host = "broker-from-file"

[network]
interface = "wlan0"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    network_interface: Some("eth1".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.mqtt.host == "broker-from-env", "env mqtt host should win over file")?;
            ensure(config.network.interface == "eth1", "override interface should win")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")
        })();

        clear_vars(&["INTENTD_MQTT_HOST"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTENTD_LOG_LEVEL", "warn");
        env::set_var("INTENTD_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["INTENTD_LOG_LEVEL", "INTENTD_LOG_FORMAT"]);
        result
    }

    #[test]
    fn username_without_password_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTENTD_MQTT_USERNAME", "intentd");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("mqtt.password")
            );
            ensure(has_message, "validation failure should mention mqtt.password")
        })();

        clear_vars(&["INTENTD_MQTT_USERNAME"]);
        result
    }

    #[test]
    fn auto_apply_requires_feedback_enabled() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTENTD_FEEDBACK_ENABLED", "false");
        env::set_var("INTENTD_FEEDBACK_AUTO_APPLY", "true");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("auto_apply")
            );
            ensure(has_message, "validation failure should mention auto_apply")
        })();

        clear_vars(&["INTENTD_FEEDBACK_ENABLED", "INTENTD_FEEDBACK_AUTO_APPLY"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("INTENTD_MQTT_USERNAME", "intentd");
        env::set_var("INTENTD_MQTT_PASSWORD", "broker-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("broker-secret-value"),
                "debug output should not contain the broker password",
            )
        })();

        clear_vars(&["INTENTD_MQTT_USERNAME", "INTENTD_MQTT_PASSWORD"]);
        result
    }
}
