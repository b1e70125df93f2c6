use std::sync::Arc;

use intentd_channels::{MqttDeviceChannel, PrometheusMetrics, ReconnectPolicy, TcNetworkChannel};
use intentd_core::config::{AppConfig, ConfigError, LoadOptions};
use intentd_core::errors::MetricsError;
use intentd_core::{EnforcementRouter, FeedbackController, IntentService};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub service: Arc<IntentService>,
    pub device_channel: Arc<MqttDeviceChannel>,
    pub network_channel: Arc<TcNetworkChannel>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("metrics client construction failed: {0}")]
    Metrics(#[from] MetricsError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let device_channel =
        Arc::new(MqttDeviceChannel::connect(&config.mqtt, ReconnectPolicy::default()));
    info!(
        event_name = "system.bootstrap.device_channel",
        correlation_id = "bootstrap",
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        "device channel event loop started"
    );

    let network_channel = Arc::new(TcNetworkChannel::new(&config.network));
    info!(
        event_name = "system.bootstrap.network_channel",
        correlation_id = "bootstrap",
        interface = %config.network.interface,
        dry_run = config.network.dry_run,
        "network channel configured"
    );

    let metrics = Arc::new(PrometheusMetrics::new(&config.metrics)?);
    let feedback = Arc::new(FeedbackController::new(metrics));

    let router = EnforcementRouter::new(device_channel.clone(), network_channel.clone());
    let service = Arc::new(IntentService::new(router, feedback));

    Ok(Application { config, service, device_channel, network_channel })
}
