pub mod mqtt;
pub mod prometheus;
pub mod tc;

pub use mqtt::{MqttDeviceChannel, ReconnectPolicy};
pub use prometheus::PrometheusMetrics;
pub use tc::TcNetworkChannel;
