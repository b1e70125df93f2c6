use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use intentd_core::DeviceChannel;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    device_channel: Arc<dyn DeviceChannel>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub device_channel: HealthCheck,
    pub checked_at: String,
}

pub fn router(device_channel: Arc<dyn DeviceChannel>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { device_channel })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    device_channel: Arc<dyn DeviceChannel>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(device_channel)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// The service itself is always ready once this endpoint answers; overall
/// status degrades while the broker session is down, since device-side
/// policies cannot be enforced in that state.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let device_channel = device_check(state.device_channel.as_ref());
    let ready = device_channel.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "intentd-server runtime initialized".to_string(),
        },
        device_channel,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn device_check(channel: &dyn DeviceChannel) -> HealthCheck {
    if channel.is_connected() {
        HealthCheck { status: "ready", detail: "broker session established".to_string() }
    } else {
        HealthCheck { status: "degraded", detail: "broker session is down".to_string() }
    }
}
