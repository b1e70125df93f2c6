//! Prometheus-style metrics collaborator.
//!
//! One instant query per goal metric against `/api/v1/query`. The first
//! sample of the result vector is the current value; an empty vector is an
//! explicit absence, not an error.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use intentd_core::config::MetricsConfig;
use intentd_core::errors::MetricsError;
use intentd_core::MetricsSource;

pub struct PrometheusMetrics {
    client: reqwest::Client,
    base_url: String,
}

impl PrometheusMetrics {
    pub fn new(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.query_timeout_secs))
            .build()
            .map_err(|error| MetricsError::Query(error.to_string()))?;

        Ok(Self { client, base_url: config.prometheus_url.trim_end_matches('/').to_string() })
    }
}

/// Instant-query expression for a metric, scoped to one device when the
/// goal names a subject.
fn render_query(metric: &str, target: Option<&str>) -> String {
    match target {
        Some(target) => format!("{metric}{{device=\"{target}\"}}"),
        None => metric.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: QueryData,
}

#[derive(Debug, Default, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<QuerySample>,
}

#[derive(Debug, Deserialize)]
struct QuerySample {
    /// `[unix_timestamp, "value"]`; Prometheus encodes sample values as
    /// strings.
    value: (f64, String),
}

fn first_sample_value(response: &QueryResponse) -> Result<Option<f64>, MetricsError> {
    if response.status != "success" {
        return Err(MetricsError::Query(format!("query status was `{}`", response.status)));
    }

    let Some(sample) = response.data.result.first() else {
        return Ok(None);
    };

    sample
        .value
        .1
        .parse::<f64>()
        .map(Some)
        .map_err(|_| MetricsError::Query(format!("unparseable sample value `{}`", sample.value.1)))
}

#[async_trait]
impl MetricsSource for PrometheusMetrics {
    async fn current_value(
        &self,
        metric: &str,
        target: Option<&str>,
    ) -> Result<Option<f64>, MetricsError> {
        let query = render_query(metric, target);
        debug!(query = %query, "running instant metrics query");

        let response = self
            .client
            .get(format!("{}/api/v1/query", self.base_url))
            .query(&[("query", query.as_str())])
            .send()
            .await
            .map_err(|error| MetricsError::Unreachable(error.to_string()))?;

        let body = response
            .json::<QueryResponse>()
            .await
            .map_err(|error| MetricsError::Query(error.to_string()))?;

        first_sample_value(&body)
    }
}
