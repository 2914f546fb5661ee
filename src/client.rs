//! HTTP client for a running crop-advisor server.
//!
//! Used by `predict --server` to send a batch to `POST /predict/batch`.

use crate::models::{BatchRequest, BatchResponse, RawSample};
use crate::server::ErrorBody;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

/// Client for the batch prediction API.
pub struct RemoteClient {
    base_url: String,
    timeout_seconds: u64,
    http_client: reqwest::Client,
}

impl RemoteClient {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_seconds,
            http_client,
        })
    }

    /// Post a batch and return the server's recommendation.
    pub async fn predict_batch(&self, samples: Vec<RawSample>) -> Result<BatchResponse> {
        let url = format!("{}/predict/batch", self.base_url);
        info!("Sending {} samples to {}", samples.len(), url);

        let request = BatchRequest { samples };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Request timed out after {}s", self.timeout_seconds)
                } else if e.is_connect() {
                    anyhow::anyhow!("Cannot connect to crop-advisor at {}", self.base_url)
                } else {
                    anyhow::anyhow!("Failed to send request: {}", e)
                }
            })?;

        let status = response.status();
        debug!("Server answered {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Server rejected batch ({}): {}",
                status,
                describe_error_body(&body)
            ));
        }

        response
            .json::<BatchResponse>()
            .await
            .context("Failed to parse server response")
    }
}

/// Turn an error payload into one readable line per violation.
fn describe_error_body(body: &str) -> String {
    let parsed: ErrorBody = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) => return body.to_string(),
    };

    let mut lines = vec![parsed.message];
    for sample in parsed.details.unwrap_or_default() {
        for violation in sample.violations {
            lines.push(format!(
                "  sample {}: {}",
                sample.index + 1,
                violation.message
            ));
        }
    }
    lines.join("\n")
}
