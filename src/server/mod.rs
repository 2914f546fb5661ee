//! Axum routes for the batch prediction API.
//!
//! - `GET /` service banner
//! - `GET /health` liveness plus the feature schema in use
//! - `POST /predict/batch` majority-vote recommendation for 1 to 10 samples

mod error;

pub use error::{ApiError, ErrorBody};

use crate::analysis::BatchAggregator;
use crate::config::ServerConfig;
use crate::error::AggregationError;
use crate::models::{BatchResponse, RawSample, MAX_BATCH_SIZE};
use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Shared, read-only state of the server.
pub struct AppState {
    pub aggregator: Arc<BatchAggregator>,
    pub request_timeout: Duration,
    pub expose_internal_errors: bool,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(aggregator: Arc<BatchAggregator>, config: &ServerConfig) -> Self {
        Self {
            aggregator,
            request_timeout: config.request_timeout(),
            expose_internal_errors: config.expose_internal_errors,
            started_at: Utc::now(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub schema_version: String,
    pub features: Vec<String>,
    pub classes: usize,
    pub max_samples: usize,
    pub started_at: DateTime<Utc>,
}

/// Construct the router with all endpoints
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health_check))
        .route("/predict/batch", post(predict_batch))
        .with_state(Arc::new(state))
}

/// Bind and serve until Ctrl-C.
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<()> {
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
}

async fn home() -> Json<Value> {
    Json(json!({
        "message": "Crop Recommendation API - POST /predict/batch",
        "max_samples": MAX_BATCH_SIZE,
    }))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let schema = state.aggregator.schema();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: schema.version.clone(),
        features: schema.field_names(),
        classes: state.aggregator.classifier().classes().len(),
        max_samples: MAX_BATCH_SIZE,
        started_at: state.started_at,
    })
}

/// Recommend one crop for the submitted batch.
///
/// POST /predict/batch
///
/// Aggregation is synchronous, so it runs on the blocking pool under the
/// configured request timeout.
async fn predict_batch(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<BatchResponse>, Response> {
    let outcome = match body.map_err(ApiError::from).and_then(|Json(value)| read_batch(value)) {
        Ok(samples) => aggregate(&state, samples).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            if err.is_caller_error() {
                info!("Rejected batch: {}", err);
            } else {
                error!("Batch prediction failed: {}", err);
            }
            Err(err.respond(state.expose_internal_errors))
        }
    }
}

async fn aggregate(state: &AppState, samples: Vec<RawSample>) -> Result<BatchResponse, ApiError> {
    debug!("Received batch of {} samples", samples.len());

    let aggregator = Arc::clone(&state.aggregator);
    let task = tokio::task::spawn_blocking(move || aggregator.aggregate(&samples));

    match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(result)) => result.map(BatchResponse::from).map_err(ApiError::from),
        Ok(Err(join_error)) => Err(ApiError::Worker(join_error.to_string())),
        Err(_) => Err(ApiError::Timeout(state.request_timeout.as_secs())),
    }
}

/// Pull the sample list out of a `{"samples": [...]}` body.
///
/// Batch size is checked before sample shapes so an oversized batch is
/// reported as such whatever it contains.
fn read_batch(body: Value) -> Result<Vec<RawSample>, ApiError> {
    let mut body = match body {
        Value::Object(map) => map,
        _ => {
            return Err(ApiError::InvalidRequest(
                "request body must be a JSON object with a 'samples' array".to_string(),
            ))
        }
    };

    let entries = match body.remove("samples") {
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(ApiError::InvalidRequest(
                "'samples' must be an array of sample objects".to_string(),
            ))
        }
        None => {
            return Err(ApiError::InvalidRequest(
                "request body is missing the 'samples' array".to_string(),
            ))
        }
    };

    if entries.is_empty() {
        return Err(AggregationError::EmptyBatch.into());
    }
    if entries.len() > MAX_BATCH_SIZE {
        return Err(AggregationError::BatchTooLarge {
            size: entries.len(),
            max: MAX_BATCH_SIZE,
        }
        .into());
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| match entry {
            Value::Object(sample) => Ok(sample),
            other => Err(ApiError::InvalidRequest(format!(
                "sample {} must be a JSON object of feature values, got {}",
                index,
                json_type(&other)
            ))),
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
