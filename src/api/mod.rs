//! Remote collaborator interface.
//!
//! The coordinator talks to the meter server exclusively through the
//! [`MeterApi`] trait so tests can substitute a scripted fake. The real
//! implementation, [`HttpMeterApi`], speaks JSON over HTTP via `reqwest`.
//!
//! Two error classes are distinguished throughout the crate:
//! - **transport failure**: a connection error, a non-2xx status, or an
//!   undecodable body ([`ApiError`])
//! - **domain error**: a 2xx response whose JSON body carries an `error`
//!   field; these are data on the response types, never `Err` values

pub mod http;

pub use http::HttpMeterApi;

use crate::models::{
    CaptureSource, DeviceSettings, EvaluationSample, MeterSnapshot, Template, TemplatePayload,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Transport-level failures of the remote collaborator.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned status {status} for {path}")]
    Status { status: u16, path: String },

    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid client configuration: {0}")]
    Config(String),
}

/// Result of `POST /api/watermeters/{id}/search_thresholds`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ThresholdSearchResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub threshold: Option<[f64; 2]>,
    #[serde(default)]
    pub threshold_last: Option<[f64; 2]>,
    #[serde(default)]
    pub avg_confidence: Option<f64>,
}

/// Result of `POST /api/watermeters/{id}/evaluations/reevaluate`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReevaluateResponse {
    #[serde(default)]
    pub result: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// One sampled evaluation from the sample endpoints. The full payload is
/// kept alongside the extracted fields so nothing the server sends is lost.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleResponse {
    pub error: Option<String>,
    pub processed_images: Vec<String>,
    pub predictions: Value,
    pub raw: Value,
}

impl SampleResponse {
    /// Pull the known fields out of a raw JSON payload.
    pub fn from_value(raw: Value) -> Self {
        let error = raw
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);
        let processed_images = raw
            .get("processed_images")
            .and_then(Value::as_array)
            .map(|images| {
                images
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let predictions = raw.get("predictions").cloned().unwrap_or(Value::Null);
        Self {
            error,
            processed_images,
            predictions,
            raw,
        }
    }

    pub fn into_sample(self) -> EvaluationSample {
        EvaluationSample {
            processed_images: self.processed_images,
            predictions: self.predictions,
            raw: self.raw,
        }
    }
}

/// Result of `POST /api/templates`. A missing id means the server rejected
/// the template.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TemplateCreated {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
}

/// Remote operations consumed by the setup workflow.
///
/// All methods report transport failures through [`ApiError`]; domain
/// errors stay inside the response types.
#[allow(async_fn_in_trait)]
pub trait MeterApi {
    /// Run the server-side threshold sweep with the given step count.
    async fn search_thresholds(
        &self,
        meter_id: &str,
        steps: u32,
    ) -> Result<ThresholdSearchResponse, ApiError>;

    /// Re-run evaluation of the latest picture against current settings.
    async fn reevaluate(&self, meter_id: &str) -> Result<ReevaluateResponse, ApiError>;

    /// Number of stored historical evaluations for the meter.
    async fn evaluation_count(&self, meter_id: &str) -> Result<u64, ApiError>;

    /// Re-evaluate one random historical evaluation (`sample/-1`).
    async fn sample_random(&self, meter_id: &str) -> Result<SampleResponse, ApiError>;

    /// Re-evaluate the current evaluation (`sample`).
    async fn sample_current(&self, meter_id: &str) -> Result<SampleResponse, ApiError>;

    /// Persist the settings object for the meter.
    async fn update_settings(
        &self,
        meter_id: &str,
        settings: &DeviceSettings,
    ) -> Result<(), ApiError>;

    /// Fetch a saved template record.
    async fn fetch_template(&self, template_id: &str) -> Result<Template, ApiError>;

    /// Create a template; the response carries the assigned id.
    async fn create_template(&self, payload: &TemplatePayload) -> Result<TemplateCreated, ApiError>;

    /// Ask a capture source to take a new picture.
    async fn trigger_capture(&self, source_id: i64) -> Result<(), ApiError>;

    /// Refresh canonical meter state: settings, latest picture, latest
    /// evaluation.
    async fn fetch_meter(&self, meter_id: &str) -> Result<MeterSnapshot, ApiError>;

    /// List configured capture sources.
    async fn list_sources(&self) -> Result<Vec<CaptureSource>, ApiError>;
}
