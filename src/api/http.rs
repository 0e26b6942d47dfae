use super::{
    ApiError, MeterApi, ReevaluateResponse, SampleResponse, TemplateCreated,
    ThresholdSearchResponse,
};
use crate::config::ClientConfig;
use crate::models::{
    CaptureSource, DeviceSettings, EvaluationSnapshot, MeterSnapshot, Picture, Template,
    TemplatePayload,
};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct MeterResponse {
    #[serde(default)]
    picture: Option<Picture>,
}

#[derive(Debug, Deserialize)]
struct EvalsResponse {
    #[serde(default)]
    evals: Vec<EvalRecord>,
}

#[derive(Debug, Deserialize)]
struct EvalRecord {
    #[serde(default)]
    th_digits: Option<Vec<String>>,
    #[serde(default)]
    predictions: Value,
    #[serde(default)]
    total_confidence: Option<f64>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourcesResponse {
    #[serde(default)]
    sources: Vec<CaptureSource>,
}

/// JSON-over-HTTP implementation of [`MeterApi`].
///
/// Authentication is a bearer token attached to every request when the
/// client config provides one. Timeouts come from the config; no retries
/// are attempted at this level.
#[derive(Debug, Clone)]
pub struct HttpMeterApi {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpMeterApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ApiError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let mut builder = self.client.request(method, url);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        path: &str,
        builder: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = builder.send().await.map_err(|source| ApiError::Transport {
            path: path.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        response.json().await.map_err(|source| ApiError::Decode {
            path: path.to_string(),
            source,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(path, self.request(Method::GET, path)).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let mut builder = self.request(Method::POST, path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.execute(path, builder).await
    }
}

impl MeterApi for HttpMeterApi {
    async fn search_thresholds(
        &self,
        meter_id: &str,
        steps: u32,
    ) -> Result<ThresholdSearchResponse, ApiError> {
        let path = format!("api/watermeters/{meter_id}/search_thresholds");
        self.post_json(&path, Some(&json!({ "steps": steps }))).await
    }

    async fn reevaluate(&self, meter_id: &str) -> Result<ReevaluateResponse, ApiError> {
        let path = format!("api/watermeters/{meter_id}/evaluations/reevaluate");
        self.post_json(&path, None).await
    }

    async fn evaluation_count(&self, meter_id: &str) -> Result<u64, ApiError> {
        let path = format!("api/watermeters/{meter_id}/evals/count");
        let response: CountResponse = self.get_json(&path).await?;
        Ok(response.count)
    }

    async fn sample_random(&self, meter_id: &str) -> Result<SampleResponse, ApiError> {
        let path = format!("api/watermeters/{meter_id}/evaluations/sample/-1");
        let raw: Value = self.post_json(&path, None).await?;
        Ok(SampleResponse::from_value(raw))
    }

    async fn sample_current(&self, meter_id: &str) -> Result<SampleResponse, ApiError> {
        let path = format!("api/watermeters/{meter_id}/evaluations/sample");
        let raw: Value = self.post_json(&path, None).await?;
        Ok(SampleResponse::from_value(raw))
    }

    async fn update_settings(
        &self,
        meter_id: &str,
        settings: &DeviceSettings,
    ) -> Result<(), ApiError> {
        let path = format!("api/watermeters/{meter_id}/settings");
        let builder = self.request(Method::PUT, &path).json(settings);
        // The server replies with a confirmation message; discard it
        let _: Value = self.execute(&path, builder).await?;
        Ok(())
    }

    async fn fetch_template(&self, template_id: &str) -> Result<Template, ApiError> {
        let path = format!("api/templates/{template_id}");
        self.get_json(&path).await
    }

    async fn create_template(&self, payload: &TemplatePayload) -> Result<TemplateCreated, ApiError> {
        let path = "api/templates";
        let builder = self.request(Method::POST, path).json(payload);
        self.execute(path, builder).await
    }

    async fn trigger_capture(&self, source_id: i64) -> Result<(), ApiError> {
        let path = format!("api/sources/{source_id}/capture");
        let _: Value = self.post_json(&path, None).await?;
        Ok(())
    }

    async fn fetch_meter(&self, meter_id: &str) -> Result<MeterSnapshot, ApiError> {
        let settings: DeviceSettings = self
            .get_json(&format!("api/watermeters/{meter_id}/settings"))
            .await?;
        let meter: MeterResponse = self.get_json(&format!("api/watermeters/{meter_id}")).await?;
        let evals: EvalsResponse = self
            .get_json(&format!("api/watermeters/{meter_id}/evals?amount=1"))
            .await?;

        let evaluation = evals.evals.into_iter().next().map(|record| EvaluationSnapshot {
            th_digits: record.th_digits.unwrap_or_default(),
            predictions: record.predictions,
            total_confidence: record.total_confidence,
            timestamp: record.timestamp,
        });

        Ok(MeterSnapshot {
            settings,
            picture: meter.picture,
            evaluation,
        })
    }

    async fn list_sources(&self) -> Result<Vec<CaptureSource>, ApiError> {
        let response: SourcesResponse = self.get_json("api/sources").await?;
        Ok(response.sources)
    }
}
