//! Scripted [`MeterApi`] fake shared by the integration tests.
//!
//! Every method records its name into `calls`, checks whether it was told
//! to fail, and returns whatever payload the test scripted. The `on_sample`
//! hook runs inside `sample_random` so tests can simulate a cancellation
//! landing while a request is in flight.
#![allow(dead_code)]

use metercal::api::{
    ApiError, MeterApi, ReevaluateResponse, SampleResponse, TemplateCreated,
    ThresholdSearchResponse,
};
use metercal::models::{
    CaptureSource, DeviceSettings, MeterSnapshot, Template, TemplatePayload,
};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

fn server_error(path: &str) -> ApiError {
    ApiError::Status {
        status: 500,
        path: path.to_string(),
    }
}

type SampleHook = Box<dyn Fn(usize) + Send + Sync>;

pub struct FakeApi {
    pub calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,

    pub eval_count: AtomicU64,
    pub threshold_payload: Mutex<Value>,
    pub reevaluate_payload: Mutex<Value>,
    pub sample_payload: Mutex<Value>,
    pub template: Mutex<Option<Template>>,
    pub created_id: Mutex<Option<String>>,
    pub snapshot: Mutex<MeterSnapshot>,
    pub sources: Mutex<Vec<CaptureSource>>,

    pub pushed_settings: Mutex<Vec<DeviceSettings>>,
    pub created_payloads: Mutex<Vec<TemplatePayload>>,
    pub captured_sources: Mutex<Vec<i64>>,

    pub on_sample: Mutex<Option<SampleHook>>,
    sample_calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            eval_count: AtomicU64::new(10),
            threshold_payload: Mutex::new(json!({
                "threshold": [90.0, 250.0],
                "threshold_last": [80.0, 240.0],
                "avg_confidence": 0.9
            })),
            reevaluate_payload: Mutex::new(json!({ "result": true })),
            sample_payload: Mutex::new(json!({
                "processed_images": ["aW1nMQ=="],
                "predictions": [[["5", 0.91]]]
            })),
            template: Mutex::new(None),
            created_id: Mutex::new(Some("tpl-1".to_string())),
            snapshot: Mutex::new(MeterSnapshot::default()),
            sources: Mutex::new(Vec::new()),
            pushed_settings: Mutex::new(Vec::new()),
            created_payloads: Mutex::new(Vec::new()),
            captured_sources: Mutex::new(Vec::new()),
            on_sample: Mutex::new(None),
            sample_calls: AtomicUsize::new(0),
        }
    }

    /// Make the named method fail with a 500 from now on.
    pub fn fail(&self, method: &'static str) {
        self.failing.lock().unwrap().insert(method);
    }

    /// How many times the named method has been called.
    pub fn calls_of(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|name| name.as_str() == method)
            .count()
    }

    fn begin(&self, method: &'static str) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(method.to_string());
        if self.failing.lock().unwrap().contains(method) {
            Err(server_error(method))
        } else {
            Ok(())
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, ApiError> {
        serde_json::from_value(payload).map_err(|e| ApiError::Config(e.to_string()))
    }
}

impl Default for FakeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MeterApi for FakeApi {
    async fn search_thresholds(
        &self,
        _meter_id: &str,
        _steps: u32,
    ) -> Result<ThresholdSearchResponse, ApiError> {
        self.begin("search_thresholds")?;
        Self::decode(self.threshold_payload.lock().unwrap().clone())
    }

    async fn reevaluate(&self, _meter_id: &str) -> Result<ReevaluateResponse, ApiError> {
        self.begin("reevaluate")?;
        Self::decode(self.reevaluate_payload.lock().unwrap().clone())
    }

    async fn evaluation_count(&self, _meter_id: &str) -> Result<u64, ApiError> {
        self.begin("evaluation_count")?;
        Ok(self.eval_count.load(Ordering::SeqCst))
    }

    async fn sample_random(&self, _meter_id: &str) -> Result<SampleResponse, ApiError> {
        self.begin("sample_random")?;
        let index = self.sample_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_sample.lock().unwrap().as_ref() {
            hook(index);
        }
        Ok(SampleResponse::from_value(
            self.sample_payload.lock().unwrap().clone(),
        ))
    }

    async fn sample_current(&self, _meter_id: &str) -> Result<SampleResponse, ApiError> {
        self.begin("sample_current")?;
        Ok(SampleResponse::from_value(
            self.sample_payload.lock().unwrap().clone(),
        ))
    }

    async fn update_settings(
        &self,
        _meter_id: &str,
        settings: &DeviceSettings,
    ) -> Result<(), ApiError> {
        self.begin("update_settings")?;
        self.pushed_settings.lock().unwrap().push(settings.clone());
        // Echo persistence: later fetches see what was pushed
        self.snapshot.lock().unwrap().settings = settings.clone();
        Ok(())
    }

    async fn fetch_template(&self, template_id: &str) -> Result<Template, ApiError> {
        self.begin("fetch_template")?;
        self.template
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| server_error(template_id))
    }

    async fn create_template(
        &self,
        payload: &TemplatePayload,
    ) -> Result<TemplateCreated, ApiError> {
        self.begin("create_template")?;
        self.created_payloads.lock().unwrap().push(payload.clone());
        Ok(TemplateCreated {
            id: self.created_id.lock().unwrap().clone(),
            name: payload.name.clone(),
        })
    }

    async fn trigger_capture(&self, source_id: i64) -> Result<(), ApiError> {
        self.begin("trigger_capture")?;
        self.captured_sources.lock().unwrap().push(source_id);
        Ok(())
    }

    async fn fetch_meter(&self, _meter_id: &str) -> Result<MeterSnapshot, ApiError> {
        self.begin("fetch_meter")?;
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn list_sources(&self) -> Result<Vec<CaptureSource>, ApiError> {
        self.begin("list_sources")?;
        Ok(self.sources.lock().unwrap().clone())
    }
}
