//! Canonical per-meter state collaborator.
//!
//! The [`MeterStore`] holds the server-side truth the workflow mutates:
//! device settings, the latest evaluation, the last captured picture, and
//! the resolved capture source. It is dependency-injected into the
//! coordinator and refreshed wholesale from the server whenever an
//! operation needs to reconcile local state.

use crate::api::{ApiError, MeterApi};
use crate::models::{CaptureSource, DeviceSettings, EvaluationSnapshot, Picture};
use std::sync::{Arc, RwLock};

/// The data held by the store. In-memory mutations are applied first and
/// persisted afterwards; a failed persist leaves local state ahead of the
/// server until the next [`MeterStore::fetch_all`].
#[derive(Debug, Clone, Default)]
pub struct MeterData {
    pub settings: DeviceSettings,
    pub evaluation: EvaluationSnapshot,
    pub last_picture: Option<Picture>,
    pub source: Option<CaptureSource>,
}

/// Thread-safe holder for [`MeterData`], shared between the coordinator
/// and any UI that renders it.
#[derive(Debug, Clone, Default)]
pub struct MeterStore {
    inner: Arc<RwLock<MeterData>>,
}

impl MeterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute a function with read access to the data.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&MeterData) -> R,
    {
        let data = self.inner.read().unwrap();
        f(&data)
    }

    /// Execute a function with write access to the data.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut MeterData),
    {
        let mut data = self.inner.write().unwrap();
        f(&mut data);
    }

    /// Clone out the full data set.
    pub fn snapshot(&self) -> MeterData {
        self.inner.read().unwrap().clone()
    }

    /// Clone out the current settings.
    pub fn settings(&self) -> DeviceSettings {
        self.inner.read().unwrap().settings.clone()
    }

    /// Refresh settings, picture, and latest evaluation from the server.
    pub async fn fetch_all(&self, api: &impl MeterApi, meter_id: &str) -> Result<(), ApiError> {
        let snapshot = api.fetch_meter(meter_id).await?;
        self.update(|data| {
            data.settings = snapshot.settings;
            data.last_picture = snapshot.picture;
            if let Some(evaluation) = snapshot.evaluation {
                data.evaluation = evaluation;
            }
        });
        tracing::debug!("refreshed meter state for {}", meter_id);
        Ok(())
    }

    /// Persist the current in-memory settings for the meter.
    pub async fn push_settings(&self, api: &impl MeterApi, meter_id: &str) -> Result<(), ApiError> {
        let settings = self.settings();
        api.update_settings(meter_id, &settings).await
    }

    /// Resolve the capture source for the meter, fetching the source list
    /// on demand. Prefers a source named after the meter, otherwise falls
    /// back to the first listed one. The result is cached.
    pub async fn resolve_source(
        &self,
        api: &impl MeterApi,
        meter_id: &str,
    ) -> Result<Option<CaptureSource>, ApiError> {
        if let Some(source) = self.read(|data| data.source.clone()) {
            return Ok(Some(source));
        }

        let sources = api.list_sources().await?;
        let source = sources
            .iter()
            .find(|s| s.name == meter_id)
            .or_else(|| sources.first())
            .cloned();

        if let Some(source) = &source {
            self.update(|data| data.source = Some(source.clone()));
        }
        Ok(source)
    }
}
