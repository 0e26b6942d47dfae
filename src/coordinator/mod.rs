//! Setup workflow coordinator.
//!
//! [`SetupCoordinator`] is the top-level facade of the calibration flow. It
//! composes the remote collaborator ([`MeterApi`]), the canonical meter
//! state ([`MeterStore`]), the workflow state ([`WorkflowManager`]), and the
//! generation-counted [`CancelToken`], and exposes every operation the
//! wizard drives:
//!
//! - settings mutators (thresholds, flow rate, confidence, correction,
//!   segmentation), which persist remotely and may trigger re-evaluation
//! - the threshold sweep, the cancellable benchmark sampler, template
//!   save/fetch, capture, and re-evaluation
//!
//! Concurrency model: all operations are plain `async fn`s that suspend only
//! at remote calls. Re-entrancy of each long-running operation is rejected
//! via its busy flag (atomic test-and-set on the manager); distinct
//! operations may interleave. Cancellation is cooperative: mutators and
//! re-evaluation bump the cancel generation, and the sampler checks for a
//! newer generation between round trips, discarding results that arrive
//! after it went stale. In-flight requests are never aborted.

use crate::api::MeterApi;
use crate::models::{
    Point, SegmentationUpdate, Template, TemplatePayload, ThresholdSearchOutcome, ThresholdUpdate,
};
use crate::state::{CancelToken, WorkflowManager};
use crate::store::MeterStore;
use std::sync::Arc;

/// Default step count for the remote threshold sweep.
pub const DEFAULT_SEARCH_STEPS: u32 = 10;

/// Default number of samples requested by a benchmark run.
pub const DEFAULT_SAMPLE_COUNT: usize = 10;

/// Top-level facade over the meter setup workflow.
///
/// Cheap to clone; clones share all state.
#[derive(Debug, Clone)]
pub struct SetupCoordinator<C> {
    api: Arc<C>,
    store: MeterStore,
    workflow: WorkflowManager,
    cancel: CancelToken,
}

impl<C: MeterApi> SetupCoordinator<C> {
    pub fn new(api: Arc<C>) -> Self {
        Self::with_parts(api, MeterStore::new(), WorkflowManager::new())
    }

    /// Build from existing collaborators, for callers that share a store or
    /// manager with other components.
    pub fn with_parts(api: Arc<C>, store: MeterStore, workflow: WorkflowManager) -> Self {
        Self {
            api,
            store,
            workflow,
            cancel: CancelToken::new(),
        }
    }

    /// The workflow state manager, for subscribing to change events.
    pub fn workflow(&self) -> &WorkflowManager {
        &self.workflow
    }

    /// The canonical meter state collaborator.
    pub fn store(&self) -> &MeterStore {
        &self.store
    }

    /// The shared cancellation token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    // --- Wizard progression ---

    /// Advance the wizard past the given step. See
    /// [`WorkflowManager::advance_step`].
    pub fn advance_step(&self, step: u8) {
        self.workflow.advance_step(step);
    }

    /// Direct setter for the loading flag; no side effects.
    pub fn set_loading(&self, value: bool) {
        self.workflow.set_loading(value);
    }

    /// Reset the workflow to its initial values.
    pub fn reset(&self) {
        tracing::info!("resetting setup workflow state");
        self.workflow.reset();
    }

    /// Refresh all meter data with the loading flag raised.
    pub async fn load_data(&self, meter_id: &str) {
        self.workflow.set_loading(true);
        if let Err(e) = self.store.fetch_all(self.api.as_ref(), meter_id).await {
            tracing::error!("failed to load meter data for {}: {}", meter_id, e);
        }
        self.workflow.set_loading(false);
    }

    /// Drop collected benchmark samples; with a meter id, immediately start
    /// a fresh benchmark run.
    pub async fn clear_examples(&self, meter_id: Option<&str>) {
        self.workflow.update(|s| s.random_examples.clear());
        if let Some(meter_id) = meter_id {
            self.request_reevaluated_digits(meter_id, DEFAULT_SAMPLE_COUNT)
                .await;
        }
    }

    // --- Settings mutators ---
    //
    // Shared contract: apply the fields to the settings model, then persist
    // remotely. A failed persist is logged and not rolled back; local state
    // runs ahead of the server until the next fetch.

    /// Apply both threshold pairs plus the islanding margin. Invalidates
    /// any running sampler and drops its samples before persisting.
    pub async fn update_thresholds(&self, data: ThresholdUpdate, meter_id: &str) {
        self.store.update(|d| {
            d.settings.threshold_low = data.threshold[0];
            d.settings.threshold_high = data.threshold[1];
            d.settings.threshold_last_low = data.threshold_last[0];
            d.settings.threshold_last_high = data.threshold_last[1];
            d.settings.islanding_padding = data.islanding_padding;
        });

        self.cancel.issue();
        self.workflow.update(|s| s.random_examples.clear());

        self.persist_settings(meter_id).await;
    }

    pub async fn update_max_flow(&self, value: f64, meter_id: &str) {
        self.store.update(|d| d.settings.max_flow_rate = value);
        self.persist_settings(meter_id).await;
    }

    pub async fn update_conf_threshold(&self, value: f64, meter_id: &str) {
        self.store.update(|d| d.settings.conf_threshold = value);
        self.persist_settings(meter_id).await;
    }

    pub async fn update_use_correction(&self, value: bool, meter_id: &str) {
        self.store.update(|d| d.settings.use_correctional_alg = value);
        self.persist_settings(meter_id).await;
    }

    /// Apply segmentation geometry and the extraction strategy.
    ///
    /// Changing the strategy at all clears the template reference, since a
    /// template recorded for one extractor is meaningless to another. After
    /// persisting, re-evaluation runs automatically unless the new strategy
    /// needs a template that is not attached yet; in that case evaluation is
    /// deferred until a template is saved.
    pub async fn update_segmentation(&self, data: SegmentationUpdate, meter_id: &str) {
        self.cancel.issue();

        let previous = self.store.read(|d| d.settings.roi_extractor);
        let next = data.roi_extractor.unwrap_or(previous);

        self.store.update(|d| {
            d.settings.segments = data.segments;
            d.settings.extended_last_digit = data.extended_last_digit;
            d.settings.shrink_last_3 = data.shrink_last_3;
            d.settings.rotated_180 = data.rotated_180;
            d.settings.roi_extractor = next;
            if next != previous {
                d.settings.template_id = None;
            }
        });
        if next != previous {
            self.workflow.set_template_data(None);
        }

        self.persist_settings(meter_id).await;

        let has_template = self.store.read(|d| d.settings.template_id.is_some());
        if !next.requires_template() || has_template {
            self.reevaluate(meter_id).await;
        }
    }

    // --- Threshold search ---

    /// Run the remote threshold sweep and commit its result to settings.
    ///
    /// Single-flight: a call while a sweep is in flight returns `None`
    /// without issuing a request. Returns the found thresholds, or `None`
    /// on transport failure or domain error; either way the outcome lands
    /// in `threshold_search_result` for the UI.
    pub async fn search_thresholds(
        &self,
        meter_id: &str,
        steps: u32,
    ) -> Option<ThresholdSearchOutcome> {
        if !self.workflow.try_begin_threshold_search() {
            tracing::debug!("threshold search already running for {}", meter_id);
            return None;
        }

        let outcome = match self.api.search_thresholds(meter_id, steps).await {
            Ok(response) => {
                if let Some(error) = response.error {
                    tracing::error!("threshold search error: {}", error);
                    ThresholdSearchOutcome::Failed { error }
                } else if let (Some(threshold), Some(threshold_last)) =
                    (response.threshold, response.threshold_last)
                {
                    self.store.update(|d| {
                        d.settings.threshold_low = threshold[0];
                        d.settings.threshold_high = threshold[1];
                        d.settings.threshold_last_low = threshold_last[0];
                        d.settings.threshold_last_high = threshold_last[1];
                    });
                    self.persist_settings(meter_id).await;
                    tracing::info!(
                        "threshold search completed: threshold={:?}, threshold_last={:?}",
                        threshold,
                        threshold_last
                    );
                    ThresholdSearchOutcome::Found {
                        threshold,
                        threshold_last,
                    }
                } else {
                    tracing::error!("threshold search returned an incomplete result");
                    ThresholdSearchOutcome::Failed {
                        error: "incomplete threshold search result".to_string(),
                    }
                }
            }
            Err(e) => {
                tracing::error!("threshold search failed: {}", e);
                ThresholdSearchOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        self.workflow.finish_threshold_search(Some(outcome.clone()));

        match outcome {
            ThresholdSearchOutcome::Found { .. } => Some(outcome),
            ThresholdSearchOutcome::Failed { .. } => None,
        }
    }

    // --- Benchmark sampler ---

    /// Sequentially re-evaluate up to `max_amount` random historical
    /// evaluations against the current settings.
    ///
    /// The loop is sequential by design: cancellation takes effect between
    /// round trips and sample order stays deterministic. The run captures a
    /// fresh cancel generation at start; any mutator or re-evaluation bumps
    /// the token, which stops the loop before the next request and discards
    /// a response that was already in flight.
    pub async fn request_reevaluated_digits(&self, meter_id: &str, max_amount: usize) {
        if !self.workflow.try_begin_benchmark() {
            tracing::debug!("benchmark already running for {}", meter_id);
            return;
        }
        let generation = self.cancel.issue();

        let available = match self.api.evaluation_count(meter_id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("failed to get evaluation count: {}", e);
                self.workflow.finish_benchmark(false);
                return;
            }
        };

        // Need at least one other evaluation besides the current one
        if available < 2 {
            tracing::info!("too few evaluations for benchmark on {}", meter_id);
            self.workflow.finish_benchmark(true);
            return;
        }

        let amount = max_amount.min((available - 1) as usize);

        for _ in 0..amount {
            if self.cancel.is_stale(generation) {
                tracing::debug!("sample loading cancelled");
                break;
            }

            match self.api.sample_random(meter_id).await {
                Ok(sample) => {
                    if let Some(error) = &sample.error {
                        tracing::error!("sample evaluation error: {}", error);
                        break;
                    }
                    // The token may have advanced while the request was in
                    // flight; a stale result is discarded, not appended.
                    if !self.cancel.is_stale(generation) {
                        self.workflow.push_example(sample.into_sample());
                    }
                }
                Err(e) => {
                    tracing::error!("failed to fetch sample: {}", e);
                    break;
                }
            }
        }

        self.workflow.finish_benchmark(false);
    }

    // --- Re-evaluation ---

    /// Re-run evaluation of the latest picture against current settings.
    ///
    /// The terminal refresh runs on every path (success, domain error,
    /// transport failure): it re-fetches canonical meter state, clears the
    /// loading flag, and drops collected samples. That unconditional
    /// refresh is the convergence point that reconciles whatever a
    /// preempted sampler left behind.
    pub async fn reevaluate(&self, meter_id: &str) {
        // Preempt any running sampler
        self.cancel.issue();
        self.workflow.update(|s| {
            s.loading = true;
            s.reevaluate_error = None;
        });

        match self.api.reevaluate(meter_id).await {
            Ok(response) => {
                if let Some(error) = response.error {
                    tracing::error!("reevaluate error: {}", error);
                    self.workflow.update(|s| s.reevaluate_error = Some(error));
                } else {
                    self.workflow.update(|s| s.no_bounding_box = !response.result);
                }
            }
            Err(e) => {
                tracing::error!("reevaluate failed: {}", e);
                self.workflow
                    .update(|s| s.reevaluate_error = Some(e.to_string()));
            }
        }

        if let Err(e) = self.store.fetch_all(self.api.as_ref(), meter_id).await {
            tracing::warn!("failed to refresh meter state for {}: {}", meter_id, e);
        }
        self.workflow.update(|s| {
            s.loading = false;
            s.random_examples.clear();
        });
    }

    /// Re-evaluate only the current digits and write the result into the
    /// evaluation snapshot.
    pub async fn redo_digit_eval(&self, meter_id: &str) {
        self.workflow.set_loading(true);

        match self.api.sample_current(meter_id).await {
            Ok(sample) => {
                if let Some(error) = &sample.error {
                    tracing::error!("digit re-evaluation error: {}", error);
                } else {
                    self.store.update(|d| {
                        d.evaluation.th_digits = sample.processed_images.clone();
                        d.evaluation.predictions = sample.predictions.clone();
                    });
                }
            }
            Err(e) => {
                tracing::error!("failed to redo digit evaluation: {}", e);
            }
        }

        self.workflow.set_loading(false);
    }

    // --- Templates ---

    /// Persist a reference region for template-based extraction.
    ///
    /// Single-flight: a call while a save is in flight is a silent no-op.
    /// Corner priority: caller points when exactly four are given, else the
    /// cached template's corners normalized by its image dimensions, else a
    /// centered rectangle at 20%-80% of each axis.
    pub async fn save_template(&self, meter_id: &str, points: Option<Vec<Point>>) {
        if !self.workflow.try_begin_template_save() {
            return;
        }
        self.save_template_inner(meter_id, points).await;
        self.workflow.finish_template_save();
    }

    async fn save_template_inner(&self, meter_id: &str, points: Option<Vec<Point>>) {
        let extractor = self.store.read(|d| d.settings.roi_extractor);
        if !extractor.requires_template() {
            tracing::error!("extractor {} does not require a template", extractor);
            return;
        }

        let picture = self.store.read(|d| d.last_picture.clone());
        let Some(picture) = picture.filter(|p| p.has_data()) else {
            tracing::error!("no reference image available for {}", meter_id);
            return;
        };

        let corners = self.resolve_corners(points);
        let payload = TemplatePayload {
            name: meter_id.to_string(),
            extractor,
            reference_image_base64: picture.data.unwrap_or_default(),
            image_width: picture.width,
            image_height: picture.height,
            display_corners: corners.iter().map(|p| [p.x, p.y]).collect(),
        };

        let created = match self.api.create_template(&payload).await {
            Ok(created) => created,
            Err(e) => {
                tracing::error!("failed to save template for {}: {}", meter_id, e);
                return;
            }
        };
        let Some(template_id) = created.id else {
            tracing::error!("template creation failed for {}", meter_id);
            return;
        };

        self.store
            .update(|d| d.settings.template_id = Some(template_id.clone()));
        self.persist_settings(meter_id).await;
        self.fetch_template(Some(&template_id)).await;
        self.reevaluate(meter_id).await;
    }

    /// Fetch and cache a template record; `None` (or a failed fetch)
    /// clears the cache.
    pub async fn fetch_template(&self, template_id: Option<&str>) -> Option<Template> {
        let Some(template_id) = template_id.filter(|id| !id.is_empty()) else {
            self.workflow.set_template_data(None);
            return None;
        };

        match self.api.fetch_template(template_id).await {
            Ok(template) => {
                self.workflow.set_template_data(Some(template.clone()));
                Some(template)
            }
            Err(e) => {
                tracing::error!("failed to load template {}: {}", template_id, e);
                self.workflow.set_template_data(None);
                None
            }
        }
    }

    // --- Capture ---

    /// Resolve the capture source and ask it for a fresh picture.
    ///
    /// Single-flight on the capturing flag. A successful capture refreshes
    /// the full meter state; failures log and leave state unchanged.
    pub async fn trigger_capture(&self, meter_id: &str) {
        if !self.workflow.try_begin_capture() {
            return;
        }
        self.trigger_capture_inner(meter_id).await;
        self.workflow.finish_capture();
    }

    async fn trigger_capture_inner(&self, meter_id: &str) {
        let source = match self.store.resolve_source(self.api.as_ref(), meter_id).await {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("failed to resolve capture source for {}: {}", meter_id, e);
                return;
            }
        };
        let Some(source) = source else {
            tracing::error!("no source available for capture on {}", meter_id);
            return;
        };

        if let Err(e) = self.api.trigger_capture(source.id).await {
            tracing::error!("capture failed for {}: {}", meter_id, e);
            return;
        }

        if let Err(e) = self.store.fetch_all(self.api.as_ref(), meter_id).await {
            tracing::warn!("failed to refresh meter state after capture: {}", e);
        }
    }

    // --- Internals ---

    async fn persist_settings(&self, meter_id: &str) {
        if let Err(e) = self.store.push_settings(self.api.as_ref(), meter_id).await {
            tracing::warn!("failed to persist settings for {}: {}", meter_id, e);
        }
    }

    fn resolve_corners(&self, points: Option<Vec<Point>>) -> [Point; 4] {
        if let Some(points) = points {
            if points.len() == 4 {
                return [points[0], points[1], points[2], points[3]];
            }
        }

        let cached = self
            .workflow
            .read(|s| s.template_data.as_ref().and_then(Template::normalized_corners));
        if let Some(corners) = cached {
            return corners;
        }

        // Default centered rectangle covering 20%-80% of each axis
        [
            Point::new(0.2, 0.2),
            Point::new(0.8, 0.2),
            Point::new(0.8, 0.8),
            Point::new(0.2, 0.8),
        ]
    }
}
