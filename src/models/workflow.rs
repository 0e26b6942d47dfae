use super::{RoiExtractor, Template};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wizard step range: the setup flow is a fixed three-stage linear wizard.
pub const FIRST_STEP: u8 = 1;
pub const LAST_STEP: u8 = 3;

/// One re-evaluated historical sample produced by a benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSample {
    /// Base64 processed digit crops.
    pub processed_images: Vec<String>,
    /// Ranked digit predictions as returned by the recognizer.
    pub predictions: Value,
    /// The untouched response payload, for rendering extras the UI may want.
    pub raw: Value,
}

/// Outcome of the last threshold sweep, kept for the UI to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThresholdSearchOutcome {
    Found {
        threshold: [f64; 2],
        threshold_last: [f64; 2],
    },
    Failed {
        error: String,
    },
}

/// Threshold-step input: both threshold pairs plus the islanding margin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdUpdate {
    pub threshold: [f64; 2],
    pub threshold_last: [f64; 2],
    pub islanding_padding: f64,
}

/// Segmentation-step input. `roi_extractor` of `None` keeps the current
/// strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationUpdate {
    pub segments: u32,
    pub extended_last_digit: bool,
    pub shrink_last_3: bool,
    pub rotated_180: bool,
    pub roi_extractor: Option<RoiExtractor>,
}

/// Single source of truth for the setup workflow.
///
/// Owned exclusively by [`crate::state::WorkflowManager`] behind
/// `Arc<RwLock<_>>`; operations never touch it directly.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowState {
    /// Wizard position, monotonic forward-only in {1,2,3}.
    pub current_step: u8,

    // Busy flags, each guarding re-entrancy of its own operation only
    pub loading: bool,
    pub capturing: bool,
    pub running_benchmark: bool,
    pub searching_thresholds: bool,
    pub template_saving: bool,

    /// Samples collected by the current benchmark run, in request order.
    pub random_examples: Vec<EvaluationSample>,

    // Last-operation-result slots
    pub threshold_search_result: Option<ThresholdSearchOutcome>,
    pub reevaluate_error: Option<String>,
    pub template_data: Option<Template>,

    // Outcome flags from the last reevaluate/benchmark run
    pub no_bounding_box: bool,
    pub too_few_evaluations: bool,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            current_step: FIRST_STEP,
            loading: false,
            capturing: false,
            running_benchmark: false,
            searching_thresholds: false,
            template_saving: false,
            random_examples: Vec::new(),
            threshold_search_result: None,
            reevaluate_error: None,
            template_data: None,
            no_bounding_box: false,
            too_few_evaluations: false,
        }
    }
}

impl WorkflowState {
    /// Whether any long-running operation is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.loading
            || self.capturing
            || self.running_benchmark
            || self.searching_thresholds
            || self.template_saving
    }
}
