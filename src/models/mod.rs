//! Data models for the metercal client.
//!
//! This module contains the core data structures used throughout the crate:
//! - [`WorkflowState`]: The setup wizard's state container (busy flags, collected
//!   samples, last-operation results)
//! - [`DeviceSettings`]: Per-meter extraction, segmentation, and threshold
//!   configuration, persisted server-side
//! - [`Template`]: A saved reference region for template-based extraction
//! - [`EvaluationSample`]: One re-evaluated historical sample from a benchmark run
//!
//! # Architecture Note
//!
//! The models are designed to be:
//! - **Serializable**: Wire-facing structs derive `Serialize`/`Deserialize` and
//!   mirror the server's JSON field names exactly
//! - **Cloneable**: `WorkflowState` is wrapped in `Arc<RwLock<>>` by
//!   [`WorkflowManager`](crate::state::WorkflowManager) for thread-safe access
//! - **Immutable**: State updates go through the manager's `update()` method to
//!   ensure consistent change events

pub mod meter;
pub mod workflow;

pub use meter::{
    CaptureSource, DeviceSettings, EvaluationSnapshot, MeterSnapshot, Picture, Point,
    RoiExtractor, Template, TemplateConfig, TemplatePayload,
};
pub use workflow::{
    EvaluationSample, SegmentationUpdate, ThresholdSearchOutcome, ThresholdUpdate,
    WorkflowState, FIRST_STEP, LAST_STEP,
};
