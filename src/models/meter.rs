use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Strategy used to locate the digit-display region in a captured image.
///
/// `Orb` and `StaticRect` are template-kind strategies: they require a saved
/// reference image plus a quadrilateral corner region before evaluation can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoiExtractor {
    #[default]
    Yolo,
    Orb,
    StaticRect,
}

impl RoiExtractor {
    /// Whether this strategy needs a saved template to produce a region.
    pub fn requires_template(self) -> bool {
        matches!(self, Self::Orb | Self::StaticRect)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yolo => "yolo",
            Self::Orb => "orb",
            Self::StaticRect => "static_rect",
        }
    }
}

impl fmt::Display for RoiExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-meter extraction, segmentation, and threshold configuration.
///
/// This mirrors the server's settings record field for field; it is mutated
/// in place by the coordinator and persisted via
/// `PUT /api/watermeters/{name}/settings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub threshold_low: f64,
    pub threshold_high: f64,
    pub threshold_last_low: f64,
    pub threshold_last_high: f64,
    pub islanding_padding: f64,
    pub segments: u32,
    pub shrink_last_3: bool,
    pub extended_last_digit: bool,
    pub max_flow_rate: f64,
    pub rotated_180: bool,
    pub conf_threshold: f64,
    #[serde(default)]
    pub roi_extractor: RoiExtractor,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub use_correctional_alg: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            threshold_low: 100.0,
            threshold_high: 255.0,
            threshold_last_low: 100.0,
            threshold_last_high: 255.0,
            islanding_padding: 0.0,
            segments: 7,
            shrink_last_3: false,
            extended_last_digit: false,
            max_flow_rate: 1.0,
            rotated_180: false,
            conf_threshold: 0.5,
            roi_extractor: RoiExtractor::Yolo,
            template_id: None,
            use_correctional_alg: false,
        }
    }
}

/// A point in normalized display coordinates ([0,1] on each axis).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

fn default_dimension() -> f64 {
    1.0
}

/// Geometry stored with a template. `display_corners` here are PIXEL
/// coordinates relative to the template's reference image.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default)]
    pub display_corners: Vec<[f64; 2]>,
}

/// A saved reference region for template-based extraction strategies,
/// as returned by `GET /api/templates/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub reference_image_base64: Option<String>,
    #[serde(default = "default_dimension")]
    pub image_width: f64,
    #[serde(default = "default_dimension")]
    pub image_height: f64,
    #[serde(default)]
    pub config: TemplateConfig,
}

impl Template {
    /// Normalize the stored pixel corners into [0,1] display coordinates.
    ///
    /// Returns `None` unless exactly four corners are present. Zero or
    /// missing image dimensions fall back to 1 so the division stays defined.
    pub fn normalized_corners(&self) -> Option<[Point; 4]> {
        if self.config.display_corners.len() != 4 {
            return None;
        }
        let width = if self.image_width > 0.0 { self.image_width } else { 1.0 };
        let height = if self.image_height > 0.0 { self.image_height } else { 1.0 };
        let mut corners = [Point::new(0.0, 0.0); 4];
        for (slot, corner) in corners.iter_mut().zip(&self.config.display_corners) {
            *slot = Point::new(corner[0] / width, corner[1] / height);
        }
        Some(corners)
    }
}

/// Request body for `POST /api/templates`. Corners are normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplatePayload {
    pub name: String,
    pub extractor: RoiExtractor,
    pub reference_image_base64: String,
    pub image_width: u32,
    pub image_height: u32,
    pub display_corners: Vec<[f64; 2]>,
}

/// The meter's most recent captured frame, base64-encoded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Picture {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Picture {
    pub fn has_data(&self) -> bool {
        self.data.as_deref().is_some_and(|d| !d.is_empty())
    }
}

/// A configured capture source (camera or poller) that can be asked to
/// take a new picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSource {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

/// The most recent evaluation of the meter's current picture.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvaluationSnapshot {
    #[serde(default)]
    pub th_digits: Vec<String>,
    #[serde(default)]
    pub predictions: Value,
    #[serde(default)]
    pub total_confidence: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Canonical per-meter state as fetched from the server in one refresh:
/// settings, the latest picture, and the latest evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeterSnapshot {
    pub settings: DeviceSettings,
    pub picture: Option<Picture>,
    pub evaluation: Option<EvaluationSnapshot>,
}
