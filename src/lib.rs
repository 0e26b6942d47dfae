// metercal - Calibration workflow client for camera-based water meter reading
//
// This is the library crate containing the workflow state machine, the meter
// state store, the remote API client, and the coordinator that drives the
// setup wizard. The binary crate (main.rs) provides a CLI entry point.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod logging;
pub mod models;
pub mod state;
pub mod store;

// Re-export commonly used types for convenience
pub use api::{ApiError, HttpMeterApi, MeterApi};
pub use config::{ClientConfig, ConfigManager};
pub use coordinator::SetupCoordinator;
pub use models::{DeviceSettings, RoiExtractor, WorkflowState};
pub use state::{CancelToken, StateChange, WorkflowManager};
pub use store::MeterStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
