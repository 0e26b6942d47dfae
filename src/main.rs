//! metercal - Calibration workflow client for camera-based water meter reading
//!
//! Main entry point for the CLI.
//!
//! # Overview
//!
//! This binary drives the setup workflow against a running meter server. It
//! initializes:
//! - Logging infrastructure (file rotation + console output)
//! - Tokio async runtime
//! - Configuration loading ([`ConfigManager`])
//! - The HTTP API client and the [`SetupCoordinator`]
//!
//! # Usage
//!
//! ```text
//! metercal <meter_id> <command> [args]
//!
//! Commands:
//!   load                 fetch and print the current meter state
//!   search [steps]       run the remote threshold sweep
//!   benchmark [amount]   sample historical evaluations with current settings
//!   reevaluate           re-run evaluation of the latest picture
//!   capture              trigger a fresh capture and refresh state
//! ```
//!
//! # Configuration
//!
//! Expected in the `metercal` directory: `metercal.yaml` with the server
//! URL, API token, and request timeout. Missing file falls back to defaults
//! (localhost:8000, no token).

use anyhow::{Result, bail};
use metercal::coordinator::DEFAULT_SEARCH_STEPS;
use metercal::{APP_NAME, ConfigManager, HttpMeterApi, SetupCoordinator, VERSION};
use std::sync::Arc;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (meter_id, command, extra) = match args.as_slice() {
        [meter_id, command] => (meter_id.clone(), command.clone(), None),
        [meter_id, command, extra] => (meter_id.clone(), command.clone(), Some(extra.clone())),
        _ => {
            eprintln!("Usage: {} <meter_id> <load|search|benchmark|reevaluate|capture> [args]", APP_NAME);
            std::process::exit(2);
        }
    };

    let config_manager = ConfigManager::new("metercal")?;
    let config = config_manager.load_client_config()?;

    let _guard = metercal::logging::setup_logging_with_console(
        &config.log_dir,
        APP_NAME,
        config.debug_mode,
        true,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    tracing::info!("Meter server: {}", config.server_url);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("metercal-worker")
        .build()?;

    let api = Arc::new(HttpMeterApi::new(&config)?);
    let coordinator = SetupCoordinator::new(api);

    runtime.block_on(run_command(&coordinator, &config, &meter_id, &command, extra))?;

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_command(
    coordinator: &SetupCoordinator<HttpMeterApi>,
    config: &metercal::ClientConfig,
    meter_id: &str,
    command: &str,
    extra: Option<String>,
) -> Result<()> {
    match command {
        "load" => {
            coordinator.load_data(meter_id).await;
            let settings = coordinator.store().settings();
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        "search" => {
            let steps = match extra {
                Some(raw) => raw.parse()?,
                None => DEFAULT_SEARCH_STEPS,
            };
            coordinator.load_data(meter_id).await;
            match coordinator.search_thresholds(meter_id, steps).await {
                Some(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                None => bail!("threshold search failed"),
            }
        }
        "benchmark" => {
            let amount = match extra {
                Some(raw) => raw.parse()?,
                None => config.default_sample_count,
            };
            coordinator.load_data(meter_id).await;
            coordinator.request_reevaluated_digits(meter_id, amount).await;
            let state = coordinator.workflow().snapshot();
            if state.too_few_evaluations {
                bail!("too few stored evaluations to benchmark");
            }
            println!("collected {} samples", state.random_examples.len());
        }
        "reevaluate" => {
            coordinator.load_data(meter_id).await;
            coordinator.reevaluate(meter_id).await;
            let state = coordinator.workflow().snapshot();
            if let Some(error) = state.reevaluate_error {
                bail!("re-evaluation failed: {}", error);
            }
            println!("no_bounding_box: {}", state.no_bounding_box);
        }
        "capture" => {
            coordinator.trigger_capture(meter_id).await;
            let has_picture = coordinator
                .store()
                .read(|d| d.last_picture.as_ref().is_some_and(|p| p.has_data()));
            println!("picture available: {}", has_picture);
        }
        other => bail!("unknown command: {}", other),
    }
    Ok(())
}
