//! `aistack` – local AI stack control daemon.
//!
//! 1. Initialises tracing (`RUST_LOG`, `AISTACK_LOG_FORMAT`,
//!    `OTEL_EXPORTER_OTLP_ENDPOINT`).
//! 2. Loads `~/.aistack/config.toml`, writing the defaults on first run.
//! 3. Starts the control layer: policies, state store, module registry,
//!    hardware detection and capability evaluation.
//! 4. Waits for **Ctrl-C**, then stops every supervised module and records
//!    their final state.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use aistack_kernel::NativeDetector;
use aistack_runtime::telemetry::init_tracing;
use aistack_runtime::{ControlError, ControlLayer};
use tokio::sync::Notify;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let _guard = init_tracing("aistack");

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            info!(path = %config::config_path().display(), "config loaded");
            cfg
        }
        Ok(None) => first_run_config(),
        Err(e) => {
            error!(error = %e, "config error");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "aistack stopped with an error");
            ExitCode::FAILURE
        }
    }
}

/// Persist the default configuration, then apply environment overrides.
fn first_run_config() -> config::Config {
    let mut cfg = config::Config::default();
    match config::save(&cfg) {
        Ok(()) => info!(path = %config::config_path().display(), "default config written"),
        Err(e) => warn!(error = %e, "could not write default config"),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

async fn run(cfg: config::Config) -> Result<(), ControlError> {
    let layer = ControlLayer::start(
        cfg.control_config(),
        cfg.supervisor_config(),
        Box::new(NativeDetector::new()),
    )?;
    print_summary(&layer);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(Notify::new());
    let notify = Arc::clone(&shutdown);
    match ctrlc::set_handler(move || notify.notify_one()) {
        Ok(()) => shutdown.notified().await,
        Err(e) => {
            warn!(error = %e, "failed to install Ctrl-C handler; using tokio signal");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
        }
    }

    info!("shutdown requested");
    layer.shutdown().await
}

fn print_summary(layer: &ControlLayer) {
    let profile = layer.profile();
    println!(
        "aistack ready: {} ({} threads, {} GPU(s)), {} module(s) in registry",
        profile.cpu_arch,
        profile.cpu_threads,
        profile.gpu_count,
        layer.registry().len()
    );
    match serde_json::to_string_pretty(layer.capabilities()) {
        Ok(caps) => println!("{caps}"),
        Err(e) => warn!(error = %e, "failed to render capabilities"),
    }
    println!("Press Ctrl-C to stop.");
}
