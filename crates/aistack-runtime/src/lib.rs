//! `aistack-runtime` – Supervision & Orchestration
//!
//! Runs installed modules on the local host and ties the rest of the stack
//! together.
//!
//! # Modules
//!
//! - [`supervisor`] – [`Supervisor`][supervisor::Supervisor]: starts modules
//!   as native processes or containers, streams their output into per-run
//!   log files, watches for exit and probes health in the background.
//!   Container runtimes sit behind the
//!   [`ContainerRuntime`][supervisor::ContainerRuntime] capability, with
//!   [`Docker`][supervisor::Docker] and [`Podman`][supervisor::Podman]
//!   implementations.
//! - [`selector`] – [`select_mode`][selector::select_mode]: picks native or
//!   container execution from the manifest, policy and configuration.
//! - [`control`] – [`ControlLayer`][control::ControlLayer]: start-up
//!   sequencing (policies, state, registry, hardware) and the operations that
//!   keep the state store in step with the supervisor.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with optional OTLP export.

pub mod control;
pub mod selector;
pub mod supervisor;
pub mod telemetry;

pub use control::{ControlConfig, ControlError, ControlLayer};
pub use selector::{SelectionError, SelectionInput, select_mode};
pub use supervisor::{
    HealthCheck, HealthState, ModuleSpec, ProcessState, RuntimeError, Status, Supervisor,
    SupervisorConfig,
};
