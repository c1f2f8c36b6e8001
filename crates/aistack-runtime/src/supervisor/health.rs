//! Periodic health probing.
//!
//! Health is informational: an unhealthy module keeps running and its
//! process state is left alone.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ContainerRuntime, Handle, HealthCheck, HealthState, ProcessState, ProcessTable};

/// Upper bound for a runtime `inspect` call.
const INSPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// What a single probe looks at, captured without holding the table lock.
enum ProbeTarget {
    Native(ProcessState),
    Container {
        runtime: Arc<dyn ContainerRuntime>,
        id: String,
    },
}

/// Probe run `run_id` of `name` every `check.interval()` until `cancel`
/// fires or the entry is replaced by another run.
pub(super) fn spawn_monitor(
    table: ProcessTable,
    name: String,
    run_id: u64,
    check: HealthCheck,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let period = check.interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let target = {
                let processes = table.lock();
                match processes.get(&name) {
                    Some(p) if p.run_id == run_id => match &p.handle {
                        Handle::Native { .. } => ProbeTarget::Native(p.status.state),
                        Handle::Container { runtime, id } => ProbeTarget::Container {
                            runtime: Arc::clone(runtime),
                            id: id.clone(),
                        },
                    },
                    _ => return,
                }
            };

            let health = probe(&target, &check).await;
            if cancel.is_cancelled() {
                return;
            }
            if let Some(p) = table.lock().get_mut(&name)
                && p.run_id == run_id
                && p.status.health != health
            {
                debug!(module = %name, %health, "health changed");
                p.status.health = health;
            }
        }
    });
}

async fn probe(target: &ProbeTarget, check: &HealthCheck) -> HealthState {
    match target {
        ProbeTarget::Native(state) if check.command.is_empty() => health_from_state(*state),
        ProbeTarget::Native(_) => {
            if run_probe(&check.command, check.timeout()).await {
                HealthState::Healthy
            } else {
                HealthState::Unhealthy
            }
        }
        ProbeTarget::Container { runtime, id } if check.command.is_empty() => {
            match tokio::time::timeout(INSPECT_TIMEOUT, runtime.inspect_status(id)).await {
                Ok(Ok(status)) => health_from_container_status(&status),
                Ok(Err(e)) => {
                    debug!(container = %id, error = %e, "inspect failed");
                    HealthState::Unknown
                }
                Err(_) => HealthState::Unknown,
            }
        }
        ProbeTarget::Container { runtime, id } => {
            match tokio::time::timeout(check.timeout(), runtime.exec(id, &check.command)).await {
                Ok(Ok(true)) => HealthState::Healthy,
                _ => HealthState::Unhealthy,
            }
        }
    }
}

fn health_from_state(state: ProcessState) -> HealthState {
    match state {
        ProcessState::Running => HealthState::Healthy,
        ProcessState::Stopped | ProcessState::Failed => HealthState::Unhealthy,
        ProcessState::Starting => HealthState::Unknown,
    }
}

fn health_from_container_status(status: &str) -> HealthState {
    match status {
        "healthy" | "running" => HealthState::Healthy,
        "unhealthy" | "exited" | "dead" => HealthState::Unhealthy,
        _ => HealthState::Unknown,
    }
}

/// Run a host-side probe; `false` on non-zero exit, spawn failure or timeout.
async fn run_probe(command: &[String], timeout: Duration) -> bool {
    let Some((program, args)) = command.split_first() else {
        return false;
    };
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();
    matches!(
        tokio::time::timeout(timeout, child).await,
        Ok(Ok(status)) if status.success()
    )
}
