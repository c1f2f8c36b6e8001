//! [`Supervisor`] – runs modules as native processes or containers.
//!
//! Each started module gets a timestamped log file under
//! `<base_dir>/logs/<name>/`, an entry in a shared process table, and a set
//! of background tasks:
//!
//! - an exit watcher (native `wait`, or `docker wait` for containers) that
//!   records the final `stopped` / `failed` state;
//! - a log follower (containers only) copying `docker logs -f` into the log
//!   file;
//! - a periodic health monitor.
//!
//! Every task is tied to a [`CancellationToken`] stored in the table entry
//! and to the entry's run id, so a late update from an earlier run of the
//! same name never overwrites a newer one.
//!
//! # Example
//!
//! ```rust,no_run
//! use aistack_runtime::supervisor::{ModuleSpec, Supervisor, SupervisorConfig};
//!
//! # async fn demo() -> Result<(), aistack_runtime::supervisor::RuntimeError> {
//! let supervisor = Supervisor::new(SupervisorConfig::default());
//! let status = supervisor
//!     .start(ModuleSpec::native("llama-server", ["llama-server", "--port", "8080"]))
//!     .await?;
//! println!("{} running as pid {:?}", status.name, status.pid);
//! supervisor.stop("llama-server").await?;
//! # Ok(())
//! # }
//! ```

pub mod container;
mod health;
mod native;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use aistack_types::ExecutionMode;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use container::{ContainerRuntime, Docker, Podman, RunRequest, resolve_container_runtime};

pub const DEFAULT_BASE_DIR: &str = "/var/lib/aistack/runtime";
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("module name is required")]
    MissingName,
    #[error("invalid module name {0:?}")]
    InvalidName(String),
    #[error("{0} runtime disabled")]
    ModeDisabled(ExecutionMode),
    #[error("module {0:?} already running")]
    AlreadyRunning(String),
    #[error("module {0:?} not found")]
    NotFound(String),
    #[error("command is required")]
    MissingCommand,
    #[error("container image is required")]
    MissingImage,
    #[error("container runtime {0:?} not found")]
    ContainerRuntimeNotFound(String),
    #[error("no container runtime found")]
    NoContainerRuntime,
    #[error("create log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{action} container: {details}")]
    Container {
        action: &'static str,
        details: String,
    },
    #[error("container runtime did not return container id")]
    EmptyContainerId,
    #[error("timeout stopping native process {name} after {timeout:?}")]
    StopTimeout { name: String, timeout: Duration },
}

// ─────────────────────────────────────────────────────────────────────────────
// Public types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Starting,
    Running,
    Stopped,
    Failed,
}

impl ProcessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopped => "stopped",
            ProcessState::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Failed)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
        })
    }
}

/// Periodic health probe.  An empty `command` falls back to the process
/// state (native) or the runtime's own health report (container).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCheck {
    pub command: Vec<String>,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl HealthCheck {
    pub fn interval(&self) -> Duration {
        self.interval
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_HEALTH_INTERVAL)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_HEALTH_TIMEOUT)
    }
}

/// What to run and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSpec {
    pub name: String,
    /// Defaults to [`SupervisorConfig::default_mode`].
    pub mode: Option<ExecutionMode>,
    /// Native: program and leading arguments.  Container: command override.
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub work_dir: Option<PathBuf>,
    pub image: Option<String>,
    /// Defaults to `<name>-<unix seconds>`.
    pub container_name: Option<String>,
    /// Runtime binary name or path; defaults to the first of docker/podman found.
    pub container_runtime: Option<String>,
    pub health_check: HealthCheck,
}

impl ModuleSpec {
    pub fn native<I, S>(name: impl Into<String>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            mode: Some(ExecutionMode::Native),
            command: command.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn container(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: Some(ExecutionMode::Container),
            image: Some(image.into()),
            ..Default::default()
        }
    }
}

/// Observable state of one supervised module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub name: String,
    pub mode: ExecutionMode,
    pub pid: Option<u32>,
    pub container_id: Option<String>,
    pub state: ProcessState,
    pub health: HealthState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log_path: PathBuf,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Root for `logs/<name>/<timestamp>.log`.
    pub base_dir: PathBuf,
    pub default_mode: ExecutionMode,
    pub docker_enabled: bool,
    pub native_enabled: bool,
    /// Grace period for native SIGTERM and `docker stop -t`.
    pub stop_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            default_mode: ExecutionMode::Container,
            docker_enabled: true,
            native_enabled: true,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl SupervisorConfig {
    pub fn mode_enabled(&self, mode: ExecutionMode) -> bool {
        match mode {
            ExecutionMode::Container => self.docker_enabled,
            ExecutionMode::Native => self.native_enabled,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Process table
// ─────────────────────────────────────────────────────────────────────────────

type ProcessTable = Arc<Mutex<HashMap<String, Process>>>;

type BackgroundTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Live record for the latest run of a module name.
struct Process {
    run_id: u64,
    status: Status,
    handle: Handle,
    stop_requested: bool,
    cancel_run: CancellationToken,
    cancel_logs: CancellationToken,
    cancel_health: CancellationToken,
    /// Flips to `true` once the exit watcher has recorded the final state.
    exited: watch::Receiver<bool>,
}

#[derive(Clone)]
enum Handle {
    Native {
        kill: CancellationToken,
    },
    Container {
        runtime: Arc<dyn ContainerRuntime>,
        id: String,
    },
}

/// What background tasks need to report back into the table.
#[derive(Clone)]
struct TaskContext {
    table: ProcessTable,
    name: String,
    run_id: u64,
    cancel_run: CancellationToken,
    cancel_logs: CancellationToken,
}

/// Result of a successful native or container launch.  `background` is
/// spawned only after the entry is in the table.
struct Launched {
    pid: Option<u32>,
    container_id: Option<String>,
    handle: Handle,
    exited: watch::Receiver<bool>,
    last_error: Option<String>,
    background: Vec<BackgroundTask>,
}

/// Record the end of run `run_id`.  No-op when the entry belongs to another
/// run or is already finished.  Exits after a requested stop are `stopped`.
fn finish(table: &ProcessTable, name: &str, run_id: u64, error: Option<String>) {
    let mut processes = table.lock();
    let Some(process) = processes.get_mut(name) else {
        return;
    };
    if process.run_id != run_id || process.status.state.is_finished() {
        return;
    }

    process.status.finished_at = Some(Utc::now());
    process.status.health = HealthState::Unhealthy;
    match error {
        Some(error) if !process.stop_requested => {
            warn!(module = name, %error, "module failed");
            process.status.state = ProcessState::Failed;
            process.status.last_error = Some(error);
        }
        _ => {
            info!(module = name, "module stopped");
            process.status.state = ProcessState::Stopped;
        }
    }
    process.cancel_logs.cancel();
    process.cancel_health.cancel();
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

pub struct Supervisor {
    config: SupervisorConfig,
    processes: ProcessTable,
    /// Names with a launch in flight.  Locked after `processes`.
    starting: Mutex<HashSet<String>>,
    next_run_id: AtomicU64,
}

/// Claim on a module name for the duration of one launch.
struct StartGuard<'a> {
    starting: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.starting.lock().remove(&self.name);
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            processes: Arc::new(Mutex::new(HashMap::new())),
            starting: Mutex::new(HashSet::new()),
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Launch `spec` and return its status, already `running`.
    ///
    /// # Errors
    ///
    /// Invalid names, disabled modes, a module of the same name that is still
    /// running or being started, and launch failures are reported here.
    /// Failures after launch only show up in [`Supervisor::status`].
    pub async fn start(&self, spec: ModuleSpec) -> Result<Status, RuntimeError> {
        validate_name(&spec.name)?;
        let mode = spec.mode.unwrap_or(self.config.default_mode);
        if !self.config.mode_enabled(mode) {
            return Err(RuntimeError::ModeDisabled(mode));
        }
        let claim = self.claim(&spec.name)?;

        let (log_file, log_path) = self.create_log_file(&spec.name)?;
        let started_at = Utc::now();
        let run_id = self.next_run_id.fetch_add(1, Ordering::Relaxed);
        let tasks = TaskContext {
            table: Arc::clone(&self.processes),
            name: spec.name.clone(),
            run_id,
            cancel_run: CancellationToken::new(),
            cancel_logs: CancellationToken::new(),
        };

        let launched = match mode {
            ExecutionMode::Native => native::launch(&spec, log_file, &log_path, &tasks)?,
            ExecutionMode::Container => {
                container::launch(&spec, self.config.docker_enabled, log_file, &tasks).await?
            }
        };

        let status = Status {
            name: spec.name.clone(),
            mode,
            pid: launched.pid,
            container_id: launched.container_id.clone(),
            state: ProcessState::Running,
            health: HealthState::Unknown,
            started_at,
            finished_at: None,
            log_path,
            last_error: launched.last_error.clone(),
        };
        let cancel_health = CancellationToken::new();
        let process = Process {
            run_id,
            status: status.clone(),
            handle: launched.handle,
            stop_requested: false,
            cancel_run: tasks.cancel_run.clone(),
            cancel_logs: tasks.cancel_logs.clone(),
            cancel_health: cancel_health.clone(),
            exited: launched.exited,
        };

        if let Some(previous) = self.processes.lock().insert(spec.name.clone(), process) {
            previous.cancel_logs.cancel();
            previous.cancel_health.cancel();
        }
        drop(claim);
        for task in launched.background {
            tokio::spawn(task);
        }
        health::spawn_monitor(
            Arc::clone(&self.processes),
            spec.name.clone(),
            run_id,
            spec.health_check,
            cancel_health,
        );

        info!(
            module = %status.name,
            mode = %mode,
            pid = ?status.pid,
            container = ?status.container_id,
            log = %status.log_path.display(),
            "module started"
        );
        Ok(status)
    }

    /// Stop `name`.  Native processes get SIGTERM and are killed after
    /// [`SupervisorConfig::stop_timeout`]; containers get a graceful
    /// `stop`.  The health monitor is cancelled in every case.
    pub async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        let (handle, run_id, mut exited, cancel_run, cancel_health) = {
            let mut processes = self.processes.lock();
            let process = processes
                .get_mut(name)
                .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
            process.stop_requested = true;
            (
                process.handle.clone(),
                process.run_id,
                process.exited.clone(),
                process.cancel_run.clone(),
                process.cancel_health.clone(),
            )
        };

        let result = match handle {
            Handle::Native { kill } => {
                native::stop(name, &cancel_run, &kill, &mut exited, self.config.stop_timeout).await
            }
            Handle::Container { runtime, id } => {
                let stopped = runtime.stop(&id, self.config.stop_timeout).await;
                match &stopped {
                    Ok(()) => finish(&self.processes, name, run_id, None),
                    Err(_) => self.clear_stop_request(name, run_id),
                }
                stopped
            }
        };

        cancel_health.cancel();
        result
    }

    /// Stop every module that is still running, returning the failures.
    pub async fn stop_all(&self) -> Vec<(String, RuntimeError)> {
        let running: Vec<String> = self
            .processes
            .lock()
            .values()
            .filter(|p| !p.status.state.is_finished())
            .map(|p| p.status.name.clone())
            .collect();

        let mut failures = Vec::new();
        for name in running {
            if let Err(e) = self.stop(&name).await {
                warn!(module = %name, error = %e, "stop failed during shutdown");
                failures.push((name, e));
            }
        }
        failures
    }

    pub fn status(&self, name: &str) -> Option<Status> {
        self.processes.lock().get(name).map(|p| p.status.clone())
    }

    /// Latest status of every module ever started, sorted by name.
    pub fn list(&self) -> Vec<Status> {
        let mut statuses: Vec<Status> = self
            .processes
            .lock()
            .values()
            .map(|p| p.status.clone())
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Reserve `name` unless it is running or another start holds it.
    fn claim(&self, name: &str) -> Result<StartGuard<'_>, RuntimeError> {
        let processes = self.processes.lock();
        let mut starting = self.starting.lock();
        let busy = processes
            .get(name)
            .is_some_and(|p| !p.status.state.is_finished());
        if busy || !starting.insert(name.to_string()) {
            return Err(RuntimeError::AlreadyRunning(name.to_string()));
        }
        Ok(StartGuard {
            starting: &self.starting,
            name: name.to_string(),
        })
    }

    fn clear_stop_request(&self, name: &str, run_id: u64) {
        if let Some(process) = self.processes.lock().get_mut(name)
            && process.run_id == run_id
        {
            process.stop_requested = false;
        }
    }

    fn create_log_file(&self, name: &str) -> Result<(File, PathBuf), RuntimeError> {
        let dir = self.config.base_dir.join("logs").join(name);
        fs::create_dir_all(&dir).map_err(|source| RuntimeError::LogFile {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("{}.log", Utc::now().format("%Y%m%d-%H%M%S")));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RuntimeError::LogFile {
                path: path.clone(),
                source,
            })?;
        Ok((file, path))
    }
}

fn validate_name(name: &str) -> Result<(), RuntimeError> {
    if name.trim().is_empty() {
        return Err(RuntimeError::MissingName);
    }
    // The name becomes a log directory component.
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(RuntimeError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor(dir: &tempfile::TempDir) -> Supervisor {
        Supervisor::new(SupervisorConfig {
            base_dir: dir.path().to_path_buf(),
            default_mode: ExecutionMode::Native,
            ..Default::default()
        })
    }

    pub(super) async fn wait_for_state(
        supervisor: &Supervisor,
        name: &str,
        want: ProcessState,
    ) -> Status {
        for _ in 0..200 {
            if let Some(status) = supervisor.status(name)
                && status.state == want
            {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("{name} never reached {want}: {:?}", supervisor.status(name));
    }

    #[tokio::test]
    async fn native_module_runs_and_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);

        let status = sup.start(ModuleSpec::native("sleeper", ["sleep", "5"])).await.unwrap();
        assert_eq!(status.state, ProcessState::Running);
        assert!(status.pid.is_some());
        assert!(status.log_path.starts_with(dir.path().join("logs").join("sleeper")));

        sup.stop("sleeper").await.unwrap();
        let status = sup.status("sleeper").unwrap();
        assert_eq!(status.state, ProcessState::Stopped);
        assert_eq!(status.health, HealthState::Unhealthy);
        assert!(status.last_error.is_none());
        assert!(status.finished_at.is_some());
    }

    #[tokio::test]
    async fn clean_exit_is_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        sup.start(ModuleSpec::native("blip", ["sleep", "0.1"])).await.unwrap();

        let status = wait_for_state(&sup, "blip", ProcessState::Stopped).await;
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn non_zero_exit_is_failed_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        sup.start(ModuleSpec::native("crashy", ["sh", "-c", "exit 3"]))
            .await
            .unwrap();

        let status = wait_for_state(&sup, "crashy", ProcessState::Failed).await;
        assert!(status.last_error.unwrap().contains('3'));
    }

    #[tokio::test]
    async fn output_env_and_workdir_reach_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);

        let mut spec = ModuleSpec::native("echo", ["sh", "-c"]);
        spec.args = vec!["echo \"$GREETING\"; pwd; echo oops >&2".into()];
        spec.env.insert("GREETING".into(), "hello-from-env".into());
        spec.work_dir = Some(work.path().to_path_buf());
        sup.start(spec).await.unwrap();

        let status = wait_for_state(&sup, "echo", ProcessState::Stopped).await;
        let log = fs::read_to_string(&status.log_path).unwrap();
        assert!(log.contains("hello-from-env"), "{log}");
        assert!(log.contains("oops"), "{log}");
        let work_name = work.path().file_name().unwrap().to_str().unwrap();
        assert!(log.contains(work_name), "{log}");
    }

    #[tokio::test]
    async fn second_start_while_running_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        sup.start(ModuleSpec::native("dup", ["sleep", "5"])).await.unwrap();

        let err = sup
            .start(ModuleSpec::native("dup", ["sleep", "5"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyRunning(ref n) if n == "dup"));

        sup.stop("dup").await.unwrap();
        let restarted = sup.start(ModuleSpec::native("dup", ["sleep", "5"])).await.unwrap();
        assert_eq!(restarted.state, ProcessState::Running);
        sup.stop("dup").await.unwrap();
    }

    #[tokio::test]
    async fn stubborn_process_is_killed_after_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(SupervisorConfig {
            base_dir: dir.path().to_path_buf(),
            stop_timeout: Duration::from_millis(200),
            ..Default::default()
        });
        sup.start(ModuleSpec::native("stubborn", ["sh", "-c", "trap '' TERM; sleep 5"]))
            .await
            .unwrap();
        // Give the shell time to install its trap.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = sup.stop("stubborn").await.unwrap_err();
        assert!(matches!(err, RuntimeError::StopTimeout { .. }));
        let status = wait_for_state(&sup, "stubborn", ProcessState::Stopped).await;
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn disabled_mode_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(SupervisorConfig {
            base_dir: dir.path().to_path_buf(),
            native_enabled: false,
            ..Default::default()
        });
        let err = sup
            .start(ModuleSpec::native("x", ["true"]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "native runtime disabled");
    }

    #[tokio::test]
    async fn invalid_specs_are_refused() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        assert!(matches!(
            sup.start(ModuleSpec::native(" ", ["true"])).await,
            Err(RuntimeError::MissingName)
        ));
        assert!(matches!(
            sup.start(ModuleSpec::native("../escape", ["true"])).await,
            Err(RuntimeError::InvalidName(_))
        ));
        assert!(matches!(
            sup.start(ModuleSpec::native("empty", Vec::<String>::new())).await,
            Err(RuntimeError::MissingCommand)
        ));
        assert!(matches!(
            sup.start(ModuleSpec::native("ghost", ["/definitely/not/here"])).await,
            Err(RuntimeError::Spawn { .. })
        ));
        assert!(sup.list().is_empty());
    }

    #[tokio::test]
    async fn stop_unknown_module_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        assert!(matches!(
            sup.stop("nobody").await,
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn health_follows_process_state_without_probe() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        let mut spec = ModuleSpec::native("watched", ["sleep", "5"]);
        spec.health_check.interval = Some(Duration::from_millis(50));
        sup.start(spec).await.unwrap();

        let mut health = HealthState::Unknown;
        for _ in 0..40 {
            health = sup.status("watched").unwrap().health;
            if health == HealthState::Healthy {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(health, HealthState::Healthy);
        sup.stop("watched").await.unwrap();
    }

    #[tokio::test]
    async fn failing_probe_marks_unhealthy_but_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        let mut spec = ModuleSpec::native("sick", ["sleep", "5"]);
        spec.health_check = HealthCheck {
            command: vec!["false".into()],
            interval: Some(Duration::from_millis(50)),
            timeout: Some(Duration::from_secs(1)),
        };
        sup.start(spec).await.unwrap();

        let mut status = sup.status("sick").unwrap();
        for _ in 0..40 {
            status = sup.status("sick").unwrap();
            if status.health == HealthState::Unhealthy {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(status.health, HealthState::Unhealthy);
        assert_eq!(status.state, ProcessState::Running);
        sup.stop("sick").await.unwrap();
    }

    #[tokio::test]
    async fn stop_all_stops_everything_and_list_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        sup.start(ModuleSpec::native("b", ["sleep", "5"])).await.unwrap();
        sup.start(ModuleSpec::native("a", ["sleep", "5"])).await.unwrap();

        assert!(sup.stop_all().await.is_empty());
        let list = sup.list();
        let names: Vec<&str> = list.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(list.iter().all(|s| s.state == ProcessState::Stopped));
    }

    #[test]
    fn health_check_defaults() {
        let check = HealthCheck {
            interval: Some(Duration::ZERO),
            ..Default::default()
        };
        assert_eq!(check.interval(), DEFAULT_HEALTH_INTERVAL);
        assert_eq!(check.timeout(), DEFAULT_HEALTH_TIMEOUT);
    }

    #[test]
    fn status_serializes_lowercase_states() {
        let status = Status {
            name: "x".into(),
            mode: ExecutionMode::Native,
            pid: Some(42),
            container_id: None,
            state: ProcessState::Running,
            health: HealthState::Healthy,
            started_at: Utc::now(),
            finished_at: None,
            log_path: PathBuf::from("/tmp/x.log"),
            last_error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["health"], "healthy");
        assert_eq!(json["mode"], "native");
    }
}
