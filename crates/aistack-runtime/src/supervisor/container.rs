//! Container runtimes.
//!
//! [`ContainerRuntime`] wraps a docker-compatible CLI.  [`Docker`] uses the
//! stock argument layout; [`Podman`] adds `--replace` so a leftover container
//! with the same name does not block a restart.  The implementation is picked
//! once per start by [`resolve_container_runtime`].

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use aistack_types::ExecutionMode;
use async_trait::async_trait;
use chrono::Utc;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BackgroundTask, Handle, Launched, ModuleSpec, RuntimeError, TaskContext, finish};

/// Prints the healthcheck status when the image defines one, else the
/// container status.
const INSPECT_FORMAT: &str =
    "{{if .State.Health}}{{.State.Health.Status}}{{else}}{{.State.Status}}{{end}}";

/// Arguments for a detached, auto-removed container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub work_dir: Option<PathBuf>,
    /// Command override followed by its arguments.
    pub command: Vec<String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync + fmt::Debug {
    /// Path of the CLI binary.
    fn binary(&self) -> &Path;

    /// `run` arguments for `request`.
    fn run_args(&self, request: &RunRequest) -> Vec<String> {
        docker_run_args(request)
    }

    fn command(&self) -> Command {
        let mut command = Command::new(self.binary());
        command.kill_on_drop(true);
        command
    }

    /// Start a detached container and return its id.
    async fn run(&self, request: &RunRequest) -> Result<String, RuntimeError> {
        let output = self.output(&self.run_args(request)).await?;
        if !output.status.success() {
            return Err(RuntimeError::Container {
                action: "start",
                details: format!("{} ({})", output.status, combined_output(&output)),
            });
        }
        last_line(&output.stdout).ok_or(RuntimeError::EmptyContainerId)
    }

    /// Follow the container's logs into `log`.
    fn spawn_logs(&self, id: &str, log: File) -> io::Result<Child> {
        let stderr = log.try_clone()?;
        self.command()
            .args(["logs", "-f", id])
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .spawn()
    }

    /// Block until the container exits and return its exit code.
    async fn wait(&self, id: &str) -> Result<i64, RuntimeError> {
        let output = self.output(&["wait".to_string(), id.to_string()]).await?;
        if !output.status.success() {
            return Err(RuntimeError::Container {
                action: "wait",
                details: combined_output(&output),
            });
        }
        let code = last_line(&output.stdout).unwrap_or_default();
        code.parse().map_err(|_| RuntimeError::Container {
            action: "wait",
            details: format!("unexpected exit code {code:?}"),
        })
    }

    /// Graceful stop with `grace` before the runtime kills it.
    async fn stop(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let args = [
            "stop".to_string(),
            "-t".to_string(),
            grace_secs(grace).to_string(),
            id.to_string(),
        ];
        let output = self.output(&args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RuntimeError::Container {
                action: "stop",
                details: format!("{} ({})", output.status, combined_output(&output)),
            })
        }
    }

    /// Health or run status as reported by the runtime, lowercased.
    async fn inspect_status(&self, id: &str) -> Result<String, RuntimeError> {
        let args = [
            "inspect".to_string(),
            "--format".to_string(),
            INSPECT_FORMAT.to_string(),
            id.to_string(),
        ];
        let output = self.output(&args).await?;
        if !output.status.success() {
            return Err(RuntimeError::Container {
                action: "inspect",
                details: combined_output(&output),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_lowercase())
    }

    /// Run `command` inside the container; `true` on exit status 0.
    async fn exec(&self, id: &str, command: &[String]) -> Result<bool, RuntimeError> {
        let status = self
            .command()
            .arg("exec")
            .arg(id)
            .args(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| self.spawn_error(source))?;
        Ok(status.success())
    }

    async fn output(&self, args: &[String]) -> Result<Output, RuntimeError> {
        self.command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| self.spawn_error(source))
    }

    fn spawn_error(&self, source: io::Error) -> RuntimeError {
        RuntimeError::Spawn {
            program: self.binary().display().to_string(),
            source,
        }
    }
}

fn docker_run_args(request: &RunRequest) -> Vec<String> {
    let mut args: Vec<String> = ["run", "-d", "--rm", "--name", request.name.as_str()]
        .into_iter()
        .map(String::from)
        .collect();
    for (key, value) in &request.env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }
    if let Some(dir) = &request.work_dir {
        args.push("-w".into());
        args.push(dir.display().to_string());
    }
    args.push(request.image.clone());
    args.extend(request.command.iter().cloned());
    args
}

/// Whole seconds for `stop -t`, rounded up so a sub-second grace is not 0.
fn grace_secs(grace: Duration) -> u64 {
    grace.as_secs() + u64::from(grace.subsec_nanos() > 0)
}

fn combined_output(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined.trim().to_string()
}

fn last_line(bytes: &[u8]) -> Option<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(String::from)
}

#[derive(Debug, Clone)]
pub struct Docker {
    binary: PathBuf,
}

impl Docker {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for Docker {
    fn binary(&self) -> &Path {
        &self.binary
    }
}

#[derive(Debug, Clone)]
pub struct Podman {
    binary: PathBuf,
}

impl Podman {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for Podman {
    fn binary(&self) -> &Path {
        &self.binary
    }

    fn run_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args = docker_run_args(request);
        args.insert(1, "--replace".into());
        args
    }
}

/// Pick a container runtime: `preferred` when given (it must exist),
/// otherwise the first of `docker` and `podman` found on `PATH`.
pub fn resolve_container_runtime(
    preferred: Option<&str>,
    enabled: bool,
) -> Result<Arc<dyn ContainerRuntime>, RuntimeError> {
    if !enabled {
        return Err(RuntimeError::ModeDisabled(ExecutionMode::Container));
    }
    if let Some(preferred) = preferred.map(str::trim).filter(|p| !p.is_empty()) {
        let binary = which::which(preferred)
            .map_err(|_| RuntimeError::ContainerRuntimeNotFound(preferred.to_string()))?;
        return Ok(runtime_for(binary));
    }
    ["docker", "podman"]
        .into_iter()
        .find_map(|candidate| which::which(candidate).ok())
        .map(runtime_for)
        .ok_or(RuntimeError::NoContainerRuntime)
}

fn runtime_for(binary: PathBuf) -> Arc<dyn ContainerRuntime> {
    let is_podman = binary
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("podman"));
    if is_podman {
        Arc::new(Podman::new(binary))
    } else {
        Arc::new(Docker::new(binary))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Launch
// ─────────────────────────────────────────────────────────────────────────────

pub(super) async fn launch(
    spec: &ModuleSpec,
    enabled: bool,
    log_file: File,
    ctx: &TaskContext,
) -> Result<Launched, RuntimeError> {
    let runtime = resolve_container_runtime(spec.container_runtime.as_deref(), enabled)?;
    let container_name = spec
        .container_name
        .clone()
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("{}-{}", spec.name, Utc::now().timestamp()));
    let image = spec
        .image
        .as_deref()
        .filter(|i| !i.trim().is_empty())
        .ok_or(RuntimeError::MissingImage)?;

    let request = RunRequest {
        name: container_name,
        image: image.to_string(),
        env: spec.env.clone(),
        work_dir: spec.work_dir.clone(),
        command: spec.command.iter().chain(&spec.args).cloned().collect(),
    };
    let id = runtime.run(&request).await?;
    info!(
        module = %spec.name,
        container = %id,
        runtime = %runtime.binary().display(),
        "container started"
    );

    let mut background: Vec<BackgroundTask> = Vec::new();
    let mut last_error = None;
    match runtime.spawn_logs(&id, log_file) {
        Ok(child) => background.push(Box::pin(follow_logs(child, ctx.cancel_logs.clone()))),
        Err(e) => {
            warn!(module = %spec.name, error = %e, "log stream unavailable");
            last_error = Some(format!("start log stream: {e}"));
        }
    }

    let (exited_tx, exited_rx) = watch::channel(false);
    background.push(Box::pin(watch_exit(
        Arc::clone(&runtime),
        id.clone(),
        ctx.clone(),
        exited_tx,
    )));

    Ok(Launched {
        pid: None,
        container_id: Some(id.clone()),
        handle: Handle::Container { runtime, id },
        exited: exited_rx,
        last_error,
        background,
    })
}

async fn follow_logs(mut child: Child, cancel: CancellationToken) {
    tokio::select! {
        _ = child.wait() => return,
        _ = cancel.cancelled() => {}
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "log stream already gone");
    }
}

async fn watch_exit(
    runtime: Arc<dyn ContainerRuntime>,
    id: String,
    ctx: TaskContext,
    exited: watch::Sender<bool>,
) {
    let error = match runtime.wait(&id).await {
        Ok(0) => None,
        Ok(code) => Some(format!("container exited with code {code}")),
        Err(e) => Some(e.to_string()),
    };
    finish(&ctx.table, &ctx.name, ctx.run_id, error);
    let _ = exited.send(true);
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use super::super::tests::wait_for_state;
    use super::super::{HealthState, ProcessState, Supervisor, SupervisorConfig};
    use super::*;

    /// A docker look-alike driven by marker files in `dir`.
    fn fake_runtime(dir: &Path) -> PathBuf {
        let script = format!(
            r#"#!/bin/sh
dir="{dir}"
cmd="$1"; shift
case "$cmd" in
  run) [ -f "$dir/slow-run" ] && sleep 0.3; echo "$@" > "$dir/run-args"; echo "Pulling layers"; echo "cid-42" ;;
  logs) echo "container says hi"; exec sleep 30 ;;
  wait) while [ ! -f "$dir/stopped" ]; do sleep 0.05; done; cat "$dir/exit-code" 2>/dev/null || echo 0 ;;
  stop) echo "$@" > "$dir/stop-args"; touch "$dir/stopped" ;;
  inspect) echo "Running" ;;
  exec) exit 0 ;;
  *) echo "unexpected $cmd" >&2; exit 1 ;;
esac
"#,
            dir = dir.display()
        );
        let path = dir.join("fake-docker");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn spec(runtime: &Path) -> ModuleSpec {
        let mut spec = ModuleSpec::container("web", "nginx:latest");
        spec.container_name = Some("web-1".into());
        spec.container_runtime = Some(runtime.display().to_string());
        spec
    }

    fn supervisor(dir: &Path) -> Supervisor {
        Supervisor::new(SupervisorConfig {
            base_dir: dir.join("runtime"),
            ..Default::default()
        })
    }

    #[test]
    fn docker_run_arguments() {
        let mut env = BTreeMap::new();
        env.insert("MODE".to_string(), "test".to_string());
        let request = RunRequest {
            name: "web-1".into(),
            image: "nginx:latest".into(),
            env,
            work_dir: Some(PathBuf::from("/srv")),
            command: vec!["serve".into(), "--port".into(), "80".into()],
        };
        assert_eq!(
            Docker::new("docker").run_args(&request).join(" "),
            "run -d --rm --name web-1 -e MODE=test -w /srv nginx:latest serve --port 80"
        );
        assert_eq!(
            Podman::new("podman").run_args(&request)[..3],
            ["run", "--replace", "-d"]
        );
    }

    #[test]
    fn stop_grace_rounds_up_to_whole_seconds() {
        assert_eq!(grace_secs(Duration::ZERO), 0);
        assert_eq!(grace_secs(Duration::from_millis(200)), 1);
        assert_eq!(grace_secs(Duration::from_secs(10)), 10);
        assert_eq!(grace_secs(Duration::from_millis(10_500)), 11);
    }

    #[test]
    fn runtime_choice_follows_binary_name() {
        assert_eq!(
            format!("{:?}", runtime_for(PathBuf::from("/usr/bin/podman"))),
            "Podman { binary: \"/usr/bin/podman\" }"
        );
        assert_eq!(
            format!("{:?}", runtime_for(PathBuf::from("/usr/bin/docker"))),
            "Docker { binary: \"/usr/bin/docker\" }"
        );
    }

    #[test]
    fn resolution_errors() {
        assert!(matches!(
            resolve_container_runtime(None, false),
            Err(RuntimeError::ModeDisabled(ExecutionMode::Container))
        ));
        assert!(matches!(
            resolve_container_runtime(Some("no-such-runtime-aistack"), true),
            Err(RuntimeError::ContainerRuntimeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn container_lifecycle_through_fake_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(dir.path());
        let sup = supervisor(dir.path());

        let mut spec = spec(&runtime);
        spec.env.insert("MODE".into(), "test".into());
        spec.args = vec!["--port".into(), "80".into()];
        let status = sup.start(spec).await.unwrap();
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(status.container_id.as_deref(), Some("cid-42"));

        let run_args = fs::read_to_string(dir.path().join("run-args")).unwrap();
        assert_eq!(
            run_args.trim(),
            "-d --rm --name web-1 -e MODE=test nginx:latest --port 80"
        );

        let mut log = String::new();
        for _ in 0..40 {
            log = fs::read_to_string(&status.log_path).unwrap();
            if log.contains("container says hi") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(log.contains("container says hi"), "{log}");

        sup.stop("web").await.unwrap();
        let status = sup.status("web").unwrap();
        assert_eq!(status.state, ProcessState::Stopped);
        assert!(status.last_error.is_none());
        let stop_args = fs::read_to_string(dir.path().join("stop-args")).unwrap();
        assert_eq!(stop_args.trim(), "-t 10 cid-42");
    }

    #[tokio::test]
    async fn non_zero_container_exit_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(dir.path());
        fs::write(dir.path().join("exit-code"), "3\n").unwrap();
        let sup = supervisor(dir.path());

        sup.start(spec(&runtime)).await.unwrap();
        fs::write(dir.path().join("stopped"), "").unwrap();

        let status = wait_for_state(&sup, "web", ProcessState::Failed).await;
        assert_eq!(
            status.last_error.as_deref(),
            Some("container exited with code 3")
        );
    }

    #[tokio::test]
    async fn container_health_comes_from_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(dir.path());
        let sup = supervisor(dir.path());

        let mut spec = spec(&runtime);
        spec.health_check.interval = Some(Duration::from_millis(50));
        sup.start(spec).await.unwrap();

        let mut health = HealthState::Unknown;
        for _ in 0..40 {
            health = sup.status("web").unwrap().health;
            if health == HealthState::Healthy {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(health, HealthState::Healthy);
        sup.stop("web").await.unwrap();
    }

    #[tokio::test]
    async fn image_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(dir.path());
        let sup = supervisor(dir.path());

        let mut imageless = spec(&runtime);
        imageless.image = None;
        assert!(matches!(
            sup.start(imageless).await,
            Err(RuntimeError::MissingImage)
        ));

        // The failed launch does not keep the name reserved.
        sup.start(spec(&runtime)).await.unwrap();
        sup.stop("web").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_starts_launch_once() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(dir.path());
        fs::write(dir.path().join("slow-run"), "").unwrap();
        let sup = supervisor(dir.path());

        let (first, second) = tokio::join!(sup.start(spec(&runtime)), sup.start(spec(&runtime)));
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(
            |r| matches!(r, Err(RuntimeError::AlreadyRunning(name)) if name == "web")
        ));
        assert_eq!(sup.list().len(), 1);

        sup.stop("web").await.unwrap();
    }
}
