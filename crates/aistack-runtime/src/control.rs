//! [`ControlLayer`] – owns the policy engine, registry, state store and
//! supervisor for one host, and keeps the state store in step with what the
//! supervisor actually runs.
//!
//! Start-up order: policies, state store, registry, hardware detection,
//! policy evaluation, state reconciliation.  Any failure aborts start-up.

use std::path::PathBuf;

use aistack_kernel::{CapabilitySet, DetectError, HardwareDetector, PolicyEngine, PolicyError};
use aistack_memory::{StateError, StateManager};
use aistack_module::{
    InstallPlan, ModuleError, Registry, Resolver, can_transition, ensure_transition,
};
use aistack_types::{ExecutionMode, LifecycleState, NormalizedHardwareProfile};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::selector::{SelectionError, SelectionInput, select_mode};
use crate::supervisor::{ModuleSpec, ProcessState, RuntimeError, Status, Supervisor, SupervisorConfig};

pub const DEFAULT_POLICY_FILE: &str = "/etc/aistack/policies.yaml";
pub const DEFAULT_DATA_DIR: &str = "/var/lib/aistack";

#[derive(Error, Debug)]
pub enum ControlError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("module {0} is not installed")]
    NotInstalled(String),
}

/// Where the control layer finds its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlConfig {
    pub policy_file: PathBuf,
    /// Holds `state.json`.
    pub data_dir: PathBuf,
    /// Manifest tree; no directory means an empty registry.
    pub modules_dir: Option<PathBuf>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            policy_file: PathBuf::from(DEFAULT_POLICY_FILE),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            modules_dir: None,
        }
    }
}

pub struct ControlLayer {
    policy: PolicyEngine,
    capabilities: CapabilitySet,
    profile: NormalizedHardwareProfile,
    registry: Registry,
    state: StateManager,
    supervisor: Supervisor,
    detector: Box<dyn HardwareDetector>,
}

impl ControlLayer {
    pub fn start(
        config: ControlConfig,
        supervisor: SupervisorConfig,
        detector: Box<dyn HardwareDetector>,
    ) -> Result<Self, ControlError> {
        info!(policy_file = %config.policy_file.display(), "starting control layer");
        let policy = PolicyEngine::load(&config.policy_file)?;
        let state = StateManager::open(&config.data_dir)?;
        let registry = match &config.modules_dir {
            Some(dir) => Registry::load_from_dir(dir)?,
            None => Registry::new(),
        };

        let raw = detector.detect()?;
        let capabilities = policy.evaluate(Some(&raw))?;
        let profile = raw.normalize();
        info!(
            detector = detector.name(),
            gpus = profile.gpu_count,
            matched = ?capabilities.matched_policies,
            max_model_size = %capabilities.max_model_size,
            "capabilities evaluated"
        );

        for correction in state.reconcile()? {
            warn!(
                module = %correction.module_name,
                previous = %correction.previous,
                corrected = %correction.corrected,
                "state corrected"
            );
        }

        info!(modules = registry.len(), "control layer started");
        Ok(Self {
            policy,
            capabilities,
            profile,
            registry,
            state,
            supervisor: Supervisor::new(supervisor),
            detector,
        })
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn profile(&self) -> &NormalizedHardwareProfile {
        &self.profile
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Re-detect hardware and re-evaluate policies.
    pub fn refresh_capabilities(&mut self) -> Result<&CapabilitySet, ControlError> {
        let raw = self.detector.detect()?;
        self.capabilities = self.policy.evaluate(Some(&raw))?;
        self.profile = raw.normalize();
        debug!(matched = ?self.capabilities.matched_policies, "capabilities refreshed");
        Ok(&self.capabilities)
    }

    /// Resolve `targets` and record every planned module as `resolved`.
    ///
    /// Modules whose stored state cannot move to `resolved` (already
    /// installed, running, deprecated) are left as they are.  Unmet hardware
    /// requirements are logged, not enforced.
    pub fn plan_install<S: AsRef<str>>(&self, targets: &[S]) -> Result<InstallPlan, ControlError> {
        let plan = Resolver::new(&self.registry).resolve_install_plan(targets)?;
        for record in plan.records() {
            let unmet = record.manifest.hardware.check(&self.profile);
            if !unmet.is_empty() {
                warn!(module = record.name(), ?unmet, "hardware requirements not met");
            }
            let current = self.stored_state(record.name()).unwrap_or(LifecycleState::Available);
            if current != LifecycleState::Resolved
                && can_transition(current, LifecycleState::Resolved)
            {
                self.state.update_module(
                    record.name(),
                    &record.version.to_string(),
                    LifecycleState::Resolved,
                )?;
            }
        }
        info!(order = ?plan.order, "install plan recorded");
        Ok(plan)
    }

    /// Mark every module of an executed `plan` as `installed`.
    pub fn record_installed(&self, plan: &InstallPlan) -> Result<(), ControlError> {
        for record in plan.records() {
            let current = self.stored_state(record.name()).unwrap_or(LifecycleState::Available);
            if current == LifecycleState::Installed {
                continue;
            }
            ensure_transition(current, LifecycleState::Installed)?;
            self.state.update_module(
                record.name(),
                &record.version.to_string(),
                LifecycleState::Installed,
            )?;
        }
        Ok(())
    }

    /// Launch an installed module and record it as `running`.
    pub async fn start_module(&self, spec: ModuleSpec) -> Result<Status, ControlError> {
        let stored = self
            .state
            .get_module(&spec.name)
            .ok_or_else(|| ControlError::NotInstalled(spec.name.clone()))?;
        let current = stored.state.known().unwrap_or(LifecycleState::Failed);
        ensure_transition(current, LifecycleState::Running)?;

        let status = self.supervisor.start(spec).await?;
        self.state
            .update_module(&status.name, &stored.version, LifecycleState::Running)?;
        Ok(status)
    }

    /// Stop a supervised module and record the state it ended in.
    pub async fn stop_module(&self, name: &str) -> Result<(), ControlError> {
        let stopped = self.supervisor.stop(name).await;
        if let Some(status) = self.supervisor.status(name) {
            self.sync_status(&status)?;
        }
        stopped.map_err(Into::into)
    }

    /// Copy finished or running supervisor states into the state store.
    /// Returns the number of modules updated.
    pub fn sync_runtime_states(&self) -> Result<usize, ControlError> {
        let mut updated = 0;
        for status in self.supervisor.list() {
            if self.sync_status(&status)? {
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Execution mode for the latest registry version of `name`, limited to
    /// the modes granted by policy when the policy names any.
    pub fn select_mode(
        &self,
        name: &str,
        preference: Option<ExecutionMode>,
    ) -> Result<ExecutionMode, ControlError> {
        let record = self
            .registry
            .latest(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;
        let allowed: Vec<ExecutionMode> = self
            .capabilities
            .runtimes
            .iter()
            .filter_map(|r| ExecutionMode::parse(r))
            .collect();
        let mode = select_mode(SelectionInput {
            manifest: &record.manifest.runtime,
            allowed_modes: Some(&allowed),
            preference,
            config: self.supervisor.config(),
        })?;
        debug!(module = name, %mode, "execution mode selected");
        Ok(mode)
    }

    /// Stop everything and flush final states.
    pub async fn shutdown(&self) -> Result<(), ControlError> {
        info!("stopping control layer");
        for (name, error) in self.supervisor.stop_all().await {
            warn!(module = %name, %error, "module did not stop cleanly");
        }
        self.sync_runtime_states()?;
        Ok(())
    }

    fn stored_state(&self, name: &str) -> Option<LifecycleState> {
        self.state.get_module(name).and_then(|m| m.state.known())
    }

    fn sync_status(&self, status: &Status) -> Result<bool, ControlError> {
        let target = match status.state {
            ProcessState::Running => LifecycleState::Running,
            ProcessState::Stopped => LifecycleState::Stopped,
            ProcessState::Failed => LifecycleState::Failed,
            ProcessState::Starting => return Ok(false),
        };
        let Some(stored) = self.state.get_module(&status.name) else {
            return Ok(false);
        };
        let Some(current) = stored.state.known() else {
            return Ok(false);
        };
        if current == target || !can_transition(current, target) {
            return Ok(false);
        }
        self.state.update_module(&status.name, &stored.version, target)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use aistack_kernel::StaticDetector;
    use aistack_types::{GpuInfo, HardwareProfile, MemoryInfo};

    use super::*;

    const POLICIES: &str = r#"
policies:
  - name: workstation
    conditions: { ram_min: 16GB }
    allow: { max_model_size: 13B, runtimes: [native, llama.cpp], features: [chat] }
  - name: fallback
    allow: { max_model_size: 3B, runtimes: [native] }
"#;

    fn manifest(name: &str, version: &str, deps: &str, modes: &str) -> String {
        format!(
            "name: {name}\ncategory: service\nversion: \"{version}\"\ndescription: test\n\
             runtime:\n  modes: {modes}\ndependencies:\n  modules: {deps}\n"
        )
    }

    fn profile() -> HardwareProfile {
        HardwareProfile {
            memory: MemoryInfo {
                total: 32 * 1024 * 1024 * 1024,
                ..Default::default()
            },
            gpus: vec![GpuInfo::default()],
            ..Default::default()
        }
    }

    fn layer(dir: &Path) -> ControlLayer {
        fs::write(dir.join("policies.yaml"), POLICIES).unwrap();
        let modules = dir.join("modules");
        fs::create_dir_all(&modules).unwrap();
        fs::write(
            modules.join("app.yaml"),
            manifest("app", "1.0.0", "[lib]", "[container, native]"),
        )
        .unwrap();
        fs::write(modules.join("lib.yaml"), manifest("lib", "2.1.0", "[]", "[native]")).unwrap();

        ControlLayer::start(
            ControlConfig {
                policy_file: dir.join("policies.yaml"),
                data_dir: dir.join("data"),
                modules_dir: Some(modules),
            },
            SupervisorConfig {
                base_dir: dir.join("runtime"),
                ..Default::default()
            },
            Box::new(StaticDetector::new(profile())),
        )
        .unwrap()
    }

    fn stored(layer: &ControlLayer, name: &str) -> Option<LifecycleState> {
        layer.stored_state(name)
    }

    #[test]
    fn start_evaluates_policies() {
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path());
        assert_eq!(layer.capabilities().matched_policies, ["fallback", "workstation"]);
        // The tightest budget among matching policies wins.
        assert_eq!(layer.capabilities().max_model_size, "3B");
        assert!(layer.capabilities().allows_feature("chat"));
        assert_eq!(layer.profile().gpu_count, 1);
        assert_eq!(layer.registry().len(), 2);
    }

    #[test]
    fn missing_policy_file_aborts_start() {
        let dir = tempfile::tempdir().unwrap();
        let result = ControlLayer::start(
            ControlConfig {
                policy_file: dir.path().join("absent.yaml"),
                data_dir: dir.path().join("data"),
                modules_dir: None,
            },
            SupervisorConfig::default(),
            Box::new(StaticDetector::new(profile())),
        );
        assert!(matches!(result, Err(ControlError::Policy(_))));
    }

    #[test]
    fn start_reconciles_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(
            data.join("state.json"),
            r#"{"schema_version":1,"updated_at":"2026-01-01T00:00:00Z","modules":{"x":{"name":"x","version":"1.0.0","state":"exploded","updated_at":"2026-01-01T00:00:00Z"}},"history":[]}"#,
        )
        .unwrap();

        let layer = layer(dir.path());
        assert_eq!(stored(&layer, "x"), Some(LifecycleState::Failed));
    }

    #[test]
    fn plan_then_install_updates_state() {
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path());

        let plan = layer.plan_install(&["app"]).unwrap();
        assert_eq!(plan.order, ["lib", "app"]);
        assert_eq!(stored(&layer, "lib"), Some(LifecycleState::Resolved));
        assert_eq!(stored(&layer, "app"), Some(LifecycleState::Resolved));

        layer.record_installed(&plan).unwrap();
        assert_eq!(stored(&layer, "app"), Some(LifecycleState::Installed));
        assert_eq!(layer.state().get_module("lib").unwrap().version, "2.1.0");

        // Planning again leaves installed modules alone.
        layer.plan_install(&["app"]).unwrap();
        assert_eq!(stored(&layer, "app"), Some(LifecycleState::Installed));
    }

    #[test]
    fn installing_deprecated_module_is_illegal() {
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path());
        let plan = layer.plan_install(&["lib"]).unwrap();
        layer
            .state()
            .update_module("lib", "2.1.0", LifecycleState::Deprecated)
            .unwrap();

        let err = layer.record_installed(&plan).unwrap_err();
        assert_eq!(
            err.to_string(),
            "illegal lifecycle transition deprecated -> installed"
        );
    }

    #[test]
    fn policy_runtimes_limit_mode_selection() {
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path());
        // Policy grants only `native`, so the container preference is dropped.
        assert_eq!(
            layer.select_mode("app", Some(ExecutionMode::Container)).unwrap(),
            ExecutionMode::Native
        );
        assert!(matches!(
            layer.select_mode("ghost", None),
            Err(ControlError::Module(ModuleError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn module_lifecycle_follows_supervisor() {
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path());

        let spec = ModuleSpec::native("lib", ["sleep", "5"]);
        assert!(matches!(
            layer.start_module(spec.clone()).await,
            Err(ControlError::NotInstalled(_))
        ));

        let plan = layer.plan_install(&["lib"]).unwrap();
        layer.record_installed(&plan).unwrap();

        let status = layer.start_module(spec).await.unwrap();
        assert_eq!(status.state, ProcessState::Running);
        assert_eq!(stored(&layer, "lib"), Some(LifecycleState::Running));

        layer.stop_module("lib").await.unwrap();
        assert_eq!(stored(&layer, "lib"), Some(LifecycleState::Stopped));
    }

    #[tokio::test]
    async fn crashed_module_is_recorded_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let layer = layer(dir.path());
        let plan = layer.plan_install(&["lib"]).unwrap();
        layer.record_installed(&plan).unwrap();

        layer
            .start_module(ModuleSpec::native("lib", ["sh", "-c", "exit 1"]))
            .await
            .unwrap();
        for _ in 0..200 {
            if layer.supervisor().status("lib").unwrap().state == ProcessState::Failed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }

        assert_eq!(layer.sync_runtime_states().unwrap(), 1);
        assert_eq!(stored(&layer, "lib"), Some(LifecycleState::Failed));
        layer.shutdown().await.unwrap();
    }
}
