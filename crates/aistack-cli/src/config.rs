//! Configuration Vault – reads/writes `~/.aistack/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aistack_runtime::control::{ControlConfig, DEFAULT_DATA_DIR, DEFAULT_POLICY_FILE};
use aistack_runtime::supervisor::{DEFAULT_BASE_DIR, DEFAULT_STOP_TIMEOUT, SupervisorConfig};
use aistack_types::ExecutionMode;
use serde::{Deserialize, Serialize};

/// Persisted daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub control: ControlSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSection {
    #[serde(default = "default_policy_file")]
    pub policy_file: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory of module manifests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSection {
    /// Root for per-module log files.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_mode")]
    pub default_mode: ExecutionMode,
    #[serde(default = "default_true")]
    pub docker_enabled: bool,
    #[serde(default = "default_true")]
    pub native_enabled: bool,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

fn default_policy_file() -> PathBuf {
    PathBuf::from(DEFAULT_POLICY_FILE)
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}
fn default_base_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_DIR)
}
fn default_mode() -> ExecutionMode {
    ExecutionMode::Container
}
fn default_true() -> bool {
    true
}
fn default_stop_timeout_secs() -> u64 {
    DEFAULT_STOP_TIMEOUT.as_secs()
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            policy_file: default_policy_file(),
            data_dir: default_data_dir(),
            modules_dir: None,
        }
    }
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            default_mode: default_mode(),
            docker_enabled: true,
            native_enabled: true,
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl Config {
    pub fn control_config(&self) -> ControlConfig {
        ControlConfig {
            policy_file: self.control.policy_file.clone(),
            data_dir: self.control.data_dir.clone(),
            modules_dir: self.control.modules_dir.clone(),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            base_dir: self.runtime.base_dir.clone(),
            default_mode: self.runtime.default_mode,
            docker_enabled: self.runtime.docker_enabled,
            native_enabled: self.runtime.native_enabled,
            stop_timeout: Duration::from_secs(self.runtime.stop_timeout_secs),
        }
    }
}

/// Return the path to `~/.aistack/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".aistack").join("config.toml")
}

/// Load the config from disk with environment overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Load the config from a specific path.  `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `AISTACK_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `AISTACK_POLICY_FILE` | `control.policy_file` |
/// | `AISTACK_DATA_DIR` | `control.data_dir` |
/// | `AISTACK_MODULES_DIR` | `control.modules_dir` |
/// | `AISTACK_RUNTIME_DIR` | `runtime.base_dir` |
/// | `AISTACK_DEFAULT_MODE` | `runtime.default_mode` |
/// | `AISTACK_DOCKER_ENABLED` | `runtime.docker_enabled` |
/// | `AISTACK_NATIVE_ENABLED` | `runtime.native_enabled` |
///
/// Unparseable mode and flag values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("AISTACK_POLICY_FILE") {
        cfg.control.policy_file = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("AISTACK_DATA_DIR") {
        cfg.control.data_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("AISTACK_MODULES_DIR") {
        cfg.control.modules_dir = Some(PathBuf::from(v)).filter(|p| !p.as_os_str().is_empty());
    }
    if let Ok(v) = std::env::var("AISTACK_RUNTIME_DIR") {
        cfg.runtime.base_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("AISTACK_DEFAULT_MODE")
        && let Some(mode) = ExecutionMode::parse(&v)
    {
        cfg.runtime.default_mode = mode;
    }
    if let Ok(v) = std::env::var("AISTACK_DOCKER_ENABLED")
        && let Some(flag) = parse_flag(&v)
    {
        cfg.runtime.docker_enabled = flag;
    }
    if let Ok(v) = std::env::var("AISTACK_NATIVE_ENABLED")
        && let Some(flag) = parse_flag(&v)
    {
        cfg.runtime.native_enabled = flag;
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to disk, creating `~/.aistack/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
