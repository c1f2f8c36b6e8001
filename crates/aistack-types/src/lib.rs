use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of an installable module as tracked by the state store.
///
/// Legal transitions between these states are defined by the module state
/// machine in `aistack-module`; this type only names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Known to the registry but not selected for installation.
    Available,
    /// Selected by the resolver as part of an install plan.
    Resolved,
    /// Installed on the host.
    Installed,
    /// Running under the supervisor.
    Running,
    /// Installed and stopped.
    Stopped,
    /// Failed during install or at runtime.
    Failed,
    /// Retired. Terminal.
    Deprecated,
}

impl LifecycleState {
    /// Every state, in declaration order.
    pub const ALL: [LifecycleState; 7] = [
        LifecycleState::Available,
        LifecycleState::Resolved,
        LifecycleState::Installed,
        LifecycleState::Running,
        LifecycleState::Stopped,
        LifecycleState::Failed,
        LifecycleState::Deprecated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Available => "available",
            LifecycleState::Resolved => "resolved",
            LifecycleState::Installed => "installed",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
            LifecycleState::Deprecated => "deprecated",
        }
    }

    /// Parse the persisted lowercase label.  Returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a module is executed by the runtime supervisor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Inside a container managed by docker or podman.
    Container,
    /// As a plain OS process.
    Native,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Container => "container",
            ExecutionMode::Native => "native",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "container" => Some(ExecutionMode::Container),
            "native" => Some(ExecutionMode::Native),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Hardware profile
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub arch: String,
    pub cores: u32,
    pub threads: u32,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub vendor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub vendor: String,
    /// Total VRAM in bytes.
    pub vram_total: u64,
    #[serde(default)]
    pub vram_free: u64,
    #[serde(default)]
    pub multi_gpu: bool,
    #[serde(default)]
    pub nvlink: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    #[serde(default)]
    pub available: u64,
    #[serde(default)]
    pub free: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub path: String,
    pub total: u64,
    pub free: u64,
    #[serde(default)]
    pub kind: String,
}

/// Raw hardware snapshot as produced by a detector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub cpu: CpuInfo,
    #[serde(default)]
    pub gpus: Vec<GpuInfo>,
    pub memory: MemoryInfo,
    #[serde(default)]
    pub storage: Vec<StorageInfo>,
}

/// Flattened view of a [`HardwareProfile`] consumed by the policy engine and
/// by manifest hardware requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedHardwareProfile {
    pub cpu_arch: String,
    pub cpu_cores: u32,
    pub cpu_threads: u32,
    pub gpu_count: u32,
    pub max_gpu_vram_bytes: u64,
    pub total_gpu_vram_bytes: u64,
    pub has_nvlink: bool,
    pub multi_gpu: bool,
    pub memory_total_bytes: u64,
    pub storage_total_bytes: u64,
    pub storage_free_bytes: u64,
}

impl HardwareProfile {
    /// Fold the raw profile into a [`NormalizedHardwareProfile`].
    ///
    /// More than one GPU always implies `multi_gpu`, whatever the individual
    /// GPUs report.
    pub fn normalize(&self) -> NormalizedHardwareProfile {
        let gpu_count = self.gpus.len() as u32;
        let mut normalized = NormalizedHardwareProfile {
            cpu_arch: self.cpu.arch.clone(),
            cpu_cores: self.cpu.cores,
            cpu_threads: self.cpu.threads,
            gpu_count,
            memory_total_bytes: self.memory.total,
            multi_gpu: gpu_count > 1,
            ..Default::default()
        };

        for gpu in &self.gpus {
            normalized.total_gpu_vram_bytes =
                normalized.total_gpu_vram_bytes.saturating_add(gpu.vram_total);
            normalized.max_gpu_vram_bytes = normalized.max_gpu_vram_bytes.max(gpu.vram_total);
            normalized.has_nvlink |= gpu.nvlink;
            normalized.multi_gpu |= gpu.multi_gpu;
        }

        for disk in &self.storage {
            normalized.storage_total_bytes = normalized.storage_total_bytes.saturating_add(disk.total);
            normalized.storage_free_bytes = normalized.storage_free_bytes.saturating_add(disk.free);
        }

        normalized
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Byte sizes
// ────────────────────────────────────────────────────────────────────────────

/// Failure to parse a human-written byte size such as `"24GB"`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SizeError {
    #[error("empty size")]
    Empty,
    #[error("invalid size: {0}")]
    Invalid(String),
}

const SIZE_SUFFIXES: [(&str, u64); 5] = [
    ("TB", 1024 * 1024 * 1024 * 1024),
    ("GB", 1024 * 1024 * 1024),
    ("MB", 1024 * 1024),
    ("KB", 1024),
    ("B", 1),
];

/// Parse a byte size.  Accepts bare numbers and `KB`/`MB`/`GB`/`TB` (or `B`)
/// suffixes, case-insensitive, with binary (1024-based) multipliers.
/// Fractional values are allowed and truncated.
///
/// ```
/// use aistack_types::parse_bytes;
///
/// assert_eq!(parse_bytes("512MB").unwrap(), 512 * 1024 * 1024);
/// assert_eq!(parse_bytes("1.5kb").unwrap(), 1536);
/// assert_eq!(parse_bytes("42").unwrap(), 42);
/// assert!(parse_bytes("lots").is_err());
/// ```
pub fn parse_bytes(raw: &str) -> Result<u64, SizeError> {
    let trimmed = raw.trim().to_ascii_uppercase();
    if trimmed.is_empty() {
        return Err(SizeError::Empty);
    }

    let (number, multiplier) = SIZE_SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| trimmed.strip_suffix(suffix).map(|n| (n.trim(), *mult)))
        .unwrap_or((trimmed.as_str(), 1));

    if number.is_empty() {
        return Err(SizeError::Invalid(raw.to_string()));
    }
    let value: f64 = number
        .parse()
        .map_err(|_| SizeError::Invalid(raw.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(SizeError::Invalid(raw.to_string()));
    }
    Ok((value * multiplier as f64) as u64)
}

/// Deserialize an optional size field that may be written either as a
/// string (`"24GB"`, `"13B"`) or as a bare YAML/JSON number.
///
/// Use with `#[serde(default, deserialize_with = "aistack_types::deserialize_size_opt")]`.
pub fn deserialize_size_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSize {
        Text(String),
        Unsigned(u64),
        Float(f64),
    }

    Ok(Option::<RawSize>::deserialize(deserializer)?.map(|raw| match raw {
        RawSize::Text(s) => s,
        RawSize::Unsigned(n) => n.to_string(),
        RawSize::Float(f) => f.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn gpu(vram_gib: u64, nvlink: bool) -> GpuInfo {
        GpuInfo {
            name: "test-gpu".into(),
            vram_total: vram_gib * GIB,
            nvlink,
            ..Default::default()
        }
    }

    #[test]
    fn lifecycle_state_serializes_lowercase() {
        let json = serde_json::to_string(&LifecycleState::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let back: LifecycleState = serde_json::from_str("\"deprecated\"").unwrap();
        assert_eq!(back, LifecycleState::Deprecated);
    }

    #[test]
    fn lifecycle_state_parse_rejects_unknown_labels() {
        assert_eq!(LifecycleState::parse("stopped"), Some(LifecycleState::Stopped));
        assert_eq!(LifecycleState::parse("zombie"), None);
        assert_eq!(LifecycleState::parse("Running"), None);
    }

    #[test]
    fn execution_mode_parse_is_case_insensitive() {
        assert_eq!(ExecutionMode::parse(" Native "), Some(ExecutionMode::Native));
        assert_eq!(ExecutionMode::parse("CONTAINER"), Some(ExecutionMode::Container));
        assert_eq!(ExecutionMode::parse("wasm"), None);
    }

    #[test]
    fn normalize_folds_gpus_and_storage() {
        let profile = HardwareProfile {
            cpu: CpuInfo {
                arch: "x86_64".into(),
                cores: 16,
                threads: 32,
                ..Default::default()
            },
            gpus: vec![gpu(24, false), gpu(48, true)],
            memory: MemoryInfo {
                total: 128 * GIB,
                ..Default::default()
            },
            storage: vec![
                StorageInfo {
                    path: "/".into(),
                    total: 500 * GIB,
                    free: 100 * GIB,
                    kind: "ssd".into(),
                },
                StorageInfo {
                    path: "/data".into(),
                    total: 1000 * GIB,
                    free: 900 * GIB,
                    kind: "hdd".into(),
                },
            ],
        };

        let n = profile.normalize();
        assert_eq!(n.gpu_count, 2);
        assert_eq!(n.max_gpu_vram_bytes, 48 * GIB);
        assert_eq!(n.total_gpu_vram_bytes, 72 * GIB);
        assert!(n.has_nvlink);
        assert!(n.multi_gpu);
        assert_eq!(n.memory_total_bytes, 128 * GIB);
        assert_eq!(n.storage_total_bytes, 1500 * GIB);
        assert_eq!(n.storage_free_bytes, 1000 * GIB);
        assert_eq!(n.cpu_threads, 32);
    }

    #[test]
    fn single_gpu_reporting_multi_gpu_flag_is_honoured() {
        let mut g = gpu(16, false);
        g.multi_gpu = true;
        let profile = HardwareProfile {
            gpus: vec![g],
            ..Default::default()
        };
        assert!(profile.normalize().multi_gpu);
    }

    #[test]
    fn cpu_only_profile_has_no_gpu_capabilities() {
        let n = HardwareProfile::default().normalize();
        assert_eq!(n.gpu_count, 0);
        assert_eq!(n.max_gpu_vram_bytes, 0);
        assert!(!n.multi_gpu);
        assert!(!n.has_nvlink);
    }

    #[test]
    fn parse_bytes_suffixes_are_binary() {
        assert_eq!(parse_bytes("24GB").unwrap(), 24 * GIB);
        assert_eq!(parse_bytes("1TB").unwrap(), 1024 * GIB);
        assert_eq!(parse_bytes("2 kb").unwrap(), 2048);
        assert_eq!(parse_bytes("100B").unwrap(), 100);
    }

    #[derive(Deserialize)]
    struct SizedField {
        #[serde(default, deserialize_with = "deserialize_size_opt")]
        size: Option<String>,
    }

    #[test]
    fn size_fields_accept_numbers_and_strings() {
        let s: SizedField = serde_json::from_str(r#"{"size": 1024}"#).unwrap();
        assert_eq!(s.size.as_deref(), Some("1024"));
        let s: SizedField = serde_json::from_str(r#"{"size": "16GB"}"#).unwrap();
        assert_eq!(s.size.as_deref(), Some("16GB"));
        let s: SizedField = serde_json::from_str("{}").unwrap();
        assert!(s.size.is_none());
    }

    #[test]
    fn parse_bytes_rejects_garbage() {
        assert_eq!(parse_bytes("   "), Err(SizeError::Empty));
        assert!(matches!(parse_bytes("GB"), Err(SizeError::Invalid(_))));
        assert!(matches!(parse_bytes("-4GB"), Err(SizeError::Invalid(_))));
        assert!(matches!(parse_bytes("twelve"), Err(SizeError::Invalid(_))));
    }
}
