//! [`ModuleManifest`] – the YAML description of one module version.
//!
//! ```yaml
//! name: ollama
//! category: runtime
//! version: "0.3.12"
//! description: Local LLM inference server
//! hardware:
//!   memory: { ram_min: 8GB }
//!   gpu: { vram_min: 6GB }
//! dependencies:
//!   modules: ["cuda@>=12.0"]
//! runtime:
//!   modes: [container, native]
//!   preferred: container
//! integrity:
//!   checksum: "sha256:…"
//! ```

use std::fmt;

use aistack_types::{ExecutionMode, NormalizedHardwareProfile, parse_bytes};
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::{Deserialize, Serialize};

use crate::error::ModuleError;
use crate::version::{Version, parse_module_dependency};

// ────────────────────────────────────────────────────────────────────────────
// Category
// ────────────────────────────────────────────────────────────────────────────

/// Kind of module.  Unrecognised labels are kept as [`Category::Unknown`] so
/// [`validate_manifest`] can report them alongside every other problem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Language,
    Runtime,
    Framework,
    Service,
    Application,
    Tool,
    Model,
    Unknown(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Language => "language",
            Category::Runtime => "runtime",
            Category::Framework => "framework",
            Category::Service => "service",
            Category::Application => "application",
            Category::Tool => "tool",
            Category::Model => "model",
            Category::Unknown(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Category::Unknown(_))
    }
}

impl From<String> for Category {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "language" => Category::Language,
            "runtime" => Category::Runtime,
            "framework" => Category::Framework,
            "service" => Category::Service,
            "application" => Category::Application,
            "tool" => Category::Tool,
            "model" => Category::Model,
            _ => Category::Unknown(raw),
        }
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::Unknown(String::new())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Manifest
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModuleManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    #[schemars(with = "String")]
    pub category: Category,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default)]
    pub hardware: HardwareRequirements,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub interfaces: InterfaceConfig,
    #[serde(default)]
    pub integrity: Integrity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Dependencies {
    /// OS packages expected on the host.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<String>,
    /// Other modules, optionally constrained: `"python@>=3.10"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
    /// Runtime identifiers the module needs (checked against policy).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub modes: Vec<ExecutionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred: Option<ExecutionMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Integrity {
    /// SHA-256 of the manifest file, hex, optionally prefixed `sha256:`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Integrity {
    /// Declared checksum with surrounding whitespace and any `sha256:` prefix
    /// removed.  `None` when absent or blank.
    pub fn normalized_checksum(&self) -> Option<&str> {
        let trimmed = self.checksum.as_deref()?.trim();
        let bare = trimmed
            .strip_prefix("sha256:")
            .or_else(|| trimmed.strip_prefix("SHA256:"))
            .unwrap_or(trimmed);
        (!bare.is_empty()).then_some(bare)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Hardware requirements
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HardwareRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryRequirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuRequirement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CpuRequirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores_min: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MemoryRequirement {
    #[serde(
        default,
        deserialize_with = "aistack_types::deserialize_size_opt",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<String>")]
    pub ram_min: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GpuRequirement {
    #[serde(
        default,
        deserialize_with = "aistack_types::deserialize_size_opt",
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(with = "Option<String>")]
    pub vram_min: Option<String>,
    #[serde(default)]
    pub multi_gpu: bool,
}

impl HardwareRequirements {
    /// List every requirement the profile does not meet.  An empty list means
    /// the module fits this host.  Unparseable sizes are reported as unmet.
    pub fn check(&self, profile: &NormalizedHardwareProfile) -> Vec<String> {
        let mut unmet = Vec::new();

        if let Some(cpu) = &self.cpu
            && let Some(min) = cpu.cores_min
            && profile.cpu_cores < min
        {
            unmet.push(format!(
                "requires {min} CPU cores, host has {}",
                profile.cpu_cores
            ));
        }

        if let Some(memory) = &self.memory
            && let Some(raw) = &memory.ram_min
        {
            match parse_bytes(raw) {
                Ok(min) if profile.memory_total_bytes < min => unmet.push(format!(
                    "requires {raw} RAM, host has {} bytes",
                    profile.memory_total_bytes
                )),
                Ok(_) => {}
                Err(e) => unmet.push(format!("memory.ram_min: {e}")),
            }
        }

        if let Some(gpu) = &self.gpu {
            if let Some(raw) = &gpu.vram_min {
                match parse_bytes(raw) {
                    Ok(min) if profile.max_gpu_vram_bytes < min => unmet.push(format!(
                        "requires {raw} VRAM on one GPU, host has {} bytes",
                        profile.max_gpu_vram_bytes
                    )),
                    Ok(_) => {}
                    Err(e) => unmet.push(format!("gpu.vram_min: {e}")),
                }
            }
            if gpu.multi_gpu && !profile.multi_gpu {
                unmet.push("requires a multi-GPU host".to_string());
            }
        }

        unmet
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validation
// ────────────────────────────────────────────────────────────────────────────

/// Validate a manifest, collecting every problem rather than stopping at the
/// first one.
pub fn validate_manifest(manifest: &ModuleManifest) -> Result<(), ModuleError> {
    let mut problems = Vec::new();

    if manifest.name.trim().is_empty() {
        problems.push("name is required".to_string());
    }
    if !manifest.category.is_known() {
        problems.push(format!("invalid category {:?}", manifest.category.as_str()));
    }
    if manifest.version.is_empty() {
        problems.push("version is required".to_string());
    } else if let Err(e) = Version::parse(&manifest.version) {
        problems.push(format!("version {:?} is invalid: {e}", manifest.version));
    }
    if manifest.description.trim().is_empty() {
        problems.push("description is required".to_string());
    }
    if manifest.runtime.modes.is_empty() {
        problems.push("runtime.modes must include at least one entry".to_string());
    }
    for dep in &manifest.dependencies.modules {
        if let Err(e) = parse_module_dependency(dep) {
            problems.push(format!("invalid module dependency {dep:?}: {e}"));
        }
    }
    if let Some(checksum) = manifest.integrity.normalized_checksum()
        && (checksum.len() != 64 || hex::decode(checksum).is_err())
    {
        problems.push("invalid integrity.checksum value".to_string());
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ModuleError::Invalid {
            name: manifest.name.clone(),
            problems,
        })
    }
}

/// JSON Schema of the manifest format, for editors and external tooling.
pub fn manifest_json_schema() -> RootSchema {
    schemars::schema_for!(ModuleManifest)
}
