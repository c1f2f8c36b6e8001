//! [`PolicyEngine`] – maps a hardware profile to a [`CapabilitySet`].
//!
//! A policy *matches* a profile when every condition it declares holds.
//! Omitted conditions always hold.  All matching policies are then folded:
//!
//! - the smallest `max_model_size` wins (`"unlimited"` loses to any finite
//!   budget);
//! - allowed runtimes and features are unioned across matches;
//! - every denied identifier (from any match) is removed from both allow
//!   sets.
//!
//! Output lists are sorted so that evaluation is deterministic.
//!
//! # Policy file
//!
//! ```yaml
//! policies:
//!   - name: large-gpu
//!     conditions:
//!       gpu_vram_min: 24GB
//!       gpu_count_min: 1
//!     allow:
//!       max_model_size: 70B
//!       runtimes: [vllm, llama.cpp]
//!       features: [fine-tuning]
//!     deny: [cpu-offload]
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use aistack_types::{HardwareProfile, NormalizedHardwareProfile, parse_bytes};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Label reported when no matching policy declares a model-size budget.
pub const UNLIMITED: &str = "unlimited";

// ────────────────────────────────────────────────────────────────────────────
// Error type
// ────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("read policy file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse policy file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("hardware profile is missing")]
    MissingProfile,
    #[error("no matching policies: no policies loaded")]
    NoPolicies,
    #[error("no matching policies for hardware profile")]
    NoMatch,
}

// ────────────────────────────────────────────────────────────────────────────
// Policy definitions
// ────────────────────────────────────────────────────────────────────────────

/// A full policy file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default)]
    pub policies: Vec<PolicyDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: PolicyConditions,
    #[serde(default)]
    pub allow: PolicyAllow,
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Hardware conditions.  Byte bounds are strings such as `"24GB"`; all bounds
/// are inclusive.  A count bound of `0` is treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConditions {
    #[serde(
        default,
        deserialize_with = "aistack_types::deserialize_size_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub gpu_vram_min: Option<String>,
    #[serde(
        default,
        deserialize_with = "aistack_types::deserialize_size_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub gpu_vram_max: Option<String>,
    #[serde(
        default,
        deserialize_with = "aistack_types::deserialize_size_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub ram_min: Option<String>,
    #[serde(
        default,
        deserialize_with = "aistack_types::deserialize_size_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub ram_max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_count_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_count_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nvlink: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_gpu: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyAllow {
    /// Model-size budget, e.g. `"13B"`, or `"unlimited"`.
    #[serde(
        default,
        deserialize_with = "aistack_types::deserialize_size_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_model_size: Option<String>,
    #[serde(default)]
    pub runtimes: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

impl PolicyConditions {
    /// `true` when every declared condition holds for `profile`.
    pub fn matches(&self, profile: &NormalizedHardwareProfile) -> bool {
        matches_count(profile.gpu_count, self.gpu_count_min, self.gpu_count_max)
            && self.nvlink.is_none_or(|want| profile.has_nvlink == want)
            && self.multi_gpu.is_none_or(|want| profile.multi_gpu == want)
            && matches_bytes(
                profile.max_gpu_vram_bytes,
                self.gpu_vram_min.as_deref(),
                self.gpu_vram_max.as_deref(),
            )
            && matches_bytes(
                profile.memory_total_bytes,
                self.ram_min.as_deref(),
                self.ram_max.as_deref(),
            )
    }
}

fn matches_count(value: u32, min: Option<u32>, max: Option<u32>) -> bool {
    let min = min.filter(|m| *m > 0);
    let max = max.filter(|m| *m > 0);
    min.is_none_or(|m| value >= m) && max.is_none_or(|m| value <= m)
}

// An unparseable bound never matches.
fn matches_bytes(value: u64, min: Option<&str>, max: Option<&str>) -> bool {
    if let Some(raw) = min {
        match parse_bytes(raw) {
            Ok(bound) if value >= bound => {}
            Ok(_) => return false,
            Err(e) => {
                warn!(bound = raw, error = %e, "ignoring policy with unparseable lower bound");
                return false;
            }
        }
    }
    if let Some(raw) = max {
        match parse_bytes(raw) {
            Ok(bound) if value <= bound => {}
            Ok(_) => return false,
            Err(e) => {
                warn!(bound = raw, error = %e, "ignoring policy with unparseable upper bound");
                return false;
            }
        }
    }
    true
}

/// Numeric reading of a model-size budget such as `"13B"` or `"7.5"`.
///
/// `"unlimited"`, empty and unparseable values map to infinity so that any
/// finite budget is more restrictive.
pub fn model_size_limit(raw: &str) -> f64 {
    let trimmed = raw.trim().to_ascii_uppercase();
    if trimmed.is_empty() || trimmed == "UNLIMITED" {
        return f64::INFINITY;
    }
    let number = trimmed.strip_suffix('B').unwrap_or(&trimmed).trim();
    match number.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => f64::INFINITY,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CapabilitySet
// ────────────────────────────────────────────────────────────────────────────

/// Resolved permissions for one hardware profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub matched_policies: Vec<String>,
    pub max_model_size: String,
    pub runtimes: Vec<String>,
    pub features: Vec<String>,
    pub denied: Vec<String>,
}

impl CapabilitySet {
    pub fn allows_runtime(&self, runtime: &str) -> bool {
        self.runtimes.iter().any(|r| r == runtime)
    }

    pub fn allows_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    /// Numeric budget, infinite when unlimited.
    pub fn max_model_size_limit(&self) -> f64 {
        model_size_limit(&self.max_model_size)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PolicyEngine
// ────────────────────────────────────────────────────────────────────────────

/// Evaluates a fixed [`PolicySet`].  Immutable after construction, so a
/// single engine can be shared freely between callers.
///
/// # Example
///
/// ```
/// use aistack_kernel::policy::PolicyEngine;
/// use aistack_types::NormalizedHardwareProfile;
///
/// let engine = PolicyEngine::from_yaml(r#"
/// policies:
///   - name: baseline
///     allow: { max_model_size: 7B, runtimes: [llama.cpp] }
/// "#).unwrap();
///
/// let caps = engine.evaluate_normalized(&NormalizedHardwareProfile::default()).unwrap();
/// assert_eq!(caps.matched_policies, vec!["baseline"]);
/// assert_eq!(caps.max_model_size, "7B");
/// ```
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    set: PolicySet,
}

impl PolicyEngine {
    pub fn new(set: PolicySet) -> Self {
        Self { set }
    }

    /// Load a policy set from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let engine = Self::from_yaml(&raw)?;
        debug!(path = %path.display(), policies = engine.set.policies.len(), "policy set loaded");
        Ok(engine)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, PolicyError> {
        let set: PolicySet = serde_yaml::from_str(raw)?;
        Ok(Self::new(set))
    }

    pub fn policies(&self) -> &[PolicyDefinition] {
        &self.set.policies
    }

    /// Normalize `profile` and evaluate it.
    ///
    /// # Errors
    ///
    /// [`PolicyError::MissingProfile`] when no profile is supplied, otherwise
    /// see [`PolicyEngine::evaluate_normalized`].
    pub fn evaluate(&self, profile: Option<&HardwareProfile>) -> Result<CapabilitySet, PolicyError> {
        let profile = profile.ok_or(PolicyError::MissingProfile)?;
        self.evaluate_normalized(&profile.normalize())
    }

    /// Fold every policy whose conditions hold for `profile`.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::NoPolicies`] – the set is empty.
    /// - [`PolicyError::NoMatch`] – no policy matched.
    pub fn evaluate_normalized(
        &self,
        profile: &NormalizedHardwareProfile,
    ) -> Result<CapabilitySet, PolicyError> {
        if self.set.policies.is_empty() {
            return Err(PolicyError::NoPolicies);
        }

        let matched: Vec<&PolicyDefinition> = self
            .set
            .policies
            .iter()
            .filter(|p| p.conditions.matches(profile))
            .collect();
        if matched.is_empty() {
            return Err(PolicyError::NoMatch);
        }

        let mut max_model_size = UNLIMITED.to_string();
        let mut limit = f64::INFINITY;
        let mut names = Vec::with_capacity(matched.len());
        let mut runtimes = BTreeSet::new();
        let mut features = BTreeSet::new();
        let mut denied = BTreeSet::new();

        for policy in matched {
            debug!(policy = %policy.name, "policy matched");
            names.push(policy.name.clone());
            if let Some(raw) = policy.allow.max_model_size.as_deref()
                && !raw.trim().is_empty()
            {
                let current = model_size_limit(raw);
                if current < limit {
                    limit = current;
                    max_model_size = raw.to_string();
                }
            }
            runtimes.extend(policy.allow.runtimes.iter().cloned());
            features.extend(policy.allow.features.iter().cloned());
            denied.extend(policy.deny.iter().cloned());
        }

        for id in &denied {
            runtimes.remove(id);
            features.remove(id);
        }
        names.sort();

        Ok(CapabilitySet {
            matched_policies: names,
            max_model_size,
            runtimes: runtimes.into_iter().collect(),
            features: features.into_iter().collect(),
            denied: denied.into_iter().collect(),
        })
    }
}
