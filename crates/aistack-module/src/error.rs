use std::path::PathBuf;

use aistack_types::LifecycleState;
use thiserror::Error;

/// Errors raised while loading manifests or resolving install plans.
#[derive(Error, Debug)]
pub enum ModuleError {
    // ── configuration ────────────────────────────────────────────────────────
    #[error("invalid version format: {0:?}")]
    InvalidVersion(String),
    #[error("invalid constraint {0:?}")]
    InvalidConstraint(String),
    #[error("module name is required")]
    MissingName,
    #[error("read module manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse module manifest {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid manifest {name:?}: {}", problems.join("; "))]
    Invalid { name: String, problems: Vec<String> },
    #[error("checksum mismatch for {name}: expected {expected} got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    // ── resolution ───────────────────────────────────────────────────────────
    #[error("module {0} not found in registry")]
    NotFound(String),
    #[error("no available versions for {name} satisfy {constraint}")]
    NoSatisfyingVersion { name: String, constraint: String },
    #[error("circular dependency detected at {0}")]
    CircularDependency(String),
    #[error("version conflict for {name}: selected {selected} does not satisfy {constraint}")]
    VersionConflict {
        name: String,
        selected: String,
        constraint: String,
    },

    // ── lifecycle ────────────────────────────────────────────────────────────
    #[error("illegal lifecycle transition {from} -> {to}")]
    IllegalTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}
