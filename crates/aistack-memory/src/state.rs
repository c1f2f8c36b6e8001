//! Persisted module lifecycle state.
//!
//! A [`StateManager`] owns one `state.json` file inside its data directory.
//! Every mutation snapshots the current module map into a bounded history
//! before applying the change, then rewrites the file atomically (write to
//! `state.json.tmp`, rename over `state.json`).
//!
//! # File layout
//!
//! ```json
//! {
//!   "schema_version": 1,
//!   "updated_at": "2025-01-01T00:00:00Z",
//!   "modules": {
//!     "ollama": { "name": "ollama", "version": "0.3.12", "state": "running", "updated_at": "…" }
//!   },
//!   "history": [
//!     { "id": "…", "reason": "update module ollama", "created_at": "…", "modules": { … } }
//!   ]
//! }
//! ```
//!
//! # Example
//!
//! ```rust
//! use aistack_memory::state::StateManager;
//! use aistack_types::LifecycleState;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = StateManager::open(dir.path()).unwrap();
//!
//! store.update_module("ollama", "0.3.12", LifecycleState::Installed).unwrap();
//! store.update_module("ollama", "0.3.12", LifecycleState::Running).unwrap();
//!
//! // Undo the last change.
//! store.rollback_last().unwrap();
//! let ollama = store.get_module("ollama").unwrap();
//! assert_eq!(ollama.state.known(), Some(LifecycleState::Installed));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use aistack_types::LifecycleState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const STATE_FILE_NAME: &str = "state.json";
const STATE_SCHEMA_VERSION: u32 = 1;
/// Snapshots retained for rollback; the oldest are dropped first.
pub const MAX_HISTORY_ENTRIES: usize = 25;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StateError {
    #[error("state data directory is empty")]
    EmptyDataDir,
    #[error("create state directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse state file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialize state: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("module name is required")]
    MissingName,
    #[error("snapshot {0} not found")]
    SnapshotNotFound(String),
    #[error("no snapshots available")]
    NoSnapshots,
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// A lifecycle state as read from disk.
///
/// Files edited by hand or written by older builds may hold labels that are
/// not lifecycle states; those are kept verbatim so [`StateManager::reconcile`]
/// can report what it replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordedState {
    Known(LifecycleState),
    Unknown(String),
}

impl RecordedState {
    pub fn known(&self) -> Option<LifecycleState> {
        match self {
            RecordedState::Known(state) => Some(*state),
            RecordedState::Unknown(_) => None,
        }
    }
}

impl From<LifecycleState> for RecordedState {
    fn from(state: LifecycleState) -> Self {
        RecordedState::Known(state)
    }
}

impl fmt::Display for RecordedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordedState::Known(state) => state.fmt(f),
            RecordedState::Unknown(raw) => f.write_str(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleState {
    pub name: String,
    pub version: String,
    pub state: RecordedState,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time copy of every module's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// UUID v4.
    pub id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    pub schema_version: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleState>,
    #[serde(default)]
    pub history: Vec<StateSnapshot>,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            updated_at: Utc::now(),
            modules: BTreeMap::new(),
            history: Vec::new(),
        }
    }
}

impl SystemState {
    fn push_snapshot(&mut self, reason: String) {
        self.history.push(StateSnapshot {
            id: Uuid::new_v4().to_string(),
            reason,
            created_at: Utc::now(),
            modules: self.modules.clone(),
        });
        if self.history.len() > MAX_HISTORY_ENTRIES {
            let excess = self.history.len() - MAX_HISTORY_ENTRIES;
            self.history.drain(..excess);
        }
    }
}

/// One entry fixed by [`StateManager::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateCorrection {
    pub module_name: String,
    pub previous: RecordedState,
    pub corrected: LifecycleState,
}

// ─────────────────────────────────────────────────────────────────────────────
// StateManager
// ─────────────────────────────────────────────────────────────────────────────

/// File-backed owner of the [`SystemState`].
///
/// All operations take one lock for their full read-modify-write cycle, so
/// concurrent callers are serialised.
pub struct StateManager {
    path: PathBuf,
    state: Mutex<SystemState>,
}

impl StateManager {
    /// Open the store in `data_dir`, creating the directory and an empty
    /// `state.json` when they do not exist yet.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StateError> {
        let data_dir = data_dir.as_ref();
        if data_dir.as_os_str().is_empty() {
            return Err(StateError::EmptyDataDir);
        }
        fs::create_dir_all(data_dir).map_err(|source| StateError::CreateDir {
            path: data_dir.to_path_buf(),
            source,
        })?;

        let manager = Self {
            path: data_dir.join(STATE_FILE_NAME),
            state: Mutex::new(SystemState::default()),
        };
        manager.load()?;
        Ok(manager)
    }

    /// Path of the backing `state.json`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the backing file, creating it from the in-memory state when
    /// absent.
    pub fn load(&self) -> Result<(), StateError> {
        let mut state = self.state.lock();
        match fs::read(&self.path) {
            Ok(raw) => {
                *state = serde_json::from_slice(&raw).map_err(|source| StateError::Parse {
                    path: self.path.clone(),
                    source,
                })?;
                debug!(
                    path = %self.path.display(),
                    modules = state.modules.len(),
                    history = state.history.len(),
                    "state loaded"
                );
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "creating state file");
                self.persist(&mut state)
            }
            Err(source) => Err(StateError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn save(&self) -> Result<(), StateError> {
        let mut state = self.state.lock();
        self.persist(&mut state)
    }

    /// Deep copy of the whole state, history included.
    pub fn get_state(&self) -> SystemState {
        self.state.lock().clone()
    }

    pub fn get_module(&self, name: &str) -> Option<ModuleState> {
        self.state.lock().modules.get(name).cloned()
    }

    /// Every tracked module, sorted by name.
    pub fn list_modules(&self) -> Vec<ModuleState> {
        self.state.lock().modules.values().cloned().collect()
    }

    /// Record `name` at `version` in `state`.
    ///
    /// Transition legality is the caller's concern; this only snapshots and
    /// stores.
    pub fn update_module(
        &self,
        name: &str,
        version: &str,
        state: LifecycleState,
    ) -> Result<(), StateError> {
        if name.is_empty() {
            return Err(StateError::MissingName);
        }
        let mut current = self.state.lock();
        let mut next = current.clone();
        next.push_snapshot(format!("update module {name}"));
        next.modules.insert(
            name.to_string(),
            ModuleState {
                name: name.to_string(),
                version: version.to_string(),
                state: state.into(),
                updated_at: Utc::now(),
            },
        );
        self.commit(&mut current, next)?;
        debug!(module = name, version, %state, "module state updated");
        Ok(())
    }

    /// Restore the module map held by snapshot `id`.
    pub fn rollback_to(&self, id: &str) -> Result<(), StateError> {
        let mut state = self.state.lock();
        let modules = state
            .history
            .iter()
            .find(|snapshot| snapshot.id == id)
            .map(|snapshot| snapshot.modules.clone())
            .ok_or_else(|| StateError::SnapshotNotFound(id.to_string()))?;
        let mut next = state.clone();
        next.push_snapshot("pre-rollback".to_string());
        next.modules = modules;
        self.commit(&mut state, next)?;
        info!(snapshot = id, "state rolled back");
        Ok(())
    }

    /// Restore the module map held by the newest snapshot.
    pub fn rollback_last(&self) -> Result<(), StateError> {
        let mut state = self.state.lock();
        let (id, modules) = state
            .history
            .last()
            .map(|snapshot| (snapshot.id.clone(), snapshot.modules.clone()))
            .ok_or(StateError::NoSnapshots)?;
        let mut next = state.clone();
        next.push_snapshot("pre-rollback".to_string());
        next.modules = modules;
        self.commit(&mut state, next)?;
        info!(snapshot = %id, "state rolled back to latest snapshot");
        Ok(())
    }

    /// Force every module whose recorded state is not a lifecycle state to
    /// `failed`, and fill empty versions with `"unknown"`.
    ///
    /// Returns one entry per forced state.  The file is rewritten (after a
    /// `"reconcile"` snapshot) only when that list is non-empty.
    pub fn reconcile(&self) -> Result<Vec<StateCorrection>, StateError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let now = Utc::now();
        let mut corrections = Vec::new();

        for (name, module) in next.modules.iter_mut() {
            if module.state.known().is_none() {
                corrections.push(StateCorrection {
                    module_name: name.clone(),
                    previous: module.state.clone(),
                    corrected: LifecycleState::Failed,
                });
                module.state = LifecycleState::Failed.into();
                module.updated_at = now;
            }
            if module.version.is_empty() {
                module.version = "unknown".to_string();
                module.updated_at = now;
            }
        }

        if !corrections.is_empty() {
            for c in &corrections {
                warn!(
                    module = %c.module_name,
                    previous = %c.previous,
                    corrected = %c.corrected,
                    "reconciled invalid module state"
                );
            }
            next.push_snapshot("reconcile".to_string());
            self.commit(&mut state, next)?;
        }
        Ok(corrections)
    }

    /// Write `next` and make it the live state.  `live` is left as it was
    /// when the write fails.
    fn commit(&self, live: &mut SystemState, mut next: SystemState) -> Result<(), StateError> {
        self.persist(&mut next)?;
        *live = next;
        Ok(())
    }

    fn persist(&self, state: &mut SystemState) -> Result<(), StateError> {
        state.updated_at = Utc::now();
        let data = serde_json::to_vec_pretty(state).map_err(StateError::Serialize)?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data).map_err(|source| StateError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| StateError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
