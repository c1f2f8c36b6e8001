//! `aistack-memory` – The State Store.
//!
//! Remembers what is installed and in which lifecycle state, across
//! restarts, in a single JSON document on disk.
//!
//! # Modules
//!
//! - [`state`] – [`StateManager`][state::StateManager]: the persisted
//!   [`SystemState`][state::SystemState] with a bounded snapshot history,
//!   rollback to any retained snapshot, and reconciliation of entries that
//!   hold an invalid lifecycle state.

pub mod state;

pub use state::{
    ModuleState, RecordedState, StateCorrection, StateError, StateManager, StateSnapshot,
    SystemState,
};
