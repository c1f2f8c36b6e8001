//! `aistack-module` – Module Catalogue & Dependency Resolution
//!
//! Everything the stack knows about installable modules (language runtimes,
//! inference engines, services, models) before anything is installed.
//!
//! # Modules
//!
//! - [`version`] – [`Version`][version::Version] and
//!   [`VersionConstraint`][version::VersionConstraint]: `MAJOR[.MINOR[.PATCH]]`
//!   versions and `name@>=1.2` style constraints.
//! - [`manifest`] – [`ModuleManifest`][manifest::ModuleManifest]: the YAML
//!   manifest schema, validation and hardware requirement checks.
//! - [`registry`] – [`Registry`][registry::Registry]: a checksum-verified,
//!   multi-version store of [`ModuleRecord`][registry::ModuleRecord]s.
//! - [`resolver`] – [`Resolver`][resolver::Resolver]: turns requested module
//!   names into a dependency-ordered [`InstallPlan`][resolver::InstallPlan],
//!   detecting cycles and version conflicts.
//! - [`state_machine`] – [`can_transition`][state_machine::can_transition]:
//!   the static lifecycle transition table.

pub mod error;
pub mod manifest;
pub mod registry;
pub mod resolver;
pub mod state_machine;
pub mod version;

pub use error::ModuleError;
pub use manifest::{Category, ModuleManifest, RuntimeConfig, validate_manifest};
pub use registry::{ModuleRecord, Registry};
pub use resolver::{InstallPlan, Resolver};
pub use state_machine::{can_transition, ensure_transition};
pub use version::{Operator, Version, VersionConstraint, parse_module_dependency};
