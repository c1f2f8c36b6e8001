//! `aistack-kernel` – Hardware Policy
//!
//! Decides what the local workstation is *allowed* to run.  It does not
//! install or launch anything; it turns a hardware snapshot into a set of
//! permissions that the rest of the stack consults.
//!
//! # Modules
//!
//! - [`policy`] – [`PolicyEngine`][policy::PolicyEngine]: evaluates a
//!   declarative YAML policy set against a
//!   [`NormalizedHardwareProfile`][aistack_types::NormalizedHardwareProfile]
//!   and folds every matching policy into a
//!   [`CapabilitySet`][policy::CapabilitySet] (model-size budget, permitted
//!   runtimes and features, denied identifiers).
//! - [`detector`] – [`HardwareDetector`][detector::HardwareDetector]: the
//!   capability interface that supplies the raw
//!   [`HardwareProfile`][aistack_types::HardwareProfile], with a
//!   [`NativeDetector`][detector::NativeDetector] for the local host and a
//!   [`StaticDetector`][detector::StaticDetector] for pinned profiles.

pub mod detector;
pub mod policy;

pub use detector::{DetectError, HardwareDetector, NativeDetector, StaticDetector};
pub use policy::{
    CapabilitySet, PolicyAllow, PolicyConditions, PolicyDefinition, PolicyEngine, PolicyError,
    PolicySet,
};
