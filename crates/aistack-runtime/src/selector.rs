//! Execution mode selection.
//!
//! A pure function over a manifest's declared modes, an optional allow-list
//! (typically the runtimes granted by policy), a caller preference and the
//! supervisor configuration.

use std::collections::BTreeSet;

use aistack_module::RuntimeConfig;
use aistack_types::ExecutionMode;
use thiserror::Error;

use crate::supervisor::SupervisorConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("module declares no runtime modes")]
    NoModesDeclared,
    #[error("no runtime mode available for this module")]
    NoModesAvailable,
}

#[derive(Debug, Clone, Copy)]
pub struct SelectionInput<'a> {
    pub manifest: &'a RuntimeConfig,
    /// `None` or an empty slice means "no restriction".
    pub allowed_modes: Option<&'a [ExecutionMode]>,
    pub preference: Option<ExecutionMode>,
    pub config: &'a SupervisorConfig,
}

/// Pick the mode to run with.
///
/// Declared modes are filtered by the allow-list and by the enabled flags.
/// Among the survivors the first hit wins: caller preference, manifest
/// preference, configured default, container, native.
///
/// ```
/// use aistack_module::RuntimeConfig;
/// use aistack_runtime::selector::{SelectionInput, select_mode};
/// use aistack_runtime::supervisor::SupervisorConfig;
/// use aistack_types::ExecutionMode;
///
/// let manifest = RuntimeConfig {
///     modes: vec![ExecutionMode::Native, ExecutionMode::Container],
///     preferred: Some(ExecutionMode::Native),
/// };
/// let config = SupervisorConfig { docker_enabled: false, ..Default::default() };
/// let mode = select_mode(SelectionInput {
///     manifest: &manifest,
///     allowed_modes: None,
///     preference: Some(ExecutionMode::Container),
///     config: &config,
/// })
/// .unwrap();
/// assert_eq!(mode, ExecutionMode::Native);
/// ```
pub fn select_mode(input: SelectionInput<'_>) -> Result<ExecutionMode, SelectionError> {
    if input.manifest.modes.is_empty() {
        return Err(SelectionError::NoModesDeclared);
    }

    let allowed = input.allowed_modes.filter(|modes| !modes.is_empty());
    let candidates: BTreeSet<ExecutionMode> = input
        .manifest
        .modes
        .iter()
        .copied()
        .filter(|mode| allowed.is_none_or(|allowed| allowed.contains(mode)))
        .filter(|mode| input.config.mode_enabled(*mode))
        .collect();

    [
        input.preference,
        input.manifest.preferred,
        Some(input.config.default_mode),
        Some(ExecutionMode::Container),
        Some(ExecutionMode::Native),
    ]
    .into_iter()
    .flatten()
    .find(|mode| candidates.contains(mode))
    .or_else(|| candidates.first().copied())
    .ok_or(SelectionError::NoModesAvailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    use aistack_types::ExecutionMode::{Container, Native};

    fn manifest(modes: &[ExecutionMode], preferred: Option<ExecutionMode>) -> RuntimeConfig {
        RuntimeConfig {
            modes: modes.to_vec(),
            preferred,
        }
    }

    fn select(
        manifest: &RuntimeConfig,
        allowed: Option<&[ExecutionMode]>,
        preference: Option<ExecutionMode>,
        config: &SupervisorConfig,
    ) -> Result<ExecutionMode, SelectionError> {
        select_mode(SelectionInput {
            manifest,
            allowed_modes: allowed,
            preference,
            config,
        })
    }

    #[test]
    fn caller_preference_wins_when_available() {
        let m = manifest(&[Container, Native], Some(Container));
        let cfg = SupervisorConfig::default();
        assert_eq!(select(&m, None, Some(Native), &cfg), Ok(Native));
    }

    #[test]
    fn manifest_preference_then_default() {
        let cfg = SupervisorConfig {
            default_mode: Native,
            ..Default::default()
        };
        let m = manifest(&[Container, Native], Some(Container));
        assert_eq!(select(&m, None, None, &cfg), Ok(Container));

        let m = manifest(&[Container, Native], None);
        assert_eq!(select(&m, None, None, &cfg), Ok(Native));
    }

    #[test]
    fn container_preferred_over_native_as_fallback() {
        let cfg = SupervisorConfig {
            default_mode: Native,
            native_enabled: false,
            ..Default::default()
        };
        let m = manifest(&[Native, Container], None);
        assert_eq!(select(&m, None, None, &cfg), Ok(Container));
    }

    #[test]
    fn allow_list_filters_declared_modes() {
        let cfg = SupervisorConfig::default();
        let m = manifest(&[Container, Native], Some(Container));
        assert_eq!(select(&m, Some(&[Native]), None, &cfg), Ok(Native));
        assert_eq!(select(&m, Some(&[]), None, &cfg), Ok(Container));
    }

    #[test]
    fn preference_outside_filtered_set_is_ignored() {
        let cfg = SupervisorConfig {
            docker_enabled: false,
            ..Default::default()
        };
        let m = manifest(&[Container, Native], Some(Container));
        assert_eq!(select(&m, None, Some(Container), &cfg), Ok(Native));
    }

    #[test]
    fn nothing_left_is_an_error() {
        let cfg = SupervisorConfig {
            native_enabled: false,
            ..Default::default()
        };
        let m = manifest(&[Native], None);
        assert_eq!(
            select(&m, None, None, &cfg),
            Err(SelectionError::NoModesAvailable)
        );
        assert_eq!(
            select(&m, Some(&[Container]), None, &SupervisorConfig::default()),
            Err(SelectionError::NoModesAvailable)
        );
        assert_eq!(
            select(&manifest(&[], None), None, None, &cfg),
            Err(SelectionError::NoModesDeclared)
        );
    }
}
