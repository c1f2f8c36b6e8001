//! Legal lifecycle transitions.
//!
//! ```text
//! available → resolved → installed → running ⇄ stopped
//!                 ↑                      ↘       ↙
//!                 └──────────────────── failed
//! any → deprecated (terminal)
//! ```

use aistack_types::LifecycleState;

use crate::error::ModuleError;

use LifecycleState::*;

/// States reachable from `from` in one step, excluding `from` itself.
pub fn allowed_transitions(from: LifecycleState) -> &'static [LifecycleState] {
    match from {
        Available => &[Resolved, Deprecated],
        Resolved => &[Installed, Failed, Deprecated],
        Installed => &[Running, Stopped, Failed, Deprecated],
        Running => &[Stopped, Failed, Deprecated],
        Stopped => &[Running, Failed, Deprecated],
        Failed => &[Resolved, Deprecated],
        Deprecated => &[],
    }
}

/// `true` when `from == to` or `to` is directly reachable from `from`.
///
/// ```
/// use aistack_module::can_transition;
/// use aistack_types::LifecycleState;
///
/// assert!(can_transition(LifecycleState::Installed, LifecycleState::Running));
/// assert!(!can_transition(LifecycleState::Deprecated, LifecycleState::Running));
/// ```
pub fn can_transition(from: LifecycleState, to: LifecycleState) -> bool {
    from == to || allowed_transitions(from).contains(&to)
}

/// [`can_transition`] as a `Result`, for callers about to record a change.
pub fn ensure_transition(from: LifecycleState, to: LifecycleState) -> Result<(), ModuleError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(ModuleError::IllegalTransition { from, to })
    }
}
