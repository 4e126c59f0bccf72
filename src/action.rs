use crate::event::Event;
use crate::transition::Transition;

/// Which phase of a transition an [`Action`] is being invoked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Exit,
    Transition,
    Entry,
}

/// The two semantic failures an [`Action`] may signal, per spec.md §7.
///
/// Any other error must be surfaced by panicking — the dispatcher (C5)
/// treats a panicking action as a bug and reports it as a non-successful
/// status rather than silently swallowing it (spec.md §6: "any other
/// exception is treated as a bug").
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// The action undid its own effects before returning; the engine leaves
    /// the current state untouched and rethrows. spec.md §4.4 step 7.
    #[error("transition rolled back: {0}")]
    Rollback(String),

    /// The action failed without rolling back; the engine redirects to the
    /// configured error state (or converts to `FiniteStateFailure` if none
    /// is configured). spec.md §4.4 step 7.
    #[error("transition failed: {0}")]
    Failure(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ActionError {
    pub fn failure(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        ActionError::Failure(Box::new(cause))
    }
}

/// A user-supplied procedure run on state entry, state exit, or transition.
///
/// Actions run serially inside the state machine's critical section (see
/// spec.md §5); they may perform I/O but must not call back into the same
/// [`crate::machine::StateMachine`] synchronously, which would deadlock on
/// its monitor.
pub trait Action<En>: Send + Sync {
    fn perform(
        &self,
        event: &dyn Event,
        entity: &En,
        transition: &Transition<En>,
        kind: ActionKind,
    ) -> Result<(), ActionError>;
}

impl<En, F> Action<En> for F
where
    F: Fn(&dyn Event, &En, &Transition<En>, ActionKind) -> Result<(), ActionError> + Send + Sync,
{
    fn perform(
        &self,
        event: &dyn Event,
        entity: &En,
        transition: &Transition<En>,
        kind: ActionKind,
    ) -> Result<(), ActionError> {
        (self)(event, entity, transition, kind)
    }
}
