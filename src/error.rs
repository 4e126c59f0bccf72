//! The error taxonomy from spec.md §7, modeled as `thiserror` enums.

/// Raised by [`crate::map::TransitionMapBuilder`] during setup or `build()`.
/// Fatal: a map that fails to build must not be used.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("state '{0}' is already registered")]
    DuplicateState(String),

    #[error("a start state is already registered ('{0}')")]
    DuplicateStart(String),

    #[error("state '{0}' is not registered in this map")]
    UnknownState(String),

    #[error("the map has no states")]
    Empty,

    #[error("the map has no start state")]
    MissingStart,

    #[error("the map has no end state")]
    MissingEnd,

    #[error("state '{0}' is unreachable")]
    Unreachable(String),

    #[error("state '{0}' is a dead end: it has no outbound transition")]
    DeadEnd(String),

    #[error("error state '{0}' is not registered in this map")]
    UnknownErrorState(String),

    #[error("the map has already been built")]
    AlreadyBuilt,
}

/// Raised by [`crate::map::TransitionMap::next_transition`] when `apply_event`
/// cannot find a transition to fire. Both variants are reported through this
/// single type, matching spec.md §4.3's "Both are subclasses of a common
/// `TransitionNotFound` error."
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransitionNotFound {
    #[error("state '{0}' has no outgoing transitions at any ancestor level")]
    NoExitTransitions(String),

    #[error("state '{0}' has outgoing transitions, but none accepted this event")]
    NoMatchingTransition(String),
}

/// The error [`crate::machine::StateMachine::apply_event`] returns.
#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error(transparent)]
    NoTransition(#[from] TransitionNotFound),

    #[error("transition rolled back: {0}")]
    Rollback(String),

    #[error("transition failed: {0}")]
    TransitionFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("state machine exceeded the maximum of {0} transitions")]
    MaxTransitionsExceeded(usize),

    #[error("finite state machine failure: {0}")]
    FiniteStateFailure(String),
}

/// The error surfaced through an [`crate::dispatcher::EventRequest`]'s
/// [`crate::dispatcher::EventStatus`]. Wraps a [`MachineError`] or, per
/// spec.md §6 ("any other exception is treated as a bug"), a caught panic
/// from a user `Action`/listener.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Machine(#[from] MachineError),

    #[error("action or listener panicked: {0}")]
    Panic(String),
}
