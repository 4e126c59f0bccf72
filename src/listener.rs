use crate::state::StateRef;

/// Notified by [`crate::machine::StateMachine::apply_event`] whenever the
/// current state actually changes. Called **inside** the machine's monitor
/// (spec.md §5) — implementations must be fast and must never call back
/// into the same state machine, or they will deadlock on its mutex. Post
/// work to another thread instead.
///
/// A listener that panics aborts the notification loop; the panic
/// propagates out of `apply_event` (or is caught and reported as a failed
/// status by [`crate::dispatcher::EventDispatcher`], when events are
/// applied through the dispatcher).
pub trait StateChangeListener<En>: Send + Sync {
    fn state_changed(&self, entity: &En, old: &StateRef<En>, new: &StateRef<En>);
}

impl<En, F> StateChangeListener<En> for F
where
    F: Fn(&En, &StateRef<En>, &StateRef<En>) + Send + Sync,
{
    fn state_changed(&self, entity: &En, old: &StateRef<En>, new: &StateRef<En>) {
        (self)(entity, old, new)
    }
}
