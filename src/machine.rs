use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::action::{ActionError, ActionKind};
use crate::error::MachineError;
use crate::event::Event;
use crate::listener::StateChangeListener;
use crate::map::TransitionMap;
use crate::state::{State, StateKind, StateRef};

/// Opaque handle returned by [`StateMachine::add_listener`], used to remove
/// that listener later. Identity-based, not state-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerToken(u64);

struct MachineInner<En> {
    entity: En,
    current: StateRef<En>,
    transition_count: usize,
    max_transitions: usize,
    forward_chain_enabled: bool,
    listeners: Vec<(u64, Arc<dyn StateChangeListener<En>>)>,
    next_listener_id: u64,
}

/// The transition engine (C4): a single-writer monitor over the current
/// state and entity. `apply_event` is the only mutator; it serializes on
/// `inner` per spec.md §5 — concurrent callers are strictly ordered, no
/// transition interleaves another.
pub struct StateMachine<En> {
    map: Arc<TransitionMap<En>>,
    inner: Mutex<MachineInner<En>>,
}

impl<En> StateMachine<En> {
    pub fn new(map: Arc<TransitionMap<En>>, entity: En) -> Arc<Self> {
        let current = map.start().clone();
        Arc::new(StateMachine {
            map,
            inner: Mutex::new(MachineInner {
                entity,
                current,
                transition_count: 0,
                max_transitions: 0,
                forward_chain_enabled: false,
                listeners: Vec::new(),
                next_listener_id: 0,
            }),
        })
    }

    pub fn map(&self) -> &Arc<TransitionMap<En>> {
        &self.map
    }

    pub fn get_state(&self) -> StateRef<En> {
        self.inner.lock().current.clone()
    }

    pub fn is_end(&self) -> bool {
        self.inner.lock().current.kind() == StateKind::End
    }

    pub fn get_error_state(&self) -> Option<StateRef<En>> {
        self.map.error_state().cloned()
    }

    /// Runs `f` with a reference to the entity, holding the machine's
    /// monitor for the duration. The entity has no separate identity from
    /// the machine's own synchronization, so there is no safe way to hand
    /// out a bare `&En` without tying it to a guard lifetime; this closure
    /// form keeps the borrow scoped instead.
    pub fn with_entity<R>(&self, f: impl FnOnce(&En) -> R) -> R {
        let inner = self.inner.lock();
        f(&inner.entity)
    }

    pub fn set_max_transitions(&self, max_transitions: usize) {
        self.inner.lock().max_transitions = max_transitions;
    }

    pub fn set_forward_chain_enabled(&self, enabled: bool) {
        self.inner.lock().forward_chain_enabled = enabled;
    }

    pub fn add_listener(&self, listener: Arc<dyn StateChangeListener<En>>) -> ListenerToken {
        let mut inner = self.inner.lock();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, listener));
        ListenerToken(id)
    }

    pub fn remove_listener(&self, token: ListenerToken) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(id, _)| *id != token.0);
        inner.listeners.len() != before
    }

    /// Adds `listener` and returns it alongside the state that was current
    /// at the moment of registration, both under a single lock acquisition.
    /// Used by [`crate::latch::StateTransitionLatch`] to avoid missing a
    /// notification that fires between reading the initial state and
    /// registering (spec.md §4.6's "critical ordering requirement").
    pub(crate) fn register_listener_with_initial_state(
        &self,
        listener: Arc<dyn StateChangeListener<En>>,
    ) -> (ListenerToken, StateRef<En>) {
        let mut inner = self.inner.lock();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, listener));
        (ListenerToken(id), inner.current.clone())
    }

    /// Applies `event` to the machine, per the algorithm in spec.md §4.4.
    /// Serialized: the whole call, including any forward-chained
    /// re-application, runs under one lock acquisition.
    pub fn apply_event(&self, event: &dyn Event) -> Result<(), MachineError> {
        let mut inner = self.inner.lock();
        self.apply_event_locked(&mut inner, event)
    }

    fn apply_event_locked(
        &self,
        inner: &mut MachineInner<En>,
        event: &dyn Event,
    ) -> Result<(), MachineError> {
        loop {
            if inner.max_transitions > 0 {
                inner.transition_count += 1;
                if inner.transition_count > inner.max_transitions {
                    return Err(MachineError::MaxTransitionsExceeded(inner.max_transitions));
                }
            }

            let transition = self
                .map
                .next_transition(&inner.current, event, &inner.entity)?
                .clone();
            let current = inner.current.clone();
            let next = transition.output().clone();
            let changed = current.qualified_name() != next.qualified_name();
            let lca = if changed {
                State::least_common_ancestor(&current, &next)
            } else {
                Some(current.clone())
            };

            if changed {
                for s in exit_path(&current, lca.as_ref()) {
                    if let Some(action) = s.exit_action.as_ref() {
                        match action.perform(event, &inner.entity, &transition, ActionKind::Exit) {
                            Ok(()) => {}
                            Err(ActionError::Rollback(msg)) => {
                                return Err(MachineError::Rollback(msg));
                            }
                            Err(ActionError::Failure(cause)) => {
                                return self.handle_failure(inner, &current, &transition, event, cause);
                            }
                        }
                    }
                }
            }

            if let Some(action) = transition.action() {
                match action.perform(event, &inner.entity, &transition, ActionKind::Transition) {
                    Ok(()) => {}
                    Err(ActionError::Rollback(msg)) => {
                        return Err(MachineError::Rollback(msg));
                    }
                    Err(ActionError::Failure(cause)) => {
                        return self.handle_failure(inner, &current, &transition, event, cause);
                    }
                }
            }

            if changed {
                for s in entry_path(&next, lca.as_ref()) {
                    if let Some(action) = s.entry_action.as_ref() {
                        match action.perform(event, &inner.entity, &transition, ActionKind::Entry) {
                            Ok(()) => {}
                            Err(ActionError::Rollback(msg)) => {
                                return Err(MachineError::Rollback(msg));
                            }
                            Err(ActionError::Failure(cause)) => {
                                return self.handle_failure(inner, &current, &transition, event, cause);
                            }
                        }
                    }
                }
            }

            if changed {
                inner.current = next.clone();
                debug!(
                    from = %current.qualified_name(),
                    to = %next.qualified_name(),
                    transition = %transition.name(),
                    "state transition applied"
                );
                self.notify_listeners(inner, &current, &next);
            }

            if changed && inner.forward_chain_enabled {
                if self
                    .map
                    .next_transition(&inner.current, event, &inner.entity)
                    .is_ok()
                {
                    continue;
                }
            }
            return Ok(());
        }
    }

    /// Handles a `TransitionFailure` per spec.md §4.4 step 7: redirect to
    /// the configured error state (firing only its own entry action), or
    /// fall back to `FiniteStateFailure` if none is configured.
    fn handle_failure(
        &self,
        inner: &mut MachineInner<En>,
        previous: &StateRef<En>,
        transition: &crate::transition::Transition<En>,
        event: &dyn Event,
        cause: Box<dyn std::error::Error + Send + Sync>,
    ) -> Result<(), MachineError> {
        let error_state = match self.map.error_state() {
            Some(es) => es.clone(),
            None => {
                return Err(MachineError::FiniteStateFailure(format!(
                    "transition failed and no error state is configured: {cause}"
                )));
            }
        };

        warn!(
            from = %previous.qualified_name(),
            error_state = %error_state.qualified_name(),
            "transition action failed, redirecting to error state: {cause}"
        );

        if let Some(action) = error_state.entry_action.as_ref() {
            if let Err(entry_err) =
                action.perform(event, &inner.entity, transition, ActionKind::Entry)
            {
                return Err(MachineError::FiniteStateFailure(format!(
                    "error state entry action itself failed: {entry_err}"
                )));
            }
        }

        inner.current = error_state.clone();
        self.notify_listeners(inner, previous, &error_state);
        Err(MachineError::TransitionFailure(cause))
    }

    fn notify_listeners(&self, inner: &MachineInner<En>, old: &StateRef<En>, new: &StateRef<En>) {
        for (_, listener) in &inner.listeners {
            listener.state_changed(&inner.entity, old, new);
        }
    }
}

impl<En: Send + Sync + 'static> StateMachine<En> {
    /// Registers and returns a [`crate::latch::StateTransitionLatch`]
    /// waiting for `expected` (or the map's error state, if `end_on_error`).
    /// spec.md §4.4's Machine API: `createStateTransitionLatch`.
    pub fn create_state_transition_latch(
        self: &Arc<Self>,
        expected: StateRef<En>,
        end_on_error: bool,
    ) -> Arc<crate::latch::StateTransitionLatch<En>> {
        crate::latch::StateTransitionLatch::new(self.clone(), expected, end_on_error)
    }
}

/// States from `current` up to (but not including) `lca`, in ascending
/// (innermost-first) order — the order spec.md §4.4 step 4 fires exits in.
fn exit_path<En>(current: &StateRef<En>, lca: Option<&StateRef<En>>) -> Vec<StateRef<En>> {
    let mut path = Vec::new();
    let mut cur = Some(current.clone());
    while let Some(s) = cur {
        if let Some(l) = lca {
            if s.qualified_name() == l.qualified_name() {
                break;
            }
        }
        let parent = s.parent().cloned();
        path.push(s);
        cur = parent;
    }
    path
}

/// States from just-below `lca` down to `next`, in descending
/// (outermost-first) order — the order spec.md §4.4 step 6 fires entries in.
fn entry_path<En>(next: &StateRef<En>, lca: Option<&StateRef<En>>) -> Vec<StateRef<En>> {
    let mut path = Vec::new();
    let mut cur = Some(next.clone());
    while let Some(s) = cur {
        if let Some(l) = lca {
            if s.qualified_name() == l.qualified_name() {
                break;
            }
        }
        let parent = s.parent().cloned();
        path.push(s);
        cur = parent;
    }
    path.reverse();
    path
}
