use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::action::Action;
use crate::error::{ConfigurationError, TransitionNotFound};
use crate::event::Event;
use crate::guard::Guard;
use crate::state::{StateKind, StateRef};
use crate::transition::Transition;

/// Mutable during setup; [`TransitionMapBuilder::build`] freezes it into a
/// [`TransitionMap`]. Owns the set of states and the state → outgoing
/// transitions mapping; insertion order within each state's list is the
/// tie-break priority `next_transition` uses.
pub struct TransitionMapBuilder<En> {
    states: HashMap<String, StateRef<En>>,
    outgoing: HashMap<String, Vec<Transition<En>>>,
    start: Option<StateRef<En>>,
    error_state: Option<StateRef<En>>,
}

impl<En> Default for TransitionMapBuilder<En> {
    fn default() -> Self {
        Self::new()
    }
}

impl<En> TransitionMapBuilder<En> {
    pub fn new() -> Self {
        TransitionMapBuilder {
            states: HashMap::new(),
            outgoing: HashMap::new(),
            start: None,
            error_state: None,
        }
    }

    pub fn add_state(&mut self, state: StateRef<En>) -> Result<&mut Self, ConfigurationError> {
        if self.states.contains_key(state.qualified_name()) {
            return Err(ConfigurationError::DuplicateState(
                state.qualified_name().to_string(),
            ));
        }
        if state.kind() == StateKind::Start {
            if let Some(existing) = &self.start {
                return Err(ConfigurationError::DuplicateStart(
                    existing.qualified_name().to_string(),
                ));
            }
            self.start = Some(state.clone());
        }
        self.states
            .insert(state.qualified_name().to_string(), state);
        Ok(self)
    }

    pub fn add_transition(
        &mut self,
        transition: Transition<En>,
    ) -> Result<&mut Self, ConfigurationError> {
        self.require_known(transition.input())?;
        self.require_known(transition.output())?;
        self.outgoing
            .entry(transition.input().qualified_name().to_string())
            .or_default()
            .push(transition);
        Ok(self)
    }

    /// Adds a self-loop transition `name:state.qualified_name` for every
    /// state in `states`, sharing one guard/action. spec.md §4.3.
    pub fn add_transition_group(
        &mut self,
        name: &str,
        guard: Arc<dyn Guard<En>>,
        states: &[StateRef<En>],
        action: Option<Arc<dyn Action<En>>>,
    ) -> Result<&mut Self, ConfigurationError> {
        for state in states {
            self.require_known(state)?;
        }
        for state in states {
            let transition_name = format!("{}:{}", name, state.qualified_name());
            let transition = Transition::new(
                transition_name,
                guard.clone(),
                state.clone(),
                state.clone(),
                action.clone(),
            );
            self.outgoing
                .entry(state.qualified_name().to_string())
                .or_default()
                .push(transition);
        }
        Ok(self)
    }

    pub fn set_error_state(&mut self, state: StateRef<En>) -> Result<&mut Self, ConfigurationError> {
        self.require_known(&state)?;
        self.error_state = Some(state);
        Ok(self)
    }

    fn require_known(&self, state: &StateRef<En>) -> Result<(), ConfigurationError> {
        if self.states.contains_key(state.qualified_name()) {
            Ok(())
        } else {
            Err(ConfigurationError::UnknownState(
                state.qualified_name().to_string(),
            ))
        }
    }

    /// Freezes the map, running the structural checks from spec.md §4.3.
    pub fn build(self) -> Result<TransitionMap<En>, ConfigurationError> {
        if self.states.is_empty() {
            return Err(ConfigurationError::Empty);
        }
        let start = self.start.clone().ok_or(ConfigurationError::MissingStart)?;
        if !self.states.values().any(|s| s.kind() == StateKind::End) {
            return Err(ConfigurationError::MissingEnd);
        }
        if let Some(es) = &self.error_state {
            self.require_known(es)?;
        }

        check_reachability(&self.states, &self.outgoing, &start, self.error_state.as_ref())?;
        check_liveness(&self.states, &self.outgoing, self.error_state.as_ref())?;

        debug!(
            states = self.states.len(),
            start = %start.qualified_name(),
            "transition map built and validated"
        );

        Ok(TransitionMap {
            states: self.states,
            outgoing: self.outgoing,
            start,
            error_state: self.error_state,
        })
    }
}

/// Marks `entered`/`has_outbound` for every ancestor of `propagate_from` up
/// to (but excluding) `stop_at`, the least common ancestor of
/// `propagate_from` and `relative_to`. This implements the ancestor-exclusion
/// rule from spec.md §4.3 literally: an ancestor only accrues credit from a
/// transition whose *other* endpoint is not itself inside that ancestor —
/// which is exactly everything strictly below the LCA.
fn propagate_up<En>(
    propagate_from: &StateRef<En>,
    relative_to: &StateRef<En>,
    set: &mut HashSet<String>,
) {
    use crate::state::State;
    let stop_at = State::least_common_ancestor(propagate_from, relative_to);
    let mut cur = Some(propagate_from.clone());
    while let Some(s) = cur {
        if let Some(stop) = &stop_at {
            if s.qualified_name() == stop.qualified_name() {
                break;
            }
        }
        set.insert(s.qualified_name().to_string());
        cur = s.parent().cloned();
    }
}

fn check_reachability<En>(
    states: &HashMap<String, StateRef<En>>,
    outgoing: &HashMap<String, Vec<Transition<En>>>,
    start: &StateRef<En>,
    error_state: Option<&StateRef<En>>,
) -> Result<(), ConfigurationError> {
    let mut entered: HashSet<String> = HashSet::new();
    for transitions in outgoing.values() {
        for t in transitions {
            propagate_up(t.output(), t.input(), &mut entered);
        }
    }
    for state in states.values() {
        if state.qualified_name() == start.qualified_name() {
            continue;
        }
        if let Some(es) = error_state {
            if state.qualified_name() == es.qualified_name() {
                continue;
            }
        }
        if !entered.contains(state.qualified_name()) {
            return Err(ConfigurationError::Unreachable(
                state.qualified_name().to_string(),
            ));
        }
    }
    Ok(())
}

fn check_liveness<En>(
    states: &HashMap<String, StateRef<En>>,
    outgoing: &HashMap<String, Vec<Transition<En>>>,
    _error_state: Option<&StateRef<En>>,
) -> Result<(), ConfigurationError> {
    let mut has_outbound: HashSet<String> = HashSet::new();
    for transitions in outgoing.values() {
        for t in transitions {
            propagate_up(t.input(), t.output(), &mut has_outbound);
        }
    }
    for state in states.values() {
        if state.kind() == StateKind::End {
            continue;
        }
        let inherited = state
            .ancestors()
            .iter()
            .rev()
            .any(|a| has_outbound.contains(a.qualified_name()));
        if !inherited {
            return Err(ConfigurationError::DeadEnd(
                state.qualified_name().to_string(),
            ));
        }
    }
    Ok(())
}

/// The frozen, validated state→transitions graph. Immutable and safely
/// shared (via `Arc`) across any number of
/// [`crate::machine::StateMachine`] instances.
pub struct TransitionMap<En> {
    states: HashMap<String, StateRef<En>>,
    outgoing: HashMap<String, Vec<Transition<En>>>,
    start: StateRef<En>,
    error_state: Option<StateRef<En>>,
}

impl<En> TransitionMap<En> {
    pub fn start(&self) -> &StateRef<En> {
        &self.start
    }

    pub fn error_state(&self) -> Option<&StateRef<En>> {
        self.error_state.as_ref()
    }

    pub fn state(&self, qualified_name: &str) -> Option<&StateRef<En>> {
        self.states.get(qualified_name)
    }

    /// Walks `state`'s ancestor chain upward, consulting each level's
    /// transition list in insertion order, and returns the first transition
    /// whose guard accepts. spec.md §4.3.
    pub fn next_transition(
        &self,
        state: &StateRef<En>,
        event: &dyn Event,
        entity: &En,
    ) -> Result<&Transition<En>, TransitionNotFound> {
        let mut any_levels = false;
        let mut cur = Some(state.clone());
        while let Some(level) = cur {
            if let Some(list) = self.outgoing.get(level.qualified_name()) {
                if !list.is_empty() {
                    any_levels = true;
                    for t in list {
                        if t.guard().accept(event, entity, state) {
                            return Ok(t);
                        }
                    }
                }
            }
            cur = level.parent().cloned();
        }
        if any_levels {
            Err(TransitionNotFound::NoMatchingTransition(
                state.qualified_name().to_string(),
            ))
        } else {
            Err(TransitionNotFound::NoExitTransitions(
                state.qualified_name().to_string(),
            ))
        }
    }
}
