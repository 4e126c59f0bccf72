use std::sync::Arc;

use crate::action::Action;
use crate::guard::Guard;
use crate::state::StateRef;

/// An immutable directed edge in the state graph: `input --guard--> output`,
/// optionally firing `action` with [`crate::action::ActionKind::Transition`].
///
/// Both endpoints must have been registered in the same
/// [`crate::map::TransitionMapBuilder`] before the transition is added.
pub struct Transition<En> {
    name: String,
    guard: Arc<dyn Guard<En>>,
    input: StateRef<En>,
    output: StateRef<En>,
    action: Option<Arc<dyn Action<En>>>,
}

impl<En> Transition<En> {
    pub fn new(
        name: impl Into<String>,
        guard: Arc<dyn Guard<En>>,
        input: StateRef<En>,
        output: StateRef<En>,
        action: Option<Arc<dyn Action<En>>>,
    ) -> Self {
        Transition {
            name: name.into(),
            guard,
            input,
            output,
            action,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn guard(&self) -> &Arc<dyn Guard<En>> {
        &self.guard
    }

    pub fn input(&self) -> &StateRef<En> {
        &self.input
    }

    pub fn output(&self) -> &StateRef<En> {
        &self.output
    }

    pub fn action(&self) -> Option<&Arc<dyn Action<En>>> {
        self.action.as_ref()
    }
}

impl<En> Clone for Transition<En> {
    fn clone(&self) -> Self {
        Transition {
            name: self.name.clone(),
            guard: self.guard.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            action: self.action.clone(),
        }
    }
}
