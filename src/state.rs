use std::fmt;
use std::sync::Arc;

use crate::action::Action;

/// The three kinds a [`State`] can take on.
///
/// A map must have exactly one [`StateKind::Start`] state and at least one
/// [`StateKind::End`] state; everything else is [`StateKind::Active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Start,
    Active,
    End,
}

/// An immutable node in the hierarchical state graph.
///
/// States are created by client code and handed to a [`crate::map::TransitionMapBuilder`];
/// they are never mutated afterward. Two states are the same state iff their
/// qualified names match — `PartialEq`/`Eq`/`Hash` are all qualified-name
/// based, matching spec.md §3's "Equality is qualified-name equality."
///
/// The parent/child graph is represented with a parent pointer only: each
/// state holds an `Arc` to its parent, and the full ancestor chain
/// (root..=self) is precomputed once at construction. Nothing stores a
/// reverse child list — validators that need children derive them by
/// scanning the frozen map, which avoids `Weak`-pointer bookkeeping for a
/// graph that is immutable from the moment it's built.
pub struct State<En> {
    base_name: String,
    qualified_name: String,
    kind: StateKind,
    parent: Option<StateRef<En>>,
    ancestors: Vec<StateRef<En>>,
    pub(crate) entry_action: Option<Arc<dyn Action<En>>>,
    pub(crate) exit_action: Option<Arc<dyn Action<En>>>,
}

/// Shared handle to a [`State`]. States are always passed around behind an
/// `Arc` once constructed, since the same state is referenced by many
/// transitions and by the machine's current-state pointer.
pub type StateRef<En> = Arc<State<En>>;

impl<En> State<En> {
    /// Start a fluent builder for a [`StateKind::Start`] state.
    pub fn start(name: impl Into<String>) -> StateBuilder<En> {
        StateBuilder::new(name, StateKind::Start)
    }

    /// Start a fluent builder for a [`StateKind::Active`] state.
    pub fn active(name: impl Into<String>) -> StateBuilder<En> {
        StateBuilder::new(name, StateKind::Active)
    }

    /// Start a fluent builder for a [`StateKind::End`] state.
    pub fn end(name: impl Into<String>) -> StateBuilder<En> {
        StateBuilder::new(name, StateKind::End)
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn parent(&self) -> Option<&StateRef<En>> {
        self.parent.as_ref()
    }

    /// The ancestor chain from the root down to and including `self`.
    pub fn ancestors(&self) -> &[StateRef<En>] {
        &self.ancestors
    }

    pub fn depth(&self) -> usize {
        self.ancestors.len() - 1
    }

    /// `true` iff `self` is `other` or a descendant of `other`.
    pub fn is_substate_of(&self, other: &State<En>) -> bool {
        self.ancestors
            .iter()
            .any(|a| a.qualified_name == other.qualified_name)
    }

    /// The deepest state that is an ancestor of (or equal to) both `a` and `b`.
    ///
    /// Walks both ancestor chains from the root; the chains are identical up
    /// to the point where the states diverge, so the LCA is the last state
    /// at which they still agree. Returns `None` only if `a` and `b` have no
    /// common root, which cannot happen within a single `TransitionMap`.
    pub fn least_common_ancestor(a: &StateRef<En>, b: &StateRef<En>) -> Option<StateRef<En>> {
        let mut lca = None;
        for (x, y) in a.ancestors.iter().zip(b.ancestors.iter()) {
            if x.qualified_name == y.qualified_name {
                lca = Some(x.clone());
            } else {
                break;
            }
        }
        lca
    }
}

impl<En> fmt::Debug for State<En> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("qualified_name", &self.qualified_name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl<En> PartialEq for State<En> {
    fn eq(&self, other: &Self) -> bool {
        self.qualified_name == other.qualified_name
    }
}

impl<En> Eq for State<En> {}

impl<En> std::hash::Hash for State<En> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.qualified_name.hash(state);
    }
}

/// Fluent builder for a single [`State`]. Mirrors the teacher's
/// `ExternalTransitionBuilder` style: a chain of setters terminating in
/// `build()`.
pub struct StateBuilder<En> {
    base_name: String,
    kind: StateKind,
    parent: Option<StateRef<En>>,
    entry_action: Option<Arc<dyn Action<En>>>,
    exit_action: Option<Arc<dyn Action<En>>>,
}

impl<En> StateBuilder<En> {
    fn new(name: impl Into<String>, kind: StateKind) -> Self {
        StateBuilder {
            base_name: name.into(),
            kind,
            parent: None,
            entry_action: None,
            exit_action: None,
        }
    }

    pub fn parent(mut self, parent: &StateRef<En>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn entry_action(mut self, action: impl Action<En> + 'static) -> Self {
        self.entry_action = Some(Arc::new(action));
        self
    }

    pub fn exit_action(mut self, action: impl Action<En> + 'static) -> Self {
        self.exit_action = Some(Arc::new(action));
        self
    }

    pub fn build(self) -> StateRef<En> {
        let qualified_name = match &self.parent {
            Some(p) => format!("{}:{}", p.qualified_name, self.base_name),
            None => self.base_name.clone(),
        };
        let mut ancestors: Vec<StateRef<En>> = match &self.parent {
            Some(p) => p.ancestors.clone(),
            None => Vec::new(),
        };
        let placeholder = Arc::new(State {
            base_name: self.base_name,
            qualified_name,
            kind: self.kind,
            parent: self.parent,
            ancestors: Vec::new(),
            entry_action: self.entry_action,
            exit_action: self.exit_action,
        });
        ancestors.push(placeholder.clone());
        // `ancestors` must include `self`, which only exists once the `Arc`
        // above is built; rebuild once with the completed chain rather than
        // giving `State` any interior mutability.
        Arc::new(State {
            base_name: placeholder.base_name.clone(),
            qualified_name: placeholder.qualified_name.clone(),
            kind: placeholder.kind,
            parent: placeholder.parent.clone(),
            ancestors,
            entry_action: placeholder.entry_action.clone(),
            exit_action: placeholder.exit_action.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx;

    #[test]
    fn qualified_names_nest_with_colon() {
        let root: StateRef<Ctx> = State::active("P").build();
        let child: StateRef<Ctx> = State::active("C").parent(&root).build();
        assert_eq!(root.qualified_name(), "P");
        assert_eq!(child.qualified_name(), "P:C");
    }

    #[test]
    fn ancestor_chain_is_root_to_self() {
        let root: StateRef<Ctx> = State::active("P").build();
        let mid: StateRef<Ctx> = State::active("M").parent(&root).build();
        let leaf: StateRef<Ctx> = State::active("L").parent(&mid).build();
        let names: Vec<_> = leaf.ancestors().iter().map(|s| s.qualified_name()).collect();
        assert_eq!(names, vec!["P", "P:M", "P:M:L"]);
        assert_eq!(leaf.depth(), 2);
    }

    #[test]
    fn is_substate_of_walks_parents() {
        let root: StateRef<Ctx> = State::active("P").build();
        let child: StateRef<Ctx> = State::active("C").parent(&root).build();
        assert!(child.is_substate_of(&root));
        assert!(child.is_substate_of(&child));
        assert!(!root.is_substate_of(&child));
    }

    #[test]
    fn lca_is_deepest_shared_ancestor() {
        let root: StateRef<Ctx> = State::active("P").build();
        let p1: StateRef<Ctx> = State::active("P1").parent(&root).build();
        let p2: StateRef<Ctx> = State::active("P2").parent(&root).build();
        let c1: StateRef<Ctx> = State::active("C1").parent(&p1).build();
        let c2: StateRef<Ctx> = State::active("C2").parent(&p2).build();

        let lca = State::least_common_ancestor(&c1, &c2).unwrap();
        assert_eq!(lca.qualified_name(), "P");

        let lca_self = State::least_common_ancestor(&c1, &c1).unwrap();
        assert_eq!(lca_self.qualified_name(), "P1:C1");

        let lca_parent_child = State::least_common_ancestor(&p1, &c1).unwrap();
        assert_eq!(lca_parent_child.qualified_name(), "P1");
    }

    #[test]
    fn equality_and_hash_are_qualified_name_based() {
        use std::collections::HashSet;
        let root: StateRef<Ctx> = State::active("P").build();
        let a: StateRef<Ctx> = State::active("C").parent(&root).build();
        let b: StateRef<Ctx> = State::active("C").parent(&root).build();
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a.qualified_name().to_string());
        assert!(set.contains(b.qualified_name()));
    }
}
