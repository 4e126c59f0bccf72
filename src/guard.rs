use std::marker::PhantomData;
use std::sync::Arc;

use regex::Regex;

use crate::event::Event;
use crate::state::StateRef;

/// A side-effect-free predicate over `(event, entity, current_state)`.
///
/// Guards are consulted in insertion order by
/// [`crate::map::TransitionMap::next_transition`]; the first one that
/// accepts wins. They must be pure and fast — they run inside the
/// machine's monitor (spec.md §3/§5).
pub trait Guard<En>: Send + Sync {
    fn accept(&self, event: &dyn Event, entity: &En, state: &StateRef<En>) -> bool;
}

impl<En, F> Guard<En> for F
where
    F: Fn(&dyn Event, &En, &StateRef<En>) -> bool + Send + Sync,
{
    fn accept(&self, event: &dyn Event, entity: &En, state: &StateRef<En>) -> bool {
        (self)(event, entity, state)
    }
}

/// Always accepts.
pub struct Always;

impl<En> Guard<En> for Always {
    fn accept(&self, _event: &dyn Event, _entity: &En, _state: &StateRef<En>) -> bool {
        true
    }
}

/// Accepts iff the wrapped guard rejects.
pub struct Negation<En> {
    inner: Arc<dyn Guard<En>>,
}

impl<En> Negation<En> {
    pub fn new(inner: Arc<dyn Guard<En>>) -> Self {
        Negation { inner }
    }
}

impl<En> Guard<En> for Negation<En> {
    fn accept(&self, event: &dyn Event, entity: &En, state: &StateRef<En>) -> bool {
        !self.inner.accept(event, entity, state)
    }
}

/// Accepts iff the event's dynamic type is exactly `T`. Matches by the
/// event object's own type, never its payload — see [`crate::event::Event`].
pub struct TypeOf<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypeOf<T> {
    pub fn new() -> Self {
        TypeOf {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypeOf<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<En, T: 'static> Guard<En> for TypeOf<T> {
    fn accept(&self, event: &dyn Event, _entity: &En, _state: &StateRef<En>) -> bool {
        event.as_any().is::<T>()
    }
}

/// Accepts iff the event's payload is a `String` that fully matches the
/// given pattern (anchored at both ends — a substring match does not
/// count, per spec.md §4.2). The pattern is wrapped in `\A(?:...)\z` at
/// compile time so alternation (`a|abc`) is anchored as a whole rather
/// than leftmost-branch-first, which `Regex::find` alone would get wrong.
pub struct RegexMatch<En> {
    pattern: Regex,
    _marker: PhantomData<fn() -> En>,
}

impl<En> RegexMatch<En> {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(RegexMatch {
            pattern: Regex::new(&format!(r"\A(?:{})\z", pattern))?,
            _marker: PhantomData,
        })
    }
}

impl<En> Guard<En> for RegexMatch<En> {
    fn accept(&self, event: &dyn Event, _entity: &En, _state: &StateRef<En>) -> bool {
        let payload = match event.payload() {
            Some(p) => p,
            None => return false,
        };
        let text = match payload.downcast_ref::<String>() {
            Some(s) => s.as_str(),
            None => return false,
        };
        self.pattern.is_match(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TypedEvent;
    use crate::state::State;

    struct Ctx;

    fn any_state() -> StateRef<Ctx> {
        State::active("S").build()
    }

    #[test]
    fn always_accepts() {
        let g = Always;
        let e = TypedEvent::new(());
        assert!(g.accept(&e, &Ctx, &any_state()));
    }

    #[test]
    fn negation_flips_inner() {
        let g = Negation::new(Arc::new(Always) as Arc<dyn Guard<Ctx>>);
        let e = TypedEvent::new(());
        assert!(!g.accept(&e, &Ctx, &any_state()));
    }

    #[derive(Debug)]
    struct Ping;
    #[derive(Debug)]
    struct Pong;

    #[test]
    fn type_of_matches_dynamic_type_not_payload() {
        let g = TypeOf::<TypedEvent<Ping>>::new();
        let ping = TypedEvent::new(Ping);
        let pong = TypedEvent::new(Pong);
        assert!(Guard::<Ctx>::accept(&g, &ping, &Ctx, &any_state()));
        assert!(!Guard::<Ctx>::accept(&g, &pong, &Ctx, &any_state()));
    }

    #[test]
    fn regex_requires_full_match() {
        let g = RegexMatch::<Ctx>::new("^foo.*").unwrap();
        let full = TypedEvent::new("foobar".to_string());
        assert!(g.accept(&full, &Ctx, &any_state()));

        let not_foo = TypedEvent::new("barfoo".to_string());
        assert!(!g.accept(&not_foo, &Ctx, &any_state()));
    }

    #[test]
    fn regex_rejects_non_string_payload() {
        let g = RegexMatch::<Ctx>::new(".*").unwrap();
        let e = TypedEvent::new(7u32);
        assert!(!g.accept(&e, &Ctx, &any_state()));
    }
}
