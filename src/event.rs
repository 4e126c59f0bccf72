use std::any::Any;
use std::fmt::Debug;

/// A message delivered to a [`crate::machine::StateMachine`].
///
/// Identity is by dynamic type plus payload: the built-in [`crate::guard::TypeOf`]
/// guard matches on the event's own dynamic type (via [`Event::as_any`]), not
/// on its payload, while [`crate::guard::RegexMatch`] inspects the payload.
/// The engine itself never inspects the payload except through a guard.
///
/// Implement this for each distinct kind of event your state machine
/// reacts to, or use the bundled [`TypedEvent`] for simple cases.
pub trait Event: Debug + Send + Sync {
    /// Used by [`crate::guard::TypeOf`] to downcast to a concrete event type.
    /// Implementations should simply return `self`.
    fn as_any(&self) -> &dyn Any;

    /// The event's payload, if any. The engine never reads this directly;
    /// it is only consulted by guards such as [`crate::guard::RegexMatch`].
    fn payload(&self) -> Option<&dyn Any> {
        None
    }

    /// `true` if [`crate::dispatcher::EventDispatcher::put`] should route this
    /// event to `put_out_of_band` instead of the normal FIFO queue.
    fn is_out_of_band(&self) -> bool {
        false
    }
}

/// A ready-to-use [`Event`] implementation carrying a typed payload.
///
/// `TypedEvent<String>` and `TypedEvent<()>` cover most needs directly; for
/// events that must be distinguishable from each other purely by dynamic
/// type (for [`crate::guard::TypeOf`]), define small marker payload types
/// (e.g. `struct Start;`, `struct Stop;`) and use `TypedEvent<Start>`,
/// `TypedEvent<Stop>`.
#[derive(Debug, Clone)]
pub struct TypedEvent<P: 'static> {
    payload: P,
    out_of_band: bool,
}

impl<P: Debug + Send + Sync + 'static> TypedEvent<P> {
    pub fn new(payload: P) -> Self {
        TypedEvent {
            payload,
            out_of_band: false,
        }
    }

    /// Build an event that preempts the dispatcher's queue and any
    /// currently-running event. See spec.md §4.5/§5.
    pub fn out_of_band(payload: P) -> Self {
        TypedEvent {
            payload,
            out_of_band: true,
        }
    }

    pub fn payload_ref(&self) -> &P {
        &self.payload
    }
}

impl<P: Debug + Send + Sync + 'static> Event for TypedEvent<P> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn payload(&self) -> Option<&dyn Any> {
        Some(&self.payload)
    }

    fn is_out_of_band(&self) -> bool {
        self.out_of_band
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_event_payload_downcasts() {
        let e = TypedEvent::new("done".to_string());
        let payload = e.payload().unwrap().downcast_ref::<String>().unwrap();
        assert_eq!(payload, "done");
        assert!(!e.is_out_of_band());
    }

    #[test]
    fn out_of_band_constructor_sets_flag() {
        let e = TypedEvent::out_of_band(42u32);
        assert!(e.is_out_of_band());
    }

    #[derive(Debug)]
    struct Start;
    #[derive(Debug)]
    struct Stop;

    #[test]
    fn distinct_payload_types_are_distinct_dynamic_types() {
        let a = TypedEvent::new(Start);
        let b = TypedEvent::new(Stop);
        assert!(a.as_any().downcast_ref::<TypedEvent<Start>>().is_some());
        assert!(a.as_any().downcast_ref::<TypedEvent<Stop>>().is_none());
        assert!(b.as_any().downcast_ref::<TypedEvent<Stop>>().is_some());
    }
}
