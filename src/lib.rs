//! A hierarchical finite-state-machine engine with guarded transitions,
//! least-common-ancestor action firing, and an asynchronous event
//! dispatcher.
//!
//! # Modules
//!
//! - [`state`] / [`transition`] / [`guard`] / [`action`] — the immutable
//!   value types that describe a state graph (C1/C2).
//! - [`map`] — [`map::TransitionMapBuilder`], which validates the graph
//!   (reachability, liveness) and freezes it into a [`map::TransitionMap`]
//!   (C3).
//! - [`machine`] — [`machine::StateMachine`], the single-writer transition
//!   engine: event matching, hierarchical entry/exit firing, error-state
//!   fallback, forward chaining, listener notification (C4).
//! - [`dispatcher`] — [`dispatcher::EventDispatcher`], off-thread
//!   serialized event delivery with futures, cancellation, and
//!   out-of-band preemption (C5).
//! - [`latch`] — [`latch::StateTransitionLatch`], a blocking waiter for a
//!   named target state (C6).
//! - [`error`] — the error taxonomy raised by the above.
//! - [`listener`] — the `StateChangeListener` contract.
//! - [`event`] — the `Event` contract and the bundled [`event::TypedEvent`].
//!
//! # How to use fsm-engine
//!
//! ```rust
//! use fsm_engine::action::ActionKind;
//! use fsm_engine::event::TypedEvent;
//! use fsm_engine::guard::{Always, RegexMatch};
//! use fsm_engine::machine::StateMachine;
//! use fsm_engine::map::TransitionMapBuilder;
//! use fsm_engine::state::State;
//! use fsm_engine::transition::Transition;
//! use std::sync::Arc;
//!
//! struct Order {
//!     id: String,
//! }
//!
//! let new = State::<Order>::start("New").build();
//! let paid = State::<Order>::active("Paid").build();
//! let shipped = State::<Order>::end("Shipped").build();
//!
//! let mut builder = TransitionMapBuilder::new();
//! builder.add_state(new.clone()).unwrap();
//! builder.add_state(paid.clone()).unwrap();
//! builder.add_state(shipped.clone()).unwrap();
//! builder
//!     .add_transition(Transition::new("pay", Arc::new(Always), new, paid.clone(), None))
//!     .unwrap();
//! builder
//!     .add_transition(Transition::new(
//!         "ship",
//!         Arc::new(RegexMatch::<Order>::new("^ship$").unwrap()),
//!         paid,
//!         shipped,
//!         Some(Arc::new(|_e: &dyn fsm_engine::event::Event, o: &Order, _t: &Transition<Order>, _k: ActionKind| {
//!             println!("shipping order {}", o.id);
//!             Ok(())
//!         })),
//!     ))
//!     .unwrap();
//! let map = Arc::new(builder.build().unwrap());
//!
//! let machine = StateMachine::new(map, Order { id: "ORD-1".to_string() });
//! machine.apply_event(&TypedEvent::new(())).unwrap();
//! machine.apply_event(&TypedEvent::new("ship".to_string())).unwrap();
//! assert!(machine.is_end());
//! ```

pub mod action;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod guard;
pub mod latch;
pub mod listener;
pub mod machine;
pub mod map;
pub mod state;
pub mod transition;
