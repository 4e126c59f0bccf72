//! Integration tests for the seven end-to-end scenarios in spec.md §8,
//! one `#[test]` per scenario.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fsm_engine::action::{Action, ActionError, ActionKind};
use fsm_engine::dispatcher::EventDispatcher;
use fsm_engine::event::{Event, TypedEvent};
use fsm_engine::guard::{Always, RegexMatch};
use fsm_engine::machine::StateMachine;
use fsm_engine::map::TransitionMapBuilder;
use fsm_engine::state::{State, StateRef};
use fsm_engine::transition::Transition;

struct NoEntity;

/// Scenario 1: linear graph S(START) -> A(ACTIVE) -> E(END).
#[test]
fn linear_graph_reaches_end() {
    let s = State::<NoEntity>::start("S").build();
    let a = State::active("A").build();
    let e = State::end("E").build();

    let mut b = TransitionMapBuilder::new();
    b.add_state(s.clone()).unwrap();
    b.add_state(a.clone()).unwrap();
    b.add_state(e.clone()).unwrap();
    b.add_transition(Transition::new("s->a", Arc::new(Always), s, a.clone(), None))
        .unwrap();
    b.add_transition(Transition::new(
        "a->e",
        Arc::new(RegexMatch::<NoEntity>::new("^done$").unwrap()),
        a,
        e,
        None,
    ))
    .unwrap();
    let machine = StateMachine::new(Arc::new(b.build().unwrap()), NoEntity);

    machine.apply_event(&TypedEvent::new("x".to_string())).unwrap();
    assert_eq!(machine.get_state().qualified_name(), "A");
    machine.apply_event(&TypedEvent::new("done".to_string())).unwrap();
    assert_eq!(machine.get_state().qualified_name(), "E");
    assert!(machine.is_end());
}

/// Scenario 2: a regex guard only accepts a fully-anchored match.
#[test]
fn regex_guard_requires_full_match() {
    let s = State::<NoEntity>::start("S").build();
    let e = State::end("E").build();
    let mut b = TransitionMapBuilder::new();
    b.add_state(s.clone()).unwrap();
    b.add_state(e.clone()).unwrap();
    b.add_transition(Transition::new(
        "s->e",
        Arc::new(RegexMatch::<NoEntity>::new("^foo.*").unwrap()),
        s,
        e,
        None,
    ))
    .unwrap();
    let machine = StateMachine::new(Arc::new(b.build().unwrap()), NoEntity);

    machine
        .apply_event(&TypedEvent::new("foobar".to_string()))
        .unwrap();
    assert_eq!(machine.get_state().qualified_name(), "E");

    // Fresh machine: "bar" never matches the anchored pattern.
    let mut b2 = TransitionMapBuilder::new();
    let s2 = State::<NoEntity>::start("S").build();
    let e2 = State::end("E").build();
    b2.add_state(s2.clone()).unwrap();
    b2.add_state(e2.clone()).unwrap();
    b2.add_transition(Transition::new(
        "s->e",
        Arc::new(RegexMatch::<NoEntity>::new("^foo.*").unwrap()),
        s2,
        e2,
        None,
    ))
    .unwrap();
    let machine2 = StateMachine::new(Arc::new(b2.build().unwrap()), NoEntity);
    let err = machine2
        .apply_event(&TypedEvent::new("bar".to_string()))
        .unwrap_err();
    assert!(matches!(
        err,
        fsm_engine::error::MachineError::NoTransition(
            fsm_engine::error::TransitionNotFound::NoMatchingTransition(_)
        )
    ));
}

struct Recording {
    log: Arc<std::sync::Mutex<Vec<String>>>,
    label: &'static str,
}

impl Action<NoEntity> for Recording {
    fn perform(
        &self,
        _event: &dyn Event,
        _entity: &NoEntity,
        _transition: &Transition<NoEntity>,
        _kind: ActionKind,
    ) -> Result<(), ActionError> {
        self.log.lock().unwrap().push(self.label.to_string());
        Ok(())
    }
}

/// Scenario 3: hierarchical entry/exit within a shared parent; the
/// parent's own entry/exit never fire for an internal move.
#[test]
fn hierarchical_entry_exit_within_shared_parent() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let p = State::<NoEntity>::start("P").build();
    let c1 = State::active("C1")
        .parent(&p)
        .exit_action(Recording {
            log: log.clone(),
            label: "exit:C1",
        })
        .build();
    let c2 = State::active("C2")
        .parent(&p)
        .entry_action(Recording {
            log: log.clone(),
            label: "entry:C2",
        })
        .build();
    let e = State::end("E").parent(&p).build();

    let mut b = TransitionMapBuilder::new();
    b.add_state(p).unwrap();
    b.add_state(c1.clone()).unwrap();
    b.add_state(c2.clone()).unwrap();
    b.add_state(e.clone()).unwrap();
    b.add_transition(Transition::new(
        "c1->c2",
        Arc::new(Always),
        c1,
        c2.clone(),
        Some(Arc::new(Recording {
            log: log.clone(),
            label: "transition",
        })),
    ))
    .unwrap();
    b.add_transition(Transition::new("c2->e", Arc::new(Always), c2, e, None))
        .unwrap();
    let machine = StateMachine::new(Arc::new(b.build().unwrap()), NoEntity);

    machine.apply_event(&TypedEvent::new(())).unwrap();
    assert_eq!(
        log.lock().unwrap().clone(),
        vec!["exit:C1", "transition", "entry:C2"]
    );
}

/// Scenario 4: a transition with no shared parent fires the full exit and
/// entry chains.
#[test]
fn cross_parent_transition_fires_full_chains() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let root = State::<NoEntity>::start("Root").build();
    let p1 = State::active("P1")
        .parent(&root)
        .exit_action(Recording {
            log: log.clone(),
            label: "exit:P1",
        })
        .build();
    let p2 = State::active("P2")
        .parent(&root)
        .entry_action(Recording {
            log: log.clone(),
            label: "entry:P2",
        })
        .build();
    let c1 = State::active("C1")
        .parent(&p1)
        .exit_action(Recording {
            log: log.clone(),
            label: "exit:C1",
        })
        .build();
    let c2 = State::active("C2")
        .parent(&p2)
        .entry_action(Recording {
            log: log.clone(),
            label: "entry:C2",
        })
        .build();
    let e = State::end("E").parent(&p2).build();

    let mut b = TransitionMapBuilder::new();
    b.add_state(root).unwrap();
    b.add_state(p1).unwrap();
    b.add_state(p2).unwrap();
    b.add_state(c1.clone()).unwrap();
    b.add_state(c2.clone()).unwrap();
    b.add_state(e.clone()).unwrap();
    b.add_transition(Transition::new(
        "c1->c2",
        Arc::new(Always),
        c1,
        c2.clone(),
        Some(Arc::new(Recording {
            log: log.clone(),
            label: "transition",
        })),
    ))
    .unwrap();
    b.add_transition(Transition::new("c2->e", Arc::new(Always), c2, e, None))
        .unwrap();
    let machine = StateMachine::new(Arc::new(b.build().unwrap()), NoEntity);

    machine.apply_event(&TypedEvent::new(())).unwrap();
    assert_eq!(
        log.lock().unwrap().clone(),
        vec!["exit:C1", "exit:P1", "transition", "entry:P2", "entry:C2"]
    );
}

struct FailingAction;
impl Action<NoEntity> for FailingAction {
    fn perform(
        &self,
        _event: &dyn Event,
        _entity: &NoEntity,
        _transition: &Transition<NoEntity>,
        _kind: ActionKind,
    ) -> Result<(), ActionError> {
        Err(ActionError::failure(std::io::Error::other("boom")))
    }
}

/// Scenario 5: a `TransitionFailure` redirects to the error state, fires
/// its entry action, notifies listeners exactly once, and rethrows.
#[test]
fn transition_failure_redirects_to_error_state() {
    let s = State::<NoEntity>::start("S").build();
    let a = State::active("A").build();
    let err_state = State::active("Err").build();
    let e = State::end("E").build();

    let mut b = TransitionMapBuilder::new();
    b.add_state(s.clone()).unwrap();
    b.add_state(a.clone()).unwrap();
    b.add_state(err_state.clone()).unwrap();
    b.add_state(e.clone()).unwrap();
    b.add_transition(Transition::new(
        "s->a",
        Arc::new(Always),
        s,
        a.clone(),
        Some(Arc::new(FailingAction)),
    ))
    .unwrap();
    b.add_transition(Transition::new("a->e", Arc::new(Always), a, e.clone(), None))
        .unwrap();
    b.add_transition(Transition::new(
        "err->e",
        Arc::new(Always),
        err_state.clone(),
        e,
        None,
    ))
    .unwrap();
    b.set_error_state(err_state.clone()).unwrap();
    let machine = StateMachine::new(Arc::new(b.build().unwrap()), NoEntity);

    let notifications = Arc::new(AtomicUsize::new(0));
    let notifications2 = notifications.clone();
    machine.add_listener(Arc::new(
        move |_: &NoEntity, _old: &StateRef<NoEntity>, _new: &StateRef<NoEntity>| {
            notifications2.fetch_add(1, Ordering::SeqCst);
        },
    ));

    let result = machine.apply_event(&TypedEvent::new(()));
    assert!(matches!(
        result,
        Err(fsm_engine::error::MachineError::TransitionFailure(_))
    ));
    assert_eq!(machine.get_state().qualified_name(), "Err");
    assert_eq!(notifications.load(Ordering::SeqCst), 1);
}

/// Scenario 6: an out-of-band event cancels every queued and the running
/// normal request, then runs to completion on its own.
#[test]
fn dispatcher_out_of_band_cancels_everything_queued_and_running() {
    struct Sleepy(Duration);
    impl Action<NoEntity> for Sleepy {
        fn perform(
            &self,
            _event: &dyn Event,
            _entity: &NoEntity,
            _transition: &Transition<NoEntity>,
            _kind: ActionKind,
        ) -> Result<(), ActionError> {
            std::thread::sleep(self.0);
            Ok(())
        }
    }

    let s = State::<NoEntity>::start("S").build();
    let e = State::end("E").build();
    let mut b = TransitionMapBuilder::new();
    b.add_state(s.clone()).unwrap();
    b.add_state(e.clone()).unwrap();
    b.add_transition(Transition::new(
        "loop",
        Arc::new(Always),
        s.clone(),
        s.clone(),
        Some(Arc::new(Sleepy(Duration::from_millis(100)))),
    ))
    .unwrap();
    b.add_transition(Transition::new(
        "to-e",
        Arc::new(fsm_engine::guard::Negation::new(Arc::new(Always))),
        s,
        e,
        None,
    ))
    .unwrap();
    let machine = StateMachine::new(Arc::new(b.build().unwrap()), NoEntity);
    let dispatcher = EventDispatcher::new(machine.clone());
    dispatcher.start("scenario-6");

    let running = dispatcher.put(Box::new(TypedEvent::new(())));
    std::thread::sleep(Duration::from_millis(20));
    let queued_a = dispatcher.put(Box::new(TypedEvent::new(())));
    let queued_b = dispatcher.put(Box::new(TypedEvent::new(())));

    let oob = dispatcher.put(Box::new(TypedEvent::out_of_band(())));

    assert!(queued_a.get().cancelled);
    assert!(queued_b.get().cancelled);
    assert!(running.get().cancelled);
    assert!(oob.get().successful);

    dispatcher.stop();
}

/// Scenario 7: a latch returns the expected state, or the error state
/// when `end_on_error` is set.
#[test]
fn latch_resolves_on_expected_state_and_on_error_state() {
    let s = State::<NoEntity>::start("S").build();
    let a = State::active("A").build();
    let e = State::end("E").build();
    let mut b = TransitionMapBuilder::new();
    b.add_state(s.clone()).unwrap();
    b.add_state(a.clone()).unwrap();
    b.add_state(e.clone()).unwrap();
    b.add_transition(Transition::new("s->a", Arc::new(Always), s, a.clone(), None))
        .unwrap();
    b.add_transition(Transition::new("a->e", Arc::new(Always), a, e.clone(), None))
        .unwrap();
    let machine = StateMachine::new(Arc::new(b.build().unwrap()), NoEntity);

    let latch = machine.create_state_transition_latch(e.clone(), true);
    let worker = machine.clone();
    let handle = std::thread::spawn(move || {
        worker.apply_event(&TypedEvent::new(())).unwrap();
        worker.apply_event(&TypedEvent::new(())).unwrap();
    });
    let result = latch.call().unwrap();
    assert_eq!(result.qualified_name(), "E");
    assert!(latch.is_expected());
    assert!(!latch.is_error());
    handle.join().unwrap();

    // Variant: drive to the error state instead.
    let s2 = State::<NoEntity>::start("S").build();
    let err_state = State::active("Err").build();
    let e2 = State::end("E").build();
    let mut b2 = TransitionMapBuilder::new();
    b2.add_state(s2.clone()).unwrap();
    b2.add_state(err_state.clone()).unwrap();
    b2.add_state(e2.clone()).unwrap();
    b2.add_transition(Transition::new(
        "s->a",
        Arc::new(Always),
        s2,
        err_state.clone(),
        Some(Arc::new(FailingAction)),
    ))
    .unwrap();
    b2.add_transition(Transition::new(
        "err->e",
        Arc::new(Always),
        err_state.clone(),
        e2.clone(),
        None,
    ))
    .unwrap();
    b2.set_error_state(err_state).unwrap();
    let machine2 = StateMachine::new(Arc::new(b2.build().unwrap()), NoEntity);
    let latch2 = machine2.create_state_transition_latch(e2, true);
    let _ = machine2.apply_event(&TypedEvent::new(()));
    let result2 = latch2.call().unwrap();
    assert!(latch2.is_error());
    assert!(!latch2.is_expected());
    assert_eq!(result2.qualified_name(), "Err");
}
