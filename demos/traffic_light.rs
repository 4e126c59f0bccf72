//! Real-world example: a traffic light intersection controller built on
//! `fsm_engine`, showing hierarchical states (the normal Red/Yellow/Green
//! cycle nested under `Operating`), a cross-parent transition into an
//! unrelated `Emergency` state (least-common-ancestor is `None`, so the
//! full ancestor chains fire — see spec.md §4.4 step 6), guards dispatched
//! by event type rather than payload, and a transition group used for a
//! pedestrian-request self-loop.

use std::sync::Arc;
use std::time::Duration;

use fsm_engine::action::ActionKind;
use fsm_engine::dispatcher::EventDispatcher;
use fsm_engine::event::{Event, TypedEvent};
use fsm_engine::guard::TypeOf;
use fsm_engine::machine::StateMachine;
use fsm_engine::map::{TransitionMap, TransitionMapBuilder};
use fsm_engine::state::{State, StateRef};
use fsm_engine::transition::Transition;

#[derive(Debug)]
struct Intersection {
    name: String,
}

#[derive(Debug)]
struct Timer;
#[derive(Debug)]
struct EmergencyVehicleDetected;
#[derive(Debug)]
struct EmergencyCleared;
#[derive(Debug)]
struct MaintenanceMode;
#[derive(Debug)]
struct NormalMode;
#[derive(Debug)]
struct PedestrianRequest;
#[derive(Debug)]
struct Shutdown;

fn build_map() -> (Arc<TransitionMap<Intersection>>, StateRef<Intersection>) {
    let init = State::<Intersection>::start("Init").build();

    let operating = State::active("Operating")
        .entry_action(log_entry("Operating"))
        .exit_action(log_exit("Operating"))
        .build();
    let red = State::active("Red").parent(&operating).build();
    let green = State::active("Green").parent(&operating).build();
    let yellow = State::active("Yellow").parent(&operating).build();

    let maintenance = State::active("Maintenance")
        .entry_action(log_entry("Maintenance"))
        .exit_action(log_exit("Maintenance"))
        .build();
    let flashing = State::active("FlashingYellow").parent(&maintenance).build();

    let emergency = State::active("Emergency")
        .entry_action(log_entry("Emergency"))
        .build();

    let decommissioned = State::end("Decommissioned").build();

    let mut b = TransitionMapBuilder::new();
    for s in [
        &init,
        &operating,
        &red,
        &green,
        &yellow,
        &maintenance,
        &flashing,
        &emergency,
        &decommissioned,
    ] {
        b.add_state(s.clone()).unwrap();
    }

    b.add_transition(Transition::new(
        "startup",
        Arc::new(TypeOf::<TypedEvent<()>>::new()),
        init,
        red.clone(),
        None,
    ))
    .unwrap();

    b.add_transition(Transition::new(
        "red->green",
        Arc::new(TypeOf::<TypedEvent<Timer>>::new()),
        red.clone(),
        green.clone(),
        None,
    ))
    .unwrap();
    b.add_transition(Transition::new(
        "green->yellow",
        Arc::new(TypeOf::<TypedEvent<Timer>>::new()),
        green.clone(),
        yellow.clone(),
        None,
    ))
    .unwrap();
    b.add_transition(Transition::new(
        "yellow->red",
        Arc::new(TypeOf::<TypedEvent<Timer>>::new()),
        yellow.clone(),
        red.clone(),
        None,
    ))
    .unwrap();

    // Any phase of the normal cycle yields to an emergency vehicle. Each
    // of these crosses from a child of `Operating` to the unrelated
    // `Emergency` state: no shared parent, so the LCA is `None` and the
    // engine fires the *full* exit chain (phase, then Operating) and the
    // full entry chain (just Emergency).
    for (name, from) in [("red->emergency", &red), ("green->emergency", &green), ("yellow->emergency", &yellow)] {
        b.add_transition(Transition::new(
            name,
            Arc::new(TypeOf::<TypedEvent<EmergencyVehicleDetected>>::new()),
            from.clone(),
            emergency.clone(),
            None,
        ))
        .unwrap();
    }
    b.add_transition(Transition::new(
        "emergency->red",
        Arc::new(TypeOf::<TypedEvent<EmergencyCleared>>::new()),
        emergency.clone(),
        red.clone(),
        None,
    ))
    .unwrap();

    // Maintenance mode: another cross-parent transition, this time with a
    // transition action observing the boundary crossing.
    b.add_transition(Transition::new(
        "red->maintenance",
        Arc::new(TypeOf::<TypedEvent<MaintenanceMode>>::new()),
        red.clone(),
        flashing.clone(),
        Some(Arc::new(
            |_e: &dyn Event, i: &Intersection, _t: &Transition<Intersection>, _k: ActionKind| {
                println!("{}: entering maintenance mode", i.name);
                Ok(())
            },
        )),
    ))
    .unwrap();
    b.add_transition(Transition::new(
        "maintenance->red",
        Arc::new(TypeOf::<TypedEvent<NormalMode>>::new()),
        flashing.clone(),
        red.clone(),
        None,
    ))
    .unwrap();

    // A transition group: one self-loop per listed state, sharing a guard
    // and action. Granting a pedestrian crossing never changes the light.
    b.add_transition_group(
        "pedestrian",
        Arc::new(TypeOf::<TypedEvent<PedestrianRequest>>::new()),
        &[red.clone(), green.clone(), yellow.clone()],
        Some(Arc::new(
            |_e: &dyn Event, i: &Intersection, _t: &Transition<Intersection>, _k: ActionKind| {
                println!("{}: pedestrian crossing granted", i.name);
                Ok(())
            },
        )),
    )
    .unwrap();

    b.add_transition(Transition::new(
        "shutdown",
        Arc::new(TypeOf::<TypedEvent<Shutdown>>::new()),
        red.clone(),
        decommissioned.clone(),
        None,
    ))
    .unwrap();

    let map = Arc::new(b.build().unwrap());
    (map, emergency)
}

fn log_entry(
    label: &'static str,
) -> impl Fn(&dyn Event, &Intersection, &Transition<Intersection>, ActionKind) -> Result<(), fsm_engine::action::ActionError> {
    move |_e, i, _t, _k| {
        println!("{}: entering {}", i.name, label);
        Ok(())
    }
}

fn log_exit(
    label: &'static str,
) -> impl Fn(&dyn Event, &Intersection, &Transition<Intersection>, ActionKind) -> Result<(), fsm_engine::action::ActionError> {
    move |_e, i, _t, _k| {
        println!("{}: leaving {}", i.name, label);
        Ok(())
    }
}

/// Example 1: the normal Red -> Green -> Yellow -> Red cycle, driven
/// synchronously.
fn normal_cycle() {
    println!("=== Normal Cycle ===");
    let (map, _emergency) = build_map();
    let machine = StateMachine::new(
        map,
        Intersection {
            name: "5th & Main".to_string(),
        },
    );

    machine.apply_event(&TypedEvent::new(())).unwrap();
    assert_eq!(machine.get_state().qualified_name(), "Operating:Red");

    machine.apply_event(&TypedEvent::new(Timer)).unwrap();
    assert_eq!(machine.get_state().qualified_name(), "Operating:Green");
    machine.apply_event(&TypedEvent::new(Timer)).unwrap();
    assert_eq!(machine.get_state().qualified_name(), "Operating:Yellow");
    machine.apply_event(&TypedEvent::new(Timer)).unwrap();
    assert_eq!(machine.get_state().qualified_name(), "Operating:Red");
}

/// Example 2: an emergency vehicle preempts the cycle from whichever
/// phase is active, then control returns to Red once it clears.
fn emergency_preemption() {
    println!("\n=== Emergency Preemption ===");
    let (map, emergency) = build_map();
    let machine = StateMachine::new(
        map,
        Intersection {
            name: "5th & Main".to_string(),
        },
    );

    machine.apply_event(&TypedEvent::new(())).unwrap();
    machine.apply_event(&TypedEvent::new(Timer)).unwrap(); // -> Green
    machine
        .apply_event(&TypedEvent::new(EmergencyVehicleDetected))
        .unwrap();
    assert_eq!(machine.get_state().qualified_name(), emergency.qualified_name());

    machine
        .apply_event(&TypedEvent::new(EmergencyCleared))
        .unwrap();
    assert_eq!(machine.get_state().qualified_name(), "Operating:Red");
}

/// Example 3: driving the intersection through the async dispatcher, with
/// an out-of-band emergency event preempting a queued pedestrian request.
fn dispatcher_emergency_preempts_pedestrian() {
    println!("\n=== Dispatcher: Emergency Preempts Pedestrian Request ===");
    let (map, _emergency) = build_map();
    let machine = StateMachine::new(
        map,
        Intersection {
            name: "Oak & 3rd".to_string(),
        },
    );
    let dispatcher = EventDispatcher::new(machine.clone());
    dispatcher.start("oak-3rd-dispatcher");

    dispatcher.put(Box::new(TypedEvent::new(()))).get();

    let pedestrian = dispatcher.put(Box::new(TypedEvent::new(PedestrianRequest)));
    let emergency = dispatcher.put(Box::new(TypedEvent::out_of_band(EmergencyVehicleDetected)));

    println!("pedestrian cancelled: {}", pedestrian.get().cancelled);
    println!("emergency successful: {}", emergency.get().successful);
    println!("final state: {}", machine.get_state().qualified_name());

    dispatcher.stop();
}

/// Example 4: a latch waits for the intersection to reach `Decommissioned`.
fn latch_waits_for_shutdown() {
    println!("\n=== Latch Waiting for Shutdown ===");
    let (map, _emergency) = build_map();
    let machine = StateMachine::new(
        map,
        Intersection {
            name: "5th & Main".to_string(),
        },
    );
    let decommissioned = machine.map().state("Decommissioned").unwrap().clone();
    let latch = machine.create_state_transition_latch(decommissioned, false);

    let worker = machine.clone();
    let handle = std::thread::spawn(move || {
        worker.apply_event(&TypedEvent::new(())).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        worker.apply_event(&TypedEvent::new(Shutdown)).unwrap();
    });

    let result = latch.call().unwrap();
    println!("latch resolved at: {}", result.qualified_name());
    assert!(latch.is_expected());
    handle.join().unwrap();
}

fn main() {
    tracing_subscriber::fmt::init();
    normal_cycle();
    emergency_preemption();
    dispatcher_emergency_preempts_pedestrian();
    latch_waits_for_shutdown();
}
