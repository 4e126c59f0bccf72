//! Examples demonstrating the order-fulfillment lifecycle built on
//! `fsm_engine`: guarded transitions, an error state reached through
//! `TransitionFailure`, a transition group used as a "cancel from
//! anywhere" edge, the async dispatcher, and a latch that waits for
//! delivery.

use std::sync::Arc;
use std::time::Duration;

use fsm_engine::action::{ActionError, ActionKind};
use fsm_engine::dispatcher::EventDispatcher;
use fsm_engine::event::{Event, TypedEvent};
use fsm_engine::guard::RegexMatch;
use fsm_engine::machine::StateMachine;
use fsm_engine::map::TransitionMapBuilder;
use fsm_engine::state::{State, StateRef};
use fsm_engine::transition::Transition;

#[derive(Debug)]
struct Order {
    id: String,
    amount_cents: u64,
}

fn build_map() -> (Arc<fsm_engine::map::TransitionMap<Order>>, StateRef<Order>, StateRef<Order>) {
    let new = State::<Order>::start("New").build();
    let payment_pending = State::active("PaymentPending")
        .entry_action(|_e: &dyn Event, o: &Order, _t: &Transition<Order>, _k: ActionKind| {
            println!("order {}: awaiting payment", o.id);
            Ok(())
        })
        .build();
    let paid = State::active("Paid").build();
    let shipped = State::active("Shipped").build();
    let delivered = State::end("Delivered").build();
    let cancelled = State::end("Cancelled").build();
    let failed = State::active("Failed")
        .entry_action(|_e: &dyn Event, o: &Order, _t: &Transition<Order>, _k: ActionKind| {
            println!("order {}: payment failed, manual review required", o.id);
            Ok(())
        })
        .build();

    let mut b = TransitionMapBuilder::new();
    for s in [&new, &payment_pending, &paid, &shipped, &delivered, &cancelled, &failed] {
        b.add_state(s.clone()).unwrap();
    }

    b.add_transition(Transition::new(
        "checkout",
        Arc::new(RegexMatch::<Order>::new("^checkout$").unwrap()),
        new.clone(),
        payment_pending.clone(),
        None,
    ))
    .unwrap();

    b.add_transition(Transition::new(
        "pay",
        Arc::new(RegexMatch::<Order>::new("^pay:.+$").unwrap()),
        payment_pending.clone(),
        paid.clone(),
        Some(Arc::new(charge_card)),
    ))
    .unwrap();

    b.add_transition(Transition::new(
        "ship",
        Arc::new(RegexMatch::<Order>::new("^ship$").unwrap()),
        paid.clone(),
        shipped.clone(),
        None,
    ))
    .unwrap();

    b.add_transition(Transition::new(
        "deliver",
        Arc::new(RegexMatch::<Order>::new("^deliver$").unwrap()),
        shipped.clone(),
        delivered.clone(),
        None,
    ))
    .unwrap();

    // "cancel" is accepted from New, PaymentPending, and Paid, but not once
    // the order has shipped.
    for (name, from) in [
        ("new->cancelled", &new),
        ("pending->cancelled", &payment_pending),
        ("paid->cancelled", &paid),
    ] {
        b.add_transition(Transition::new(
            name,
            Arc::new(RegexMatch::<Order>::new("^cancel$").unwrap()),
            from.clone(),
            cancelled.clone(),
            None,
        ))
        .unwrap();
    }

    // A transition group adds one self-loop per listed state, sharing a
    // single guard/action — here a "ping" heartbeat accepted everywhere
    // but `New` without moving the order at all.
    b.add_transition_group(
        "ping",
        Arc::new(RegexMatch::<Order>::new("^ping$").unwrap()),
        &[payment_pending.clone(), paid.clone(), shipped.clone()],
        Some(Arc::new(
            |_e: &dyn Event, o: &Order, _t: &Transition<Order>, _k: ActionKind| {
                println!("order {}: still alive", o.id);
                Ok(())
            },
        )),
    )
    .unwrap();

    // The error state still needs an outbound edge for liveness — a dead
    // end with no exit can never satisfy `check_liveness`. Manual review
    // resolves a failed charge by cancelling the order.
    b.add_transition(Transition::new(
        "failed->cancelled",
        Arc::new(RegexMatch::<Order>::new("^cancel$").unwrap()),
        failed.clone(),
        cancelled.clone(),
        None,
    ))
    .unwrap();

    b.set_error_state(failed.clone()).unwrap();
    let map = Arc::new(b.build().unwrap());
    (map, delivered, failed)
}

fn charge_card(
    _event: &dyn Event,
    order: &Order,
    _transition: &Transition<Order>,
    _kind: ActionKind,
) -> Result<(), ActionError> {
    if order.amount_cents == 0 {
        return Err(ActionError::failure(std::io::Error::other(
            "cannot charge a zero-amount order",
        )));
    }
    println!("order {}: charged {} cents", order.id, order.amount_cents);
    Ok(())
}

/// Example 1: a synchronous happy path through the lifecycle.
fn basic_lifecycle() {
    println!("=== Basic Order Lifecycle ===");
    let (map, _delivered, _failed) = build_map();
    let order = Order {
        id: "ORD-001".to_string(),
        amount_cents: 9_999,
    };
    let machine = StateMachine::new(map, order);

    machine.apply_event(&TypedEvent::new("checkout".to_string())).unwrap();
    machine
        .apply_event(&TypedEvent::new("pay:visa-4242".to_string()))
        .unwrap();
    machine.apply_event(&TypedEvent::new("ship".to_string())).unwrap();
    machine
        .apply_event(&TypedEvent::new("deliver".to_string()))
        .unwrap();

    println!("final state: {}", machine.get_state().qualified_name());
    assert!(machine.is_end());
}

/// Example 2: a failed charge redirects to the error state instead of
/// aborting the whole machine.
fn payment_failure_redirects_to_error_state() {
    println!("\n=== Payment Failure ===");
    let (map, _delivered, failed) = build_map();
    let order = Order {
        id: "ORD-002".to_string(),
        amount_cents: 0,
    };
    let machine = StateMachine::new(map, order);

    machine.apply_event(&TypedEvent::new("checkout".to_string())).unwrap();
    let result = machine.apply_event(&TypedEvent::new("pay:visa-4242".to_string()));
    println!("apply_event result: {:?}", result.is_err());
    assert_eq!(machine.get_state().qualified_name(), failed.qualified_name());
}

/// Example 3: driving the machine through the async dispatcher, including
/// an out-of-band cancellation that preempts a slow in-flight payment.
fn dispatcher_out_of_band_cancel() {
    println!("\n=== Dispatcher Out-of-Band Cancellation ===");
    let (map, _delivered, _failed) = build_map();
    let order = Order {
        id: "ORD-003".to_string(),
        amount_cents: 2_500,
    };
    let machine = StateMachine::new(map, order);
    let dispatcher = EventDispatcher::new(machine.clone());
    dispatcher.start("order-003-dispatcher");

    let checkout = dispatcher.put(Box::new(TypedEvent::new("checkout".to_string())));
    checkout.get();

    let pay = dispatcher.put(Box::new(TypedEvent::new("pay:visa-4242".to_string())));
    let ship = dispatcher.put(Box::new(TypedEvent::new("ship".to_string())));

    // The customer changes their mind before "pay" is even dequeued.
    let cancel = dispatcher.put(Box::new(TypedEvent::out_of_band("cancel".to_string())));

    let pay_status = pay.get();
    let ship_status = ship.get();
    let cancel_status = cancel.get();
    println!(
        "pay cancelled: {}, ship cancelled: {}, cancel successful: {}",
        pay_status.cancelled, ship_status.cancelled, cancel_status.successful
    );

    dispatcher.stop();
}

/// Example 4: a latch blocks the calling thread until the order reaches
/// `Delivered`, or the error state if the run goes bad.
fn latch_waits_for_delivery() {
    println!("\n=== Latch Waiting for Delivery ===");
    let (map, delivered, _failed) = build_map();
    let order = Order {
        id: "ORD-004".to_string(),
        amount_cents: 4_200,
    };
    let machine = StateMachine::new(map, order);
    let latch = machine.create_state_transition_latch(delivered, true);

    let worker = machine.clone();
    let handle = std::thread::spawn(move || {
        worker.apply_event(&TypedEvent::new("checkout".to_string())).unwrap();
        worker
            .apply_event(&TypedEvent::new("pay:visa-4242".to_string()))
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        worker.apply_event(&TypedEvent::new("ship".to_string())).unwrap();
        worker
            .apply_event(&TypedEvent::new("deliver".to_string()))
            .unwrap();
    });

    let result = latch.call().unwrap();
    println!("latch resolved at: {}", result.qualified_name());
    assert!(latch.is_expected());
    handle.join().unwrap();
}

fn main() {
    tracing_subscriber::fmt::init();
    basic_lifecycle();
    payment_failure_redirects_to_error_state();
    dispatcher_out_of_band_cancel();
    latch_waits_for_delivery();
}
