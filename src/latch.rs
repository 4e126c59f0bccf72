use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::listener::StateChangeListener;
use crate::machine::{ListenerToken, StateMachine};
use crate::state::StateRef;

struct LatchState<En> {
    done: bool,
    expected: bool,
    error: bool,
    result: Option<StateRef<En>>,
}

/// Blocks until the machine reaches a target state (or, optionally, its
/// error state). Registers itself as a [`StateChangeListener`] and is
/// deregistered automatically when the wait ends, normally or by timeout.
///
/// The latch holds a `Weak` reference to itself (via [`ProxyListener`]) so
/// `state_changed`, which runs on the machine's own thread inside its
/// monitor with no `&mut self` to work with, can reach back into the same
/// `Arc` it was registered under. The `Weak` is only created once the
/// latch's `Arc` is fully constructed, so it is always upgradable from the
/// moment it exists.
pub struct StateTransitionLatch<En> {
    machine: Arc<StateMachine<En>>,
    expected: StateRef<En>,
    end_on_error: bool,
    token: Mutex<Option<ListenerToken>>,
    state: Mutex<LatchState<En>>,
    condvar: Condvar,
}

impl<En: Send + Sync + 'static> StateTransitionLatch<En> {
    /// Constructs and registers a latch on `machine`. The `Arc` is built
    /// first (fully initialized), and only then downgraded into the
    /// [`ProxyListener`]'s `Weak` handle and registered — so the proxy
    /// never holds a `Weak` to a not-yet-constructed latch, and a
    /// notification can never be silently dropped because `upgrade()`
    /// returned `None` mid-construction. Reading the initial state and
    /// registering the listener still happen under one lock acquisition on
    /// `machine` (via [`StateMachine::register_listener_with_initial_state`]),
    /// so a notification firing between those two steps can never be
    /// missed either — spec.md §4.6's "critical ordering requirement".
    pub fn new(
        machine: Arc<StateMachine<En>>,
        expected: StateRef<En>,
        end_on_error: bool,
    ) -> Arc<Self> {
        let latch = Arc::new(StateTransitionLatch {
            machine: machine.clone(),
            expected,
            end_on_error,
            token: Mutex::new(None),
            state: Mutex::new(LatchState {
                done: false,
                expected: false,
                error: false,
                result: None,
            }),
            condvar: Condvar::new(),
        });

        let proxy = Arc::new(ProxyListener {
            self_ref: Arc::downgrade(&latch),
        });
        let (token, initial_state) = machine.register_listener_with_initial_state(proxy);
        *latch.token.lock() = Some(token);
        latch.evaluate(&initial_state);
        latch
    }

    fn evaluate(&self, candidate: &StateRef<En>) {
        let mut state = self.state.lock();
        if state.done {
            return;
        }
        let candidate_name = candidate.qualified_name();
        let expected_name = self.expected.qualified_name();
        let is_expected = candidate_name == expected_name
            || candidate_name.starts_with(&format!("{}:", expected_name));
        let is_error = self.end_on_error
            && self
                .machine
                .get_error_state()
                .map(|es| es.qualified_name() == candidate.qualified_name())
                .unwrap_or(false);
        if is_expected || is_error {
            state.done = true;
            state.expected = is_expected;
            state.error = is_error;
            state.result = Some(candidate.clone());
            self.condvar.notify_all();
        }
    }

    /// Blocks the calling thread until the target condition fires, then
    /// deregisters the listener and returns the state that satisfied it
    /// (or `None` if this latch is dropped or the wait is otherwise
    /// abandoned before that happens — there is no portable "interrupt a
    /// blocked thread" signal in safe Rust, so waiters exit only via the
    /// condition itself or [`Self::call_for`]'s timeout).
    pub fn call(&self) -> Option<StateRef<En>> {
        let mut state = self.state.lock();
        while !state.done {
            self.condvar.wait(&mut state);
        }
        let result = state.result.clone();
        drop(state);
        self.deregister();
        result
    }

    /// Like [`Self::call`], but gives up after `timeout` and returns
    /// whatever result is available at that point (`None` if the wait
    /// timed out before the condition fired).
    pub fn call_for(&self, timeout: Duration) -> Option<StateRef<En>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.done {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let timed_out = self.condvar.wait_until(&mut state, deadline).timed_out();
            if timed_out {
                break;
            }
        }
        let result = state.result.clone();
        drop(state);
        self.deregister();
        result
    }

    /// Deregisters the listener without waiting. Idempotent.
    pub fn cancel(&self) {
        self.deregister();
    }

    fn deregister(&self) {
        if let Some(token) = *self.token.lock() {
            self.machine.remove_listener(token);
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    pub fn is_expected(&self) -> bool {
        self.state.lock().expected
    }

    pub fn is_error(&self) -> bool {
        self.state.lock().error
    }
}

/// Forwards `state_changed` to the owning latch via its `Weak` handle. A
/// plain closure can't borrow `self` before the latch's `Arc` exists, so
/// the proxy is built and registered only after that `Arc` is complete.
struct ProxyListener<En> {
    self_ref: Weak<StateTransitionLatch<En>>,
}

impl<En: Send + Sync + 'static> StateChangeListener<En> for ProxyListener<En> {
    fn state_changed(&self, _entity: &En, _old: &StateRef<En>, new: &StateRef<En>) {
        if let Some(latch) = self.self_ref.upgrade() {
            latch.evaluate(new);
        }
    }
}
