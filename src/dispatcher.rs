use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::error::DispatchError;
use crate::event::Event;
use crate::machine::StateMachine;

thread_local! {
    static ACTIVE_CANCEL_FLAG: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
}

/// Polled by a long-running `Action` that wants to cooperate with
/// out-of-band preemption or an explicit [`EventRequest::cancel`]. Rust has
/// no safe, portable equivalent of `Thread.interrupt()`, so the dispatcher
/// worker publishes a per-request cancellation flag into a thread-local for
/// the duration of the `apply_event` call it is running; this function
/// reads it. Outside a dispatcher worker thread it always returns `false`.
/// An action that never calls this still completes normally — the request
/// is simply reported as cancelled once it returns, since a cancellation
/// was requested for it while it ran.
pub fn is_cancel_requested() -> bool {
    ACTIVE_CANCEL_FLAG.with(|flag| {
        flag.borrow()
            .as_ref()
            .map(|f| f.load(Ordering::Acquire))
            .unwrap_or(false)
    })
}

/// Outcome of a dispatched event, published exactly once per
/// [`EventRequest`]. Mirrors spec.md §7's status mapping: success, or
/// cancellation, or a wrapped error — never more than one.
#[derive(Debug, Clone)]
pub struct EventStatus {
    pub successful: bool,
    pub cancelled: bool,
    pub error: Option<Arc<DispatchError>>,
}

impl EventStatus {
    fn cancelled_before_start() -> Self {
        EventStatus {
            successful: false,
            cancelled: true,
            error: None,
        }
    }
}

/// Invoked once per event, including cancelled ones, after its status has
/// been computed but before it is published. The returned value is stored
/// on the request as its annotation; failures are logged, never propagated
/// (spec.md §4.5 step 3).
pub trait EventCompletionListener<En>: Send + Sync {
    fn on_completion(
        &self,
        event: &dyn Event,
        status: &EventStatus,
    ) -> Option<Arc<dyn Any + Send + Sync>>;
}

impl<En, F> EventCompletionListener<En> for F
where
    F: Fn(&dyn Event, &EventStatus) -> Option<Arc<dyn Any + Send + Sync>> + Send + Sync,
{
    fn on_completion(
        &self,
        event: &dyn Event,
        status: &EventStatus,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        (self)(event, status)
    }
}

struct RequestState {
    started: bool,
    status: Option<EventStatus>,
    annotation: Option<Arc<dyn Any + Send + Sync>>,
}

/// A future-like handle over one dispatched event. `get`/`get_timeout`
/// block until [`EventDispatcher`] publishes a final [`EventStatus`];
/// `cancel` may abort it before or during execution.
pub struct EventRequest<En> {
    event: Box<dyn Event>,
    state: Mutex<RequestState>,
    condvar: Condvar,
    cancel_requested: Arc<AtomicBool>,
    dispatcher: Weak<EventDispatcher<En>>,
}

impl<En> EventRequest<En> {
    fn new(event: Box<dyn Event>, dispatcher: Weak<EventDispatcher<En>>) -> Arc<Self> {
        Arc::new(EventRequest {
            event,
            state: Mutex::new(RequestState {
                started: false,
                status: None,
                annotation: None,
            }),
            condvar: Condvar::new(),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            dispatcher,
        })
    }

    pub fn event(&self) -> &dyn Event {
        self.event.as_ref()
    }

    /// Blocks until a status is published.
    pub fn get(&self) -> EventStatus {
        let mut state = self.state.lock();
        while state.status.is_none() {
            self.condvar.wait(&mut state);
        }
        state.status.clone().expect("checked above")
    }

    /// Blocks until a status is published or `timeout` elapses.
    pub fn get_timeout(&self, timeout: Duration) -> Option<EventStatus> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.status.is_none() {
            if Instant::now() >= deadline {
                break;
            }
            if self.condvar.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.status.clone()
    }

    /// Cancels this request. If it hasn't started, it will be skipped when
    /// dequeued. If it's the currently executing request and
    /// `may_interrupt` is true, signals cooperative cancellation via
    /// [`is_cancel_requested`]. Returns `false` if the request is already
    /// done, or if it's running and `may_interrupt` is false.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        {
            let state = self.state.lock();
            if state.status.is_some() {
                return false;
            }
            if !state.started {
                self.cancel_requested.store(true, Ordering::Release);
                return true;
            }
        }
        if !may_interrupt {
            return false;
        }
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.cancel_active(self, true),
            None => false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().status.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state
            .lock()
            .status
            .as_ref()
            .map(|s| s.cancelled)
            .unwrap_or(false)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    pub fn annotation(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.state.lock().annotation.clone()
    }

    pub fn set_annotation(&self, annotation: Arc<dyn Any + Send + Sync>) {
        self.state.lock().annotation = Some(annotation);
    }

    fn mark_started(&self) {
        self.state.lock().started = true;
    }

    fn publish(&self, status: EventStatus, annotation: Option<Arc<dyn Any + Send + Sync>>) {
        let mut state = self.state.lock();
        state.status = Some(status);
        if annotation.is_some() {
            state.annotation = annotation;
        }
        drop(state);
        self.condvar.notify_all();
    }
}

struct QueueState<En> {
    queue: VecDeque<Arc<EventRequest<En>>>,
    current: Option<Arc<EventRequest<En>>>,
}

/// Off-thread, serialized event delivery to a [`StateMachine`] (C5): a FIFO
/// queue plus a single worker, with out-of-band preemption and a
/// completion callback. See spec.md §4.5/§5.
pub struct EventDispatcher<En> {
    machine: Arc<StateMachine<En>>,
    queue: Mutex<QueueState<En>>,
    queue_condvar: Condvar,
    completion_listener: Mutex<Option<Arc<dyn EventCompletionListener<En>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl<En: Send + Sync + 'static> EventDispatcher<En> {
    pub fn new(machine: Arc<StateMachine<En>>) -> Arc<Self> {
        Arc::new(EventDispatcher {
            machine,
            queue: Mutex::new(QueueState {
                queue: VecDeque::new(),
                current: None,
            }),
            queue_condvar: Condvar::new(),
            completion_listener: Mutex::new(None),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn EventCompletionListener<En>>>) {
        *self.completion_listener.lock() = listener;
    }

    /// Starts the worker thread under `name`.
    pub fn start(self: &Arc<Self>, name: impl Into<String>) {
        self.running.store(true, Ordering::Release);
        let worker_dispatcher = self.clone();
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || worker_dispatcher.run_worker())
            .expect("failed to spawn dispatcher worker thread");
        *self.worker.lock() = Some(handle);
        debug!("event dispatcher started");
    }

    /// Cancels every queued and executing request, then joins the worker.
    pub fn stop(&self) {
        {
            let mut queue = self.queue.lock();
            self.running.store(false, Ordering::Release);
            while let Some(request) = queue.queue.pop_front() {
                self.finalize_cancelled(&request);
            }
            if let Some(current) = &queue.current {
                current.cancel_requested.store(true, Ordering::Release);
            }
        }
        self.queue_condvar.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        debug!("event dispatcher stopped");
    }

    /// Enqueues `event`, or routes it to [`Self::put_out_of_band`] if
    /// `event.is_out_of_band()`.
    pub fn put(self: &Arc<Self>, event: Box<dyn Event>) -> Arc<EventRequest<En>> {
        if event.is_out_of_band() {
            return self.put_out_of_band(event);
        }
        let mut queue = self.queue.lock();
        let request = EventRequest::new(event, Arc::downgrade(self));
        queue.queue.push_back(request.clone());
        self.queue_condvar.notify_all();
        request
    }

    /// Atomically cancels every pending and the currently-running request,
    /// then enqueues `event` at the tail. The purge and enqueue happen
    /// under the queue lock so no normal event can slip in between.
    pub fn put_out_of_band(self: &Arc<Self>, event: Box<dyn Event>) -> Arc<EventRequest<En>> {
        let mut queue = self.queue.lock();
        while let Some(request) = queue.queue.pop_front() {
            self.finalize_cancelled(&request);
        }
        if let Some(current) = &queue.current {
            current.cancel_requested.store(true, Ordering::Release);
        }
        let request = EventRequest::new(event, Arc::downgrade(self));
        queue.queue.push_back(request.clone());
        self.queue_condvar.notify_all();
        request
    }

    /// `true` iff `request` is the one currently executing and it was
    /// signalled for cooperative cancellation.
    pub fn cancel_active(&self, request: &EventRequest<En>, may_interrupt: bool) -> bool {
        if !may_interrupt {
            return false;
        }
        let queue = self.queue.lock();
        let is_current = matches!(&queue.current, Some(c) if std::ptr::eq(c.as_ref(), request));
        drop(queue);
        if is_current {
            request.cancel_requested.store(true, Ordering::Release);
        }
        is_current
    }

    fn finalize_cancelled(&self, request: &Arc<EventRequest<En>>) {
        let status = EventStatus::cancelled_before_start();
        let annotation = self.invoke_completion_listener(request, &status);
        request.publish(status, annotation);
    }

    fn invoke_completion_listener(
        &self,
        request: &EventRequest<En>,
        status: &EventStatus,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        let listener = self.completion_listener.lock().clone();
        let listener = listener?;
        match panic::catch_unwind(AssertUnwindSafe(|| {
            listener.on_completion(request.event(), status)
        })) {
            Ok(annotation) => annotation,
            Err(_) => {
                warn!("event completion listener panicked, annotation dropped");
                None
            }
        }
    }

    fn next_request(&self) -> Option<Arc<EventRequest<En>>> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(request) = queue.queue.pop_front() {
                queue.current = Some(request.clone());
                return Some(request);
            }
            if !self.running.load(Ordering::Acquire) {
                return None;
            }
            self.queue_condvar.wait(&mut queue);
        }
    }

    fn run_worker(self: Arc<Self>) {
        loop {
            let request = match self.next_request() {
                Some(r) => r,
                None => return,
            };
            self.process(&request);
            self.queue.lock().current = None;
        }
    }

    fn process(&self, request: &Arc<EventRequest<En>>) {
        if request.cancel_requested.load(Ordering::Acquire) {
            self.finalize_cancelled(request);
            return;
        }

        request.mark_started();
        ACTIVE_CANCEL_FLAG.with(|flag| {
            *flag.borrow_mut() = Some(request.cancel_requested.clone());
        });
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.machine.apply_event(request.event())
        }));
        ACTIVE_CANCEL_FLAG.with(|flag| {
            *flag.borrow_mut() = None;
        });
        let was_cancelled = request.cancel_requested.load(Ordering::Acquire);

        let status = match outcome {
            Ok(Ok(())) => EventStatus {
                successful: !was_cancelled,
                cancelled: was_cancelled,
                error: None,
            },
            Ok(Err(machine_err)) => EventStatus {
                successful: false,
                cancelled: was_cancelled,
                error: Some(Arc::new(DispatchError::Machine(machine_err))),
            },
            Err(panic_payload) => {
                let message = panic_message(panic_payload);
                error!("dispatcher worker caught a panic applying an event: {message}");
                EventStatus {
                    successful: false,
                    cancelled: was_cancelled,
                    error: Some(Arc::new(DispatchError::Panic(message))),
                }
            }
        };

        let annotation = self.invoke_completion_listener(request, &status);
        request.publish(status, annotation);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "dispatcher worker panicked with a non-string payload".to_string()
    }
}
