//! The event synchronization engine.
//!
//! Owns one live state per named service, the pending-event queue and the
//! middleware chain. Every `send_event` runs the event through the chain,
//! queues survivors and drains the queue synchronously:
//!
//! ```text
//! send_event -> middleware chain -> PriorityQueue -> drain pass
//!                                                      |
//!                      no scheduled time: apply now ---+--- scheduled: clock timer
//! ```
//!
//! Deferred transitions complete inside a later `advance_time` on the clock.

use crate::priority_queue::PriorityQueue;
use crate::state_machine::{StateMachine, Transition};
use sest_env::{
    Event, EventId, EventRequest, Middleware, SestError, ServiceState, SimClock, Verdict,
    VirtualClock,
};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Ranking function over pending events.
pub type EventComparator = Arc<dyn Fn(&Event, &Event) -> Ordering + Send + Sync>;

/// How the pending queue ranks events.
#[derive(Clone, Default)]
pub enum EventOrdering {
    /// Send order only; priority and scheduled time are ignored
    Fifo,

    /// Ascending (priority, scheduled time), ties in send order.
    /// An absent scheduled time sorts before any present one.
    #[default]
    Prioritized,

    /// Caller-supplied ranking, ties in send order
    Custom(EventComparator),
}

impl EventOrdering {
    /// Wraps a comparison function as a custom ordering.
    pub fn custom<F>(comparator: F) -> Self
    where
        F: Fn(&Event, &Event) -> Ordering + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(comparator))
    }

    fn comparator(&self) -> EventComparator {
        match self {
            Self::Fifo => Arc::new(|_: &Event, _: &Event| Ordering::Equal),
            Self::Prioritized => Arc::new(|a: &Event, b: &Event| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.scheduled_at.cmp(&b.scheduled_at))
            }),
            Self::Custom(comparator) => Arc::clone(comparator),
        }
    }
}

impl std::fmt::Debug for EventOrdering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fifo => write!(f, "Fifo"),
            Self::Prioritized => write!(f, "Prioritized"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Configuration for an [`EventSynchronizer`].
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Maximum events applied or deferred per drain pass (None = unbounded).
    ///
    /// Deferred transitions firing later on the clock do not count.
    pub max_events_per_drain: Option<usize>,

    /// Pending queue ranking
    pub ordering: EventOrdering,
}

impl SyncConfig {
    /// Caps the number of events processed per drain pass.
    pub fn with_max_events_per_drain(mut self, max: usize) -> Self {
        self.max_events_per_drain = Some(max);
        self
    }

    /// Sets the queue ranking.
    pub fn with_ordering(mut self, ordering: EventOrdering) -> Self {
        self.ordering = ordering;
        self
    }
}

/// Completion signal for one sent event.
///
/// Resolves with the service state produced by this event's own transition.
/// A handle whose event was dropped by middleware, or discarded by a reset,
/// never resolves: awaiting it stays pending and [`EventHandle::try_state`]
/// keeps returning `None`. Callers wanting to detect drops wrap the await in
/// their own timeout.
#[derive(Debug)]
pub struct EventHandle {
    id: EventId,
    outcome: Outcome,
}

#[derive(Debug)]
enum Outcome {
    Waiting(oneshot::Receiver<ServiceState>),
    Resolved(ServiceState),
    Abandoned,
}

impl EventHandle {
    fn new(id: EventId, receiver: oneshot::Receiver<ServiceState>) -> Self {
        Self {
            id,
            outcome: Outcome::Waiting(receiver),
        }
    }

    /// Id assigned to the event when it was sent.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Returns the resulting state if the transition has been applied.
    pub fn try_state(&mut self) -> Option<&ServiceState> {
        let received = match &mut self.outcome {
            Outcome::Waiting(receiver) => Some(receiver.try_recv()),
            _ => None,
        };

        match received {
            Some(Ok(state)) => self.outcome = Outcome::Resolved(state),
            Some(Err(oneshot::error::TryRecvError::Closed)) => self.outcome = Outcome::Abandoned,
            Some(Err(oneshot::error::TryRecvError::Empty)) | None => {}
        }

        match &self.outcome {
            Outcome::Resolved(state) => Some(state),
            _ => None,
        }
    }

    /// Returns true once the transition has been applied.
    pub fn is_resolved(&mut self) -> bool {
        self.try_state().is_some()
    }
}

impl Future for EventHandle {
    type Output = ServiceState;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = match &mut self.outcome {
            Outcome::Waiting(receiver) => Some(Pin::new(receiver).poll(cx)),
            _ => None,
        };

        match polled {
            Some(Poll::Pending) => return Poll::Pending,
            Some(Poll::Ready(Ok(state))) => self.outcome = Outcome::Resolved(state),
            // Sender gone without a state: the event was lost.
            Some(Poll::Ready(Err(_))) => self.outcome = Outcome::Abandoned,
            None => {}
        }

        match std::mem::replace(&mut self.outcome, Outcome::Abandoned) {
            Outcome::Resolved(state) => Poll::Ready(state),
            other => {
                self.outcome = other;
                Poll::Pending
            }
        }
    }
}

/// A queued event and the sender that completes its handle.
struct PendingEvent {
    event: Event,
    completion: oneshot::Sender<ServiceState>,
}

/// Mutable state shared with deferred clock callbacks.
struct SyncState {
    /// Live state per service
    states: BTreeMap<String, ServiceState>,

    /// Events past middleware, waiting for a drain pass
    queue: PriorityQueue<PendingEvent>,

    /// Interceptors in installation order
    middleware: Vec<Arc<dyn Middleware>>,

    /// Next event id to allocate
    next_event_id: u64,

    /// Bumped on reset; transitions from older epochs are discarded
    epoch: u64,

    /// Thread currently running a drain pass
    drainer: Option<ThreadId>,
}

/// Drives named service state machines with queued, intercepted events.
///
/// Clones share the same services, queue and middleware chain. Separate
/// instances never interfere: there is no global state.
#[derive(Clone)]
pub struct EventSynchronizer<C: SimClock = VirtualClock> {
    /// Immutable machine definitions by service name
    machines: Arc<BTreeMap<String, StateMachine>>,

    /// Shared mutable state
    state: Arc<Mutex<SyncState>>,

    /// Held for the whole of a drain pass
    drain_gate: Arc<Mutex<()>>,

    /// Clock used for deferred transitions
    clock: C,

    /// Drain and ordering configuration
    config: SyncConfig,
}

impl<C: SimClock> EventSynchronizer<C> {
    /// Creates a synchronizer with the default configuration.
    pub fn new<I, S>(machines: I, clock: C) -> Self
    where
        I: IntoIterator<Item = (S, StateMachine)>,
        S: Into<String>,
    {
        Self::with_config(machines, clock, SyncConfig::default())
    }

    /// Creates a synchronizer with an explicit configuration.
    pub fn with_config<I, S>(machines: I, clock: C, config: SyncConfig) -> Self
    where
        I: IntoIterator<Item = (S, StateMachine)>,
        S: Into<String>,
    {
        let machines: BTreeMap<String, StateMachine> = machines
            .into_iter()
            .map(|(name, machine)| (name.into(), machine))
            .collect();

        let comparator = config.ordering.comparator();
        let queue = PriorityQueue::with_comparator(move |a: &PendingEvent, b: &PendingEvent| {
            comparator(&a.event, &b.event)
        });

        let state = SyncState {
            states: initial_states(&machines),
            queue,
            middleware: Vec::new(),
            next_event_id: 0,
            epoch: 0,
            drainer: None,
        };

        Self {
            machines: Arc::new(machines),
            state: Arc::new(Mutex::new(state)),
            drain_gate: Arc::new(Mutex::new(())),
            clock,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        lock_state(&self.state)
    }

    fn ensure_service(&self, service: &str) -> Result<&StateMachine, SestError> {
        self.machines
            .get(service)
            .ok_or_else(|| SestError::unknown_service(service))
    }

    /// Sends one event and drains the queue.
    ///
    /// Returns the event's handle. If middleware drops the event the call
    /// still succeeds; the handle just never resolves. An `InvalidTransition`
    /// aborts the drain pass: events behind the failing one stay queued for
    /// the next pass.
    ///
    /// The error belongs to whichever event sat at the head of the queue,
    /// which is not necessarily this one when an earlier capped pass left
    /// events behind. The handle is lost with the error, but this event stays
    /// queued and is applied by a later pass.
    pub fn send_event(&self, request: EventRequest) -> Result<EventHandle, SestError> {
        self.ensure_service(&request.service)?;
        let handle = self.admit(request);
        self.drain()?;
        Ok(handle)
    }

    /// Sends an immediate, default-priority event.
    pub fn send(
        &self,
        service: &str,
        event: &str,
        payload: Value,
    ) -> Result<EventHandle, SestError> {
        self.send_event(EventRequest::new(service, event, payload))
    }

    /// Sends a batch: every request passes middleware and is queued before a
    /// single drain pass, so queue ordering among them is observable.
    ///
    /// All service names are validated before anything is queued. Drain
    /// errors behave as for [`EventSynchronizer::send_event`]: the handles
    /// are lost but the queued events are not.
    pub fn send_events<I>(&self, requests: I) -> Result<Vec<EventHandle>, SestError>
    where
        I: IntoIterator<Item = EventRequest>,
    {
        let requests: Vec<EventRequest> = requests.into_iter().collect();
        for request in &requests {
            self.ensure_service(&request.service)?;
        }

        let handles = requests
            .into_iter()
            .map(|request| self.admit(request))
            .collect();
        self.drain()?;
        Ok(handles)
    }

    /// Runs the event through middleware and queues it if it survives.
    fn admit(&self, request: EventRequest) -> EventHandle {
        let (id, chain) = {
            let mut state = self.lock();
            let id = EventId(state.next_event_id);
            state.next_event_id += 1;
            (id, state.middleware.clone())
        };

        let mut event = Event::from_request(id, request);
        let (completion, receiver) = oneshot::channel();

        match run_middleware(&chain, &mut event) {
            Some(dropped_by) => {
                debug!(event = %event, middleware = dropped_by, "event dropped");
            }
            None => {
                debug!(event = %event, priority = event.priority, "event queued");
                self.lock().queue.enqueue(PendingEvent { event, completion });
            }
        }

        EventHandle::new(id, receiver)
    }

    /// Runs one drain pass over the pending queue.
    ///
    /// Processes events in queue order until the queue is empty or the
    /// configured per-drain cap is reached. Returns the number processed.
    ///
    /// Passes are serialized across threads. A drain requested from inside a
    /// transition action returns `Ok(0)` at once; the running pass picks up
    /// whatever was queued.
    pub fn drain(&self) -> Result<usize, SestError> {
        let _gate = match self.drain_gate.try_lock() {
            Ok(gate) => gate,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                if self.lock().drainer == Some(thread::current().id()) {
                    debug!("nested drain left to the running pass");
                    return Ok(0);
                }
                self.drain_gate.lock().unwrap_or_else(PoisonError::into_inner)
            }
        };

        self.lock().drainer = Some(thread::current().id());
        let result = self.drain_queue();
        self.lock().drainer = None;
        result
    }

    fn drain_queue(&self) -> Result<usize, SestError> {
        let mut processed = 0;

        loop {
            if self
                .config
                .max_events_per_drain
                .is_some_and(|max| processed >= max)
            {
                let remaining = self.pending_events();
                if remaining > 0 {
                    debug!(processed, remaining, "drain pass reached its event cap");
                }
                break;
            }

            let (pending, epoch) = {
                let mut state = self.lock();
                let Some(pending) = state.queue.dequeue() else {
                    break;
                };
                (pending, state.epoch)
            };

            self.process(pending, epoch)?;
            processed += 1;
        }

        Ok(processed)
    }

    /// Looks up the transition under the lock, then applies it unlocked so
    /// actions may call back into the synchronizer.
    fn process(&self, pending: PendingEvent, epoch: u64) -> Result<(), SestError> {
        let PendingEvent { event, completion } = pending;
        let machine = self.ensure_service(&event.service)?;

        let current = self
            .lock()
            .states
            .get(&event.service)
            .cloned()
            .ok_or_else(|| SestError::unknown_service(&event.service))?;

        let Some(transition) = machine.find_transition(&event.name, &current.status) else {
            warn!(event = %event, status = %current.status, "no transition matches");
            return Err(SestError::invalid_transition(
                &event.service,
                &event.name,
                &current.status,
            ));
        };

        match event.scheduled_at {
            None => {
                let next = transition.apply(&current, &event.payload);

                let mut state = self.lock();
                if state.epoch != epoch {
                    debug!(event = %event, "transition discarded by reset");
                    return Ok(());
                }
                debug!(event = %event, from = %current.status, to = %next.status, "transition applied");
                state.states.insert(event.service.clone(), next.clone());
                drop(state);

                let _ = completion.send(next);
            }
            Some(fire_at) => {
                let delay = fire_at.saturating_sub(self.clock.now());
                debug!(event = %event, fire_at, "transition deferred");

                let shared = Arc::clone(&self.state);
                let transition = transition.clone();
                self.clock.set_timeout(
                    delay,
                    Box::new(move || {
                        apply_deferred(&shared, epoch, &transition, event, completion);
                    }),
                );
            }
        }

        Ok(())
    }

    /// Returns the current state of `service`.
    pub fn get_state(&self, service: &str) -> Result<ServiceState, SestError> {
        self.lock()
            .states
            .get(service)
            .cloned()
            .ok_or_else(|| SestError::unknown_service(service))
    }

    /// Returns a snapshot of every service's state.
    pub fn states(&self) -> BTreeMap<String, ServiceState> {
        self.lock().states.clone()
    }

    /// Restores every service to a copy of its initial state and empties the
    /// pending queue.
    ///
    /// Middleware stays installed: faults survive a reset unless removed with
    /// [`EventSynchronizer::clear_middleware`]. Deferred transitions already
    /// registered on the clock are discarded when they fire.
    pub fn reset(&self) {
        let discarded = {
            let mut state = self.lock();
            state.states = initial_states(&self.machines);
            state.epoch += 1;
            let discarded = state.queue.len();
            state.queue.clear();
            discarded
        };
        info!(discarded, "synchronizer reset");
    }

    /// Appends an interceptor to the chain.
    pub fn register_middleware<M: Middleware>(&self, middleware: M) {
        self.register_shared_middleware(Arc::new(middleware));
    }

    /// Appends an already shared interceptor to the chain.
    pub fn register_shared_middleware(&self, middleware: Arc<dyn Middleware>) {
        let mut state = self.lock();
        debug!(middleware = middleware.name(), position = state.middleware.len(), "middleware registered");
        state.middleware.push(middleware);
    }

    /// Removes every interceptor. Returns how many were removed.
    pub fn clear_middleware(&self) -> usize {
        let removed = std::mem::take(&mut self.lock().middleware).len();
        info!(removed, "middleware cleared");
        removed
    }

    /// Returns the number of installed interceptors.
    pub fn middleware_count(&self) -> usize {
        self.lock().middleware.len()
    }

    /// Returns the number of events waiting for a drain pass.
    pub fn pending_events(&self) -> usize {
        self.lock().queue.len()
    }

    /// Returns true if `service` is configured.
    pub fn has_service(&self, service: &str) -> bool {
        self.machines.contains_key(service)
    }

    /// Returns the configured service names in sorted order.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.machines.keys().map(String::as_str)
    }

    /// Returns the clock driving deferred transitions.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

fn lock_state(state: &Mutex<SyncState>) -> MutexGuard<'_, SyncState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn initial_states(machines: &BTreeMap<String, StateMachine>) -> BTreeMap<String, ServiceState> {
    machines
        .iter()
        .map(|(name, machine)| (name.clone(), machine.initial_state().clone()))
        .collect()
}

/// Walks the chain in order. Returns the name of the interceptor that
/// dropped the event, or `None` if it survived.
fn run_middleware<'a>(chain: &'a [Arc<dyn Middleware>], event: &mut Event) -> Option<&'a str> {
    chain.iter().find_map(|middleware| match middleware.handle(event) {
        Verdict::Proceed => None,
        Verdict::Drop => Some(middleware.name()),
    })
}

fn apply_deferred(
    shared: &Mutex<SyncState>,
    epoch: u64,
    transition: &Transition,
    event: Event,
    completion: oneshot::Sender<ServiceState>,
) {
    let current = {
        let state = lock_state(shared);
        if state.epoch != epoch {
            debug!(event = %event, "deferred transition discarded by reset");
            return;
        }
        match state.states.get(&event.service) {
            Some(current) => current.clone(),
            None => return,
        }
    };

    let next = transition.apply(&current, &event.payload);

    let mut state = lock_state(shared);
    if state.epoch != epoch {
        debug!(event = %event, "deferred transition discarded by reset");
        return;
    }
    debug!(event = %event, from = %current.status, to = %next.status, "deferred transition applied");
    state.states.insert(event.service.clone(), next.clone());
    drop(state);

    let _ = completion.send(next);
}
