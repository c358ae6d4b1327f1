//! SimWorld - The simulation harness facade.

use crate::fault::{Fault, FaultInjector, FaultOptions};

use sest_core::{EventHandle, EventOrdering, EventSynchronizer, StateMachine, SyncConfig};
use sest_env::{EventRequest, Middleware, SestError, ServiceState, VirtualClock, VirtualTime};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Maximum events processed per drain pass (None = unbounded)
    pub max_events_per_drain: Option<usize>,

    /// Pending queue ranking
    pub ordering: EventOrdering,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_events_per_drain: None,
            ordering: EventOrdering::Prioritized,
        }
    }
}

impl SimConfig {
    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            max_events_per_drain: self.max_events_per_drain,
            ordering: self.ordering.clone(),
        }
    }
}

/// The SimWorld - wires a virtual clock, an event synchronizer bound to it
/// and a fault injector bound to both.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared virtual clock
    clock: VirtualClock,

    /// Service states, queue and middleware
    synchronizer: EventSynchronizer,

    /// Fault installation
    faults: FaultInjector,
}

impl SimWorld {
    /// Creates a new SimWorld with the given machines and configuration.
    pub fn new<I, S>(machines: I, config: SimConfig) -> Self
    where
        I: IntoIterator<Item = (S, StateMachine)>,
        S: Into<String>,
    {
        // Derive a separate seed for the fault subsystem
        let fault_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let clock = VirtualClock::new();
        let synchronizer = EventSynchronizer::with_config(machines, clock.clone(), config.sync_config());
        let faults = FaultInjector::new(synchronizer.clone(), clock.clone(), fault_seed);

        Self {
            config,
            clock,
            synchronizer,
            faults,
        }
    }

    /// Creates a SimWorld with the default configuration.
    pub fn with_machines<I, S>(machines: I) -> Self
    where
        I: IntoIterator<Item = (S, StateMachine)>,
        S: Into<String>,
    {
        Self::new(machines, SimConfig::default())
    }

    /// Sends an immediate, default-priority event.
    pub fn send_event(
        &self,
        service: &str,
        event: &str,
        payload: Value,
    ) -> Result<EventHandle, SestError> {
        self.synchronizer.send(service, event, payload)
    }

    /// Sends a fully specified event (priority, scheduled time).
    pub fn send(&self, request: EventRequest) -> Result<EventHandle, SestError> {
        self.synchronizer.send_event(request)
    }

    /// Sends several events ahead of a single drain pass.
    pub fn send_batch<I>(&self, requests: I) -> Result<Vec<EventHandle>, SestError>
    where
        I: IntoIterator<Item = EventRequest>,
    {
        self.synchronizer.send_events(requests)
    }

    /// Runs a drain pass over events left queued by the drain cap.
    pub fn process_pending(&self) -> Result<usize, SestError> {
        self.synchronizer.drain()
    }

    /// Returns the current state of `service`.
    pub fn get_state(&self, service: &str) -> Result<ServiceState, SestError> {
        self.synchronizer.get_state(service)
    }

    /// Returns a snapshot of every service's state.
    pub fn states(&self) -> BTreeMap<String, ServiceState> {
        self.synchronizer.states()
    }

    /// Advances virtual time, firing due callbacks. Returns how many fired.
    pub fn advance_time(&self, delta: VirtualTime) -> usize {
        self.clock.advance_time(delta)
    }

    /// Returns the current virtual time.
    pub fn time(&self) -> VirtualTime {
        self.clock.get_time()
    }

    /// Restores initial states, empties the queue and zeroes the clock.
    ///
    /// Installed faults and middleware are kept.
    pub fn reset(&self) {
        self.synchronizer.reset();
        self.clock.reset();
        info!(faults = self.faults.active_faults().len(), "world reset");
    }

    /// Appends an interceptor to the delivery chain.
    pub fn register_middleware<M: Middleware>(&self, middleware: M) {
        self.synchronizer.register_middleware(middleware);
    }

    /// Installs a fault for `service`.
    pub fn inject(&self, service: &str, fault: Fault) -> Result<(), SestError> {
        self.faults.inject(service, fault)
    }

    /// Installs a fault named by string, e.g. `"messageLoss"`.
    pub fn inject_named(
        &self,
        service: &str,
        fault_type: &str,
        options: &FaultOptions,
    ) -> Result<(), SestError> {
        self.faults.inject_named(service, fault_type, options)
    }

    /// Returns the fault injector.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns the event synchronizer.
    pub fn synchronizer(&self) -> &EventSynchronizer {
        &self.synchronizer
    }

    /// Returns the virtual clock.
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }
}
