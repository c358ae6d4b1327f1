//! Fault injection through delivery middleware.
//!
//! Every `inject` call installs one interceptor on the synchronizer's chain.
//! Interceptors are never removed by a reset, so a fault outlives the run it
//! was injected in unless the chain is cleared explicitly.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sest_core::EventSynchronizer;
use sest_env::{Event, Middleware, SestError, SimClock, Verdict, VirtualClock, VirtualTime};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Blackout length used when `duration` is not given.
pub const DEFAULT_BLACKOUT_DURATION: VirtualTime = 2000;

/// Loss percentage used when `lossPercentage` is not given.
pub const DEFAULT_LOSS_PERCENTAGE: f64 = 10.0;

/// Added delay used when `latency` is not given.
pub const DEFAULT_LATENCY: VirtualTime = 100;

/// Fault kinds recognized by [`FaultInjector::inject_named`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultType {
    /// Drop events while virtual time is below a threshold
    TemporaryFailure,

    /// Drop every event forever
    PermanentFailure,

    /// Drop events at random
    MessageLoss,

    /// Defer events by a fixed virtual delay
    Latency,
}

impl FaultType {
    /// Returns all fault types.
    pub fn all() -> Vec<FaultType> {
        vec![
            FaultType::TemporaryFailure,
            FaultType::PermanentFailure,
            FaultType::MessageLoss,
            FaultType::Latency,
        ]
    }

    /// Returns the fault type name.
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::TemporaryFailure => "temporaryFailure",
            FaultType::PermanentFailure => "permanentFailure",
            FaultType::MessageLoss => "messageLoss",
            FaultType::Latency => "latency",
        }
    }
}

impl std::fmt::Display for FaultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for FaultType {
    type Err = SestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temporaryFailure" | "temporary_failure" => Ok(FaultType::TemporaryFailure),
            "permanentFailure" | "permanent_failure" => Ok(FaultType::PermanentFailure),
            "messageLoss" | "message_loss" => Ok(FaultType::MessageLoss),
            "latency" => Ok(FaultType::Latency),
            _ => Err(SestError::invalid_fault_type(s)),
        }
    }
}

/// Loosely typed options for [`FaultInjector::inject_named`].
///
/// Missing fields fall back to the `DEFAULT_*` constants of this module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultOptions {
    /// Blackout threshold for `temporaryFailure`
    pub duration: Option<VirtualTime>,

    /// Loss percentage (0-100) for `messageLoss`
    pub loss_percentage: Option<f64>,

    /// Added delay for `latency`
    pub latency: Option<VirtualTime>,
}

impl FaultOptions {
    /// Sets the blackout threshold.
    pub fn with_duration(mut self, duration: VirtualTime) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Sets the loss percentage.
    pub fn with_loss_percentage(mut self, loss_percentage: f64) -> Self {
        self.loss_percentage = Some(loss_percentage);
        self
    }

    /// Sets the added delay.
    pub fn with_latency(mut self, latency: VirtualTime) -> Self {
        self.latency = Some(latency);
        self
    }
}

/// A fully specified fault.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Fault {
    /// Drop events while `clock.now() < duration`
    TemporaryFailure { duration: VirtualTime },

    /// Drop every event
    PermanentFailure,

    /// Drop each event with probability `loss_percentage / 100`
    MessageLoss { loss_percentage: f64 },

    /// Push each event's scheduled time `delay` ticks later
    Latency { delay: VirtualTime },
}

impl Fault {
    /// Builds a fault from a type and loose options.
    pub fn from_options(fault_type: FaultType, options: &FaultOptions) -> Self {
        match fault_type {
            FaultType::TemporaryFailure => Fault::TemporaryFailure {
                duration: options.duration.unwrap_or(DEFAULT_BLACKOUT_DURATION),
            },
            FaultType::PermanentFailure => Fault::PermanentFailure,
            FaultType::MessageLoss => Fault::MessageLoss {
                loss_percentage: options.loss_percentage.unwrap_or(DEFAULT_LOSS_PERCENTAGE),
            },
            FaultType::Latency => Fault::Latency {
                delay: options.latency.unwrap_or(DEFAULT_LATENCY),
            },
        }
    }

    /// Returns the kind of this fault.
    pub fn fault_type(&self) -> FaultType {
        match self {
            Fault::TemporaryFailure { .. } => FaultType::TemporaryFailure,
            Fault::PermanentFailure => FaultType::PermanentFailure,
            Fault::MessageLoss { .. } => FaultType::MessageLoss,
            Fault::Latency { .. } => FaultType::Latency,
        }
    }
}

/// Drops events for one service until virtual time reaches `until`.
///
/// The clock is read when the event reaches the interceptor, not at
/// injection time.
pub struct TemporaryBlackout<C: SimClock> {
    service: String,
    until: VirtualTime,
    clock: C,
}

impl<C: SimClock> Middleware for TemporaryBlackout<C> {
    fn handle(&self, event: &mut Event) -> Verdict {
        if event.service == self.service && self.clock.now() < self.until {
            Verdict::Drop
        } else {
            Verdict::Proceed
        }
    }

    fn name(&self) -> &str {
        "temporary_blackout"
    }
}

/// Drops every event for one service.
pub struct PermanentBlackout {
    service: String,
}

impl Middleware for PermanentBlackout {
    fn handle(&self, event: &mut Event) -> Verdict {
        if event.service == self.service {
            Verdict::Drop
        } else {
            Verdict::Proceed
        }
    }

    fn name(&self) -> &str {
        "permanent_blackout"
    }
}

/// Drops events for one service independently at random.
///
/// Draws come from the injector's seeded RNG, and only for events of the
/// targeted service, so a run is reproducible from its seed.
pub struct MessageLossFault {
    service: String,
    probability: f64,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl Middleware for MessageLossFault {
    fn handle(&self, event: &mut Event) -> Verdict {
        if event.service != self.service {
            return Verdict::Proceed;
        }

        let draw: f64 = lock(&self.rng).gen();
        if draw < self.probability {
            Verdict::Drop
        } else {
            Verdict::Proceed
        }
    }

    fn name(&self) -> &str {
        "message_loss"
    }
}

/// Defers events for one service by a fixed virtual delay.
pub struct LatencyFault<C: SimClock> {
    service: String,
    delay: VirtualTime,
    clock: C,
}

impl<C: SimClock> Middleware for LatencyFault<C> {
    fn handle(&self, event: &mut Event) -> Verdict {
        if event.service == self.service {
            let now = self.clock.now();
            let base = event.scheduled_at.map_or(now, |at| at.max(now));
            event.scheduled_at = Some(base.saturating_add(self.delay));
        }
        Verdict::Proceed
    }

    fn name(&self) -> &str {
        "latency"
    }
}

/// Record of one `inject` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstalledFault {
    /// Targeted service
    pub service: String,

    /// Installed fault
    pub fault: Fault,

    /// Virtual time at injection
    pub installed_at: VirtualTime,
}

/// Installs fault patterns onto an [`EventSynchronizer`].
#[derive(Clone)]
pub struct FaultInjector<C: SimClock = VirtualClock> {
    /// Chain the faults are installed on
    synchronizer: EventSynchronizer<C>,

    /// Clock read by time-dependent faults
    clock: C,

    /// Deterministic RNG for message loss
    rng: Arc<Mutex<ChaCha8Rng>>,

    /// Faults installed so far, in order
    installed: Arc<Mutex<Vec<InstalledFault>>>,
}

impl<C: SimClock> FaultInjector<C> {
    /// Creates an injector bound to a synchronizer and clock.
    pub fn new(synchronizer: EventSynchronizer<C>, clock: C, seed: u64) -> Self {
        Self {
            synchronizer,
            clock,
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            installed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Installs one fault for `service`.
    ///
    /// Fails with `UnknownService` if the synchronizer has no such service.
    pub fn inject(&self, service: &str, fault: Fault) -> Result<(), SestError> {
        if !self.synchronizer.has_service(service) {
            return Err(SestError::unknown_service(service));
        }

        let service_name = service.to_string();
        match fault {
            Fault::TemporaryFailure { duration } => {
                self.synchronizer.register_middleware(TemporaryBlackout {
                    service: service_name,
                    until: duration,
                    clock: self.clock.clone(),
                });
            }
            Fault::PermanentFailure => {
                self.synchronizer
                    .register_middleware(PermanentBlackout { service: service_name });
            }
            Fault::MessageLoss { loss_percentage } => {
                self.synchronizer.register_middleware(MessageLossFault {
                    service: service_name,
                    probability: loss_percentage.clamp(0.0, 100.0) / 100.0,
                    rng: Arc::clone(&self.rng),
                });
            }
            Fault::Latency { delay } => {
                self.synchronizer.register_middleware(LatencyFault {
                    service: service_name,
                    delay,
                    clock: self.clock.clone(),
                });
            }
        }

        let installed_at = self.clock.now();
        info!(service, fault = ?fault, installed_at, "fault injected");
        lock(&self.installed).push(InstalledFault {
            service: service.to_string(),
            fault,
            installed_at,
        });

        Ok(())
    }

    /// Installs a fault named by string, e.g. `"temporaryFailure"`.
    ///
    /// Fails with `InvalidFaultType` for unrecognized names.
    pub fn inject_named(
        &self,
        service: &str,
        fault_type: &str,
        options: &FaultOptions,
    ) -> Result<(), SestError> {
        let fault_type: FaultType = fault_type.parse()?;
        self.inject(service, Fault::from_options(fault_type, options))
    }

    /// Returns the faults installed so far, in installation order.
    pub fn active_faults(&self) -> Vec<InstalledFault> {
        lock(&self.installed).clone()
    }

    /// Removes every interceptor from the chain, including ones not
    /// installed by this injector. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        lock(&self.installed).clear();
        self.synchronizer.clear_middleware()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sest_core::{StateMachine, Transition};
    use sest_env::{EventRequest, ServiceState};
    use serde_json::Value;

    fn setup(seed: u64) -> (EventSynchronizer, VirtualClock, FaultInjector) {
        let clock = VirtualClock::new();
        let machine = || {
            StateMachine::new(ServiceState::with_status("idle"))
                .with_transition(Transition::new("start", ["idle"], "processing"))
        };
        let sync = EventSynchronizer::new([("a", machine()), ("b", machine())], clock.clone());
        let injector = FaultInjector::new(sync.clone(), clock.clone(), seed);
        (sync, clock, injector)
    }

    fn status(sync: &EventSynchronizer, service: &str) -> String {
        sync.get_state(service).unwrap().status
    }

    #[test]
    fn test_fault_type_parsing() {
        assert_eq!("temporaryFailure".parse::<FaultType>(), Ok(FaultType::TemporaryFailure));
        assert_eq!("message_loss".parse::<FaultType>(), Ok(FaultType::MessageLoss));
        assert_eq!(
            "meteorStrike".parse::<FaultType>(),
            Err(SestError::InvalidFaultType("meteorStrike".to_string()))
        );

        for fault_type in FaultType::all() {
            assert_eq!(fault_type.name().parse::<FaultType>(), Ok(fault_type));
        }
    }

    #[test]
    fn test_option_defaults() {
        let options = FaultOptions::default();

        assert_eq!(
            Fault::from_options(FaultType::TemporaryFailure, &options),
            Fault::TemporaryFailure { duration: 2000 }
        );
        assert_eq!(
            Fault::from_options(FaultType::MessageLoss, &options),
            Fault::MessageLoss { loss_percentage: 10.0 }
        );
    }

    #[test]
    fn test_options_deserialize_camel_case() {
        let options: FaultOptions =
            serde_json::from_str(r#"{"duration": 500, "lossPercentage": 25.0}"#).unwrap();

        assert_eq!(options.duration, Some(500));
        assert_eq!(options.loss_percentage, Some(25.0));
        assert_eq!(options.latency, None);
    }

    #[test]
    fn test_invalid_fault_type_rejected() {
        let (sync, _, injector) = setup(1);

        let result = injector.inject_named("a", "meteorStrike", &FaultOptions::default());
        assert_eq!(result, Err(SestError::invalid_fault_type("meteorStrike")));
        assert_eq!(sync.middleware_count(), 0);
    }

    #[test]
    fn test_unknown_service_rejected() {
        let (_, _, injector) = setup(1);

        assert_eq!(
            injector.inject("ghost", Fault::PermanentFailure),
            Err(SestError::unknown_service("ghost"))
        );
        assert!(injector.active_faults().is_empty());
    }

    #[test]
    fn test_temporary_failure() {
        let (sync, clock, injector) = setup(1);
        injector
            .inject_named("a", "temporaryFailure", &FaultOptions::default().with_duration(2000))
            .unwrap();

        sync.send("a", "start", Value::Null).unwrap();
        assert_eq!(status(&sync, "a"), "idle");

        // The dropped event is not replayed by advancing time
        clock.advance_time(2000);
        assert_eq!(status(&sync, "a"), "idle");

        sync.send("a", "start", Value::Null).unwrap();
        assert_eq!(status(&sync, "a"), "processing");
    }

    #[test]
    fn test_temporary_failure_only_targets_service() {
        let (sync, _, injector) = setup(1);
        injector.inject("a", Fault::TemporaryFailure { duration: 100 }).unwrap();

        sync.send("b", "start", Value::Null).unwrap();
        assert_eq!(status(&sync, "b"), "processing");
    }

    #[test]
    fn test_permanent_failure_survives_reset() {
        let (sync, clock, injector) = setup(1);
        injector.inject("b", Fault::PermanentFailure).unwrap();

        sync.send("b", "start", Value::Null).unwrap();
        assert_eq!(status(&sync, "b"), "idle");

        sync.reset();
        clock.reset();
        clock.advance_time(1_000_000);

        let mut handle = sync.send("b", "start", Value::Null).unwrap();
        assert_eq!(status(&sync, "b"), "idle");
        assert!(!handle.is_resolved());

        sync.send("a", "start", Value::Null).unwrap();
        assert_eq!(status(&sync, "a"), "processing");
    }

    #[test]
    fn test_message_loss_eventually_delivers() {
        let (sync, _, injector) = setup(7);
        injector.inject("a", Fault::MessageLoss { loss_percentage: 50.0 }).unwrap();

        let mut attempts = 0;
        while status(&sync, "a") != "processing" && attempts < 64 {
            sync.send("a", "start", Value::Null).unwrap();
            attempts += 1;
        }

        assert_eq!(status(&sync, "a"), "processing");
    }

    #[test]
    fn test_message_loss_extremes() {
        let (sync, _, injector) = setup(3);
        injector.inject("a", Fault::MessageLoss { loss_percentage: 100.0 }).unwrap();
        injector.inject("b", Fault::MessageLoss { loss_percentage: 0.0 }).unwrap();

        for _ in 0..20 {
            sync.send("a", "start", Value::Null).unwrap();
        }
        sync.send("b", "start", Value::Null).unwrap();

        assert_eq!(status(&sync, "a"), "idle");
        assert_eq!(status(&sync, "b"), "processing");
    }

    #[test]
    fn test_message_loss_is_reproducible_from_seed() {
        let outcomes = |seed: u64| -> Vec<bool> {
            let (sync, _, injector) = setup(seed);
            injector.inject("a", Fault::MessageLoss { loss_percentage: 50.0 }).unwrap();
            (0..32)
                .map(|_| {
                    sync.reset();
                    let mut handle = sync.send("a", "start", Value::Null).unwrap();
                    handle.is_resolved()
                })
                .collect()
        };

        assert_eq!(outcomes(99), outcomes(99));
    }

    #[test]
    fn test_latency_defers_events() {
        let (sync, clock, injector) = setup(1);
        injector.inject("a", Fault::Latency { delay: 300 }).unwrap();

        sync.send("a", "start", Value::Null).unwrap();
        assert_eq!(status(&sync, "a"), "idle");

        clock.advance_time(299);
        assert_eq!(status(&sync, "a"), "idle");

        clock.advance_time(1);
        assert_eq!(status(&sync, "a"), "processing");
    }

    #[test]
    fn test_latency_extends_scheduled_time() {
        let (sync, clock, injector) = setup(1);
        injector.inject("a", Fault::Latency { delay: 100 }).unwrap();

        sync.send_event(EventRequest::new("a", "start", Value::Null).scheduled_at(500))
            .unwrap();

        clock.advance_time(500);
        assert_eq!(status(&sync, "a"), "idle");
        clock.advance_time(100);
        assert_eq!(status(&sync, "a"), "processing");
    }

    #[test]
    fn test_active_faults_and_clear() {
        let (sync, clock, injector) = setup(1);
        clock.advance_time(5);
        injector.inject("a", Fault::PermanentFailure).unwrap();
        injector.inject("b", Fault::Latency { delay: 10 }).unwrap();

        let faults = injector.active_faults();
        assert_eq!(faults.len(), 2);
        assert_eq!(faults[0].service, "a");
        assert_eq!(faults[0].installed_at, 5);
        assert_eq!(faults[1].fault.fault_type(), FaultType::Latency);

        assert_eq!(injector.clear_all(), 2);
        assert!(injector.active_faults().is_empty());

        sync.send("a", "start", Value::Null).unwrap();
        assert_eq!(status(&sync, "a"), "processing");
    }

    proptest::proptest! {
        #[test]
        fn prop_out_of_range_loss_is_clamped(seed in proptest::prelude::any::<u64>(), excess in 0.0f64..1000.0) {
            let (sync, _, injector) = setup(seed);
            injector.inject("a", Fault::MessageLoss { loss_percentage: 100.0 + excess }).unwrap();
            injector.inject("b", Fault::MessageLoss { loss_percentage: -excess }).unwrap();

            sync.send("a", "start", Value::Null).unwrap();
            sync.send("b", "start", Value::Null).unwrap();

            proptest::prop_assert_eq!(status(&sync, "a"), "idle");
            proptest::prop_assert_eq!(status(&sync, "b"), "processing");
        }
    }
}
