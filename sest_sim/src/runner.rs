//! Scenario runner - executes fault scenarios against the demo services.

use crate::fault::{Fault, FaultOptions, DEFAULT_BLACKOUT_DURATION, DEFAULT_LATENCY};
use crate::scenarios::ScenarioId;
use crate::services::{demo_machines, SERVICE_A, SERVICE_B, SERVICE_C};
use crate::world::{SimConfig, SimWorld};

use sest_core::EventHandle;
use sest_env::{EventRequest, SestError, VirtualTime};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a scenario run failed.
#[derive(Debug, Error)]
pub enum ScenarioFailure {
    /// The harness rejected an operation
    #[error("harness error: {0}")]
    Harness(#[from] SestError),

    /// An observed state did not match expectations
    #[error("{0}")]
    Expectation(String),
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Virtual time when the scenario ended
    pub final_time: VirtualTime,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScenarioMetrics {
    /// Events handed to the synchronizer
    pub events_sent: u64,

    /// Events whose transition was applied
    pub events_resolved: u64,

    /// Events that never resolved
    pub events_lost: u64,
}

/// Handles sent during one run, summarized into metrics at the end.
#[derive(Default)]
struct Tally {
    handles: Vec<EventHandle>,
}

impl Tally {
    fn track(&mut self, handle: EventHandle) -> &mut EventHandle {
        self.handles.push(handle);
        let last = self.handles.len() - 1;
        &mut self.handles[last]
    }

    fn track_all(&mut self, handles: Vec<EventHandle>) {
        self.handles.extend(handles);
    }

    fn metrics(&mut self) -> ScenarioMetrics {
        let sent = self.handles.len() as u64;
        let resolved = self
            .handles
            .iter_mut()
            .map(|handle| handle.is_resolved())
            .filter(|resolved| *resolved)
            .count() as u64;

        ScenarioMetrics {
            events_sent: sent,
            events_resolved: resolved,
            events_lost: sent - resolved,
        }
    }
}

/// Fewest send attempts that make the message loss band check meaningful.
pub const MIN_LOSS_ATTEMPTS: usize = 32;

/// Runs fault scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Send attempts in the message loss scenario
    loss_attempts: usize,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            loss_attempts: 64,
        }
    }

    /// Sets the number of send attempts used by the message loss scenario.
    ///
    /// Values below [`MIN_LOSS_ATTEMPTS`] are raised to it.
    pub fn with_loss_attempts(mut self, attempts: usize) -> Self {
        self.loss_attempts = attempts.max(MIN_LOSS_ATTEMPTS);
        self
    }

    /// Runs every scenario in order.
    pub fn run_all(&self) -> Vec<ScenarioResult> {
        ScenarioId::all()
            .into_iter()
            .map(|scenario| self.run(scenario))
            .collect()
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let world = SimWorld::new(demo_machines(), self.config_for(scenario));
        let mut tally = Tally::default();

        let outcome = match scenario {
            ScenarioId::BasicFlow => self.run_basic_flow(&world, &mut tally),
            ScenarioId::TemporaryBlackout => self.run_temporary_blackout(&world, &mut tally),
            ScenarioId::PermanentBlackout => self.run_permanent_blackout(&world, &mut tally),
            ScenarioId::MessageLoss => self.run_message_loss(&world, &mut tally),
            ScenarioId::PriorityOrdering => self.run_priority_ordering(&world, &mut tally),
            ScenarioId::DeferredDelivery => self.run_deferred_delivery(&world, &mut tally),
            ScenarioId::ParallelDelivery => self.run_parallel_delivery(&world, &mut tally),
            ScenarioId::Latency => self.run_latency(&world, &mut tally),
        };

        let metrics = tally.metrics();
        let failure_reason = outcome.err().map(|failure| {
            warn!("{} failed: {}", scenario.code(), failure);
            failure.to_string()
        });

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            final_time: world.time(),
            failure_reason,
            metrics,
        }
    }

    fn config_for(&self, scenario: ScenarioId) -> SimConfig {
        let mut config = SimConfig {
            seed: self.seed,
            ..Default::default()
        };
        if scenario == ScenarioId::PriorityOrdering {
            config.max_events_per_drain = Some(1);
        }
        config
    }

    /// SEST-001: BasicFlow - payloads become the new state data.
    fn run_basic_flow(&self, world: &SimWorld, tally: &mut Tally) -> Result<(), ScenarioFailure> {
        tally.track(world.send_event(SERVICE_A, "start", json!({"x": 1}))?);
        expect_state(world, SERVICE_A, "processing", &json!({"x": 1}))?;

        tally.track(world.send_event(SERVICE_A, "finish", json!({"x": 2}))?);
        expect_state(world, SERVICE_A, "completed", &json!({"x": 2}))
    }

    /// SEST-002: TemporaryBlackout - drops stop once time reaches the duration.
    fn run_temporary_blackout(
        &self,
        world: &SimWorld,
        tally: &mut Tally,
    ) -> Result<(), ScenarioFailure> {
        world.inject(
            SERVICE_A,
            Fault::TemporaryFailure {
                duration: DEFAULT_BLACKOUT_DURATION,
            },
        )?;

        let dropped = tally.track(world.send_event(SERVICE_A, "start", Value::Null)?);
        ensure(!dropped.is_resolved(), || {
            "event resolved during blackout".to_string()
        })?;
        expect_status(world, SERVICE_A, "idle")?;

        world.advance_time(DEFAULT_BLACKOUT_DURATION - 1);
        tally.track(world.send_event(SERVICE_A, "start", Value::Null)?);
        expect_status(world, SERVICE_A, "idle")?;

        world.advance_time(1);
        let resent = tally.track(world.send_event(SERVICE_A, "start", Value::Null)?);
        ensure(resent.is_resolved(), || {
            "resend after blackout did not resolve".to_string()
        })?;
        expect_status(world, SERVICE_A, "processing")
    }

    /// SEST-003: PermanentBlackout - no time advance or reset lifts it.
    fn run_permanent_blackout(
        &self,
        world: &SimWorld,
        tally: &mut Tally,
    ) -> Result<(), ScenarioFailure> {
        world.inject_named(SERVICE_C, "permanentFailure", &FaultOptions::default())?;

        for round in 0..3 {
            tally.track(world.send_event(SERVICE_C, "initialize", Value::Null)?);
            expect_status(world, SERVICE_C, "idle")?;
            debug!(round, "serviceC still idle");

            world.advance_time(10_000);
            world.reset();
        }

        // Other services are untouched.
        tally.track(world.send_event(SERVICE_A, "start", Value::Null)?);
        expect_status(world, SERVICE_A, "processing")
    }

    /// SEST-004: MessageLoss - roughly half the sends are lost.
    fn run_message_loss(&self, world: &SimWorld, tally: &mut Tally) -> Result<(), ScenarioFailure> {
        world.inject_named(
            SERVICE_B,
            "messageLoss",
            &FaultOptions::default().with_loss_percentage(50.0),
        )?;

        let mut lost = 0;
        for _ in 0..self.loss_attempts {
            world.reset();
            let handle = tally.track(world.send_event(SERVICE_B, "request", Value::Null)?);
            let delivered = handle.is_resolved();
            let status = world.get_state(SERVICE_B)?.status;

            ensure(delivered == (status == "waiting"), || {
                format!("handle resolved={} but serviceB is {}", delivered, status)
            })?;
            if !delivered {
                lost += 1;
            }
        }

        let rate = lost as f64 / self.loss_attempts as f64;
        info!(
            "✓ MessageLoss complete: {:.1}% lost ({}/{})",
            rate * 100.0,
            lost,
            self.loss_attempts
        );

        ensure((0.25..=0.75).contains(&rate), || {
            format!("Unexpected loss rate: {:.1}%", rate * 100.0)
        })
    }

    /// SEST-005: PriorityOrdering - one event per drain, lowest value first.
    fn run_priority_ordering(
        &self,
        world: &SimWorld,
        tally: &mut Tally,
    ) -> Result<(), ScenarioFailure> {
        tally.track_all(world.send_batch([
            EventRequest::new(SERVICE_A, "start", Value::Null).with_priority(2),
            EventRequest::new(SERVICE_B, "request", Value::Null).with_priority(1),
            EventRequest::new(SERVICE_C, "initialize", Value::Null).with_priority(3),
        ])?);

        expect_status(world, SERVICE_B, "waiting")?;
        expect_status(world, SERVICE_A, "idle")?;
        expect_status(world, SERVICE_C, "idle")?;

        world.process_pending()?;
        expect_status(world, SERVICE_A, "processing")?;
        expect_status(world, SERVICE_C, "idle")?;

        world.process_pending()?;
        expect_status(world, SERVICE_C, "running")?;

        let leftover = world.process_pending()?;
        ensure(leftover == 0, || format!("{} events left queued", leftover))
    }

    /// SEST-006: DeferredDelivery - scheduled transitions fire on advance.
    fn run_deferred_delivery(
        &self,
        world: &SimWorld,
        tally: &mut Tally,
    ) -> Result<(), ScenarioFailure> {
        tally.track(world.send(
            EventRequest::new(SERVICE_A, "start", json!({"at": 500})).scheduled_at(500),
        )?);
        tally.track(world.send(
            EventRequest::new(SERVICE_B, "request", json!({"at": 1000})).scheduled_at(1000),
        )?);

        expect_status(world, SERVICE_A, "idle")?;
        expect_status(world, SERVICE_B, "idle")?;

        world.advance_time(499);
        expect_status(world, SERVICE_A, "idle")?;

        world.advance_time(1);
        expect_state(world, SERVICE_A, "processing", &json!({"at": 500}))?;
        expect_status(world, SERVICE_B, "idle")?;

        world.advance_time(500);
        expect_state(world, SERVICE_B, "waiting", &json!({"at": 1000}))
    }

    /// SEST-007: ParallelDelivery - a batch touches every service.
    fn run_parallel_delivery(
        &self,
        world: &SimWorld,
        tally: &mut Tally,
    ) -> Result<(), ScenarioFailure> {
        tally.track_all(world.send_batch([
            EventRequest::new(SERVICE_A, "start", Value::Null),
            EventRequest::new(SERVICE_B, "request", Value::Null),
            EventRequest::new(SERVICE_C, "initialize", Value::Null),
        ])?);

        expect_status(world, SERVICE_A, "processing")?;
        expect_status(world, SERVICE_B, "waiting")?;
        expect_status(world, SERVICE_C, "running")
    }

    /// SEST-008: Latency - the response lands after the configured delay.
    fn run_latency(&self, world: &SimWorld, tally: &mut Tally) -> Result<(), ScenarioFailure> {
        tally.track(world.send_event(SERVICE_B, "request", Value::Null)?);
        expect_status(world, SERVICE_B, "waiting")?;

        world.inject_named(SERVICE_B, "latency", &FaultOptions::default())?;
        let delayed = tally.track(world.send_event(SERVICE_B, "response", Value::Null)?);
        ensure(!delayed.is_resolved(), || {
            "delayed event resolved immediately".to_string()
        })?;

        world.advance_time(DEFAULT_LATENCY - 1);
        expect_status(world, SERVICE_B, "waiting")?;

        world.advance_time(1);
        expect_status(world, SERVICE_B, "completed")
    }
}

/// Summarizes results as JSON for CI parsing.
pub fn results_json(results: &[ScenarioResult]) -> Value {
    let failed = results.iter().filter(|r| !r.passed).count();

    json!({
        "total": results.len(),
        "passed": results.len() - failed,
        "failed": failed,
        "results": results.iter().map(|r| {
            json!({
                "scenario": r.scenario.name(),
                "code": r.scenario.code(),
                "seed": r.seed,
                "passed": r.passed,
                "final_time": r.final_time,
                "failure_reason": r.failure_reason,
                "metrics": r.metrics,
            })
        }).collect::<Vec<_>>(),
    })
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), ScenarioFailure> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioFailure::Expectation(message()))
    }
}

fn expect_status(world: &SimWorld, service: &str, status: &str) -> Result<(), ScenarioFailure> {
    let actual = world.get_state(service)?;
    ensure(actual.status == status, || {
        format!("{} is {}, expected {}", service, actual.status, status)
    })
}

fn expect_state(
    world: &SimWorld,
    service: &str,
    status: &str,
    data: &Value,
) -> Result<(), ScenarioFailure> {
    expect_status(world, service, status)?;
    let actual = world.get_state(service)?;
    ensure(&actual.data == data, || {
        format!("{} data is {}, expected {}", service, actual.data, data)
    })
}
