//! End-to-end tests through the SimWorld facade.

use sest_env::{EventRequest, SestError, ServiceState};
use sest_sim::services::{demo_machines, SERVICE_A, SERVICE_B, SERVICE_C};
use sest_sim::{Fault, FaultOptions, SimConfig, SimWorld};
use serde_json::{json, Value};
use std::time::Duration;

fn world() -> SimWorld {
    SimWorld::new(demo_machines(), SimConfig::default())
}

#[tokio::test]
async fn test_basic_flow_resolves_with_new_state() {
    let world = world();

    let started = world.send_event(SERVICE_A, "start", json!({"x": 1})).unwrap();
    assert_eq!(
        started.await,
        ServiceState::new("processing", json!({"x": 1}))
    );

    let finished = world.send_event(SERVICE_A, "finish", json!({"x": 2})).unwrap();
    assert_eq!(finished.await.status, "completed");
    assert_eq!(world.get_state(SERVICE_A).unwrap().data, json!({"x": 2}));
}

#[tokio::test]
async fn test_temporary_failure_then_recovery_after_reset() {
    let world = world();
    world
        .inject_named(
            SERVICE_B,
            "temporaryFailure",
            &FaultOptions::default().with_duration(1000),
        )
        .unwrap();

    let dropped = world.send_event(SERVICE_B, "request", Value::Null).unwrap();
    let waited = tokio::time::timeout(Duration::from_millis(20), dropped).await;
    assert!(waited.is_err(), "dropped event must never resolve");
    assert_eq!(world.get_state(SERVICE_B).unwrap().status, "idle");

    world.advance_time(1000);
    let resent = world.send_event(SERVICE_B, "request", Value::Null).unwrap();
    assert_eq!(resent.await.status, "waiting");

    // Reset zeroes the clock, so the blackout applies again.
    world.reset();
    let mut after_reset = world.send_event(SERVICE_B, "request", Value::Null).unwrap();
    assert!(after_reset.try_state().is_none());
    assert_eq!(world.get_state(SERVICE_B).unwrap().status, "idle");
}

#[tokio::test]
async fn test_parallel_sends_to_all_services() {
    let world = world();

    let handles = world
        .send_batch([
            EventRequest::new(SERVICE_A, "start", json!({"job": 1})),
            EventRequest::new(SERVICE_B, "request", json!({"job": 2})),
            EventRequest::new(SERVICE_C, "initialize", json!({"job": 3})),
        ])
        .unwrap();

    let mut statuses = Vec::new();
    for handle in handles {
        statuses.push(handle.await.status);
    }
    assert_eq!(statuses, ["processing", "waiting", "running"]);
}

#[tokio::test]
async fn test_deferred_handle_resolves_after_advance() {
    let world = world();

    let mut handle = world
        .send(EventRequest::new(SERVICE_C, "initialize", Value::Null).scheduled_at(250))
        .unwrap();
    assert!(handle.try_state().is_none());

    world.advance_time(250);
    assert_eq!(handle.await.status, "running");
}

#[test]
fn test_errors_surface_from_facade() {
    let world = world();

    assert_eq!(
        world.send_event("serviceZ", "start", Value::Null).unwrap_err(),
        SestError::UnknownService("serviceZ".to_string())
    );
    assert!(matches!(
        world.send_event(SERVICE_A, "finish", Value::Null),
        Err(SestError::InvalidTransition { .. })
    ));
    assert_eq!(
        world
            .inject_named(SERVICE_A, "meteorStrike", &FaultOptions::default())
            .unwrap_err(),
        SestError::InvalidFaultType("meteorStrike".to_string())
    );
    assert!(matches!(
        world.inject("serviceZ", Fault::PermanentFailure),
        Err(SestError::UnknownService(_))
    ));
}

#[test]
fn test_same_seed_same_losses() {
    let losses = |seed: u64| {
        let world = SimWorld::new(
            demo_machines(),
            SimConfig {
                seed,
                ..Default::default()
            },
        );
        world
            .inject(SERVICE_A, Fault::MessageLoss { loss_percentage: 50.0 })
            .unwrap();

        (0..40)
            .map(|_| {
                world.reset();
                let mut handle = world.send_event(SERVICE_A, "start", Value::Null).unwrap();
                handle.is_resolved()
            })
            .collect::<Vec<_>>()
    };

    assert_eq!(losses(1234), losses(1234));
}
