//! Demo service state machines used by the scenarios and the CLI.
//!
//! Three small services, each starting `idle` with `null` data:
//! - `serviceA`: idle --start--> processing --finish--> completed
//! - `serviceB`: idle --request--> waiting --response--> completed
//! - `serviceC`: idle --initialize--> running --terminate--> terminated

use sest_core::{StateMachine, Transition};
use sest_env::ServiceState;

pub const SERVICE_A: &str = "serviceA";
pub const SERVICE_B: &str = "serviceB";
pub const SERVICE_C: &str = "serviceC";

/// Worker-style service.
pub fn service_a() -> StateMachine {
    StateMachine::new(ServiceState::with_status("idle"))
        .with_transition(Transition::new("start", ["idle"], "processing"))
        .with_transition(Transition::new("finish", ["processing"], "completed"))
}

/// Request/response service.
pub fn service_b() -> StateMachine {
    StateMachine::new(ServiceState::with_status("idle"))
        .with_transition(Transition::new("request", ["idle"], "waiting"))
        .with_transition(Transition::new("response", ["waiting"], "completed"))
}

/// Long-running daemon service.
pub fn service_c() -> StateMachine {
    StateMachine::new(ServiceState::with_status("idle"))
        .with_transition(Transition::new("initialize", ["idle"], "running"))
        .with_transition(Transition::new("terminate", ["running"], "terminated"))
}

/// Returns all demo services keyed by name.
pub fn demo_machines() -> Vec<(&'static str, StateMachine)> {
    vec![
        (SERVICE_A, service_a()),
        (SERVICE_B, service_b()),
        (SERVICE_C, service_c()),
    ]
}
