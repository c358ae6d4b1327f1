//! SEST Deterministic Simulation Testing (DST) Harness
//!
//! This crate wires the SEST engines into a controlled environment where a
//! set of service state machines runs deterministically under injected
//! faults.
//!
//! # Core Principle: Nothing Happens Unless the Caller Says So
//!
//! - **Time**: the virtual clock moves only on `advance_time`
//! - **Delivery**: every event crosses the middleware chain, where faults live
//! - **Randomness**: message loss draws from a single seeded RNG
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                         SimWorld                          │
//! │  ┌────────────────┐   set_timeout   ┌──────────────────┐  │
//! │  │ VirtualClock   │◄────────────────│ EventSynchronizer│  │
//! │  └────────────────┘                 │  middleware ──►  │  │
//! │          ▲                          │  queue ──► drain │  │
//! │          │ now()                    └────────▲─────────┘  │
//! │  ┌───────┴──────────────────────────────────┴─────────┐   │
//! │  │            FaultInjector (installs middleware)     │   │
//! │  └────────────────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use sest_sim::{services, SimConfig, SimWorld};
//!
//! let world = SimWorld::new(services::demo_machines(), SimConfig::default());
//! world.inject_named("serviceA", "temporaryFailure", &Default::default())?;
//! world.send_event("serviceA", "start", serde_json::Value::Null)?;
//! ```

mod fault;
mod runner;
mod world;
pub mod scenarios;
pub mod services;

pub use fault::{
    Fault, FaultInjector, FaultOptions, FaultType, InstalledFault, LatencyFault, MessageLossFault,
    PermanentBlackout, TemporaryBlackout, DEFAULT_BLACKOUT_DURATION, DEFAULT_LATENCY,
    DEFAULT_LOSS_PERCENTAGE,
};
pub use runner::{
    results_json, ScenarioFailure, ScenarioMetrics, ScenarioResult, ScenarioRunner,
    MIN_LOSS_ATTEMPTS,
};
pub use world::{SimConfig, SimWorld};
