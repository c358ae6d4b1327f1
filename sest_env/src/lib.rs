//! SEST Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" seams that let the SEST engines run
//! without depending on wall-clock time or a real network.
//!
//! # Core Concept: Virtual Time and Interception
//!
//! For Deterministic Simulation Testing (DST), everything that would
//! introduce non-determinism is owned by the harness:
//! - Time (`now()`, `set_timeout()`) advances only when the caller says so
//! - Delivery (`Middleware`) can block or reshape any event before it is queued
//!
//! # Example
//!
//! ```ignore
//! use sest_env::{SimClock, VirtualClock};
//!
//! let clock = VirtualClock::new();
//! clock.set_timeout(500, Box::new(|| tracing::info!("fired")));
//! clock.advance_time(500);
//! ```

mod clock;
mod error;
mod middleware;
mod types;
mod virtual_clock;

pub use clock::{SimClock, TimerCallback};
pub use error::SestError;
pub use middleware::{Middleware, Verdict};
pub use types::{
    Event, EventId, EventRequest, Priority, ServiceState, VirtualTime, DEFAULT_PRIORITY,
};
pub use virtual_clock::VirtualClock;
