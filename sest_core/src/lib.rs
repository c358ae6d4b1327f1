//! SEST Core - Event Synchronization Engine
//!
//! This library drives independently-modeled service state machines under
//! fully controlled timing:
//! 1. **Ordering**: pending events ranked by (priority, scheduled time, send order)
//! 2. **Interception**: an ordered middleware chain that may drop or reshape events
//! 3. **Deferral**: transitions scheduled on the virtual clock, applied only when
//!    the caller advances time

pub mod priority_queue;
pub mod state_machine;
pub mod synchronizer;

// Re-export key types for convenience
pub use priority_queue::{Comparator, PriorityQueue};
pub use state_machine::{StateMachine, Transition, TransitionAction};
pub use synchronizer::{EventHandle, EventOrdering, EventSynchronizer, SyncConfig};
