//! Core time abstraction for SEST engines.

/// A callback registered to fire at a virtual time.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// The time interface the engines depend on.
///
/// This trait abstracts "time" so the event synchronizer never reads a real
/// clock. Time only moves when the owner of the implementation advances it.
///
/// # Determinism
///
/// Implementations must fire callbacks in ascending fire time, ties broken
/// by registration order, and never on their own.
pub trait SimClock: Clone + Send + Sync + 'static {
    /// Returns the current virtual time.
    fn now(&self) -> crate::VirtualTime;

    /// Registers `callback` to fire at `now() + delay`.
    ///
    /// The fire time is fixed at registration and not re-evaluated later.
    fn set_timeout(&self, delay: crate::VirtualTime, callback: TimerCallback);
}
