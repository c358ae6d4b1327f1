//! Manually advanced virtual clock.

use crate::clock::{SimClock, TimerCallback};
use crate::types::VirtualTime;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Virtual clock whose time moves only through [`VirtualClock::advance_time`].
///
/// Pending callbacks are kept sorted by `(fire time, registration sequence)`,
/// so due callbacks fire in ascending fire time with ties in registration
/// order. Clones share the same time and timer set.
///
/// # Re-entrancy
///
/// A callback registered while `advance_time` is firing is never fired by
/// that same call, even with delay 0. It waits for the next `advance_time`
/// (an `advance_time(0)` is enough).
#[derive(Clone, Default)]
pub struct VirtualClock {
    state: Arc<Mutex<ClockState>>,
}

#[derive(Default)]
struct ClockState {
    /// Current virtual time
    now: VirtualTime,

    /// Pending callbacks keyed by (fire time, registration sequence)
    timers: BTreeMap<(VirtualTime, u64), TimerCallback>,

    /// Next registration sequence number
    next_seq: u64,
}

impl VirtualClock {
    /// Creates a clock at time zero with no pending callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current virtual time.
    pub fn get_time(&self) -> VirtualTime {
        self.lock().now
    }

    /// Advances time by `delta` and fires every due callback.
    ///
    /// Each callback is removed from the pending set before it is invoked,
    /// and the clock lock is released while it runs, so callbacks may read
    /// the clock or register new timers. Returns the number fired.
    pub fn advance_time(&self, delta: VirtualTime) -> usize {
        let horizon = {
            let mut state = self.lock();
            state.now = state.now.saturating_add(delta);
            state.next_seq
        };

        let mut fired = 0;
        loop {
            let callback = {
                let mut state = self.lock();
                let now = state.now;
                let due = state
                    .timers
                    .range(..=(now, u64::MAX))
                    .map(|(key, _)| *key)
                    .find(|(_, seq)| *seq < horizon);

                match due.and_then(|key| state.timers.remove(&key)) {
                    Some(callback) => callback,
                    None => break,
                }
            };

            callback();
            fired += 1;
        }

        fired
    }

    /// Zeroes time and discards pending callbacks without firing them.
    pub fn reset(&self) {
        let discarded = {
            let mut state = self.lock();
            state.now = 0;
            std::mem::take(&mut state.timers)
        };
        // Dropped outside the lock: callbacks may own handles to other state.
        drop(discarded);
    }

    /// Returns the number of callbacks waiting to fire.
    pub fn pending_timers(&self) -> usize {
        self.lock().timers.len()
    }

    /// Returns the earliest pending fire time, if any.
    pub fn next_deadline(&self) -> Option<VirtualTime> {
        self.lock().timers.keys().next().map(|(at, _)| *at)
    }
}

impl SimClock for VirtualClock {
    fn now(&self) -> VirtualTime {
        self.get_time()
    }

    fn set_timeout(&self, delay: VirtualTime, callback: TimerCallback) {
        let mut state = self.lock();
        let fire_at = state.now.saturating_add(delay);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.timers.insert((fire_at, seq), callback);
    }
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("VirtualClock")
            .field("now", &state.now)
            .field("pending_timers", &state.timers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> TimerCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |label: &'static str| -> TimerCallback {
            let sink = Arc::clone(&sink);
            Box::new(move || sink.lock().unwrap().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_clock_starts_at_zero() {
        let clock = VirtualClock::new();
        assert_eq!(clock.get_time(), 0);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn test_advance_accumulates() {
        let clock = VirtualClock::new();
        clock.advance_time(1000);
        clock.advance_time(500);
        assert_eq!(clock.get_time(), 1500);
    }

    #[test]
    fn test_callbacks_fire_in_time_order() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();

        clock.set_timeout(300, make("c"));
        clock.set_timeout(100, make("a"));
        clock.set_timeout(200, make("b"));

        assert_eq!(clock.advance_time(300), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ties_fire_in_registration_order() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();

        clock.set_timeout(100, make("first"));
        clock.set_timeout(100, make("second"));
        clock.set_timeout(100, make("third"));

        clock.advance_time(100);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_callbacks_wait_for_their_time() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();

        clock.set_timeout(1000, make("late"));

        assert_eq!(clock.advance_time(999), 0);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(clock.next_deadline(), Some(1000));

        assert_eq!(clock.advance_time(1), 1);
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
        assert_eq!(clock.next_deadline(), None);
    }

    #[test]
    fn test_fire_time_fixed_at_registration() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();

        clock.advance_time(500);
        clock.set_timeout(100, make("at_600"));

        clock.advance_time(99);
        assert!(log.lock().unwrap().is_empty());
        clock.advance_time(1);
        assert_eq!(*log.lock().unwrap(), vec!["at_600"]);
    }

    #[test]
    fn test_reset_discards_without_firing() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();

        clock.advance_time(50);
        clock.set_timeout(10, make("never"));
        clock.reset();

        assert_eq!(clock.get_time(), 0);
        assert_eq!(clock.pending_timers(), 0);
        clock.advance_time(1000);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_timer_registered_while_firing_waits_for_next_advance() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();

        let inner_clock = clock.clone();
        let nested = make("nested");
        let outer_sink = Arc::clone(&log);
        clock.set_timeout(
            10,
            Box::new(move || {
                outer_sink.lock().unwrap().push("outer");
                inner_clock.set_timeout(0, nested);
            }),
        );

        assert_eq!(clock.advance_time(10), 1);
        assert_eq!(*log.lock().unwrap(), vec!["outer"]);
        assert_eq!(clock.pending_timers(), 1);

        assert_eq!(clock.advance_time(0), 1);
        assert_eq!(*log.lock().unwrap(), vec!["outer", "nested"]);
    }

    #[test]
    fn test_clone_shares_time() {
        let clock1 = VirtualClock::new();
        let clock2 = clock1.clone();

        clock1.advance_time(5);
        assert_eq!(clock2.now(), 5);
    }
}
