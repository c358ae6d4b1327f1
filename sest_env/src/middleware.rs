//! Event interception abstraction.

use crate::types::Event;

/// Outcome of running one interceptor on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Hand the event to the next interceptor (or the queue)
    Proceed,

    /// Drop the event silently; its handle never resolves
    Drop,
}

/// An interceptor in the delivery chain.
///
/// Interceptors run in installation order for every event, regardless of the
/// service the event targets. The chain is walked by plain iteration: the
/// first `Verdict::Drop` ends it.
///
/// # Packet Flow
///
/// ```text
/// send_event --> [mw 1] --> [mw 2] --> ... --> pending queue --> drain
///                   |          |
///                   +-- Drop --+--> lost (never resolves)
/// ```
///
/// Closures of shape `Fn(&mut Event) -> Verdict` implement this trait.
pub trait Middleware: Send + Sync + 'static {
    /// Inspects (and possibly reshapes) the event.
    fn handle(&self, event: &mut Event) -> Verdict;

    /// Short label used in logs.
    fn name(&self) -> &str {
        "middleware"
    }
}

impl<F> Middleware for F
where
    F: Fn(&mut Event) -> Verdict + Send + Sync + 'static,
{
    fn handle(&self, event: &mut Event) -> Verdict {
        self(event)
    }
}
