//! Declarative state machine definitions consumed by the synchronizer.
//!
//! A machine is immutable data owned by the caller: an initial state plus an
//! ordered list of transitions. Lookup respects declaration order, so when
//! several transitions could match the same (event, status) pair the first
//! one declared wins.

use sest_env::ServiceState;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// State-producing function of a transition: `(current state, payload) -> next state`.
pub type TransitionAction = Arc<dyn Fn(&ServiceState, &Value) -> ServiceState + Send + Sync>;

/// A rule mapping (event name, source status) to a new state.
#[derive(Clone)]
pub struct Transition {
    event: String,
    from: BTreeSet<String>,
    to: String,
    action: TransitionAction,
}

impl Transition {
    /// Creates a transition whose action moves to `to` and stores the payload
    /// as the state's data.
    pub fn new<I, S>(event: impl Into<String>, from: I, to: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let to = to.into();
        let target = to.clone();
        Self {
            event: event.into(),
            from: from.into_iter().map(Into::into).collect(),
            to,
            action: Arc::new(move |_, payload| ServiceState::new(target.clone(), payload.clone())),
        }
    }

    /// Replaces the action. The returned state is stored as-is; the action is
    /// responsible for setting its status.
    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&ServiceState, &Value) -> ServiceState + Send + Sync + 'static,
    {
        self.action = Arc::new(action);
        self
    }

    /// Event name this transition reacts to.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Source statuses this transition accepts.
    pub fn from(&self) -> &BTreeSet<String> {
        &self.from
    }

    /// Declared target status.
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Returns true if this transition handles `event` from `status`.
    pub fn matches(&self, event: &str, status: &str) -> bool {
        self.event == event && self.from.contains(status)
    }

    /// Produces the next state.
    pub fn apply(&self, state: &ServiceState, payload: &Value) -> ServiceState {
        (self.action)(state, payload)
    }
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("event", &self.event)
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

/// Immutable definition of one service's behavior.
#[derive(Debug, Clone)]
pub struct StateMachine {
    initial_state: ServiceState,
    transitions: Vec<Transition>,
}

impl StateMachine {
    /// Creates a machine with no transitions.
    pub fn new(initial_state: ServiceState) -> Self {
        Self {
            initial_state,
            transitions: Vec::new(),
        }
    }

    /// Appends a transition (declaration order is lookup order).
    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Returns the declared initial state.
    pub fn initial_state(&self) -> &ServiceState {
        &self.initial_state
    }

    /// Returns the transitions in declaration order.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Finds the first transition handling `event` from `status`.
    pub fn find_transition(&self, event: &str, status: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.matches(event, status))
    }
}
