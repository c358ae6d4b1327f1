//! Error types for the SEST simulation harness.

use thiserror::Error;

/// Errors surfaced synchronously to the caller of a harness operation.
///
/// None of these are retried internally. A dropped event is not an error:
/// its handle simply never resolves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SestError {
    /// The service name is not part of the configured machine set
    #[error("Unknown service: '{0}'")]
    UnknownService(String),

    /// No transition matches the event from the service's current status
    #[error("Invalid transition for service '{service}' with event '{event}' (status '{status}')")]
    InvalidTransition {
        service: String,
        event: String,
        status: String,
    },

    /// Unrecognized fault-injection request
    #[error("Invalid fault type: '{0}'")]
    InvalidFaultType(String),
}

impl SestError {
    /// Creates an unknown-service error.
    pub fn unknown_service(service: impl Into<String>) -> Self {
        Self::UnknownService(service.into())
    }

    /// Creates an invalid-transition error.
    pub fn invalid_transition(
        service: impl Into<String>,
        event: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            service: service.into(),
            event: event.into(),
            status: status.into(),
        }
    }

    /// Creates an invalid-fault-type error.
    pub fn invalid_fault_type(fault_type: impl std::fmt::Display) -> Self {
        Self::InvalidFaultType(fault_type.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_names_service_and_event() {
        let err = SestError::invalid_transition("serviceA", "finish", "idle");
        let msg = err.to_string();

        assert!(msg.contains("'serviceA'"));
        assert!(msg.contains("'finish'"));
        assert!(msg.contains("'idle'"));
    }

    #[test]
    fn test_invalid_fault_type_message() {
        let err = SestError::invalid_fault_type("meteorStrike");
        assert_eq!(err.to_string(), "Invalid fault type: 'meteorStrike'");
    }
}
