//! Fault scenarios for the demo services.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// SEST-001: idle -> processing -> completed on serviceA
    BasicFlow,

    /// SEST-002: events dropped until the blackout window closes
    TemporaryBlackout,

    /// SEST-003: every event dropped, across resets
    PermanentBlackout,

    /// SEST-004: seeded message loss stays within bounds
    MessageLoss,

    /// SEST-005: priorities decide order when drains are capped
    PriorityOrdering,

    /// SEST-006: scheduled transitions wait for advance_time
    DeferredDelivery,

    /// SEST-007: independent services progress in one batch
    ParallelDelivery,

    /// SEST-008: latency fault defers delivery by a fixed delay
    Latency,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::BasicFlow,
            ScenarioId::TemporaryBlackout,
            ScenarioId::PermanentBlackout,
            ScenarioId::MessageLoss,
            ScenarioId::PriorityOrdering,
            ScenarioId::DeferredDelivery,
            ScenarioId::ParallelDelivery,
            ScenarioId::Latency,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::BasicFlow => "basic_flow",
            ScenarioId::TemporaryBlackout => "temporary_blackout",
            ScenarioId::PermanentBlackout => "permanent_blackout",
            ScenarioId::MessageLoss => "message_loss",
            ScenarioId::PriorityOrdering => "priority_ordering",
            ScenarioId::DeferredDelivery => "deferred_delivery",
            ScenarioId::ParallelDelivery => "parallel_delivery",
            ScenarioId::Latency => "latency",
        }
    }

    /// Returns the short code, e.g. `sest-001`.
    pub fn code(&self) -> &'static str {
        match self {
            ScenarioId::BasicFlow => "sest-001",
            ScenarioId::TemporaryBlackout => "sest-002",
            ScenarioId::PermanentBlackout => "sest-003",
            ScenarioId::MessageLoss => "sest-004",
            ScenarioId::PriorityOrdering => "sest-005",
            ScenarioId::DeferredDelivery => "sest-006",
            ScenarioId::ParallelDelivery => "sest-007",
            ScenarioId::Latency => "sest-008",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::BasicFlow => "serviceA walks idle -> processing -> completed",
            ScenarioId::TemporaryBlackout => {
                "serviceA blacked out for 2000 ticks, resend succeeds after advance"
            }
            ScenarioId::PermanentBlackout => "serviceC never leaves idle, even after reset",
            ScenarioId::MessageLoss => "50% loss on serviceB, loss rate within 25-75%",
            ScenarioId::PriorityOrdering => "drain cap 1, three services fire lowest priority first",
            ScenarioId::DeferredDelivery => "transitions at t=500 and t=1000 fire only on advance",
            ScenarioId::ParallelDelivery => "all three services start in one batch",
            ScenarioId::Latency => "100 tick latency on serviceB delays the response",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic_flow" | "basicflow" | "sest-001" => Ok(ScenarioId::BasicFlow),
            "temporary_blackout" | "temporaryblackout" | "sest-002" => {
                Ok(ScenarioId::TemporaryBlackout)
            }
            "permanent_blackout" | "permanentblackout" | "sest-003" => {
                Ok(ScenarioId::PermanentBlackout)
            }
            "message_loss" | "messageloss" | "sest-004" => Ok(ScenarioId::MessageLoss),
            "priority_ordering" | "priorityordering" | "sest-005" => {
                Ok(ScenarioId::PriorityOrdering)
            }
            "deferred_delivery" | "deferreddelivery" | "sest-006" => {
                Ok(ScenarioId::DeferredDelivery)
            }
            "parallel_delivery" | "paralleldelivery" | "sest-007" => {
                Ok(ScenarioId::ParallelDelivery)
            }
            "latency" | "sest-008" => Ok(ScenarioId::Latency),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
