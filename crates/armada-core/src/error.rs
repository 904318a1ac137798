use thiserror::Error;

/// Domain-error taxonomy for the fleet engine.
///
/// None of these are fatal to the process: the scheduler and dispatcher
/// loops log and skip, while command handlers surface them to the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// A referenced entity does not exist (dangling foreign key target).
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    /// The state machine rejected a requested move. The entity is unchanged.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// An optimistic-concurrency write lost the race, even after the
    /// automatic retry.
    #[error("dispatch conflict: {0}")]
    DispatchConflict(String),

    /// An auto-schedule frequency with no time-and-day entries.
    #[error("schedule misconfigured: {0}")]
    ScheduleMisconfigured(String),

    /// Dispatch was attempted against an ineligible robot.
    #[error("robot unavailable: {0}")]
    RobotUnavailable(String),

    /// A delete was rejected because fleet state still references the
    /// entity. Restrict, never cascade.
    #[error("still referenced: {0}")]
    ReferenceInUse(String),
}

impl Error {
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition { from: from.into(), to: to.into() }
    }
}
