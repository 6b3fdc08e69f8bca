//! Error taxonomy for the Process Manager Instance.
//!
//! One variant per failure kind, matching the teacher's pattern of
//! pattern-matchable structured errors instead of a bag of `anyhow::Error`.
//! External collaborator traits (`SnapshotStore`, `Dispatcher`, `Router`)
//! return `anyhow::Result` at their own boundary; the instance wraps those into
//! the appropriate variant here rather than propagating `anyhow::Error` across
//! its own public API.

use crate::core::EventNumber;

/// Errors an instance can encounter. Kinds, not concrete external error types.
#[derive(Debug, thiserror::Error)]
pub enum PmiError {
    /// `WorkflowDefinition::handle` returned an error or panicked.
    #[error("handler failed for event {event_number} on instance {instance}: {source}")]
    HandlerFailure {
        instance: String,
        event_number: EventNumber,
        #[source]
        source: anyhow::Error,
    },

    /// The Dispatcher returned a non-ok result for a specific command.
    #[error("dispatch failed for command {command_index} of event {event_number} on instance {instance}: {source}")]
    DispatchFailure {
        instance: String,
        event_number: EventNumber,
        command_index: usize,
        #[source]
        source: anyhow::Error,
    },

    /// `WorkflowDefinition::error` returned something outside the grammar of
    /// the directive it was asked to produce (event-path vs. command-path).
    #[error("invalid directive from instance {instance} for event {event_number}: {original}")]
    InvalidDirective {
        instance: String,
        event_number: EventNumber,
        /// The error that triggered the `error` callback in the first place.
        original: anyhow::Error,
    },

    /// Explicit `Stop { reason }` directive. Terminal.
    #[error("instance {instance} stopped: {reason}")]
    StopRequested { instance: String, reason: String },

    /// Unexpected failure reading, writing, or deleting a snapshot. Fatal;
    /// propagated as a startup or operational failure.
    #[error("snapshot I/O error for key {key}: {source}")]
    SnapshotIOError {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PmiError {
    /// Identity string of the instance this error originated from, where available.
    pub fn instance(&self) -> Option<&str> {
        match self {
            PmiError::HandlerFailure { instance, .. }
            | PmiError::DispatchFailure { instance, .. }
            | PmiError::InvalidDirective { instance, .. }
            | PmiError::StopRequested { instance, .. } => Some(instance),
            PmiError::SnapshotIOError { .. } => None,
        }
    }

    /// True for errors that terminate the instance outright (no further
    /// events will be processed).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PmiError::StopRequested { .. }
                | PmiError::InvalidDirective { .. }
                | PmiError::SnapshotIOError { .. }
        )
    }
}
