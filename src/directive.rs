//! The directive grammar returned by `WorkflowDefinition::error`.
//!
//! Modeled as a single sum type rather than tuples, per the design note that
//! invalid directives should become either a compile-time impossibility or a
//! single catch-all runtime branch. Event-path and command-path callers each
//! accept only a subset of variants; see [`Directive::for_event_failure`] and
//! [`Directive::for_command_failure`].

use serde_json::Value;

/// Instruction returned by `WorkflowDefinition::error` telling the instance how
/// to proceed after a handler or dispatch failure.
///
/// `context` fields are never interpreted by the instance. They are opaque,
/// developer-owned scratch values threaded verbatim into the next `error`
/// invocation for the same event or command.
#[derive(Debug, Clone)]
pub enum Directive<C> {
    /// Re-run the unseen-event pipeline (event path) or retry the failed
    /// command then continue with originally-pending commands (command path).
    Retry { context: Value },
    /// Sleep `delay_ms` milliseconds, then behave as [`Directive::Retry`].
    RetryAfter { delay_ms: u64, context: Value },
    /// Event path only: acknowledge the event; do not apply; do not advance
    /// `LastSeenEvent`.
    Skip,
    /// Command path only: treat the event's overall dispatch as successful
    /// (the post-success path runs: apply, snapshot, advance, ack).
    SkipDiscardPending,
    /// Command path only: drop the failed command only; continue dispatching
    /// the still-pending tail.
    SkipContinuePending,
    /// Command path only: restart dispatch with `commands`, replacing both the
    /// failed command and the pending tail, under the new context.
    Continue { commands: Vec<C>, context: Value },
    /// Terminate the instance with `reason`. Valid on both paths.
    Stop { reason: String },
}

/// The directives meaningful to the Event Failure Protocol.
#[derive(Debug, Clone)]
pub enum EventDirective {
    Retry { context: Value },
    RetryAfter { delay_ms: u64, context: Value },
    Skip,
    Stop { reason: String },
}

/// The directives meaningful to the Command Failure Protocol.
#[derive(Debug, Clone)]
pub enum CommandDirective<C> {
    Retry { context: Value },
    RetryAfter { delay_ms: u64, context: Value },
    SkipDiscardPending,
    SkipContinuePending,
    Continue { commands: Vec<C>, context: Value },
    Stop { reason: String },
}

impl<C> Directive<C> {
    /// Narrow a directive to the subset valid for the Event Failure Protocol.
    ///
    /// Returns `Err(self)` (with the original directive, so the caller can log
    /// it) when the Definition returned a command-path-only variant such as
    /// `SkipDiscardPending` in response to a handler failure.
    pub fn for_event_failure(self) -> Result<EventDirective, Directive<C>> {
        match self {
            Directive::Retry { context } => Ok(EventDirective::Retry { context }),
            Directive::RetryAfter { delay_ms, context } => {
                Ok(EventDirective::RetryAfter { delay_ms, context })
            }
            Directive::Skip => Ok(EventDirective::Skip),
            Directive::Stop { reason } => Ok(EventDirective::Stop { reason }),
            other => Err(other),
        }
    }

    /// Narrow a directive to the subset valid for the Command Failure Protocol.
    pub fn for_command_failure(self) -> Result<CommandDirective<C>, Directive<C>> {
        match self {
            Directive::Retry { context } => Ok(CommandDirective::Retry { context }),
            Directive::RetryAfter { delay_ms, context } => {
                Ok(CommandDirective::RetryAfter { delay_ms, context })
            }
            Directive::SkipDiscardPending => Ok(CommandDirective::SkipDiscardPending),
            Directive::SkipContinuePending => Ok(CommandDirective::SkipContinuePending),
            Directive::Continue { commands, context } => {
                Ok(CommandDirective::Continue { commands, context })
            }
            Directive::Stop { reason } => Ok(CommandDirective::Stop { reason }),
            other @ Directive::Skip => Err(other),
        }
    }
}
