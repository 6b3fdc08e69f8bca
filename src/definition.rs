//! The `WorkflowDefinition` trait: the user-supplied interface of three pure
//! operations.
//!
//! Generalized from the teacher's `Machine` trait (`machine.rs`): where a
//! `Machine::decide` returns `Option<Command>` for a single event type fanned
//! out across many machine instances, a `WorkflowDefinition::handle` returns a
//! `HandleOutcome` carrying zero or more commands for a single workflow
//! instance. Definitions are pure: no IO, no async, called serially by the
//! instance's own actor loop — the same invariant the teacher states for
//! `Machine` ("no IO, no async, just state transitions").

use crate::core::FailureContext;
use crate::directive::Directive;

/// Outcome of `WorkflowDefinition::handle`.
pub enum HandleOutcome<C, E> {
    /// Emit these commands (possibly empty) for dispatch.
    Commands(Vec<C>),
    /// The handler itself failed; routed to the Event Failure Protocol.
    Error(E),
    /// Terminate the instance immediately with `reason`.
    Stop { reason: String },
}

impl<C, E> HandleOutcome<C, E> {
    pub fn commands(commands: Vec<C>) -> Self {
        Self::Commands(commands)
    }

    pub fn command(command: C) -> Self {
        Self::Commands(vec![command])
    }

    pub fn none() -> Self {
        Self::Commands(Vec::new())
    }
}

/// The subject passed to `error` for either failure path: an event payload
/// (handler failed) or a command (dispatch of that command failed).
pub enum FailureSubject<'a, P, C> {
    Event(&'a P),
    Command(&'a C),
}

/// User-supplied polymorphic interface: how events produce commands, how
/// state evolves, and how errors are handled.
///
/// All three operations are pure: they must not perform IO or block. The
/// instance calls them serially, never concurrently, and wraps each call in a
/// panic guard so a developer bug cannot unwind across the actor loop.
pub trait WorkflowDefinition: Send + 'static {
    /// Opaque, developer-owned instance state.
    type State: Clone + Send + 'static;
    /// Domain event payload this definition reacts to.
    type Event: Send + 'static;
    /// Command type this definition emits.
    type Command: Clone + Send + 'static;
    /// Kind of error `handle` can signal.
    type Error: std::fmt::Display + Send + 'static;

    /// Stable identifier for this definition type, recorded as
    /// `Snapshot::source_type` so readers can detect schema drift.
    const NAME: &'static str;

    /// The zero value a freshly started (never-rehydrated) instance begins with.
    fn zero_state() -> Self::State;

    /// Translate an event into zero or more commands, or signal failure/stop.
    ///
    /// Must be pure: no IO, no async. May panic; panics are caught by the
    /// driver and treated as `HandleOutcome::Error`.
    fn handle(&self, state: &Self::State, event: &Self::Event) -> HandleOutcome<Self::Command, Self::Error>;

    /// Pure state transition applied only after an event's commands have all
    /// dispatched successfully (or a skip directive says to apply anyway).
    fn apply(&self, state: &Self::State, event: &Self::Event) -> Self::State;

    /// Decide how to proceed after a handler or dispatch failure.
    ///
    /// `subject` is the event payload on event-path failures, the failed
    /// command on command-path failures. `failure_context.context` is
    /// whatever this same definition returned on the previous `error`
    /// invocation for this event (an empty JSON object on the first call);
    /// the instance never interprets it, only threads it back verbatim. The
    /// rest of `failure_context` (`pending_commands`, `process_manager_state`,
    /// `last_event`) is recomputed by the instance on every call.
    fn error(
        &self,
        error: &dyn std::fmt::Display,
        subject: FailureSubject<'_, Self::Event, Self::Command>,
        failure_context: FailureContext<Self::State, Self::Command>,
    ) -> Directive<Self::Command>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq)]
    struct Cmd(&'static str);

    struct CountingDefinition;

    impl WorkflowDefinition for CountingDefinition {
        type State = i32;
        type Event = &'static str;
        type Command = Cmd;
        type Error = String;

        const NAME: &'static str = "counting-definition";

        fn zero_state() -> Self::State {
            0
        }

        fn handle(&self, state: &Self::State, event: &Self::Event) -> HandleOutcome<Self::Command, Self::Error> {
            match *event {
                "fail" => HandleOutcome::Error(format!("cannot handle at state {state}")),
                "stop" => HandleOutcome::Stop { reason: "asked to stop".into() },
                other => HandleOutcome::command(Cmd(other)),
            }
        }

        fn apply(&self, state: &Self::State, _event: &Self::Event) -> Self::State {
            state + 1
        }

        fn error(
            &self,
            _error: &dyn std::fmt::Display,
            _subject: FailureSubject<'_, Self::Event, Self::Command>,
            _failure_context: FailureContext<Self::State, Self::Command>,
        ) -> Directive<Self::Command> {
            Directive::Retry { context: json!({}) }
        }
    }

    #[test]
    fn zero_state_is_zero() {
        assert_eq!(CountingDefinition::zero_state(), 0);
    }

    #[test]
    fn handle_emits_a_command() {
        let def = CountingDefinition;
        match def.handle(&0, &"go") {
            HandleOutcome::Commands(cmds) => assert_eq!(cmds, vec![Cmd("go")]),
            _ => panic!("expected commands"),
        }
    }

    #[test]
    fn handle_signals_stop() {
        let def = CountingDefinition;
        match def.handle(&0, &"stop") {
            HandleOutcome::Stop { reason } => assert_eq!(reason, "asked to stop"),
            _ => panic!("expected stop"),
        }
    }

    #[test]
    fn apply_increments_state() {
        let def = CountingDefinition;
        assert_eq!(def.apply(&3, &"go"), 4);
    }
}
