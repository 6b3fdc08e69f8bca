//! Command Dispatch Loop + Command Failure Protocol.
//!
//! Grounded on `dispatch.rs`'s `Dispatcher::dispatch_with_correlation`: same
//! sequential-dispatch-with-propagated-correlation shape and the same
//! panic-catch-then-log-then-convert-to-error idiom, generalized from "one
//! batch of same-typed commands" to "an ordered, heterogeneous command list
//! with a developer-defined failure protocol branching on each failure."
//! Cross-checked against the angzarr `process_manager.rs` retry/continue loop
//! for the shape of the retry-vs-stop branching and its `tracing` texture.

use serde_json::json;
use tracing::{debug, warn};

use crate::core::{FailureContext, LastEvent, RecordedEvent};
use crate::definition::{FailureSubject, WorkflowDefinition};
use crate::dispatcher::{DispatchOptions, Dispatcher};
use crate::directive::CommandDirective;
use crate::driver;
use crate::error::PmiError;

/// Result of running the dispatch loop for one event's command list.
pub enum DispatchLoopOutcome {
    /// Every command dispatched (or a skip directive said to treat it as such).
    /// The caller must now run the post-success path: apply, snapshot,
    /// advance `LastSeenEvent`, ack.
    Complete,
    /// The instance must terminate with `reason`. No snapshot is written, no
    /// ack is sent.
    Stop { reason: String },
}

/// Run the Command Dispatch Loop for `commands` produced while handling
/// `event`. `state` is the InstanceState *before* this event's `apply` would
/// run; it is only ever used to compute the speculative
/// `process_manager_state` handed to `error`, never mutated here.
pub async fn run<D, Disp>(
    definition: &D,
    dispatcher: &Disp,
    mut commands: Vec<D::Command>,
    state: &D::State,
    event: &RecordedEvent<D::Event>,
) -> DispatchLoopOutcome
where
    D: WorkflowDefinition,
    Disp: Dispatcher<D::Command>,
{
    let mut context = json!({});

    'dispatch: loop {
        if commands.is_empty() {
            return DispatchLoopOutcome::Complete;
        }

        let opts = DispatchOptions {
            causation_id: event.event_id,
            correlation_id: event.correlation_id,
        };

        let mut index = 0;
        while index < commands.len() {
            let command = &commands[index];
            let result = dispatcher.dispatch(command, opts).await;

            match result {
                Ok(()) => {
                    debug!(
                        instance = %event.correlation_id,
                        command_index = index,
                        "command dispatched"
                    );
                    index += 1;
                    continue;
                }
                Err(error) => {
                    let pending_commands = commands.split_off(index + 1);
                    let failed_command = commands.into_iter().nth(index).unwrap();

                    let classified = PmiError::DispatchFailure {
                        instance: event.correlation_id.to_string(),
                        event_number: event.event_number,
                        command_index: index,
                        source: anyhow::anyhow!("{error}"),
                    };
                    warn!(instance = %event.correlation_id, error = %classified, "command dispatch failed, invoking error callback");

                    let speculative_state = driver::call_apply(definition, state, &event.payload)
                        .unwrap_or_else(|_| state.clone());

                    let failure_context = FailureContext {
                        pending_commands: pending_commands.clone(),
                        process_manager_state: speculative_state,
                        last_event: LastEvent {
                            event_id: event.event_id,
                            event_number: event.event_number,
                            correlation_id: event.correlation_id,
                        },
                        context: context.clone(),
                    };

                    let directive_result = driver::call_error(
                        definition,
                        &error,
                        FailureSubject::Command(&failed_command),
                        failure_context,
                    );

                    let directive = match directive_result {
                        Ok(d) => d,
                        Err(panic_info) => {
                            warn!(
                                error = %panic_info,
                                "definition's error callback panicked on command failure; stopping instance"
                            );
                            return DispatchLoopOutcome::Stop {
                                reason: panic_info.to_string(),
                            };
                        }
                    };

                    match directive.for_command_failure() {
                        Ok(CommandDirective::Retry { context: ctx }) => {
                            debug!(command_index = index, "retrying failed command");
                            context = ctx;
                            commands = std::iter::once(failed_command)
                                .chain(pending_commands)
                                .collect();
                            continue 'dispatch;
                        }
                        Ok(CommandDirective::RetryAfter { delay_ms, context: ctx }) => {
                            debug!(command_index = index, delay_ms, "retrying failed command after delay");
                            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                            context = ctx;
                            commands = std::iter::once(failed_command)
                                .chain(pending_commands)
                                .collect();
                            continue 'dispatch;
                        }
                        Ok(CommandDirective::SkipDiscardPending) => {
                            debug!(command_index = index, "skipping failed command and discarding pending tail");
                            return DispatchLoopOutcome::Complete;
                        }
                        Ok(CommandDirective::SkipContinuePending) => {
                            debug!(command_index = index, "skipping failed command, continuing with pending tail");
                            context = json!({});
                            commands = pending_commands;
                            continue 'dispatch;
                        }
                        Ok(CommandDirective::Continue {
                            commands: substitute,
                            context: ctx,
                        }) => {
                            debug!(
                                command_index = index,
                                substitute_count = substitute.len(),
                                "continuing dispatch with substitute commands"
                            );
                            context = ctx;
                            commands = substitute;
                            continue 'dispatch;
                        }
                        Ok(CommandDirective::Stop { reason }) => {
                            let stop = PmiError::StopRequested {
                                instance: event.correlation_id.to_string(),
                                reason: reason.clone(),
                            };
                            debug!(error = %stop, "stopping instance on command failure directive");
                            return DispatchLoopOutcome::Stop { reason };
                        }
                        Err(invalid) => {
                            let classified = PmiError::InvalidDirective {
                                instance: event.correlation_id.to_string(),
                                event_number: event.event_number,
                                original: anyhow::anyhow!("{error}"),
                            };
                            warn!(
                                error = %classified,
                                directive = ?invalid,
                                "definition returned a directive invalid for the command failure path; stopping instance"
                            );
                            return DispatchLoopOutcome::Stop {
                                reason: error.to_string(),
                            };
                        }
                    }
                }
            }
        }

        return DispatchLoopOutcome::Complete;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CorrelationId as Cid, RecordedEvent};
    use crate::definition::HandleOutcome;
    use crate::dispatcher::testing::ScriptedDispatcher;
    use crate::directive::Directive;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq)]
    struct Cmd(&'static str);

    struct RetryOnceDefinition;

    impl WorkflowDefinition for RetryOnceDefinition {
        type State = i32;
        type Event = &'static str;
        type Command = Cmd;
        type Error = String;

        const NAME: &'static str = "retry-once-definition";

        fn zero_state() -> Self::State {
            0
        }

        fn handle(&self, _state: &Self::State, event: &Self::Event) -> HandleOutcome<Self::Command, Self::Error> {
            HandleOutcome::command(Cmd(event))
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

    struct StopOnFailureDefinition;

    impl WorkflowDefinition for StopOnFailureDefinition {
        type State = i32;
        type Event = &'static str;
        type Command = Cmd;
        type Error = String;

        const NAME: &'static str = "stop-on-failure-definition";

        fn zero_state() -> Self::State {
            0
        }

        fn handle(&self, _state: &Self::State, event: &Self::Event) -> HandleOutcome<Self::Command, Self::Error> {
            HandleOutcome::command(Cmd(event))
        }

        fn apply(&self, state: &Self::State, _event: &Self::Event) -> Self::State {
            *state
        }

        fn error(
            &self,
            _error: &dyn std::fmt::Display,
            _subject: FailureSubject<'_, Self::Event, Self::Command>,
            _failure_context: FailureContext<Self::State, Self::Command>,
        ) -> Directive<Self::Command> {
            Directive::Stop {
                reason: "bad".into(),
            }
        }
    }

    struct ContinueWithSubstituteDefinition;

    impl WorkflowDefinition for ContinueWithSubstituteDefinition {
        type State = i32;
        type Event = &'static str;
        type Command = Cmd;
        type Error = String;

        const NAME: &'static str = "continue-with-substitute-definition";

        fn zero_state() -> Self::State {
            0
        }

        fn handle(&self, _state: &Self::State, event: &Self::Event) -> HandleOutcome<Self::Command, Self::Error> {
            HandleOutcome::command(Cmd(event))
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
            Directive::Continue {
                commands: vec![Cmd("b"), Cmd("c")],
                context: json!({}),
            }
        }
    }

    struct SkipDiscardPendingDefinition;

    impl WorkflowDefinition for SkipDiscardPendingDefinition {
        type State = i32;
        type Event = &'static str;
        type Command = Cmd;
        type Error = String;

        const NAME: &'static str = "skip-discard-pending-definition";

        fn zero_state() -> Self::State {
            0
        }

        fn handle(&self, _state: &Self::State, event: &Self::Event) -> HandleOutcome<Self::Command, Self::Error> {
            HandleOutcome::command(Cmd(event))
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
            Directive::SkipDiscardPending
        }
    }

    struct SkipContinuePendingDefinition;

    impl WorkflowDefinition for SkipContinuePendingDefinition {
        type State = i32;
        type Event = &'static str;
        type Command = Cmd;
        type Error = String;

        const NAME: &'static str = "skip-continue-pending-definition";

        fn zero_state() -> Self::State {
            0
        }

        fn handle(&self, _state: &Self::State, event: &Self::Event) -> HandleOutcome<Self::Command, Self::Error> {
            HandleOutcome::command(Cmd(event))
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
            Directive::SkipContinuePending
        }
    }

    fn event() -> RecordedEvent<&'static str> {
        RecordedEvent {
            event_id: Uuid::nil(),
            event_number: 1,
            correlation_id: Cid::NONE,
            payload: "go",
        }
    }

    #[tokio::test]
    async fn dispatch_success_completes_immediately() {
        let definition = RetryOnceDefinition;
        let dispatcher: ScriptedDispatcher<Cmd> = ScriptedDispatcher::always_succeeds();
        let outcome = run(&definition, &dispatcher, vec![Cmd("a")], &0, &event()).await;
        assert!(matches!(outcome, DispatchLoopOutcome::Complete));
        assert_eq!(dispatcher.call_count(), 1);
    }

    #[tokio::test]
    async fn retry_directive_retries_then_succeeds() {
        let definition = RetryOnceDefinition;
        let dispatcher: ScriptedDispatcher<Cmd> = ScriptedDispatcher::failing_n_times(1);
        let outcome = run(&definition, &dispatcher, vec![Cmd("a")], &0, &event()).await;
        assert!(matches!(outcome, DispatchLoopOutcome::Complete));
        assert_eq!(dispatcher.call_count(), 2);
    }

    #[tokio::test]
    async fn stop_directive_terminates_with_reason() {
        let definition = StopOnFailureDefinition;
        let dispatcher: ScriptedDispatcher<Cmd> = ScriptedDispatcher::failing_n_times(1);
        let outcome = run(&definition, &dispatcher, vec![Cmd("a")], &0, &event()).await;
        match outcome {
            DispatchLoopOutcome::Stop { reason } => assert_eq!(reason, "bad"),
            _ => panic!("expected stop"),
        }
    }

    #[tokio::test]
    async fn empty_command_list_completes_without_dispatching() {
        let definition = RetryOnceDefinition;
        let dispatcher: ScriptedDispatcher<Cmd> = ScriptedDispatcher::always_succeeds();
        let outcome = run(&definition, &dispatcher, vec![], &0, &event()).await;
        assert!(matches!(outcome, DispatchLoopOutcome::Complete));
        assert_eq!(dispatcher.call_count(), 0);
    }

    #[tokio::test]
    async fn continue_directive_substitutes_remaining_commands() {
        let definition = ContinueWithSubstituteDefinition;
        let dispatcher: ScriptedDispatcher<Cmd> = ScriptedDispatcher::failing_n_times(1);
        let outcome = run(&definition, &dispatcher, vec![Cmd("a")], &0, &event()).await;
        assert!(matches!(outcome, DispatchLoopOutcome::Complete));
        let calls = dispatcher.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0, Cmd("a"));
        assert_eq!(calls[1].0, Cmd("b"));
        assert_eq!(calls[2].0, Cmd("c"));
    }

    #[tokio::test]
    async fn skip_discard_pending_drops_the_rest_of_the_batch() {
        let definition = SkipDiscardPendingDefinition;
        let dispatcher: ScriptedDispatcher<Cmd> = ScriptedDispatcher::failing_n_times(1);
        let outcome = run(&definition, &dispatcher, vec![Cmd("a"), Cmd("b")], &0, &event()).await;
        assert!(matches!(outcome, DispatchLoopOutcome::Complete));
        assert_eq!(dispatcher.call_count(), 1);
    }

    #[tokio::test]
    async fn skip_continue_pending_dispatches_the_pending_tail() {
        let definition = SkipContinuePendingDefinition;
        let dispatcher: ScriptedDispatcher<Cmd> = ScriptedDispatcher::failing_n_times(1);
        let outcome = run(&definition, &dispatcher, vec![Cmd("a"), Cmd("b")], &0, &event()).await;
        assert!(matches!(outcome, DispatchLoopOutcome::Complete));
        let calls = dispatcher.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, Cmd("b"));
    }
}
