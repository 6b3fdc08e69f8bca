//! Lifecycle Controller and single-instance actor loop.
//!
//! Grounded on `runtime.rs`'s `Runtime::run`: same subscribe-then-drain shape
//! (`info!` on start, loop over a channel receiver, per-event work, log and
//! continue), with two departures: the channel is a bounded
//! point-to-point `tokio::mpsc` rather than a broadcast bus (a PMI must never
//! silently lag or drop an event the way a slow broadcast subscriber may), and
//! the loop awaits a one-shot rehydration future before the first `recv`,
//! so state is always current before the first event is dequeued.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::core::{EventNumber, FailureContext, LastEvent, RecordedEvent, Snapshot, WorkflowIdentity};
use crate::definition::{FailureSubject, HandleOutcome, WorkflowDefinition};
use crate::directive::EventDirective;
use crate::dispatch_loop::{self, DispatchLoopOutcome};
use crate::dispatcher::Dispatcher;
use crate::driver;
use crate::error::PmiError;
use crate::persistence::SnapshotStore;
use crate::router::Router;

/// Instance-local tuning knobs. Never read from environment or files;
/// a PMI is a library component embedded in a host process, not a binary.
#[derive(Debug, Clone)]
pub struct InstanceOptions {
    /// Bounded capacity of the intake channel between the Router and this
    /// instance's actor task.
    pub intake_capacity: usize,
    /// Optional ceiling on a developer-supplied `delay_ms`, applied only when
    /// set. Off by default; production code honors the developer's value
    /// unclamped. Exists as a test/ops safety valve.
    pub max_retry_delay_ms: Option<u64>,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            intake_capacity: 64,
            max_retry_delay_ms: None,
        }
    }
}

enum Message<E, S> {
    Event {
        event: RecordedEvent<E>,
        ack: oneshot::Sender<()>,
    },
    GetState(oneshot::Sender<S>),
    Stop(oneshot::Sender<()>),
}

/// Handle to a running [`ProcessManagerInstance`]: the Router's view of it.
/// The instance itself lives inside the spawned actor task; every operation
/// here is a message round-trip with the task.
#[derive(Clone)]
pub struct InstanceHandle<E, S> {
    identity: WorkflowIdentity,
    sender: mpsc::Sender<Message<E, S>>,
}

impl<E: Send + 'static, S: Send + 'static> InstanceHandle<E, S> {
    /// Enqueue `event` for handling. Resolves once the instance has
    /// dequeued and acked the event (or deduplicated it). Events for the
    /// same instance are processed strictly in FIFO order.
    pub async fn process_event(&self, event: RecordedEvent<E>) -> anyhow::Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(Message::Event { event, ack: ack_tx }).await?;
        ack_rx
            .await
            .map_err(|_| anyhow::anyhow!("instance {} actor task dropped without acking", self.identity))
    }

    /// Fetch a snapshot of the instance's current state.
    pub async fn get_state(&self) -> anyhow::Result<S> {
        let (tx, rx) = oneshot::channel();
        self.send(Message::GetState(tx)).await?;
        rx.await
            .map_err(|_| anyhow::anyhow!("instance {} actor task dropped without replying", self.identity))
    }

    /// Delete the persisted snapshot and terminate the instance. Resolves
    /// once the actor task has acknowledged the stop.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Message::Stop(tx)).await?;
        rx.await
            .map_err(|_| anyhow::anyhow!("instance {} actor task dropped without acking stop", self.identity))
    }

    pub fn identity(&self) -> &WorkflowIdentity {
        &self.identity
    }

    async fn send(&self, message: Message<E, S>) -> anyhow::Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| anyhow::anyhow!("instance {} actor task has stopped", self.identity))
    }
}

/// A single-identity actor: consumes events in order, runs the handler
/// driver and dispatch loop, applies state, persists snapshots, and acks.
pub struct ProcessManagerInstance<D: WorkflowDefinition, S, Disp, R> {
    identity: WorkflowIdentity,
    definition: D,
    state: D::State,
    last_seen_event: Option<EventNumber>,
    snapshot_store: Arc<S>,
    dispatcher: Arc<Disp>,
    router: Arc<R>,
    options: InstanceOptions,
}

impl<D, S, Disp, R> ProcessManagerInstance<D, S, Disp, R>
where
    D: WorkflowDefinition,
    S: SnapshotStore<D::State>,
    Disp: Dispatcher<D::Command>,
    R: Router,
{
    /// Construct the instance with a zero-value state and null
    /// `LastSeenEvent`. Call [`Self::run`] to rehydrate and start
    /// draining events.
    pub fn new(
        identity: WorkflowIdentity,
        definition: D,
        snapshot_store: Arc<S>,
        dispatcher: Arc<Disp>,
        router: Arc<R>,
        options: InstanceOptions,
    ) -> Self {
        Self {
            identity,
            state: D::zero_state(),
            last_seen_event: None,
            definition,
            snapshot_store,
            dispatcher,
            router,
            options,
        }
    }

    /// `true` iff no event has ever been successfully applied.
    pub fn is_new(&self) -> bool {
        self.last_seen_event.is_none()
    }

    /// A snapshot of the current instance state.
    pub fn get_state(&self) -> D::State
    where
        D::State: Clone,
    {
        self.state.clone()
    }

    /// Read the snapshot for this identity, if any, and adopt its state and
    /// `LastSeenEvent`. Read failures other than "not found" are fatal
    /// startup failures.
    async fn rehydrate(&mut self) -> Result<(), PmiError> {
        let key = self.identity.snapshot_key();
        let snapshot = self
            .snapshot_store
            .read_snapshot(&key)
            .await
            .map_err(|e| PmiError::SnapshotIOError {
                key: key.clone(),
                source: e.0,
            })?;

        match snapshot {
            Some(Snapshot { source_version, data, .. }) => {
                debug!(instance = %self.identity, event_number = source_version, "rehydrated from snapshot");
                self.state = data;
                self.last_seen_event = Some(source_version);
            }
            None => {
                debug!(instance = %self.identity, "no snapshot found, starting fresh");
            }
        }
        Ok(())
    }

    /// Delete the persisted snapshot. Called on `stop`.
    async fn delete_snapshot(&self) -> Result<(), PmiError> {
        let key = self.identity.snapshot_key();
        self.snapshot_store
            .delete_snapshot(&key)
            .await
            .map_err(|e| PmiError::SnapshotIOError { key, source: e.0 })
    }

    /// Spawn the actor task: rehydrate, then drain events strictly in order
    /// until `stop` is requested, a `Stop` directive fires, or the channel
    /// closes.
    pub fn run(mut self) -> InstanceHandle<D::Event, D::State>
    where
        D: Send + 'static,
        S: Send + Sync + 'static,
        Disp: Send + Sync + 'static,
        R: Send + Sync + 'static,
        D::State: Clone + Send + Sync + 'static,
        D::Event: Send + 'static,
        D::Command: Send + 'static,
    {
        let identity = self.identity.clone();
        let (tx, mut rx) = mpsc::channel::<Message<D::Event, D::State>>(self.options.intake_capacity);

        tokio::spawn(async move {
            info!(instance = %self.identity, "instance starting");

            if let Err(e) = self.rehydrate().await {
                error!(instance = %self.identity, error = %e, "rehydration failed, instance will not start");
                return;
            }

            while let Some(message) = rx.recv().await {
                match message {
                    Message::Event { event, ack } => match self.handle_event(event).await {
                        EventOutcome::Acked => {
                            let _ = ack.send(());
                        }
                        EventOutcome::Stopped { reason } => {
                            warn!(instance = %self.identity, reason = %reason, "instance stopping");
                            if let Err(e) = self.delete_snapshot().await {
                                error!(instance = %self.identity, error = %e, "failed to clean up snapshot on stop");
                            }
                            drop(ack);
                            break;
                        }
                    },
                    Message::GetState(reply) => {
                        let _ = reply.send(self.state.clone());
                    }
                    Message::Stop(reply) => {
                        if let Err(e) = self.delete_snapshot().await {
                            error!(instance = %self.identity, error = %e, "failed to delete snapshot on stop");
                        }
                        info!(instance = %self.identity, "instance stopped");
                        let _ = reply.send(());
                        break;
                    }
                }
            }

            info!(instance = %self.identity, "instance actor task exiting");
        });

        InstanceHandle {
            identity,
            sender: tx,
        }
    }

    /// Process one dequeued event end to end: dedup, handler driver, dispatch
    /// loop, apply + snapshot + advance + ack.
    async fn handle_event(&mut self, event: RecordedEvent<D::Event>) -> EventOutcome {
        if let Some(last) = self.last_seen_event {
            if event.event_number <= last {
                debug!(
                    instance = %self.identity,
                    event_number = event.event_number,
                    last_seen = last,
                    "event already seen, acking without handling"
                );
                return self.ack(event.event_number).await;
            }
        }

        debug!(instance = %self.identity, event_number = event.event_number, "handling unseen event");
        self.run_event_failure_protocol(event, serde_json::json!({})).await
    }

    /// Notify the router that `event_number` is done, then report the event as
    /// acked. A failed ack is logged but does not stop the instance: the
    /// router owns redelivery, and by the time this is called the instance has
    /// already done everything it needs to for this event.
    async fn ack(&self, event_number: EventNumber) -> EventOutcome {
        if let Err(e) = self.router.ack_event(&self.identity, event_number).await {
            error!(instance = %self.identity, error = %e, "ack failed");
        }
        EventOutcome::Acked
    }

    /// Event Failure Protocol. Implemented as a loop rather than
    /// recursion so unbounded retries don't grow the stack.
    async fn run_event_failure_protocol(
        &mut self,
        event: RecordedEvent<D::Event>,
        mut context: serde_json::Value,
    ) -> EventOutcome {
        loop {
            match driver::call_handle(&self.definition, &self.state, &event.payload) {
                HandleOutcome::Commands(commands) => {
                    return self.run_dispatch_and_commit(event, commands).await;
                }
                HandleOutcome::Stop { reason } => {
                    return EventOutcome::Stopped { reason };
                }
                HandleOutcome::Error(handler_error) => {
                    let classified = PmiError::HandlerFailure {
                        instance: self.identity.to_string(),
                        event_number: event.event_number,
                        source: anyhow::anyhow!("{handler_error}"),
                    };
                    warn!(instance = %self.identity, error = %classified, "handler failed, invoking error callback");

                    let failure_context = FailureContext {
                        pending_commands: Vec::new(),
                        process_manager_state: self.state.clone(),
                        last_event: LastEvent {
                            event_id: event.event_id,
                            event_number: event.event_number,
                            correlation_id: event.correlation_id,
                        },
                        context: context.clone(),
                    };

                    let directive_result = driver::call_error(
                        &self.definition,
                        &handler_error,
                        FailureSubject::Event(&event.payload),
                        failure_context,
                    );

                    let directive = match directive_result {
                        Ok(d) => d,
                        Err(panic_info) => {
                            error!(instance = %self.identity, error = %panic_info, "error callback panicked on handler failure; stopping instance");
                            return EventOutcome::Stopped {
                                reason: panic_info.to_string(),
                            };
                        }
                    };

                    match directive.for_event_failure() {
                        Ok(EventDirective::Retry { context: ctx }) => {
                            debug!(instance = %self.identity, "retrying handler for event");
                            context = ctx;
                            continue;
                        }
                        Ok(EventDirective::RetryAfter { delay_ms, context: ctx }) => {
                            let delay_ms = self.clamp_delay(delay_ms);
                            debug!(instance = %self.identity, delay_ms, "retrying handler after delay");
                            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                            context = ctx;
                            continue;
                        }
                        Ok(EventDirective::Skip) => {
                            debug!(instance = %self.identity, event_number = event.event_number, "skipping event without applying");
                            return self.ack(event.event_number).await;
                        }
                        Ok(EventDirective::Stop { reason }) => {
                            let stop = PmiError::StopRequested {
                                instance: self.identity.to_string(),
                                reason: reason.clone(),
                            };
                            warn!(instance = %self.identity, error = %stop, "stopping instance on handler failure directive");
                            return EventOutcome::Stopped { reason };
                        }
                        Err(invalid) => {
                            let classified = PmiError::InvalidDirective {
                                instance: self.identity.to_string(),
                                event_number: event.event_number,
                                original: anyhow::anyhow!("{handler_error}"),
                            };
                            warn!(
                                instance = %self.identity,
                                error = %classified,
                                directive = ?invalid,
                                "definition returned a directive invalid for the event failure path; stopping instance"
                            );
                            return EventOutcome::Stopped {
                                reason: handler_error.to_string(),
                            };
                        }
                    }
                }
            }
        }
    }

    /// Run the Command Dispatch Loop for `commands`, then on success run the
    /// post-success path (apply, snapshot, advance, ack) in contract
    /// order: no snapshot before every command is accepted, no ack before
    /// the snapshot is durable.
    async fn run_dispatch_and_commit(
        &mut self,
        event: RecordedEvent<D::Event>,
        commands: Vec<D::Command>,
    ) -> EventOutcome {
        match dispatch_loop::run(&self.definition, self.dispatcher.as_ref(), commands, &self.state, &event).await {
            DispatchLoopOutcome::Stop { reason } => EventOutcome::Stopped { reason },
            DispatchLoopOutcome::Complete => {
                let new_state = match driver::call_apply(&self.definition, &self.state, &event.payload) {
                    Ok(s) => s,
                    Err(panic_info) => {
                        error!(instance = %self.identity, error = %panic_info, "apply panicked after successful dispatch; stopping instance");
                        return EventOutcome::Stopped {
                            reason: panic_info.to_string(),
                        };
                    }
                };

                let snapshot = Snapshot {
                    source_uuid: self.identity.uuid(),
                    source_version: event.event_number,
                    source_type: D::NAME,
                    data: new_state.clone(),
                };

                let key = self.identity.snapshot_key();
                if let Err(e) = self.snapshot_store.record_snapshot(&key, snapshot).await {
                    error!(instance = %self.identity, error = %e, "snapshot write failed; instance cannot proceed");
                    return EventOutcome::Stopped {
                        reason: format!("snapshot write failed for {key}: {e}"),
                    };
                }

                self.state = new_state;
                self.last_seen_event = Some(event.event_number);

                self.ack(event.event_number).await
            }
        }
    }

    fn clamp_delay(&self, delay_ms: u64) -> u64 {
        match self.options.max_retry_delay_ms {
            Some(max) => delay_ms.min(max),
            None => delay_ms,
        }
    }
}

enum EventOutcome {
    Acked,
    Stopped { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::Directive;
    use crate::dispatcher::testing::ScriptedDispatcher;
    use crate::persistence::testing::InMemorySnapshotStore;
    use crate::router::testing::RecordingRouter;
    use serde_json::json;
    use uuid::Uuid;

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

    fn make_instance() -> ProcessManagerInstance<
        CountingDefinition,
        InMemorySnapshotStore<i32>,
        ScriptedDispatcher<Cmd>,
        RecordingRouter,
    > {
        let identity = WorkflowIdentity::new("order-fulfillment", Uuid::nil());
        ProcessManagerInstance::new(
            identity,
            CountingDefinition,
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(ScriptedDispatcher::always_succeeds()),
            Arc::new(RecordingRouter::new()),
            InstanceOptions::default(),
        )
    }

    #[tokio::test]
    async fn fresh_instance_is_new() {
        let instance = make_instance();
        assert!(instance.is_new());
    }

    #[tokio::test]
    async fn handling_an_event_advances_last_seen_and_state() {
        let mut instance = make_instance();
        let event = RecordedEvent {
            event_id: Uuid::new_v4(),
            event_number: 1,
            correlation_id: crate::core::CorrelationId::new(),
            payload: "go",
        };
        let outcome = instance.handle_event(event).await;
        assert!(matches!(outcome, EventOutcome::Acked));
        assert_eq!(instance.get_state(), 1);
        assert_eq!(instance.last_seen_event, Some(1));
    }

    #[tokio::test]
    async fn replayed_event_is_deduplicated() {
        let mut instance = make_instance();
        let event = RecordedEvent {
            event_id: Uuid::new_v4(),
            event_number: 1,
            correlation_id: crate::core::CorrelationId::new(),
            payload: "go",
        };
        instance.handle_event(event.clone()).await;
        let state_after_first = instance.get_state();

        let replay = RecordedEvent {
            event_id: Uuid::new_v4(),
            ..event
        };
        let outcome = instance.handle_event(replay).await;
        assert!(matches!(outcome, EventOutcome::Acked));
        assert_eq!(instance.get_state(), state_after_first);
        assert_eq!(instance.dispatcher.call_count(), 1);
        assert_eq!(instance.router.acks(), vec![(instance.identity.clone(), 1), (instance.identity.clone(), 1)]);
    }

    #[tokio::test]
    async fn full_actor_lifecycle_via_handle() {
        let snapshot_store = Arc::new(InMemorySnapshotStore::<i32>::new());
        let dispatcher = Arc::new(ScriptedDispatcher::<Cmd>::always_succeeds());
        let router = Arc::new(RecordingRouter::new());
        let identity = WorkflowIdentity::new("order-fulfillment", Uuid::new_v4());

        let instance = ProcessManagerInstance::new(
            identity.clone(),
            CountingDefinition,
            snapshot_store.clone(),
            dispatcher,
            router.clone(),
            InstanceOptions::default(),
        );
        let handle = instance.run();

        let event = RecordedEvent {
            event_id: Uuid::new_v4(),
            event_number: 1,
            correlation_id: crate::core::CorrelationId::new(),
            payload: "go",
        };
        handle.process_event(event).await.unwrap();

        let state = handle.get_state().await.unwrap();
        assert_eq!(state, 1);
        assert_eq!(router.acks(), vec![(identity.clone(), 1)]);

        handle.stop().await.unwrap();
        assert!(snapshot_store
            .read_snapshot(&identity.snapshot_key())
            .await
            .unwrap()
            .is_none());
    }

    struct SkippingDefinition;

    impl WorkflowDefinition for SkippingDefinition {
        type State = i32;
        type Event = &'static str;
        type Command = Cmd;
        type Error = String;

        const NAME: &'static str = "skipping-definition";

        fn zero_state() -> Self::State {
            0
        }

        fn handle(&self, _state: &Self::State, _event: &Self::Event) -> HandleOutcome<Self::Command, Self::Error> {
            HandleOutcome::Error("cannot handle this event".into())
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
            Directive::Skip
        }
    }

    #[tokio::test]
    async fn event_skip_directive_acks_without_applying_or_advancing() {
        let identity = WorkflowIdentity::new("order-fulfillment", Uuid::nil());
        let router = Arc::new(RecordingRouter::new());
        let mut instance = ProcessManagerInstance::new(
            identity.clone(),
            SkippingDefinition,
            Arc::new(InMemorySnapshotStore::<i32>::new()),
            Arc::new(ScriptedDispatcher::<Cmd>::always_succeeds()),
            router.clone(),
            InstanceOptions::default(),
        );
        let event = RecordedEvent {
            event_id: Uuid::new_v4(),
            event_number: 1,
            correlation_id: crate::core::CorrelationId::new(),
            payload: "go",
        };
        let outcome = instance.handle_event(event).await;
        assert!(matches!(outcome, EventOutcome::Acked));
        assert_eq!(instance.get_state(), 0);
        assert!(instance.is_new());
        assert_eq!(router.acks(), vec![(identity, 1)]);
    }
}
