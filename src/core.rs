//! Core data model for a Process Manager Instance.
//!
//! A PMI consumes an ordered stream of [`RecordedEvent`]s for a single
//! [`WorkflowIdentity`], carrying state in an opaque, developer-owned type and
//! persisting it as a [`Snapshot`] keyed by that identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation ID for tracking related events and commands across a workflow.
///
/// Every command dispatched by the instance carries the `correlation_id` of the
/// event that caused it, alongside a `causation_id` (the event's own id). Use
/// `CorrelationId::NONE` for the (rare) uncorrelated case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Sentinel value for uncorrelated events. Nil UUID.
    pub const NONE: Self = Self(Uuid::nil());

    /// Create a new random correlation ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Check if this is the NONE sentinel value.
    pub fn is_none(&self) -> bool {
        self.0.is_nil()
    }

    /// Check if this is a real correlation ID (not NONE).
    pub fn is_some(&self) -> bool {
        !self.is_none()
    }

    /// Get the inner UUID value.
    pub fn into_inner(self) -> Uuid {
        self.0
    }

    /// Get a reference to the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<CorrelationId> for Uuid {
    fn from(cid: CorrelationId) -> Uuid {
        cid.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Monotonically non-decreasing event number. `None` before the first event is applied.
pub type EventNumber = u64;

/// Identity of a single workflow instance: a stable name paired with a UUID.
///
/// The pair is immutable for the instance's lifetime and determines the
/// snapshot key via [`WorkflowIdentity::snapshot_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowIdentity {
    name: &'static str,
    uuid: Uuid,
}

impl WorkflowIdentity {
    /// Construct an identity from a stable definition name and an instance UUID.
    pub fn new(name: &'static str, uuid: Uuid) -> Self {
        Self { name, uuid }
    }

    /// The stable workflow definition name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The per-instance UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// `process_state_uuid(identity) = concat(name, "-", uuid)`.
    ///
    /// All persistence operations (read/record/delete snapshot) use this key.
    pub fn snapshot_key(&self) -> String {
        format!("{}-{}", self.name, self.uuid)
    }
}

impl fmt::Display for WorkflowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.snapshot_key())
    }
}

/// An event consumed from the Router, carrying identity, ordering, and correlation metadata.
#[derive(Debug, Clone)]
pub struct RecordedEvent<P> {
    /// Identity of this specific event instance (propagated as `causation_id` on commands).
    pub event_id: Uuid,
    /// Position in the per-instance event stream. Strictly increasing across applied events.
    pub event_number: EventNumber,
    /// Correlation id propagated to every command produced while handling this event.
    pub correlation_id: CorrelationId,
    /// The domain payload handed to `WorkflowDefinition::handle`/`apply`.
    pub payload: P,
}

/// Durable snapshot of instance state, keyed by [`WorkflowIdentity::snapshot_key`].
///
/// Invariant: a persisted snapshot always reflects the state *after* applying the
/// event numbered `source_version`, and *after* all commands produced by that
/// event have successfully dispatched (see the Command Dispatch Loop post-success
/// path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<S> {
    /// The instance UUID this snapshot belongs to.
    pub source_uuid: Uuid,
    /// The event number this snapshot reflects.
    pub source_version: EventNumber,
    /// Stable identifier for the `WorkflowDefinition` type, so readers can detect
    /// schema drift between the code that wrote a snapshot and the code reading it.
    pub source_type: &'static str,
    /// The opaque, developer-owned instance state.
    pub data: S,
}

/// Identity and ordering metadata of the event being handled when a failure
/// occurred, without its payload (the payload is already available separately
/// as the `error` callback's `subject` on the event path, and is irrelevant to
/// a command-path failure).
#[derive(Debug, Clone, Copy)]
pub struct LastEvent {
    pub event_id: Uuid,
    pub event_number: EventNumber,
    pub correlation_id: CorrelationId,
}

/// Context handed to `WorkflowDefinition::error` on every failure.
///
/// `context` is never interpreted by the instance; it is threaded verbatim from
/// whatever the Definition returned on the previous `error` invocation (empty on
/// the first).
#[derive(Debug, Clone)]
pub struct FailureContext<S, C> {
    /// Commands still undispatched when the failure occurred (excludes the one that failed).
    pub pending_commands: Vec<C>,
    /// Speculative post-apply state: `apply(state, event.payload)` computed on a copy.
    /// The real instance state is not mutated until the whole dispatch succeeds.
    pub process_manager_state: S,
    /// The event being handled when the failure occurred.
    pub last_event: LastEvent,
    /// Developer scratch value threaded verbatim across retries.
    pub context: serde_json::Value,
}
