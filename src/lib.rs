//! # pmi
//!
//! A durable, event-driven Process Manager Instance: a single-identity actor
//! that consumes an ordered stream of domain events, translates each into
//! zero or more commands via developer-supplied code, and persists its state
//! as snapshots so it resumes identically after a crash.
//!
//! ## Architecture
//!
//! ```text
//! Router ──process_event()──► intake channel ──► actor task
//!                                                    │
//!                                     seen? ─────────┤── ack (no-op path)
//!                                                    │
//!                                                  unseen
//!                                                    │
//!                                                    ▼
//!                                      WorkflowDefinition::handle()
//!                                                    │
//!                                        commands │ error │ stop
//!                                                    │
//!                                                    ▼
//!                                       Command Dispatch Loop ──► Dispatcher
//!                                                    │
//!                                    all dispatched (or skip-as-success)
//!                                                    │
//!                                                    ▼
//!                            apply() ─► record_snapshot() ─► ack_event()
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Single-writer actor** — one instance, one task, strictly ordered events.
//! 2. **Idempotent replay** — events at or before `LastSeenEvent` are acked
//!    without invoking the definition or dispatching anything.
//! 3. **Snapshot before ack** — durability of state precedes acknowledgement,
//!    never the reverse.
//! 4. **Definitions are pure** — `handle`/`apply`/`error` never perform IO;
//!    panics inside them are caught, logged, and converted into the ordinary
//!    failure-handling paths rather than unwinding the actor loop.
//!
//! ## What this crate is not
//!
//! It does not route events to instances, does not load workflow definitions
//! from configuration, and does not implement the command-side aggregate
//! machinery. Those are external collaborators: [`Router`], [`Dispatcher`],
//! and [`SnapshotStore`] are the seams where a host process plugs them in.

mod core;
mod definition;
mod directive;
mod dispatch_loop;
mod dispatcher;
mod driver;
mod error;
mod instance;
mod persistence;
mod router;

// Testing utilities (feature-gated); each collaborator trait's module carries
// its own in-memory fake under the same `testing` submodule convention.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    pub use crate::dispatcher::testing::ScriptedDispatcher;
    pub use crate::persistence::testing::InMemorySnapshotStore;
    pub use crate::router::testing::RecordingRouter;
}

// Re-export core data model types
pub use crate::core::{
    CorrelationId, EventNumber, FailureContext, LastEvent, RecordedEvent, Snapshot, WorkflowIdentity,
};

// Re-export the directive grammar
pub use crate::directive::{CommandDirective, Directive, EventDirective};

// Re-export the user-supplied definition interface
pub use crate::definition::{FailureSubject, HandleOutcome, WorkflowDefinition};

// Re-export the Lifecycle Controller and actor handle
pub use crate::instance::{InstanceHandle, InstanceOptions, ProcessManagerInstance};

// Re-export error types
pub use crate::error::PmiError;

// Re-export external collaborator interfaces
pub use crate::dispatcher::{DispatchOptions, Dispatcher};
pub use crate::persistence::{SnapshotError, SnapshotStore};
pub use crate::router::Router;

// Re-export commonly used external types
pub use async_trait::async_trait;
