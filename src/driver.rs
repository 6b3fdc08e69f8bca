//! Event Handler Driver: invokes the three `WorkflowDefinition`
//! callbacks and classifies their results, catching panics so a developer bug
//! in user-supplied code never unwinds across the instance's actor loop.
//!
//! Grounded on `machine.rs`'s `MachineRunner::decide`: same
//! `catch_unwind(AssertUnwindSafe(...))` shape, same panic-message extraction,
//! same `tracing::error!` log line. Generalized to all three callbacks
//! (`handle`, `apply`, `error`) since here each can panic, not just `decide`.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::core::FailureContext;
use crate::definition::{FailureSubject, HandleOutcome, WorkflowDefinition};
use crate::directive::Directive;

/// A callback panicked. Carries which callback and the extracted message.
#[derive(Debug, Clone)]
pub struct PanicInfo {
    pub callback: &'static str,
    pub message: String,
}

impl std::fmt::Display for PanicInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} panicked: {}", self.callback, self.message)
    }
}

fn extract_panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Call `Definition::handle`, catching panics and reifying them as
/// `HandleOutcome::Error` so a panic is classified the same way as a
/// developer-signaled error.
pub fn call_handle<D: WorkflowDefinition>(
    definition: &D,
    state: &D::State,
    event: &D::Event,
) -> HandleOutcome<D::Command, PanicOr<D::Error>> {
    let result = catch_unwind(AssertUnwindSafe(|| definition.handle(state, event)));
    match result {
        Ok(HandleOutcome::Commands(cmds)) => HandleOutcome::Commands(cmds),
        Ok(HandleOutcome::Error(e)) => HandleOutcome::Error(PanicOr::Err(e)),
        Ok(HandleOutcome::Stop { reason }) => HandleOutcome::Stop { reason },
        Err(payload) => {
            let message = extract_panic_message(payload);
            error!(callback = "handle", panic = %message, "definition callback panicked");
            HandleOutcome::Error(PanicOr::Panic(PanicInfo {
                callback: "handle",
                message,
            }))
        }
    }
}

/// Call `Definition::apply`, catching panics. A panic here is treated the
/// same as a panic in `handle`/`error`: callers that hit `Err` must route it
/// through the Event Failure Protocol with a synthetic `HandlerFailure`.
pub fn call_apply<D: WorkflowDefinition>(
    definition: &D,
    state: &D::State,
    event: &D::Event,
) -> Result<D::State, PanicInfo> {
    catch_unwind(AssertUnwindSafe(|| definition.apply(state, event))).map_err(|payload| {
        let message = extract_panic_message(payload);
        error!(callback = "apply", panic = %message, "definition callback panicked");
        PanicInfo {
            callback: "apply",
            message,
        }
    })
}

/// Call `Definition::error`, catching panics. A panic here is itself an
/// `InvalidDirective`-shaped failure: there is no directive to act on, so
/// the caller must stop the instance with the panic as the reason.
pub fn call_error<D: WorkflowDefinition>(
    definition: &D,
    error: &dyn std::fmt::Display,
    subject: FailureSubject<'_, D::Event, D::Command>,
    failure_context: FailureContext<D::State, D::Command>,
) -> Result<Directive<D::Command>, PanicInfo> {
    catch_unwind(AssertUnwindSafe(|| definition.error(error, subject, failure_context))).map_err(|payload| {
        let message = extract_panic_message(payload);
        error!(callback = "error", panic = %message, "definition callback panicked");
        PanicInfo {
            callback: "error",
            message,
        }
    })
}

/// Either a developer-signaled error or a caught panic. Both are routed to
/// the Event Failure Protocol; this type lets the driver tell the two
/// apart for logging without adding a variant to `D::Error` itself.
#[derive(Debug)]
pub enum PanicOr<E> {
    Err(E),
    Panic(PanicInfo),
}

impl<E: std::fmt::Display> std::fmt::Display for PanicOr<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PanicOr::Err(e) => write!(f, "{e}"),
            PanicOr::Panic(p) => write!(f, "{p}"),
        }
    }
}
