//! The Router interface consumed by a PMI.
//!
//! Policy-light, in the spirit of the teacher's `JobStore`/`JobQueue`: the
//! Router owns event routing, instance lifecycle, and delivery ordering; a PMI
//! only ever tells it "this event is done." Nothing here prescribes how the
//! Router decides which instance gets an event or how it tracks in-flight
//! delivery — that policy lives entirely on the Router's side of the boundary.

use async_trait::async_trait;

use crate::core::WorkflowIdentity;

/// Acknowledgement sink a PMI reports completion to.
///
/// A conforming Router must not deliver the next event for an instance until
/// `ack_event` returns for the previous one. This is the Router's obligation,
/// not the PMI's — the PMI only ever acks in order, once per dequeued event.
#[async_trait]
pub trait Router: Send + Sync + 'static {
    /// Notify the router that `identity` has finished (or skipped) the event
    /// numbered `event_number`.
    async fn ack_event(&self, identity: &WorkflowIdentity, event_number: u64) -> anyhow::Result<()>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every ack it receives, for assertions in tests.
    pub struct RecordingRouter {
        acks: Mutex<Vec<(WorkflowIdentity, u64)>>,
    }

    impl RecordingRouter {
        pub fn new() -> Self {
            Self {
                acks: Mutex::new(Vec::new()),
            }
        }

        pub fn acks(&self) -> Vec<(WorkflowIdentity, u64)> {
            self.acks.lock().unwrap().clone()
        }
    }

    impl Default for RecordingRouter {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Router for RecordingRouter {
        async fn ack_event(&self, identity: &WorkflowIdentity, event_number: u64) -> anyhow::Result<()> {
            self.acks.lock().unwrap().push((identity.clone(), event_number));
            Ok(())
        }
    }
}
