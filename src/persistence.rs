//! The Event Store interface consumed by a PMI: read, record, and delete
//! snapshots keyed by [`crate::core::WorkflowIdentity::snapshot_key`].
//!
//! Generalized from the teacher's `MachineStore` (load/save keyed by id and
//! guarded by a [`Revision`] for optimistic concurrency). A PMI is a
//! single-writer actor: there is no concurrent writer to race against, so
//! the revision/conflict machinery is dropped entirely. What is kept is the
//! shape — an async trait over a string-ish key, `Backend` errors distinguished
//! from "not found" — and the `testing::InMemoryStore` fake, trimmed the same way.

use async_trait::async_trait;

use crate::core::Snapshot;

/// Failure reading, writing, or deleting a snapshot. Always a backend failure;
/// "absent" is represented as `Ok(None)` from [`SnapshotStore::read_snapshot`],
/// never an error, so callers can't mistake "new instance" for "storage down".
#[derive(Debug, thiserror::Error)]
#[error("snapshot store backend error: {0}")]
pub struct SnapshotError(#[from] pub anyhow::Error);

/// Append-only event log's snapshot side: the only persistence surface a
/// PMI depends on.
///
/// Implementations must make `record_snapshot` atomic at the granularity of a
/// single key: a reader must never observe a partially written snapshot.
#[async_trait]
pub trait SnapshotStore<S>: Send + Sync + 'static
where
    S: Send + Sync + 'static,
{
    /// Read the snapshot for `key`. `Ok(None)` means no snapshot has ever been
    /// recorded for this key (a brand new instance); anything else is a
    /// backend failure and is fatal to instance startup.
    async fn read_snapshot(&self, key: &str) -> Result<Option<Snapshot<S>>, SnapshotError>;

    /// Atomically persist `snapshot` under `key`, replacing whatever was
    /// previously recorded there.
    async fn record_snapshot(&self, key: &str, snapshot: Snapshot<S>) -> Result<(), SnapshotError>;

    /// Delete the snapshot for `key`. Called on `stop`. Deleting a
    /// key with no snapshot is not an error.
    async fn delete_snapshot(&self, key: &str) -> Result<(), SnapshotError>;
}

/// In-memory fakes for tests and for hosts that haven't wired a real store yet.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// `SnapshotStore` backed by a `HashMap`, guarded by a `Mutex` since the
    /// trait requires `Sync` but a PMI never calls it concurrently with itself.
    pub struct InMemorySnapshotStore<S> {
        data: Mutex<HashMap<String, Snapshot<S>>>,
    }

    impl<S> InMemorySnapshotStore<S> {
        pub fn new() -> Self {
            Self {
                data: Mutex::new(HashMap::new()),
            }
        }
    }

    impl<S> Default for InMemorySnapshotStore<S> {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl<S> SnapshotStore<S> for InMemorySnapshotStore<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        async fn read_snapshot(&self, key: &str) -> Result<Option<Snapshot<S>>, SnapshotError> {
            let data = self
                .data
                .lock()
                .map_err(|e| SnapshotError(anyhow::anyhow!("mutex poisoned: {e}")))?;
            Ok(data.get(key).cloned())
        }

        async fn record_snapshot(&self, key: &str, snapshot: Snapshot<S>) -> Result<(), SnapshotError> {
            let mut data = self
                .data
                .lock()
                .map_err(|e| SnapshotError(anyhow::anyhow!("mutex poisoned: {e}")))?;
            data.insert(key.to_string(), snapshot);
            Ok(())
        }

        async fn delete_snapshot(&self, key: &str) -> Result<(), SnapshotError> {
            let mut data = self
                .data
                .lock()
                .map_err(|e| SnapshotError(anyhow::anyhow!("mutex poisoned: {e}")))?;
            data.remove(key);
            Ok(())
        }
    }
}
