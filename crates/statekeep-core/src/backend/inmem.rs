//! In-memory backend
//!
//! Workspaces live in a store shared by every clone of an [`InmemBackend`],
//! so several sessions in one process can race each other the way separate
//! operators would against a real remote. Nothing survives the process.

use super::{Backend, Observation, DEFAULT_WORKSPACE};
use crate::client::{ForcePusher, Locker, StateClient};
use crate::error::{BackendError, ClientError};
use crate::lock::LockInfo;
use crate::payload::{Fetched, Payload};
use crate::remote::RemoteState;
use crate::statemgr::StateManager;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Store {
    states: BTreeMap<String, Vec<u8>>,
    locks: BTreeMap<String, LockInfo>,
}

/// Process-local backend
#[derive(Debug, Clone)]
pub struct InmemBackend {
    store: Arc<Mutex<Store>>,
    lock_enabled: bool,
}

impl Default for InmemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InmemBackend {
    /// Create an empty backend with locking enabled
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            lock_enabled: true,
        }
    }

    /// With locking enabled or disabled
    #[inline]
    #[must_use]
    pub fn with_locking(mut self, enabled: bool) -> Self {
        self.lock_enabled = enabled;
        self
    }

    /// Create a client for `workspace`
    #[must_use]
    pub fn client(&self, workspace: &str) -> InmemClient {
        InmemClient {
            store: Arc::clone(&self.store),
            workspace: workspace.to_string(),
            lock_enabled: self.lock_enabled,
            force_push: AtomicBool::new(false),
            last_seen: Mutex::new(Observation::Unknown),
        }
    }

    /// Open a typed session for `workspace`
    #[must_use]
    pub fn session(&self, workspace: &str) -> RemoteState<InmemClient> {
        RemoteState::new(self.client(workspace))
    }

    /// Bytes currently stored for `workspace`
    #[must_use]
    pub fn stored(&self, workspace: &str) -> Option<Vec<u8>> {
        self.store.lock().states.get(workspace).cloned()
    }

    /// Current lock holder for `workspace`
    #[must_use]
    pub fn lock_holder(&self, workspace: &str) -> Option<LockInfo> {
        self.store.lock().locks.get(workspace).cloned()
    }
}

#[async_trait]
impl Backend for InmemBackend {
    fn name(&self) -> &'static str {
        "inmem"
    }

    async fn state_mgr(&self, workspace: &str) -> Result<Box<dyn StateManager>, BackendError> {
        super::validate_workspace(workspace)?;
        Ok(Box::new(self.session(workspace)))
    }

    async fn workspaces(&self) -> Result<Vec<String>, BackendError> {
        let store = self.store.lock();
        let mut names = vec![DEFAULT_WORKSPACE.to_string()];
        names.extend(
            store
                .states
                .keys()
                .filter(|name| *name != DEFAULT_WORKSPACE)
                .cloned(),
        );
        Ok(names)
    }

    async fn delete_workspace(&self, workspace: &str) -> Result<(), BackendError> {
        super::validate_workspace(workspace)?;
        if workspace == DEFAULT_WORKSPACE {
            return Err(BackendError::ProtectedWorkspace(workspace.to_string()));
        }
        let mut store = self.store.lock();
        if let Some(holder) = store.locks.get(workspace) {
            return Err(ClientError::lock_held(holder.clone()).into());
        }
        store
            .states
            .remove(workspace)
            .map(|_| ())
            .ok_or_else(|| BackendError::WorkspaceNotFound(workspace.to_string()))
    }
}

/// Client for one workspace of an [`InmemBackend`]
///
/// Writes are checked against what this client last observed, atomically
/// with the write, unless force push is enabled.
#[derive(Debug)]
pub struct InmemClient {
    store: Arc<Mutex<Store>>,
    workspace: String,
    lock_enabled: bool,
    force_push: AtomicBool,
    last_seen: Mutex<Observation>,
}

impl InmemClient {
    fn check_precondition(&self, store: &Store) -> Result<(), ClientError> {
        if self.force_push.load(Ordering::SeqCst) {
            return Ok(());
        }
        let expected = *self.last_seen.lock();
        let current = Observation::of_bytes(store.states.get(&self.workspace).map(Vec::as_slice));
        if expected == current {
            Ok(())
        } else {
            Err(ClientError::Precondition(format!(
                "workspace {:?} changed since it was last read",
                self.workspace
            )))
        }
    }
}

#[async_trait]
impl StateClient for InmemClient {
    async fn get(&self) -> Result<Fetched, ClientError> {
        let fetched: Fetched = self
            .store
            .lock()
            .states
            .get(&self.workspace)
            .cloned()
            .map(Payload::new)
            .into();
        *self.last_seen.lock() = Observation::of(&fetched);
        Ok(fetched)
    }

    async fn put(&self, data: &[u8]) -> Result<(), ClientError> {
        let mut store = self.store.lock();
        self.check_precondition(&store)?;
        store.states.insert(self.workspace.clone(), data.to_vec());
        *self.last_seen.lock() = Observation::of_bytes(Some(data));
        Ok(())
    }

    async fn delete(&self) -> Result<(), ClientError> {
        let mut store = self.store.lock();
        self.check_precondition(&store)?;
        store.states.remove(&self.workspace);
        *self.last_seen.lock() = Observation::Absent;
        Ok(())
    }

    fn as_locker(&self) -> Option<&dyn Locker> {
        Some(self)
    }

    fn as_force_pusher(&self) -> Option<&dyn ForcePusher> {
        Some(self)
    }
}

#[async_trait]
impl Locker for InmemClient {
    async fn lock(&self, info: &LockInfo) -> Result<String, ClientError> {
        if !self.lock_enabled {
            return Err(ClientError::NotLockable);
        }
        let mut store = self.store.lock();
        if let Some(holder) = store.locks.get(&self.workspace) {
            return Err(ClientError::lock_held(holder.clone()));
        }
        let info = info.clone().with_path(format!("inmem://{}", self.workspace));
        let id = info.id.clone();
        store.locks.insert(self.workspace.clone(), info);
        Ok(id)
    }

    async fn unlock(&self, id: &str) -> Result<(), ClientError> {
        if !self.lock_enabled {
            return Err(ClientError::NotLockable);
        }
        let mut store = self.store.lock();
        let held = store.locks.get(&self.workspace).is_some_and(|h| h.id == id);
        if held {
            store.locks.remove(&self.workspace);
            Ok(())
        } else {
            Err(ClientError::lock_mismatch(
                id,
                store.locks.get(&self.workspace).cloned(),
            ))
        }
    }

    fn is_locking_enabled(&self) -> bool {
        self.lock_enabled
    }
}

impl ForcePusher for InmemClient {
    fn enable_force_push(&self) {
        self.force_push.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_is_exclusive_per_workspace() {
        let backend = InmemBackend::new();
        let a = backend.client("default");
        let b = backend.client("default");
        let other = backend.client("other");

        let id = a.lock(&LockInfo::new("apply")).await.unwrap();
        assert!(matches!(
            b.lock(&LockInfo::new("apply")).await,
            Err(ClientError::LockHeld { .. })
        ));
        other.lock(&LockInfo::new("apply")).await.unwrap();

        assert_eq!(backend.lock_holder("default").unwrap().id, id);
    }

    #[tokio::test]
    async fn unlock_with_wrong_id_keeps_lock() {
        let backend = InmemBackend::new();
        let client = backend.client("default");
        let id = client.lock(&LockInfo::new("apply")).await.unwrap();

        let err = client.unlock("not-the-id").await.unwrap_err();
        assert!(matches!(err, ClientError::LockMismatch { holder: Some(_), .. }));
        assert_eq!(backend.lock_holder("default").unwrap().id, id);

        client.unlock(&id).await.unwrap();
        assert!(backend.lock_holder("default").is_none());
    }

    #[tokio::test]
    async fn precondition_is_per_client() {
        let backend = InmemBackend::new();
        let a = backend.client("default");
        let b = backend.client("default");

        a.get().await.unwrap();
        b.get().await.unwrap();
        a.put(b"a").await.unwrap();
        assert!(matches!(b.put(b"b").await, Err(ClientError::Precondition(_))));

        b.enable_force_push();
        b.put(b"b").await.unwrap();
        assert_eq!(backend.stored("default").as_deref(), Some(&b"b"[..]));
    }

    #[tokio::test]
    async fn workspaces_track_stored_state() {
        let backend = InmemBackend::new();
        let client = backend.client("staging");
        client.get().await.unwrap();
        client.put(b"{}").await.unwrap();

        assert_eq!(backend.workspaces().await.unwrap(), vec!["default", "staging"]);
        backend.delete_workspace("staging").await.unwrap();
        assert!(matches!(
            backend.delete_workspace("staging").await,
            Err(BackendError::WorkspaceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn locked_workspace_is_not_deleted() {
        let backend = InmemBackend::new();
        let client = backend.client("staging");
        client.get().await.unwrap();
        client.put(b"{}").await.unwrap();
        let id = client.lock(&LockInfo::new("apply")).await.unwrap();

        match backend.delete_workspace("staging").await {
            Err(BackendError::Client(ClientError::LockHeld { holder })) => assert_eq!(holder.id, id),
            other => panic!("expected LockHeld, got {other:?}"),
        }
        assert_eq!(backend.lock_holder("staging").unwrap().id, id);
        assert!(backend.stored("staging").is_some());

        client.unlock(&id).await.unwrap();
        backend.delete_workspace("staging").await.unwrap();
        assert!(backend.stored("staging").is_none());
    }

    #[tokio::test]
    async fn delete_validates_workspace_name() {
        let backend = InmemBackend::new();
        assert!(matches!(
            backend.delete_workspace("../default").await,
            Err(BackendError::InvalidWorkspace(_))
        ));
    }
}
