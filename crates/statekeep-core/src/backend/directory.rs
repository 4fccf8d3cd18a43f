//! Directory backend: a shared directory used as a remote store
//!
//! Meant for a directory that several machines mount (NFS, SMB, a synced
//! volume). Each workspace is `<dir>/<workspace>.state` with its lock at
//! `<dir>/<workspace>.state.lock`.
//!
//! The client keeps its own write precondition: a `put` or `delete` is
//! rejected if the file changed since this client last read or wrote it.
//! The check and the write are not atomic across machines; the lock is what
//! serializes writers. Force push disables the precondition.

use super::fsutil::{self, LockFile};
use super::{validate_workspace, Backend, Observation, DEFAULT_WORKSPACE};
use crate::client::{ForcePusher, Locker, StateClient};
use crate::error::{BackendError, ClientError};
use crate::lock::LockInfo;
use crate::payload::{Fetched, Payload};
use crate::remote::RemoteState;
use crate::statemgr::StateManager;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const STATE_SUFFIX: &str = ".state";
const LOCK_SUFFIX: &str = ".lock";

/// Client for one workspace in a shared directory
#[derive(Debug)]
pub struct DirectoryClient {
    state_path: PathBuf,
    lock: LockFile,
    lock_enabled: bool,
    force_push: AtomicBool,
    last_seen: Mutex<Observation>,
}

impl DirectoryClient {
    /// Create a client for `workspace` under `dir`
    #[must_use]
    pub fn new(dir: impl AsRef<Path>, workspace: &str, lock_enabled: bool) -> Self {
        let state_path = dir.as_ref().join(format!("{workspace}{STATE_SUFFIX}"));
        let lock = LockFile::new(fsutil::sibling(&state_path, LOCK_SUFFIX));
        Self {
            state_path,
            lock,
            lock_enabled,
            force_push: AtomicBool::new(false),
            last_seen: Mutex::new(Observation::Unknown),
        }
    }

    /// Path of the state file
    #[inline]
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Path of the lock file
    #[inline]
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    /// Whether force push has been enabled
    #[inline]
    #[must_use]
    pub fn is_force_push(&self) -> bool {
        self.force_push.load(Ordering::SeqCst)
    }

    async fn check_precondition(&self) -> Result<(), ClientError> {
        if self.is_force_push() {
            return Ok(());
        }
        let expected = *self.last_seen.lock();
        if expected == Observation::Unknown {
            return Err(ClientError::Precondition(format!(
                "{} must be read before it is written",
                self.state_path.display()
            )));
        }
        let current = fsutil::read_optional(&self.state_path).await?;
        if Observation::of_bytes(current.as_deref()) == expected {
            Ok(())
        } else {
            Err(ClientError::Precondition(format!(
                "{} changed since it was last read",
                self.state_path.display()
            )))
        }
    }
}

#[async_trait]
impl StateClient for DirectoryClient {
    async fn get(&self) -> Result<Fetched, ClientError> {
        let data = fsutil::read_optional(&self.state_path).await?;
        let fetched: Fetched = data.map(Payload::new).into();
        *self.last_seen.lock() = Observation::of(&fetched);
        Ok(fetched)
    }

    async fn put(&self, data: &[u8]) -> Result<(), ClientError> {
        self.check_precondition().await?;
        fsutil::write_atomic(&self.state_path, data).await?;
        *self.last_seen.lock() = Observation::of_bytes(Some(data));
        Ok(())
    }

    async fn delete(&self) -> Result<(), ClientError> {
        self.check_precondition().await?;
        fsutil::remove_optional(&self.state_path).await?;
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
impl Locker for DirectoryClient {
    async fn lock(&self, info: &LockInfo) -> Result<String, ClientError> {
        if !self.lock_enabled {
            return Err(ClientError::NotLockable);
        }
        self.lock.acquire(info, &self.state_path).await
    }

    async fn unlock(&self, id: &str) -> Result<(), ClientError> {
        if !self.lock_enabled {
            return Err(ClientError::NotLockable);
        }
        self.lock.release(id).await
    }

    fn is_locking_enabled(&self) -> bool {
        self.lock_enabled
    }
}

impl ForcePusher for DirectoryClient {
    fn enable_force_push(&self) {
        self.force_push.store(true, Ordering::SeqCst);
    }
}

/// Backend storing workspaces as files in a shared directory
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    dir: PathBuf,
    lock_enabled: bool,
}

impl DirectoryBackend {
    /// Backend over `dir` with locking enabled
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
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
    pub fn client(&self, workspace: &str) -> DirectoryClient {
        DirectoryClient::new(&self.dir, workspace, self.lock_enabled)
    }

    async fn ensure_reachable(&self) -> Result<(), BackendError> {
        let meta = tokio::fs::metadata(&self.dir)
            .await
            .map_err(|e| BackendError::io_error(&self.dir, e))?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(BackendError::io_error(
                &self.dir,
                std::io::Error::other("state path is not a directory"),
            ))
        }
    }
}

#[async_trait]
impl Backend for DirectoryBackend {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn state_mgr(&self, workspace: &str) -> Result<Box<dyn StateManager>, BackendError> {
        validate_workspace(workspace)?;
        self.ensure_reachable().await?;
        tracing::debug!(workspace, dir = %self.dir.display(), locking = self.lock_enabled, "opening directory state");
        Ok(Box::new(RemoteState::new(self.client(workspace))))
    }

    async fn workspaces(&self) -> Result<Vec<String>, BackendError> {
        self.ensure_reachable().await?;
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| BackendError::io_error(&self.dir, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackendError::io_error(&self.dir, e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(STATE_SUFFIX)) else {
                continue;
            };
            if name != DEFAULT_WORKSPACE && validate_workspace(name).is_ok() {
                names.push(name.to_string());
            }
        }
        names.sort();
        names.insert(0, DEFAULT_WORKSPACE.to_string());
        Ok(names)
    }

    async fn delete_workspace(&self, workspace: &str) -> Result<(), BackendError> {
        validate_workspace(workspace)?;
        if workspace == DEFAULT_WORKSPACE {
            return Err(BackendError::ProtectedWorkspace(workspace.to_string()));
        }
        let client = self.client(workspace);
        if tokio::fs::metadata(client.state_path()).await.is_err() {
            return Err(BackendError::WorkspaceNotFound(workspace.to_string()));
        }
        if let Some(holder) = client.lock.holder().await? {
            return Err(ClientError::lock_held(holder).into());
        }
        fsutil::remove_optional(client.state_path()).await?;
        Ok(())
    }
}
