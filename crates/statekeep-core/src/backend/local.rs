//! Local backend: state files on this machine
//!
//! The default workspace lives at the configured state path; other
//! workspaces live under `statekeep.state.d/<workspace>/statekeep.state`
//! next to it. Locks are `.lock.info` sidecar files.

use super::fsutil::{self, LockFile};
use super::{validate_workspace, Backend, DEFAULT_WORKSPACE};
use crate::client::{Locker, StateClient};
use crate::error::{BackendError, ClientError};
use crate::lock::LockInfo;
use crate::payload::{Fetched, Payload};
use crate::statemgr::{Filesystem, StateManager};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Default state file name
pub const DEFAULT_STATE_FILE: &str = "statekeep.state";

/// Directory holding non-default workspaces
pub const WORKSPACE_DIR: &str = "statekeep.state.d";

/// Client for a single local state file
#[derive(Debug, Clone)]
pub struct LocalFileClient {
    path: PathBuf,
    lock: LockFile,
}

impl LocalFileClient {
    /// Create a client for the state file at `path`
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let lock_name = format!(
            ".{}.lock.info",
            path.file_name().unwrap_or_default().to_string_lossy()
        );
        let lock = LockFile::new(path.with_file_name(lock_name));
        Self { path, lock }
    }

    /// Path of the state file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the lock sidecar
    #[inline]
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }
}

#[async_trait]
impl StateClient for LocalFileClient {
    async fn get(&self) -> Result<Fetched, ClientError> {
        let data = fsutil::read_optional(&self.path).await?;
        Ok(data.map(Payload::new).into())
    }

    async fn put(&self, data: &[u8]) -> Result<(), ClientError> {
        fsutil::write_atomic(&self.path, data).await
    }

    async fn delete(&self) -> Result<(), ClientError> {
        fsutil::remove_optional(&self.path).await
    }

    fn as_locker(&self) -> Option<&dyn Locker> {
        Some(self)
    }
}

#[async_trait]
impl Locker for LocalFileClient {
    async fn lock(&self, info: &LockInfo) -> Result<String, ClientError> {
        self.lock.acquire(info, &self.path).await
    }

    async fn unlock(&self, id: &str) -> Result<(), ClientError> {
        self.lock.release(id).await
    }
}

/// Backend keeping every workspace's state on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalBackend {
    state_path: PathBuf,
    workspace_dir: PathBuf,
}

impl LocalBackend {
    /// Backend rooted at `dir`, using the default file names
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::with_state_path(dir.as_ref().join(DEFAULT_STATE_FILE))
    }

    /// Backend whose default workspace lives at `state_path`
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let workspace_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from(WORKSPACE_DIR), |p| p.join(WORKSPACE_DIR));
        Self {
            state_path,
            workspace_dir,
        }
    }

    /// State file path for `workspace`
    #[must_use]
    pub fn state_path(&self, workspace: &str) -> PathBuf {
        if workspace == DEFAULT_WORKSPACE {
            self.state_path.clone()
        } else {
            self.workspace_dir.join(workspace).join(DEFAULT_STATE_FILE)
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn state_mgr(&self, workspace: &str) -> Result<Box<dyn StateManager>, BackendError> {
        validate_workspace(workspace)?;
        let path = self.state_path(workspace);
        tracing::debug!(workspace, path = %path.display(), "opening local state");
        Ok(Box::new(Filesystem::new(path)))
    }

    async fn workspaces(&self) -> Result<Vec<String>, BackendError> {
        let mut names = vec![DEFAULT_WORKSPACE.to_string()];
        let mut entries = match tokio::fs::read_dir(&self.workspace_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(BackendError::io_error(&self.workspace_dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BackendError::io_error(&self.workspace_dir, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| BackendError::io_error(entry.path(), e))?
                .is_dir();
            if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                if name != DEFAULT_WORKSPACE {
                    names.push(name.to_string());
                }
            }
        }
        names[1..].sort();
        Ok(names)
    }

    async fn delete_workspace(&self, workspace: &str) -> Result<(), BackendError> {
        validate_workspace(workspace)?;
        if workspace == DEFAULT_WORKSPACE {
            return Err(BackendError::ProtectedWorkspace(workspace.to_string()));
        }
        let client = LocalFileClient::new(self.state_path(workspace));
        if let Some(holder) = client.lock.holder().await? {
            return Err(ClientError::lock_held(holder).into());
        }
        let dir = self.workspace_dir.join(workspace);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BackendError::WorkspaceNotFound(workspace.to_string()))
            }
            Err(e) => Err(BackendError::io_error(dir, e)),
        }
    }
}
