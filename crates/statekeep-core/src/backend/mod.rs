//! Backends: where workspaces' state lives
//!
//! A [`Backend`] hands out one [`StateManager`] per workspace. The reference
//! backends are:
//! - [`local::LocalBackend`]: state files on this machine
//! - [`directory::DirectoryBackend`]: a shared directory treated as a remote store
//! - [`inmem::InmemBackend`]: process-local store for tests and embedders

pub mod config;
pub mod directory;
pub mod inmem;
pub mod local;

mod fsutil;

use crate::checksum::Checksum;
use crate::error::BackendError;
use crate::payload::Fetched;
use crate::statemgr::StateManager;
use async_trait::async_trait;

/// Name of the workspace that always exists
pub const DEFAULT_WORKSPACE: &str = "default";

/// A store of per-workspace state
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend type name, as used in configuration
    fn name(&self) -> &'static str;

    /// Open a state session for `workspace`
    async fn state_mgr(&self, workspace: &str) -> Result<Box<dyn StateManager>, BackendError>;

    /// List known workspaces, sorted, always including the default one
    async fn workspaces(&self) -> Result<Vec<String>, BackendError>;

    /// Remove a workspace and its state
    async fn delete_workspace(&self, workspace: &str) -> Result<(), BackendError>;
}

/// Something that can produce a configured backend
#[async_trait]
pub trait BackendSource: Send + Sync {
    /// Load the backend
    async fn load(&self) -> Result<Box<dyn Backend>, BackendError>;
}

/// Check that a workspace name is safe to use as a path component
///
/// # Errors
/// Returns `BackendError::InvalidWorkspace` for empty names, names starting
/// with a dot, and names with characters outside `[A-Za-z0-9._-]`.
pub fn validate_workspace(name: &str) -> Result<(), BackendError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(BackendError::InvalidWorkspace(name.to_string()))
    }
}

/// What a client last saw at the backend, for its own write precondition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Observation {
    /// Never read
    Unknown,
    /// Read, nothing stored
    Absent,
    /// Read or written with this checksum
    Present(Checksum),
}

impl Observation {
    pub(crate) fn of(fetched: &Fetched) -> Self {
        fetched
            .payload()
            .map_or(Self::Absent, |p| Self::Present(Checksum::compute(&p.data)))
    }

    pub(crate) fn of_bytes(data: Option<&[u8]>) -> Self {
        data.map_or(Self::Absent, |d| Self::Present(Checksum::compute(d)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_names() {
        assert!(validate_workspace("default").is_ok());
        assert!(validate_workspace("prod-eu_1").is_ok());
        assert!(validate_workspace("v1.2").is_ok());
        assert!(validate_workspace("").is_err());
        assert!(validate_workspace("../etc").is_err());
        assert!(validate_workspace(".hidden").is_err());
        assert!(validate_workspace("a/b").is_err());
    }

    #[test]
    fn observation_distinguishes_absent_from_empty() {
        assert_eq!(Observation::of(&Fetched::NotFound), Observation::Absent);
        assert_eq!(
            Observation::of_bytes(Some(b"")),
            Observation::Present(Checksum::compute(b""))
        );
    }
}
