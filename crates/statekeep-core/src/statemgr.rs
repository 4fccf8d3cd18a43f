//! Session-level state managers
//!
//! [`StateManager`] is the object-safe face of a state session that commands
//! consume. [`RemoteState`] implements it for any client; [`Filesystem`] is
//! the purely local variant, which the recovery workflow treats specially.

use crate::backend::local::LocalFileClient;
use crate::client::{Locker, StateClient};
use crate::error::StateError;
use crate::remote::RemoteState;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// A state session for one workspace
#[async_trait]
pub trait StateManager: Send + Sync {
    /// Current content, `None` when no state exists
    fn state(&self) -> Option<&[u8]>;

    /// Replace the content to be written by the next persist
    fn write_state(&mut self, content: Vec<u8>);

    /// Pull the latest state
    async fn refresh(&mut self, cancel: &CancellationToken) -> Result<(), StateError>;

    /// Write the current content, guarded by the conflict check
    async fn persist(&mut self, cancel: &CancellationToken) -> Result<(), StateError>;

    /// Skip conflict checks for the rest of the session
    fn enable_force_push(&mut self);

    /// Lock capability, if supported
    fn locker(&self) -> Option<&dyn Locker>;

    /// Whether this is the single-machine filesystem variant
    fn is_local(&self) -> bool {
        false
    }
}

#[async_trait]
impl<C: StateClient> StateManager for RemoteState<C> {
    fn state(&self) -> Option<&[u8]> {
        RemoteState::state(self)
    }

    fn write_state(&mut self, content: Vec<u8>) {
        RemoteState::write_state(self, content);
    }

    async fn refresh(&mut self, cancel: &CancellationToken) -> Result<(), StateError> {
        RemoteState::refresh(self, cancel).await
    }

    async fn persist(&mut self, cancel: &CancellationToken) -> Result<(), StateError> {
        RemoteState::persist(self, cancel).await
    }

    fn enable_force_push(&mut self) {
        RemoteState::enable_force_push(self);
    }

    fn locker(&self) -> Option<&dyn Locker> {
        RemoteState::locker(self)
    }
}

/// State kept in a file on this machine
///
/// Uses the same conflict-checked session as remote backends, but its lock is
/// only meaningful between processes sharing this filesystem.
#[derive(Debug)]
pub struct Filesystem {
    inner: RemoteState<LocalFileClient>,
}

impl Filesystem {
    /// Open a filesystem state manager for `path`
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            inner: RemoteState::new(LocalFileClient::new(path)),
        }
    }

    /// Path of the state file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.client().path()
    }

    /// Borrow the underlying session
    #[inline]
    #[must_use]
    pub fn session(&self) -> &RemoteState<LocalFileClient> {
        &self.inner
    }

    /// Mutably borrow the underlying session
    #[inline]
    pub fn session_mut(&mut self) -> &mut RemoteState<LocalFileClient> {
        &mut self.inner
    }
}

#[async_trait]
impl StateManager for Filesystem {
    fn state(&self) -> Option<&[u8]> {
        self.inner.state()
    }

    fn write_state(&mut self, content: Vec<u8>) {
        self.inner.write_state(content);
    }

    async fn refresh(&mut self, cancel: &CancellationToken) -> Result<(), StateError> {
        self.inner.refresh(cancel).await
    }

    async fn persist(&mut self, cancel: &CancellationToken) -> Result<(), StateError> {
        self.inner.persist(cancel).await
    }

    fn enable_force_push(&mut self) {
        self.inner.enable_force_push();
    }

    fn locker(&self) -> Option<&dyn Locker> {
        self.inner.locker()
    }

    fn is_local(&self) -> bool {
        true
    }
}
