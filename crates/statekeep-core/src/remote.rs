//! Conflict-safe state session over a [`StateClient`]
//!
//! [`RemoteState`] caches the payload seen at the last refresh and refuses to
//! overwrite (or delete) the backend's payload if it has changed since.
//!
//! # Conflict policy
//!
//! Before every write the session re-fetches the backend's payload and
//! compares its checksum, recomputed from the fetched bytes, against the
//! checksum recomputed from the bytes cached at refresh time. This costs one
//! extra `get` per write and never relies on a checksum recorded earlier.
//! An explicit force push skips the comparison entirely.
//!
//! # Cancellation
//!
//! A cancelled refresh leaves the cache untouched. A persist or delete that
//! is cancelled while the backend call is in flight returns
//! [`StateError::OutcomeUnknown`]: the write may or may not have landed, and
//! the caller must refresh to find out.

use crate::checksum::Checksum;
use crate::client::{Locker, StateClient};
use crate::error::{ClientError, StateError};
use crate::lock::LockInfo;
use crate::payload::{Fetched, Payload};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// State session for one backend workspace
///
/// Owned by a single sequential workflow: refresh, mutate, persist.
#[derive(Debug)]
pub struct RemoteState<C> {
    client: C,
    /// Payload observed at the last successful refresh or persist
    snapshot: Option<Payload>,
    /// Content the caller intends to persist
    content: Option<Vec<u8>>,
    refreshed: bool,
    force_push: bool,
}

impl<C: StateClient> RemoteState<C> {
    /// Create a session over `client`
    #[inline]
    #[must_use]
    pub fn new(client: C) -> Self {
        Self {
            client,
            snapshot: None,
            content: None,
            refreshed: false,
            force_push: false,
        }
    }

    /// Get the underlying client
    #[inline]
    #[must_use]
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Current content, `None` when no state exists
    #[inline]
    #[must_use]
    pub fn state(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// Replace the content to be written by the next persist
    #[inline]
    pub fn write_state(&mut self, content: Vec<u8>) {
        self.content = Some(content);
    }

    /// Checksum of the payload last read or written, if any
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> Option<Checksum> {
        self.snapshot.as_ref().map(|p| p.checksum)
    }

    /// Whether a refresh has completed
    #[inline]
    #[must_use]
    pub fn is_refreshed(&self) -> bool {
        self.refreshed
    }

    /// Skip the conflict check on every later write
    ///
    /// One-way. If the client is a [`crate::ForcePusher`] its own version
    /// check is disabled as well.
    pub fn enable_force_push(&mut self) {
        if !self.force_push {
            tracing::warn!("force push enabled; conflict checks are disabled for this session");
        }
        self.force_push = true;
        if let Some(pusher) = self.client.as_force_pusher() {
            pusher.enable_force_push();
        }
    }

    /// Whether force push has been requested
    #[inline]
    #[must_use]
    pub fn is_force_push(&self) -> bool {
        self.force_push
    }

    /// Lock capability of the client, if supported
    #[inline]
    #[must_use]
    pub fn locker(&self) -> Option<&dyn Locker> {
        self.client.as_locker()
    }

    /// Pull the latest payload from the backend
    ///
    /// No stored state is not an error: the cache is cleared and
    /// [`RemoteState::state`] returns `None`.
    ///
    /// # Errors
    /// - `StateError::Client` if the fetch fails or the payload is corrupt
    /// - `StateError::Cancelled` if `cancel` fires first (cache untouched)
    pub async fn refresh(&mut self, cancel: &CancellationToken) -> Result<(), StateError> {
        let fetched = guarded("refresh", cancel, false, self.client.get()).await?;

        match fetched {
            Fetched::NotFound => {
                tracing::info!("no remote state found");
                self.snapshot = None;
                self.content = None;
            }
            Fetched::Found(payload) => {
                let checksum = payload.verify()?;
                tracing::info!(checksum = %checksum.short(), bytes = payload.len(), "refreshed remote state");
                self.content = Some(payload.data.clone());
                self.snapshot = Some(payload);
            }
        }
        self.refreshed = true;
        Ok(())
    }

    /// Write the current content to the backend
    ///
    /// Does nothing when there is no content, or when the content is
    /// byte-identical to the payload last read (unless force push is on).
    ///
    /// # Errors
    /// - `StateError::NotRefreshed` if no refresh has completed
    /// - `StateError::Conflict` if the backend changed since the last refresh
    /// - `StateError::Client` if the backend call fails
    /// - `StateError::Cancelled` / `StateError::OutcomeUnknown` on cancellation
    pub async fn persist(&mut self, cancel: &CancellationToken) -> Result<(), StateError> {
        if !self.refreshed {
            return Err(StateError::NotRefreshed("persisted"));
        }
        let Some(content) = self.content.clone() else {
            tracing::debug!("no state content to persist");
            return Ok(());
        };
        if !self.force_push && self.snapshot.as_ref().is_some_and(|s| s.data == content) {
            tracing::debug!("state unchanged since refresh; skipping write");
            return Ok(());
        }

        if self.force_push {
            tracing::warn!("force pushing state without conflict check");
        } else {
            self.ensure_unchanged("persist", cancel).await?;
        }

        let payload = Payload::new(content);
        guarded("persist", cancel, true, self.client.put(&payload.data)).await?;

        tracing::info!(checksum = %payload.checksum.short(), bytes = payload.len(), "persisted state");
        self.snapshot = Some(payload);
        Ok(())
    }

    /// Remove the payload from the backend
    ///
    /// Applies the same conflict check as [`RemoteState::persist`].
    ///
    /// # Errors
    /// Same as [`RemoteState::persist`]
    pub async fn delete(&mut self, cancel: &CancellationToken) -> Result<(), StateError> {
        if !self.refreshed {
            return Err(StateError::NotRefreshed("deleted"));
        }
        if self.force_push {
            tracing::warn!("force deleting state without conflict check");
        } else {
            self.ensure_unchanged("delete", cancel).await?;
        }

        guarded("delete", cancel, true, self.client.delete()).await?;

        tracing::info!("deleted remote state");
        self.snapshot = None;
        self.content = None;
        Ok(())
    }

    /// Acquire the backend lock
    ///
    /// # Errors
    /// - `ClientError::NotLockable` if the client cannot lock
    /// - `ClientError::LockHeld` if someone else holds the lock
    pub async fn lock(&self, info: &LockInfo, cancel: &CancellationToken) -> Result<String, StateError> {
        let locker = self.enabled_locker()?;
        let id = guarded("lock", cancel, true, locker.lock(info)).await?;
        tracing::info!(lock_id = %id, operation = %info.operation, "acquired state lock");
        Ok(id)
    }

    /// Release the backend lock held under `id`
    ///
    /// # Errors
    /// - `ClientError::NotLockable` if the client cannot lock
    /// - `ClientError::LockMismatch` if `id` is not the holder
    pub async fn unlock(&self, id: &str, cancel: &CancellationToken) -> Result<(), StateError> {
        let locker = self.enabled_locker()?;
        guarded("unlock", cancel, true, locker.unlock(id)).await?;
        tracing::info!(lock_id = %id, "released state lock");
        Ok(())
    }

    fn enabled_locker(&self) -> Result<&dyn Locker, ClientError> {
        self.client
            .as_locker()
            .filter(|locker| locker.is_locking_enabled())
            .ok_or(ClientError::NotLockable)
    }

    /// Checksum of the bytes cached at refresh, recomputed
    fn expected_checksum(&self) -> Option<Checksum> {
        self.snapshot.as_ref().map(|p| Checksum::compute(&p.data))
    }

    async fn ensure_unchanged(
        &self,
        op: &'static str,
        cancel: &CancellationToken,
    ) -> Result<(), StateError> {
        let expected = self.expected_checksum();
        let current = guarded(op, cancel, false, self.client.get()).await?;
        let actual = current.payload().map(|p| Checksum::compute(&p.data));

        if expected == actual {
            tracing::debug!(op, "remote state unchanged since refresh");
            Ok(())
        } else {
            tracing::warn!(
                op,
                expected = ?expected.map(|c| c.short()),
                actual = ?actual.map(|c| c.short()),
                "remote state changed since refresh"
            );
            Err(StateError::Conflict { expected, actual })
        }
    }
}

/// Run a client call unless `cancel` fires first
///
/// `mutating` calls report cancellation mid-flight as an unknown outcome.
async fn guarded<T, F>(
    op: &'static str,
    cancel: &CancellationToken,
    mutating: bool,
    call: F,
) -> Result<T, StateError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    if cancel.is_cancelled() {
        return Err(StateError::Cancelled(op));
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            if mutating {
                Err(StateError::OutcomeUnknown(op))
            } else {
                Err(StateError::Cancelled(op))
            }
        }
        res = call => res.map_err(StateError::from),
    }
}
