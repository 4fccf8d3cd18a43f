//! Backend client capabilities
//!
//! Every backend adapter implements [`StateClient`]. Locking and force push
//! are optional capabilities: a client advertises them through
//! [`StateClient::as_locker`] and [`StateClient::as_force_pusher`], and callers
//! must query before use.
//!
//! Client calls have no timeout of their own. Callers bound them with a
//! cancellation token and drop the future; adapters must leave backend state
//! as it was when a call is dropped before it completes.

use crate::error::ClientError;
use crate::lock::LockInfo;
use crate::payload::Fetched;
use async_trait::async_trait;

/// Fetch, store and delete an opaque state payload
#[async_trait]
pub trait StateClient: Send + Sync {
    /// Fetch the stored payload
    ///
    /// Returns [`Fetched::NotFound`] when nothing was ever stored. Must not
    /// have side effects.
    async fn get(&self) -> Result<Fetched, ClientError>;

    /// Store `data` as the new authoritative payload
    async fn put(&self, data: &[u8]) -> Result<(), ClientError>;

    /// Remove the stored payload
    async fn delete(&self) -> Result<(), ClientError>;

    /// Lock capability, if supported
    fn as_locker(&self) -> Option<&dyn Locker> {
        None
    }

    /// Force-push capability, if supported
    fn as_force_pusher(&self) -> Option<&dyn ForcePusher> {
        None
    }
}

/// Exclusive advisory locking
#[async_trait]
pub trait Locker: Send + Sync {
    /// Acquire the lock, returning the backend-assigned id
    ///
    /// Fails with [`ClientError::LockHeld`] if another lock is active.
    async fn lock(&self, info: &LockInfo) -> Result<String, ClientError>;

    /// Release the lock held under `id`
    ///
    /// Fails with [`ClientError::LockMismatch`] if `id` is not the current
    /// holder, leaving the lock intact.
    async fn unlock(&self, id: &str) -> Result<(), ClientError>;

    /// Whether locking is actually enabled for this instance
    fn is_locking_enabled(&self) -> bool {
        true
    }
}

/// One-way switch that disables the client's own write precondition
pub trait ForcePusher: Send + Sync {
    /// Make every later `put` on this instance skip the client's version check
    fn enable_force_push(&self);
}

#[async_trait]
impl<T: StateClient + ?Sized> StateClient for std::sync::Arc<T> {
    async fn get(&self) -> Result<Fetched, ClientError> {
        (**self).get().await
    }

    async fn put(&self, data: &[u8]) -> Result<(), ClientError> {
        (**self).put(data).await
    }

    async fn delete(&self) -> Result<(), ClientError> {
        (**self).delete().await
    }

    fn as_locker(&self) -> Option<&dyn Locker> {
        (**self).as_locker()
    }

    fn as_force_pusher(&self) -> Option<&dyn ForcePusher> {
        (**self).as_force_pusher()
    }
}
