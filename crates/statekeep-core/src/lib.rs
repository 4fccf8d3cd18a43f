//! statekeep core - conflict-safe remote state sessions
//!
//! Keeps an opaque state payload in a backend and guards every write:
//! - Backend clients fetch, store and delete payloads, optionally with locks
//! - [`RemoteState`] refuses to overwrite a payload that changed since it was read
//! - Backends hand out one session per workspace
//! - [`unlock::UnlockCommand`] recovers from a stuck lock
//!
//! # Example
//!
//! ```rust,ignore
//! use statekeep_core::backend::inmem::InmemBackend;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = InmemBackend::new();
//! let cancel = CancellationToken::new();
//!
//! let mut state = backend.session("default");
//! state.refresh(&cancel).await?;
//! state.write_state(br#"{"version":1}"#.to_vec());
//! state.persist(&cancel).await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod backend;
pub mod checksum;
pub mod client;
pub mod error;
pub mod lock;
pub mod payload;
pub mod remote;
pub mod statemgr;
pub mod ui;
pub mod unlock;

pub use backend::{Backend, BackendSource, DEFAULT_WORKSPACE};
pub use checksum::{Checksum, ChecksumError};
pub use client::{ForcePusher, Locker, StateClient};
pub use error::{BackendError, ClientError, InputError, StateError, UnlockError};
pub use lock::LockInfo;
pub use payload::{Fetched, Payload};
pub use remote::RemoteState;
pub use statemgr::{Filesystem, StateManager};
pub use ui::{Input, InputOpts, Ui};
pub use unlock::{CommandOutcome, UnlockArgs, UnlockCommand};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with statekeep sessions
    pub use crate::{
        Backend, BackendSource, Checksum, ClientError, Fetched, LockInfo, Locker, Payload,
        RemoteState, StateClient, StateError, StateManager,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
