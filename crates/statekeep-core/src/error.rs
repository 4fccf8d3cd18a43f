//! Error types for statekeep
//!
//! Errors are layered the way the data flows:
//! - [`ClientError`]: the backend boundary (transport, locks, payload integrity)
//! - [`StateError`]: a state session (conflicts, ordering, cancellation)
//! - [`BackendError`]: backend configuration and workspace resolution
//! - [`UnlockError`]: the force-unlock recovery workflow
//!
//! Nothing in this crate retries; every error is surfaced to the operator.

use crate::checksum::Checksum;
use crate::lock::LockInfo;
use std::path::PathBuf;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by backend clients
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network, auth, or storage failure
    #[error("{message}")]
    Transport {
        /// Human-readable description
        message: String,
        /// Underlying cause, if any
        #[source]
        source: Option<BoxError>,
    },

    /// Another holder's lock is active
    #[error("state is locked by another process\n{holder}")]
    LockHeld {
        /// The conflicting holder
        holder: Box<LockInfo>,
    },

    /// Unlock id does not match the current holder
    #[error("lock id {requested:?} does not match existing lock{}", describe_holder(.holder.as_deref()))]
    LockMismatch {
        /// Id supplied by the caller
        requested: String,
        /// Current holder, if one exists
        holder: Option<Box<LockInfo>>,
    },

    /// Locking is unsupported or disabled for this backend
    #[error("locking is not supported by this backend")]
    NotLockable,

    /// Stored checksum does not match the stored bytes
    #[error("payload checksum mismatch: stored {stored}, computed {computed}")]
    CorruptPayload {
        /// Checksum reported alongside the data
        stored: Checksum,
        /// Checksum recomputed from the data
        computed: Checksum,
    },

    /// The client's own version check rejected a write
    #[error("precondition failed: {0}")]
    Precondition(String),
}

impl ClientError {
    /// Create a transport error without a source
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error wrapping a cause
    #[inline]
    pub fn transport_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a lock-held error
    #[inline]
    #[must_use]
    pub fn lock_held(holder: LockInfo) -> Self {
        Self::LockHeld {
            holder: Box::new(holder),
        }
    }

    /// Create a lock mismatch error
    #[inline]
    pub fn lock_mismatch(requested: impl Into<String>, holder: Option<LockInfo>) -> Self {
        Self::LockMismatch {
            requested: requested.into(),
            holder: holder.map(Box::new),
        }
    }

    /// Check if error is a transport failure the operator may retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::transport_with(err.to_string(), err)
    }
}

fn describe_holder(holder: Option<&LockInfo>) -> String {
    match holder {
        Some(info) => format!("\n{info}"),
        None => " (no lock is held)".to_string(),
    }
}

/// Errors returned by a state session
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Backend client failed
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Remote payload changed since the last refresh
    #[error(
        "state changed since last refresh: expected checksum {}, backend reports {}",
        describe_checksum(.expected.as_ref()),
        describe_checksum(.actual.as_ref())
    )]
    Conflict {
        /// Checksum of the snapshot this session last read
        expected: Option<Checksum>,
        /// Checksum the backend reports now
        actual: Option<Checksum>,
    },

    /// Persist or delete attempted before any refresh
    #[error("state must be refreshed before it can be {0}")]
    NotRefreshed(&'static str),

    /// Operation cancelled before it reached the backend
    #[error("{0} cancelled")]
    Cancelled(&'static str),

    /// Operation cancelled while the backend call was in flight
    #[error("{0} interrupted; backend state is unknown, refresh before retrying")]
    OutcomeUnknown(&'static str),
}

impl StateError {
    /// Check if error is a checksum conflict
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if the operator may simply retry the whole command
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Client(err) => err.is_retryable(),
            Self::Cancelled(_) => true,
            _ => false,
        }
    }
}

fn describe_checksum(sum: Option<&Checksum>) -> String {
    sum.map_or_else(|| "<none>".to_string(), ToString::to_string)
}

/// Errors resolving backends and workspaces
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Configuration file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is malformed
    #[error("invalid backend configuration in {path}: {source}")]
    InvalidConfig {
        /// File that failed
        path: PathBuf,
        /// Parse error
        #[source]
        source: toml::de::Error,
    },

    /// Workspace name is not usable
    #[error("invalid workspace name: {0:?}")]
    InvalidWorkspace(String),

    /// Workspace does not exist
    #[error("workspace {0:?} does not exist")]
    WorkspaceNotFound(String),

    /// Workspace may not be removed
    #[error("workspace {0:?} cannot be deleted")]
    ProtectedWorkspace(String),

    /// Backend client failed while opening state
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl BackendError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from interactive input
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// Input stream failed
    #[error("input error: {0}")]
    Io(#[from] std::io::Error),

    /// Input stream closed before a line was read
    #[error("input closed")]
    Closed,

    /// Input is not available (non-interactive session)
    #[error("input is disabled")]
    Disabled,
}

/// Errors from the force-unlock workflow
#[derive(Debug, thiserror::Error)]
pub enum UnlockError {
    /// Wrong number of positional arguments
    #[error("Expected a single argument: LOCK_ID")]
    Usage,

    /// Backend could not be loaded
    #[error("Failed to load backend: {0}")]
    Backend(#[source] BackendError),

    /// State manager could not be opened
    #[error("Failed to load state: {0}")]
    StateManager(#[source] BackendError),

    /// Purely local state refuses force-unlock
    #[error("Local state cannot be unlocked by another process")]
    LocalState,

    /// Backend has no lock capability, or it is disabled
    #[error("Locking is disabled for this backend")]
    NotLockable,

    /// Confirmation prompt failed
    #[error("Error asking for confirmation: {0}")]
    Input(#[source] InputError),

    /// Operator declined the confirmation
    #[error("force-unlock cancelled.")]
    UserCancelled,

    /// Backend rejected or failed the unlock
    #[error("Failed to unlock state: {0}")]
    Unlock(#[source] ClientError),

    /// Unlock abandoned on cancellation
    #[error("Failed to unlock state: operation cancelled")]
    Interrupted,
}

impl UnlockError {
    /// Whether the operator should see the command help after this error
    #[inline]
    #[must_use]
    pub fn wants_help(&self) -> bool {
        matches!(self, Self::Usage)
    }

    /// Whether this is a plain cancellation rather than a failure
    #[inline]
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::UserCancelled)
    }
}
