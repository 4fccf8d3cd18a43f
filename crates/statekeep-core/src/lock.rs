//! Lock metadata
//!
//! [`LockInfo`] describes who holds (or wants) a backend lock. It is only ever
//! used for display; the backend alone decides whether a lock is held.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Metadata attached to a lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LockInfo {
    /// Opaque lock identifier
    #[serde(rename = "ID")]
    pub id: String,
    /// Operation that requested the lock (e.g. "apply")
    pub operation: String,
    /// Free-form operator note
    #[serde(default)]
    pub info: String,
    /// `user@host` of the lock holder
    pub who: String,
    /// Version of the tool that took the lock
    pub version: String,
    /// When the lock was requested
    pub created: DateTime<Utc>,
    /// Backend-specific location of the locked state
    #[serde(default)]
    pub path: String,
}

impl LockInfo {
    /// Create lock info for an operation with a fresh random id
    #[must_use]
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.into(),
            info: String::new(),
            who: default_who(),
            version: crate::VERSION.to_string(),
            created: Utc::now(),
            path: String::new(),
        }
    }

    /// With operator note
    #[inline]
    #[must_use]
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    /// With explicit holder description
    #[inline]
    #[must_use]
    pub fn with_who(mut self, who: impl Into<String>) -> Self {
        self.who = who.into();
        self
    }

    /// With state path, usually filled in by the backend
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Encode as pretty JSON
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Decode from JSON
    ///
    /// # Errors
    /// Returns error if the bytes are not a lock info document
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl Display for LockInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Lock Info:")?;
        writeln!(f, "  ID:        {}", self.id)?;
        writeln!(f, "  Path:      {}", self.path)?;
        writeln!(f, "  Operation: {}", self.operation)?;
        writeln!(f, "  Who:       {}", self.who)?;
        writeln!(f, "  Version:   {}", self.version)?;
        writeln!(f, "  Created:   {}", self.created)?;
        write!(f, "  Info:      {}", self.info)
    }
}

fn default_who() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{user}@{host}")
}
