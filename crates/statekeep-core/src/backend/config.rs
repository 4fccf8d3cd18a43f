//! Backend configuration (`statekeep.toml`)

use super::directory::DirectoryBackend;
use super::local::LocalBackend;
use super::{validate_workspace, Backend, BackendSource, DEFAULT_WORKSPACE};
use crate::error::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Configuration file name looked up in the working directory
pub const CONFIG_FILE: &str = "statekeep.toml";

/// Environment variable selecting the workspace
pub const WORKSPACE_ENV: &str = "STATEKEEP_WORKSPACE";

/// Which backend to use and how to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// State files on this machine
    Local {
        /// State file for the default workspace
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Shared directory treated as a remote store
    Directory {
        /// Directory holding the workspaces
        path: PathBuf,
        /// Whether locking is enabled
        #[serde(default = "default_lock")]
        lock: bool,
    },
}

fn default_lock() -> bool {
    true
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Local { path: None }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Workspace to operate on
    #[serde(default)]
    pub workspace: Option<String>,
    /// Backend selection
    #[serde(default)]
    pub backend: BackendConfig,
    /// Directory relative paths resolve against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    /// Create default configuration (local backend, current directory)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With backend
    #[inline]
    #[must_use]
    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// With workspace
    #[inline]
    #[must_use]
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// With base directory
    #[inline]
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Parse configuration text
    ///
    /// # Errors
    /// Returns `BackendError::InvalidConfig` if the TOML is malformed.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, BackendError> {
        toml::from_str(text).map_err(|source| BackendError::InvalidConfig {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load configuration from `path`; relative paths resolve against its directory
    ///
    /// # Errors
    /// Returns `BackendError` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).map_err(|e| BackendError::io_error(path, e))?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self::from_toml_str(&text, path)?.with_base_dir(base))
    }

    /// Load `statekeep.toml` from `dir`, or default to the local backend there
    ///
    /// # Errors
    /// Returns `BackendError` if the file exists but cannot be read or parsed.
    pub fn discover(dir: impl AsRef<Path>) -> Result<Self, BackendError> {
        let dir = dir.as_ref();
        let path = dir.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Self::from_toml_str(&text, &path)?.with_base_dir(dir)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "no config file, using local backend");
                Ok(Self::new().with_base_dir(dir))
            }
            Err(e) => Err(BackendError::io_error(path, e)),
        }
    }

    /// Selected workspace: environment, then config, then `default`
    ///
    /// # Errors
    /// Returns `BackendError::InvalidWorkspace` for unusable names.
    pub fn workspace(&self) -> Result<String, BackendError> {
        let name = std::env::var(WORKSPACE_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.workspace.clone())
            .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string());
        validate_workspace(&name)?;
        Ok(name)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Construct the configured backend
    #[must_use]
    pub fn build_backend(&self) -> Box<dyn Backend> {
        match &self.backend {
            BackendConfig::Local { path: None } => Box::new(LocalBackend::in_dir(&self.base_dir)),
            BackendConfig::Local { path: Some(path) } => {
                Box::new(LocalBackend::with_state_path(self.resolve(path)))
            }
            BackendConfig::Directory { path, lock } => {
                Box::new(DirectoryBackend::new(self.resolve(path)).with_locking(*lock))
            }
        }
    }
}

#[async_trait]
impl BackendSource for Config {
    async fn load(&self) -> Result<Box<dyn Backend>, BackendError> {
        let backend = self.build_backend();
        tracing::debug!(backend = backend.name(), "loaded backend");
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn directory_config_parses_with_default_lock() {
        let config = Config::from_toml_str(
            "workspace = \"prod\"\n[backend]\ntype = \"directory\"\npath = \"/mnt/state\"\n",
            Path::new("statekeep.toml"),
        )
        .unwrap();
        assert_eq!(config.workspace.as_deref(), Some("prod"));
        assert_eq!(
            config.backend,
            BackendConfig::Directory {
                path: PathBuf::from("/mnt/state"),
                lock: true,
            }
        );
    }

    #[test]
    fn empty_config_is_local() {
        let config = Config::from_toml_str("", Path::new("statekeep.toml")).unwrap();
        assert_eq!(config.backend, BackendConfig::Local { path: None });
    }

    #[test]
    fn unknown_backend_type_is_rejected() {
        let err = Config::from_toml_str("[backend]\ntype = \"s3\"\n", Path::new("x.toml"))
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidConfig { .. }));
    }

    #[test]
    fn discover_without_file_defaults_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.base_dir, dir.path());
        assert_eq!(config.build_backend().name(), "local");
    }

    #[tokio::test]
    async fn relative_directory_path_resolves_against_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("shared")).unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[backend]\ntype = \"directory\"\npath = \"shared\"\nlock = false\n",
        )
        .unwrap();

        let config = Config::from_file(dir.path().join(CONFIG_FILE)).unwrap();
        let backend = config.load().await.unwrap();
        assert_eq!(backend.name(), "directory");
        let mgr = backend.state_mgr(DEFAULT_WORKSPACE).await.unwrap();
        assert!(!mgr.locker().unwrap().is_locking_enabled());
    }
}
