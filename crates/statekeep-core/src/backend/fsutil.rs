//! Filesystem helpers shared by the file-backed clients

use crate::error::ClientError;
use crate::lock::LockInfo;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Read a file, mapping "does not exist" to `None`
pub(crate) async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ClientError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ClientError::transport_with(
            format!("failed to read {}", path.display()),
            e,
        )),
    }
}

/// Replace `path` with `data` via a temporary sibling and a rename
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), ClientError> {
    ensure_parent(path).await?;
    let tmp = temp_sibling(path);

    let result = async {
        write_synced(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        sync_parent(path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ClientError::transport_with(
            format!("failed to write {}", path.display()),
            e,
        ));
    }
    Ok(())
}

async fn ensure_parent(path: &Path) -> Result<(), ClientError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    sibling(path, &format!(".tmp-{}", uuid::Uuid::new_v4().simple()))
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

/// Flush the directory entry of `path` so a rename or link survives a crash
#[cfg(unix)]
async fn sync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => tokio::fs::File::open(parent).await?.sync_all().await,
        None => Ok(()),
    }
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Remove a file; a missing file is not an error
pub(crate) async fn remove_optional(path: &Path) -> Result<(), ClientError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ClientError::transport_with(
            format!("failed to remove {}", path.display()),
            e,
        )),
    }
}

/// `path` with `suffix` appended to its file name
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Lock held as an exclusively-created file containing [`LockInfo`] JSON
#[derive(Debug, Clone)]
pub(crate) struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Create the lock file, failing if it exists.
    ///
    /// The JSON is written to a temporary sibling and hard-linked into
    /// place, so the lock file never exists without its full content.
    pub(crate) async fn acquire(&self, info: &LockInfo, state_path: &Path) -> Result<String, ClientError> {
        let info = info.clone().with_path(state_path.display().to_string());
        let json = info
            .to_json()
            .map_err(|e| ClientError::transport_with("failed to encode lock info", e))?;

        ensure_parent(&self.path).await?;
        let tmp = temp_sibling(&self.path);

        let linked = async {
            write_synced(&tmp, &json).await?;
            tokio::fs::hard_link(&tmp, &self.path).await
        }
        .await;
        let _ = tokio::fs::remove_file(&tmp).await;

        match linked {
            Ok(()) => {
                if let Err(e) = sync_parent(&self.path).await {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to sync lock directory");
                }
                tracing::debug!(path = %self.path.display(), lock_id = %info.id, "created lock file");
                Ok(info.id)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.read_holder().await? {
                Held::By(holder) => Err(ClientError::lock_held(holder)),
                Held::Unreadable(e) => Err(ClientError::transport(format!(
                    "lock file {} is unreadable ({e}); if no process holds it, \
                     remove it with force-unlock and any lock id",
                    self.path.display()
                ))),
                Held::Free => Err(ClientError::transport(format!(
                    "lock file {} was released while acquiring; try again",
                    self.path.display()
                ))),
            },
            Err(e) => Err(ClientError::transport_with(
                format!("failed to create lock file {}", self.path.display()),
                e,
            )),
        }
    }

    /// Remove the lock file if `id` matches its holder.
    ///
    /// A lock file that cannot be decoded names no holder to match
    /// against, so it is removed whatever `id` is given.
    pub(crate) async fn release(&self, id: &str) -> Result<(), ClientError> {
        match self.read_holder().await? {
            Held::By(holder) if holder.id == id => {
                remove_optional(&self.path).await?;
                tracing::debug!(path = %self.path.display(), lock_id = %id, "removed lock file");
                Ok(())
            }
            Held::By(holder) => Err(ClientError::lock_mismatch(id, Some(holder))),
            Held::Unreadable(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "removing unreadable lock file");
                remove_optional(&self.path).await
            }
            Held::Free => Err(ClientError::lock_mismatch(id, None)),
        }
    }

    /// Current holder, if the lock file exists
    pub(crate) async fn holder(&self) -> Result<Option<LockInfo>, ClientError> {
        match self.read_holder().await? {
            Held::By(holder) => Ok(Some(holder)),
            Held::Free => Ok(None),
            Held::Unreadable(e) => Err(ClientError::transport_with(
                format!(
                    "lock file {} is unreadable; remove it with force-unlock once no process holds it",
                    self.path.display()
                ),
                e,
            )),
        }
    }

    async fn read_holder(&self) -> Result<Held, ClientError> {
        let Some(data) = read_optional(&self.path).await? else {
            return Ok(Held::Free);
        };
        Ok(match LockInfo::from_json(&data) {
            Ok(holder) => Held::By(holder),
            Err(e) => Held::Unreadable(e),
        })
    }
}

enum Held {
    Free,
    By(LockInfo),
    Unreadable(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_file_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let lock = LockFile::new(dir.path().join("s.lock"));
        let state = dir.path().join("s");

        let id = lock.acquire(&LockInfo::new("apply"), &state).await.unwrap();
        let err = lock.acquire(&LockInfo::new("plan"), &state).await.unwrap_err();
        match err {
            ClientError::LockHeld { holder } => {
                assert_eq!(holder.id, id);
                assert_eq!(holder.path, state.display().to_string());
            }
            other => panic!("expected LockHeld, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn release_requires_matching_id() {
        let dir = tempfile::tempdir().unwrap();
        let lock = LockFile::new(dir.path().join("s.lock"));

        let id = lock.acquire(&LockInfo::new("apply"), dir.path()).await.unwrap();
        assert!(matches!(
            lock.release("wrong").await,
            Err(ClientError::LockMismatch { holder: Some(_), .. })
        ));
        assert!(lock.holder().await.unwrap().is_some());

        lock.release(&id).await.unwrap();
        assert!(lock.holder().await.unwrap().is_none());
        assert!(matches!(
            lock.release(&id).await,
            Err(ClientError::LockMismatch { holder: None, .. })
        ));
    }

    #[tokio::test]
    async fn empty_lock_file_is_released_by_any_id() {
        let dir = tempfile::tempdir().unwrap();
        let lock = LockFile::new(dir.path().join("s.lock"));
        std::fs::write(lock.path(), b"").unwrap();

        match lock.acquire(&LockInfo::new("apply"), dir.path()).await {
            Err(ClientError::Transport { message, .. }) => {
                assert!(message.contains("force-unlock"), "{message}");
            }
            other => panic!("expected Transport, got {other:?}"),
        }
        assert!(lock.path().exists());

        lock.release("anything").await.unwrap();
        assert!(!lock.path().exists());

        let id = lock.acquire(&LockInfo::new("apply"), dir.path()).await.unwrap();
        assert_eq!(lock.holder().await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn acquire_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let lock = LockFile::new(dir.path().join("s.lock"));

        lock.acquire(&LockInfo::new("apply"), dir.path()).await.unwrap();
        let _ = lock.acquire(&LockInfo::new("plan"), dir.path()).await.unwrap_err();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("s.lock")]);
    }

    #[tokio::test]
    async fn write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state");

        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();
        assert_eq!(read_optional(&path).await.unwrap().as_deref(), Some(&b"two"[..]));

        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);

        remove_optional(&path).await.unwrap();
        remove_optional(&path).await.unwrap();
        assert!(read_optional(&path).await.unwrap().is_none());
    }

    #[test]
    fn sibling_appends_to_file_name() {
        let p = sibling(Path::new("/a/b/state"), ".lock");
        assert_eq!(p, PathBuf::from("/a/b/state.lock"));
    }
}
