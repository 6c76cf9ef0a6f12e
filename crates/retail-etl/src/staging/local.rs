//! Staging area on the local filesystem

use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StagingArea, StagingError};
use crate::error::{EtlError, EtlResult};
use crate::schema::FileId;

/// A directory of `<id>.csv` files
#[derive(Debug, Clone)]
pub struct LocalStaging {
    root: PathBuf,
}

impl LocalStaging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: &FileId) -> PathBuf {
        self.root.join(id.file_name())
    }
}

#[async_trait]
impl StagingArea for LocalStaging {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn list_ids(&self) -> EtlResult<Vec<FileId>> {
        let context = || format!("listing {}", self.root.display());

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| EtlError::storage(context(), e))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EtlError::storage(context(), e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| EtlError::storage(context(), e))?;
            if !file_type.is_file() {
                continue;
            }

            let name = entry.file_name();
            match name.to_str().and_then(FileId::from_file_name) {
                Some(id) => ids.push(id),
                None => debug!(entry = ?name, root = %self.root.display(), "Ignoring non-CSV entry"),
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn read(&self, id: &FileId) -> Result<Vec<u8>, StagingError> {
        tokio::fs::read(self.path_for(id)).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StagingError::NotFound(id.clone()),
            _ => StagingError::Unavailable(format!("{}: {}", self.path_for(id).display(), e)),
        })
    }

    async fn write(&self, id: &FileId, content: Vec<u8>) -> EtlResult<()> {
        let bytes = content.len();
        write_atomic(&self.path_for(id), content)
            .await
            .map_err(|e| EtlError::storage(format!("writing {}", self.path_for(id).display()), e))?;

        debug!(file = %id, bytes, root = %self.root.display(), "Staged file");
        Ok(())
    }
}

/// Write `content` to a uniquely named hidden sibling of `path`, then rename it over `path`.
///
/// Concurrent writers of the same target each get their own temp file; the last rename wins.
pub(crate) async fn write_atomic(path: &Path, content: Vec<u8>) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = match path.file_name() {
        Some(name) => format!(".{}.", name.to_string_lossy()),
        None => ".".to_string(),
    };
    let target = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        std::fs::create_dir_all(&dir)?;
        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        temp.write_all(&content)?;
        temp.as_file().sync_all()?;
        temp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn id(name: &str) -> FileId {
        name.parse().unwrap()
    }

    #[tokio::test]
    async fn test_list_only_csv_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orders_feb.csv"), "x").unwrap();
        std::fs::write(dir.path().join("orders_jan.csv"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".orders_mar.csv.tmp"), "x").unwrap();
        std::fs::create_dir(dir.path().join("archive.csv")).unwrap();

        let staging = LocalStaging::new(dir.path());
        let ids = staging.list_ids().await.unwrap();
        assert_eq!(ids, vec![id("orders_feb"), id("orders_jan")]);
    }

    #[tokio::test]
    async fn test_missing_root_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let staging = LocalStaging::new(dir.path().join("nope"));
        let err = staging.list_ids().await.unwrap_err();
        assert!(matches!(err, EtlError::StorageUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_write_creates_root_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let staging = LocalStaging::new(dir.path().join("cleaned"));

        staging.write(&id("orders_jan"), b"first".to_vec()).await.unwrap();
        staging.write(&id("orders_jan"), b"second".to_vec()).await.unwrap();

        assert_eq!(staging.read(&id("orders_jan")).await.unwrap(), b"second");
        assert_eq!(staging.list_ids().await.unwrap(), vec![id("orders_jan")]);
        assert_eq!(std::fs::read_dir(staging.root()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let staging = LocalStaging::new(dir.path());
        let err = staging.read(&id("orders_jan")).await.unwrap_err();
        assert_eq!(err, StagingError::NotFound(id("orders_jan")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writes_of_one_id_both_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let staging = LocalStaging::new(dir.path());
        let first = vec![b'a'; 4 * 1024 * 1024];
        let second = vec![b'b'; 4 * 1024 * 1024];

        for _ in 0..10 {
            let id_a = id("orders_jan");
            let id_b = id("orders_jan");
            let (a, b) = tokio::join!(
                staging.write(&id_a, first.clone()),
                staging.write(&id_b, second.clone()),
            );
            a.unwrap();
            b.unwrap();

            let content = staging.read(&id("orders_jan")).await.unwrap();
            assert!(content == first || content == second);
        }

        // No temp files left behind
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("orders_jan.csv")]);
    }
}
