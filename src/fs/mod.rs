//! Filesystem access as a trait object (`SPEC_FULL.md` §4, ambient
//! contracts): lets the symbol index and LSP provider read file content
//! and metadata without depending on `tokio::fs` directly, matching the
//! teacher's pattern of putting collaborators behind traits so tests can
//! substitute deterministic fakes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::LsmcpError;

#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub modified: SystemTime,
    pub len: u64,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read_file(&self, path: &Path) -> Result<String, LsmcpError>;
    async fn exists(&self, path: &Path) -> bool;
    async fn stat(&self, path: &Path) -> Result<FileStat, LsmcpError>;
}

/// The real filesystem, backed by `tokio::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFileSystem;

#[async_trait]
impl FileSystem for RealFileSystem {
    async fn read_file(&self, path: &Path) -> Result<String, LsmcpError> {
        tokio::fs::read_to_string(path).await.map_err(LsmcpError::Io)
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn stat(&self, path: &Path) -> Result<FileStat, LsmcpError> {
        let metadata = tokio::fs::metadata(path).await.map_err(LsmcpError::Io)?;
        let modified = metadata.modified().map_err(LsmcpError::Io)?;
        Ok(FileStat { modified, len: metadata.len() })
    }
}

/// An in-memory filesystem double for tests: no real I/O, deterministic
/// `modified` timestamps supplied by the caller.
#[derive(Default)]
pub struct InMemoryFileSystem {
    files: Mutex<HashMap<PathBuf, (String, FileStat)>>,
}

impl InMemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<String>, modified: SystemTime) {
        let content = content.into();
        let len = content.len() as u64;
        self.files.lock().insert(path.into(), (content, FileStat { modified, len }));
    }

    pub fn remove(&self, path: &Path) {
        self.files.lock().remove(path);
    }
}

#[async_trait]
impl FileSystem for InMemoryFileSystem {
    async fn read_file(&self, path: &Path) -> Result<String, LsmcpError> {
        self.files
            .lock()
            .get(path)
            .map(|(content, _)| content.clone())
            .ok_or_else(|| LsmcpError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file")))
    }

    async fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    async fn stat(&self, path: &Path) -> Result<FileStat, LsmcpError> {
        self.files
            .lock()
            .get(path)
            .map(|(_, stat)| *stat)
            .ok_or_else(|| LsmcpError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_filesystem_round_trips_content() {
        let fs = InMemoryFileSystem::new();
        fs.insert("/a.ts", "const x = 1;", SystemTime::UNIX_EPOCH);
        assert!(fs.exists(Path::new("/a.ts")).await);
        assert_eq!(fs.read_file(Path::new("/a.ts")).await.unwrap(), "const x = 1;");
        let stat = fs.stat(Path::new("/a.ts")).await.unwrap();
        assert_eq!(stat.len, 12);
    }

    #[tokio::test]
    async fn in_memory_filesystem_reports_missing_files() {
        let fs = InMemoryFileSystem::new();
        assert!(!fs.exists(Path::new("/missing.ts")).await);
        assert!(fs.read_file(Path::new("/missing.ts")).await.is_err());
    }
}
