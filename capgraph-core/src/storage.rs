//! Document storage with optimistic version checks
//!
//! Every read captures a content hash. Writers that pass the hash back get a
//! compare-and-write: the file is locked, re-read, and only overwritten when
//! nobody changed it in between. Locks are advisory, so an external editor
//! is only caught by the hash comparison.

use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(50);

/// SHA-256 of a document's content at read time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentVersion([u8; 32]);

impl DocumentVersion {
    pub fn of(content: &str) -> Self {
        let digest = Sha256::digest(content.as_bytes());
        Self(digest.into())
    }

    /// Short hex form for logs
    pub fn short(&self) -> String {
        self.0[..4].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// A document as read from disk
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub content: String,
    pub version: DocumentVersion,
}

impl Document {
    pub fn read(path: &Path) -> StoreResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let version = DocumentVersion::of(&content);
        Ok(Self {
            path: path.to_path_buf(),
            content,
            version,
        })
    }
}

/// Takes an exclusive advisory lock, retrying until `LOCK_TIMEOUT`
fn acquire_write_lock(file: &File, path: &Path) -> StoreResult<()> {
    let start = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if start.elapsed() > LOCK_TIMEOUT {
                    return Err(StoreError::LockTimeout {
                        path: path.to_path_buf(),
                    });
                }
                std::thread::sleep(LOCK_RETRY);
            }
            Err(e) => return Err(StoreError::io(path, e)),
        }
    }
}

/// Overwrites `path` with `content` if its current content still hashes to
/// `expected`. With `expected == None` the write is unconditional
/// (last writer wins). Returns the version of the written content.
pub fn write_if_unchanged(
    path: &Path,
    expected: Option<&DocumentVersion>,
    content: &str,
) -> StoreResult<DocumentVersion> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;

    acquire_write_lock(&file, path)?;

    if let Some(expected) = expected {
        let mut current = String::new();
        file.read_to_string(&mut current)
            .map_err(|e| StoreError::io(path, e))?;
        let actual = DocumentVersion::of(&current);
        if &actual != expected {
            debug!(
                path = %path.display(),
                expected = %expected.short(),
                actual = %actual.short(),
                "Refusing stale write"
            );
            return Err(StoreError::Conflict {
                path: path.to_path_buf(),
            });
        }
    }

    file.set_len(0).map_err(|e| StoreError::io(path, e))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| StoreError::io(path, e))?;
    file.flush().map_err(|e| StoreError::io(path, e))?;

    // Lock is released when `file` is dropped
    Ok(DocumentVersion::of(content))
}

/// Creates a new document, failing if the path is already taken
pub fn create_document(path: &Path, content: &str) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    file.write_all(content.as_bytes())
        .map_err(|e| StoreError::io(path, e))
}

pub fn delete_document(path: &Path) -> StoreResult<()> {
    fs::remove_file(path).map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_captures_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("1-capability.md");
        fs::write(&path, "hello").unwrap();

        let doc = Document::read(&path).unwrap();
        assert_eq!(doc.content, "hello");
        assert_eq!(doc.version, DocumentVersion::of("hello"));
    }

    #[test]
    fn test_write_with_matching_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.md");
        fs::write(&path, "a much longer original body").unwrap();

        let doc = Document::read(&path).unwrap();
        let new_version = write_if_unchanged(&path, Some(&doc.version), "short").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "short");
        assert_eq!(new_version, DocumentVersion::of("short"));
    }

    #[test]
    fn test_stale_write_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.md");
        fs::write(&path, "v1").unwrap();

        let doc = Document::read(&path).unwrap();
        fs::write(&path, "edited externally").unwrap();

        let result = write_if_unchanged(&path, Some(&doc.version), "v2");
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "edited externally");
    }

    #[test]
    fn test_unversioned_write_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/doc.md");

        write_if_unchanged(&path, None, "first").unwrap();
        write_if_unchanged(&path, None, "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_create_document_refuses_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("doc.md");
        create_document(&path, "x").unwrap();

        let err = create_document(&path, "y").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(fs::read_to_string(&path).unwrap(), "x");
    }
}
