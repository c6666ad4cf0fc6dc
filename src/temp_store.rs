//! Temporary storage for uploaded documents.
//!
//! Uploads are written to `{dir}/temp_{sanitized name}` and handed out as a
//! [`TempArtifact`]. The artifact deletes its file on `release()`, or on drop
//! if the owning request never got that far.

use crate::error::{ExtractError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Reduce a client-supplied name to a bare file name safe to join onto a
/// directory: directories are dropped and spaces replaced.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let base = match base.trim() {
        "" | "." | ".." => "document",
        _ => base,
    };
    base.replace(' ', "_")
}

/// Writes uploads into a working directory.
#[derive(Debug, Clone)]
pub struct TempStore {
    dir: PathBuf,
}

impl TempStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path an upload with this name would be stored under.
    pub fn path_for(&self, original_name: &str) -> PathBuf {
        self.dir
            .join(format!("temp_{}", sanitize_filename(original_name)))
    }

    /// Persist `bytes` and return the owning artifact.
    pub async fn store(&self, bytes: &[u8], original_name: &str) -> Result<TempArtifact> {
        let path = self.path_for(original_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(ExtractError::Upload)?;
        info!("File uploaded and saved as: {}", path.display());
        Ok(TempArtifact {
            path,
            released: false,
        })
    }
}

/// A stored upload. Deleted exactly once, on `release()` or on drop.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    released: bool,
}

impl TempArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. A failure is returned for the caller to log; the
    /// artifact is considered released either way.
    pub async fn release(mut self) -> std::io::Result<()> {
        self.released = true;
        let result = tokio::fs::remove_file(&self.path).await;
        if result.is_ok() {
            info!("Temporary file deleted: {}", self.path.display());
        }
        result
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Temporary file deleted on drop: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Could not delete temporary file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for_sanitizes_spaces() {
        let store = TempStore::new("work");
        assert_eq!(
            store.path_for("Sample Invoice.pdf"),
            PathBuf::from("work/temp_Sample_Invoice.pdf")
        );
    }

    #[test]
    fn test_path_for_strips_directories() {
        let store = TempStore::new("work");
        assert_eq!(
            store.path_for("../../etc/passwd"),
            PathBuf::from("work/temp_passwd")
        );
    }

    #[test]
    fn test_sanitize_keeps_final_component() {
        assert_eq!(sanitize_filename("Sample Invoice.pdf"), "Sample_Invoice.pdf");
        assert_eq!(sanitize_filename("../escaped.pdf"), "escaped.pdf");
        assert_eq!(sanitize_filename("..\\..\\win dows.pdf"), "win_dows.pdf");
        assert_eq!(sanitize_filename("uploads/"), "document");
        assert_eq!(sanitize_filename(".."), "document");
    }

    #[tokio::test]
    async fn test_store_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path());

        let artifact = store.store(b"%PDF-1.4", "Sample Invoice.pdf").await.unwrap();
        let path = artifact.path().to_path_buf();
        assert_eq!(path, dir.path().join("temp_Sample_Invoice.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");

        artifact.release().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path());

        let path = {
            let artifact = store.store(b"data", "a.txt").await.unwrap();
            artifact.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_release_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path());

        let artifact = store.store(b"data", "a.txt").await.unwrap();
        std::fs::remove_file(artifact.path()).unwrap();
        assert!(artifact.release().await.is_err());
    }

    #[tokio::test]
    async fn test_store_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempStore::new(dir.path().join("missing"));

        let err = store.store(b"data", "a.txt").await.unwrap_err();
        assert!(matches!(err, ExtractError::Upload(_)));
    }
}
