//! Storage backends.
//!
//! A [`Backend`] addresses one repository root; paths are always
//! repo-root-relative and slash-separated (e.g. `repodata/repomd.xml`).

pub mod fs;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

/// Storage backend for a single repository root.
#[async_trait]
pub trait Backend: Send + Sync {
    /// All entries directly under `repodata/`.
    async fn list_repodata(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// All `.rpm` paths in the repository, excluding `repodata/`.
    async fn list_rpms(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Read a file's full contents.
    async fn read(&self, cancel: &CancellationToken, path: &str) -> Result<Bytes>;

    /// Persist a file; all-or-nothing per file.
    async fn write(&self, cancel: &CancellationToken, path: &str, data: Bytes) -> Result<()>;

    /// Remove a file. A missing file is not an error.
    async fn delete(&self, cancel: &CancellationToken, path: &str) -> Result<()>;

    async fn exists(&self, cancel: &CancellationToken, path: &str) -> Result<bool>;

    /// Fail with a conflict if the manifest's identity has changed since it
    /// was last read through this backend instance. Backends without a
    /// version token report success.
    async fn check_manifest_unchanged(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)
    }

    /// Human-readable repository root (path or URI), for messages.
    fn repo_root(&self) -> String;
}

/// Return the cancellation error if the token has already tripped.
/// Every backend operation calls this before touching storage.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    Ok(())
}
