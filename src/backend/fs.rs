//! Local filesystem backend.
//!
//! Writes stage to a `.tmp-*` sibling in the target directory, fsync, then
//! rename into place, so a crash never leaves a half-written file at its
//! final path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::{ensure_active, Backend};
use crate::error::{AppError, Result};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Create `dir` and any missing ancestors with mode 0755.
async fn create_dir_all_0755(dir: &Path) -> Result<()> {
    let mut missing = Vec::new();
    let mut cur = Some(dir);
    while let Some(d) = cur {
        if fs::metadata(d).await.is_ok() {
            break;
        }
        missing.push(d.to_path_buf());
        cur = d.parent();
    }
    for d in missing.iter().rev() {
        match fs::create_dir(d).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(AppError::Storage(format!("mkdir {}: {}", d.display(), e)))
            }
        }
        // chmod after creation; the umask does not apply to chmod
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(d, std::fs::Permissions::from_mode(0o755)).await?;
        }
    }
    Ok(())
}

/// Filesystem-backed repository root.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn abs_path(&self, rel: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in rel.split('/').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path
    }

    fn not_found_or_storage(path: &str, e: std::io::Error) -> AppError {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound(path.to_string())
        } else {
            AppError::Storage(format!("read {}: {}", path, e))
        }
    }

    async fn walk_rpms(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut stack: Vec<(PathBuf, String)> = vec![(self.root.clone(), String::new())];

        while let Some((dir, rel)) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let entry_rel = if rel.is_empty() {
                    name.clone()
                } else {
                    format!("{}/{}", rel, name)
                };
                if entry.file_type().await?.is_dir() {
                    // Metadata directory holds no packages.
                    if entry_rel == "repodata" {
                        continue;
                    }
                    stack.push((entry.path(), entry_rel));
                } else if name.ends_with(".rpm") {
                    out.push(entry_rel);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Backend for FsBackend {
    async fn list_repodata(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        ensure_active(cancel)?;
        let dir = self.abs_path("repodata");
        let mut entries = fs::read_dir(&dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            paths.push(format!(
                "repodata/{}",
                entry.file_name().to_string_lossy()
            ));
        }
        Ok(paths)
    }

    async fn list_rpms(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        ensure_active(cancel)?;
        self.walk_rpms().await
    }

    async fn read(&self, cancel: &CancellationToken, path: &str) -> Result<Bytes> {
        ensure_active(cancel)?;
        let data = fs::read(self.abs_path(path))
            .await
            .map_err(|e| Self::not_found_or_storage(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, cancel: &CancellationToken, path: &str, data: Bytes) -> Result<()> {
        ensure_active(cancel)?;
        let abs = self.abs_path(path);
        let dir = abs
            .parent()
            .ok_or_else(|| AppError::Storage(format!("no parent directory for {}", path)))?;
        create_dir_all_0755(dir).await?;

        let tmp = dir.join(format!(
            ".tmp-rpmkeeper-{}-{}",
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let result: Result<()> = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &abs).await?;
            Ok(())
        }
        .await;
        if result.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        result
    }

    async fn delete(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        ensure_active(cancel)?;
        match fs::remove_file(self.abs_path(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!("delete {}: {}", path, e))),
        }
    }

    async fn exists(&self, cancel: &CancellationToken, path: &str) -> Result<bool> {
        ensure_active(cancel)?;
        match fs::metadata(self.abs_path(path)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Storage(format!("stat {}: {}", path, e))),
        }
    }

    fn repo_root(&self) -> String {
        self.root.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (FsBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        (FsBackend::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn test_write_read_exists_delete() {
        let (b, _dir) = backend();
        let cancel = CancellationToken::new();
        let path = "sub/file.txt";
        let data = Bytes::from_static(b"hello world");

        b.write(&cancel, path, data.clone()).await.unwrap();
        assert_eq!(b.read(&cancel, path).await.unwrap(), data);
        assert!(b.exists(&cancel, path).await.unwrap());

        b.delete(&cancel, path).await.unwrap();
        assert!(!b.exists(&cancel, path).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_leaves_no_temp_files(){
        let (b, dir) = backend();
        let cancel = CancellationToken::new();
        b.write(&cancel, "repodata/repomd.xml", Bytes::from_static(b"<repomd/>"))
            .await
            .unwrap();

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir.path().join("repodata")).unwrap() {
            names.push(entry.unwrap().file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["repomd.xml"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_created_directories_are_0755() {
        use std::os::unix::fs::PermissionsExt;

        let (b, dir) = backend();
        let cancel = CancellationToken::new();
        b.write(&cancel, "pool/sub/pkg.rpm", Bytes::from_static(b"x"))
            .await
            .unwrap();

        for rel in ["pool", "pool/sub"] {
            let mode = std::fs::metadata(dir.path().join(rel))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755, "mode of {}", rel);
        }
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (b, _dir) = backend();
        let cancel = CancellationToken::new();
        let err = b.read(&cancel, "missing.txt").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (b, _dir) = backend();
        let cancel = CancellationToken::new();
        b.delete(&cancel, "missing.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_repodata() {
        let (b, _dir) = backend();
        let cancel = CancellationToken::new();
        b.write(&cancel, "repodata/repomd.xml", Bytes::from_static(b"x"))
            .await
            .unwrap();
        b.write(&cancel, "repodata/abc-primary.xml.gz", Bytes::from_static(b"y"))
            .await
            .unwrap();

        let mut files = b.list_repodata(&cancel).await.unwrap();
        files.sort();
        assert_eq!(
            files,
            vec![
                "repodata/abc-primary.xml.gz".to_string(),
                "repodata/repomd.xml".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_list_rpms_skips_repodata() {
        let (b, _dir) = backend();
        let cancel = CancellationToken::new();
        b.write(&cancel, "foo.rpm", Bytes::from_static(b"1")).await.unwrap();
        b.write(&cancel, "pkgs/bar.rpm", Bytes::from_static(b"2"))
            .await
            .unwrap();
        b.write(&cancel, "notes.txt", Bytes::from_static(b"3"))
            .await
            .unwrap();
        b.write(&cancel, "repodata/baz.rpm", Bytes::from_static(b"4"))
            .await
            .unwrap();

        let mut rpms = b.list_rpms(&cancel).await.unwrap();
        rpms.sort();
        assert_eq!(rpms, vec!["foo.rpm".to_string(), "pkgs/bar.rpm".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let (b, _dir) = backend();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            b.read(&cancel, "x").await.unwrap_err(),
            AppError::Cancelled
        ));
        assert!(matches!(
            b.write(&cancel, "x", Bytes::new()).await.unwrap_err(),
            AppError::Cancelled
        ));
        assert!(matches!(
            b.delete(&cancel, "x").await.unwrap_err(),
            AppError::Cancelled
        ));
        assert!(matches!(
            b.exists(&cancel, "x").await.unwrap_err(),
            AppError::Cancelled
        ));
        assert!(matches!(
            b.list_rpms(&cancel).await.unwrap_err(),
            AppError::Cancelled
        ));
        assert!(matches!(
            b.list_repodata(&cancel).await.unwrap_err(),
            AppError::Cancelled
        ));
    }

    #[tokio::test]
    async fn test_repo_root() {
        let (b, dir) = backend();
        assert_eq!(b.repo_root(), dir.path().display().to_string());
    }
}
