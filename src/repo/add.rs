//! Add RPMs to the repository.

use std::collections::HashMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use chrono::Utc;
use tokio::fs;

use super::Repository;
use crate::error::{AppError, Result};
use crate::inspector::inspect_rpm;

impl Repository {
    /// Add local RPM files to the repository and rewrite the metadata.
    ///
    /// Duplicate NEVRAs are an error unless `replace_existing` is set, in
    /// which case the existing descriptor is overwritten. With `dry_run`
    /// nothing is written. Returns accumulated warnings.
    pub async fn add(
        &self,
        rpm_paths: &[impl AsRef<Path>],
        replace_existing: bool,
        dry_run: bool,
    ) -> Result<Vec<String>> {
        if rpm_paths.is_empty() {
            return Err(AppError::InvalidInput("no RPM paths provided".to_string()));
        }

        let (md, mut pkgs, alg) = self.load_packages().await?;

        let mut index: HashMap<String, usize> = HashMap::with_capacity(pkgs.len());
        for (i, p) in pkgs.iter().enumerate() {
            index.insert(p.nevra(), i);
        }
        if index.len() != pkgs.len() {
            return Err(AppError::Duplicate(
                "metadata contains duplicate NEVRA entries".to_string(),
            ));
        }

        let now = Utc::now().timestamp();

        for path in rpm_paths {
            let path = path.as_ref();
            let meta = fs::metadata(path).await.map_err(|e| {
                AppError::InvalidInput(format!("stat {}: {}", path.display(), e))
            })?;
            let file_time = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            let mut data = Bytes::from(fs::read(path).await.map_err(|e| {
                AppError::InvalidInput(format!("read {}: {}", path.display(), e))
            })?);

            let base = path
                .file_name()
                .ok_or_else(|| {
                    AppError::InvalidInput(format!("no file name in {}", path.display()))
                })?
                .to_string_lossy()
                .into_owned();
            let dest_rel = if self.dest_prefix.is_empty() {
                base
            } else {
                format!("{}/{}", self.dest_prefix.trim_matches('/'), base)
            };

            if self.sign_rpms && !dry_run {
                data = self
                    .resign_rpm(data, self.gpg_key.as_deref())
                    .await
                    .map_err(|e| match e {
                        AppError::Cancelled => AppError::Cancelled,
                        other => {
                            AppError::Signing(format!("sign rpm {}: {}", path.display(), other))
                        }
                    })?;
            }

            let pkg = inspect_rpm(&data, file_time, meta.len(), alg, &dest_rel)
                .map_err(|e| AppError::Parse(format!("rpm {}: {}", path.display(), e)))?;

            let key = pkg.nevra();
            match index.get(&key) {
                Some(&i) => {
                    if !replace_existing {
                        return Err(AppError::Duplicate(format!(
                            "package {} already exists (use --replace-existing)",
                            key
                        )));
                    }
                    pkgs[i] = pkg;
                }
                None => {
                    index.insert(key, pkgs.len());
                    pkgs.push(pkg);
                }
            }

            if !dry_run {
                tracing::debug!(path = %dest_rel, "writing rpm");
                self.backend.write(&self.cancel, &dest_rel, data).await?;
            }
        }

        if dry_run {
            return Ok(Vec::new());
        }
        self.write_metadata(&md, &pkgs, alg, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{compute_checksum, ChecksumAlgorithm};
    use crate::metadata::core::REPOMD_PATH;
    use crate::testutil::{rpm, seed_repo, MemBackend};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn repo(backend: Arc<MemBackend>) -> Repository {
        Repository::new(backend, CancellationToken::new())
    }

    fn write_local_rpm(dir: &TempDir, file_name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(file_name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_add_requires_paths() {
        let backend = Arc::new(MemBackend::new());
        let err = repo(backend)
            .add(&Vec::<&Path>::new(), false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_add_package_and_rewrite() {
        let backend = Arc::new(MemBackend::new());
        seed_repo(&backend, &[], ChecksumAlgorithm::Sha256, &[]);

        let dir = TempDir::new().unwrap();
        let rpm_bytes = rpm::minimal_rpm("foo", "1.0", "1", "x86_64");
        let path = write_local_rpm(&dir, "foo-1.0-1.x86_64.rpm", &rpm_bytes);

        let r = repo(backend.clone());
        let warnings = r.add(&[&path], false, false).await.unwrap();
        assert!(warnings.is_empty());

        assert!(backend.contains("foo-1.0-1.x86_64.rpm"));
        let (_, pkgs, _) = r.load_packages().await.unwrap();
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].nevra(), "foo-1.0-1.x86_64");
        assert_eq!(pkgs[0].location, "foo-1.0-1.x86_64.rpm");
        assert_eq!(
            pkgs[0].pkgid,
            compute_checksum(&rpm_bytes, ChecksumAlgorithm::Sha256)
        );
    }

    #[tokio::test]
    async fn test_add_respects_dest_prefix() {
        let backend = Arc::new(MemBackend::new());
        seed_repo(&backend, &[], ChecksumAlgorithm::Sha256, &[]);

        let dir = TempDir::new().unwrap();
        let path = write_local_rpm(
            &dir,
            "foo-1.0-1.x86_64.rpm",
            &rpm::minimal_rpm("foo", "1.0", "1", "x86_64"),
        );

        let mut r = repo(backend.clone());
        r.dest_prefix = "pool".to_string();
        r.add(&[&path], false, false).await.unwrap();

        assert!(backend.contains("pool/foo-1.0-1.x86_64.rpm"));
        let (_, pkgs, _) = r.load_packages().await.unwrap();
        assert_eq!(pkgs[0].location, "pool/foo-1.0-1.x86_64.rpm");
    }

    #[tokio::test]
    async fn test_add_duplicate_policies() {
        let backend = Arc::new(MemBackend::new());
        seed_repo(&backend, &[], ChecksumAlgorithm::Sha256, &[]);

        let dir = TempDir::new().unwrap();
        let first = rpm::minimal_rpm("foo", "1.0", "1", "x86_64");
        let path = write_local_rpm(&dir, "foo-1.0-1.x86_64.rpm", &first);

        let r = repo(backend.clone());
        r.add(&[&path], false, false).await.unwrap();

        // same NEVRA, different bytes
        let mut second = rpm::minimal_rpm("foo", "1.0", "1", "x86_64");
        second.extend_from_slice(b"different payload");
        let path2 = write_local_rpm(&dir, "foo-1.0-1.x86_64.rpm", &second);

        let err = r
            .add(&[&path2], false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));

        r.add(&[&path2], true, false).await.unwrap();
        let (_, pkgs, _) = r.load_packages().await.unwrap();
        assert_eq!(pkgs.len(), 1);
        assert_eq!(
            pkgs[0].pkgid,
            compute_checksum(&second, ChecksumAlgorithm::Sha256)
        );
        assert_eq!(backend.get("foo-1.0-1.x86_64.rpm").unwrap(), second);
    }

    #[tokio::test]
    async fn test_add_dry_run_writes_nothing() {
        let backend = Arc::new(MemBackend::new());
        seed_repo(&backend, &[], ChecksumAlgorithm::Sha256, &[]);
        let before = backend.paths();
        let manifest_before = backend.get(REPOMD_PATH).unwrap();

        let dir = TempDir::new().unwrap();
        let path = write_local_rpm(
            &dir,
            "foo-1.0-1.x86_64.rpm",
            &rpm::minimal_rpm("foo", "1.0", "1", "x86_64"),
        );

        repo(backend.clone())
            .add(&[&path], false, true)
            .await
            .unwrap();

        assert_eq!(backend.paths(), before);
        assert_eq!(backend.get(REPOMD_PATH).unwrap(), manifest_before);
    }

    #[tokio::test]
    async fn test_add_rejects_duplicate_nevra_in_existing_metadata() {
        let backend = Arc::new(MemBackend::new());
        let pkg = crate::metadata::Package {
            name: "dup".to_string(),
            arch: "x86_64".to_string(),
            version: "1.0".to_string(),
            release: "1".to_string(),
            checksum_type: "sha256".to_string(),
            pkgid: "1".repeat(64),
            location: "dup-1.0-1.x86_64.rpm".to_string(),
            ..Default::default()
        };
        let mut twin = pkg.clone();
        twin.pkgid = "2".repeat(64);
        seed_repo(&backend, &[pkg, twin], ChecksumAlgorithm::Sha256, &[]);

        let dir = TempDir::new().unwrap();
        let path = write_local_rpm(
            &dir,
            "foo-1.0-1.x86_64.rpm",
            &rpm::minimal_rpm("foo", "1.0", "1", "x86_64"),
        );

        let err = repo(backend)
            .add(&[&path], false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_add_uses_sha512_repositories() {
        let backend = Arc::new(MemBackend::new());
        seed_repo(&backend, &[], ChecksumAlgorithm::Sha512, &[]);

        let dir = TempDir::new().unwrap();
        let rpm_bytes = rpm::minimal_rpm("foo", "1.0", "1", "x86_64");
        let path = write_local_rpm(&dir, "foo-1.0-1.x86_64.rpm", &rpm_bytes);

        let r = repo(backend.clone());
        r.add(&[&path], false, false).await.unwrap();

        let (_, pkgs, alg) = r.load_packages().await.unwrap();
        assert_eq!(alg, ChecksumAlgorithm::Sha512);
        assert_eq!(pkgs[0].pkgid.len(), 128);
        assert_eq!(
            pkgs[0].pkgid,
            compute_checksum(&rpm_bytes, ChecksumAlgorithm::Sha512)
        );
    }

    #[tokio::test]
    async fn test_add_missing_local_file() {
        let backend = Arc::new(MemBackend::new());
        seed_repo(&backend, &[], ChecksumAlgorithm::Sha256, &[]);

        let err = repo(backend)
            .add(&[Path::new("/nonexistent/foo.rpm")], false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
