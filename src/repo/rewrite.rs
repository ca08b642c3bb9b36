//! Shared load and rewrite paths for add/remove transactions.

use std::collections::HashSet;

use bytes::Bytes;

use super::Repository;
use crate::checksum::ChecksumAlgorithm;
use crate::error::{AppError, Result};
use crate::metadata::core::{
    build_core_files, load_repomd, read_and_verify_core, REPOMD_PATH, REPOMD_SIGNATURE_PATH,
};
use crate::metadata::model::{parse_packages, Package};
use crate::metadata::repomd::{assemble_repomd, marshal_repomd, RepoMd};

const STAGING_PREFIX: &str = "repodata/.tmp";

pub(crate) fn is_sqlite(href: &str) -> bool {
    href.contains(".sqlite")
}

impl Repository {
    /// Load the manifest and the verified core payloads, returning the
    /// parsed package set and the repository's active checksum algorithm.
    pub(crate) async fn load_packages(
        &self,
    ) -> Result<(RepoMd, Vec<Package>, ChecksumAlgorithm)> {
        let md = load_repomd(self.backend.as_ref(), &self.cancel).await?;

        let (primary, filelists, other) = md.core_entries();
        let (primary, filelists, other) = match (primary, filelists, other) {
            (Some(p), Some(f), Some(o)) => (p, f, o),
            _ => {
                return Err(AppError::Parse(
                    "repomd.xml missing core metadata (primary/filelists/other)".to_string(),
                ))
            }
        };
        if is_sqlite(&primary.location.href)
            || is_sqlite(&filelists.location.href)
            || is_sqlite(&other.location.href)
        {
            return Err(AppError::Unsupported("sqlite-only metadata".to_string()));
        }

        let primary_core =
            read_and_verify_core(self.backend.as_ref(), &self.cancel, primary).await?;
        let filelists_core =
            read_and_verify_core(self.backend.as_ref(), &self.cancel, filelists).await?;
        let other_core = read_and_verify_core(self.backend.as_ref(), &self.cancel, other).await?;

        let pkgs = parse_packages(
            &primary_core.uncompressed,
            &filelists_core.uncompressed,
            &other_core.uncompressed,
        )?;

        let alg = ChecksumAlgorithm::parse_or_default(&primary.checksum.checksum_type);
        Ok((md, pkgs, alg))
    }

    /// Regenerate core files and the manifest and publish them: children
    /// first, manifest last (re-signed when configured), then
    /// garbage-collect unreferenced repodata. Returns accumulated warnings.
    pub(crate) async fn write_metadata(
        &self,
        md: &RepoMd,
        pkgs: &[Package],
        alg: ChecksumAlgorithm,
        now: i64,
    ) -> Result<Vec<String>> {
        self.backend.check_manifest_unchanged(&self.cancel).await?;

        let core_files = build_core_files(pkgs, alg, now)?;
        let (new_md, mut warnings) =
            assemble_repomd(md, &core_files, alg, now, self.allow_unknown);
        let repomd_bytes = Bytes::from(marshal_repomd(&new_md)?);

        for cf in &core_files {
            tracing::debug!(path = %cf.path, size = cf.size, "writing core file");
            self.backend
                .write(&self.cancel, &cf.path, Bytes::from(cf.compressed.clone()))
                .await?;
        }
        self.backend
            .write(&self.cancel, REPOMD_PATH, repomd_bytes.clone())
            .await?;

        if self.sign_repodata {
            self.sign_repomd(&repomd_bytes, self.gpg_key.as_deref()).await?;
        }

        self.collect_garbage(&new_md, &mut warnings).await;
        Ok(warnings)
    }

    /// Delete repodata entries the new manifest no longer references.
    /// Failures degrade to warnings; a reader holding the old manifest has
    /// already lost its children at this point, which is the documented
    /// publish window.
    async fn collect_garbage(&self, md: &RepoMd, warnings: &mut Vec<String>) {
        let mut referenced: HashSet<&str> = HashSet::new();
        referenced.insert(REPOMD_PATH);
        referenced.insert(REPOMD_SIGNATURE_PATH);
        for d in &md.data {
            referenced.insert(&d.location.href);
        }

        let files = match self.backend.list_repodata(&self.cancel).await {
            Ok(files) => files,
            Err(e) => {
                warnings.push(format!("cleanup old metadata: {}", e));
                return;
            }
        };
        for f in files {
            if referenced.contains(f.as_str()) || f.starts_with(STAGING_PREFIX) {
                continue;
            }
            tracing::debug!(path = %f, "deleting unreferenced metadata");
            if let Err(e) = self.backend.delete(&self.cancel, &f).await {
                warnings.push(format!("delete {}: {}", f, e));
            }
        }
    }
}
