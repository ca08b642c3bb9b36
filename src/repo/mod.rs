//! Repository orchestration: the initialise/add/remove/check transactions.

mod add;
mod check;
mod remove;
mod rewrite;
mod sign;

pub use check::CheckReport;

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::checksum::ChecksumAlgorithm;
use crate::error::{AppError, Result};
use crate::metadata::core::{build_core_files, REPOMD_PATH};
use crate::metadata::repomd::{assemble_repomd, marshal_repomd, RepoMd};

/// One repository plus the options that shape its transactions. Each call
/// to [`Repository::init`], [`Repository::add`], or [`Repository::remove`]
/// is a single atomic publish.
pub struct Repository {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) cancel: CancellationToken,
    /// Preserve unknown metadata types in repomd.xml (with a warning)
    /// instead of dropping them.
    pub allow_unknown: bool,
    /// Destination prefix under the repo root for added RPMs.
    pub dest_prefix: String,
    /// Sign repomd.xml after every publish.
    pub sign_repodata: bool,
    /// Re-sign RPMs before adding them.
    pub sign_rpms: bool,
    /// GPG key ID for signing; gpg's default key when unset.
    pub gpg_key: Option<String>,
}

impl Repository {
    pub fn new(backend: Arc<dyn Backend>, cancel: CancellationToken) -> Self {
        Self {
            backend,
            cancel,
            allow_unknown: true,
            dest_prefix: String::new(),
            sign_repodata: false,
            sign_rpms: false,
            gpg_key: None,
        }
    }

    /// Create an empty repository layout: three `packages="0"` core files
    /// and a fresh manifest. Refuses to overwrite an existing manifest
    /// unless `force` is set.
    pub async fn init(&self, alg: ChecksumAlgorithm, force: bool) -> Result<()> {
        let exists = self.backend.exists(&self.cancel, REPOMD_PATH).await?;
        if exists && !force {
            return Err(AppError::InvalidInput(format!(
                "{} already exists (use --force to overwrite)",
                REPOMD_PATH
            )));
        }

        let now = Utc::now().timestamp();
        let core_files = build_core_files(&[], alg, now)?;
        let (repomd, _) = assemble_repomd(&RepoMd::default(), &core_files, alg, now, true);
        let repomd_bytes = marshal_repomd(&repomd)?;

        for cf in &core_files {
            tracing::debug!(path = %cf.path, size = cf.size, "writing core file");
            self.backend
                .write(&self.cancel, &cf.path, Bytes::from(cf.compressed.clone()))
                .await?;
        }
        self.backend
            .write(&self.cancel, REPOMD_PATH, Bytes::from(repomd_bytes.clone()))
            .await?;
        tracing::info!(root = %self.backend.repo_root(), alg = %alg, "repository initialized");

        if self.sign_repodata {
            self.sign_repomd(&repomd_bytes, self.gpg_key.as_deref()).await?;
        }
        Ok(())
    }
}
