//! External signing subprocesses.
//!
//! The manifest signature is produced by `gpg` as a pure bytes-to-bytes
//! call (stdin = manifest, stdout = detached armored signature); RPM
//! re-signing shells out to `rpmsign --resign` against a staged temp file.
//! No key material is handled in-process.

use std::process::Stdio;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::Repository;
use crate::error::{AppError, Result};
use crate::metadata::core::REPOMD_SIGNATURE_PATH;

impl Repository {
    /// Detached-sign the manifest bytes and store the signature as
    /// `repodata/repomd.xml.asc`.
    pub(crate) async fn sign_repomd(&self, repomd: &[u8], gpg_key: Option<&str>) -> Result<()> {
        let mut cmd = Command::new("gpg");
        cmd.args(["--detach-sign", "--armor", "--batch", "--yes"]);
        if let Some(key) = gpg_key {
            cmd.args(["--local-user", key]);
        }
        cmd.args(["-o", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| AppError::Signing(format!("spawn gpg: {}", e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(repomd)
                .await
                .map_err(|e| AppError::Signing(format!("write to gpg: {}", e)))?;
        }

        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.map_err(|e| AppError::Signing(format!("gpg: {}", e)))?
            }
            _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Signing(format!(
                "gpg sign failed: {}",
                stderr.trim()
            )));
        }

        tracing::debug!(size = output.stdout.len(), "manifest signed");
        self.backend
            .write(
                &self.cancel,
                REPOMD_SIGNATURE_PATH,
                Bytes::from(output.stdout),
            )
            .await
    }

    /// Re-sign an RPM payload via `rpmsign --resign`, returning the
    /// rewritten bytes.
    pub(crate) async fn resign_rpm(&self, data: Bytes, gpg_key: Option<&str>) -> Result<Bytes> {
        let tmp = tempfile::Builder::new()
            .prefix("rpmkeeper-sign-")
            .suffix(".rpm")
            .tempfile()
            .map_err(|e| AppError::Signing(format!("create temp rpm: {}", e)))?;
        let tmp_path = tmp.path().to_path_buf();
        tokio::fs::write(&tmp_path, &data)
            .await
            .map_err(|e| AppError::Signing(format!("write temp rpm: {}", e)))?;

        let mut cmd = Command::new("rpmsign");
        cmd.arg("--resign");
        if let Some(key) = gpg_key {
            cmd.args(["--define", &format!("_gpg_name {}", key)]);
        }
        cmd.arg(&tmp_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| AppError::Signing(format!("spawn rpmsign: {}", e)))?;
        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.map_err(|e| AppError::Signing(format!("rpmsign: {}", e)))?
            }
            _ = self.cancel.cancelled() => return Err(AppError::Cancelled),
        };
        if !output.status.success() {
            let combined = [output.stdout.as_slice(), output.stderr.as_slice()].concat();
            return Err(AppError::Signing(format!(
                "rpmsign failed: {}",
                String::from_utf8_lossy(&combined).trim()
            )));
        }

        let signed = tokio::fs::read(&tmp_path)
            .await
            .map_err(|e| AppError::Signing(format!("read signed rpm: {}", e)))?;
        Ok(Bytes::from(signed))
    }
}
