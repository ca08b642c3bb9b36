//! Core file bundles: compressed payloads plus their digests and sizes.

use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::checksum::{compute_checksum, gunzip_bytes, gzip_bytes, ChecksumAlgorithm};
use crate::error::{AppError, Result};
use crate::metadata::model::{render_core_xml, Package};
use crate::metadata::repomd::{parse_repomd, RepoData, RepoMd};

pub const REPOMD_PATH: &str = "repodata/repomd.xml";
pub const REPOMD_SIGNATURE_PATH: &str = "repodata/repomd.xml.asc";

/// One rendered core payload with both representations and their digests.
///
/// The repository-relative path embeds the digest of the compressed form, so
/// every rewrite lands on a fresh path and old readers can keep fetching the
/// previous file during a publish.
#[derive(Debug, Clone)]
pub struct CoreFile {
    /// `primary`, `filelists`, or `other`
    pub data_type: String,
    /// `repodata/<compressed-digest>-<type>.xml.gz`
    pub path: String,
    pub compressed: Vec<u8>,
    pub uncompressed: Vec<u8>,
    pub checksum: String,
    pub open_checksum: String,
    pub size: i64,
    pub open_size: i64,
    pub timestamp: i64,
}

/// Render, compress, and digest the three core payloads for `pkgs`.
/// An empty slice yields valid `packages="0"` documents (initialisation).
pub fn build_core_files(
    pkgs: &[Package],
    alg: ChecksumAlgorithm,
    now: i64,
) -> Result<Vec<CoreFile>> {
    let (primary, filelists, other) = render_core_xml(pkgs)?;
    let payloads = [
        ("primary", primary),
        ("filelists", filelists),
        ("other", other),
    ];

    let mut core_files = Vec::with_capacity(payloads.len());
    for (name, data) in payloads {
        let compressed = gzip_bytes(&data)?;
        let checksum = compute_checksum(&compressed, alg);
        let open_checksum = compute_checksum(&data, alg);
        let path = format!("repodata/{}-{}.xml.gz", checksum, name);
        core_files.push(CoreFile {
            data_type: name.to_string(),
            path,
            size: compressed.len() as i64,
            open_size: data.len() as i64,
            compressed,
            uncompressed: data,
            checksum,
            open_checksum,
            timestamp: now,
        });
    }
    Ok(core_files)
}

/// Read and parse `repodata/repomd.xml` from the backend. A missing manifest
/// is the not-initialized error.
pub async fn load_repomd(
    backend: &dyn Backend,
    cancel: &CancellationToken,
) -> Result<RepoMd> {
    let data = backend.read(cancel, REPOMD_PATH).await.map_err(|e| match e {
        AppError::NotFound(_) => {
            AppError::NotInitialized(format!("{} not found (run init first)", REPOMD_PATH))
        }
        other => other,
    })?;
    parse_repomd(&data)
}

/// Fetch a core payload, decompress it, and verify both digests against the
/// manifest entry.
pub async fn read_and_verify_core(
    backend: &dyn Backend,
    cancel: &CancellationToken,
    entry: &RepoData,
) -> Result<CoreFile> {
    if entry.location.href.is_empty() {
        return Err(AppError::Parse(format!(
            "missing location href for '{}' entry",
            entry.data_type
        )));
    }
    let compressed = backend.read(cancel, &entry.location.href).await?;
    let uncompressed = gunzip_bytes(&compressed)
        .map_err(|e| AppError::Parse(format!("decompress {}: {}", entry.location.href, e)))?;

    let open_checksum = entry.open_checksum.as_ref();
    if entry.checksum.checksum_type.is_empty()
        || open_checksum.map_or(true, |c| c.checksum_type.is_empty())
    {
        return Err(AppError::Parse(format!(
            "missing checksum metadata for '{}' entry",
            entry.data_type
        )));
    }
    let alg = ChecksumAlgorithm::parse(&entry.checksum.checksum_type)?;
    let open_alg = ChecksumAlgorithm::parse(&open_checksum.map(|c| c.checksum_type.clone()).unwrap_or_default())?;

    let checksum = compute_checksum(&compressed, alg);
    if checksum != entry.checksum.value {
        return Err(AppError::Integrity(format!(
            "checksum mismatch for {}: expected {} got {}",
            entry.data_type, entry.checksum.value, checksum
        )));
    }
    let open_value = open_checksum.map(|c| c.value.clone()).unwrap_or_default();
    let open_sum = compute_checksum(&uncompressed, open_alg);
    if open_sum != open_value {
        return Err(AppError::Integrity(format!(
            "open-checksum mismatch for {}: expected {} got {}",
            entry.data_type, open_value, open_sum
        )));
    }

    Ok(CoreFile {
        data_type: entry.data_type.clone(),
        path: entry.location.href.clone(),
        size: compressed.len() as i64,
        open_size: uncompressed.len() as i64,
        compressed: compressed.to_vec(),
        uncompressed,
        checksum,
        open_checksum: open_sum,
        timestamp: entry.timestamp,
    })
}
