//! Shared test fixtures: an in-memory backend, a synthetic RPM builder,
//! and a repository seeder.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::backend::{ensure_active, Backend};
use crate::checksum::ChecksumAlgorithm;
use crate::error::{AppError, Result};
use crate::metadata::core::{build_core_files, REPOMD_PATH};
use crate::metadata::model::Package;
use crate::metadata::repomd::{assemble_repomd, marshal_repomd, RepoData, RepoMd};

/// In-memory backend for exercising repository flows.
pub(crate) struct MemBackend {
    pub files: Mutex<HashMap<String, Bytes>>,
    pub deleted: Mutex<Vec<String>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, path: &str, data: impl Into<Bytes>) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), data.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut out: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        out.sort();
        out
    }
}

#[async_trait]
impl Backend for MemBackend {
    async fn list_repodata(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        ensure_active(cancel)?;
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with("repodata/"))
            .cloned()
            .collect())
    }

    async fn list_rpms(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        ensure_active(cancel)?;
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|k| !k.starts_with("repodata/") && k.ends_with(".rpm"))
            .cloned()
            .collect())
    }

    async fn read(&self, cancel: &CancellationToken, path: &str) -> Result<Bytes> {
        ensure_active(cancel)?;
        self.get(path)
            .ok_or_else(|| AppError::NotFound(path.to_string()))
    }

    async fn write(&self, cancel: &CancellationToken, path: &str, data: Bytes) -> Result<()> {
        ensure_active(cancel)?;
        self.insert(path, data);
        Ok(())
    }

    async fn delete(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        ensure_active(cancel)?;
        self.files.lock().unwrap().remove(path);
        self.deleted.lock().unwrap().push(path.to_string());
        Ok(())
    }

    async fn exists(&self, cancel: &CancellationToken, path: &str) -> Result<bool> {
        ensure_active(cancel)?;
        Ok(self.contains(path))
    }

    fn repo_root(&self) -> String {
        "mem".to_string()
    }
}

/// A backend whose manifest check always reports a concurrent change.
pub(crate) struct ConflictBackend(pub MemBackend);

#[async_trait]
impl Backend for ConflictBackend {
    async fn list_repodata(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.0.list_repodata(cancel).await
    }
    async fn list_rpms(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.0.list_rpms(cancel).await
    }
    async fn read(&self, cancel: &CancellationToken, path: &str) -> Result<Bytes> {
        self.0.read(cancel, path).await
    }
    async fn write(&self, cancel: &CancellationToken, path: &str, data: Bytes) -> Result<()> {
        self.0.write(cancel, path, data).await
    }
    async fn delete(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        self.0.delete(cancel, path).await
    }
    async fn exists(&self, cancel: &CancellationToken, path: &str) -> Result<bool> {
        self.0.exists(cancel, path).await
    }
    async fn check_manifest_unchanged(&self, _cancel: &CancellationToken) -> Result<()> {
        Err(AppError::Conflict("etag conflict".to_string()))
    }
    fn repo_root(&self) -> String {
        self.0.repo_root()
    }
}

/// Populate a backend with rendered metadata for `pkgs`, plus any extra
/// manifest entries, mirroring a previously published repository.
pub(crate) fn seed_repo(
    backend: &MemBackend,
    pkgs: &[Package],
    alg: ChecksumAlgorithm,
    extra_entries: &[RepoData],
) {
    let cores = build_core_files(pkgs, alg, 1_000_000).unwrap();
    let old = RepoMd {
        data: extra_entries.to_vec(),
        ..Default::default()
    };
    let (md, _) = assemble_repomd(&old, &cores, alg, 1_000_000, true);
    for cf in &cores {
        backend.insert(&cf.path, cf.compressed.clone());
    }
    backend.insert(REPOMD_PATH, marshal_repomd(&md).unwrap());
}

/// Synthetic RPM construction: a lead, an empty signature header, and a
/// main header assembled from typed entries.
pub(crate) mod rpm {
    const LEAD_SIZE: usize = 96;
    const LEAD_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];
    const HEADER_MAGIC: [u8; 3] = [0x8e, 0xad, 0xe8];

    pub struct HeaderEntry {
        tag: u32,
        data_type: u32,
        count: u32,
        data: Vec<u8>,
        align: usize,
    }

    impl HeaderEntry {
        pub fn string(tag: u32, value: &str) -> Self {
            let mut data = value.as_bytes().to_vec();
            data.push(0);
            Self {
                tag,
                data_type: 6,
                count: 1,
                data,
                align: 1,
            }
        }

        pub fn string_array(tag: u32, values: &[&str]) -> Self {
            let mut data = Vec::new();
            for v in values {
                data.extend_from_slice(v.as_bytes());
                data.push(0);
            }
            Self {
                tag,
                data_type: 8,
                count: values.len() as u32,
                data,
                align: 1,
            }
        }

        pub fn int32(tag: u32, values: &[u32]) -> Self {
            let mut data = Vec::with_capacity(values.len() * 4);
            for v in values {
                data.extend_from_slice(&v.to_be_bytes());
            }
            Self {
                tag,
                data_type: 4,
                count: values.len() as u32,
                data,
                align: 4,
            }
        }

        pub fn int16(tag: u32, values: &[u16]) -> Self {
            let mut data = Vec::with_capacity(values.len() * 2);
            for v in values {
                data.extend_from_slice(&v.to_be_bytes());
            }
            Self {
                tag,
                data_type: 3,
                count: values.len() as u32,
                data,
                align: 2,
            }
        }
    }

    /// Assemble a header section (preamble + index + store).
    pub fn build_header(entries: &[HeaderEntry]) -> Vec<u8> {
        let mut index = Vec::with_capacity(entries.len() * 16);
        let mut store = Vec::new();
        for entry in entries {
            while store.len() % entry.align != 0 {
                store.push(0);
            }
            index.extend_from_slice(&entry.tag.to_be_bytes());
            index.extend_from_slice(&entry.data_type.to_be_bytes());
            index.extend_from_slice(&(store.len() as u32).to_be_bytes());
            index.extend_from_slice(&entry.count.to_be_bytes());
            store.extend_from_slice(&entry.data);
        }

        let mut out = Vec::with_capacity(16 + index.len() + store.len());
        out.extend_from_slice(&HEADER_MAGIC);
        out.push(1); // header version
        out.extend_from_slice(&[0u8; 4]); // reserved
        out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        out.extend_from_slice(&(store.len() as u32).to_be_bytes());
        out.extend_from_slice(&index);
        out.extend_from_slice(&store);
        out
    }

    /// A complete synthetic RPM with the given main-header entries.
    pub fn build_rpm(entries: &[HeaderEntry]) -> Vec<u8> {
        let mut out = vec![0u8; LEAD_SIZE];
        out[..4].copy_from_slice(&LEAD_MAGIC);
        out[4] = 3; // rpm format major version
        out.extend_from_slice(&build_header(&[])); // empty signature header
        while out.len() % 8 != 0 {
            out.push(0);
        }
        out.extend_from_slice(&build_header(entries));
        // a token payload so the file extends past the header
        out.extend_from_slice(b"payload");
        out
    }

    /// A minimal RPM whose NEVRA fields are the only contents.
    pub fn minimal_rpm(name: &str, version: &str, release: &str, arch: &str) -> Vec<u8> {
        build_rpm(&[
            HeaderEntry::string(1000, name),
            HeaderEntry::string(1001, version),
            HeaderEntry::string(1002, release),
            HeaderEntry::string(1004, &format!("{} summary", name)),
            HeaderEntry::string(1005, &format!("{} description", name)),
            HeaderEntry::string(1022, arch),
        ])
    }
}
