//! S3-compatible object-store backend.
//!
//! Child metadata files are staged under `repodata/.tmp/` and server-side
//! copied into place; the manifest itself is published with a conditional
//! PUT (If-Match on the ETag observed when it was read), which is the sole
//! linearisation point between concurrent publishers.
//!
//! Credentials come from the AWS default provider chain (environment
//! variables, profiles, instance metadata). A custom endpoint switches the
//! client to path-style addressing for MinIO and friends.

use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::{ensure_active, Backend};
use crate::error::{AppError, Result};
use crate::metadata::core::REPOMD_PATH;

const STAGING_PREFIX: &str = "repodata/.tmp";

/// Object-store-backed repository root (`s3://bucket/prefix`).
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: String,
    /// Conditional manifest writes; off for stores that ignore If-Match.
    conditional: bool,
    /// ETag of the manifest as last read through this instance.
    cached_etag: Mutex<Option<String>>,
}

impl S3Backend {
    /// Create a backend for `s3://bucket/prefix`. `endpoint` switches to an
    /// S3-compatible service with path-style addressing.
    pub async fn new(root: &str, endpoint: Option<&str>, conditional: bool) -> Result<Self> {
        let (bucket, prefix) = parse_s3_uri(root)?;

        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket,
            prefix,
            conditional,
            cached_etag: Mutex::new(None),
        })
    }

    fn key(&self, path: &str) -> String {
        key_join(&self.prefix, path)
    }

    fn repomd_key(&self) -> String {
        self.key(REPOMD_PATH)
    }

    /// Strip the configured prefix off a listed key.
    fn rel(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            return key.to_string();
        }
        key.strip_prefix(&format!("{}/", self.prefix))
            .unwrap_or(key)
            .to_string()
    }

    fn stage_key(&self, path: &str) -> String {
        let base = path.rsplit('/').next().unwrap_or(path);
        key_join(&self.prefix, &format!("{}/{}", STAGING_PREFIX, base))
    }

    async fn put_object(&self, key: &str, data: &Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("put {}: {}", key, display_sdk_error(&e))))?;
        tracing::debug!(key = %key, size = data.len(), "s3 put");
        Ok(())
    }

    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, src_key))
            .key(dst_key)
            .send()
            .await
            .map_err(|e| {
                AppError::Storage(format!(
                    "copy {} -> {}: {}",
                    src_key,
                    dst_key,
                    display_sdk_error(&e)
                ))
            })?;
        tracing::debug!(src = %src_key, dst = %dst_key, "s3 copy");
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page
                .map_err(|e| AppError::Storage(format!("list {}: {}", prefix, display_sdk_error(&e))))?;
            for obj in page.contents() {
                if let Some(key) = obj.key() {
                    keys.push(self.rel(key));
                }
            }
        }
        Ok(keys)
    }

    async fn head_etag(&self, key: &str) -> Result<Option<String>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => Ok(head.e_tag().map(normalize_etag)),
            Err(e) => {
                if e.as_service_error().map_or(false, |se| se.is_not_found()) {
                    Ok(None)
                } else {
                    Err(AppError::Storage(format!(
                        "head {}: {}",
                        key,
                        display_sdk_error(&e)
                    )))
                }
            }
        }
    }

    /// Publish the manifest. With a cached ETag, the write carries If-Match
    /// so a concurrent publisher turns into a conflict instead of a lost
    /// update.
    async fn put_repomd(&self, key: &str, data: &Bytes) -> Result<()> {
        let etag = self.cached_etag.lock().unwrap().clone();
        let etag = match (self.conditional, etag) {
            (true, Some(etag)) => etag,
            _ => return self.put_object(key, data).await,
        };

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data.to_vec()))
            .if_match(&etag)
            .send()
            .await;
        match result {
            Ok(_) => {
                tracing::debug!(key = %key, etag = %etag, "s3 conditional put");
                Ok(())
            }
            Err(e) => {
                if let Some(status) = sdk_error_status(&e) {
                    // 412: precondition failed; 409: concurrent conditional write
                    if status == 412 || status == 409 {
                        return Err(AppError::Conflict(format!(
                            "repomd.xml changed since read (etag {})",
                            etag
                        )));
                    }
                }
                Err(AppError::Storage(format!(
                    "put {}: {}",
                    key,
                    display_sdk_error(&e)
                )))
            }
        }
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn list_repodata(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        ensure_active(cancel)?;
        let prefix = format!("{}/", key_join(&self.prefix, "repodata"));
        self.list_prefix(&prefix).await
    }

    async fn list_rpms(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        ensure_active(cancel)?;
        let prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        let keys = self.list_prefix(&prefix).await?;
        Ok(keys
            .into_iter()
            .filter(|k| !k.starts_with("repodata/") && k.ends_with(".rpm"))
            .collect())
    }

    async fn read(&self, cancel: &CancellationToken, path: &str) -> Result<Bytes> {
        ensure_active(cancel)?;
        let key = self.key(path);
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map_or(false, |se| se.is_no_such_key()) {
                    AppError::NotFound(path.to_string())
                } else {
                    AppError::Storage(format!("get {}: {}", key, display_sdk_error(&e)))
                }
            })?;

        if key == self.repomd_key() {
            if let Some(etag) = resp.e_tag() {
                *self.cached_etag.lock().unwrap() = Some(normalize_etag(etag));
            }
        }

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| AppError::Storage(format!("get {}: {}", key, e)))?
            .into_bytes();
        tracing::debug!(key = %key, size = data.len(), "s3 get");
        Ok(data)
    }

    async fn write(&self, cancel: &CancellationToken, path: &str, data: Bytes) -> Result<()> {
        ensure_active(cancel)?;
        let key = self.key(path);

        // Stage repodata children so the final key only ever appears whole;
        // the manifest goes direct (conditionally when we hold an ETag).
        if path.starts_with("repodata/") && !path.ends_with("repomd.xml") {
            let stage = self.stage_key(path);
            self.put_object(&stage, &data).await?;
            self.copy_object(&stage, &key).await?;
            if let Err(e) = self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(&stage)
                .send()
                .await
            {
                tracing::debug!(key = %stage, error = %display_sdk_error(&e), "staging cleanup failed");
            }
            return Ok(());
        }

        if path.ends_with("repomd.xml") {
            return self.put_repomd(&key, &data).await;
        }
        self.put_object(&key, &data).await
    }

    async fn delete(&self, cancel: &CancellationToken, path: &str) -> Result<()> {
        ensure_active(cancel)?;
        let key = self.key(path);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("delete {}: {}", key, display_sdk_error(&e))))?;
        tracing::debug!(key = %key, "s3 delete");
        Ok(())
    }

    async fn exists(&self, cancel: &CancellationToken, path: &str) -> Result<bool> {
        ensure_active(cancel)?;
        Ok(self.head_etag(&self.key(path)).await?.is_some())
    }

    async fn check_manifest_unchanged(&self, cancel: &CancellationToken) -> Result<()> {
        ensure_active(cancel)?;
        if !self.conditional {
            return Ok(());
        }
        let cached = match self.cached_etag.lock().unwrap().clone() {
            Some(etag) => etag,
            None => return Ok(()),
        };
        let current = self.head_etag(&self.repomd_key()).await?.unwrap_or_default();
        if current != cached {
            return Err(AppError::Conflict(format!(
                "repomd.xml changed since read (etag {} -> {})",
                cached, current
            )));
        }
        Ok(())
    }

    fn repo_root(&self) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, self.prefix)
        }
    }
}

/// Split `s3://bucket/prefix` into bucket and (possibly empty) prefix.
fn parse_s3_uri(uri: &str) -> Result<(String, String)> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| AppError::InvalidInput(format!("invalid s3 uri '{}'", uri)))?;
    let (bucket, prefix) = match rest.split_once('/') {
        Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
        None => (rest, ""),
    };
    if bucket.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "missing bucket in uri '{}'",
            uri
        )));
    }
    Ok((bucket.to_string(), prefix.to_string()))
}

fn key_join(prefix: &str, path: &str) -> String {
    let path = path.trim_matches('/');
    let prefix = prefix.trim_end_matches('/');
    if path.is_empty() || path == "." {
        return prefix.to_string();
    }
    if prefix.is_empty() {
        return path.to_string();
    }
    format!("{}/{}", prefix, path)
}

fn normalize_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn display_sdk_error<E: std::fmt::Display>(err: &SdkError<E, HttpResponse>) -> String {
    match err {
        SdkError::ServiceError(ctx) => ctx.err().to_string(),
        other => other.to_string(),
    }
}

fn sdk_error_status<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    match err {
        SdkError::ServiceError(ctx) => Some(ctx.raw().status().as_u16()),
        SdkError::ResponseError(ctx) => Some(ctx.raw().status().as_u16()),
        _ => None,
    }
}
