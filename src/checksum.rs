//! Checksum and compression primitives.
//!
//! Hex digests over SHA-256/SHA-512 and gzip framing for the core
//! metadata payloads.

use std::fmt;
use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{AppError, Result};

/// Checksum algorithms accepted in repository metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Parse an algorithm name as it appears in repomd.xml or on the CLI.
    /// Unknown names are a fatal error.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(AppError::Unsupported(format!(
                "checksum algorithm '{}'",
                other
            ))),
        }
    }

    /// Parse an algorithm name from an existing manifest, falling back to
    /// SHA-256 when the recorded value is empty or unrecognized.
    pub fn parse_or_default(name: &str) -> Self {
        Self::parse(name).unwrap_or(Self::Sha256)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hex digest of `data` under the given algorithm.
pub fn compute_checksum(data: &[u8], alg: ChecksumAlgorithm) -> String {
    match alg {
        ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
    }
}

/// Gzip-compress `data`.
pub fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a gzip stream.
pub fn gunzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| AppError::Parse(format!("gzip decode: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_empty() {
        let sum = compute_checksum(b"", ChecksumAlgorithm::Sha256);
        // SHA-256 of empty input
        assert_eq!(
            sum,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_lengths() {
        let data = b"repodata";
        assert_eq!(compute_checksum(data, ChecksumAlgorithm::Sha256).len(), 64);
        assert_eq!(compute_checksum(data, ChecksumAlgorithm::Sha512).len(), 128);
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(
            ChecksumAlgorithm::parse("sha256").unwrap(),
            ChecksumAlgorithm::Sha256
        );
        assert_eq!(
            ChecksumAlgorithm::parse("SHA512").unwrap(),
            ChecksumAlgorithm::Sha512
        );
        let err = ChecksumAlgorithm::parse("md5").unwrap_err();
        assert!(matches!(err, AppError::Unsupported(_)));
    }

    #[test]
    fn test_parse_or_default_falls_back() {
        assert_eq!(
            ChecksumAlgorithm::parse_or_default(""),
            ChecksumAlgorithm::Sha256
        );
        assert_eq!(
            ChecksumAlgorithm::parse_or_default("sha1"),
            ChecksumAlgorithm::Sha256
        );
        assert_eq!(
            ChecksumAlgorithm::parse_or_default("sha512"),
            ChecksumAlgorithm::Sha512
        );
    }

    #[test]
    fn test_gzip_round_trip() {
        let input = b"<metadata packages=\"0\"/>".to_vec();
        let compressed = gzip_bytes(&input).unwrap();
        assert_ne!(compressed, input);
        let restored = gunzip_bytes(&compressed).unwrap();
        assert_eq!(restored, input);
    }

    #[test]
    fn test_gunzip_rejects_garbage() {
        let err = gunzip_bytes(b"not gzip at all").unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }
}
