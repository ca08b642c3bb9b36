//! Environment-variable overlays for CLI options.

use std::env;

/// Read an environment variable and parse it, falling back to a default on
/// missing or invalid values.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Object-store connection options, resolved from flags with environment
/// fallbacks (`RPMKEEPER_S3_ENDPOINT`, `RPMKEEPER_S3_NO_CONDITIONAL`).
/// Credentials themselves follow the AWS default provider chain.
#[derive(Debug, Clone)]
pub struct S3Options {
    /// Custom endpoint URL for S3-compatible services (MinIO, etc.)
    pub endpoint: Option<String>,
    /// Conditional (If-Match) manifest publication
    pub conditional: bool,
}

impl S3Options {
    pub fn resolve(endpoint_flag: Option<String>, no_conditional_flag: bool) -> Self {
        let endpoint = endpoint_flag.or_else(|| env::var("RPMKEEPER_S3_ENDPOINT").ok());
        let no_conditional =
            no_conditional_flag || env_parse("RPMKEEPER_S3_NO_CONDITIONAL", false);
        Self {
            endpoint,
            conditional: !no_conditional,
        }
    }
}
