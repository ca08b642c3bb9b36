//! `repomd.xml` manifest mapping and reassembly.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumAlgorithm;
use crate::error::{AppError, Result};
use crate::metadata::core::CoreFile;
use crate::metadata::{marshal_with_declaration, REPO_NAMESPACE};

/// Root of `repodata/repomd.xml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename = "repomd")]
pub struct RepoMd {
    #[serde(rename = "@xmlns", default, skip_serializing_if = "String::is_empty")]
    pub xmlns: String,
    #[serde(default)]
    pub revision: String,
    #[serde(rename = "data", default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<RepoData>,
}

/// One `<data>` entry of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoData {
    #[serde(rename = "@type")]
    pub data_type: String,
    pub checksum: Checksum,
    #[serde(
        rename = "open-checksum",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub open_checksum: Option<Checksum>,
    pub location: Location,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub size: i64,
    #[serde(rename = "open-size", default)]
    pub open_size: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checksum {
    #[serde(rename = "@type", default)]
    pub checksum_type: String,
    #[serde(rename = "$text", default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "@href", default)]
    pub href: String,
}

impl RepoMd {
    /// Return the core `<data>` entries (`primary`, `filelists`, `other`),
    /// whichever of them are present.
    pub fn core_entries(
        &self,
    ) -> (Option<&RepoData>, Option<&RepoData>, Option<&RepoData>) {
        let mut primary = None;
        let mut filelists = None;
        let mut other = None;
        for d in &self.data {
            match d.data_type.as_str() {
                "primary" => primary = Some(d),
                "filelists" => filelists = Some(d),
                "other" => other = Some(d),
                _ => {}
            }
        }
        (primary, filelists, other)
    }
}

/// Render the manifest with the XML declaration, filling in the repo
/// namespace when absent.
pub fn marshal_repomd(md: &RepoMd) -> Result<Vec<u8>> {
    if md.xmlns.is_empty() {
        let mut filled = md.clone();
        filled.xmlns = REPO_NAMESPACE.to_string();
        return marshal_with_declaration(&filled);
    }
    marshal_with_declaration(md)
}

/// Parse manifest bytes.
pub fn parse_repomd(data: &[u8]) -> Result<RepoMd> {
    let text = std::str::from_utf8(data)
        .map_err(|e| AppError::Parse(format!("repomd.xml is not UTF-8: {}", e)))?;
    quick_xml::de::from_str(text).map_err(|e| AppError::Parse(format!("repomd.xml: {}", e)))
}

/// Build a new manifest from the previous one and freshly built core files.
///
/// Core entry types and `prestodelta` are dropped (the core entries are
/// re-added from `core`), `modules` entries are copied verbatim, and any
/// other type is copied or omitted depending on `allow_unknown`. Returns the
/// new manifest plus one warning per distinct foreign type encountered.
pub fn assemble_repomd(
    old: &RepoMd,
    core: &[CoreFile],
    alg: ChecksumAlgorithm,
    now: i64,
    allow_unknown: bool,
) -> (RepoMd, Vec<String>) {
    let mut new_md = RepoMd {
        xmlns: if old.xmlns.is_empty() {
            REPO_NAMESPACE.to_string()
        } else {
            old.xmlns.clone()
        },
        revision: now.to_string(),
        data: Vec::new(),
    };

    let mut unknown_types = BTreeSet::new();
    for d in &old.data {
        match d.data_type.as_str() {
            "primary" | "filelists" | "other" | "prestodelta" => continue,
            "modules" => new_md.data.push(d.clone()),
            _ => {
                unknown_types.insert(d.data_type.clone());
                if allow_unknown {
                    new_md.data.push(d.clone());
                }
            }
        }
    }

    for cf in core {
        new_md.data.push(RepoData {
            data_type: cf.data_type.clone(),
            checksum: Checksum {
                checksum_type: alg.as_str().to_string(),
                value: cf.checksum.clone(),
            },
            open_checksum: Some(Checksum {
                checksum_type: alg.as_str().to_string(),
                value: cf.open_checksum.clone(),
            }),
            location: Location {
                href: cf.path.clone(),
            },
            timestamp: cf.timestamp,
            size: cf.size,
            open_size: cf.open_size,
        });
    }

    let warnings = unknown_types
        .into_iter()
        .map(|t| {
            format!(
                "preserving unknown metadata type '{}' from repomd.xml; checksum not verified",
                t
            )
        })
        .collect();
    (new_md, warnings)
}
