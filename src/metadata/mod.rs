//! Repository metadata engine.
//!
//! Parses and renders the `primary`/`filelists`/`other` payloads and the
//! `repomd.xml` manifest, and builds the compressed core file bundles that
//! a publish writes.

pub mod core;
pub mod model;
pub mod repomd;
pub mod xml;

pub use self::core::{build_core_files, load_repomd, read_and_verify_core, CoreFile};
pub use self::model::{Changelog, FileEntry, Package, Relation};
pub use self::repomd::{
    assemble_repomd, marshal_repomd, parse_repomd, Checksum, Location, RepoData, RepoMd,
};

use serde::Serialize;

use crate::error::{AppError, Result};

pub const REPO_NAMESPACE: &str = "http://linux.duke.edu/metadata/repo";
pub const COMMON_NAMESPACE: &str = "http://linux.duke.edu/metadata/common";
pub const FILELISTS_NAMESPACE: &str = "http://linux.duke.edu/metadata/filelists";
pub const OTHER_NAMESPACE: &str = "http://linux.duke.edu/metadata/other";
pub const RPM_NAMESPACE: &str = "http://linux.duke.edu/metadata/rpm";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Serialize a document with the XML declaration and two-space indentation.
pub(crate) fn marshal_with_declaration<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut body = String::new();
    let mut serializer = quick_xml::se::Serializer::new(&mut body);
    serializer.indent(' ', 2);
    value
        .serialize(serializer)
        .map_err(|e| AppError::Internal(format!("render xml: {}", e)))?;

    let mut out = String::with_capacity(XML_DECLARATION.len() + body.len());
    out.push_str(XML_DECLARATION);
    out.push_str(&body);
    Ok(out.into_bytes())
}
