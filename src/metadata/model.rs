//! Package descriptor model.
//!
//! A [`Package`] carries everything the three core payloads record about a
//! single RPM; the XML mappings in [`crate::metadata::xml`] convert to and
//! from it.

use crate::error::Result;
use crate::metadata::xml;

/// A single package's metadata across `primary`, `filelists`, and `other`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Package {
    pub name: String,
    pub arch: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub summary: String,
    pub description: String,
    pub license: String,
    pub vendor: String,
    pub group: String,
    pub build_host: String,
    pub source_rpm: String,
    pub url: String,
    pub packager: String,
    pub time_build: i64,
    pub time_file: i64,
    pub size_package: u64,
    pub size_installed: u64,
    pub size_archive: u64,
    /// Path of the RPM relative to the repository root.
    pub location: String,
    /// Hex digest of the RPM bytes under `checksum_type`.
    pub pkgid: String,
    pub checksum_type: String,
    pub header_start: u64,
    pub header_end: u64,
    pub provides: Vec<Relation>,
    pub requires: Vec<Relation>,
    pub conflicts: Vec<Relation>,
    pub obsoletes: Vec<Relation>,
    pub files: Vec<FileEntry>,
    pub changelogs: Vec<Changelog>,
}

impl Package {
    /// `name-[epoch:]version-release.arch`, the package's identity within a
    /// repository. The epoch part is omitted when zero.
    pub fn nevra(&self) -> String {
        if self.epoch > 0 {
            format!(
                "{}-{}:{}-{}.{}",
                self.name, self.epoch, self.version, self.release, self.arch
            )
        } else {
            format!(
                "{}-{}-{}.{}",
                self.name, self.version, self.release, self.arch
            )
        }
    }
}

/// A provides/requires/conflicts/obsoletes relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relation {
    pub name: String,
    /// Comparison flag: `EQ`, `LT`, `GT`, `LE`, `GE`, or empty.
    pub flags: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    /// Pre-install requirement bit.
    pub pre: bool,
}

/// A file owned by a package.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileEntry {
    pub path: String,
    /// `dir`, `ghost`, or empty for a regular file.
    pub kind: String,
}

/// A changelog entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changelog {
    pub author: String,
    pub date: i64,
    pub text: String,
}

/// Render the three core payloads (uncompressed), with packages sorted
/// ascending by NEVRA.
pub fn render_core_xml(pkgs: &[Package]) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let mut sorted: Vec<&Package> = pkgs.iter().collect();
    sorted.sort_by(|a, b| a.nevra().cmp(&b.nevra()));

    let primary = xml::render_primary(&sorted)?;
    let filelists = xml::render_filelists(&sorted)?;
    let other = xml::render_other(&sorted)?;
    Ok((primary, filelists, other))
}

/// Parse the three core payloads (uncompressed) back into packages.
///
/// `filelists` and `other` entries are joined onto the `primary` set by
/// package identifier; entries with an unknown identifier are ignored.
pub fn parse_packages(
    primary_xml: &[u8],
    filelists_xml: &[u8],
    other_xml: &[u8],
) -> Result<Vec<Package>> {
    xml::parse_packages(primary_xml, filelists_xml, other_xml)
}
