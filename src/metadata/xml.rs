//! serde mappings for the `primary`, `filelists`, and `other` documents.
//!
//! The structs here mirror the wire format exactly (attribute order, omitted
//! empty fields); conversions to and from [`Package`] happen at the edges so
//! the rest of the crate never touches document structure.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::metadata::model::{Changelog, FileEntry, Package, Relation};
use crate::metadata::{
    marshal_with_declaration, COMMON_NAMESPACE, FILELISTS_NAMESPACE, OTHER_NAMESPACE,
    RPM_NAMESPACE,
};

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn parse_epoch(s: &str) -> u32 {
    s.parse().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// primary
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "metadata")]
struct PrimaryXml {
    #[serde(rename = "@xmlns", default)]
    xmlns: String,
    #[serde(rename = "@xmlns:rpm", default, skip_serializing_if = "String::is_empty")]
    xmlns_rpm: String,
    #[serde(rename = "@packages", default)]
    count: usize,
    #[serde(rename = "package", default, skip_serializing_if = "Vec::is_empty")]
    packages: Vec<PrimaryPackage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PrimaryPackage {
    #[serde(rename = "@type", default)]
    pkg_type: String,
    name: String,
    #[serde(default)]
    arch: String,
    version: VersionXml,
    checksum: PkgChecksumXml,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    packager: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    url: String,
    time: TimeXml,
    size: SizeXml,
    location: LocationXml,
    format: FormatXml,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VersionXml {
    #[serde(rename = "@epoch", default)]
    epoch: String,
    #[serde(rename = "@ver", default)]
    ver: String,
    #[serde(rename = "@rel", default)]
    rel: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PkgChecksumXml {
    #[serde(rename = "@type", default)]
    checksum_type: String,
    #[serde(rename = "@pkgid", default)]
    pkgid: String,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TimeXml {
    #[serde(rename = "@file", default, skip_serializing_if = "is_zero_i64")]
    file: i64,
    #[serde(rename = "@build", default, skip_serializing_if = "is_zero_i64")]
    build: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SizeXml {
    #[serde(rename = "@package", default)]
    package: u64,
    #[serde(rename = "@installed", default, skip_serializing_if = "is_zero_u64")]
    installed: u64,
    #[serde(rename = "@archive", default, skip_serializing_if = "is_zero_u64")]
    archive: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocationXml {
    #[serde(rename = "@href", default)]
    href: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FormatXml {
    #[serde(rename = "rpm:license", default, skip_serializing_if = "String::is_empty")]
    license: String,
    #[serde(rename = "rpm:vendor", default, skip_serializing_if = "String::is_empty")]
    vendor: String,
    #[serde(rename = "rpm:group", default, skip_serializing_if = "String::is_empty")]
    group: String,
    #[serde(rename = "rpm:buildhost", default, skip_serializing_if = "String::is_empty")]
    buildhost: String,
    #[serde(rename = "rpm:sourcerpm", default, skip_serializing_if = "String::is_empty")]
    sourcerpm: String,
    #[serde(
        rename = "rpm:header-range",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    header_range: Option<HeaderRangeXml>,
    #[serde(rename = "rpm:provides", default, skip_serializing_if = "Option::is_none")]
    provides: Option<DepListXml>,
    #[serde(rename = "rpm:requires", default, skip_serializing_if = "Option::is_none")]
    requires: Option<DepListXml>,
    #[serde(rename = "rpm:conflicts", default, skip_serializing_if = "Option::is_none")]
    conflicts: Option<DepListXml>,
    #[serde(rename = "rpm:obsoletes", default, skip_serializing_if = "Option::is_none")]
    obsoletes: Option<DepListXml>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HeaderRangeXml {
    #[serde(rename = "@start", default)]
    start: u64,
    #[serde(rename = "@end", default)]
    end: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DepListXml {
    #[serde(rename = "rpm:entry", default)]
    entries: Vec<DepEntryXml>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DepEntryXml {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@flags", default, skip_serializing_if = "String::is_empty")]
    flags: String,
    #[serde(rename = "@epoch", default)]
    epoch: String,
    #[serde(rename = "@ver", default, skip_serializing_if = "String::is_empty")]
    ver: String,
    #[serde(rename = "@rel", default, skip_serializing_if = "String::is_empty")]
    rel: String,
    #[serde(rename = "@pre", default, skip_serializing_if = "String::is_empty")]
    pre: String,
}

// ---------------------------------------------------------------------------
// filelists
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "filelists")]
struct FilelistsXml {
    #[serde(rename = "@xmlns", default)]
    xmlns: String,
    #[serde(rename = "@packages", default)]
    count: usize,
    #[serde(rename = "package", default, skip_serializing_if = "Vec::is_empty")]
    packages: Vec<FilelistsPackage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FilelistsPackage {
    #[serde(rename = "@pkgid", default)]
    pkgid: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@arch", default)]
    arch: String,
    version: VersionXml,
    #[serde(rename = "file", default, skip_serializing_if = "Vec::is_empty")]
    files: Vec<FileEntryXml>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileEntryXml {
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(rename = "$text", default)]
    path: String,
}

// ---------------------------------------------------------------------------
// other
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "otherdata")]
struct OtherXml {
    #[serde(rename = "@xmlns", default)]
    xmlns: String,
    #[serde(rename = "@packages", default)]
    count: usize,
    #[serde(rename = "package", default, skip_serializing_if = "Vec::is_empty")]
    packages: Vec<OtherPackage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OtherPackage {
    #[serde(rename = "@pkgid", default)]
    pkgid: String,
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@arch", default)]
    arch: String,
    version: VersionXml,
    #[serde(rename = "changelog", default, skip_serializing_if = "Vec::is_empty")]
    changelogs: Vec<ChangelogXml>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChangelogXml {
    #[serde(rename = "@author", default)]
    author: String,
    #[serde(rename = "@date", default)]
    date: i64,
    #[serde(rename = "$text", default)]
    text: String,
}

// ---------------------------------------------------------------------------
// conversions
// ---------------------------------------------------------------------------

fn version_of(pkg: &Package) -> VersionXml {
    VersionXml {
        epoch: pkg.epoch.to_string(),
        ver: pkg.version.clone(),
        rel: pkg.release.clone(),
    }
}

fn entries_from_relations(rels: &[Relation]) -> Option<DepListXml> {
    if rels.is_empty() {
        return None;
    }
    let entries = rels
        .iter()
        .map(|r| DepEntryXml {
            name: r.name.clone(),
            flags: r.flags.clone(),
            epoch: r.epoch.to_string(),
            ver: r.version.clone(),
            rel: r.release.clone(),
            pre: if r.pre { "1".to_string() } else { String::new() },
        })
        .collect();
    Some(DepListXml { entries })
}

fn relations_from_entries(list: Option<DepListXml>) -> Vec<Relation> {
    list.map(|l| {
        l.entries
            .into_iter()
            .map(|e| Relation {
                name: e.name,
                flags: e.flags,
                epoch: parse_epoch(&e.epoch),
                version: e.ver,
                release: e.rel,
                pre: e.pre == "1",
            })
            .collect()
    })
    .unwrap_or_default()
}

pub(crate) fn render_primary(pkgs: &[&Package]) -> Result<Vec<u8>> {
    let packages = pkgs
        .iter()
        .map(|p| {
            let header_range = if p.header_start > 0 || p.header_end > 0 {
                Some(HeaderRangeXml {
                    start: p.header_start,
                    end: p.header_end,
                })
            } else {
                None
            };
            PrimaryPackage {
                pkg_type: "rpm".to_string(),
                name: p.name.clone(),
                arch: p.arch.clone(),
                version: version_of(p),
                checksum: PkgChecksumXml {
                    checksum_type: p.checksum_type.clone(),
                    pkgid: "YES".to_string(),
                    value: p.pkgid.clone(),
                },
                summary: p.summary.clone(),
                description: p.description.clone(),
                packager: p.packager.clone(),
                url: p.url.clone(),
                time: TimeXml {
                    file: p.time_file,
                    build: p.time_build,
                },
                size: SizeXml {
                    package: p.size_package,
                    installed: p.size_installed,
                    archive: p.size_archive,
                },
                location: LocationXml {
                    href: p.location.clone(),
                },
                format: FormatXml {
                    license: p.license.clone(),
                    vendor: p.vendor.clone(),
                    group: p.group.clone(),
                    buildhost: p.build_host.clone(),
                    sourcerpm: p.source_rpm.clone(),
                    header_range,
                    provides: entries_from_relations(&p.provides),
                    requires: entries_from_relations(&p.requires),
                    conflicts: entries_from_relations(&p.conflicts),
                    obsoletes: entries_from_relations(&p.obsoletes),
                },
            }
        })
        .collect();

    marshal_with_declaration(&PrimaryXml {
        xmlns: COMMON_NAMESPACE.to_string(),
        xmlns_rpm: RPM_NAMESPACE.to_string(),
        count: pkgs.len(),
        packages,
    })
}

pub(crate) fn render_filelists(pkgs: &[&Package]) -> Result<Vec<u8>> {
    let packages = pkgs
        .iter()
        .map(|p| FilelistsPackage {
            pkgid: p.pkgid.clone(),
            name: p.name.clone(),
            arch: p.arch.clone(),
            version: version_of(p),
            files: p
                .files
                .iter()
                .map(|f| FileEntryXml {
                    kind: if f.kind.is_empty() {
                        None
                    } else {
                        Some(f.kind.clone())
                    },
                    path: f.path.clone(),
                })
                .collect(),
        })
        .collect();

    marshal_with_declaration(&FilelistsXml {
        xmlns: FILELISTS_NAMESPACE.to_string(),
        count: pkgs.len(),
        packages,
    })
}

pub(crate) fn render_other(pkgs: &[&Package]) -> Result<Vec<u8>> {
    let packages = pkgs
        .iter()
        .map(|p| OtherPackage {
            pkgid: p.pkgid.clone(),
            name: p.name.clone(),
            arch: p.arch.clone(),
            version: version_of(p),
            changelogs: p
                .changelogs
                .iter()
                .map(|c| ChangelogXml {
                    author: c.author.clone(),
                    date: c.date,
                    text: c.text.clone(),
                })
                .collect(),
        })
        .collect();

    marshal_with_declaration(&OtherXml {
        xmlns: OTHER_NAMESPACE.to_string(),
        count: pkgs.len(),
        packages,
    })
}

fn from_utf8(data: &[u8], what: &str) -> Result<String> {
    String::from_utf8(data.to_vec())
        .map_err(|e| AppError::Parse(format!("{} is not UTF-8: {}", what, e)))
}

pub(crate) fn parse_packages(
    primary_xml: &[u8],
    filelists_xml: &[u8],
    other_xml: &[u8],
) -> Result<Vec<Package>> {
    let primary: PrimaryXml = quick_xml::de::from_str(&from_utf8(primary_xml, "primary")?)
        .map_err(|e| AppError::Parse(format!("primary: {}", e)))?;

    let mut pkgs = Vec::with_capacity(primary.packages.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(primary.packages.len());
    for p in primary.packages {
        let header_range = p.format.header_range.unwrap_or_default();
        let pkg = Package {
            name: p.name,
            arch: p.arch,
            epoch: parse_epoch(&p.version.epoch),
            version: p.version.ver,
            release: p.version.rel,
            summary: p.summary,
            description: p.description,
            license: p.format.license,
            vendor: p.format.vendor,
            group: p.format.group,
            build_host: p.format.buildhost,
            source_rpm: p.format.sourcerpm,
            url: p.url,
            packager: p.packager,
            time_build: p.time.build,
            time_file: p.time.file,
            size_package: p.size.package,
            size_installed: p.size.installed,
            size_archive: p.size.archive,
            location: p.location.href,
            pkgid: p.checksum.value,
            checksum_type: p.checksum.checksum_type,
            header_start: header_range.start,
            header_end: header_range.end,
            provides: relations_from_entries(p.format.provides),
            requires: relations_from_entries(p.format.requires),
            conflicts: relations_from_entries(p.format.conflicts),
            obsoletes: relations_from_entries(p.format.obsoletes),
            files: Vec::new(),
            changelogs: Vec::new(),
        };
        index.insert(pkg.pkgid.clone(), pkgs.len());
        pkgs.push(pkg);
    }

    if !filelists_xml.is_empty() {
        let filelists: FilelistsXml =
            quick_xml::de::from_str(&from_utf8(filelists_xml, "filelists")?)
                .map_err(|e| AppError::Parse(format!("filelists: {}", e)))?;
        for p in filelists.packages {
            if let Some(&i) = index.get(&p.pkgid) {
                pkgs[i].files = p
                    .files
                    .into_iter()
                    .map(|f| FileEntry {
                        path: f.path,
                        kind: f.kind.unwrap_or_default(),
                    })
                    .collect();
            }
        }
    }

    if !other_xml.is_empty() {
        let other: OtherXml = quick_xml::de::from_str(&from_utf8(other_xml, "other")?)
            .map_err(|e| AppError::Parse(format!("other: {}", e)))?;
        for p in other.packages {
            if let Some(&i) = index.get(&p.pkgid) {
                pkgs[i].changelogs = p
                    .changelogs
                    .into_iter()
                    .map(|c| Changelog {
                        author: c.author,
                        date: c.date,
                        text: c.text,
                    })
                    .collect();
            }
        }
    }

    Ok(pkgs)
}
