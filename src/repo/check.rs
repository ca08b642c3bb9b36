//! Repository consistency check.

use std::collections::HashSet;

use serde::Serialize;

use super::rewrite::is_sqlite;
use super::Repository;
use crate::error::Result;
use crate::metadata::core::{load_repomd, read_and_verify_core, CoreFile};
use crate::metadata::model::parse_packages;
use crate::metadata::repomd::RepoData;

/// Accumulated outcome of a repository check: non-fatal warnings plus the
/// errors found across entries (empty on a healthy repository).
#[derive(Debug, Default, Serialize)]
pub struct CheckReport {
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub errors: Vec<String>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Single joined message across all accumulated errors.
    pub fn joined_errors(&self) -> String {
        self.errors.join("; ")
    }
}

impl Repository {
    /// Validate the repository: manifest loads, the three core entries are
    /// present and verify (sizes and both digests), every descriptor's RPM
    /// exists, and no unreferenced RPMs remain. Foreign metadata types
    /// other than `modules` produce warnings.
    pub async fn check(&self) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        let md = load_repomd(self.backend.as_ref(), &self.cancel).await?;

        let (primary, filelists, other) = md.core_entries();
        for (entry, name) in [
            (primary, "primary"),
            (filelists, "filelists"),
            (other, "other"),
        ] {
            if entry.is_none() {
                report
                    .errors
                    .push(format!("missing {} metadata in repomd.xml", name));
            }
        }

        let mut verified: Vec<Option<CoreFile>> = Vec::with_capacity(3);
        for entry in [primary, filelists, other].into_iter().flatten() {
            if is_sqlite(&entry.location.href) {
                report.errors.push(format!(
                    "core {}: unsupported sqlite-only metadata",
                    entry.data_type
                ));
                verified.push(None);
                continue;
            }
            match read_and_verify_core(self.backend.as_ref(), &self.cancel, entry).await {
                Ok(core) => {
                    self.check_recorded_sizes(entry, &core, &mut report.errors);
                    verified.push(Some(core));
                }
                Err(e) => {
                    report.errors.push(format!("core {}: {}", entry.data_type, e));
                    verified.push(None);
                }
            }
        }

        if let [Some(primary_core), Some(filelists_core), Some(other_core)] = &verified[..] {
            match parse_packages(
                &primary_core.uncompressed,
                &filelists_core.uncompressed,
                &other_core.uncompressed,
            ) {
                Ok(pkgs) => self.check_package_files(&pkgs, &mut report.errors).await,
                Err(e) => report.errors.push(format!("parse packages: {}", e)),
            }
        }

        for d in &md.data {
            if !matches!(
                d.data_type.as_str(),
                "primary" | "filelists" | "other" | "modules"
            ) {
                report.warnings.push(format!(
                    "preserving unknown metadata type '{}' from repomd.xml; checksum not verified",
                    d.data_type
                ));
            }
        }

        Ok(report)
    }

    fn check_recorded_sizes(&self, entry: &RepoData, core: &CoreFile, errors: &mut Vec<String>) {
        if entry.size != 0 && entry.size != core.size {
            errors.push(format!(
                "core {} size mismatch: repomd={} actual={}",
                entry.data_type, entry.size, core.size
            ));
        }
        if entry.open_size != 0 && entry.open_size != core.open_size {
            errors.push(format!(
                "core {} open-size mismatch: repomd={} actual={}",
                entry.data_type, entry.open_size, core.open_size
            ));
        }
    }

    async fn check_package_files(
        &self,
        pkgs: &[crate::metadata::Package],
        errors: &mut Vec<String>,
    ) {
        let rpm_list = match self.backend.list_rpms(&self.cancel).await {
            Ok(list) => list,
            Err(e) => {
                errors.push(format!("list rpms: {}", e));
                return;
            }
        };

        let mut expected: HashSet<&str> = HashSet::with_capacity(pkgs.len());
        for p in pkgs {
            if p.location.is_empty() {
                errors.push(format!("package {} missing location", p.nevra()));
                continue;
            }
            expected.insert(p.location.as_str());
            match self.backend.exists(&self.cancel, &p.location).await {
                Ok(true) => {}
                Ok(false) => {
                    errors.push(format!("rpm missing for {} ({})", p.nevra(), p.location));
                }
                Err(e) => errors.push(format!("exists {}: {}", p.location, e)),
            }
        }
        for rpm_path in &rpm_list {
            if !expected.contains(rpm_path.as_str()) {
                errors.push(format!("rpm present but not referenced: {}", rpm_path));
            }
        }
    }
}
