//! Remove packages from the repository.

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use super::Repository;
use crate::error::{AppError, Result};

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl Repository {
    /// Remove packages identified by filename (default) or NEVRA
    /// (`by_nevra`), optionally deleting the underlying RPM files, then
    /// rewrite the metadata. Any unresolved identifier aborts before any
    /// mutation. Returns accumulated warnings.
    pub async fn remove(
        &self,
        identifiers: &[String],
        by_nevra: bool,
        delete_files: bool,
        dry_run: bool,
    ) -> Result<Vec<String>> {
        if identifiers.is_empty() {
            return Err(AppError::InvalidInput("no identifiers provided".to_string()));
        }

        let (md, pkgs, alg) = self.load_packages().await?;

        let mut nevra_index: HashMap<String, usize> = HashMap::with_capacity(pkgs.len());
        let mut name_index: HashMap<String, usize> = HashMap::with_capacity(pkgs.len());
        for (i, p) in pkgs.iter().enumerate() {
            nevra_index.insert(p.nevra(), i);
            name_index.insert(basename(&p.location).to_string(), i);
        }

        let mut to_delete: HashSet<usize> = HashSet::with_capacity(identifiers.len());
        for id in identifiers {
            let found = if by_nevra {
                nevra_index.get(id)
            } else {
                name_index.get(id)
            };
            match found {
                Some(&i) => {
                    to_delete.insert(i);
                }
                None => {
                    return Err(AppError::NotFound(format!("package {}", id)));
                }
            }
        }

        let mut kept = Vec::with_capacity(pkgs.len() - to_delete.len());
        let mut delete_paths = Vec::with_capacity(to_delete.len());
        for (i, p) in pkgs.into_iter().enumerate() {
            if to_delete.contains(&i) {
                delete_paths.push(p.location);
            } else {
                kept.push(p);
            }
        }

        if delete_files && !dry_run {
            for path in &delete_paths {
                tracing::debug!(path = %path, "deleting rpm");
                self.backend.delete(&self.cancel, path).await?;
            }
        }

        if dry_run {
            return Ok(Vec::new());
        }
        let now = Utc::now().timestamp();
        self.write_metadata(&md, &kept, alg, now).await
    }
}
