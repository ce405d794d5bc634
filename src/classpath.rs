//! Classpath and sourcepath resolution.
//!
//! Dependency resolution in host build tools routinely hands back files that
//! are not archives at all (a `.pom` resolved as a library, for one). Those are
//! dropped here without a diagnostic; only directories and archives that open
//! cleanly survive.

use std::path::{Path, PathBuf};

use crate::jar::Jar;

/// Keeps directories and readable archives, in input order.
pub fn resolve_classpath<I, P>(candidates: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    candidates
        .into_iter()
        .map(|p| p.as_ref().to_path_buf())
        .filter(|p| is_classpath_root(p))
        .collect()
}

/// Keeps candidates that exist; source roots get no archive check.
pub fn resolve_sourcepath<I, P>(candidates: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    candidates
        .into_iter()
        .map(|p| p.as_ref().to_path_buf())
        .filter(|p| {
            let exists = p.exists();
            if !exists {
                log::debug!("dropping missing sourcepath entry {}", p.display());
            }
            exists
        })
        .collect()
}

fn is_classpath_root(path: &Path) -> bool {
    if !path.exists() {
        log::debug!("dropping missing classpath entry {}", path.display());
        return false;
    }
    if path.is_dir() {
        return true;
    }
    match Jar::open(path) {
        Ok(_) => true,
        Err(e) => {
            log::debug!("dropping non-archive classpath entry {}: {e:#}", path.display());
            false
        }
    }
}

/// Joins paths with the platform path separator for reporting.
pub fn join_paths(paths: &[PathBuf]) -> String {
    std::env::join_paths(paths)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|_| {
            paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(if cfg!(windows) { ";" } else { ":" })
        })
}
