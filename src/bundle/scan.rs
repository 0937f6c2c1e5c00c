//! Content-root discovery inside an arbitrarily nested extracted archive.
//!
//! Browsers and desktop zip tools like to wrap a folder in extra folders,
//! and some leave behind empty directories. Discovery therefore walks the
//! tree pre-order, sorted by name, skips every subtree that holds no files
//! at all, and takes the first directory that directly contains a content
//! file. The walk order is fixed, so the same tree always yields the same
//! content root.

use crate::config::BundleLayout;
use crate::error::GatewayError;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of a discovery walk. Either field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Discovery {
    /// Directory directly containing the primary content files.
    pub content_root: Option<PathBuf>,
    /// Metadata file belonging to `content_root`.
    pub metadata: Option<PathBuf>,
}

impl Discovery {
    /// Turn a partial discovery into the discovery error a caller should see.
    pub fn into_result(self, layout: &BundleLayout) -> Result<(PathBuf, PathBuf), GatewayError> {
        let content_root = self
            .content_root
            .ok_or_else(|| GatewayError::ContentRootNotFound {
                extension: layout.content_extension.clone(),
            })?;
        let metadata = self.metadata.ok_or_else(|| GatewayError::MetadataNotFound {
            filename: layout.metadata_filename.clone(),
            subdir: layout.metadata_subdir.clone(),
        })?;
        Ok((content_root, metadata))
    }
}

/// Locate the content root under `tree_root` and its metadata file.
pub fn find_content_root(tree_root: &Path, layout: &BundleLayout) -> Discovery {
    let Some(content_root) = first_dir_where(tree_root, &|dir| {
        sorted_entries(dir)
            .iter()
            .any(|(name, kind)| *kind == Kind::File && layout.is_content_file(name))
    }) else {
        debug!("No content root under {}", tree_root.display());
        return Discovery::default();
    };

    debug!("Content root: {}", content_root.display());
    let metadata = locate_metadata(&content_root, layout);
    Discovery {
        content_root: Some(content_root),
        metadata,
    }
}

/// Find the metadata file for a content root.
///
/// Search order: `<root>/<subdir>/`, then `<root>/` itself, then a full
/// recursive walk of `<root>` (skipping empty subtrees) for the first
/// directory holding a file with the metadata filename.
pub fn locate_metadata(content_root: &Path, layout: &BundleLayout) -> Option<PathBuf> {
    let name = layout.metadata_filename.as_str();

    let in_subdir = content_root.join(&layout.metadata_subdir).join(name);
    if in_subdir.is_file() {
        return Some(in_subdir);
    }

    let beside = content_root.join(name);
    if beside.is_file() {
        return Some(beside);
    }

    let found = first_dir_where(content_root, &|dir| dir.join(name).is_file())?;
    debug!("Metadata found by deep scan in {}", found.display());
    Some(found.join(name))
}

/// `true` when neither `dir` nor anything beneath it is a file.
///
/// Unreadable directories count as empty.
pub fn is_empty_tree(dir: &Path) -> bool {
    sorted_entries(dir).iter().all(|(name, kind)| match kind {
        Kind::File => false,
        Kind::Dir => is_empty_tree(&dir.join(name)),
        Kind::Other => true,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    File,
    Dir,
    Other,
}

/// Pre-order walk; returns the first non-empty directory satisfying `pred`.
fn first_dir_where(dir: &Path, pred: &dyn Fn(&Path) -> bool) -> Option<PathBuf> {
    if is_empty_tree(dir) {
        return None;
    }
    if pred(dir) {
        return Some(dir.to_path_buf());
    }
    sorted_entries(dir)
        .into_iter()
        .filter(|(_, kind)| *kind == Kind::Dir)
        .find_map(|(name, _)| first_dir_where(&dir.join(name), pred))
}

/// Directory entries sorted by name. Symlinks are never followed.
fn sorted_entries(dir: &Path) -> Vec<(String, Kind)> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut entries: Vec<(String, Kind)> = read
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let kind = match entry.file_type() {
                Ok(t) if t.is_file() => Kind::File,
                Ok(t) if t.is_dir() => Kind::Dir,
                Ok(_) => Kind::Other,
                Err(_) => return None,
            };
            Some((entry.file_name().to_string_lossy().into_owned(), kind))
        })
        .collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
    entries
}
