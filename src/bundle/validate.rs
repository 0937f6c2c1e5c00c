//! Canonical-shape validation of a discovered content root.
//!
//! Discovery is lenient about where the metadata file lives; validation is
//! not. A bundle passes only when the metadata file sits directly in the
//! content root or in its metadata subdirectory.

use crate::config::BundleLayout;
use crate::error::GatewayError;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Verdict of [`validate`]: pass/fail plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: String,
    /// Number of content files directly in the root (0 on failure).
    pub content_files: usize,
}

impl ValidationResult {
    fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            content_files: 0,
        }
    }

    /// Convert a failing verdict into [`GatewayError::InvalidLayout`].
    pub fn into_result(self) -> Result<Self, GatewayError> {
        if self.valid {
            Ok(self)
        } else {
            Err(GatewayError::InvalidLayout {
                message: self.message,
            })
        }
    }
}

/// Check `content_root` against the canonical bundle shape.
///
/// Checks run in order and stop at the first failure:
/// 1. the directory exists
/// 2. it directly contains at least one content file
/// 3. the metadata file is in the root or in `<root>/<metadata_subdir>/`
pub fn validate(content_root: &Path, layout: &BundleLayout) -> ValidationResult {
    if !content_root.is_dir() {
        return ValidationResult::fail(format!(
            "folder '{}' does not exist",
            content_root.display()
        ));
    }

    let content_files = count_content_files(content_root, layout);
    if content_files == 0 {
        return ValidationResult::fail(format!(
            "no .{} files found directly in the content folder",
            layout.content_extension
        ));
    }

    let beside = content_root.join(&layout.metadata_filename);
    let below = content_root
        .join(&layout.metadata_subdir)
        .join(&layout.metadata_filename);
    if !beside.is_file() && !below.is_file() {
        return ValidationResult::fail(format!(
            "missing {} (expected in the content folder or its {}/ subfolder)",
            layout.metadata_filename, layout.metadata_subdir
        ));
    }

    ValidationResult {
        valid: true,
        message: format!(
            "Validation passed: found {} .{} file{}",
            content_files,
            layout.content_extension,
            if content_files == 1 { "" } else { "s" }
        ),
        content_files,
    }
}

fn count_content_files(dir: &Path, layout: &BundleLayout) -> usize {
    fs::read_dir(dir)
        .map(|read| {
            read.filter_map(Result::ok)
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .filter(|e| layout.is_content_file(&e.file_name().to_string_lossy()))
                .count()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bundle_with(meta: Option<&str>) -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.dita"), b"<topic/>").unwrap();
        if let Some(rel) = meta {
            let p = tmp.path().join(rel);
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, b"<tree/>").unwrap();
        }
        tmp
    }

    #[test]
    fn metadata_under_out_passes() {
        let tmp = bundle_with(Some("out/infotree.xml"));
        let r = validate(tmp.path(), &BundleLayout::default());
        assert!(r.valid, "{}", r.message);
        assert_eq!(r.content_files, 1);
        assert!(r.message.contains("1 .dita file"), "{}", r.message);
    }

    #[test]
    fn metadata_beside_content_passes() {
        let tmp = bundle_with(Some("infotree.xml"));
        assert!(validate(tmp.path(), &BundleLayout::default()).valid);
    }

    #[test]
    fn missing_metadata_fails() {
        let tmp = bundle_with(None);
        let r = validate(tmp.path(), &BundleLayout::default());
        assert!(!r.valid);
        assert!(r.message.contains("infotree.xml"));
    }

    #[test]
    fn deep_metadata_is_not_canonical() {
        let tmp = bundle_with(Some("build/meta/infotree.xml"));
        assert!(!validate(tmp.path(), &BundleLayout::default()).valid);
    }

    #[test]
    fn missing_folder_and_missing_content_fail_in_order() {
        let tmp = TempDir::new().unwrap();
        let r = validate(&tmp.path().join("nope"), &BundleLayout::default());
        assert!(r.message.contains("does not exist"));

        fs::write(tmp.path().join("infotree.xml"), b"").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/nested.dita"), b"").unwrap();
        let r = validate(tmp.path(), &BundleLayout::default());
        assert!(r.message.contains("no .dita files"), "{}", r.message);
    }

    #[test]
    fn counts_only_direct_content_files() {
        let tmp = bundle_with(Some("out/infotree.xml"));
        fs::write(tmp.path().join("b.dita"), b"").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"").unwrap();
        fs::write(tmp.path().join("out/c.dita"), b"").unwrap();
        let r = validate(tmp.path(), &BundleLayout::default()).into_result().unwrap();
        assert_eq!(r.content_files, 2);
    }
}
