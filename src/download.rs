//! Lookup of finished artifacts in the results namespace.
//!
//! Pure lookup, no locking: an artifact the sweeper evicted between job
//! completion and download is simply not found.

use crate::error::GatewayError;
use crate::session::SessionToken;
use crate::store::{EphemeralStore, Namespace};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

/// MIME type of every artifact the service hands out.
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

static FILENAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]*$").unwrap());

/// Resolves `(token, filename)` pairs to files on disk.
#[derive(Debug, Clone)]
pub struct DownloadGateway {
    store: EphemeralStore,
}

impl DownloadGateway {
    pub fn new(store: EphemeralStore) -> Self {
        Self { store }
    }

    /// Path of `filename` in the token's result workspace.
    ///
    /// Malformed tokens and filenames that are not a single plain path
    /// component are reported exactly like a missing file.
    pub fn resolve(&self, raw_token: &str, filename: &str) -> Result<PathBuf, GatewayError> {
        let not_found = || GatewayError::ArtifactNotFound {
            token: raw_token.to_string(),
            filename: filename.to_string(),
        };

        let token = SessionToken::parse(raw_token).ok_or_else(not_found)?;
        if !is_plain_filename(filename) {
            return Err(not_found());
        }
        let workspace = self
            .store
            .resolve(&token, Namespace::Results)
            .ok_or_else(not_found)?;

        let path = workspace.join(filename);
        if path.is_file() {
            Ok(path)
        } else {
            Err(not_found())
        }
    }
}

/// `true` for names like `excel1.xlsx`; `false` for anything with a
/// separator, a leading dot or other characters.
pub fn is_plain_filename(name: &str) -> bool {
    FILENAME_RE.is_match(name)
}
