//! Ephemeral, token-keyed workspaces on the local filesystem.
//!
//! Two flat namespaces, each a directory of `<token>/` workspaces:
//!
//! ```text
//! temp/<token>/                 intake: uploaded archive + extracted/
//! output/<token>/               results: json_output/, excel1.xlsx, excel2.xlsx
//! ```
//!
//! Nothing is persisted beyond the directories themselves. The sweeper may
//! delete any workspace at any time, so every lookup treats a vanished
//! directory as "absent" rather than as an error.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::session::SessionToken;
use filetime::FileTime;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Name of the extraction directory inside an intake workspace.
pub const EXTRACTED_DIR: &str = "extracted";

/// The two workspace namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Intake,
    Results,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Namespace::Intake => "intake",
            Namespace::Results => "results",
        })
    }
}

/// One workspace directory as seen by [`EphemeralStore::list_sessions`].
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Directory name. Usually a token, but the sweeper also sees strays.
    pub name: String,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Owner of the intake and results roots.
#[derive(Debug, Clone)]
pub struct EphemeralStore {
    intake_root: PathBuf,
    results_root: PathBuf,
}

impl EphemeralStore {
    pub fn new(intake_root: impl Into<PathBuf>, results_root: impl Into<PathBuf>) -> Self {
        Self {
            intake_root: intake_root.into(),
            results_root: results_root.into(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(&config.intake_root, &config.results_root)
    }

    /// Create both roots if they do not exist yet.
    pub fn ensure_roots(&self) -> io::Result<()> {
        fs::create_dir_all(&self.intake_root)?;
        fs::create_dir_all(&self.results_root)
    }

    pub fn root(&self, ns: Namespace) -> &Path {
        match ns {
            Namespace::Intake => &self.intake_root,
            Namespace::Results => &self.results_root,
        }
    }

    /// Path a token's workspace has (or would have) in `ns`.
    pub fn workspace_path(&self, token: &SessionToken, ns: Namespace) -> PathBuf {
        self.root(ns).join(token.as_str())
    }

    /// Create a fresh intake workspace. Fails if it already exists.
    pub fn create_intake(&self, token: &SessionToken) -> Result<PathBuf, GatewayError> {
        let path = self.workspace_path(token, Namespace::Intake);
        fs::create_dir_all(&self.intake_root)
            .and_then(|_| fs::create_dir(&path))
            .map_err(|source| GatewayError::IntakeWrite {
                path: path.clone(),
                source,
            })?;
        debug!("Created intake workspace {}", path.display());
        Ok(path)
    }

    /// Create (or reuse) the result workspace for `token`.
    pub fn create_result(&self, token: &SessionToken) -> Result<PathBuf, GatewayError> {
        let path = self.workspace_path(token, Namespace::Results);
        fs::create_dir_all(&path).map_err(|e| {
            GatewayError::Internal(format!(
                "Failed to create result workspace '{}': {e}",
                path.display()
            ))
        })?;
        Ok(path)
    }

    /// The token's workspace in `ns`, or `None` if it does not exist.
    pub fn resolve(&self, token: &SessionToken, ns: Namespace) -> Option<PathBuf> {
        let path = self.workspace_path(token, ns);
        path.is_dir().then_some(path)
    }

    /// Mark a workspace as just used so the sweeper measures its age from now.
    pub fn touch(&self, token: &SessionToken, ns: Namespace) -> io::Result<()> {
        filetime::set_file_mtime(self.workspace_path(token, ns), FileTime::now())
    }

    /// Remove a token's workspace. A workspace that is already gone is fine.
    pub fn discard(&self, token: &SessionToken, ns: Namespace) -> io::Result<()> {
        match fs::remove_dir_all(self.workspace_path(token, ns)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Every top-level workspace directory in `ns` with its mtime.
    ///
    /// A missing root yields an empty list; entries that vanish mid-listing
    /// are skipped.
    pub fn list_sessions(&self, ns: Namespace) -> io::Result<Vec<SessionEntry>> {
        let read = match fs::read_dir(self.root(ns)) {
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut entries: Vec<SessionEntry> = read
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                if !meta.is_dir() {
                    return None;
                }
                Some(SessionEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    path: entry.path(),
                    modified: meta.modified().ok()?,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> EphemeralStore {
        EphemeralStore::new(tmp.path().join("temp"), tmp.path().join("output"))
    }

    #[test]
    fn create_and_resolve_per_namespace() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let token = SessionToken::generate();

        assert!(store.resolve(&token, Namespace::Intake).is_none());
        let intake = store.create_intake(&token).unwrap();
        assert_eq!(store.resolve(&token, Namespace::Intake), Some(intake));
        assert!(store.resolve(&token, Namespace::Results).is_none());

        let result = store.create_result(&token).unwrap();
        assert_eq!(store.create_result(&token).unwrap(), result, "reusable");
        assert!(result.starts_with(tmp.path().join("output")));
    }

    #[test]
    fn intake_creation_never_reuses_a_workspace() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let token = SessionToken::generate();
        store.create_intake(&token).unwrap();
        assert!(matches!(
            store.create_intake(&token),
            Err(GatewayError::IntakeWrite { .. })
        ));
    }

    #[test]
    fn vanished_workspace_resolves_to_none() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let token = SessionToken::generate();
        store.create_intake(&token).unwrap();
        store.discard(&token, Namespace::Intake).unwrap();
        assert!(store.resolve(&token, Namespace::Intake).is_none());
        store.discard(&token, Namespace::Intake).unwrap();
    }

    #[test]
    fn list_sessions_skips_files_and_missing_roots() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(store.list_sessions(Namespace::Results).unwrap().is_empty());

        let a = SessionToken::generate();
        let b = SessionToken::generate();
        store.create_intake(&a).unwrap();
        store.create_intake(&b).unwrap();
        fs::write(store.root(Namespace::Intake).join("stray.txt"), b"").unwrap();

        let listed = store.list_sessions(Namespace::Intake).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|e| e.name == a.as_str()));
    }

    #[test]
    fn touch_refreshes_mtime() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let token = SessionToken::generate();
        let path = store.create_intake(&token).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_000, 0)).unwrap();

        store.touch(&token, Namespace::Intake).unwrap();
        let listed = store.list_sessions(Namespace::Intake).unwrap();
        let age = SystemTime::now()
            .duration_since(listed[0].modified)
            .unwrap_or_default();
        assert!(age.as_secs() < 60);
    }
}
