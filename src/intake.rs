//! Archive intake: persist an uploaded zip into a fresh workspace and unpack it.
//!
//! Intake does not look at the bundle's content. A corrupt container fails
//! here; a valid zip with the wrong shape is unpacked and left for discovery
//! to reject with a more specific message.
//!
//! ## Archive safety
//!
//! Entry names come from the client. Every name is checked before anything
//! is written: absolute paths, `..` escapes and symlink entries reject the
//! whole archive. The total decompressed size is capped as well.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::session::SessionToken;
use crate::store::{EphemeralStore, Namespace, EXTRACTED_DIR};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Name used when the client did not declare a usable filename.
pub const DEFAULT_ARCHIVE_NAME: &str = "uploaded.zip";

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Accepts uploads into the intake namespace.
#[derive(Debug, Clone)]
pub struct ArchiveIntake {
    store: EphemeralStore,
    max_upload_bytes: u64,
    max_extracted_bytes: u64,
}

impl ArchiveIntake {
    pub fn new(store: EphemeralStore, config: &GatewayConfig) -> Self {
        Self {
            store,
            max_upload_bytes: config.max_upload_bytes,
            max_extracted_bytes: config.max_extracted_bytes,
        }
    }

    /// Persist `stream` under the token's new intake workspace and unpack it
    /// into `extracted/`. Returns the extraction root.
    ///
    /// On any failure the partially-written workspace is removed.
    pub async fn ingest<S, B, E>(
        &self,
        token: &SessionToken,
        stream: S,
        declared_filename: Option<&str>,
    ) -> Result<PathBuf, GatewayError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let workspace = self.store.create_intake(token)?;
        let result = self.ingest_into(&workspace, stream, declared_filename).await;

        if let Err(ref e) = result {
            warn!("Intake for session {} failed: {}", token, e);
            if let Err(cleanup) = self.store.discard(token, Namespace::Intake) {
                warn!("Could not remove intake workspace {}: {}", workspace.display(), cleanup);
            }
        }
        result
    }

    async fn ingest_into<S, B, E>(
        &self,
        workspace: &Path,
        stream: S,
        declared_filename: Option<&str>,
    ) -> Result<PathBuf, GatewayError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let archive_path = workspace.join(archive_file_name(declared_filename));
        let size = self.persist(workspace, &archive_path, stream).await?;
        info!("Stored upload {} ({} bytes)", archive_path.display(), size);

        let extract_dir = workspace.join(EXTRACTED_DIR);
        let limit = self.max_extracted_bytes;
        let dest = extract_dir.clone();
        let files = tokio::task::spawn_blocking(move || extract_zip(&archive_path, &dest, limit))
            .await
            .map_err(|e| GatewayError::Internal(format!("Extraction task panicked: {e}")))??;
        info!("Extracted {} files into {}", files, extract_dir.display());

        Ok(extract_dir)
    }

    /// Stream the upload to a temp file in `workspace`, then rename it into
    /// place, so a half-written archive never carries the final name.
    async fn persist<S, B, E>(
        &self,
        workspace: &Path,
        archive_path: &Path,
        stream: S,
    ) -> Result<u64, GatewayError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let write_err = |source: io::Error| GatewayError::IntakeWrite {
            path: archive_path.to_path_buf(),
            source,
        };

        let (file, temp_path) = tempfile::NamedTempFile::new_in(workspace)
            .map_err(write_err)?
            .into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut stream = std::pin::pin!(stream);
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| write_err(io::Error::other(e.to_string())))?;
            let bytes = chunk.as_ref();
            written += bytes.len() as u64;
            if written > self.max_upload_bytes {
                return Err(GatewayError::UploadTooLarge {
                    limit: self.max_upload_bytes,
                });
            }
            file.write_all(bytes).await.map_err(write_err)?;
        }
        file.flush().await.map_err(write_err)?;
        drop(file);

        temp_path
            .persist(archive_path)
            .map_err(|e| write_err(e.error))?;
        Ok(written)
    }
}

/// Reduce a client-declared filename to a safe single path component.
pub fn archive_file_name(declared: Option<&str>) -> String {
    declared
        .and_then(|d| d.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| !name.is_empty() && !name.starts_with('.') && *name != EXTRACTED_DIR)
        .unwrap_or(DEFAULT_ARCHIVE_NAME)
        .to_string()
}

/// Unpack `archive` into `dest`, refusing unsafe entries.
///
/// Returns the number of files written.
pub fn extract_zip(archive: &Path, dest: &Path, max_bytes: u64) -> Result<usize, GatewayError> {
    let corrupt = |detail: String| GatewayError::CorruptArchive { detail };

    let file = File::open(archive).map_err(|source| GatewayError::IntakeWrite {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;

    // Check every name up front so a bad entry late in the archive leaves
    // nothing behind.
    for i in 0..zip.len() {
        let entry = zip.by_index(i).map_err(|e| corrupt(e.to_string()))?;
        let is_symlink = entry
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK);
        if entry.enclosed_name().is_none() || is_symlink {
            return Err(GatewayError::UnsafeArchiveEntry {
                entry: entry.name().to_string(),
            });
        }
    }

    fs::create_dir_all(dest).map_err(|source| GatewayError::IntakeWrite {
        path: dest.to_path_buf(),
        source,
    })?;

    let mut total: u64 = 0;
    let mut files = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| corrupt(e.to_string()))?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(GatewayError::UnsafeArchiveEntry {
                entry: entry.name().to_string(),
            });
        };
        let out = dest.join(rel);
        let io_err = |source: io::Error| GatewayError::IntakeWrite {
            path: out.clone(),
            source,
        };

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(io_err)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let name = entry.name().to_string();
        let mut target = File::create(&out).map_err(io_err)?;
        let budget = (max_bytes - total).saturating_add(1);
        let copied = io::copy(&mut entry.by_ref().take(budget), &mut target)
            .map_err(|e| corrupt(format!("{name}: {e}")))?;
        total += copied;
        if total > max_bytes {
            return Err(corrupt(format!(
                "archive expands beyond the {max_bytes}-byte limit"
            )));
        }
        files += 1;
        debug!("Extracted {}", out.display());
    }

    Ok(files)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::stream;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Build an in-memory zip. Names ending in `/` become directories.
    pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, body) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn intake(tmp: &TempDir, config: &GatewayConfig) -> (ArchiveIntake, EphemeralStore) {
        let store = EphemeralStore::new(tmp.path().join("temp"), tmp.path().join("output"));
        (ArchiveIntake::new(store.clone(), config), store)
    }

    fn chunks(bytes: Vec<u8>) -> impl Stream<Item = Result<Vec<u8>, io::Error>> {
        let parts: Vec<Result<Vec<u8>, io::Error>> =
            bytes.chunks(7).map(|c| Ok(c.to_vec())).collect();
        stream::iter(parts)
    }

    #[tokio::test]
    async fn ingest_persists_and_unpacks() {
        let tmp = TempDir::new().unwrap();
        let (intake, store) = intake(&tmp, &GatewayConfig::default());
        let token = SessionToken::generate();
        let archive = zip_bytes(&[
            ("root/", ""),
            ("root/a.dita", "<topic/>"),
            ("root/out/infotree.xml", "<tree/>"),
            ("root/empty/", ""),
        ]);

        let extracted = intake
            .ingest(&token, chunks(archive), Some("C:\\Users\\me\\bundle.zip"))
            .await
            .unwrap();

        let workspace = store.resolve(&token, Namespace::Intake).unwrap();
        assert_eq!(extracted, workspace.join("extracted"));
        assert!(workspace.join("bundle.zip").is_file());
        assert!(extracted.join("root/a.dita").is_file());
        assert!(extracted.join("root/out/infotree.xml").is_file());
        assert!(extracted.join("root/empty").is_dir());
    }

    #[tokio::test]
    async fn corrupt_archive_fails_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let (intake, store) = intake(&tmp, &GatewayConfig::default());
        let token = SessionToken::generate();

        let err = intake
            .ingest(&token, chunks(b"definitely not a zip".to_vec()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CorruptArchive { .. }), "{err}");
        assert!(store.resolve(&token, Namespace::Intake).is_none());
    }

    #[tokio::test]
    async fn traversal_entries_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let (intake, _) = intake(&tmp, &GatewayConfig::default());
        let archive = zip_bytes(&[("ok.dita", "x"), ("../../escape.txt", "pwned")]);

        let err = intake
            .ingest(&SessionToken::generate(), chunks(archive), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnsafeArchiveEntry { .. }), "{err}");
        assert!(!tmp.path().join("escape.txt").exists());
        assert!(!tmp.path().join("temp/escape.txt").exists());
    }

    #[tokio::test]
    async fn oversized_upload_is_refused() {
        let tmp = TempDir::new().unwrap();
        let config = GatewayConfig::builder().max_upload_bytes(16).build().unwrap();
        let (intake, _) = intake(&tmp, &config);
        let err = intake
            .ingest(&SessionToken::generate(), chunks(vec![0u8; 64]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UploadTooLarge { limit: 16 }));
    }

    #[test]
    fn decompressed_size_is_capped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.zip");
        let body = "a".repeat(4096);
        fs::write(&path, zip_bytes(&[("a.txt", body.as_str())])).unwrap();
        let err = extract_zip(&path, &tmp.path().join("x"), 1024).unwrap_err();
        assert!(err.to_string().contains("1024"), "{err}");
    }

    #[test]
    fn declared_names_are_sanitised() {
        assert_eq!(archive_file_name(Some("bundle.zip")), "bundle.zip");
        assert_eq!(archive_file_name(Some("../../x/bundle.zip")), "bundle.zip");
        assert_eq!(archive_file_name(Some("..")), DEFAULT_ARCHIVE_NAME);
        assert_eq!(archive_file_name(Some("extracted")), DEFAULT_ARCHIVE_NAME);
        assert_eq!(archive_file_name(Some("dir/")), DEFAULT_ARCHIVE_NAME);
        assert_eq!(archive_file_name(None), DEFAULT_ARCHIVE_NAME);
    }
}
