//! Durable PR document store.
//!
//! One file per `(provider, id)` under the store directory. Every access to
//! a document holds an exclusive advisory lock on a sibling lock file, so the
//! CLI and the daemon (separate processes) never interleave a
//! read-modify-write. Lock files are never removed: a waiter that opened
//! one must contend with every later caller on the same inode. Writes go to
//! a temp file that is renamed over the document, so a crash never leaves a
//! half-written file behind.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tempfile::NamedTempFile;
use tokio::time::Instant;

use crate::error::AppError;
use crate::models::PrDocument;

/// How long to wait for a document lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between lock attempts.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive lock on one document, released on drop.
#[derive(Debug)]
pub struct DocLock {
    file: File,
    path: PathBuf,
}

impl Drop for DocLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::debug!("[store] Unlock of {} failed: {}", self.path.display(), e);
        }
    }
}

/// File-backed store of [`PrDocument`]s.
#[derive(Debug, Clone)]
pub struct PrStore {
    dir: PathBuf,
    lock_timeout: Duration,
}

impl PrStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::store_at(format!("Failed to create store directory: {}", e), dir.display().to_string())
        })?;
        Ok(Self {
            dir,
            lock_timeout: LOCK_TIMEOUT,
        })
    }

    /// Override the lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Document path for a `(provider, id)` pair.
    pub fn path_for(&self, provider: &str, id: i64) -> PathBuf {
        self.dir.join(PrDocument::file_name_for(provider, id))
    }

    fn lock_path_for(&self, provider: &str, id: i64) -> PathBuf {
        self.dir
            .join(format!(".{}.lock", PrDocument::file_name_for(provider, id)))
    }

    /// Acquire the document lock, polling until the timeout elapses.
    ///
    /// Waiting yields to the runtime between attempts.
    pub async fn lock(&self, provider: &str, id: i64) -> Result<DocLock, AppError> {
        let path = self.lock_path_for(provider, id);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| AppError::lock(format!("Failed to open {}: {}", path.display(), e)))?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(DocLock { file, path }),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(AppError::lock(format!(
                            "Timed out after {:?} waiting for {}",
                            self.lock_timeout,
                            path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(e) => {
                    return Err(AppError::lock(format!(
                        "Failed to lock {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
    }

    pub fn exists(&self, provider: &str, id: i64) -> bool {
        self.path_for(provider, id).is_file()
    }

    /// Load one document.
    pub async fn load(&self, provider: &str, id: i64) -> Result<PrDocument, AppError> {
        let _lock = self.lock(provider, id).await?;
        self.read_locked(&self.path_for(provider, id))
    }

    /// Write one document, replacing any previous version.
    pub async fn save(&self, doc: &PrDocument) -> Result<(), AppError> {
        let _lock = self.lock(&doc.provider, doc.id).await?;
        self.write_locked(doc)
    }

    /// Create a document; fails if one already exists.
    pub async fn create(&self, doc: &PrDocument) -> Result<(), AppError> {
        let _lock = self.lock(&doc.provider, doc.id).await?;
        if self.exists(&doc.provider, doc.id) {
            return Err(AppError::invalid_input(format!(
                "PR {} is already tracked",
                doc.file_name()
            )));
        }
        self.write_locked(doc)
    }

    /// Load, mutate and save under a single lock.
    pub async fn update<F>(&self, provider: &str, id: i64, mutate: F) -> Result<PrDocument, AppError>
    where
        F: FnOnce(&mut PrDocument) -> Result<(), AppError>,
    {
        let _lock = self.lock(provider, id).await?;
        let mut doc = self.read_locked(&self.path_for(provider, id))?;
        mutate(&mut doc)?;
        self.write_locked(&doc)?;
        Ok(doc)
    }

    /// Remove a document. Its lock file stays behind.
    pub async fn delete(&self, provider: &str, id: i64) -> Result<(), AppError> {
        let path = self.path_for(provider, id);
        let _lock = self.lock(provider, id).await?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::not_found_with_id(
                    "PrDocument",
                    PrDocument::file_name_for(provider, id),
                ))
            }
            Err(e) => {
                return Err(AppError::store_at(
                    format!("Failed to delete document: {}", e),
                    path.display().to_string(),
                ))
            }
        }
        log::info!("[store] Deleted {}", path.display());
        Ok(())
    }

    /// Every readable document, ordered by provider then ID.
    ///
    /// Unparseable documents are logged and skipped. Lock failures are errors.
    pub async fn list(&self) -> Result<Vec<PrDocument>, AppError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            AppError::store_at(
                format!("Failed to read store directory: {}", e),
                self.dir.display().to_string(),
            )
        })?;

        let mut docs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some((provider, id)) = parse_file_name(name) else {
                continue;
            };

            let _lock = self.lock(provider, id).await?;
            match self.read_locked(&entry.path()) {
                Ok(doc) => docs.push(doc),
                Err(e) => log::warn!("[store] Skipping unreadable document {}: {}", name, e),
            }
        }

        docs.sort_by(|a, b| (&a.provider, a.id).cmp(&(&b.provider, b.id)));
        Ok(docs)
    }

    fn read_locked(&self, path: &Path) -> Result<PrDocument, AppError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::not_found_with_id(
                    "PrDocument",
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                ))
            }
            Err(e) => {
                return Err(AppError::store_at(
                    format!("Failed to read document: {}", e),
                    path.display().to_string(),
                ))
            }
        };
        PrDocument::parse(&content)
    }

    fn write_locked(&self, doc: &PrDocument) -> Result<(), AppError> {
        let path = self.path_for(&doc.provider, doc.id);
        let rendered = doc.render()?;
        let store_err = |e: std::io::Error| {
            AppError::store_at(
                format!("Failed to write document: {}", e),
                path.display().to_string(),
            )
        };

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(store_err)?;
        tmp.write_all(rendered.as_bytes()).map_err(store_err)?;
        tmp.as_file().sync_all().map_err(store_err)?;
        tmp.persist(&path).map_err(|e| store_err(e.error))?;
        Ok(())
    }
}

/// Split `{provider}__{id}`; anything else (lock and temp files) is `None`.
fn parse_file_name(name: &str) -> Option<(&str, i64)> {
    if name.starts_with('.') {
        return None;
    }
    let (provider, id) = name.rsplit_once("__")?;
    if provider.is_empty() {
        return None;
    }
    Some((provider, id.parse().ok()?))
}
