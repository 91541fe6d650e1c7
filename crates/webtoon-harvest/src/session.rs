//! Per-run working folders under a shared uploads root.
//!
//! Each extraction gets its own `<prefix>_<id>` folder. Which one is "latest"
//! is decided from an in-process registry of creation sequence numbers;
//! folders the registry has never seen (left by another process) rank below
//! every registered one and are ordered by mtime, then by name.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::HarvestConfig;
use crate::types::{CleanupReport, Counts, ExtractionSession, HarvestError, HarvestResult};

const ID_LEN: usize = 8;
const MAX_ID_ATTEMPTS: usize = 8;

#[derive(Debug, Default)]
struct Registry {
    next_seq: u64,
    /// Folder name → (creation sequence, creation time).
    sessions: HashMap<String, (u64, DateTime<Utc>)>,
}

/// A session folder found on disk, with its ranking key.
#[derive(Debug)]
struct FoundSession {
    name: String,
    path: PathBuf,
    seq: Option<u64>,
    mtime: SystemTime,
    created_at: DateTime<Utc>,
}

impl FoundSession {
    fn rank(&self) -> (Option<u64>, SystemTime, &str) {
        (self.seq, self.mtime, self.name.as_str())
    }
}

/// Allocates, ranks and reclaims extraction session folders.
#[derive(Debug, Clone)]
pub struct SessionManager {
    uploads_root: PathBuf,
    prefix: String,
    registry: Arc<Mutex<Registry>>,
}

impl SessionManager {
    pub fn new(uploads_root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            uploads_root: uploads_root.into(),
            prefix: prefix.into(),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(&config.uploads_root, &config.session_prefix)
    }

    pub fn uploads_root(&self) -> &Path {
        &self.uploads_root
    }

    /// Create an empty, uniquely named session folder.
    pub fn create_session(&self) -> HarvestResult<ExtractionSession> {
        std::fs::create_dir_all(&self.uploads_root)?;

        for _ in 0..MAX_ID_ATTEMPTS {
            let id: String = uuid::Uuid::new_v4()
                .simple()
                .to_string()
                .chars()
                .take(ID_LEN)
                .collect();
            let name = format!("{}_{id}", self.prefix);
            let folder_path = self.uploads_root.join(&name);

            match std::fs::create_dir(&folder_path) {
                Ok(()) => {
                    let created_at = Utc::now();
                    let mut reg = self.lock();
                    reg.next_seq += 1;
                    let seq = reg.next_seq;
                    reg.sessions.insert(name, (seq, created_at));
                    info!("Created session {} (#{seq})", folder_path.display());
                    return Ok(ExtractionSession {
                        id,
                        folder_path,
                        created_at,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(HarvestError::Io(std::io::Error::other(
            "could not allocate a unique session folder",
        )))
    }

    /// The most recent session folder, if any exists.
    pub fn latest_session(&self) -> HarvestResult<Option<ExtractionSession>> {
        Ok(self.scan()?.pop().map(|f| self.to_session(f)))
    }

    /// All session folders, oldest first.
    pub fn list_sessions(&self) -> HarvestResult<Vec<ExtractionSession>> {
        Ok(self
            .scan()?
            .into_iter()
            .map(|f| self.to_session(f))
            .collect())
    }

    /// Delete one session folder, returning how many files it held.
    pub fn remove_session(&self, session: &ExtractionSession) -> HarvestResult<usize> {
        let files = count_files(&session.folder_path);
        std::fs::remove_dir_all(&session.folder_path)?;
        self.lock().sessions.remove(&session.folder_name());
        Ok(files)
    }

    /// Folder and file totals across all session folders.
    pub fn counts(&self) -> HarvestResult<Counts> {
        let found = self.scan()?;
        Ok(Counts {
            folders: found.len(),
            files: found.iter().map(|f| count_files(&f.path)).sum(),
        })
    }

    /// Delete every session folder except the most recent one.
    pub fn cleanup_keep_latest(&self) -> HarvestResult<CleanupReport> {
        let mut found = self.scan()?;
        if let Some(latest) = found.pop() {
            info!("Keeping latest session {}", latest.name);
        }
        self.delete_all(found)
    }

    /// Delete every session folder.
    pub fn cleanup_all(&self) -> HarvestResult<CleanupReport> {
        let found = self.scan()?;
        self.delete_all(found)
    }

    fn delete_all(&self, doomed: Vec<FoundSession>) -> HarvestResult<CleanupReport> {
        let before = self.counts()?;
        let mut report = CleanupReport {
            before,
            ..Default::default()
        };

        for folder in doomed {
            let files = count_files(&folder.path);
            match std::fs::remove_dir_all(&folder.path) {
                Ok(()) => {
                    report.deleted_folders += 1;
                    report.deleted_files += files;
                    self.lock().sessions.remove(&folder.name);
                }
                Err(e) => warn!("Failed to delete {}: {e}", folder.path.display()),
            }
        }

        report.after = self.counts()?;
        info!(
            "Cleanup: deleted {} folders / {} files (before {} / {}, after {} / {})",
            report.deleted_folders,
            report.deleted_files,
            report.before.folders,
            report.before.files,
            report.after.folders,
            report.after.files
        );
        Ok(report)
    }

    /// Session folders on disk, sorted oldest → newest.
    fn scan(&self) -> HarvestResult<Vec<FoundSession>> {
        let entries = match std::fs::read_dir(&self.uploads_root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let marker = format!("{}_", self.prefix);
        let reg = self.lock();
        let mut found = Vec::new();

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&marker) {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if !meta.is_dir() {
                continue;
            }
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let registered = reg.sessions.get(&name).copied();
            found.push(FoundSession {
                seq: registered.map(|(seq, _)| seq),
                created_at: registered
                    .map(|(_, at)| at)
                    .unwrap_or_else(|| DateTime::<Utc>::from(mtime)),
                path: entry.path(),
                name,
                mtime,
            });
        }
        drop(reg);

        found.sort_by(|a, b| a.rank().cmp(&b.rank()));
        Ok(found)
    }

    fn to_session(&self, found: FoundSession) -> ExtractionSession {
        let id = found
            .name
            .strip_prefix(&format!("{}_", self.prefix))
            .unwrap_or(&found.name)
            .to_string();
        ExtractionSession {
            id,
            folder_path: found.path,
            created_at: found.created_at,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Regular files below `dir`, recursively. Unreadable entries count as zero.
pub(crate) fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(ft) if ft.is_dir() => count_files(&entry.path()),
            Ok(ft) if ft.is_file() => 1,
            _ => 0,
        })
        .sum()
}
