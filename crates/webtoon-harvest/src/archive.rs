//! Portable project bundles: state document plus deduplicated images.
//!
//! A bundle is a ZIP container holding `project_data.json` and the files of
//! one session folder under `images/`. Identical image bytes are stored once
//! per bundle (SHA-256). Restoring validates and decodes the state document
//! in full before the project store is touched, so a bad bundle never leaves
//! half-written state behind.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::config::HarvestConfig;
use crate::project::{ProjectState, ProjectStore};
use crate::session::SessionManager;
use crate::types::{AssetInfo, ExtractionSession, HarvestError, HarvestResult};

/// Name of the state document inside a bundle.
pub const STATE_ENTRY: &str = "project_data.json";
/// Directory prefix for image entries.
pub const IMAGES_PREFIX: &str = "images/";

const MAX_LISTED_ENTRIES: usize = 20;
const PREVIEW_CHARS: usize = 120;
/// Largest image entry a restore will write out.
pub const MAX_ENTRY_BYTES: u64 = 16 * 1024 * 1024;

/// Result of restoring a bundle.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub project_state: ProjectState,
    /// Session the images were restored into; `None` when the bundle had none.
    pub session: Option<ExtractionSession>,
    pub assets: Vec<AssetInfo>,
    /// Image entries that could not be extracted.
    pub failures: Vec<String>,
}

/// Build a bundle from a project state and an optional session folder.
pub fn pack(state: &ProjectState, session_folder: Option<&Path>) -> HarvestResult<Vec<u8>> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(tempfile::tempfile()?);

    zip.start_file(STATE_ENTRY, options)?;
    zip.write_all(&serde_json::to_vec_pretty(state)?)?;

    let mut added = 0usize;
    let mut skipped = 0usize;
    if let Some(folder) = session_folder.filter(|p| p.is_dir()) {
        let mut files = Vec::new();
        collect_files(folder, &mut files)?;
        files.sort();

        let mut seen: HashSet<String> = HashSet::new();
        for path in files {
            let bytes = std::fs::read(&path)?;
            let hash = sha256_hex(&bytes);
            if !seen.insert(hash) {
                debug!("Skipping duplicate content {}", path.display());
                skipped += 1;
                continue;
            }
            zip.start_file(entry_name(folder, &path), options)?;
            zip.write_all(&bytes)?;
            added += 1;
        }
    }

    let mut file = zip.finish()?;
    file.seek(SeekFrom::Start(0))?;
    let mut out = Vec::new();
    file.read_to_end(&mut out)?;

    info!(
        "Packed bundle: {added} images, {skipped} duplicates skipped, {} bytes",
        out.len()
    );
    Ok(out)
}

/// Decode and validate raw state-document bytes.
///
/// Rejects HTML error pages, tries UTF-8, UTF-8 with BOM, windows-1252 and
/// ISO-8859-15 in turn, and requires a JSON object.
pub fn decode_state_document(raw: &[u8]) -> HarvestResult<ProjectState> {
    let head = String::from_utf8_lossy(strip_bom(&raw[..raw.len().min(512)])).into_owned();
    let head = head.trim_start();
    if head.starts_with('<') {
        return Err(HarvestError::structural(
            "state document is an HTML page, not project data",
            vec![format!("preview: {}", preview(head))],
        ));
    }

    let mut failures = Vec::new();
    for attempt in DecodeAttempt::ALL {
        let text = match attempt.decode(raw) {
            Ok(t) => t,
            Err(reason) => {
                failures.push(format!("{}: {reason}", attempt.label()));
                continue;
            }
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                debug!("Decoded state document as {}", attempt.label());
                return ProjectState::from_value(value);
            }
            Err(e) => failures.push(format!("{}: {e}", attempt.label())),
        }
    }

    failures.push(format!(
        "preview: {}",
        preview(&String::from_utf8_lossy(raw))
    ));
    Err(HarvestError::structural(
        "could not decode project_data.json",
        failures,
    ))
}

#[derive(Debug, Clone, Copy)]
enum DecodeAttempt {
    Utf8,
    Utf8Bom,
    Windows1252,
    Iso8859_15,
}

impl DecodeAttempt {
    const ALL: [DecodeAttempt; 4] = [
        DecodeAttempt::Utf8,
        DecodeAttempt::Utf8Bom,
        DecodeAttempt::Windows1252,
        DecodeAttempt::Iso8859_15,
    ];

    fn label(self) -> &'static str {
        match self {
            DecodeAttempt::Utf8 => "utf-8",
            DecodeAttempt::Utf8Bom => "utf-8 (bom)",
            DecodeAttempt::Windows1252 => "windows-1252",
            DecodeAttempt::Iso8859_15 => "iso-8859-15",
        }
    }

    fn decode(self, raw: &[u8]) -> Result<String, String> {
        let legacy = |encoding: &'static encoding_rs::Encoding| {
            encoding
                .decode_without_bom_handling_and_without_replacement(raw)
                .map(|s| s.into_owned())
                .ok_or_else(|| "unmappable bytes".to_string())
        };
        match self {
            DecodeAttempt::Utf8 => std::str::from_utf8(raw)
                .map(str::to_string)
                .map_err(|e| e.to_string()),
            DecodeAttempt::Utf8Bom => std::str::from_utf8(strip_bom(raw))
                .map(str::to_string)
                .map_err(|e| e.to_string()),
            DecodeAttempt::Windows1252 => legacy(encoding_rs::WINDOWS_1252),
            DecodeAttempt::Iso8859_15 => legacy(encoding_rs::ISO_8859_15),
        }
    }
}

/// Packs and restores bundles against the session folders of one uploads root.
#[derive(Debug, Clone)]
pub struct Archiver {
    sessions: SessionManager,
    public_base: String,
}

impl Archiver {
    pub fn new(sessions: SessionManager, public_base: impl Into<String>) -> Self {
        Self {
            sessions,
            public_base: public_base.into(),
        }
    }

    pub fn from_config(config: &HarvestConfig, sessions: SessionManager) -> Self {
        Self::new(sessions, &config.public_base)
    }

    /// Bundle the stored project state with the current session's images.
    pub fn pack_current(&self, store: &dyn ProjectStore) -> HarvestResult<Vec<u8>> {
        let state = store.load()?;
        let latest = self.sessions.latest_session()?;
        match &latest {
            Some(s) => info!("Packing current session {}", s.folder_path.display()),
            None => info!("No session folder, packing project state only"),
        }
        pack(&state, latest.as_ref().map(|s| s.folder_path.as_path()))
    }

    /// Restore a bundle: replace the project state, then extract images into
    /// a fresh session folder.
    pub fn unpack(&self, bytes: &[u8], store: &dyn ProjectStore) -> HarvestResult<RestoreReport> {
        let mut tmp = tempfile::tempfile()?;
        tmp.write_all(bytes)?;
        tmp.seek(SeekFrom::Start(0))?;

        let mut archive = ZipArchive::new(tmp).map_err(|e| {
            HarvestError::structural(format!("not a readable archive: {e}"), Vec::new())
        })?;

        let names = (0..archive.len())
            .map(|i| archive.by_index_raw(i).map(|entry| entry.name().to_string()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                HarvestError::structural(format!("unreadable archive directory: {e}"), Vec::new())
            })?;
        let Some(state_name) = names
            .iter()
            .find(|n| basename(n).eq_ignore_ascii_case(STATE_ENTRY))
            .cloned()
        else {
            let mut listed: Vec<String> =
                names.iter().take(MAX_LISTED_ENTRIES).cloned().collect();
            if names.len() > MAX_LISTED_ENTRIES {
                listed.push(format!("... and {} more", names.len() - MAX_LISTED_ENTRIES));
            }
            return Err(HarvestError::structural(
                format!("{STATE_ENTRY} not found in archive"),
                listed,
            ));
        };

        let mut raw = Vec::new();
        archive
            .by_name(&state_name)
            .map_err(|e| {
                HarvestError::structural(format!("cannot open {state_name}: {e}"), Vec::new())
            })?
            .read_to_end(&mut raw)
            .map_err(|e| {
                HarvestError::structural(format!("cannot read {state_name}: {e}"), Vec::new())
            })?;

        let project_state = decode_state_document(&raw)?;
        store.save(&project_state)?;
        info!("Restored project state from {state_name}");

        let image_indices: Vec<usize> = names
            .iter()
            .enumerate()
            .filter(|(_, n)| n.starts_with(IMAGES_PREFIX) && !n.ends_with('/'))
            .map(|(i, _)| i)
            .collect();

        if image_indices.is_empty() {
            return Ok(RestoreReport {
                project_state,
                session: None,
                assets: Vec::new(),
                failures: Vec::new(),
            });
        }

        let session = self.sessions.create_session()?;
        let mut assets = Vec::new();
        let mut failures = Vec::new();
        for index in image_indices {
            match self.extract_entry(&mut archive, index, &session) {
                Ok(info) => assets.push(info),
                Err(e) => {
                    let name = &names[index];
                    warn!("Failed to extract {name}: {e}");
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        info!(
            "Restored {} images into {} ({} failed)",
            assets.len(),
            session.folder_path.display(),
            failures.len()
        );
        Ok(RestoreReport {
            project_state,
            session: Some(session),
            assets,
            failures,
        })
    }

    fn extract_entry(
        &self,
        archive: &mut ZipArchive<File>,
        index: usize,
        session: &ExtractionSession,
    ) -> HarvestResult<AssetInfo> {
        let mut entry = archive.by_index(index)?;
        let enclosed = entry.enclosed_name().ok_or_else(|| {
            HarvestError::Validation(format!("unsafe entry path {}", entry.name()))
        })?;
        let relative: PathBuf = enclosed
            .strip_prefix("images")
            .map_err(|_| HarvestError::Validation(format!("{} is outside images/", entry.name())))?
            .to_path_buf();
        // `enclosed_name` keeps `..` that stays inside the root, which could
        // still reach a sibling session folder.
        if relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(HarvestError::Validation(format!(
                "unsafe entry path {}",
                entry.name()
            )));
        }
        if entry.size() > MAX_ENTRY_BYTES {
            return Err(HarvestError::Validation(format!(
                "{} exceeds {MAX_ENTRY_BYTES} bytes",
                entry.name()
            )));
        }
        let filename = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| HarvestError::Validation(format!("{} has no file name", entry.name())))?;

        let out_path = session.folder_path.join(&relative);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        // The declared size can lie; cap what is actually inflated.
        let written = std::io::copy(&mut (&mut entry).take(MAX_ENTRY_BYTES + 1), &mut out)?;
        if written > MAX_ENTRY_BYTES {
            drop(out);
            std::fs::remove_file(&out_path)?;
            return Err(HarvestError::Validation(format!(
                "{} exceeds {MAX_ENTRY_BYTES} bytes",
                entry.name()
            )));
        }

        Ok(AssetInfo {
            filename,
            public_ref: format!(
                "{}/{}/{}",
                self.public_base.trim_end_matches('/'),
                session.folder_name(),
                slash_path(&relative)
            ),
            path: out_path,
        })
    }
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> HarvestResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let ft = entry.file_type()?;
        if ft.is_dir() {
            collect_files(&entry.path(), out)?;
        } else if ft.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

fn entry_name(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    format!("{IMAGES_PREFIX}{}", slash_path(relative))
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

fn strip_bom(raw: &[u8]) -> &[u8] {
    raw.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(raw)
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}
