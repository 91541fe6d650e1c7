//! Core data types for discovered candidates, acquired assets, and sessions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A discovered, not-yet-downloaded reference to a possible page image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateAsset {
    pub url: String,
    /// 1-based first-seen discovery order.
    pub ordinal: usize,
    pub hint_width: Option<u32>,
    pub hint_height: Option<u32>,
    pub alt_text: Option<String>,
    pub class_hint: Option<String>,
}

impl CandidateAsset {
    /// Candidate carrying only a URL and its ordinal.
    pub fn new(url: impl Into<String>, ordinal: usize) -> Self {
        Self {
            url: url.into(),
            ordinal,
            hint_width: None,
            hint_height: None,
            alt_text: None,
            class_hint: None,
        }
    }
}

/// Raw bytes standing in for a page set when no candidate survived filtering.
#[derive(Debug, Clone)]
pub struct FallbackAsset {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// What a scraping strategy found on a page.
#[derive(Debug, Clone)]
pub enum Discovery {
    Candidates(Vec<CandidateAsset>),
    Fallback(FallbackAsset),
    Empty,
}

impl Discovery {
    /// Wrap a candidate list, collapsing an empty list to `Empty`.
    pub fn from_candidates(candidates: Vec<CandidateAsset>) -> Self {
        if candidates.is_empty() {
            Discovery::Empty
        } else {
            Discovery::Candidates(candidates)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Discovery::Empty)
    }
}

/// A validated, normalized image persisted into a session folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquiredAsset {
    pub filename: String,
    pub stored_path: PathBuf,
    pub ordinal: usize,
    pub public_ref: String,
}

/// An isolated working folder for one extraction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSession {
    pub id: String,
    pub folder_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl ExtractionSession {
    /// Folder basename, e.g. `webtoon_1a2b3c4d`.
    pub fn folder_name(&self) -> String {
        self.folder_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Why a single candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Validation,
    FormatConversion,
    Io,
}

/// A dropped candidate, kept for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub ordinal: usize,
    pub url: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Per-candidate result of an acquisition batch.
pub type ItemOutcome = Result<AcquiredAsset, ItemFailure>;

/// Folder and file totals under the uploads root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub folders: usize,
    pub files: usize,
}

/// Statistics from a session cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted_folders: usize,
    pub deleted_files: usize,
    pub before: Counts,
    pub after: Counts,
}

/// An image restored from an archive bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub filename: String,
    pub public_ref: String,
    pub path: PathBuf,
}

/// Errors that can occur in the harvest library.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Format conversion error: {0}")]
    FormatConversion(String),

    #[error("No images found: {0}")]
    EmptyResult(String),

    #[error("Archive error: {reason}")]
    ArchiveStructural {
        reason: String,
        diagnostics: Vec<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl HarvestError {
    /// Build a structural archive failure with a diagnostic payload.
    pub fn structural(reason: impl Into<String>, diagnostics: Vec<String>) -> Self {
        HarvestError::ArchiveStructural {
            reason: reason.into(),
            diagnostics,
        }
    }

    /// Diagnostic lines attached to a structural failure, empty otherwise.
    pub fn diagnostics(&self) -> &[String] {
        match self {
            HarvestError::ArchiveStructural { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

/// Convenience result type.
pub type HarvestResult<T> = Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_candidate_list_is_empty_discovery() {
        assert!(Discovery::from_candidates(Vec::new()).is_empty());
        let found = Discovery::from_candidates(vec![CandidateAsset::new("https://a/1.jpg", 1)]);
        assert!(!found.is_empty());
    }

    #[test]
    fn test_folder_name() {
        let session = ExtractionSession {
            id: "1a2b3c4d".into(),
            folder_path: PathBuf::from("static/uploads/webtoon_1a2b3c4d"),
            created_at: Utc::now(),
        };
        assert_eq!(session.folder_name(), "webtoon_1a2b3c4d");
    }

    #[test]
    fn test_structural_diagnostics() {
        let err = HarvestError::structural("missing", vec!["a.txt".into()]);
        assert_eq!(err.diagnostics(), &["a.txt".to_string()]);
        assert!(HarvestError::Config("x".into()).diagnostics().is_empty());
    }
}
