//! Core data models used throughout Context Vault.
//!
//! These types represent the artifact records that live in the local store
//! and the documents that flow into the remote search index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed set of record kinds recognized by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Requirement,
    Gate,
    SessionSummary,
    ChapterState,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Requirement => "requirement",
            ArtifactKind::Gate => "gate",
            ArtifactKind::SessionSummary => "session-summary",
            ArtifactKind::ChapterState => "chapter-state",
        }
    }
}

/// Kind-dependent record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Draft,
    Approved,
    Rejected,
    Open,
    Passed,
    Failed,
    None,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Draft => "draft",
            RecordStatus::Approved => "approved",
            RecordStatus::Rejected => "rejected",
            RecordStatus::Open => "open",
            RecordStatus::Passed => "passed",
            RecordStatus::Failed => "failed",
            RecordStatus::None => "none",
        }
    }

    /// Whether this status is legal for the given kind. Records violating
    /// the schema are quarantined on load rather than accessed optimistically.
    pub fn valid_for(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Requirement => matches!(
                self,
                RecordStatus::Draft | RecordStatus::Approved | RecordStatus::Rejected
            ),
            ArtifactKind::Gate => matches!(
                self,
                RecordStatus::Open | RecordStatus::Passed | RecordStatus::Failed
            ),
            ArtifactKind::SessionSummary | ArtifactKind::ChapterState => {
                matches!(self, RecordStatus::None)
            }
        }
    }
}

/// Kind-specific body content.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    /// Session summary content produced by the summarizer chain.
    Summary(SummaryBody),
    /// Aggregate chapter progress.
    Progress(ProgressBody),
    /// Free-form key/value fields (requirements, gates).
    Fields(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SummaryBody {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub bullets: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: String,
    /// Which summarizer tier produced the content (auditability).
    #[serde(default)]
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressBody {
    #[serde(default)]
    pub progress_pct: u8,
    #[serde(default)]
    pub artifacts_count: u64,
}

/// A single validated record loaded from the Artifact Store.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    /// Relative location within the store root; globally unique.
    pub path: String,
    /// Short human-assigned code, unique within its kind.
    pub id: String,
    pub kind: ArtifactKind,
    pub status: RecordStatus,
    /// Creation time, immutable once set.
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub chapter: Option<String>,
    pub body: RecordBody,
    /// Serialized file content as written on disk.
    pub raw: String,
    /// sha256 of `raw`; recomputed whenever the body changes.
    pub content_hash: String,
}

impl ArtifactRecord {
    /// Deterministic remote document identity: same content always maps to
    /// the same id, changed content maps to a new id. Basis for idempotent
    /// re-sync.
    pub fn doc_id(&self) -> String {
        crate::store::derive_doc_id(&self.path, &self.content_hash)
    }
}

/// Representation of an [`ArtifactRecord`] inside the remote search index.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteDocument {
    pub doc_id: String,
    pub path: String,
    pub kind: String,
    pub status: String,
    pub chapter: String,
    pub title: String,
    pub timestamp: String,
    pub searchable_text: String,
}

impl RemoteDocument {
    pub fn from_record(record: &ArtifactRecord) -> Self {
        Self {
            doc_id: record.doc_id(),
            path: record.path.clone(),
            kind: record.kind.as_str().to_string(),
            status: record.status.as_str().to_string(),
            chapter: record.chapter.clone().unwrap_or_default(),
            title: record.title.clone(),
            timestamp: record.timestamp.to_rfc3339(),
            searchable_text: record.raw.clone(),
        }
    }
}

/// A ranked document returned from the search index.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc_id: String,
    pub path: String,
    pub kind: String,
    pub title: String,
    pub score: f64,
    pub text: String,
}
