//! Artifact Store access.
//!
//! The store is a directory tree of versioned TOML records (requirements,
//! gates, session summaries, chapter state). This module scans the tree,
//! validates each record against its kind's schema, and computes the
//! content hashes that drive change detection during sync.
//!
//! Records that are unreadable or violate their kind's schema are
//! quarantined: skipped with a stderr warning, never fatal to the run.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::{
    ArtifactKind, ArtifactRecord, ProgressBody, RecordBody, RecordStatus, SummaryBody,
};

/// sha256 hex digest of serialized record content. Pure function of the
/// bytes on disk.
pub fn content_hash(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic remote document id from path + content hash.
pub fn derive_doc_id(path: &str, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(content_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// On-disk shape of a record file, before kind validation.
#[derive(Debug, Deserialize)]
struct RecordFile {
    id: String,
    kind: ArtifactKind,
    #[serde(default)]
    status: Option<RecordStatus>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    chapter: Option<String>,
    #[serde(default)]
    fields: Option<BTreeMap<String, String>>,
    #[serde(default)]
    summary: Option<SummaryBody>,
    #[serde(default)]
    progress: Option<ProgressBody>,
}

/// Parse and validate a single record. `rel_path` is the store-relative
/// location and becomes the record's stable identity.
pub fn parse_record(rel_path: &str, raw: &str) -> Result<ArtifactRecord> {
    let file: RecordFile =
        toml::from_str(raw).with_context(|| format!("Malformed record: {}", rel_path))?;

    if file.id.trim().is_empty() {
        bail!("Record {} has an empty id", rel_path);
    }

    let status = file.status.unwrap_or(RecordStatus::None);
    if !status.valid_for(file.kind) {
        bail!(
            "Record {} has status '{}' which is not valid for kind '{}'",
            rel_path,
            status.as_str(),
            file.kind.as_str()
        );
    }

    let body = match file.kind {
        ArtifactKind::SessionSummary => {
            let summary = file
                .summary
                .ok_or_else(|| anyhow::anyhow!("Record {} is missing [summary]", rel_path))?;
            RecordBody::Summary(summary)
        }
        ArtifactKind::ChapterState => {
            let progress = file
                .progress
                .ok_or_else(|| anyhow::anyhow!("Record {} is missing [progress]", rel_path))?;
            if progress.progress_pct > 100 {
                bail!(
                    "Record {} has progress_pct {} outside 0..=100",
                    rel_path,
                    progress.progress_pct
                );
            }
            RecordBody::Progress(progress)
        }
        ArtifactKind::Requirement | ArtifactKind::Gate => {
            RecordBody::Fields(file.fields.unwrap_or_default())
        }
    };

    Ok(ArtifactRecord {
        path: rel_path.to_string(),
        id: file.id,
        kind: file.kind,
        status,
        timestamp: file.timestamp,
        title: file.title.unwrap_or_default(),
        chapter: file.chapter,
        body,
        content_hash: content_hash(raw),
        raw: raw.to_string(),
    })
}

/// Scan the store and return all valid records, sorted by path for
/// deterministic ordering. Invalid or duplicate-id records are skipped
/// with a warning on stderr.
pub fn scan_store(config: &Config) -> Result<Vec<ArtifactRecord>> {
    let root = &config.store.root;
    if !root.exists() {
        bail!("Store root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.store.include_globs)?;

    let mut default_excludes = vec!["**/.vault/**".to_string(), "**/.git/**".to_string()];
    default_excludes.extend(config.store.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if exclude_set.is_match(&rel) || !include_set.is_match(&rel) {
            continue;
        }
        paths.push(rel);
    }
    paths.sort();

    let mut records = Vec::new();
    let mut seen_ids: HashSet<(ArtifactKind, String)> = HashSet::new();

    for rel in &paths {
        let raw = match std::fs::read_to_string(root.join(rel)) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Warning: skipping unreadable record {}: {}", rel, e);
                continue;
            }
        };
        let record = match parse_record(rel, &raw) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Warning: quarantined record {}: {}", rel, e);
                continue;
            }
        };
        if !seen_ids.insert((record.kind, record.id.clone())) {
            eprintln!(
                "Warning: quarantined record {}: duplicate id '{}' for kind '{}'",
                rel,
                record.id,
                record.kind.as_str()
            );
            continue;
        }
        records.push(record);
    }

    Ok(records)
}

/// Write a record file, creating parent directories as needed.
pub fn write_record_file(config: &Config, rel_path: &str, raw: &str) -> Result<()> {
    let full = config.store.root.join(rel_path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&full, raw).with_context(|| format!("Failed to write {}", full.display()))?;
    Ok(())
}

/// Relative path of a chapter's state record.
pub fn chapter_state_path(chapter: &str) -> String {
    format!("chapters/{}/chapter_state.toml", chapter)
}

/// Bump the chapter's artifact count (and optionally its progress) after a
/// successful save. Creates the state record on first use. Progress is
/// monotonic non-decreasing and clamped to 100.
pub fn update_chapter_state(config: &Config, chapter: &str, progress_delta_pct: u8) -> Result<()> {
    let rel = chapter_state_path(chapter);
    let full = config.store.root.join(&rel);

    let (mut progress, timestamp, title) = if full.exists() {
        let raw = std::fs::read_to_string(&full)
            .with_context(|| format!("Failed to read {}", full.display()))?;
        let record = parse_record(&rel, &raw)?;
        match record.body {
            RecordBody::Progress(p) => (p, record.timestamp, record.title),
            _ => bail!("{} is not a chapter-state record", rel),
        }
    } else {
        (
            ProgressBody::default(),
            Utc::now(),
            format!("Chapter {}", chapter),
        )
    };

    progress.artifacts_count += 1;
    progress.progress_pct = progress
        .progress_pct
        .saturating_add(progress_delta_pct)
        .min(100);

    let raw = render_chapter_state(chapter, &title, timestamp, &progress);
    write_record_file(config, &rel, &raw)
}

fn render_chapter_state(
    chapter: &str,
    title: &str,
    timestamp: DateTime<Utc>,
    progress: &ProgressBody,
) -> String {
    format!(
        "id = {id}\nkind = \"chapter-state\"\ntimestamp = {ts}\ntitle = {title}\nchapter = {chapter}\n\n[progress]\nprogress_pct = {pct}\nartifacts_count = {count}\n",
        id = toml_string(&format!("CH-{}", chapter)),
        ts = toml_string(&timestamp.to_rfc3339()),
        title = toml_string(title),
        chapter = toml_string(chapter),
        pct = progress.progress_pct,
        count = progress.artifacts_count,
    )
}

/// Quote a string as a TOML basic string.
pub fn toml_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || (c as u32) == 0x7f => {
                out.push_str(&format!("\\u{:04X}", c as u32))
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Lowercase, alphanumeric-and-dash slug for filenames.
pub fn slugify(value: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in value.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "summary".to_string()
    } else {
        slug
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Scaffold the store layout (idempotent).
pub fn scaffold_store(root: &Path) -> Result<()> {
    for dir in [
        "requirements",
        "gates",
        "session_summaries",
        "chapters",
        ".vault",
    ] {
        std::fs::create_dir_all(root.join(dir))
            .with_context(|| format!("Failed to create {}", root.join(dir).display()))?;
    }
    Ok(())
}
