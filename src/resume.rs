//! Resume pipeline.
//!
//! Renders a digest of the store's current state: chapter progress,
//! requirement and gate tallies, and the most recent session summary. The
//! digest is a pure function of the records, so two runs over an unchanged
//! store produce byte-identical output. No wall-clock time appears in it.

use anyhow::Result;

use crate::config::Config;
use crate::models::{ArtifactKind, ArtifactRecord, RecordBody, RecordStatus};
use crate::store;

/// Build the digest text from already-scanned records, optionally limited
/// to one chapter. Records arrive path-sorted from the scanner; every
/// further ordering here is derived from record fields, never from
/// iteration order of a map or from the clock.
pub fn build_digest(records: &[ArtifactRecord], chapter: Option<&str>) -> String {
    let records: Vec<&ArtifactRecord> = records
        .iter()
        .filter(|r| chapter.map_or(true, |ch| r.chapter.as_deref() == Some(ch)))
        .collect();

    let mut out = String::new();
    match chapter {
        Some(ch) => out.push_str(&format!("# Context Digest (chapter {})\n", ch)),
        None => out.push_str("# Context Digest\n"),
    }

    // Chapter progress
    let chapters: Vec<&&ArtifactRecord> = records
        .iter()
        .filter(|r| r.kind == ArtifactKind::ChapterState)
        .collect();
    if !chapters.is_empty() {
        out.push_str("\n## Chapters\n");
        for record in &chapters {
            if let RecordBody::Progress(p) = &record.body {
                out.push_str(&format!(
                    "- {}: {}% complete, {} artifact(s)\n",
                    record.title, p.progress_pct, p.artifacts_count
                ));
            }
        }
    }

    // Requirements
    let requirements: Vec<&&ArtifactRecord> = records
        .iter()
        .filter(|r| r.kind == ArtifactKind::Requirement)
        .collect();
    if !requirements.is_empty() {
        let approved = requirements
            .iter()
            .filter(|r| r.status == RecordStatus::Approved)
            .count();
        out.push_str(&format!(
            "\n## Requirements: {}/{} approved\n",
            approved,
            requirements.len()
        ));
        for record in &requirements {
            out.push_str(&format!(
                "- {} [{}] {}\n",
                record.id,
                record.status.as_str(),
                record.title
            ));
        }
    }

    // Gates
    let gates: Vec<&&ArtifactRecord> = records
        .iter()
        .filter(|r| r.kind == ArtifactKind::Gate)
        .collect();
    if !gates.is_empty() {
        let passed = gates
            .iter()
            .filter(|r| r.status == RecordStatus::Passed)
            .count();
        out.push_str(&format!("\n## Gates: {}/{} passed\n", passed, gates.len()));
        for record in &gates {
            out.push_str(&format!(
                "- {} [{}] {}\n",
                record.id,
                record.status.as_str(),
                record.title
            ));
        }
    }

    // Latest session summary: newest timestamp, path as the tie-break.
    let latest = records
        .iter()
        .filter(|r| r.kind == ArtifactKind::SessionSummary)
        .max_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.path.cmp(&b.path))
        });

    if let Some(record) = latest {
        if let RecordBody::Summary(body) = &record.body {
            out.push_str(&format!("\n## Latest session ({})\n", body.topic));
            for bullet in &body.bullets {
                out.push_str(&format!("- {}\n", bullet));
            }
            if !body.decisions.is_empty() {
                out.push_str("\nDecisions:\n");
                for decision in &body.decisions {
                    out.push_str(&format!("- {}\n", decision));
                }
            }
            if !body.next_steps.is_empty() {
                out.push_str("\n## Next steps\n");
                for step in &body.next_steps {
                    out.push_str(&format!("- {}\n", step));
                }
            }
        }
    }

    if records.is_empty() {
        out.push_str("\nThe store is empty. Save a session to get started.\n");
    }

    out
}

/// Scan the store and print the digest to stdout.
pub fn run_resume(config: &Config, chapter: Option<&str>) -> Result<()> {
    let records = store::scan_store(config)?;
    print!("{}", build_digest(&records, chapter));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProgressBody, SummaryBody};
    use chrono::{TimeZone, Utc};

    fn record(
        path: &str,
        id: &str,
        kind: ArtifactKind,
        status: RecordStatus,
        title: &str,
        chapter: Option<&str>,
        body: RecordBody,
        hour: u32,
    ) -> ArtifactRecord {
        let raw = format!("id = \"{}\"", id);
        ArtifactRecord {
            path: path.to_string(),
            id: id.to_string(),
            kind,
            status,
            timestamp: Utc.with_ymd_and_hms(2026, 8, 1, hour, 0, 0).unwrap(),
            title: title.to_string(),
            chapter: chapter.map(|s| s.to_string()),
            content_hash: store::content_hash(&raw),
            raw,
            body,
        }
    }

    fn fixture() -> Vec<ArtifactRecord> {
        vec![
            record(
                "chapters/04/chapter_state.toml",
                "CH-04",
                ArtifactKind::ChapterState,
                RecordStatus::None,
                "Chapter 04",
                Some("04"),
                RecordBody::Progress(ProgressBody {
                    progress_pct: 40,
                    artifacts_count: 6,
                }),
                8,
            ),
            record(
                "gates/g-01.toml",
                "G-01",
                ArtifactKind::Gate,
                RecordStatus::Passed,
                "Architecture gate",
                Some("04"),
                RecordBody::Fields(Default::default()),
                8,
            ),
            record(
                "requirements/rq-001.toml",
                "RQ-001",
                ArtifactKind::Requirement,
                RecordStatus::Approved,
                "Versioned records",
                Some("04"),
                RecordBody::Fields(Default::default()),
                8,
            ),
            record(
                "requirements/rq-002.toml",
                "RQ-002",
                ArtifactKind::Requirement,
                RecordStatus::Approved,
                "Idempotent sync",
                Some("04"),
                RecordBody::Fields(Default::default()),
                8,
            ),
            record(
                "requirements/rq-003.toml",
                "RQ-003",
                ArtifactKind::Requirement,
                RecordStatus::Draft,
                "Query citations",
                Some("05"),
                RecordBody::Fields(Default::default()),
                8,
            ),
            record(
                "session_summaries/a.toml",
                "SUM-1",
                ArtifactKind::SessionSummary,
                RecordStatus::None,
                "Older session",
                Some("04"),
                RecordBody::Summary(SummaryBody {
                    topic: "store".to_string(),
                    bullets: vec!["old bullet".to_string()],
                    ..SummaryBody::default()
                }),
                9,
            ),
            record(
                "session_summaries/b.toml",
                "SUM-2",
                ArtifactKind::SessionSummary,
                RecordStatus::None,
                "Newer session",
                Some("04"),
                RecordBody::Summary(SummaryBody {
                    topic: "sync".to_string(),
                    bullets: vec!["wired the batch commit".to_string()],
                    decisions: vec!["batch size stays at two".to_string()],
                    next_steps: vec!["retry policy".to_string()],
                    ..SummaryBody::default()
                }),
                11,
            ),
        ]
    }

    #[test]
    fn test_digest_tallies_and_lists() {
        let digest = build_digest(&fixture(), None);
        assert!(digest.contains("## Requirements: 2/3 approved"));
        assert!(digest.contains("- RQ-003 [draft] Query citations"));
        assert!(digest.contains("## Gates: 1/1 passed"));
        assert!(digest.contains("- Chapter 04: 40% complete, 6 artifact(s)"));
    }

    #[test]
    fn test_digest_uses_newest_summary() {
        let digest = build_digest(&fixture(), None);
        assert!(digest.contains("## Latest session (sync)"));
        assert!(digest.contains("- wired the batch commit"));
        assert!(!digest.contains("old bullet"));
        assert!(digest.contains("## Next steps\n- retry policy"));
    }

    #[test]
    fn test_digest_is_deterministic() {
        let records = fixture();
        let a = build_digest(&records, None);
        let b = build_digest(&records, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_chapter_filter() {
        let digest = build_digest(&fixture(), Some("04"));
        assert!(digest.contains("# Context Digest (chapter 04)"));
        assert!(digest.contains("## Requirements: 2/2 approved"));
        assert!(!digest.contains("RQ-003"));
    }

    #[test]
    fn test_empty_store_digest() {
        let digest = build_digest(&[], None);
        assert!(digest.contains("The store is empty"));
    }
}
