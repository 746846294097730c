//! Sync/Index pipeline.
//!
//! Makes the remote blob store and search index reflect the current
//! Artifact Store, uploading the minimum necessary, safely re-runnable any
//! number of times without duplication or loss.
//!
//! Correctness rests on three things:
//! - content-addressed document identity (`doc_id` = f(path, content hash)),
//!   so re-runs upsert the same documents instead of duplicating them;
//! - upload-then-commit ordering: a manifest entry is updated only after
//!   the remote upsert for its record is acknowledged, so a crash mid-sync
//!   causes a redundant re-upload next run, never a missed update;
//! - per-record and per-batch failure containment: one bad record or one
//!   exhausted batch never aborts the rest of the run.

use anyhow::Result;

use crate::blob::{BlobStore, S3BlobStore};
use crate::config::Config;
use crate::manifest::SyncManifest;
use crate::models::{ArtifactRecord, RemoteDocument};
use crate::progress::{ProgressMode, SyncProgressEvent, SyncProgressReporter};
use crate::search_index::{IndexAction, RestSearchIndex, SearchIndex};
use crate::store;

/// Outcome of one `synchronize()` run.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub scanned: usize,
    pub unchanged: usize,
    pub uploaded: usize,
    pub indexed: usize,
    pub failed_batches: usize,
    /// Per-record failures: (store path, error description).
    pub failures: Vec<(String, String)>,
    pub dry_run: bool,
}

impl SyncOutcome {
    pub fn fully_synced(&self) -> bool {
        self.failures.is_empty() && self.failed_batches == 0
    }
}

/// A dirty record staged for upload and indexing.
struct StagedRecord {
    path: String,
    content_hash: String,
    doc_id: String,
    raw: String,
    document: RemoteDocument,
    /// Superseded doc_id to tombstone in the same batch, if the path was
    /// synced before with different content.
    stale_doc_id: Option<String>,
}

fn stage_dirty(records: &[ArtifactRecord], manifest: &SyncManifest, full: bool) -> Vec<StagedRecord> {
    records
        .iter()
        .filter(|r| full || manifest.is_dirty(&r.path, &r.content_hash))
        .map(|r| {
            let doc_id = r.doc_id();
            let stale_doc_id = manifest
                .previous_doc_id(&r.path)
                .filter(|prev| *prev != doc_id)
                .map(|s| s.to_string());
            StagedRecord {
                path: r.path.clone(),
                content_hash: r.content_hash.clone(),
                doc_id,
                raw: r.raw.clone(),
                document: RemoteDocument::from_record(r),
                stale_doc_id,
            }
        })
        .collect()
}

/// Split staged records into rate-limit-sized groups.
fn batch_staged(staged: Vec<StagedRecord>, batch_size: usize) -> Vec<Vec<StagedRecord>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    for record in staged {
        current.push(record);
        if current.len() == batch_size {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Run one synchronization pass against the given backends.
pub async fn synchronize(
    config: &Config,
    blob: &dyn BlobStore,
    index: &dyn SearchIndex,
    full: bool,
    dry_run: bool,
    progress: &dyn SyncProgressReporter,
) -> Result<SyncOutcome> {
    progress.report(SyncProgressEvent::Scanning);
    let records = store::scan_store(config)?;

    let manifest_path = config.manifest_path();
    let mut manifest = SyncManifest::load(&manifest_path);

    let mut outcome = SyncOutcome {
        scanned: records.len(),
        dry_run,
        ..SyncOutcome::default()
    };

    let staged = stage_dirty(&records, &manifest, full);
    outcome.unchanged = records.len() - staged.len();

    if dry_run {
        // Report what would happen without touching the network.
        println!("resync (dry-run)");
        println!("  records scanned: {}", outcome.scanned);
        println!("  would upload: {}", staged.len());
        println!("  unchanged: {}", outcome.unchanged);
        return Ok(outcome);
    }

    // Phase 1: blob uploads, one record at a time. A failed upload drops
    // the record from this run; it stays dirty and is retried next run.
    let total_dirty = staged.len() as u64;
    let mut uploaded = Vec::new();
    for (i, record) in staged.into_iter().enumerate() {
        progress.report(SyncProgressEvent::Uploading {
            n: (i + 1) as u64,
            total: total_dirty,
        });
        match blob.put(&record.path, record.raw.as_bytes()).await {
            Ok(()) => {
                outcome.uploaded += 1;
                uploaded.push(record);
            }
            Err(e) => {
                eprintln!("Warning: blob upload failed for {}: {}", record.path, e);
                outcome.failures.push((record.path.clone(), e.to_string()));
            }
        }
    }

    // Phase 2: batched index upserts. Manifest entries are committed only
    // after the batch is acknowledged.
    let batches = batch_staged(uploaded, config.sync.batch_size);
    let total_batches = batches.len() as u64;
    for (i, batch) in batches.into_iter().enumerate() {
        progress.report(SyncProgressEvent::Indexing {
            batch: (i + 1) as u64,
            total: total_batches,
        });

        let mut actions = Vec::new();
        for record in &batch {
            if let Some(ref stale) = record.stale_doc_id {
                actions.push(IndexAction::Delete(stale.clone()));
            }
            actions.push(IndexAction::Upsert(record.document.clone()));
        }

        match index.apply_batch(&actions).await {
            Ok(()) => {
                for record in &batch {
                    manifest.commit(&record.path, &record.content_hash, &record.doc_id);
                }
                outcome.indexed += batch.len();
            }
            Err(e) => {
                outcome.failed_batches += 1;
                for record in &batch {
                    eprintln!("Warning: index upsert failed for {}: {}", record.path, e);
                    outcome.failures.push((record.path.clone(), e.to_string()));
                }
            }
        }
    }

    manifest.save(&manifest_path)?;
    Ok(outcome)
}

/// CLI entry point: builds the real backends, runs the pipeline, prints the
/// final status. Returns the process exit code (0 full, 2 partial).
pub async fn run_resync(
    config: &Config,
    full: bool,
    dry_run: bool,
    progress_mode: ProgressMode,
) -> Result<i32> {
    let blob_config = config
        .blob
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Missing [blob] configuration; resync needs a blob store"))?;
    let search_config = config.search.as_ref().ok_or_else(|| {
        anyhow::anyhow!("Missing [search] configuration; resync needs a search index")
    })?;

    // Backend construction validates credentials up front: missing keys are
    // fatal, not a per-record failure.
    let blob = S3BlobStore::new(blob_config, config.sync.timeout_secs)?;
    let index = RestSearchIndex::new(search_config, &config.sync)?;
    let progress = progress_mode.reporter();

    let outcome = synchronize(config, &blob, &index, full, dry_run, progress.as_ref()).await?;

    if outcome.dry_run {
        return Ok(0);
    }

    println!("resync");
    println!("  records scanned: {}", outcome.scanned);
    println!("  unchanged: {}", outcome.unchanged);
    println!("  uploaded: {}", outcome.uploaded);
    println!("  indexed: {}", outcome.indexed);
    if outcome.fully_synced() {
        println!("fully synced");
        Ok(0)
    } else {
        println!(
            "partially synced: {} record(s) failed, {} batch(es) exhausted; will retry next run",
            outcome.failures.len(),
            outcome.failed_batches
        );
        for (path, err) in &outcome.failures {
            println!("  failed: {} ({})", path, err);
        }
        Ok(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::progress::NoProgress;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct MemoryBlob {
        puts: Mutex<Vec<String>>,
        fail_paths: HashSet<String>,
    }

    impl MemoryBlob {
        fn new() -> Self {
            Self {
                puts: Mutex::new(Vec::new()),
                fail_paths: HashSet::new(),
            }
        }

        fn failing(paths: &[&str]) -> Self {
            Self {
                puts: Mutex::new(Vec::new()),
                fail_paths: paths.iter().map(|s| s.to_string()).collect(),
            }
        }

        fn put_count(&self) -> usize {
            self.puts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BlobStore for MemoryBlob {
        async fn put(&self, key: &str, _body: &[u8]) -> Result<()> {
            if self.fail_paths.contains(key) {
                bail!("access denied");
            }
            self.puts.lock().unwrap().push(key.to_string());
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            Ok(self.puts.lock().unwrap().iter().any(|k| k == key))
        }
    }

    #[derive(Default)]
    struct MemoryIndex {
        batches: Mutex<Vec<Vec<IndexAction>>>,
        fail_batches_containing: Option<String>,
    }

    impl MemoryIndex {
        fn batch_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }

        fn all_actions(&self) -> Vec<IndexAction> {
            self.batches.lock().unwrap().iter().flatten().cloned().collect()
        }
    }

    #[async_trait]
    impl SearchIndex for MemoryIndex {
        async fn apply_batch(&self, actions: &[IndexAction]) -> Result<()> {
            if let Some(ref needle) = self.fail_batches_containing {
                let hit = actions.iter().any(|a| match a {
                    IndexAction::Upsert(doc) => doc.path.contains(needle.as_str()),
                    IndexAction::Delete(_) => false,
                });
                if hit {
                    bail!("throttled");
                }
            }
            self.batches.lock().unwrap().push(actions.to_vec());
            Ok(())
        }

        async fn query(&self, _text: &str, _top_k: usize) -> Result<Vec<crate::models::SearchHit>> {
            Ok(Vec::new())
        }
    }

    fn record_body(id: &str) -> String {
        format!(
            "id = \"{}\"\nkind = \"requirement\"\nstatus = \"draft\"\ntimestamp = \"2026-08-01T10:00:00Z\"\ntitle = \"Record {}\"\n",
            id, id
        )
    }

    fn setup_store(count: usize) -> (tempfile::TempDir, Config) {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = Config::minimal(tmp.path().to_path_buf());
        store::scaffold_store(tmp.path()).unwrap();
        for i in 0..count {
            let id = format!("RQ-{:03}", i + 1);
            store::write_record_file(
                &cfg,
                &format!("requirements/rq-{:03}.toml", i + 1),
                &record_body(&id),
            )
            .unwrap();
        }
        (tmp, cfg)
    }

    #[tokio::test]
    async fn test_first_sync_uploads_everything() {
        let (_tmp, cfg) = setup_store(5);
        let blob = MemoryBlob::new();
        let index = MemoryIndex::default();

        let outcome = synchronize(&cfg, &blob, &index, false, false, &NoProgress)
            .await
            .unwrap();

        assert_eq!(outcome.scanned, 5);
        assert_eq!(outcome.uploaded, 5);
        assert_eq!(outcome.indexed, 5);
        assert!(outcome.fully_synced());
        assert_eq!(blob.put_count(), 5);

        let manifest = SyncManifest::load(&cfg.manifest_path());
        assert_eq!(manifest.entries.len(), 5);
    }

    #[tokio::test]
    async fn test_second_sync_is_a_no_op() {
        let (_tmp, cfg) = setup_store(3);
        let blob = MemoryBlob::new();
        let index = MemoryIndex::default();

        synchronize(&cfg, &blob, &index, false, false, &NoProgress)
            .await
            .unwrap();
        let outcome = synchronize(&cfg, &blob, &index, false, false, &NoProgress)
            .await
            .unwrap();

        assert_eq!(outcome.uploaded, 0, "idempotent re-run must not upload");
        assert_eq!(outcome.unchanged, 3);
        assert_eq!(blob.put_count(), 3, "no new puts on second run");
    }

    #[tokio::test]
    async fn test_edit_resyncs_only_the_changed_record() {
        let (_tmp, cfg) = setup_store(3);
        let blob = MemoryBlob::new();
        let index = MemoryIndex::default();

        synchronize(&cfg, &blob, &index, false, false, &NoProgress)
            .await
            .unwrap();
        let manifest = SyncManifest::load(&cfg.manifest_path());
        let old_doc_id = manifest
            .previous_doc_id("requirements/rq-002.toml")
            .unwrap()
            .to_string();

        // Edit one record's body.
        let edited = record_body("RQ-002").replace("\"draft\"", "\"approved\"");
        store::write_record_file(&cfg, "requirements/rq-002.toml", &edited).unwrap();

        let outcome = synchronize(&cfg, &blob, &index, false, false, &NoProgress)
            .await
            .unwrap();
        assert_eq!(outcome.uploaded, 1);
        assert_eq!(outcome.indexed, 1);

        // The superseded doc_id must be tombstoned in the same batch.
        let deletes: Vec<String> = index
            .all_actions()
            .iter()
            .filter_map(|a| match a {
                IndexAction::Delete(id) => Some(id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(deletes, vec![old_doc_id.clone()]);

        let manifest = SyncManifest::load(&cfg.manifest_path());
        let new_doc_id = manifest.previous_doc_id("requirements/rq-002.toml").unwrap();
        assert_ne!(new_doc_id, old_doc_id);
    }

    #[tokio::test]
    async fn test_failed_upload_does_not_block_others() {
        let (_tmp, cfg) = setup_store(4);
        let blob = MemoryBlob::failing(&["requirements/rq-003.toml"]);
        let index = MemoryIndex::default();

        let outcome = synchronize(&cfg, &blob, &index, false, false, &NoProgress)
            .await
            .unwrap();

        assert_eq!(outcome.uploaded, 3);
        assert_eq!(outcome.indexed, 3);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0, "requirements/rq-003.toml");

        // Failed record stays dirty: retried on the next run.
        let manifest = SyncManifest::load(&cfg.manifest_path());
        assert_eq!(manifest.entries.len(), 3);
        assert!(manifest.is_dirty(
            "requirements/rq-003.toml",
            &store::content_hash(&record_body("RQ-003"))
        ));
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_commit_manifest() {
        let (_tmp, cfg) = setup_store(4);
        let blob = MemoryBlob::new();
        let index = MemoryIndex {
            batches: Mutex::new(Vec::new()),
            fail_batches_containing: Some("rq-001".to_string()),
        };

        let outcome = synchronize(&cfg, &blob, &index, false, false, &NoProgress)
            .await
            .unwrap();

        // batch_size = 2: the batch holding rq-001 fails, the other commits.
        assert_eq!(outcome.failed_batches, 1);
        assert_eq!(outcome.indexed, 2);
        assert!(!outcome.fully_synced());

        let manifest = SyncManifest::load(&cfg.manifest_path());
        assert_eq!(manifest.entries.len(), 2);
        assert!(manifest.previous_doc_id("requirements/rq-001.toml").is_none());
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let (_tmp, cfg) = setup_store(2);
        let blob = MemoryBlob::new();
        let index = MemoryIndex::default();

        let outcome = synchronize(&cfg, &blob, &index, false, true, &NoProgress)
            .await
            .unwrap();

        assert!(outcome.dry_run);
        assert_eq!(blob.put_count(), 0);
        assert_eq!(index.batch_count(), 0);
        assert!(!cfg.manifest_path().exists() || SyncManifest::load(&cfg.manifest_path()).entries.is_empty());
    }

    #[tokio::test]
    async fn test_full_flag_ignores_manifest() {
        let (_tmp, cfg) = setup_store(2);
        let blob = MemoryBlob::new();
        let index = MemoryIndex::default();

        synchronize(&cfg, &blob, &index, false, false, &NoProgress)
            .await
            .unwrap();
        let outcome = synchronize(&cfg, &blob, &index, true, false, &NoProgress)
            .await
            .unwrap();

        assert_eq!(outcome.uploaded, 2, "--full must re-upload everything");
    }

    #[test]
    fn test_batching_respects_size() {
        let staged: Vec<StagedRecord> = (0..5)
            .map(|i| StagedRecord {
                path: format!("p{}", i),
                content_hash: "h".to_string(),
                doc_id: "d".to_string(),
                raw: String::new(),
                document: RemoteDocument {
                    doc_id: "d".to_string(),
                    path: format!("p{}", i),
                    kind: "requirement".to_string(),
                    status: "draft".to_string(),
                    chapter: String::new(),
                    title: String::new(),
                    timestamp: String::new(),
                    searchable_text: String::new(),
                },
                stale_doc_id: None,
            })
            .collect();

        let batches = batch_staged(staged, 2);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }
}
