//! Sync progress reporting.
//!
//! Emits observable progress during `vault resync` so users see what is
//! being scanned, uploaded, and indexed. Progress goes to **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Store scan in progress (total unknown yet).
    Scanning,
    /// Uploading dirty record n of total to the blob store.
    Uploading { n: u64, total: u64 },
    /// Upserting index batch n of total.
    Indexing { batch: u64, total: u64 },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress: "resync  uploading  3 / 12 records".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Scanning => "resync  scanning store...\n".to_string(),
            SyncProgressEvent::Uploading { n, total } => {
                format!("resync  uploading  {} / {} records\n", n, total)
            }
            SyncProgressEvent::Indexing { batch, total } => {
                format!("resync  indexing  batch {} / {}\n", batch, total)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Scanning => serde_json::json!({
                "event": "progress",
                "phase": "scanning"
            }),
            SyncProgressEvent::Uploading { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "uploading",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Indexing { batch, total } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "batch": batch,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
