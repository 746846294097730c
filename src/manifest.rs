//! Local sync bookkeeping.
//!
//! The manifest records the last successfully indexed content hash and
//! document id per store path. It is a local cache only: losing it costs
//! redundant re-uploads on the next run, never correctness, because the
//! remote document id is itself content-derived.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub content_hash: String,
    pub doc_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncManifest {
    #[serde(default)]
    pub entries: BTreeMap<String, ManifestEntry>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl SyncManifest {
    /// Load the manifest, treating a missing or corrupt file as empty.
    /// A corrupt manifest only means redundant re-uploads.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(manifest) => manifest,
                Err(e) => {
                    eprintln!("Warning: ignoring corrupt sync manifest: {}", e);
                    SyncManifest::default()
                }
            },
            Err(_) => SyncManifest::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("Failed to write manifest {}", path.display()))?;
        Ok(())
    }

    /// Whether the record at `path` needs re-sync.
    pub fn is_dirty(&self, path: &str, content_hash: &str) -> bool {
        match self.entries.get(path) {
            Some(entry) => entry.content_hash != content_hash,
            None => true,
        }
    }

    /// Previous document id for a path, if it was synced before.
    pub fn previous_doc_id(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(|e| e.doc_id.as_str())
    }

    /// Commit a path after the remote upsert has been acknowledged.
    pub fn commit(&mut self, path: &str, content_hash: &str, doc_id: &str) {
        self.entries.insert(
            path.to_string(),
            ManifestEntry {
                content_hash: content_hash.to_string(),
                doc_id: doc_id.to_string(),
            },
        );
        self.updated_at = Some(chrono::Utc::now().to_rfc3339());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let manifest = SyncManifest::load(Path::new("/nonexistent/manifest.json"));
        assert!(manifest.entries.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("manifest.json");
        std::fs::write(&path, "{not json").unwrap();
        let manifest = SyncManifest::load(&path);
        assert!(manifest.entries.is_empty());
    }

    #[test]
    fn test_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("manifest.json");

        let mut manifest = SyncManifest::default();
        manifest.commit("requirements/rq-001.toml", "hash1", "doc1");
        manifest.save(&path).unwrap();

        let loaded = SyncManifest::load(&path);
        assert_eq!(
            loaded.entries.get("requirements/rq-001.toml"),
            Some(&ManifestEntry {
                content_hash: "hash1".to_string(),
                doc_id: "doc1".to_string(),
            })
        );
    }

    #[test]
    fn test_dirty_detection() {
        let mut manifest = SyncManifest::default();
        assert!(manifest.is_dirty("a.toml", "h1"), "unknown path is dirty");

        manifest.commit("a.toml", "h1", "d1");
        assert!(!manifest.is_dirty("a.toml", "h1"), "committed hash is clean");
        assert!(manifest.is_dirty("a.toml", "h2"), "changed hash is dirty");
        assert_eq!(manifest.previous_doc_id("a.toml"), Some("d1"));
    }
}
