use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub blob: Option<BlobConfig>,
    #[serde(default)]
    pub search: Option<SearchConfig>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub save: SaveConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "requirements/**/*.toml".to_string(),
        "gates/**/*.toml".to_string(),
        "session_summaries/**/*.toml".to_string(),
        "**/chapter_state.toml".to_string(),
    ]
}

/// Blob store settings (S3-compatible). Credentials come from
/// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` in the environment.
#[derive(Debug, Deserialize, Clone)]
pub struct BlobConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Search index settings. The admin key comes from `SEARCH_API_KEY`
/// in the environment.
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub index: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_api_version() -> String {
    "2023-11-01".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// Small batches keep the free-tier index service under its rate limit.
fn default_batch_size() -> usize {
    2
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizerConfig {
    /// Ordered fallback tiers, tried first to last.
    #[serde(default = "default_engines")]
    pub engines: Vec<String>,
    #[serde(default = "default_anthropic_model")]
    pub anthropic_model: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            engines: default_engines(),
            anthropic_model: default_anthropic_model(),
            openai_model: default_openai_model(),
            max_input_chars: default_max_input_chars(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_engines() -> Vec<String> {
    vec![
        "anthropic".to_string(),
        "openai".to_string(),
        "local".to_string(),
    ]
}
fn default_anthropic_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_input_chars() -> usize {
    6000
}
fn default_max_output_tokens() -> u32 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_answer_model")]
    pub model: String,
    #[serde(default = "default_answer_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            model: default_answer_model(),
            max_tokens: default_answer_max_tokens(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_answer_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_answer_max_tokens() -> u32 {
    2000
}
fn default_max_context_chars() -> usize {
    16000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SaveConfig {
    /// Run `synchronize()` automatically after every successful save.
    #[serde(default)]
    pub auto_sync: bool,
    /// Progress bump applied to the owning chapter per saved summary.
    /// 0 disables progress inference.
    #[serde(default)]
    pub progress_delta_pct: u8,
}

impl Config {
    /// Minimal config for commands that only touch the local store.
    pub fn minimal(root: PathBuf) -> Self {
        Self {
            store: StoreConfig {
                root,
                include_globs: default_include_globs(),
                exclude_globs: Vec::new(),
            },
            blob: None,
            search: None,
            sync: SyncConfig::default(),
            summarizer: SummarizerConfig::default(),
            query: QueryConfig::default(),
            save: SaveConfig::default(),
        }
    }

    /// Local bookkeeping directory (manifest lives here).
    pub fn state_dir(&self) -> PathBuf {
        self.store.root.join(".vault")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.state_dir().join("sync_manifest.json")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.store.include_globs.is_empty() {
        anyhow::bail!("store.include_globs must not be empty");
    }

    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be >= 1");
    }

    if config.query.top_k == 0 {
        anyhow::bail!("query.top_k must be >= 1");
    }

    if config.save.progress_delta_pct > 100 {
        anyhow::bail!("save.progress_delta_pct must be in 0..=100");
    }

    if config.summarizer.engines.is_empty() {
        anyhow::bail!("summarizer.engines must not be empty");
    }
    for engine in &config.summarizer.engines {
        match engine.as_str() {
            "anthropic" | "openai" | "local" => {}
            other => anyhow::bail!(
                "Unknown summarizer engine: '{}'. Must be anthropic, openai, or local.",
                other
            ),
        }
    }

    if let Some(ref search) = config.search {
        if search.endpoint.trim().is_empty() || search.index.trim().is_empty() {
            anyhow::bail!("search.endpoint and search.index must be set when [search] is present");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("vault.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_minimal_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(&tmp, "[store]\nroot = \"/tmp/project\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.sync.batch_size, 2);
        assert_eq!(cfg.query.top_k, 8);
        assert_eq!(cfg.summarizer.engines, vec!["anthropic", "openai", "local"]);
        assert!(cfg.blob.is_none());
    }

    #[test]
    fn test_reject_zero_batch_size() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(&tmp, "[store]\nroot = \"/tmp/p\"\n[sync]\nbatch_size = 0\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_reject_unknown_engine() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "[store]\nroot = \"/tmp/p\"\n[summarizer]\nengines = [\"gemini\"]\n",
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Unknown summarizer engine"));
    }

    #[test]
    fn test_manifest_path_under_state_dir() {
        let cfg = Config::minimal(PathBuf::from("/proj"));
        assert_eq!(
            cfg.manifest_path(),
            PathBuf::from("/proj/.vault/sync_manifest.json")
        );
    }
}
