//! # Context Vault CLI (`vault`)
//!
//! The `vault` binary is the primary interface for Context Vault. It
//! provides commands for store scaffolding, session capture, resume
//! digests, cloud sync, and retrieval-augmented queries.
//!
//! ## Usage
//!
//! ```bash
//! vault --config ./vault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vault init` | Scaffold the store layout (and a starter config) |
//! | `vault init-index` | Create or update the remote search index schema |
//! | `vault save` | Summarize session text into a store record |
//! | `vault resume` | Print a deterministic digest of the store |
//! | `vault resync` | Sync changed records to blob store and search index |
//! | `vault query "<question>"` | Answer a question from indexed artifacts |
//!
//! ## Examples
//!
//! ```bash
//! # Scaffold a new store in the current directory
//! vault init
//!
//! # Capture a session from stdin without remote summarizers
//! git log -5 | vault save --no-llm --chapter 04
//!
//! # Catch-up digest for one chapter
//! vault resume --chapter 04
//!
//! # Preview what a sync would do
//! vault resync --dry-run
//!
//! # Ask across everything that has been indexed
//! vault query "which gates are still open?"
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use context_vault::config::{self, Config};
use context_vault::progress::ProgressMode;
use context_vault::search_index::RestSearchIndex;
use context_vault::{query, resume, save, store, sync};

/// Context Vault CLI — a local-first artifact store with cloud search.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `vault.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "vault",
    about = "Context Vault — versioned project artifacts with summarized capture, sync, and search",
    version,
    long_about = "Context Vault keeps project artifacts (requirements, gates, session summaries, \
    chapter state) as versioned TOML records in a plain directory tree, captures work sessions \
    through a summarizer fallback chain, mirrors changed records into a blob store and search \
    index, and answers questions against the index with citations."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./vault.toml`. Store, sync, summarizer, and query
    /// settings are read from this file.
    #[arg(long, global = true, default_value = "./vault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Scaffold the store layout.
    ///
    /// Creates the record directories and the `.vault/` state directory
    /// under the store root. When no config file exists yet, writes a
    /// starter one first. This command is idempotent — running it multiple
    /// times is safe.
    Init {
        /// Store root for a newly created config. Ignored when the config
        /// file already exists.
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Create or update the remote search index schema.
    ///
    /// Safe to re-run; existing documents are preserved. Requires the
    /// `[search]` config section and `SEARCH_API_KEY`.
    InitIndex,

    /// Summarize session text into a session-summary record.
    ///
    /// Input comes from `--text`, `--input`, or stdin. Summarization runs
    /// through the configured fallback chain; with every remote tier
    /// unavailable the local rules tier still produces a record.
    Save {
        /// Inline session text.
        #[arg(long)]
        text: Option<String>,

        /// Read session text from this file.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Chapter that owns this session. Also bumps the chapter's state
        /// record.
        #[arg(long)]
        chapter: Option<String>,

        /// Tag to record verbatim (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Explicit topic, overriding keyword detection.
        #[arg(long)]
        topic: Option<String>,

        /// Explicit record title, overriding the summarizer's.
        #[arg(long)]
        title: Option<String>,

        /// Source label recorded in the artifact.
        #[arg(long)]
        source: Option<String>,

        /// Skip remote summarizer tiers and use local rules only.
        #[arg(long)]
        no_llm: bool,

        /// Run a sync pass after the record is written.
        #[arg(long)]
        sync: bool,
    },

    /// Print a deterministic digest of the store.
    ///
    /// Chapter progress, requirement and gate tallies, and the most recent
    /// session summary. Output depends only on store content, so unchanged
    /// stores produce byte-identical digests.
    Resume {
        /// Limit the digest to one chapter.
        #[arg(long)]
        chapter: Option<String>,
    },

    /// Sync changed records to the blob store and search index.
    ///
    /// Incremental by default: only records whose content hash differs
    /// from the local manifest are uploaded. Exit code 0 means fully
    /// synced, 2 means partial (failed records retry next run).
    Resync {
        /// Ignore the manifest — re-upload every record.
        #[arg(long)]
        full: bool,

        /// Show what would be uploaded without touching the network.
        #[arg(long)]
        dry_run: bool,

        /// Progress reporting: `auto`, `off`, `human`, or `json`.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// Answer a question from indexed artifacts, with citations.
    ///
    /// Retrieves the top matching records from the search index and asks
    /// the answer model to respond using only those sources.
    Query {
        /// The question to answer.
        question: String,

        /// Number of records to retrieve (defaults to `query.top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },
}

fn parse_progress_mode(value: &str) -> anyhow::Result<ProgressMode> {
    match value {
        "auto" => Ok(ProgressMode::default_for_tty()),
        "off" => Ok(ProgressMode::Off),
        "human" => Ok(ProgressMode::Human),
        "json" => Ok(ProgressMode::Json),
        other => anyhow::bail!("Unknown progress mode: '{}'. Use auto, off, human, or json.", other),
    }
}

fn starter_config(root: &Path) -> String {
    format!(
        r#"[store]
root = "{}"

# [blob]
# bucket = "my-artifacts"
# prefix = "vault"
# region = "us-east-1"

# [search]
# endpoint = "https://my-search.example.net"
# index = "vault-artifacts"
"#,
        root.display()
    )
}

fn run_init(config_path: &Path, root: &Path) -> anyhow::Result<()> {
    let cfg = if config_path.exists() {
        config::load_config(config_path)?
    } else {
        std::fs::write(config_path, starter_config(root))?;
        println!("wrote starter config {}", config_path.display());
        Config::minimal(root.to_path_buf())
    };
    store::scaffold_store(&cfg.store.root)?;
    println!("store initialized at {}", cfg.store.root.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Init works without an existing config file.
    if let Commands::Init { ref root } = cli.command {
        return run_init(&cli.config, root);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::InitIndex => {
            let search_config = cfg.search.as_ref().ok_or_else(|| {
                anyhow::anyhow!("Missing [search] configuration; init-index needs a search index")
            })?;
            let index = RestSearchIndex::new(search_config, &cfg.sync)?;
            index.ensure_index().await?;
            println!("index '{}' is up to date", search_config.index);
        }
        Commands::Save {
            text,
            input,
            chapter,
            tags,
            topic,
            title,
            source,
            no_llm,
            sync,
        } => {
            let options = save::SaveOptions {
                text,
                input,
                chapter,
                tags,
                topic,
                title,
                source,
                no_llm,
                sync,
            };
            let code = save::run_save(&cfg, options).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Resume { chapter } => {
            resume::run_resume(&cfg, chapter.as_deref())?;
        }
        Commands::Resync {
            full,
            dry_run,
            progress,
        } => {
            let mode = parse_progress_mode(&progress)?;
            let code = sync::run_resync(&cfg, full, dry_run, mode).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Query { question, top_k } => {
            query::run_query(&cfg, &question, top_k).await?;
        }
    }

    Ok(())
}
