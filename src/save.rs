//! Save pipeline.
//!
//! Turns raw session text into a validated session-summary record in the
//! Artifact Store. Summarization runs through the fallback chain (remote
//! tiers first, deterministic local rules last), so a save never fails for
//! lack of an API key or a remote outage. An optional sync pass runs after
//! the record is durably written; sync failure never undoes the save.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::io::Read;

use crate::config::Config;
use crate::progress::ProgressMode;
use crate::store;
use crate::summarize::{self, StructuredSummary};
use crate::sync;

/// CLI inputs for one save.
#[derive(Debug, Default)]
pub struct SaveOptions {
    /// Inline session text. Wins over `input` and stdin.
    pub text: Option<String>,
    /// Read session text from this file.
    pub input: Option<std::path::PathBuf>,
    /// Chapter that owns this session, if any.
    pub chapter: Option<String>,
    /// Free-form tags recorded verbatim.
    pub tags: Vec<String>,
    /// Explicit topic, overriding keyword detection.
    pub topic: Option<String>,
    /// Explicit record title, overriding the summarizer's.
    pub title: Option<String>,
    /// Source label recorded in the artifact (defaults to where the text
    /// came from: inline, the file path, or stdin).
    pub source: Option<String>,
    /// Skip remote tiers and use local rules only.
    pub no_llm: bool,
    /// Force a sync pass after the save.
    pub sync: bool,
}

/// Keyword table for topic detection. First match wins on score ties, so
/// order is part of the contract.
const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "sync",
        &["sync", "upload", "index", "manifest", "batch", "blob"],
    ),
    (
        "summarization",
        &["summar", "bullet", "fallback", "engine", "llm"],
    ),
    (
        "retrieval",
        &["search", "query", "retriev", "citation", "answer"],
    ),
    (
        "store",
        &["record", "requirement", "gate", "schema", "artifact"],
    ),
    ("planning", &["plan", "milestone", "chapter", "roadmap"]),
];

/// Pick a topic by keyword frequency; "session" when nothing matches.
pub fn detect_topic(text: &str) -> String {
    let lower = text.to_lowercase();
    let mut best: Option<(&str, usize)> = None;
    for (topic, keywords) in TOPIC_KEYWORDS {
        let score: usize = keywords.iter().map(|k| lower.matches(k).count()).sum();
        if score > 0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((topic, score));
        }
    }
    best.map(|(t, _)| t.to_string())
        .unwrap_or_else(|| "session".to_string())
}

fn toml_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| store::toml_string(s)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Render the session-summary record in the store's TOML format.
pub fn render_summary_record(
    id: &str,
    timestamp: &str,
    topic: &str,
    chapter: Option<&str>,
    tags: &[String],
    summary: &StructuredSummary,
    engine: &str,
    engine_error: Option<&str>,
    source: &str,
) -> String {
    let title = if summary.title.is_empty() {
        format!("Session: {}", topic)
    } else {
        summary.title.clone()
    };

    let mut out = String::new();
    out.push_str(&format!("id = {}\n", store::toml_string(id)));
    out.push_str("kind = \"session-summary\"\n");
    out.push_str(&format!("timestamp = {}\n", store::toml_string(timestamp)));
    out.push_str(&format!("title = {}\n", store::toml_string(&title)));
    if let Some(chapter) = chapter {
        out.push_str(&format!("chapter = {}\n", store::toml_string(chapter)));
    }
    out.push('\n');
    out.push_str("[summary]\n");
    out.push_str(&format!("topic = {}\n", store::toml_string(topic)));
    out.push_str(&format!("bullets = {}\n", toml_list(&summary.bullets)));
    out.push_str(&format!("decisions = {}\n", toml_list(&summary.decisions)));
    out.push_str(&format!("next_steps = {}\n", toml_list(&summary.next_steps)));
    out.push_str(&format!("tags = {}\n", toml_list(tags)));
    out.push_str(&format!("source = {}\n", store::toml_string(source)));
    out.push_str(&format!("engine = {}\n", store::toml_string(engine)));
    if let Some(err) = engine_error {
        out.push_str(&format!("engine_error = {}\n", store::toml_string(err)));
    }
    out
}

fn read_session_text(options: &SaveOptions) -> Result<(String, String)> {
    if let Some(ref text) = options.text {
        return Ok((text.clone(), "inline".to_string()));
    }
    if let Some(ref path) = options.input {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        return Ok((text, path.display().to_string()));
    }
    if atty::is(atty::Stream::Stdin) {
        bail!("No session text: pass --text, --input, or pipe text on stdin");
    }
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .context("Failed to read stdin")?;
    Ok((text, "stdin".to_string()))
}

/// Pick a store path and record id that do not collide with an existing
/// record. Two saves in the same second share the timestamp, so the
/// numeric suffix goes on both the path and the id: ids must stay unique
/// within their kind or the scanner quarantines the newer record.
fn summary_identity(config: &Config, stamp: &str, slug: &str) -> (String, String) {
    let base = format!("session_summaries/{}_{}.toml", stamp, slug);
    if !config.store.root.join(&base).exists() {
        return (base, format!("SUM-{}", stamp));
    }
    let mut n = 2;
    loop {
        let candidate = format!("session_summaries/{}_{}-{}.toml", stamp, slug, n);
        if !config.store.root.join(&candidate).exists() {
            return (candidate, format!("SUM-{}-{}", stamp, n));
        }
        n += 1;
    }
}

/// Run one save. Returns the process exit code.
pub async fn run_save(config: &Config, options: SaveOptions) -> Result<i32> {
    let (text, source) = read_session_text(&options)?;
    if text.trim().is_empty() {
        bail!("Session text is empty");
    }

    let topic = options
        .topic
        .clone()
        .unwrap_or_else(|| detect_topic(&text));
    let source = options.source.clone().unwrap_or(source);

    let tiers = summarize::build_chain(&config.summarizer, !options.no_llm);
    let mut outcome = summarize::summarize_with_fallback(&tiers, &text).await?;
    if let Some(ref title) = options.title {
        outcome.summary.title = title.clone();
    }

    let now = Utc::now();
    let stamp = now.format("%Y%m%d%H%M%S").to_string();
    let (rel_path, id) = summary_identity(config, &stamp, &store::slugify(&topic));

    let raw = render_summary_record(
        &id,
        &now.to_rfc3339(),
        &topic,
        options.chapter.as_deref(),
        &options.tags,
        &outcome.summary,
        &outcome.engine,
        outcome.tier_errors.as_deref(),
        &source,
    );

    // Round-trip through the parser so a save can never write a record the
    // scanner would quarantine.
    store::parse_record(&rel_path, &raw)?;
    store::write_record_file(config, &rel_path, &raw)?;
    println!("saved {} (engine: {})", rel_path, outcome.engine);

    if let Some(ref chapter) = options.chapter {
        store::update_chapter_state(config, chapter, config.save.progress_delta_pct)?;
        println!("updated {}", store::chapter_state_path(chapter));
    }

    if options.sync || config.save.auto_sync {
        // The record is already durable; a sync failure only defers upload.
        // It still makes the run non-successful, fatal or partial alike.
        match sync::run_resync(config, false, false, ProgressMode::Off).await {
            Ok(code) => return Ok(code),
            Err(e) => {
                eprintln!("Warning: post-save sync failed (record saved): {}", e);
                return Ok(2);
            }
        }
    }

    Ok(0)
}
