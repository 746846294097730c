//! Summarizer tiers and the fallback chain.
//!
//! A [`Summarizer`] turns raw session text into a [`StructuredSummary`].
//! Tiers are tried strictly in configured order (remote Anthropic → remote
//! OpenAI → local rules); the orchestrator stops at the first success and
//! records which tier won. The local tier is total — it never fails — so
//! the chain as a whole always produces a summary.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::SummarizerConfig;

pub const MAX_BULLETS: usize = 8;
pub const MAX_DECISIONS: usize = 6;
pub const MAX_NEXT_STEPS: usize = 8;
const MAX_ITEM_CHARS: usize = 220;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredSummary {
    pub title: String,
    pub bullets: Vec<String>,
    pub decisions: Vec<String>,
    pub next_steps: Vec<String>,
}

/// One candidate tier in the ordered fallback chain.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Tier name recorded in the saved artifact for auditability.
    fn name(&self) -> &str;

    async fn summarize(&self, text: &str) -> Result<StructuredSummary>;
}

/// Result of running the chain: the summary, the winning tier, and the
/// accumulated errors from tiers that failed before it.
pub struct ChainOutcome {
    pub summary: StructuredSummary,
    pub engine: String,
    pub tier_errors: Option<String>,
}

/// Try each tier in order, stopping at the first success.
///
/// Returns an error only if every tier fails, which cannot happen for any
/// chain ending in [`LocalRulesSummarizer`].
pub async fn summarize_with_fallback(
    tiers: &[Box<dyn Summarizer>],
    text: &str,
) -> Result<ChainOutcome> {
    let mut errors: Vec<String> = Vec::new();

    for tier in tiers {
        match tier.summarize(text).await {
            Ok(summary) => {
                return Ok(ChainOutcome {
                    summary,
                    engine: tier.name().to_string(),
                    tier_errors: if errors.is_empty() {
                        None
                    } else {
                        Some(errors.join(" "))
                    },
                });
            }
            Err(e) => {
                errors.push(format!("[{}] {}", tier.name(), e));
            }
        }
    }

    bail!("All summarizer tiers failed: {}", errors.join(" "))
}

/// Build the ordered chain from configuration.
///
/// Remote tiers whose credentials are missing are skipped (noted on
/// stderr); a local tier is always appended so the chain is total.
/// With `use_llm = false` only the local tier is used.
pub fn build_chain(config: &SummarizerConfig, use_llm: bool) -> Vec<Box<dyn Summarizer>> {
    let mut tiers: Vec<Box<dyn Summarizer>> = Vec::new();

    if use_llm {
        for engine in &config.engines {
            match engine.as_str() {
                "anthropic" => match AnthropicSummarizer::new(config) {
                    Ok(tier) => tiers.push(Box::new(tier)),
                    Err(e) => eprintln!("Note: skipping anthropic tier: {}", e),
                },
                "openai" => match OpenAiSummarizer::new(config) {
                    Ok(tier) => tiers.push(Box::new(tier)),
                    Err(e) => eprintln!("Note: skipping openai tier: {}", e),
                },
                "local" => tiers.push(Box::new(LocalRulesSummarizer)),
                _ => {}
            }
        }
    }

    if !tiers.iter().any(|t| t.name() == "local") {
        tiers.push(Box::new(LocalRulesSummarizer));
    }
    tiers
}

// ============ Item cleaning ============

/// Trim, cap length, and dedup list items, keeping at most `limit`.
fn clean_items(items: &[String], limit: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let mut s = item.trim().to_string();
        if s.is_empty() {
            continue;
        }
        if s.chars().count() > MAX_ITEM_CHARS {
            s = s.chars().take(MAX_ITEM_CHARS - 3).collect::<String>();
            s = s.trim_end().to_string() + "...";
        }
        if !out.contains(&s) {
            out.push(s);
        }
        if out.len() >= limit {
            break;
        }
    }
    out
}

fn clean_summary(summary: StructuredSummary) -> StructuredSummary {
    StructuredSummary {
        title: summary.title.trim().to_string(),
        bullets: clean_items(&summary.bullets, MAX_BULLETS),
        decisions: clean_items(&summary.decisions, MAX_DECISIONS),
        next_steps: clean_items(&summary.next_steps, MAX_NEXT_STEPS),
    }
}

// ============ Remote response parsing ============

/// Parse the JSON-only response contract shared by both remote tiers:
/// `{title, summary_bullets[], decisions[], next_steps[]}`.
///
/// Strips markdown fences and repairs truncated JSON by closing open
/// strings, arrays, and objects (models sometimes run out of tokens
/// mid-document).
pub fn parse_summary_json(content: &str) -> Result<StructuredSummary> {
    let mut text = content.trim().to_string();
    if text.starts_with("```") {
        text = text
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
            .to_string();
    }

    let parsed = match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(v) => v,
        Err(_) => {
            let mut repaired = text.trim_end().trim_end_matches(',').to_string();
            let mut value = None;
            for suffix in ["\"", "]", "}", "\"]}", "]}", "\"]}}"] {
                if let Ok(v) = serde_json::from_str::<serde_json::Value>(&(repaired.clone() + suffix))
                {
                    value = Some(v);
                    break;
                }
                repaired.push_str(suffix);
            }
            value.ok_or_else(|| anyhow::anyhow!("Unparseable summarizer response"))?
        }
    };

    let get_list = |key: &str| -> Vec<String> {
        parsed
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default()
    };

    Ok(clean_summary(StructuredSummary {
        title: parsed
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        bullets: get_list("summary_bullets"),
        decisions: get_list("decisions"),
        next_steps: get_list("next_steps"),
    }))
}

fn summary_prompt(text: &str, max_input_chars: usize) -> String {
    let safe_text: String = text.chars().take(max_input_chars).collect();
    format!(
        "Summarize this work session in concise project notes. \
         Return ONLY valid JSON with keys: title (string), summary_bullets (array), \
         decisions (array), next_steps (array). \
         Limit summary_bullets to max {}. \
         Return raw JSON only, no markdown fences.\n\nSESSION:\n{}",
        MAX_BULLETS, safe_text
    )
}

const SYSTEM_PROMPT: &str =
    "You write compact and precise engineering notes. Always respond with raw JSON only.";

// ============ Anthropic tier ============

/// Remote tier calling the Anthropic messages API.
/// Requires `ANTHROPIC_API_KEY` in the environment.
pub struct AnthropicSummarizer {
    model: String,
    max_input_chars: usize,
    max_output_tokens: u32,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicSummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.anthropic_model.clone(),
            max_input_chars: config.max_input_chars,
            max_output_tokens: config.max_output_tokens,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Summarizer for AnthropicSummarizer {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn summarize(&self, text: &str) -> Result<StructuredSummary> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "system": SYSTEM_PROMPT,
            "messages": [
                { "role": "user", "content": summary_prompt(text, self.max_input_chars) }
            ],
        });

        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("Anthropic request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Anthropic API error {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            );
        }

        let json: serde_json::Value = resp.json().await?;
        let content = json
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|block| block.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid Anthropic response: missing content text"))?;

        parse_summary_json(content)
    }
}

// ============ OpenAI tier ============

/// Remote tier calling the OpenAI chat completions API.
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAiSummarizer {
    model: String,
    max_input_chars: usize,
    max_output_tokens: u32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiSummarizer {
    pub fn new(config: &SummarizerConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.openai_model.clone(),
            max_input_chars: config.max_input_chars,
            max_output_tokens: config.max_output_tokens,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    fn name(&self) -> &str {
        "openai"
    }

    async fn summarize(&self, text: &str) -> Result<StructuredSummary> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": summary_prompt(text, self.max_input_chars) }
            ],
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("OpenAI request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "OpenAI API error {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            );
        }

        let json: serde_json::Value = resp.json().await?;
        let content = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.pointer("/message/content"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))?;

        parse_summary_json(content)
    }
}

// ============ Local deterministic tier ============

/// Deterministic rule-based extraction. Defined to never fail: any input,
/// including empty text, yields a summary.
pub struct LocalRulesSummarizer;

impl LocalRulesSummarizer {
    fn bullets_from(text: &str) -> Vec<String> {
        let lines: Vec<&str> = text.lines().map(|l| l.trim()).filter(|l| !l.is_empty()).collect();
        let mut bullets: Vec<String> = Vec::new();

        for line in &lines {
            let cleaned = line
                .trim_start_matches(|c: char| {
                    c == '-' || c == '*' || c == '.' || c == ')' || c.is_ascii_digit() || c == ' '
                })
                .trim()
                .to_string();
            if cleaned.chars().count() < 18 {
                continue;
            }
            if !bullets.contains(&cleaned) {
                bullets.push(cleaned);
            }
            if bullets.len() >= MAX_BULLETS {
                break;
            }
        }

        // Fill from sentence splits when line extraction came up short.
        if bullets.len() < MAX_BULLETS {
            let joined = lines.join(" ");
            for sentence in joined.split_inclusive(['.', '!', '?']) {
                let sentence = sentence.trim().to_string();
                if sentence.chars().count() < 24 {
                    continue;
                }
                if !bullets.contains(&sentence) {
                    bullets.push(sentence);
                }
                if bullets.len() >= MAX_BULLETS {
                    break;
                }
            }
        }

        clean_items(&bullets, MAX_BULLETS)
    }

    fn actions_from(text: &str) -> (Vec<String>, Vec<String>) {
        let mut decisions = Vec::new();
        let mut next_steps = Vec::new();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let lower = line.to_lowercase();
            if ["decision", "decided", "we will", "we choose"]
                .iter()
                .any(|k| lower.contains(k))
            {
                decisions.push(line.to_string());
            }
            if ["next step", "next:", "todo", "follow up", "open item"]
                .iter()
                .any(|k| lower.contains(k))
            {
                next_steps.push(line.to_string());
            }
        }
        (
            clean_items(&decisions, MAX_DECISIONS),
            clean_items(&next_steps, MAX_NEXT_STEPS),
        )
    }
}

#[async_trait]
impl Summarizer for LocalRulesSummarizer {
    fn name(&self) -> &str {
        "local"
    }

    async fn summarize(&self, text: &str) -> Result<StructuredSummary> {
        let bullets = Self::bullets_from(text);
        let (decisions, next_steps) = Self::actions_from(text);
        Ok(StructuredSummary {
            title: String::new(),
            bullets,
            decisions,
            next_steps,
        })
    }
}
