//! Query pipeline.
//!
//! Retrieval-augmented answering over the remote search index: top-K
//! retrieval, a bounded context assembled from the hits, and one answer
//! model call with cite-by-number instructions. When retrieval returns
//! nothing the pipeline says so and never calls the model.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::{Config, QueryConfig};
use crate::models::SearchHit;
use crate::search_index::{RestSearchIndex, SearchIndex};

/// Per-document excerpt cap. Keeps one long record from crowding out the
/// rest of the context window.
const EXCERPT_CHARS: usize = 2000;

fn excerpt(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{}...", cut.trim_end())
}

/// Assemble the numbered context block sent to the answer model. Hits are
/// included in rank order until `max_context_chars` is reached; the first
/// hit is always included even if oversized.
pub fn assemble_context(hits: &[SearchHit], max_context_chars: usize) -> (String, usize) {
    let mut out = String::new();
    let mut used = 0;
    for (i, hit) in hits.iter().enumerate() {
        let block = format!(
            "[{}] {} ({}) {}\n{}\n\n",
            i + 1,
            hit.path,
            hit.kind,
            hit.title,
            excerpt(&hit.text, EXCERPT_CHARS)
        );
        if used > 0 && out.chars().count() + block.chars().count() > max_context_chars {
            break;
        }
        out.push_str(&block);
        used += 1;
    }
    (out, used)
}

fn answer_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer the question using ONLY the numbered sources below. \
         Cite sources inline as [1], [2], etc. \
         If the sources do not contain the answer, say so.\n\n\
         SOURCES:\n{}\nQUESTION: {}",
        context, question
    )
}

/// The model that turns retrieved context into a grounded answer.
#[async_trait]
pub trait AnswerModel: Send + Sync {
    async fn answer(&self, question: &str, context: &str) -> Result<String>;
}

/// [`AnswerModel`] backed by the Anthropic messages API.
/// `ANTHROPIC_API_KEY` is read at call time, so a zero-hit query needs no
/// credentials at all.
pub struct AnthropicAnswerer {
    config: QueryConfig,
    client: reqwest::Client,
}

impl AnthropicAnswerer {
    pub fn new(config: &QueryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }
}

#[async_trait]
impl AnswerModel for AnthropicAnswerer {
    async fn answer(&self, question: &str, context: &str) -> Result<String> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set")?;

        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "user", "content": answer_prompt(question, context) }
            ],
        });

        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("Answer model request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Answer model error {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            );
        }

        let json: serde_json::Value = resp.json().await?;
        json.get("content")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
            .and_then(|block| block.get("text"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid answer model response: missing content text"))
    }
}

/// Result of one query run.
#[derive(Debug)]
pub enum QueryOutcome {
    /// Retrieval came back empty; the model was not called.
    NoResults,
    /// A grounded answer over the sources that fit the context budget.
    Answered {
        sources: Vec<SearchHit>,
        answer: String,
    },
}

/// Run one query against the given backends. Zero hits short-circuit
/// before any model call.
pub async fn execute_query(
    index: &dyn SearchIndex,
    model: &dyn AnswerModel,
    query_config: &QueryConfig,
    question: &str,
    top_k: usize,
) -> Result<QueryOutcome> {
    let hits = index.query(question, top_k).await?;
    if hits.is_empty() {
        return Ok(QueryOutcome::NoResults);
    }

    let (context, used) = assemble_context(&hits, query_config.max_context_chars);
    let answer = model.answer(question, &context).await?;
    Ok(QueryOutcome::Answered {
        sources: hits.into_iter().take(used).collect(),
        answer,
    })
}

/// CLI entry point: wires the real backends and prints the outcome.
pub async fn run_query(config: &Config, question: &str, top_k: Option<usize>) -> Result<()> {
    let search_config = config.search.as_ref().ok_or_else(|| {
        anyhow::anyhow!("Missing [search] configuration; query needs a search index")
    })?;
    let index = RestSearchIndex::new(search_config, &config.sync)?;
    let model = AnthropicAnswerer::new(&config.query)?;

    let top_k = top_k.unwrap_or(config.query.top_k);
    match execute_query(&index, &model, &config.query, question, top_k).await? {
        QueryOutcome::NoResults => {
            println!("No relevant artifacts found.");
        }
        QueryOutcome::Answered { sources, answer } => {
            println!("Sources:");
            for (i, hit) in sources.iter().enumerate() {
                println!("  [{}] {} ({}) {}", i + 1, hit.path, hit.kind, hit.title);
            }
            println!();
            println!("{}", answer);
        }
    }
    Ok(())
}
