//! Search index client.
//!
//! Talks to a managed full-text search service over a JSON REST API:
//! batched document upsert/delete keyed by `doc_id`, top-K queries, and
//! create-or-update of the index schema.
//!
//! The admin key is read from the `SEARCH_API_KEY` environment variable.
//!
//! # Retry Strategy
//!
//! Batch upserts retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::{SearchConfig, SyncConfig};
use crate::models::{RemoteDocument, SearchHit};

/// One staged mutation for a batch upsert call.
#[derive(Debug, Clone)]
pub enum IndexAction {
    /// Insert-or-update the document keyed by its `doc_id`.
    Upsert(RemoteDocument),
    /// Tombstone a superseded `doc_id`.
    Delete(String),
}

/// Document index keyed by `doc_id`, with batched mutation and top-K query.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Apply a batch of upserts/deletes. The whole batch succeeds or fails
    /// as a unit; transient failures are retried internally.
    async fn apply_batch(&self, actions: &[IndexAction]) -> Result<()>;

    /// Full-text query returning at most `top_k` ranked documents.
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>>;
}

/// REST implementation of [`SearchIndex`].
pub struct RestSearchIndex {
    config: SearchConfig,
    sync: SyncConfig,
    api_key: String,
    client: reqwest::Client,
}

impl RestSearchIndex {
    /// Build a client, verifying the admin key is present. A missing key is
    /// a configuration error and fatal for any index operation.
    pub fn new(config: &SearchConfig, sync: &SyncConfig) -> Result<Self> {
        let api_key =
            std::env::var("SEARCH_API_KEY").context("SEARCH_API_KEY environment variable not set")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(sync.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            sync: sync.clone(),
            api_key,
            client,
        })
    }

    fn docs_url(&self, operation: &str) -> String {
        format!(
            "{}/indexes/{}/docs/{}?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index,
            operation,
            self.config.api_version
        )
    }

    /// Create or update the index schema. Safe to re-run.
    pub async fn ensure_index(&self) -> Result<()> {
        let url = format!(
            "{}/indexes/{}?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.index,
            self.config.api_version
        );

        let schema = serde_json::json!({
            "name": self.config.index,
            "fields": [
                { "name": "doc_id", "type": "Edm.String", "key": true },
                { "name": "path", "type": "Edm.String", "filterable": true },
                { "name": "kind", "type": "Edm.String", "filterable": true, "facetable": true },
                { "name": "status", "type": "Edm.String", "filterable": true, "facetable": true },
                { "name": "chapter", "type": "Edm.String", "filterable": true, "facetable": true },
                { "name": "title", "type": "Edm.String", "searchable": true },
                { "name": "timestamp", "type": "Edm.String", "filterable": true },
                { "name": "searchable_text", "type": "Edm.String", "searchable": true },
            ],
        });

        let resp = self
            .client
            .put(&url)
            .header("api-key", &self.api_key)
            .json(&schema)
            .send()
            .await
            .with_context(|| format!("Failed to reach search endpoint {}", self.config.endpoint))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Index schema update failed (HTTP {}): {}",
                status,
                body.chars().take(400).collect::<String>()
            );
        }
        Ok(())
    }

    fn action_payload(actions: &[IndexAction]) -> serde_json::Value {
        let values: Vec<serde_json::Value> = actions
            .iter()
            .map(|action| match action {
                IndexAction::Upsert(doc) => {
                    let mut value = serde_json::to_value(doc).unwrap_or_default();
                    if let Some(obj) = value.as_object_mut() {
                        obj.insert(
                            "@search.action".to_string(),
                            serde_json::Value::String("mergeOrUpload".to_string()),
                        );
                    }
                    value
                }
                IndexAction::Delete(doc_id) => serde_json::json!({
                    "@search.action": "delete",
                    "doc_id": doc_id,
                }),
            })
            .collect();
        serde_json::json!({ "value": values })
    }
}

#[async_trait]
impl SearchIndex for RestSearchIndex {
    async fn apply_batch(&self, actions: &[IndexAction]) -> Result<()> {
        if actions.is_empty() {
            return Ok(());
        }

        let url = self.docs_url("index");
        let payload = Self::action_payload(actions);
        let mut last_err = None;

        for attempt in 0..=self.sync.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("api-key", &self.api_key)
                .json(&payload)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(());
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Search index error {}: {}",
                            status,
                            body.chars().take(300).collect::<String>()
                        ));
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body = response.text().await.unwrap_or_default();
                    bail!(
                        "Search index rejected batch (HTTP {}): {}",
                        status,
                        body.chars().take(400).collect::<String>()
                    );
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Batch upsert failed after retries")))
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let url = self.docs_url("search");
        let payload = serde_json::json!({
            "search": text,
            "top": top_k,
        });

        let resp = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to reach search endpoint {}", self.config.endpoint))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Search query failed (HTTP {}): {}",
                status,
                body.chars().take(400).collect::<String>()
            );
        }

        let json: serde_json::Value = resp.json().await?;
        parse_search_response(&json)
    }
}

/// Parse the `{"value": [...]}` search response into [`SearchHit`]s.
fn parse_search_response(json: &serde_json::Value) -> Result<Vec<SearchHit>> {
    let values = json
        .get("value")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid search response: missing value array"))?;

    let mut hits = Vec::with_capacity(values.len());
    for item in values {
        let get_str =
            |key: &str| -> String { item.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string() };
        hits.push(SearchHit {
            doc_id: get_str("doc_id"),
            path: get_str("path"),
            kind: get_str("kind"),
            title: get_str("title"),
            score: item
                .get("@search.score")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            text: get_str("searchable_text"),
        });
    }
    Ok(hits)
}
