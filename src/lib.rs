//! Context Vault: a local-first store of project artifacts with cloud
//! search on top.
//!
//! Artifacts (requirements, gates, session summaries, chapter state) live
//! as versioned TOML records in a plain directory tree. The toolkit saves
//! summarized work sessions into the store, renders deterministic resume
//! digests from it, keeps a remote blob store and search index in sync
//! with it, and answers questions against the index with citations.
//!
//! | Module         | Responsibility                                        |
//! |----------------|-------------------------------------------------------|
//! | `config`       | TOML configuration with defaults and validation       |
//! | `models`       | Record kinds, statuses, and remote document shapes    |
//! | `store`        | Store scanning, record parsing, content hashing       |
//! | `manifest`     | Local sync bookkeeping (path -> hash, doc_id)         |
//! | `blob`         | S3-compatible blob uploads (SigV4)                    |
//! | `search_index` | REST search index client with retry/backoff           |
//! | `sync`         | Incremental sync pipeline over the two backends       |
//! | `summarize`    | Summarizer tiers and the fallback chain               |
//! | `save`         | Session capture into the store                        |
//! | `resume`       | Deterministic store digest                            |
//! | `query`        | Retrieval-augmented answering with citations          |
//! | `progress`     | Sync progress reporting (human / JSON / off)          |

pub mod blob;
pub mod config;
pub mod manifest;
pub mod models;
pub mod progress;
pub mod query;
pub mod resume;
pub mod save;
pub mod search_index;
pub mod store;
pub mod summarize;
pub mod sync;
