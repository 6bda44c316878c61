//! ImpMail - importance filtering for email streams
//!
//! Decides which incoming emails matter to a user and surfaces them:
//! - Tiered classification: prototype similarity, then an LLM, then keywords
//! - Thread-deduplicated similarity ranking and outlier browsing
//! - Digests of the threads that arrived since the last one
//! - Dual-centroid scoring from explicit like/dislike selections
//!
//! # Architecture
//!
//! - **Types**: Core data structures (Email, Expectation, ClassificationResult)
//! - **Embeddings**: Gateway trait with hashing, remote and local providers
//! - **Storage**: Vector store (memory, SQLite) and mail store traits
//! - **Services**: LLM classification
//! - **Engine**: Wires every service from one configuration
//!
//! # Example
//!
//! ```ignore
//! use impmail_core::{ImpMail, ImpMailConfig, MemoryMailStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> impmail_core::Result<()> {
//!     let config = ImpMailConfig::load(None)?;
//!     let app = ImpMail::from_config(config, Arc::new(MemoryMailStore::new())).await?;
//!
//!     app.indexer.sync_user("alice").await?;
//!     let digest = app.digest.compute_digest("alice", true).await?;
//!     println!("{} threads", digest.items.len());
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod digest;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod expectations;
pub mod indexing;
pub mod preferences;
pub mod prototype;
pub mod ranking;
pub mod services;
pub mod storage;
pub mod sweep;
pub mod thread;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use classifier::{BatchReport, TieredClassifier};
pub use crate::config::ImpMailConfig;
pub use digest::{Digest, DigestEngine};
pub use embeddings::{cosine_similarity, EmbeddingGateway, HashingEmbedder};
pub use engine::ImpMail;
pub use error::{ImpMailError, Result};
pub use expectations::ExpectationService;
pub use indexing::{EmailIndexer, SyncReport};
pub use preferences::PreferenceService;
pub use prototype::{PrototypeBuilder, PrototypeCache};
pub use ranking::SimilarityRanker;
pub use storage::{MailStore, MemoryMailStore, MemoryVectorStore, SqliteVectorStore, VectorStore};
pub use sweep::{ClassificationSweep, SweepReport};
pub use thread::{thread_key, ThreadKey};
pub use types::{
    ClassificationMethod, ClassificationResult, DigestItem, Email, Expectation,
    ExpectationExamples, Importance, PreferenceScore, ScoredEmail,
};
