//! Collaborator interfaces
//!
//! The agent core talks to embedding models, chat models and vector stores
//! only through the traits in this crate. Concrete backends live outside
//! the workspace; [`MemoryVectorStore`] is an in-process store for local
//! runs and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use thiserror::Error;
use tracing::trace;

pub mod memory;

pub use memory::MemoryVectorStore;

/// Metadata attached to one stored document
pub type Metadata = Map<String, Value>;

/// Collaborator errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider rejected the call: {0}")]
    Api(String),

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("vector store error: {0}")]
    Store(String),

    #[error("provider payload error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// One turn of a chat transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Text to vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Chat completion
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String>;
}

/// Nearest-neighbour query result, columns aligned by index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub metadatas: Vec<Metadata>,
    pub distances: Vec<f32>,
    pub documents: Vec<String>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Document store with vector search
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert documents; all four columns must have the same length
    async fn add(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<Metadata>,
        documents: Vec<String>,
    ) -> Result<()>;

    /// Nearest `n_results` documents to `embedding` that match `filter`.
    ///
    /// Filters are objects of `field: value` equality clauses or
    /// `field: {"$contains": value}` clauses, combined with `$and`.
    async fn query(
        &self,
        embedding: Vec<f32>,
        filter: Option<Value>,
        n_results: usize,
    ) -> Result<QueryResult>;
}

/// Reject empty vectors and non-finite components
pub fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(ProviderError::InvalidEmbedding(
            "embedding is empty".to_string(),
        ));
    }
    if let Some(index) = embedding.iter().position(|x| !x.is_finite()) {
        return Err(ProviderError::InvalidEmbedding(format!(
            "component {} is not a finite number",
            index
        )));
    }
    trace!("embedding of {} dims accepted", embedding.len());
    Ok(())
}

/// Build a `$contains` filter on the `metatags` field
pub fn metatag_filter(tag: &str) -> Value {
    serde_json::json!({ "metatags": { "$contains": tag } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Api("quota".to_string());
        assert_eq!(err.to_string(), "provider rejected the call: quota");

        let err = ProviderError::InvalidEmbedding("embedding is empty".to_string());
        assert_eq!(err.to_string(), "invalid embedding: embedding is empty");
    }

    #[test]
    fn test_chat_message_builders() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
        let msg = ChatMessage::assistant(String::from("a"));
        assert_eq!(msg.role, "assistant");
        assert_eq!(msg.content, "a");
    }

    #[test]
    fn test_chat_message_serialization() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_validate_embedding_accepts_finite() {
        assert!(validate_embedding(&[0.0, -1.5, 3.25]).is_ok());
    }

    #[test]
    fn test_validate_embedding_rejects_empty() {
        assert!(matches!(
            validate_embedding(&[]),
            Err(ProviderError::InvalidEmbedding(_))
        ));
    }

    #[test]
    fn test_validate_embedding_rejects_nan_and_infinity() {
        match validate_embedding(&[1.0, f32::NAN]) {
            Err(ProviderError::InvalidEmbedding(msg)) => assert!(msg.contains("component 1")),
            other => panic!("expected InvalidEmbedding, got {:?}", other),
        }
        assert!(validate_embedding(&[f32::INFINITY]).is_err());
    }

    #[test]
    fn test_metatag_filter_shape() {
        assert_eq!(
            metatag_filter("rust"),
            serde_json::json!({"metatags": {"$contains": "rust"}})
        );
    }

    #[test]
    fn test_query_result_len() {
        let empty = QueryResult::default();
        assert!(empty.is_empty());
        let one = QueryResult {
            ids: vec!["a".into()],
            metadatas: vec![Metadata::new()],
            distances: vec![0.0],
            documents: vec!["doc".into()],
        };
        assert_eq!(one.len(), 1);
    }
}
