//! Conversation memory over an embedder and a vector store
//!
//! Every stored document carries a category, normalized metatags and the
//! logger's version stamps, so later tagging passes can tell old entries
//! from new ones.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use omnigate_eventlog::{utc_now_iso, EventLogger};
use omnigate_provider::{metatag_filter, validate_embedding, Embedder, Metadata, VectorStore};

use crate::Result;

/// One recalled document
#[derive(Debug, Clone, PartialEq)]
pub struct Recollection {
    pub id: String,
    pub document: String,
    pub distance: f32,
    pub metadata: Metadata,
}

pub struct MemoryRecorder {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    synonyms: HashMap<String, String>,
    logger: EventLogger,
}

impl MemoryRecorder {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        logger: &EventLogger,
    ) -> Self {
        Self {
            embedder,
            store,
            synonyms: HashMap::new(),
            logger: logger.scoped(["raw_text", "query_text"]),
        }
    }

    pub fn with_synonyms(mut self, synonyms: HashMap<String, String>) -> Self {
        self.synonyms = synonyms;
        self
    }

    /// Read a `{"tag": "canonical"}` JSON map; a missing file is an empty map
    pub async fn load_synonyms(path: &Path) -> Result<HashMap<String, String>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Map each tag through the synonym table, then lower-case it
    pub fn normalize_metatags<S: AsRef<str>>(&self, tags: &[S]) -> Vec<String> {
        tags.iter()
            .map(|tag| {
                let tag = tag.as_ref();
                self.synonyms
                    .get(tag)
                    .map(String::as_str)
                    .unwrap_or(tag)
                    .to_lowercase()
            })
            .collect()
    }

    fn metadata(&self, major_category: &str, metatags: Vec<String>, session_id: &str) -> Metadata {
        let value = json!({
            "major_category": major_category.to_lowercase(),
            "metatags": metatags,
            "session_id": session_id,
            "timestamp": utc_now_iso(),
            "system_version": self.logger.system_version(),
            "tagging_version": self.logger.tagging_version(),
        });
        match value {
            Value::Object(map) => map,
            _ => Metadata::new(),
        }
    }

    /// Embed and store `text`; returns the new document id
    pub async fn remember<S: AsRef<str>>(
        &self,
        text: &str,
        major_category: &str,
        metatags: &[S],
        session_id: &str,
    ) -> Result<String> {
        let embedding = self.embedder.embed(text).await?;
        if let Err(e) = validate_embedding(&embedding) {
            self.logger.log(
                "embedding_error",
                json!({"raw_text": text, "error": e.to_string()}),
            );
            return Err(e.into());
        }

        let metadata = self.metadata(major_category, self.normalize_metatags(metatags), session_id);
        let doc_id = uuid::Uuid::new_v4().to_string();
        self.store
            .add(
                vec![doc_id.clone()],
                vec![embedding],
                vec![metadata.clone()],
                vec![text.to_string()],
            )
            .await?;

        self.logger.log(
            "memory_stored",
            json!({"doc_id": doc_id, "session_id": session_id, "metadata": metadata}),
        );
        debug!("stored memory {}", doc_id);
        Ok(doc_id)
    }

    /// Nearest `n` memories to `query`, optionally restricted to a metatag
    pub async fn recall(
        &self,
        query: &str,
        metatag: Option<&str>,
        n: usize,
    ) -> Result<Vec<Recollection>> {
        let embedding = self.embedder.embed(query).await?;
        validate_embedding(&embedding)?;

        let filter = metatag
            .and_then(|tag| self.normalize_metatags(&[tag]).into_iter().next())
            .map(|tag| metatag_filter(&tag));
        let result = self.store.query(embedding, filter, n).await?;
        if result.ids.len() != result.documents.len() {
            warn!(
                "vector store returned {} ids but {} documents",
                result.ids.len(),
                result.documents.len()
            );
        }

        self.logger.log(
            "memory_query",
            json!({"query_text": query, "metatag": metatag, "result_count": result.len()}),
        );

        Ok(result
            .ids
            .into_iter()
            .zip(result.documents)
            .zip(result.distances)
            .zip(result.metadatas)
            .map(|(((id, document), distance), metadata)| Recollection {
                id,
                document,
                distance,
                metadata,
            })
            .collect())
    }
}
