//! In-process vector store
//!
//! Brute-force Euclidean search over everything added. Good enough for a
//! single operator's memory and for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::RwLock;
use tracing::debug;

use crate::{validate_embedding, Metadata, ProviderError, QueryResult, Result, VectorStore};

#[derive(Debug, Clone)]
struct Record {
    id: String,
    embedding: Vec<f32>,
    metadata: Metadata,
    document: String,
}

/// Vector store held in memory
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    records: RwLock<Vec<Record>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<Metadata>,
        documents: Vec<String>,
    ) -> Result<()> {
        let n = ids.len();
        if embeddings.len() != n || metadatas.len() != n || documents.len() != n {
            return Err(ProviderError::Store(format!(
                "column lengths differ: {} ids, {} embeddings, {} metadatas, {} documents",
                n,
                embeddings.len(),
                metadatas.len(),
                documents.len()
            )));
        }
        for embedding in &embeddings {
            validate_embedding(embedding)?;
        }

        let mut records = self
            .records
            .write()
            .map_err(|_| ProviderError::Store("store lock poisoned".to_string()))?;
        for (((id, embedding), metadata), document) in ids
            .into_iter()
            .zip(embeddings)
            .zip(metadatas)
            .zip(documents)
        {
            records.push(Record {
                id,
                embedding,
                metadata,
                document,
            });
        }
        debug!("vector store holds {} records", records.len());
        Ok(())
    }

    async fn query(
        &self,
        embedding: Vec<f32>,
        filter: Option<Value>,
        n_results: usize,
    ) -> Result<QueryResult> {
        validate_embedding(&embedding)?;
        let records = self
            .records
            .read()
            .map_err(|_| ProviderError::Store("store lock poisoned".to_string()))?;

        let mut scored: Vec<(f32, &Record)> = records
            .iter()
            .filter(|r| r.embedding.len() == embedding.len())
            .filter(|r| filter.as_ref().map_or(true, |f| matches_filter(&r.metadata, f)))
            .map(|r| (euclidean(&r.embedding, &embedding), r))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(n_results);

        let mut result = QueryResult::default();
        for (distance, record) in scored {
            result.ids.push(record.id.clone());
            result.metadatas.push(record.metadata.clone());
            result.distances.push(distance);
            result.documents.push(record.document.clone());
        }
        Ok(result)
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn matches_filter(metadata: &Metadata, filter: &Value) -> bool {
    let Some(clauses) = filter.as_object() else {
        return false;
    };
    clauses.iter().all(|(field, expected)| {
        if field == "$and" {
            return expected
                .as_array()
                .map_or(false, |parts| parts.iter().all(|p| matches_filter(metadata, p)));
        }
        let actual = metadata.get(field);
        match expected.get("$contains") {
            Some(needle) => contains(actual, needle),
            None => actual == Some(expected),
        }
    })
}

fn contains(actual: Option<&Value>, needle: &Value) -> bool {
    match (actual, needle) {
        (Some(Value::Array(items)), _) => items.contains(needle),
        (Some(Value::String(s)), Value::String(n)) => s.contains(n.as_str()),
        _ => false,
    }
}
