//! Tests for the memory recorder

mod common;

use async_trait::async_trait;
use common::Fixture;
use mockall::mock;
use omnigate_agent::MemoryRecorder;
use omnigate_provider::{Embedder, MemoryVectorStore, ProviderError};
use std::collections::HashMap;
use std::sync::Arc;

mock! {
    pub Embed {}

    #[async_trait]
    impl Embedder for Embed {
        async fn embed(&self, text: &str) -> omnigate_provider::Result<Vec<f32>>;
    }
}

/// Embeds text as (length, vowel count)
fn counting_embedder() -> MockEmbed {
    let mut embedder = MockEmbed::new();
    embedder.expect_embed().returning(|text| {
        let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count();
        Ok(vec![text.len() as f32, vowels as f32])
    });
    embedder
}

fn synonyms() -> HashMap<String, String> {
    HashMap::from([
        ("K8s".to_string(), "Kubernetes".to_string()),
        ("pw".to_string(), "Password".to_string()),
    ])
}

#[test]
fn test_normalize_metatags() {
    let fx = Fixture::new();
    let recorder = MemoryRecorder::new(
        Arc::new(counting_embedder()),
        Arc::new(MemoryVectorStore::new()),
        &fx.logger,
    )
    .with_synonyms(synonyms());

    assert_eq!(
        recorder.normalize_metatags(&["K8s", "Deploy", "pw"]),
        vec!["kubernetes", "deploy", "password"]
    );
}

#[tokio::test]
async fn test_remember_builds_metadata() {
    let fx = Fixture::new();
    let store = Arc::new(MemoryVectorStore::new());
    let recorder = MemoryRecorder::new(Arc::new(counting_embedder()), store.clone(), &fx.logger)
        .with_synonyms(synonyms());

    let id = recorder
        .remember("restart the k8s cluster", "Ops", &["K8s"], "session-1")
        .await
        .unwrap();
    assert_eq!(store.len(), 1);

    let found = recorder
        .recall("restart the k8s cluster", Some("K8s"), 5)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, id);
    assert_eq!(found[0].document, "restart the k8s cluster");
    assert_eq!(found[0].distance, 0.0);

    let meta = &found[0].metadata;
    assert_eq!(meta["major_category"], "ops");
    assert_eq!(meta["metatags"], serde_json::json!(["kubernetes"]));
    assert_eq!(meta["session_id"], "session-1");
    assert_eq!(meta["system_version"], "1.0.0");
    assert_eq!(meta["tagging_version"], "1.0.0");
    assert!(meta["timestamp"].as_str().unwrap().contains('T'));

    // Raw text never reaches the event log
    let records = fx.logger.read_records().unwrap();
    let query = records
        .iter()
        .find(|r| r.event_type == "memory_query")
        .unwrap();
    assert_ne!(query.data["query_text"], "restart the k8s cluster");
}

#[tokio::test]
async fn test_recall_filters_by_metatag() {
    let fx = Fixture::new();
    let recorder = MemoryRecorder::new(
        Arc::new(counting_embedder()),
        Arc::new(MemoryVectorStore::new()),
        &fx.logger,
    );

    recorder
        .remember("vault pin rotated", "security", &["vault"], "s1")
        .await
        .unwrap();
    recorder
        .remember("deployed web tier", "ops", &["deploy"], "s1")
        .await
        .unwrap();

    let found = recorder.recall("anything", Some("Vault"), 10).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].document, "vault pin rotated");

    let all = recorder.recall("anything", None, 10).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_invalid_embedding_is_not_stored() {
    let fx = Fixture::new();
    let mut embedder = MockEmbed::new();
    embedder
        .expect_embed()
        .returning(|_| Ok(vec![1.0, f32::NAN]));
    let store = Arc::new(MemoryVectorStore::new());
    let recorder = MemoryRecorder::new(Arc::new(embedder), store.clone(), &fx.logger);

    assert!(recorder.remember("text", "general", &["user"], "s1").await.is_err());
    assert!(store.is_empty());
    assert!(fx
        .logger
        .read_records()
        .unwrap()
        .iter()
        .any(|r| r.event_type == "embedding_error"));
}

#[tokio::test]
async fn test_embedder_failure_propagates() {
    let fx = Fixture::new();
    let mut embedder = MockEmbed::new();
    embedder
        .expect_embed()
        .returning(|_| Err(ProviderError::Request("offline".to_string())));
    let recorder = MemoryRecorder::new(
        Arc::new(embedder),
        Arc::new(MemoryVectorStore::new()),
        &fx.logger,
    );

    let err = recorder
        .remember("text", "general", &["user"], "s1")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("offline"));
}

#[tokio::test]
async fn test_load_synonyms() {
    let fx = Fixture::new();
    let path = fx.base().join("synonyms.json");
    assert!(MemoryRecorder::load_synonyms(&path).await.unwrap().is_empty());

    std::fs::write(&path, r#"{"js": "JavaScript"}"#).unwrap();
    let map = MemoryRecorder::load_synonyms(&path).await.unwrap();
    assert_eq!(map.get("js").map(String::as_str), Some("JavaScript"));
}
