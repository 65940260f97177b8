//! Collaborator trait tests
//!
//! Mocks for the embedder and completer traits, plus the in-memory
//! vector store exercised through the `VectorStore` trait.

use async_trait::async_trait;
use mockall::mock;
use omnigate_provider::{
    metatag_filter, validate_embedding, ChatCompleter, ChatMessage, Embedder, Metadata,
    MemoryVectorStore, ProviderError, VectorStore,
};
use serde_json::json;

mock! {
    pub Embedder {}

    #[async_trait]
    impl Embedder for Embedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
    }
}

mock! {
    pub Completer {}

    #[async_trait]
    impl ChatCompleter for Completer {
        async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, ProviderError>;
    }
}

fn meta(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_mock_embedder_output_is_validated() {
    let mut mock = MockEmbedder::new();
    mock.expect_embed()
        .times(1)
        .returning(|_| Ok(vec![0.1, 0.2, 0.3]));

    let embedding = mock.embed("hello").await.unwrap();
    assert!(validate_embedding(&embedding).is_ok());
}

#[tokio::test]
async fn test_mock_embedder_bad_vector_rejected() {
    let mut mock = MockEmbedder::new();
    mock.expect_embed().returning(|_| Ok(vec![f32::NAN]));

    let embedding = mock.embed("x").await.unwrap();
    assert!(matches!(
        validate_embedding(&embedding),
        Err(ProviderError::InvalidEmbedding(_))
    ));
}

#[tokio::test]
async fn test_mock_completer_receives_transcript() {
    let mut mock = MockCompleter::new();
    mock.expect_complete()
        .withf(|messages| messages.len() == 2 && messages[1].role == "user")
        .times(1)
        .returning(|_| Ok("sure".to_string()));

    let reply = mock
        .complete(vec![ChatMessage::system("be brief"), ChatMessage::user("hi")])
        .await
        .unwrap();
    assert_eq!(reply, "sure");
}

#[tokio::test]
async fn test_mock_completer_error() {
    let mut mock = MockCompleter::new();
    mock.expect_complete()
        .returning(|_| Err(ProviderError::Api("quota exceeded".to_string())));

    match mock.complete(vec![]).await {
        Err(ProviderError::Api(msg)) => assert_eq!(msg, "quota exceeded"),
        other => panic!("expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_memory_store_nearest_first() {
    let store = MemoryVectorStore::new();
    store
        .add(
            vec!["far".into(), "near".into()],
            vec![vec![10.0, 10.0], vec![1.0, 0.0]],
            vec![meta(json!({"n": 1})), meta(json!({"n": 2}))],
            vec!["far doc".into(), "near doc".into()],
        )
        .await
        .unwrap();

    let result = store.query(vec![0.0, 0.0], None, 5).await.unwrap();
    assert_eq!(result.ids, vec!["near".to_string(), "far".to_string()]);
    assert_eq!(result.documents[0], "near doc");
    assert!(result.distances[0] < result.distances[1]);
    assert_eq!(result.metadatas[0]["n"], 2);
}

#[tokio::test]
async fn test_memory_store_metatag_filter_and_limit() {
    let store = MemoryVectorStore::new();
    store
        .add(
            vec!["a".into(), "b".into(), "c".into()],
            vec![vec![0.0], vec![1.0], vec![2.0]],
            vec![
                meta(json!({"metatags": ["rust"]})),
                meta(json!({"metatags": ["python"]})),
                meta(json!({"metatags": ["rust", "vault"]})),
            ],
            vec!["a".into(), "b".into(), "c".into()],
        )
        .await
        .unwrap();

    let result = store
        .query(vec![0.0], Some(metatag_filter("rust")), 10)
        .await
        .unwrap();
    assert_eq!(result.ids, vec!["a".to_string(), "c".to_string()]);

    let limited = store.query(vec![0.0], None, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_memory_store_rejects_misaligned_columns() {
    let store = MemoryVectorStore::new();
    let err = store
        .add(vec!["a".into()], vec![], vec![], vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Store(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_memory_store_rejects_invalid_embedding() {
    let store = MemoryVectorStore::new();
    let err = store
        .add(
            vec!["a".into()],
            vec![vec![]],
            vec![Metadata::new()],
            vec!["doc".into()],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidEmbedding(_)));
}
