//! Tests for gated HTTP calls

mod common;

use common::Fixture;
use mockito::Matcher;
use omnigate_agent::handlers::ApiCallHandler;
use omnigate_agent::{ApprovalGate, HandlerRegistry};
use omnigate_config::HttpPolicy;
use omnigate_session::{ActionKind, SessionContext};
use serde_json::json;

fn gate(fx: &Fixture, policy: HttpPolicy) -> ApprovalGate {
    let mut registry = HandlerRegistry::new();
    registry.register(ApiCallHandler::new(policy, &fx.logger));
    ApprovalGate::new(registry, &fx.logger)
}

#[tokio::test]
async fn test_get_after_approval() {
    let fx = Fixture::new();
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/status")
        .match_header("x-token", "abc")
        .with_status(200)
        .with_body("all systems nominal")
        .create_async()
        .await;

    let gate = gate(&fx, HttpPolicy::default());
    let mut session = SessionContext::new("s1");
    let url = format!("{}/status", server.url());

    let prompt = gate
        .propose(
            ActionKind::ApiCall,
            json!({"url": url, "headers": {"x-token": "abc"}}),
            &mut session,
        )
        .await;
    assert_eq!(
        prompt,
        format!("Agent wants to call GET {}. Ok to run? (yes/ok/approve)", url)
    );

    let reply = gate.resolve_next("go ahead", &mut session).await.unwrap();
    assert_eq!(
        reply,
        format!("GET {} response (200):\nall systems nominal", url)
    );
    mock.assert_async().await;
    assert!(fx.events().contains(&"api_get".to_string()));
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let fx = Fixture::new();
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/deploy")
        .match_body(Matcher::Json(json!({"service": "web", "replicas": 2})))
        .with_status(201)
        .with_body("{\"queued\":true}")
        .create_async()
        .await;

    let gate = gate(&fx, HttpPolicy::default());
    let mut session = SessionContext::new("s1");
    let url = format!("{}/deploy", server.url());

    let prompt = gate
        .propose(
            ActionKind::ApiCall,
            json!({"method": "POST", "url": url, "body": {"service": "web", "replicas": 2}}),
            &mut session,
        )
        .await;
    assert!(prompt.starts_with(&format!("Agent wants to call POST {} with payload", url)));

    let reply = gate.resolve_next("yes", &mut session).await.unwrap();
    assert!(reply.starts_with(&format!("POST {} response (201):", url)));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_denied_call_sends_nothing() {
    let fx = Fixture::new();
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/never")
        .expect(0)
        .create_async()
        .await;

    let gate = gate(&fx, HttpPolicy::default());
    let mut session = SessionContext::new("s1");

    gate.propose(
        ActionKind::ApiCall,
        json!({"url": format!("{}/never", server.url())}),
        &mut session,
    )
    .await;
    let reply = gate.resolve_next("no", &mut session).await.unwrap();
    assert_eq!(reply, "API call not approved. Cancelling.");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_response_is_truncated_to_budget() {
    let fx = Fixture::new();
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/big")
        .with_body("x".repeat(5000))
        .create_async()
        .await;

    let policy = HttpPolicy {
        max_response_bytes: 100,
        ..HttpPolicy::default()
    };
    let gate = gate(&fx, policy);
    let mut session = SessionContext::new("s1");
    let url = format!("{}/big", server.url());

    gate.propose(ActionKind::ApiCall, json!({"url": url}), &mut session)
        .await;
    let reply = gate.resolve_next("ok", &mut session).await.unwrap();
    let body = reply.split_once('\n').unwrap().1;
    assert_eq!(body.len(), 100);
}

#[tokio::test]
async fn test_unreachable_host_reports_failure() {
    let fx = Fixture::new();
    let gate = gate(&fx, HttpPolicy::default());
    let mut session = SessionContext::new("s1");

    // Port 9 on localhost is not listening in the test environment
    gate.propose(
        ActionKind::ApiCall,
        json!({"url": "http://127.0.0.1:9/"}),
        &mut session,
    )
    .await;
    let reply = gate.resolve_next("yes", &mut session).await.unwrap();
    assert!(reply.starts_with("◆ API_CALL FAILED"), "got: {}", reply);
    assert!(fx.events().contains(&"api_error".to_string()));
}

#[tokio::test]
async fn test_invalid_urls_rejected() {
    let fx = Fixture::new();
    let gate = gate(&fx, HttpPolicy::default());
    let mut session = SessionContext::new("s1");

    let reply = gate
        .propose(ActionKind::ApiCall, json!({"url": ""}), &mut session)
        .await;
    assert_eq!(reply, "No URL provided.");

    let reply = gate
        .propose(
            ActionKind::ApiCall,
            json!({"url": "file:///etc/passwd"}),
            &mut session,
        )
        .await;
    assert!(reply.starts_with("◆ INVALID URL"));
    assert!(session.pending.is_empty());
}
