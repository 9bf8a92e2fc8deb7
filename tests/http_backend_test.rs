//! Widget backend HTTP client integration tests
//!
//! Runs `HttpBackend` against a `wiremock` server and checks paths, bodies
//! and status handling of every endpoint.

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hermine_session::api::http::HttpBackend;
use hermine_session::api::ConversationApi;
use hermine_session::config::BackendConfig;
use hermine_session::message::{normalize_all, Role};
use hermine_session::HermineError;

const BASE: &str = "/api/widget/acme/support";

fn make_backend(server: &MockServer) -> HttpBackend {
    HttpBackend::new(&BackendConfig {
        endpoint: server.uri(),
        account_id: "acme".to_string(),
        agent_slug: "support".to_string(),
        request_timeout_secs: 5,
    })
    .expect("valid backend config")
}

fn api_status(err: &anyhow::Error) -> Option<u16> {
    match err.downcast_ref::<HermineError>() {
        Some(HermineError::Api { status, .. }) => Some(*status),
        _ => None,
    }
}

#[tokio::test]
async fn test_create_conversation_returns_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/conversations", BASE)))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"conversation_id": 42})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = make_backend(&server);
    let id = backend.create_conversation().await.expect("create succeeds");
    assert_eq!(id, "42");
}

#[tokio::test]
async fn test_create_conversation_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/conversations", BASE)))
        .respond_with(ResponseTemplate::new(422).set_body_string("agent disabled"))
        .mount(&server)
        .await;

    let err = make_backend(&server)
        .create_conversation()
        .await
        .expect_err("create must fail");
    assert_eq!(api_status(&err), Some(422));
    assert!(err.to_string().contains("agent disabled"));
}

#[tokio::test]
async fn test_fetch_conversation_tolerates_malformed_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/conversations/c1", BASE)))
        .and(header("Accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c1",
            "messages": [
                {"id": "w1", "message_type": "ai", "result": "Willkommen!", "is_welcome_message": true},
                {"message_type": "ai"},
                {"id": "u1", "message_type": "user", "result": "Hallo"}
            ],
            "prompts": ["Öffnungszeiten?"],
            "inputPlaceholderEn": "Ask away",
            "privacyDisclaimer": "We store chats for 30 days."
        })))
        .mount(&server)
        .await;

    let conversation = make_backend(&server)
        .fetch_conversation("c1")
        .await
        .expect("fetch succeeds");
    assert_eq!(conversation.id.as_deref(), Some("c1"));
    assert_eq!(conversation.messages.len(), 3);
    assert_eq!(conversation.input_placeholder_en.as_deref(), Some("Ask away"));
    assert_eq!(conversation.prompts, Some(vec!["Öffnungszeiten?".to_string()]));

    let messages = normalize_all(&conversation.messages);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::Assistant);
    assert!(messages[0].is_welcome);
    assert_eq!(messages[1].role, Role::User);
}

#[tokio::test]
async fn test_fetch_conversation_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/conversations/missing", BASE)))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let err = make_backend(&server)
        .fetch_conversation("missing")
        .await
        .expect_err("fetch must fail");
    assert_eq!(api_status(&err), Some(404));
}

#[tokio::test]
async fn test_send_message_posts_tenant_and_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/conversations/c1/messages", BASE)))
        .and(body_json(json!({
            "conversation_id": "c1",
            "account_id": "acme",
            "agent_slug": "support",
            "message": "Wann habt ihr offen?"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let response = make_backend(&server)
        .send_message("c1", "Wann habt ihr offen?")
        .await
        .expect("send succeeds");
    assert!(response.is_ok());
}

#[tokio::test]
async fn test_send_message_refusal_is_not_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/conversations/c1/messages", BASE)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "error", "message": "quota exceeded"})),
        )
        .mount(&server)
        .await;

    let response = make_backend(&server)
        .send_message("c1", "Hallo")
        .await
        .expect("refusal still parses");
    assert!(!response.is_ok());
    assert_eq!(response.message.as_deref(), Some("quota exceeded"));
}

#[tokio::test]
async fn test_send_message_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}/conversations/c1/messages", BASE)))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = make_backend(&server)
        .send_message("c1", "Hallo")
        .await
        .expect_err("send must fail");
    assert_eq!(api_status(&err), Some(500));
}

#[tokio::test]
async fn test_fetch_theme() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}/theme", BASE)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Support Bot",
            "primary_500": "#ff6600",
            "unknown_field": true
        })))
        .mount(&server)
        .await;

    let theme = make_backend(&server).fetch_theme().await.expect("theme");
    assert_eq!(theme.name.as_deref(), Some("Support Bot"));
    assert_eq!(theme.primary_500.as_deref(), Some("#ff6600"));
    assert!(theme.logo.is_none());
}
