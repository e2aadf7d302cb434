//! End-to-end tests for the registration flow over real TCP.
//!
//! The server runs with the real Turnstile client pointed at a wiremock
//! siteverify endpoint, the in-memory tenant store, and a notifier that
//! records mail instead of sending it. Requests go through `reqwest` so the
//! peer address comes from the socket, as in production.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use modl_signup::config::Config;
use modl_signup::notifier::{MailMessage, Notifier, NotifyError};
use modl_signup::rate_limit::RateLimiter;
use modl_signup::routes::{create_router, AppState};
use modl_signup::store::InMemoryTenantStore;
use modl_signup::turnstile::TurnstileClient;

// ============================================================================
// Test Helpers
// ============================================================================

const SITEVERIFY_PATH: &str = "/turnstile/v0/siteverify";

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<MailMessage>>,
}

#[async_trait]
impl Notifier for Outbox {
    async fn send_mail(&self, message: &MailMessage) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct TestServer {
    addr: SocketAddr,
    store: Arc<InMemoryTenantStore>,
    outbox: Arc<Outbox>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Mounts a siteverify mock that accepts `good-token` and rejects anything else.
async fn mock_turnstile() -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(SITEVERIFY_PATH))
        .and(body_string_contains("response=good-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "hostname": "modl.gg"
        })))
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(SITEVERIFY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error-codes": ["invalid-input-response"]
        })))
        .with_priority(2)
        .mount(&mock_server)
        .await;

    mock_server
}

/// Spawns the server on a random available port.
async fn spawn_test_server(turnstile: &MockServer) -> TestServer {
    let config = Config {
        port: 0,
        turnstile_secret_key: Some("integration-secret".to_string()),
        turnstile_verify_url: format!("{}{SITEVERIFY_PATH}", turnstile.uri()),
        outbound_timeout: Duration::from_secs(2),
        ..Config::default()
    };

    let verifier = TurnstileClient::new(
        config.turnstile_verify_url.clone(),
        config.turnstile_secret_key.clone(),
        config.outbound_timeout,
    )
    .unwrap();
    let store = Arc::new(InMemoryTenantStore::new());
    let outbox = Arc::new(Outbox::default());

    let state = AppState::with_components(
        config,
        RateLimiter::default(),
        Arc::new(verifier),
        store.clone(),
        outbox.clone(),
    );
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        store,
        outbox,
        handle,
    }
}

fn form(email: &str, domain: &str, token: &str) -> Value {
    json!({
        "email": email,
        "serverName": "Integration Network",
        "customDomain": domain,
        "plan": "premium",
        "turnstileToken": token
    })
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn registration_round_trip_over_tcp() {
    let turnstile = mock_turnstile().await;
    let server = spawn_test_server(&turnstile).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/api/register"))
        .json(&form("owner@example.com", "integration", "good-token"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["server"]["name"], "Integration Network");

    let tenant = server.store.find_by_domain("integration").await.unwrap();
    assert_eq!(body["server"]["id"], tenant.id.to_string());
    assert_eq!(tenant.plan.as_str(), "premium");

    let sent = server.outbox.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0]
        .html
        .contains("https://integration.modl.gg/verify-email?token="));

    // The socket peer is forwarded to siteverify.
    let requests = turnstile.received_requests().await.unwrap();
    let siteverify_body = String::from_utf8(requests[0].body.clone()).unwrap();
    assert!(siteverify_body.contains("secret=integration-secret"));
    assert!(siteverify_body.contains("remoteip=127.0.0.1"));
}

#[tokio::test]
async fn rejected_challenge_leaves_slot_available() {
    let turnstile = mock_turnstile().await;
    let server = spawn_test_server(&turnstile).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/api/register"))
        .json(&form("owner@example.com", "integration", "bad-token"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(server.store.is_empty().await);

    let response = client
        .post(server.url("/v1/public/registration"))
        .json(&form("owner@example.com", "integration", "good-token"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
}

#[tokio::test]
async fn second_registration_from_same_address_is_limited() {
    let turnstile = mock_turnstile().await;
    let server = spawn_test_server(&turnstile).await;
    let client = reqwest::Client::new();

    let first = client
        .post(server.url("/api/register"))
        .json(&form("first@example.com", "firstserver", "good-token"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), reqwest::StatusCode::CREATED);

    let second = client
        .post(server.url("/api/register"))
        .json(&form("second@example.com", "secondserver", "good-token"))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = second
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap();
    assert!(retry_after > 590 && retry_after <= 600);

    let body: Value = second.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["retryAfterSeconds"], retry_after);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("try again in 10 minutes"));

    assert_eq!(server.store.len().await, 1);
}

#[tokio::test]
async fn health_reports_limited_clients() {
    let turnstile = mock_turnstile().await;
    let server = spawn_test_server(&turnstile).await;
    let client = reqwest::Client::new();

    client
        .post(server.url("/api/register"))
        .json(&form("owner@example.com", "integration", "good-token"))
        .send()
        .await
        .unwrap();

    let health: Value = client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(health["status"], "ok");
    assert_eq!(health["rate_limited_clients"], 1);
}
