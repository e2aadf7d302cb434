//! HTTP route handlers for the signup server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /api/register` - Register a new server (tenant)
//! - `POST /v1/public/registration` - Same handler, versioned public path
//! - `GET /health` - Health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration
//! - The per-IP registration rate limiter
//! - The challenge verifier, tenant store and mail notifier, each behind a trait
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use modl_signup::config::Config;
//! use modl_signup::routes::{create_router, AppState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::from_config(config).expect("failed to build state");
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
//!         .await
//!         .unwrap();
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::notifier::{verification_email, Notifier, SmtpNotifier};
use crate::rate_limit::{RateLimitResult, RateLimiter};
use crate::store::{InMemoryTenantStore, TenantStore};
use crate::token::generate_verification_token;
use crate::turnstile::{ChallengeVerifier, TurnstileClient};
use crate::types::{NewTenant, RegistrationResponse, TenantRecord};
use crate::validation::parse_registration;

// ============================================================================
// Constants
// ============================================================================

/// Header carrying the original client address when behind a proxy.
const HEADER_FORWARDED_FOR: &str = "X-Forwarded-For";

/// Placeholder used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Maximum body size for registration requests (16 KB).
const MAX_BODY_SIZE: usize = 16 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Per-IP registration limiter.
    pub rate_limiter: RateLimiter,

    /// Human verification for submitted forms.
    pub verifier: Arc<dyn ChallengeVerifier>,

    /// Where tenants are persisted.
    pub store: Arc<dyn TenantStore>,

    /// Outbound mail for verification links.
    pub notifier: Arc<dyn Notifier>,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Builds the production state: Turnstile verification, SMTP delivery
    /// and an in-memory tenant store.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Internal`] if the HTTP client or SMTP transport
    /// cannot be constructed from `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let verifier = TurnstileClient::new(
            config.turnstile_verify_url.clone(),
            config.turnstile_secret_key.clone(),
            config.outbound_timeout,
        )
        .map_err(|e| ServerError::internal(e.to_string()))?;
        if !verifier.has_secret() {
            warn!("TURNSTILE_SECRET_KEY is not set - every registration will fail security verification");
        }

        let notifier = SmtpNotifier::new(&config.smtp, &config.app_domain, config.outbound_timeout)
            .map_err(|e| ServerError::internal(e.to_string()))?;

        let rate_limiter = RateLimiter::new(config.registration_window);

        Ok(Self::with_components(
            config,
            rate_limiter,
            Arc::new(verifier),
            Arc::new(InMemoryTenantStore::new()),
            Arc::new(notifier),
        ))
    }

    /// Creates application state from explicit components.
    ///
    /// Useful for testing or when swapping the store or mail backend.
    #[must_use]
    pub fn with_components(
        config: Config,
        rate_limiter: RateLimiter,
        verifier: Arc<dyn ChallengeVerifier>,
        store: Arc<dyn TenantStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            rate_limiter,
            verifier,
            store,
            notifier,
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("rate_limiter", &self.rate_limiter)
            .field("verifier", &"<dyn ChallengeVerifier>")
            .field("store", &"<dyn TenantStore>")
            .field("notifier", &"<dyn Notifier>")
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so the
/// peer address is available when no trusted proxy header is present.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/register", post(post_register))
        .route("/v1/public/registration", post(post_register))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Client address
// ============================================================================

/// The address a request is attributed to for rate limiting.
///
/// Resolved from the first `X-Forwarded-For` hop when the proxy is trusted,
/// otherwise from the socket peer, otherwise [`UNKNOWN_CLIENT`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    /// The address to forward to the challenge provider, if known.
    pub fn as_remote_ip(&self) -> Option<&str> {
        (self.0 != UNKNOWN_CLIENT).then_some(self.0.as_str())
    }
}

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        if state.config.trust_proxy {
            let forwarded = parts
                .headers
                .get(HEADER_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return Ok(Self(ip.to_string()));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(Self(peer.unwrap_or_else(|| UNKNOWN_CLIENT.to_string())))
    }
}

// ============================================================================
// POST /api/register - Registration
// ============================================================================

/// POST /api/register - Register a new server.
///
/// # Flow
///
/// 1. Reserve this client's registration slot, or reject if it is taken
/// 2. Validate the form, reporting every bad field
/// 3. Verify the challenge token
/// 4. Create the tenant (the store enforces email and subdomain uniqueness)
/// 5. Commit the slot, measured from request arrival; on any earlier failure
///    the reservation is released instead
/// 6. Send the verification email (failures are logged, not returned)
///
/// # Responses
///
/// - `201 Created` - Tenant created
/// - `400 Bad Request` - Invalid form or failed challenge
/// - `409 Conflict` - Email or subdomain already registered
/// - `413 Payload Too Large` - Body exceeds 16 KB
/// - `429 Too Many Requests` - Registered too recently, or a registration
///   from this client is still in progress
/// - `500 Internal Server Error` - Store failure
async fn post_register(
    State(state): State<AppState>,
    client_ip: ClientIp,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let started_at = Instant::now();
    let ip = client_ip.0.as_str();

    if let RateLimitResult::Limited { retry_after_secs } =
        state.rate_limiter.acquire(ip, started_at).await
    {
        info!(
            client_ip = %ip,
            retry_after = retry_after_secs,
            "Registration rate limit exceeded"
        );
        return Err(ServerError::rate_limit(ip, retry_after_secs));
    }

    let tenant = match create_tenant(&state, &client_ip, &body).await {
        Ok(tenant) => tenant,
        Err(err) => {
            state.rate_limiter.release(ip).await;
            return Err(err);
        }
    };

    state.rate_limiter.record(ip, started_at).await;

    info!(
        tenant_id = %tenant.id,
        custom_domain = %tenant.custom_domain,
        plan = %tenant.plan,
        "Server registered"
    );

    let mail = verification_email(
        &tenant.admin_email,
        &tenant.custom_domain,
        &state.config.app_domain,
        &tenant.email_verification_token,
    );
    if let Err(err) = state.notifier.send_mail(&mail).await {
        warn!(
            tenant_id = %tenant.id,
            error = %err,
            "Failed to send verification email"
        );
    }

    Ok((StatusCode::CREATED, Json(RegistrationResponse::created(&tenant))))
}

/// Validates, verifies and persists one registration.
async fn create_tenant(state: &AppState, client_ip: &ClientIp, body: &[u8]) -> Result<TenantRecord> {
    let ip = client_ip.0.as_str();

    let request = parse_registration(body).map_err(|errors| {
        debug!(client_ip = %ip, error_count = errors.len(), "Registration failed validation");
        ServerError::validation(errors)
    })?;

    if !state
        .verifier
        .verify(&request.challenge_token, client_ip.as_remote_ip())
        .await
    {
        info!(client_ip = %ip, "Registration challenge verification failed");
        return Err(ServerError::ChallengeFailed);
    }

    let token = generate_verification_token();
    let tenant = state
        .store
        .create_server(NewTenant::from_request(&request, token))
        .await
        .inspect_err(|err| debug!(client_ip = %ip, error = %err, "Tenant creation rejected"))?;

    Ok(tenant)
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,

    /// Number of client addresses currently inside their registration window.
    pub rate_limited_clients: usize,
}

/// GET /health - Health check endpoint.
///
/// ```json
/// {
///   "status": "ok",
///   "uptime_seconds": 3600,
///   "rate_limited_clients": 3
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        rate_limited_clients: state.rate_limiter.source_count().await,
    })
}

// ============================================================================
// Tests
// ============================================================================
