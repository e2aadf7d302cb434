//! Cloudflare Turnstile challenge verification.
//!
//! The signup form embeds a Turnstile widget; its token is checked server-side
//! against the siteverify endpoint before anything is persisted.
//!
//! # Failure Policy
//!
//! Verification fails closed. A missing secret, a network error, a timeout,
//! a non-2xx status or a malformed body all count as "not verified". There
//! are no retries: one siteverify call per submission.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use modl_signup::turnstile::{ChallengeVerifier, TurnstileClient, DEFAULT_VERIFY_URL};
//!
//! let client = TurnstileClient::new(
//!     DEFAULT_VERIFY_URL,
//!     Some("0x4AAAAAAA...".to_string()),
//!     Duration::from_secs(5),
//! )?;
//!
//! if client.verify("token-from-widget", Some("203.0.113.7")).await {
//!     // human
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Production siteverify endpoint.
pub const DEFAULT_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

/// Errors that can occur while talking to the siteverify endpoint.
#[derive(Debug, Error)]
pub enum TurnstileError {
    /// No secret key is configured, so no token can be verified.
    #[error("turnstile secret key is not configured")]
    MissingSecret,

    /// The request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint is unreachable.
    #[error("turnstile unavailable: {0}")]
    Unavailable(String),

    /// Unexpected status or body from the endpoint.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Client configuration error.
    #[error("client configuration error: {0}")]
    Configuration(String),
}

/// Anything that can decide whether a challenge token came from a human.
#[async_trait]
pub trait ChallengeVerifier: Send + Sync {
    /// Returns `true` only if `token` is positively verified.
    ///
    /// `remote_ip` is forwarded to the challenge provider when known.
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> bool;
}

/// Form body sent to siteverify.
#[derive(Debug, Serialize)]
struct SiteverifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remoteip: Option<&'a str>,
}

/// Response body returned by siteverify.
///
/// `success` is required: a body without it does not parse and is treated as
/// a failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SiteverifyResponse {
    pub success: bool,

    #[serde(default, rename = "error-codes")]
    pub error_codes: Vec<String>,

    #[serde(default)]
    pub hostname: Option<String>,
}

/// HTTP client for the Turnstile siteverify API.
#[derive(Clone)]
pub struct TurnstileClient {
    /// The underlying HTTP client, with the request timeout applied.
    http_client: Client,

    /// Full siteverify URL.
    verify_url: String,

    /// Server-held secret. `None` means every verification fails.
    secret_key: Option<String>,

    timeout: Duration,
}

impl std::fmt::Debug for TurnstileClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnstileClient")
            .field("verify_url", &self.verify_url)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl TurnstileClient {
    /// Creates a new Turnstile client.
    ///
    /// # Errors
    ///
    /// Returns [`TurnstileError::Configuration`] if the HTTP client cannot be created.
    pub fn new(
        verify_url: impl Into<String>,
        secret_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TurnstileError> {
        let http_client = Client::builder().timeout(timeout).build().map_err(|e| {
            TurnstileError::Configuration(format!("failed to create HTTP client: {e}"))
        })?;

        Ok(Self {
            http_client,
            verify_url: verify_url.into(),
            secret_key: secret_key.filter(|s| !s.is_empty()),
            timeout,
        })
    }

    /// Returns `true` if a secret key is configured.
    pub fn has_secret(&self) -> bool {
        self.secret_key.is_some()
    }

    /// Calls siteverify for `token` and returns the parsed response.
    ///
    /// # Errors
    ///
    /// - [`TurnstileError::MissingSecret`] - No secret configured; no request is made
    /// - [`TurnstileError::Timeout`] - The request exceeded the configured timeout
    /// - [`TurnstileError::Unavailable`] - The endpoint is unreachable
    /// - [`TurnstileError::InvalidResponse`] - Non-2xx status or unparseable body
    pub async fn siteverify(
        &self,
        token: &str,
        remote_ip: Option<&str>,
    ) -> Result<SiteverifyResponse, TurnstileError> {
        let secret = self
            .secret_key
            .as_deref()
            .ok_or(TurnstileError::MissingSecret)?;

        debug!(url = %self.verify_url, "Verifying challenge token");

        let form = SiteverifyRequest {
            secret,
            response: token,
            remoteip: remote_ip,
        };

        let response = self
            .http_client
            .post(&self.verify_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TurnstileError::Timeout(self.timeout)
                } else if e.is_connect() {
                    TurnstileError::Unavailable(format!("connection failed: {e}"))
                } else {
                    TurnstileError::Unavailable(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Unexpected response from siteverify");
            return Err(TurnstileError::InvalidResponse(format!(
                "unexpected status {status}: {body}"
            )));
        }

        response.json().await.map_err(|e| {
            TurnstileError::InvalidResponse(format!("failed to parse siteverify response: {e}"))
        })
    }
}

#[async_trait]
impl ChallengeVerifier for TurnstileClient {
    async fn verify(&self, token: &str, remote_ip: Option<&str>) -> bool {
        match self.siteverify(token, remote_ip).await {
            Ok(response) => {
                if !response.success {
                    debug!(error_codes = ?response.error_codes, "Challenge token rejected");
                }
                response.success
            }
            Err(TurnstileError::MissingSecret) => {
                error!("TURNSTILE_SECRET_KEY is not set, rejecting challenge");
                false
            }
            Err(err) => {
                warn!(error = %err, "Challenge verification failed");
                false
            }
        }
    }
}
