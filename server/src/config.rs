//! Server configuration module.
//!
//! Parses configuration from environment variables for the registration server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PORT` | No | 8080 | HTTP server port |
//! | `APP_DOMAIN` | No | `modl.gg` | Base domain for panel links and the sender address |
//! | `TURNSTILE_SECRET_KEY` | No* | - | Turnstile siteverify secret |
//! | `TURNSTILE_VERIFY_URL` | No | Cloudflare siteverify | Siteverify endpoint |
//! | `SMTP_HOST` | No | `localhost` | SMTP relay host |
//! | `SMTP_PORT` | No | 25 | SMTP relay port |
//! | `SMTP_USERNAME` | No | - | SMTP username (used only with `SMTP_PASSWORD`) |
//! | `SMTP_PASSWORD` | No | - | SMTP password (used only with `SMTP_USERNAME`) |
//! | `MODL_TRUST_PROXY` | No | false | Resolve client IPs from `X-Forwarded-For` |
//! | `MODL_OUTBOUND_TIMEOUT_SECS` | No | 5 | Timeout for Turnstile and SMTP calls |
//! | `MODL_REGISTRATION_WINDOW_SECS` | No | 600 | Minimum spacing between registrations per IP |
//!
//! *Without a secret every registration fails challenge verification.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub use crate::error::ConfigError;
use crate::turnstile::DEFAULT_VERIFY_URL;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default application base domain.
pub const DEFAULT_APP_DOMAIN: &str = "modl.gg";

/// Default SMTP relay host.
const DEFAULT_SMTP_HOST: &str = "localhost";

/// Default SMTP relay port.
const DEFAULT_SMTP_PORT: u16 = 25;

/// Default timeout for outbound calls, in seconds.
const DEFAULT_OUTBOUND_TIMEOUT_SECS: u64 = 5;

/// Default registration window, in seconds.
const DEFAULT_REGISTRATION_WINDOW_SECS: u64 = 600;

/// SMTP relay settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SMTP_HOST.to_string(),
            port: DEFAULT_SMTP_PORT,
            username: None,
            password: None,
        }
    }
}

/// Server configuration parsed from environment variables.
#[derive(Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Base domain tenants are hosted under (`{subdomain}.{app_domain}`).
    pub app_domain: String,

    /// Turnstile siteverify secret.
    pub turnstile_secret_key: Option<String>,

    /// Turnstile siteverify endpoint.
    pub turnstile_verify_url: String,

    /// SMTP relay settings.
    pub smtp: SmtpConfig,

    /// When true, the client IP is read from `X-Forwarded-For`.
    pub trust_proxy: bool,

    /// Upper bound for challenge verification and mail delivery.
    pub outbound_timeout: Duration,

    /// Minimum spacing between successful registrations from one IP.
    pub registration_window: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("app_domain", &self.app_domain)
            .field(
                "turnstile_secret_key",
                &self.turnstile_secret_key.as_ref().map(|_| "<redacted>"),
            )
            .field("turnstile_verify_url", &self.turnstile_verify_url)
            .field("smtp", &self.smtp)
            .field("trust_proxy", &self.trust_proxy)
            .field("outbound_timeout", &self.outbound_timeout)
            .field("registration_window", &self.registration_window)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            app_domain: DEFAULT_APP_DOMAIN.to_string(),
            turnstile_secret_key: None,
            turnstile_verify_url: DEFAULT_VERIFY_URL.to_string(),
            smtp: SmtpConfig::default(),
            trust_proxy: false,
            outbound_timeout: Duration::from_secs(DEFAULT_OUTBOUND_TIMEOUT_SECS),
            registration_window: Duration::from_secs(DEFAULT_REGISTRATION_WINDOW_SECS),
        }
    }
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - A numeric variable does not parse
    /// - `APP_DOMAIN` is set but empty
    /// - A timeout or window is zero
    ///
    /// # Example
    ///
    /// ```no_run
    /// use modl_signup::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            port: parse_env("PORT", DEFAULT_PORT)?,
            app_domain: optional_env("APP_DOMAIN")
                .unwrap_or_else(|| DEFAULT_APP_DOMAIN.to_string()),
            turnstile_secret_key: non_empty_env("TURNSTILE_SECRET_KEY"),
            turnstile_verify_url: non_empty_env("TURNSTILE_VERIFY_URL")
                .unwrap_or_else(|| DEFAULT_VERIFY_URL.to_string()),
            smtp: SmtpConfig {
                host: non_empty_env("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
                port: parse_env("SMTP_PORT", DEFAULT_SMTP_PORT)?,
                username: non_empty_env("SMTP_USERNAME"),
                password: non_empty_env("SMTP_PASSWORD"),
            },
            trust_proxy: parse_bool_env("MODL_TRUST_PROXY"),
            outbound_timeout: Duration::from_secs(parse_env(
                "MODL_OUTBOUND_TIMEOUT_SECS",
                DEFAULT_OUTBOUND_TIMEOUT_SECS,
            )?),
            registration_window: Duration::from_secs(parse_env(
                "MODL_REGISTRATION_WINDOW_SECS",
                DEFAULT_REGISTRATION_WINDOW_SECS,
            )?),
        };

        config.validate()?;

        if config.smtp.username.is_some() != config.smtp.password.is_some() {
            warn!("Only one of SMTP_USERNAME/SMTP_PASSWORD is set - SMTP auth disabled");
        }

        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.app_domain.trim().is_empty() {
            return Err(ConfigError::invalid("APP_DOMAIN", "cannot be empty"));
        }

        if self.outbound_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "MODL_OUTBOUND_TIMEOUT_SECS",
                "must be greater than zero",
            ));
        }

        if self.registration_window.is_zero() {
            return Err(ConfigError::invalid(
                "MODL_REGISTRATION_WINDOW_SECS",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Parse a boolean environment variable.
///
/// Returns `true` if the variable is set to "true" (case-insensitive),
/// `false` otherwise.
fn parse_bool_env(name: &str) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Reads a variable, treating unset and non-unicode alike.
fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok()
}

/// Reads a variable, treating an empty value as unset.
fn non_empty_env(name: &str) -> Option<String> {
    optional_env(name).filter(|v| !v.trim().is_empty())
}

/// Parse a numeric environment variable, returning `default` if not set.
fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(name, format!("'{value}': {e}"))),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(env::VarError::NotUnicode(_)) => {
            Err(ConfigError::invalid(name, "contains invalid unicode"))
        }
    }
}
