//! modl signup - Self-service server registration.
//!
//! This crate provides the public registration endpoint for the modl panel,
//! responsible for:
//! - Validating signup forms and rejecting reserved subdomains
//! - Verifying Cloudflare Turnstile challenges
//! - Limiting each client address to one registration per window
//! - Creating tenants and emailing a verification link
//!
//! # Architecture
//!
//! The handler in [`routes`] orchestrates three trait seams:
//! [`turnstile::ChallengeVerifier`], [`store::TenantStore`] and
//! [`notifier::Notifier`]. Production implementations talk to Turnstile, an
//! in-memory store and an SMTP relay; tests substitute their own.

pub mod config;
pub mod error;
pub mod notifier;
pub mod rate_limit;
pub mod routes;
pub mod store;
pub mod token;
pub mod turnstile;
pub mod types;
pub mod validation;
