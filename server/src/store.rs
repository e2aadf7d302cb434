//! Tenant persistence.
//!
//! The [`TenantStore`] trait is the seam between the registration handler and
//! wherever tenants actually live. The store, not the handler, is the source
//! of truth for uniqueness: two concurrent registrations for the same email or
//! subdomain must result in exactly one tenant and one
//! [`StoreError::Duplicate`].
//!
//! [`InMemoryTenantStore`] holds tenants and both uniqueness indexes behind a
//! single lock so the check-and-insert is atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::types::{DuplicateField, NewTenant, TenantRecord};

/// Message returned when the admin email is already registered.
pub const DUPLICATE_EMAIL_MESSAGE: &str =
    "A server is already registered with this email address. Please use a different email.";

/// Message returned when the subdomain is already taken.
pub const DUPLICATE_DOMAIN_MESSAGE: &str =
    "This subdomain is already taken. Please choose a different one.";

/// Errors reported by a tenant store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique field (email or subdomain) is already in use.
    ///
    /// `message` is user-facing and is returned to the client verbatim.
    #[error("duplicate entry: {message}")]
    Duplicate {
        field: DuplicateField,
        message: String,
    },

    /// The backing store could not be reached or failed unexpectedly.
    #[error("tenant store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn duplicate(field: DuplicateField, message: impl Into<String>) -> Self {
        Self::Duplicate {
            field,
            message: message.into(),
        }
    }
}

/// Persists tenants created by the signup flow.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Creates a tenant from `new`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Duplicate`] if the email or subdomain is already used
    /// - [`StoreError::Unavailable`] for any other failure
    async fn create_server(&self, new: NewTenant) -> Result<TenantRecord, StoreError>;
}

/// Thread-safe in-memory tenant store.
#[derive(Debug, Default)]
pub struct InMemoryTenantStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    tenants: HashMap<Uuid, TenantRecord>,

    /// Lowercased admin email -> tenant id.
    emails: HashMap<String, Uuid>,

    /// Subdomain -> tenant id.
    domains: HashMap<String, Uuid>,
}

impl InMemoryTenantStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tenants.
    pub async fn len(&self) -> usize {
        self.inner.read().await.tenants.len()
    }

    /// Returns `true` if no tenant has been stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Looks up a tenant by subdomain.
    pub async fn find_by_domain(&self, custom_domain: &str) -> Option<TenantRecord> {
        let inner = self.inner.read().await;
        let id = inner.domains.get(&custom_domain.to_ascii_lowercase())?;
        inner.tenants.get(id).cloned()
    }

    /// Looks up a tenant by admin email, ignoring case.
    pub async fn find_by_email(&self, email: &str) -> Option<TenantRecord> {
        let inner = self.inner.read().await;
        let id = inner.emails.get(&email.to_lowercase())?;
        inner.tenants.get(id).cloned()
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn create_server(&self, new: NewTenant) -> Result<TenantRecord, StoreError> {
        let email_key = new.admin_email.to_lowercase();
        let domain_key = new.custom_domain.to_ascii_lowercase();

        let mut inner = self.inner.write().await;

        if inner.emails.contains_key(&email_key) {
            debug!("Rejecting tenant with duplicate admin email");
            return Err(StoreError::duplicate(
                DuplicateField::Email,
                DUPLICATE_EMAIL_MESSAGE,
            ));
        }

        if inner.domains.contains_key(&domain_key) {
            debug!(custom_domain = %domain_key, "Rejecting tenant with duplicate subdomain");
            return Err(StoreError::duplicate(
                DuplicateField::CustomDomain,
                DUPLICATE_DOMAIN_MESSAGE,
            ));
        }

        let record = TenantRecord::create(new);
        trace!(tenant_id = %record.id, custom_domain = %record.custom_domain, "Storing tenant");

        inner.emails.insert(email_key, record.id);
        inner.domains.insert(domain_key, record.id);
        inner.tenants.insert(record.id, record.clone());

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::types::Plan;

    fn new_tenant(email: &str, domain: &str) -> NewTenant {
        NewTenant {
            admin_email: email.to_string(),
            server_name: "Test Server".to_string(),
            custom_domain: domain.to_string(),
            plan: Plan::Free,
            email_verification_token: "token".to_string(),
        }
    }

    #[tokio::test]
    async fn creates_tenant_with_generated_id() {
        let store = InMemoryTenantStore::new();
        let record = store
            .create_server(new_tenant("a@example.com", "alpha"))
            .await
            .unwrap();

        assert_eq!(record.server_name, "Test Server");
        assert!(!record.email_verified);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.find_by_domain("alpha").await, Some(record));
    }

    #[tokio::test]
    async fn rejects_duplicate_email_ignoring_case() {
        let store = InMemoryTenantStore::new();
        store
            .create_server(new_tenant("owner@example.com", "alpha"))
            .await
            .unwrap();

        let err = store
            .create_server(new_tenant("Owner@Example.com", "beta"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StoreError::duplicate(DuplicateField::Email, DUPLICATE_EMAIL_MESSAGE)
        );
        assert_eq!(store.len().await, 1);
        assert!(store.find_by_domain("beta").await.is_none());
    }

    #[tokio::test]
    async fn rejects_duplicate_subdomain() {
        let store = InMemoryTenantStore::new();
        store
            .create_server(new_tenant("a@example.com", "alpha"))
            .await
            .unwrap();

        let err = store
            .create_server(new_tenant("b@example.com", "alpha"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Duplicate {
                field: DuplicateField::CustomDomain,
                ..
            }
        ));
        assert!(store.find_by_email("b@example.com").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_identical_registrations_create_one_tenant() {
        let store = Arc::new(InMemoryTenantStore::new());

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .create_server(new_tenant("race@example.com", "race"))
                        .await
                })
            })
            .collect();

        let mut created = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(StoreError::Duplicate { .. }) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(duplicates, 19);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn empty_store_reports_empty() {
        let store = InMemoryTenantStore::new();
        assert!(store.is_empty().await);
        assert!(store.find_by_email("nobody@example.com").await.is_none());
    }

    #[test]
    fn store_error_display() {
        assert_eq!(
            StoreError::Unavailable("timeout".into()).to_string(),
            "tenant store unavailable: timeout"
        );
        assert_eq!(
            StoreError::duplicate(DuplicateField::Email, "taken").to_string(),
            "duplicate entry: taken"
        );
    }
}
