//! Shared registration types.
//!
//! This module defines the data flowing through the registration flow: the
//! validated request, the tenant record owned by the store, and the JSON
//! bodies returned to clients.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscription plan chosen at signup.
///
/// Billing is handled by the panel itself; the signup flow only records the choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    #[default]
    Free,
    Premium,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            other => Err(format!("unknown plan '{other}'")),
        }
    }
}

/// A registration form that passed validation.
///
/// Values are already trimmed. Constructed only by
/// [`crate::validation::parse_registration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub email: String,
    pub server_name: String,
    pub custom_domain: String,
    pub plan: Plan,
    pub challenge_token: String,
}

/// Fields handed to the tenant store to create a new tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTenant {
    pub admin_email: String,
    pub server_name: String,
    pub custom_domain: String,
    pub plan: Plan,
    pub email_verification_token: String,
}

impl NewTenant {
    /// Builds the store input from a validated request and a fresh verification token.
    pub fn from_request(request: &RegistrationRequest, email_verification_token: String) -> Self {
        Self {
            admin_email: request.email.clone(),
            server_name: request.server_name.clone(),
            custom_domain: request.custom_domain.clone(),
            plan: request.plan,
            email_verification_token,
        }
    }
}

/// A persisted tenant.
///
/// `email_verified` starts out `false`; it is flipped by the panel's
/// verification-link handler, not by this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRecord {
    pub id: Uuid,
    pub admin_email: String,
    pub server_name: String,
    pub custom_domain: String,
    pub plan: Plan,
    #[serde(skip_serializing)]
    pub email_verification_token: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl TenantRecord {
    /// Creates an unverified tenant record with a fresh id.
    pub fn create(new: NewTenant) -> Self {
        Self {
            id: Uuid::new_v4(),
            admin_email: new.admin_email,
            server_name: new.server_name,
            custom_domain: new.custom_domain,
            plan: new.plan,
            email_verification_token: new.email_verification_token,
            email_verified: false,
            created_at: Utc::now(),
        }
    }
}

/// Unique tenant fields that can collide on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateField {
    Email,
    CustomDomain,
}

impl DuplicateField {
    /// Wire name of the field, as used in the request body.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::CustomDomain => "customDomain",
        }
    }
}

/// A single violated constraint on a request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Wire name of the field (e.g. `serverName`).
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Joins errors into `field: message, field: message`.
    pub fn summarize(errors: &[FieldError]) -> String {
        errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Summary of the created tenant returned on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedServer {
    pub id: Uuid,
    pub name: String,
}

/// Body of a successful registration (201).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub success: bool,
    pub message: String,
    pub server: CreatedServer,
}

impl RegistrationResponse {
    pub const SUCCESS_MESSAGE: &'static str =
        "Registration successful. Please check your email to verify your account.";

    pub fn created(tenant: &TenantRecord) -> Self {
        Self {
            success: true,
            message: Self::SUCCESS_MESSAGE.to_string(),
            server: CreatedServer {
                id: tenant.id,
                name: tenant.server_name.clone(),
            },
        }
    }
}

/// Body of every failed registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            errors: None,
            retry_after_seconds: None,
        }
    }

    pub fn with_errors(mut self, errors: Vec<FieldError>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_new_tenant() -> NewTenant {
        NewTenant {
            admin_email: "owner@example.com".to_string(),
            server_name: "Cool Server".to_string(),
            custom_domain: "coolserver".to_string(),
            plan: Plan::Free,
            email_verification_token: "abc123".to_string(),
        }
    }

    #[test]
    fn plan_defaults_to_free() {
        assert_eq!(Plan::default(), Plan::Free);
    }

    #[test]
    fn plan_parses_known_values_only() {
        assert_eq!("free".parse::<Plan>(), Ok(Plan::Free));
        assert_eq!("premium".parse::<Plan>(), Ok(Plan::Premium));
        assert!("Premium".parse::<Plan>().is_err());
        assert!("enterprise".parse::<Plan>().is_err());
    }

    #[test]
    fn plan_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Plan::Premium).unwrap(), r#""premium""#);
    }

    #[test]
    fn tenant_record_starts_unverified() {
        let record = TenantRecord::create(sample_new_tenant());
        assert!(!record.email_verified);
        assert_eq!(record.server_name, "Cool Server");
        assert_eq!(record.email_verification_token, "abc123");
    }

    #[test]
    fn tenant_record_ids_are_unique() {
        let a = TenantRecord::create(sample_new_tenant());
        let b = TenantRecord::create(sample_new_tenant());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn tenant_record_never_serializes_verification_token() {
        let record = TenantRecord::create(sample_new_tenant());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("emailVerificationToken").is_none());
        assert_eq!(json["customDomain"], "coolserver");
        assert_eq!(json["emailVerified"], false);
    }

    #[test]
    fn registration_response_shape() {
        let record = TenantRecord::create(sample_new_tenant());
        let json = serde_json::to_value(RegistrationResponse::created(&record)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["server"]["name"], "Cool Server");
        assert_eq!(json["server"]["id"], record.id.to_string());
    }

    #[test]
    fn error_response_omits_empty_optionals() {
        let json = serde_json::to_string(&ErrorResponse::new("nope")).unwrap();
        assert_eq!(json, r#"{"success":false,"message":"nope"}"#);
    }

    #[test]
    fn field_error_summary_joins_in_order() {
        let errors = vec![
            FieldError::new("serverName", "too short"),
            FieldError::new("customDomain", "reserved"),
        ];
        assert_eq!(
            FieldError::summarize(&errors),
            "serverName: too short, customDomain: reserved"
        );
    }

    #[test]
    fn duplicate_field_wire_names() {
        assert_eq!(DuplicateField::Email.as_str(), "email");
        assert_eq!(DuplicateField::CustomDomain.as_str(), "customDomain");
    }
}
