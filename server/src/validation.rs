//! Registration payload validation.
//!
//! Incoming bodies are read field by field into [`RegistrationPayload`],
//! normalized (trimmed), then checked with `validator` derive rules. Every
//! violated field is reported, not just the first one.
//!
//! A body that is not a JSON object is treated as an empty form, so clients
//! sending garbage still get a per-field error list. Inside an object, a field
//! holding a non-string value is reported on its own without disturbing the
//! others.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::types::{FieldError, Plan, RegistrationRequest};

/// Subdomains tenants may not claim.
///
/// These either host our own services or would let a tenant impersonate staff.
pub const RESERVED_SUBDOMAINS: &[&str] = &[
    "admin",
    "administrator",
    "api",
    "app",
    "assets",
    "auth",
    "billing",
    "blog",
    "cdn",
    "dashboard",
    "dev",
    "docs",
    "email",
    "ftp",
    "help",
    "internal",
    "login",
    "logout",
    "mail",
    "modl",
    "moderator",
    "panel",
    "register",
    "root",
    "signup",
    "smtp",
    "staff",
    "staging",
    "static",
    "status",
    "support",
    "system",
    "test",
    "www",
];

/// Struct field name and wire name of every form field, in form order.
const FIELDS: &[(&str, &str)] = &[
    ("email", "email"),
    ("server_name", "serverName"),
    ("custom_domain", "customDomain"),
    ("plan", "plan"),
    ("turnstile_token", "turnstileToken"),
];

const EMAIL_MESSAGE: &str = "Please enter a valid email address";

const PLAN_MESSAGE: &str = "Plan must be either 'free' or 'premium'";

static SUBDOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Literal pattern, cannot fail to compile.
    Regex::new(r"^[a-z0-9-]+$").unwrap()
});

/// Registration form as sent by the signup page.
///
/// Missing fields are empty so that they become validation errors rather
/// than parse failures.
#[derive(Debug, Default, Validate)]
pub struct RegistrationPayload {
    #[validate(
        email(message = "Please enter a valid email address"),
        custom(function = "validate_email_domain")
    )]
    pub email: String,

    #[validate(length(
        min = 3,
        max = 100,
        message = "Server name must be between 3 and 100 characters"
    ))]
    pub server_name: String,

    #[validate(
        length(min = 3, max = 50, message = "Subdomain must be between 3 and 50 characters"),
        regex(
            path = *SUBDOMAIN_PATTERN,
            message = "Subdomain can only contain lowercase letters, numbers, and hyphens"
        ),
        custom(function = "validate_not_reserved")
    )]
    pub custom_domain: String,

    #[validate(custom(function = "validate_plan"))]
    pub plan: Option<String>,

    #[validate(length(min = 1, message = "Security verification is required"))]
    pub turnstile_token: String,
}

impl RegistrationPayload {
    /// Reads each form field from a request body independently.
    ///
    /// Returns the payload plus one error for every field whose value is
    /// present but not a string; such fields are left empty in the payload.
    pub fn from_body(body: &[u8]) -> (Self, Vec<FieldError>) {
        let object = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(object)) => object,
            Ok(other) => {
                debug!(
                    body_type = json_type(&other),
                    "Registration body is not a JSON object, treating as empty form"
                );
                Map::new()
            }
            Err(err) => {
                debug!(error = %err, "Unparseable registration body, treating as empty form");
                Map::new()
            }
        };

        let mut type_errors = Vec::new();
        let mut text = |wire: &'static str| match object.get(wire) {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => Some(value.clone()),
            Some(other) => {
                type_errors.push(FieldError::new(
                    wire,
                    format!("Expected string, received {}", json_type(other)),
                ));
                None
            }
        };

        let payload = Self {
            email: text("email").unwrap_or_default(),
            server_name: text("serverName").unwrap_or_default(),
            custom_domain: text("customDomain").unwrap_or_default(),
            plan: text("plan"),
            turnstile_token: text("turnstileToken").unwrap_or_default(),
        };

        (payload, type_errors)
    }

    /// Trims surrounding whitespace from every text field.
    fn normalize(mut self) -> Self {
        self.email = self.email.trim().to_string();
        self.server_name = self.server_name.trim().to_string();
        self.custom_domain = self.custom_domain.trim().to_string();
        self.plan = self.plan.map(|p| p.trim().to_string());
        self
    }
}

/// Parses and validates a raw registration body.
///
/// # Errors
///
/// Returns every violated field, in form order, when any constraint fails.
/// A field with a non-string value is reported once, with a type message.
///
/// # Example
///
/// ```rust
/// use modl_signup::validation::parse_registration;
///
/// let body = br#"{"email":"a@b.gg","serverName":"My Server","customDomain":"admin","turnstileToken":"t"}"#;
/// let errors = parse_registration(body).unwrap_err();
/// assert_eq!(errors[0].field, "customDomain");
/// ```
pub fn parse_registration(body: &[u8]) -> Result<RegistrationRequest, Vec<FieldError>> {
    let (payload, type_errors) = RegistrationPayload::from_body(body);
    let payload = payload.normalize();

    let mut errors = match payload.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => collect_field_errors(&errors),
    };

    if !type_errors.is_empty() {
        errors.retain(|e| !type_errors.iter().any(|t| t.field == e.field));
        errors.extend(type_errors);
        errors.sort_by_key(|e| field_position(&e.field));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let plan = match payload.plan.as_deref() {
        None | Some("") => Plan::default(),
        Some(value) => value
            .parse()
            .map_err(|_| vec![FieldError::new("plan", PLAN_MESSAGE)])?,
    };

    Ok(RegistrationRequest {
        email: payload.email,
        server_name: payload.server_name,
        custom_domain: payload.custom_domain,
        plan,
        challenge_token: payload.turnstile_token,
    })
}

/// Returns `true` if `subdomain` is on the reserved list, ignoring case.
pub fn is_reserved_subdomain(subdomain: &str) -> bool {
    RESERVED_SUBDOMAINS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(subdomain))
}

/// Requires a dotted domain part, which `validator`'s email rule does not.
///
/// Other malformed addresses are left to the email rule so they are reported once.
fn validate_email_domain(email: &str) -> Result<(), ValidationError> {
    match email.rsplit_once('@') {
        Some((_, domain)) if !domain.contains('.') => Err(ValidationError::new("email_domain")
            .with_message(Cow::Borrowed(EMAIL_MESSAGE))),
        _ => Ok(()),
    }
}

fn validate_not_reserved(subdomain: &str) -> Result<(), ValidationError> {
    if is_reserved_subdomain(subdomain) {
        return Err(ValidationError::new("reserved")
            .with_message(Cow::Borrowed("This subdomain is reserved. Please choose another one.")));
    }
    Ok(())
}

fn validate_plan(plan: &str) -> Result<(), ValidationError> {
    if plan.is_empty() || plan.parse::<Plan>().is_ok() {
        return Ok(());
    }
    Err(ValidationError::new("plan").with_message(Cow::Borrowed(PLAN_MESSAGE)))
}

/// Flattens `validator` output into wire-named field errors in form order.
fn collect_field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let field_errors = errors.field_errors();
    let mut collected = Vec::new();

    for (field, wire) in FIELDS {
        let Some(violations) = field_errors.get(*field) else {
            continue;
        };
        for violation in violations.iter() {
            let message = violation
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("invalid value ({})", violation.code));
            collected.push(FieldError::new(*wire, message));
        }
    }

    collected
}

/// Position of a wire field name in form order.
fn field_position(wire: &str) -> usize {
    FIELDS
        .iter()
        .position(|(_, name)| *name == wire)
        .unwrap_or(FIELDS.len())
}

/// The JSON type name used in type-mismatch messages.
fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
