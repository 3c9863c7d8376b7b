//! Request-field validation utilities
//!
//! Single source of truth for simple input validation. Password policy
//! enforcement is richer than a format check and lives in
//! [`crate::services::CredentialValidator`].

use crate::error::ValidationError;
use regex::Regex;
use std::sync::LazyLock;

/// Lazy-loaded email validation regex
///
/// Validates email addresses according to a practical subset of RFC 5322.
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("Invalid email regex pattern")
});

/// Validates an email address
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::MissingField(
            "Email is required".to_string(),
        ));
    }

    if email.len() > 254 {
        return Err(ValidationError::InvalidEmail(
            "Email is too long".to_string(),
        ));
    }

    if EMAIL_REGEX.is_match(email) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail(format!(
            "Invalid email format: {email}"
        )))
    }
}

/// The local part of an email address (everything before the `@`).
///
/// Used by the credential validator to reject passwords containing the
/// account's mailbox name.
pub fn email_local_part(email: &str) -> &str {
    email.split_once('@').map(|(local, _)| local).unwrap_or(email)
}

/// Validates that a required string field is present and non-blank
pub fn validate_required(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(format!(
            "{field} is required"
        )));
    }
    Ok(())
}

/// Validates an account display name
///
/// If provided, the name cannot be blank and is capped at 100 characters.
pub fn validate_name(name: Option<&str>) -> Result<(), ValidationError> {
    if let Some(name) = name {
        if name.trim().is_empty() {
            return Err(ValidationError::InvalidField(
                "Name cannot be empty or whitespace only".to_string(),
            ));
        }

        if name.len() > 100 {
            return Err(ValidationError::InvalidField(
                "Name must be no more than 100 characters long".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email_valid() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("test.email+tag@domain.co.uk").is_ok());
        assert!(validate_email("user123@test-domain.com").is_ok());
    }

    #[test]
    fn test_validate_email_invalid() {
        assert!(validate_email("").is_err());
        assert!(validate_email("invalid-email").is_err());
        assert!(validate_email("@domain.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());

        let long_email = format!("{}@example.com", "a".repeat(250));
        assert!(validate_email(&long_email).is_err());
    }

    #[test]
    fn test_email_local_part() {
        assert_eq!(email_local_part("alice@example.com"), "alice");
        assert_eq!(email_local_part("bob.smith@x.dev"), "bob.smith");
        assert_eq!(email_local_part("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn test_validate_required() {
        assert!(validate_required("password", "hunter2hunter2").is_ok());
        assert!(validate_required("password", "").is_err());
        assert!(validate_required("password", "   ").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name(None).is_ok());
        assert!(validate_name(Some("Ada Lovelace")).is_ok());
        assert!(validate_name(Some("")).is_err());
        assert!(validate_name(Some("   ")).is_err());
        assert!(validate_name(Some(&"a".repeat(101))).is_err());
    }
}
