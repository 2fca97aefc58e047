//! Aggregated business outcomes.
//!
//! Validation and policy failures are values, not `Err`: every failing check
//! in an operation contributes one `(code, description)` entry and callers
//! branch on [`IdentityResult::succeeded`]. Codes are stable and are what
//! gets logged; descriptions are for humans and may change freely.

use serde::{Deserialize, Serialize};

/// One business failure: a stable machine code plus a human description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityError {
    pub code: String,
    pub description: String,
}

impl IdentityError {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
        }
    }

    pub fn default_error() -> Self {
        Self::new("DefaultError", "An unknown failure has occurred.")
    }

    /// The store rejected a version-checked write; the caller may retry.
    pub fn concurrency_failure() -> Self {
        Self::new(
            "ConcurrencyFailure",
            "Optimistic concurrency failure, object has been modified.",
        )
    }

    pub fn password_mismatch() -> Self {
        Self::new("PasswordMismatch", "Incorrect password.")
    }

    pub fn invalid_token() -> Self {
        Self::new("InvalidToken", "Invalid token.")
    }

    pub fn recovery_code_redemption_failed() -> Self {
        Self::new("RecoveryCodeRedemptionFailed", "Recovery code redemption failed.")
    }

    pub fn login_already_associated() -> Self {
        Self::new(
            "LoginAlreadyAssociated",
            "A user with this login already exists.",
        )
    }

    pub fn invalid_user_name(name: &str) -> Self {
        Self::new(
            "InvalidUserName",
            format!("User name '{name}' is invalid, can only contain letters or digits."),
        )
    }

    pub fn invalid_email(email: &str) -> Self {
        Self::new("InvalidEmail", format!("Email '{email}' is invalid."))
    }

    pub fn duplicate_user_name(name: &str) -> Self {
        Self::new(
            "DuplicateUserName",
            format!("User name '{name}' is already taken."),
        )
    }

    pub fn duplicate_email(email: &str) -> Self {
        Self::new("DuplicateEmail", format!("Email '{email}' is already taken."))
    }

    pub fn invalid_role_name(name: &str) -> Self {
        Self::new("InvalidRoleName", format!("Role name '{name}' is invalid."))
    }

    pub fn duplicate_role_name(name: &str) -> Self {
        Self::new(
            "DuplicateRoleName",
            format!("Role name '{name}' is already taken."),
        )
    }

    pub fn user_already_has_password() -> Self {
        Self::new(
            "UserAlreadyHasPassword",
            "User already has a password set.",
        )
    }

    pub fn user_lockout_not_enabled() -> Self {
        Self::new("UserLockoutNotEnabled", "Lockout is not enabled for this user.")
    }

    pub fn user_not_in_role(role: &str) -> Self {
        Self::new("UserNotInRole", format!("User is not in role '{role}'."))
    }

    pub fn password_too_short(length: usize) -> Self {
        Self::new(
            "PasswordTooShort",
            format!("Passwords must be at least {length} characters."),
        )
    }

    pub fn password_requires_non_alphanumeric() -> Self {
        Self::new(
            "PasswordRequiresNonAlphanumeric",
            "Passwords must have at least one non alphanumeric character.",
        )
    }

    pub fn password_requires_digit() -> Self {
        Self::new(
            "PasswordRequiresDigit",
            "Passwords must have at least one digit ('0'-'9').",
        )
    }

    pub fn password_requires_lower() -> Self {
        Self::new(
            "PasswordRequiresLower",
            "Passwords must have at least one lowercase ('a'-'z').",
        )
    }

    pub fn password_requires_upper() -> Self {
        Self::new(
            "PasswordRequiresUpper",
            "Passwords must have at least one uppercase ('A'-'Z').",
        )
    }
}

/// Aggregated result of a user/role/password operation.
///
/// Zero errors means success. Errors preserve validator registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResult {
    errors: Vec<IdentityError>,
}

impl IdentityResult {
    #[must_use]
    pub fn ok() -> Self {
        Self { errors: Vec::new() }
    }

    #[must_use]
    pub fn failed(errors: Vec<IdentityError>) -> Self {
        Self { errors }
    }

    #[must_use]
    pub fn failure(error: IdentityError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn errors(&self) -> &[IdentityError] {
        &self.errors
    }

    /// Stable error codes joined with `;`, the form that gets logged.
    #[must_use]
    pub fn codes(&self) -> String {
        self.errors
            .iter()
            .map(|error| error.code.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_succeeds() {
        assert!(IdentityResult::ok().succeeded());
        assert!(IdentityResult::default().succeeded());
    }

    #[test]
    fn failed_result_keeps_order() {
        let result = IdentityResult::failed(vec![
            IdentityError::password_too_short(6),
            IdentityError::password_requires_digit(),
        ]);
        assert!(!result.succeeded());
        assert_eq!(result.codes(), "PasswordTooShort;PasswordRequiresDigit");
    }

    #[test]
    fn single_failure_helper() {
        let result = IdentityResult::failure(IdentityError::invalid_token());
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.codes(), "InvalidToken");
    }
}
