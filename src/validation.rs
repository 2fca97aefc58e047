//! Validator chains for users, passwords, and roles.
//!
//! Validators are values registered on a manager in order. A validation run
//! executes every registered validator and concatenates all errors; it never
//! stops at the first failure, so a caller sees the complete picture in one
//! round trip. Validation never mutates anything.

use async_trait::async_trait;
use regex::Regex;

use crate::model::{normalize_key, Role, User};
use crate::options::{ManagerOptions, PasswordOptions};
use crate::result::IdentityError;
use crate::store::{RoleStore, StoreError, UserStore};

#[async_trait]
pub trait UserValidator: Send + Sync {
    /// Check a candidate user, returning every violated rule.
    async fn validate(
        &self,
        store: &dyn UserStore,
        options: &ManagerOptions,
        user: &User,
    ) -> Result<Vec<IdentityError>, StoreError>;
}

pub trait PasswordValidator: Send + Sync {
    /// Check a plaintext candidate password. The hash is never available
    /// here; policy applies to what the user actually typed.
    fn validate(
        &self,
        options: &PasswordOptions,
        user: &User,
        password: &str,
    ) -> Vec<IdentityError>;
}

#[async_trait]
pub trait RoleValidator: Send + Sync {
    async fn validate(
        &self,
        store: &dyn RoleStore,
        role: &Role,
    ) -> Result<Vec<IdentityError>, StoreError>;
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Default user rules: non-empty name restricted to the allowed alphabet,
/// no second user under the same normalized name, and email format plus
/// optional uniqueness when configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultUserValidator;

#[async_trait]
impl UserValidator for DefaultUserValidator {
    async fn validate(
        &self,
        store: &dyn UserStore,
        options: &ManagerOptions,
        user: &User,
    ) -> Result<Vec<IdentityError>, StoreError> {
        let mut errors = Vec::new();

        let name = user.user_name.trim();
        let allowed = &options.user.allowed_user_name_characters;
        if name.is_empty()
            || (!allowed.is_empty() && !name.chars().all(|ch| allowed.contains(ch)))
        {
            errors.push(IdentityError::invalid_user_name(&user.user_name));
        } else if let Some(owner) = store.find_by_name(&user.normalized_user_name).await? {
            if owner.id != user.id {
                errors.push(IdentityError::duplicate_user_name(&user.user_name));
            }
        }

        if options.user.require_unique_email {
            match user.email.as_deref() {
                None => errors.push(IdentityError::invalid_email("")),
                Some(email) => {
                    if !valid_email(&email.to_lowercase()) {
                        errors.push(IdentityError::invalid_email(email));
                    } else if let Some(normalized) = user.normalized_email.as_deref() {
                        if let Some(owner) = store.find_by_email(normalized).await? {
                            if owner.id != user.id {
                                errors.push(IdentityError::duplicate_email(email));
                            }
                        }
                    }
                }
            }
        } else if let Some(email) = user.email.as_deref() {
            if !valid_email(&email.to_lowercase()) {
                errors.push(IdentityError::invalid_email(email));
            }
        }

        Ok(errors)
    }
}

/// Default password policy: length plus required character classes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPasswordValidator;

impl PasswordValidator for DefaultPasswordValidator {
    fn validate(
        &self,
        options: &PasswordOptions,
        _user: &User,
        password: &str,
    ) -> Vec<IdentityError> {
        let mut errors = Vec::new();
        if password.chars().count() < options.required_length {
            errors.push(IdentityError::password_too_short(options.required_length));
        }
        if options.require_non_alphanumeric && password.chars().all(char::is_alphanumeric) {
            errors.push(IdentityError::password_requires_non_alphanumeric());
        }
        if options.require_digit && !password.chars().any(|ch| ch.is_ascii_digit()) {
            errors.push(IdentityError::password_requires_digit());
        }
        if options.require_lowercase && !password.chars().any(char::is_lowercase) {
            errors.push(IdentityError::password_requires_lower());
        }
        if options.require_uppercase && !password.chars().any(char::is_uppercase) {
            errors.push(IdentityError::password_requires_upper());
        }
        errors
    }
}

/// Default role rules: non-empty name, unique normalized name.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRoleValidator;

#[async_trait]
impl RoleValidator for DefaultRoleValidator {
    async fn validate(
        &self,
        store: &dyn RoleStore,
        role: &Role,
    ) -> Result<Vec<IdentityError>, StoreError> {
        let mut errors = Vec::new();
        if role.name.trim().is_empty() {
            errors.push(IdentityError::invalid_role_name(&role.name));
        } else if let Some(owner) = store.find_role_by_name(&normalize_key(&role.name)).await? {
            if owner.id != role.id {
                errors.push(IdentityError::duplicate_role_name(&role.name));
            }
        }
        Ok(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[tokio::test]
    async fn duplicate_user_name_is_reported() {
        let store = MemoryStore::new();
        store.create_user(&User::new("alice")).await.unwrap();

        let candidate = User::new("ALICE");
        let errors = DefaultUserValidator
            .validate(&store, &ManagerOptions::default(), &candidate)
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "DuplicateUserName");
    }

    #[tokio::test]
    async fn same_user_is_not_its_own_duplicate() {
        let store = MemoryStore::new();
        let user = User::new("alice");
        store.create_user(&user).await.unwrap();

        let errors = DefaultUserValidator
            .validate(&store, &ManagerOptions::default(), &user)
            .await
            .unwrap();
        assert!(errors.is_empty());
    }

    #[test]
    fn weak_password_reports_every_violation() {
        let errors = DefaultPasswordValidator.validate(
            &PasswordOptions::default(),
            &User::new("alice"),
            "abc",
        );
        let codes: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(
            codes,
            vec![
                "PasswordTooShort",
                "PasswordRequiresNonAlphanumeric",
                "PasswordRequiresDigit",
                "PasswordRequiresUpper",
            ]
        );
    }

    #[test]
    fn strong_password_passes() {
        let errors = DefaultPasswordValidator.validate(
            &PasswordOptions::default(),
            &User::new("alice"),
            "Str0ng!pass",
        );
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn empty_role_name_is_invalid() {
        let store = MemoryStore::new();
        let errors = DefaultRoleValidator
            .validate(&store, &Role::new("  "))
            .await
            .unwrap();
        assert_eq!(errors[0].code, "InvalidRoleName");
    }
}
