//! User and role records plus their owned sub-entities.
//!
//! Claims are owned copies: two users holding an identical (kind, value)
//! claim hold independent entries, and mutating one never touches the other.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamp sentinel meaning "no lockout" even when `lockout_end` is set.
pub const LOCKOUT_END_NONE: i64 = 0;

/// Build the case-insensitive lookup key for user names, emails, and role
/// names: trimmed, uppercased.
#[must_use]
pub fn normalize_key(input: &str) -> String {
    input.trim().to_uppercase()
}

/// A (kind, value) pair owned by exactly one user or role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub kind: String,
    pub value: String,
}

impl Claim {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// One external credential. A (provider, provider_key) pair belongs to at
/// most one user globally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    pub provider: String,
    pub provider_key: String,
    pub display_name: String,
}

/// An arbitrary named value attached to a user, keyed by (provider, name).
/// The authenticator key lives here under an internal provider name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserToken {
    pub provider: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub user_name: String,
    pub normalized_user_name: String,
    pub email: Option<String>,
    pub normalized_email: Option<String>,
    pub email_confirmed: bool,
    /// Opaque output of the pluggable hasher. `None` means passwordless.
    pub password_hash: Option<String>,
    /// Invalidation anchor for issued tokens; rotated on every
    /// credential-relevant mutation.
    pub security_stamp: String,
    /// Compared by the store on write; a stale token means the record was
    /// modified concurrently.
    pub concurrency_token: Uuid,
    pub phone_number: Option<String>,
    pub phone_number_confirmed: bool,
    pub two_factor_enabled: bool,
    pub lockout_enabled: bool,
    /// Unix seconds; `None` or [`LOCKOUT_END_NONE`] means not locked.
    pub lockout_end: Option<i64>,
    pub access_failed_count: u32,
    pub claims: Vec<Claim>,
    /// Normalized role names.
    pub roles: BTreeSet<String>,
    pub logins: Vec<Login>,
    pub tokens: Vec<UserToken>,
    /// Salted hashes of unredeemed recovery codes.
    pub recovery_code_hashes: Vec<String>,
}

impl User {
    #[must_use]
    pub fn new(user_name: impl Into<String>) -> Self {
        let user_name = user_name.into();
        Self {
            id: Uuid::new_v4(),
            normalized_user_name: normalize_key(&user_name),
            user_name,
            email: None,
            normalized_email: None,
            email_confirmed: false,
            password_hash: None,
            security_stamp: String::new(),
            concurrency_token: Uuid::new_v4(),
            phone_number: None,
            phone_number_confirmed: false,
            two_factor_enabled: false,
            lockout_enabled: false,
            lockout_end: None,
            access_failed_count: 0,
            claims: Vec::new(),
            roles: BTreeSet::new(),
            logins: Vec::new(),
            tokens: Vec::new(),
            recovery_code_hashes: Vec::new(),
        }
    }

    pub(crate) fn find_token(&self, provider: &str, name: &str) -> Option<&UserToken> {
        self.tokens
            .iter()
            .find(|token| token.provider == provider && token.name == name)
    }

    pub(crate) fn set_token(&mut self, provider: &str, name: &str, value: String) {
        if let Some(existing) = self
            .tokens
            .iter_mut()
            .find(|token| token.provider == provider && token.name == name)
        {
            existing.value = value;
        } else {
            self.tokens.push(UserToken {
                provider: provider.to_string(),
                name: name.to_string(),
                value,
            });
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub normalized_name: String,
    pub concurrency_token: Uuid,
    pub claims: Vec<Claim>,
}

impl Role {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            normalized_name: normalize_key(&name),
            name,
            concurrency_token: Uuid::new_v4(),
            claims: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_trims_and_uppercases() {
        assert_eq!(normalize_key(" alice@Example.com "), "ALICE@EXAMPLE.COM");
    }

    #[test]
    fn new_user_starts_unlocked_and_stampless() {
        let user = User::new("alice");
        assert_eq!(user.normalized_user_name, "ALICE");
        assert!(user.security_stamp.is_empty());
        assert!(!user.lockout_enabled);
        assert_eq!(user.access_failed_count, 0);
        assert!(user.lockout_end.is_none());
    }

    #[test]
    fn user_record_serde_round_trip() {
        let mut user = User::new("alice");
        user.roles.insert("ADMIN".to_string());
        let json = serde_json::to_string(&user).unwrap();
        let back: User = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, user.id);
        assert_eq!(back.concurrency_token, user.concurrency_token);
        assert_eq!(back.roles, user.roles);
    }

    #[test]
    fn set_token_replaces_existing_value() {
        let mut user = User::new("alice");
        user.set_token("p", "n", "one".to_string());
        user.set_token("p", "n", "two".to_string());
        assert_eq!(user.tokens.len(), 1);
        assert_eq!(user.find_token("p", "n").map(|t| t.value.as_str()), Some("two"));
    }
}
