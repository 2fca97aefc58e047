//! Configuration for the user and role managers.

use serde::{Deserialize, Serialize};

/// Well-known token provider names registered by default.
pub const DEFAULT_PROVIDER: &str = "Default";
pub const PHONE_PROVIDER: &str = "Phone";
pub const EMAIL_PROVIDER: &str = "Email";
pub const AUTHENTICATOR_PROVIDER: &str = "Authenticator";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOptions {
    /// Characters permitted in user names. Empty disables the check.
    pub allowed_user_name_characters: String,
    /// When true, normalized email must be unique across all users.
    pub require_unique_email: bool,
}

impl Default for UserOptions {
    fn default() -> Self {
        Self {
            allowed_user_name_characters:
                "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-._@+".to_string(),
            require_unique_email: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordOptions {
    pub required_length: usize,
    pub require_non_alphanumeric: bool,
    pub require_lowercase: bool,
    pub require_uppercase: bool,
    pub require_digit: bool,
}

impl Default for PasswordOptions {
    fn default() -> Self {
        Self {
            required_length: 6,
            require_non_alphanumeric: true,
            require_lowercase: true,
            require_uppercase: true,
            require_digit: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutOptions {
    /// Whether freshly created users get lockout enabled.
    pub allowed_for_new_users: bool,
    /// Failures before lockout triggers. Zero locks on the first failure.
    pub max_failed_access_attempts: u32,
    /// How long a lockout lasts once triggered, in seconds.
    pub lockout_duration_secs: i64,
}

impl Default for LockoutOptions {
    fn default() -> Self {
        Self {
            allowed_for_new_users: true,
            max_failed_access_attempts: 5,
            lockout_duration_secs: 5 * 60,
        }
    }
}

/// Which registered provider serves each built-in token flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenOptions {
    pub password_reset_provider: String,
    pub email_confirmation_provider: String,
    pub change_email_provider: String,
    pub change_phone_provider: String,
}

impl Default for TokenOptions {
    fn default() -> Self {
        Self {
            password_reset_provider: DEFAULT_PROVIDER.to_string(),
            email_confirmation_provider: DEFAULT_PROVIDER.to_string(),
            change_email_provider: DEFAULT_PROVIDER.to_string(),
            change_phone_provider: PHONE_PROVIDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerOptions {
    pub user: UserOptions,
    pub password: PasswordOptions,
    pub lockout: LockoutOptions,
    pub tokens: TokenOptions,
}
