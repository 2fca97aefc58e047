//! Pluggable password hashing capability.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier as _};
use rand::rngs::OsRng;

use crate::error::Error;

/// Outcome of a hash comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordVerify {
    Failed,
    Success,
    /// The password matched but was hashed under outdated parameters; the
    /// caller should rehash and persist.
    SuccessRehashNeeded,
}

pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext password into an opaque, self-describing string.
    ///
    /// # Errors
    ///
    /// Returns an error if the hashing backend fails.
    fn hash(&self, password: &str) -> Result<String, Error>;

    /// Compare a plaintext password against a stored hash.
    fn verify(&self, hash: &str, password: &str) -> PasswordVerify;
}

/// Argon2id hasher with the crate's default parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2PasswordHasher;

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, password: &str) -> Result<String, Error> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|_| Error::Hash)
    }

    fn verify(&self, hash: &str, password: &str) -> PasswordVerify {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return PasswordVerify::Failed;
        };
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return PasswordVerify::Failed;
        }
        // Hashes produced under older cost parameters still verify; flag
        // them so the manager rehashes on the next successful check.
        let current = argon2::Params::default();
        let outdated = parsed.params.iter().any(|(ident, value)| {
            match ident.as_str() {
                "m" => value.decimal().is_ok_and(|m| m != current.m_cost()),
                "t" => value.decimal().is_ok_and(|t| t != current.t_cost()),
                "p" => value.decimal().is_ok_and(|p| p != current.p_cost()),
                _ => false,
            }
        });
        if outdated {
            PasswordVerify::SuccessRehashNeeded
        } else {
            PasswordVerify::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hasher = Argon2PasswordHasher;
        let hash = hasher.hash("hunter2!A").unwrap();
        assert_eq!(hasher.verify(&hash, "hunter2!A"), PasswordVerify::Success);
        assert_eq!(hasher.verify(&hash, "wrong"), PasswordVerify::Failed);
    }

    #[test]
    fn garbage_hash_fails_closed() {
        let hasher = Argon2PasswordHasher;
        assert_eq!(
            hasher.verify("not-a-phc-string", "hunter2!A"),
            PasswordVerify::Failed
        );
    }

    #[test]
    fn salts_differ_between_hashes() {
        let hasher = Argon2PasswordHasher;
        let first = hasher.hash("hunter2!A").unwrap();
        let second = hasher.hash("hunter2!A").unwrap();
        assert_ne!(first, second);
    }
}
