//! Recovery code vault primitives.
//!
//! Recovery codes are one-time secondary credentials for two-factor bypass.
//! Only salted hashes are stored; the plaintext batch is handed to the
//! caller exactly once at generation time. Replacing a batch invalidates
//! every unredeemed code from the previous one.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier as _};
use rand::{rngs::OsRng, RngCore};

use crate::error::Error;

const CODE_LEN: usize = 12;
const CODE_GROUP_SIZE: usize = 4;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated batch: plaintext codes for the caller, hashes for
/// the store. Random collisions are de-duplicated, so the batch may hold
/// fewer codes than requested.
#[derive(Debug)]
pub struct RecoveryCodeBatch {
    pub codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

impl RecoveryCodeBatch {
    /// Generate `count` fresh codes with their salted hashes.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS RNG or the hashing backend fails.
    pub fn generate(count: usize) -> Result<Self, Error> {
        let mut codes: Vec<String> = Vec::with_capacity(count);
        let mut code_hashes = Vec::with_capacity(count);
        for _ in 0..count {
            let code = generate_code()?;
            if codes.contains(&code) {
                continue;
            }
            let hash = hash_code(&code)?;
            codes.push(code);
            code_hashes.push(hash);
        }
        Ok(Self { codes, code_hashes })
    }
}

/// Strip separators and case from caller input. Returns `None` when the
/// input cannot be a code at all (wrong length or foreign characters).
#[must_use]
pub fn normalize_code(input: &str) -> Option<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != CODE_LEN {
        return None;
    }
    if !normalized.bytes().all(|ch| CODE_ALPHABET.contains(&ch)) {
        return None;
    }
    Some(normalized)
}

/// Check a candidate code against one stored hash.
#[must_use]
pub fn verify_code(code: &str, stored_hash: &str) -> bool {
    let Some(normalized) = normalize_code(code) else {
        return false;
    };
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok()
}

/// Produce one code in grouped display form (`XXXX-XXXX-XXXX`).
fn generate_code() -> Result<String, Error> {
    let mut raw = [0u8; CODE_LEN];
    OsRng.try_fill_bytes(&mut raw).map_err(|_| Error::Rng)?;
    let mut out = String::with_capacity(CODE_LEN + 2);
    for (idx, byte) in raw.iter().enumerate() {
        if idx > 0 && idx % CODE_GROUP_SIZE == 0 {
            out.push('-');
        }
        let alphabet_idx = usize::from(*byte) % CODE_ALPHABET.len();
        if let Some(&ch) = CODE_ALPHABET.get(alphabet_idx) {
            out.push(ch as char);
        }
    }
    Ok(out)
}

fn hash_code(code: &str) -> Result<String, Error> {
    let normalized = normalize_code(code).ok_or(Error::Hash)?;
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(normalized.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| Error::Hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_code_strips_separators_and_case() {
        assert_eq!(
            normalize_code("abcd-efgh-jklm").as_deref(),
            Some("ABCDEFGHJKLM")
        );
    }

    #[test]
    fn normalize_code_rejects_wrong_shapes() {
        assert!(normalize_code("short").is_none());
        assert!(normalize_code("ABCD-EFGH-JKL0").is_none()); // 0 not in alphabet
    }

    #[test]
    fn generated_codes_verify_against_their_hashes() {
        let batch = RecoveryCodeBatch::generate(4).unwrap();
        assert_eq!(batch.codes.len(), batch.code_hashes.len());
        for (code, hash) in batch.codes.iter().zip(&batch.code_hashes) {
            assert!(verify_code(code, hash));
        }
    }

    #[test]
    fn foreign_code_does_not_verify() {
        let batch = RecoveryCodeBatch::generate(1).unwrap();
        let hash = batch.code_hashes.first().unwrap();
        assert!(!verify_code("AAAA-BBBB-CCCC", hash));
    }
}
