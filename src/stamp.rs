//! Security stamp generation.
//!
//! A stamp is an opaque random base32 string. Rotation always draws a fresh
//! value from the OS RNG; nothing is derived from the previous stamp.

use rand::{rngs::OsRng, RngCore};

use crate::error::Error;

const STAMP_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const STAMP_LEN: usize = 32;

/// Produce a fresh security stamp (also used for authenticator keys).
pub(crate) fn new_security_stamp() -> Result<String, Error> {
    let mut raw = [0u8; STAMP_LEN];
    OsRng.try_fill_bytes(&mut raw).map_err(|_| Error::Rng)?;
    let mut stamp = String::with_capacity(STAMP_LEN);
    for byte in raw {
        let idx = usize::from(byte) % STAMP_ALPHABET.len();
        if let Some(&ch) = STAMP_ALPHABET.get(idx) {
            stamp.push(ch as char);
        }
    }
    Ok(stamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_are_distinct_and_fixed_length() {
        let first = new_security_stamp().unwrap();
        let second = new_security_stamp().unwrap();
        assert_eq!(first.len(), STAMP_LEN);
        assert_eq!(second.len(), STAMP_LEN);
        assert_ne!(first, second);
    }

    #[test]
    fn stamps_stay_in_alphabet() {
        let stamp = new_security_stamp().unwrap();
        assert!(stamp.bytes().all(|ch| STAMP_ALPHABET.contains(&ch)));
    }
}
