//! Purpose-bound token providers.
//!
//! A provider turns (purpose, user) into an opaque token and verifies it
//! later by recomputing the same keyed function. Every built-in provider
//! mixes the user's current security stamp into the MAC input, so rotating
//! the stamp silently invalidates everything issued before the rotation.
//! Purposes are plain strings and may carry a target value
//! (`ChangeEmail:alice@example.com`), which scopes the token to that value.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::clock::Clock;
use crate::error::Error;
use crate::model::User;

type HmacSha256 = Hmac<Sha256>;

/// Internal provider name under which the authenticator key is stored in
/// the user's named-token map.
pub(crate) const AUTHENTICATOR_STORE: &str = "[AuthenticatorStore]";
pub(crate) const AUTHENTICATOR_KEY_NAME: &str = "AuthenticatorKey";

/// Collaborators a provider needs at generate/validate time. The signing
/// key is owned by the manager; providers never hold key material.
pub struct TokenContext<'a> {
    pub clock: &'a dyn Clock,
    pub key: &'a SecretString,
}

pub trait TokenProvider: Send + Sync {
    /// Produce a token for `purpose` bound to the user's current state.
    ///
    /// # Errors
    ///
    /// Returns an error when the user is missing state the provider
    /// requires (no security stamp, no authenticator key) or the MAC
    /// backend fails.
    fn generate(&self, cx: &TokenContext<'_>, purpose: &str, user: &User) -> Result<String, Error>;

    /// Recompute and compare. Side-effect free; wrong, expired, foreign,
    /// and post-rotation tokens all return `false`.
    fn validate(&self, cx: &TokenContext<'_>, purpose: &str, token: &str, user: &User) -> bool;

    /// Whether this provider is currently usable for the user (e.g. the
    /// phone provider needs a confirmed phone number).
    fn can_generate(&self, user: &User) -> bool;
}

fn mac_bytes(key: &SecretString, message: &str) -> Result<Vec<u8>, Error> {
    let mut mac = HmacSha256::new_from_slice(key.expose_secret().as_bytes())
        .map_err(|_| Error::Hash)?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn mac_verify(key: &SecretString, message: &str, tag: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(key.expose_secret().as_bytes()) else {
        return false;
    };
    mac.update(message.as_bytes());
    mac.verify_slice(tag).is_ok()
}

/// Default provider: an opaque, timestamped MAC token with a validity
/// window. Wire format is `base64url(issued_at) . base64url(tag)`.
#[derive(Debug, Clone, Copy)]
pub struct MacTokenProvider {
    pub validity_secs: i64,
}

impl Default for MacTokenProvider {
    fn default() -> Self {
        Self {
            validity_secs: 24 * 60 * 60,
        }
    }
}

impl MacTokenProvider {
    fn message(purpose: &str, user: &User, issued_at: i64) -> String {
        format!(
            "sigillo.token.v1\n{purpose}\n{}\n{}\n{issued_at}",
            user.id, user.security_stamp
        )
    }
}

impl TokenProvider for MacTokenProvider {
    fn generate(&self, cx: &TokenContext<'_>, purpose: &str, user: &User) -> Result<String, Error> {
        if user.security_stamp.is_empty() {
            return Err(Error::MissingSecurityStamp(user.id));
        }
        let issued_at = cx.clock.now_unix();
        let tag = mac_bytes(cx.key, &Self::message(purpose, user, issued_at))?;
        Ok(format!(
            "{}.{}",
            Base64UrlUnpadded::encode_string(&issued_at.to_be_bytes()),
            Base64UrlUnpadded::encode_string(&tag)
        ))
    }

    fn validate(&self, cx: &TokenContext<'_>, purpose: &str, token: &str, user: &User) -> bool {
        let Some((issued_b64, tag_b64)) = token.split_once('.') else {
            return false;
        };
        let Ok(issued_bytes) = Base64UrlUnpadded::decode_vec(issued_b64) else {
            return false;
        };
        let Ok(issued_arr) = <[u8; 8]>::try_from(issued_bytes.as_slice()) else {
            return false;
        };
        let issued_at = i64::from_be_bytes(issued_arr);
        let Ok(tag) = Base64UrlUnpadded::decode_vec(tag_b64) else {
            return false;
        };

        let now = cx.clock.now_unix();
        if issued_at > now || now - issued_at > self.validity_secs {
            return false;
        }
        mac_verify(cx.key, &Self::message(purpose, user, issued_at), &tag)
    }

    fn can_generate(&self, user: &User) -> bool {
        !user.security_stamp.is_empty()
    }
}

/// What user state a numeric code provider depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeRequirement {
    None,
    ConfirmedPhone,
    ConfirmedEmail,
    /// Codes are additionally keyed by the stored authenticator key.
    AuthenticatorKey,
}

/// Short numeric one-time codes for two-factor delivery (SMS, email) and
/// authenticator verification: six digits derived from a keyed MAC over
/// (purpose, user id, security stamp, time step).
#[derive(Debug, Clone, Copy)]
pub struct NumericCodeProvider {
    pub step_secs: i64,
    pub requirement: CodeRequirement,
}

impl NumericCodeProvider {
    #[must_use]
    pub fn new(requirement: CodeRequirement) -> Self {
        Self {
            step_secs: 90,
            requirement,
        }
    }

    fn key_material(&self, user: &User) -> Option<String> {
        match self.requirement {
            CodeRequirement::AuthenticatorKey => user
                .find_token(AUTHENTICATOR_STORE, AUTHENTICATOR_KEY_NAME)
                .map(|token| token.value.clone()),
            _ => Some(String::new()),
        }
    }

    fn code_at(
        &self,
        cx: &TokenContext<'_>,
        purpose: &str,
        user: &User,
        extra: &str,
        step: i64,
    ) -> Result<u32, Error> {
        let message = format!(
            "sigillo.code.v1\n{purpose}\n{}\n{}\n{extra}\n{step}",
            user.id, user.security_stamp
        );
        let tag = mac_bytes(cx.key, &message)?;
        let Ok(head) = <[u8; 4]>::try_from(&tag[..4]) else {
            return Err(Error::Hash);
        };
        Ok((u32::from_be_bytes(head) & 0x7fff_ffff) % 1_000_000)
    }
}

impl TokenProvider for NumericCodeProvider {
    fn generate(&self, cx: &TokenContext<'_>, purpose: &str, user: &User) -> Result<String, Error> {
        if user.security_stamp.is_empty() {
            return Err(Error::MissingSecurityStamp(user.id));
        }
        let extra = self
            .key_material(user)
            .ok_or(Error::MissingAuthenticatorKey(user.id))?;
        let step = cx.clock.now_unix() / self.step_secs;
        let code = self.code_at(cx, purpose, user, &extra, step)?;
        Ok(format!("{code:06}"))
    }

    fn validate(&self, cx: &TokenContext<'_>, purpose: &str, token: &str, user: &User) -> bool {
        if token.len() != 6 || !token.bytes().all(|ch| ch.is_ascii_digit()) {
            return false;
        }
        let Ok(candidate) = token.parse::<u32>() else {
            return false;
        };
        let Some(extra) = self.key_material(user) else {
            return false;
        };
        let current = cx.clock.now_unix() / self.step_secs;
        // One step of skew either way covers delivery latency.
        for step in [current - 1, current, current + 1] {
            if self
                .code_at(cx, purpose, user, &extra, step)
                .is_ok_and(|code| code == candidate)
            {
                return true;
            }
        }
        false
    }

    fn can_generate(&self, user: &User) -> bool {
        match self.requirement {
            CodeRequirement::None => true,
            CodeRequirement::ConfirmedPhone => {
                user.phone_number.is_some() && user.phone_number_confirmed
            }
            CodeRequirement::ConfirmedEmail => user.email.is_some() && user.email_confirmed,
            CodeRequirement::AuthenticatorKey => user
                .find_token(AUTHENTICATOR_STORE, AUTHENTICATOR_KEY_NAME)
                .is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn context<'a>(clock: &'a ManualClock, key: &'a SecretString) -> TokenContext<'a> {
        TokenContext { clock, key }
    }

    fn stamped_user() -> User {
        let mut user = User::new("alice");
        user.security_stamp = "STAMPSTAMPSTAMPSTAMPSTAMPSTAMP32".to_string();
        user
    }

    #[test]
    fn mac_token_round_trip() {
        let clock = ManualClock::new(1_000);
        let key = SecretString::from("signing-key");
        let cx = context(&clock, &key);
        let provider = MacTokenProvider::default();
        let user = stamped_user();

        let token = provider.generate(&cx, "ResetPassword", &user).unwrap();
        assert!(provider.validate(&cx, "ResetPassword", &token, &user));
    }

    #[test]
    fn mac_token_is_purpose_bound() {
        let clock = ManualClock::new(1_000);
        let key = SecretString::from("signing-key");
        let cx = context(&clock, &key);
        let provider = MacTokenProvider::default();
        let user = stamped_user();

        let token = provider
            .generate(&cx, "ChangeEmail:a@example.com", &user)
            .unwrap();
        assert!(!provider.validate(&cx, "ChangeEmail:b@example.com", &token, &user));
    }

    #[test]
    fn mac_token_dies_with_stamp_rotation() {
        let clock = ManualClock::new(1_000);
        let key = SecretString::from("signing-key");
        let cx = context(&clock, &key);
        let provider = MacTokenProvider::default();
        let mut user = stamped_user();

        let token = provider.generate(&cx, "ResetPassword", &user).unwrap();
        user.security_stamp = "ANOTHERSTAMPANOTHERSTAMPANOTHE32".to_string();
        assert!(!provider.validate(&cx, "ResetPassword", &token, &user));
    }

    #[test]
    fn mac_token_expires() {
        let clock = ManualClock::new(1_000);
        let key = SecretString::from("signing-key");
        let cx = context(&clock, &key);
        let provider = MacTokenProvider {
            validity_secs: 600,
        };
        let user = stamped_user();

        let token = provider.generate(&cx, "ResetPassword", &user).unwrap();
        clock.advance(601);
        assert!(!provider.validate(&cx, "ResetPassword", &token, &user));
    }

    #[test]
    fn mac_token_from_the_future_is_rejected() {
        let clock = ManualClock::new(1_000);
        let key = SecretString::from("signing-key");
        let cx = context(&clock, &key);
        let provider = MacTokenProvider::default();
        let user = stamped_user();

        let token = provider.generate(&cx, "ResetPassword", &user).unwrap();
        clock.set(500);
        assert!(!provider.validate(&cx, "ResetPassword", &token, &user));
    }

    #[test]
    fn numeric_code_round_trip_with_skew() {
        let clock = ManualClock::new(10_000);
        let key = SecretString::from("signing-key");
        let cx = context(&clock, &key);
        let provider = NumericCodeProvider::new(CodeRequirement::None);
        let user = stamped_user();

        let code = provider.generate(&cx, "TwoFactor:Phone", &user).unwrap();
        assert_eq!(code.len(), 6);
        clock.advance(provider.step_secs); // one step later still inside skew
        assert!(provider.validate(&cx, "TwoFactor:Phone", &code, &user));
        clock.advance(provider.step_secs * 2);
        assert!(!provider.validate(&cx, "TwoFactor:Phone", &code, &user));
    }

    #[test]
    fn numeric_code_is_stamp_bound() {
        let clock = ManualClock::new(10_000);
        let key = SecretString::from("signing-key");
        let cx = context(&clock, &key);
        let provider = NumericCodeProvider::new(CodeRequirement::None);
        let mut user = stamped_user();

        let code = provider.generate(&cx, "TwoFactor:Phone", &user).unwrap();
        user.security_stamp = "ANOTHERSTAMPANOTHERSTAMPANOTHE32".to_string();
        assert!(!provider.validate(&cx, "TwoFactor:Phone", &code, &user));
    }

    #[test]
    fn phone_provider_requires_confirmed_phone() {
        let provider = NumericCodeProvider::new(CodeRequirement::ConfirmedPhone);
        let mut user = stamped_user();
        assert!(!provider.can_generate(&user));
        user.phone_number = Some("+15551234".to_string());
        assert!(!provider.can_generate(&user));
        user.phone_number_confirmed = true;
        assert!(provider.can_generate(&user));
    }

    #[test]
    fn authenticator_provider_requires_key() {
        let clock = ManualClock::new(10_000);
        let key = SecretString::from("signing-key");
        let cx = context(&clock, &key);
        let provider = NumericCodeProvider::new(CodeRequirement::AuthenticatorKey);
        let mut user = stamped_user();

        assert!(!provider.can_generate(&user));
        assert!(matches!(
            provider.generate(&cx, "TwoFactor:Authenticator", &user),
            Err(Error::MissingAuthenticatorKey(_))
        ));

        user.set_token(
            AUTHENTICATOR_STORE,
            AUTHENTICATOR_KEY_NAME,
            "SECRETKEY".to_string(),
        );
        assert!(provider.can_generate(&user));
        let code = provider
            .generate(&cx, "TwoFactor:Authenticator", &user)
            .unwrap();
        assert!(provider.validate(&cx, "TwoFactor:Authenticator", &code, &user));

        // A fresh authenticator key kills outstanding codes too.
        user.set_token(
            AUTHENTICATOR_STORE,
            AUTHENTICATOR_KEY_NAME,
            "DIFFERENTKEY".to_string(),
        );
        assert!(!provider.validate(&cx, "TwoFactor:Authenticator", &code, &user));
    }
}
