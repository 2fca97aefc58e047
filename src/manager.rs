//! The user-facing orchestration layer.
//!
//! `UserManager` wires the validator chains, token provider registry,
//! lockout machine, and recovery code vault around an injected store,
//! password hasher, and clock. Every credential-relevant mutation rotates
//! the user's security stamp before persisting, which is what invalidates
//! previously issued tokens.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::SecretString;
use tracing::warn;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Error;
use crate::hasher::{PasswordHasher, PasswordVerify};
use crate::model::{normalize_key, Claim, Login, User, LOCKOUT_END_NONE};
use crate::options::{
    ManagerOptions, AUTHENTICATOR_PROVIDER, DEFAULT_PROVIDER, EMAIL_PROVIDER, PHONE_PROVIDER,
};
use crate::recovery::{verify_code, RecoveryCodeBatch};
use crate::result::{IdentityError, IdentityResult};
use crate::stamp::new_security_stamp;
use crate::store::{DuplicateKind, StoreError, UserStore};
use crate::token::{
    CodeRequirement, MacTokenProvider, NumericCodeProvider, TokenContext, TokenProvider,
    AUTHENTICATOR_KEY_NAME, AUTHENTICATOR_STORE,
};
use crate::validation::{
    DefaultPasswordValidator, DefaultUserValidator, PasswordValidator, UserValidator,
};

pub const RESET_PASSWORD_PURPOSE: &str = "ResetPassword";
pub const EMAIL_CONFIRMATION_PURPOSE: &str = "EmailConfirmation";

/// Purpose for changing the email to one specific address; a token issued
/// for one target address never verifies for another.
#[must_use]
pub fn change_email_purpose(new_email: &str) -> String {
    format!("ChangeEmail:{new_email}")
}

#[must_use]
pub fn change_phone_purpose(new_phone: &str) -> String {
    format!("ChangePhoneNumber:{new_phone}")
}

#[must_use]
pub fn two_factor_purpose(provider: &str) -> String {
    format!("TwoFactor:{provider}")
}

pub struct UserManager {
    store: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
    options: ManagerOptions,
    token_key: SecretString,
    user_validators: Vec<Box<dyn UserValidator>>,
    password_validators: Vec<Box<dyn PasswordValidator>>,
    token_providers: HashMap<String, Arc<dyn TokenProvider>>,
}

impl UserManager {
    /// Build a manager with the default validator chains and the built-in
    /// token providers registered under their well-known names.
    #[must_use]
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
        options: ManagerOptions,
        token_key: SecretString,
    ) -> Self {
        let mut token_providers: HashMap<String, Arc<dyn TokenProvider>> = HashMap::new();
        token_providers.insert(
            DEFAULT_PROVIDER.to_string(),
            Arc::new(MacTokenProvider::default()),
        );
        token_providers.insert(
            PHONE_PROVIDER.to_string(),
            Arc::new(NumericCodeProvider::new(CodeRequirement::ConfirmedPhone)),
        );
        token_providers.insert(
            EMAIL_PROVIDER.to_string(),
            Arc::new(NumericCodeProvider::new(CodeRequirement::ConfirmedEmail)),
        );
        token_providers.insert(
            AUTHENTICATOR_PROVIDER.to_string(),
            Arc::new(NumericCodeProvider::new(CodeRequirement::AuthenticatorKey)),
        );
        Self {
            store,
            hasher,
            clock,
            options,
            token_key,
            user_validators: vec![Box::new(DefaultUserValidator)],
            password_validators: vec![Box::new(DefaultPasswordValidator)],
            token_providers,
        }
    }

    pub fn add_user_validator(&mut self, validator: Box<dyn UserValidator>) {
        self.user_validators.push(validator);
    }

    pub fn add_password_validator(&mut self, validator: Box<dyn PasswordValidator>) {
        self.password_validators.push(validator);
    }

    /// Register or replace a token provider under `name`. The registry is
    /// per-manager state; separate manager instances never share it.
    pub fn register_token_provider(&mut self, name: impl Into<String>, provider: Arc<dyn TokenProvider>) {
        self.token_providers.insert(name.into(), provider);
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    fn provider(&self, name: &str) -> Result<&Arc<dyn TokenProvider>, Error> {
        self.token_providers
            .get(name)
            .ok_or_else(|| Error::UnknownTokenProvider(name.to_string()))
    }

    fn token_context(&self) -> TokenContext<'_> {
        TokenContext {
            clock: self.clock.as_ref(),
            key: &self.token_key,
        }
    }

    fn rotate_stamp(&self, user: &mut User) -> Result<(), Error> {
        user.security_stamp = new_security_stamp()?;
        Ok(())
    }

    /// Run the full user validator chain; every validator runs and all
    /// errors are concatenated in registration order.
    async fn run_user_validators(&self, user: &User) -> Result<Vec<IdentityError>, Error> {
        let mut errors = Vec::new();
        for validator in &self.user_validators {
            errors.extend(
                validator
                    .validate(self.store.as_ref(), &self.options, user)
                    .await?,
            );
        }
        Ok(errors)
    }

    fn run_password_validators(&self, user: &User, password: &str) -> Vec<IdentityError> {
        let mut errors = Vec::new();
        for validator in &self.password_validators {
            errors.extend(validator.validate(&self.options.password, user, password));
        }
        errors
    }

    /// Wrap aggregated errors into a failed result, logging the stable
    /// codes (never the descriptions) scoped to the entity id.
    fn fail(id: Uuid, errors: Vec<IdentityError>) -> IdentityResult {
        let result = IdentityResult::failed(errors);
        warn!(user = %id, codes = %result.codes(), "operation failed validation");
        result
    }

    fn duplicate_error(user: &User, kind: DuplicateKind) -> IdentityError {
        match kind {
            DuplicateKind::Login => IdentityError::login_already_associated(),
            _ => IdentityError::duplicate_user_name(&user.user_name),
        }
    }

    /// Version-checked write; conflicts and duplicate keys come back as
    /// business failures so the caller can retry or report.
    async fn persist(&self, user: &mut User) -> Result<IdentityResult, Error> {
        match self.store.update_user(user).await {
            Ok(()) => Ok(IdentityResult::ok()),
            Err(StoreError::ConcurrencyConflict) => Ok(Self::fail(
                user.id,
                vec![IdentityError::concurrency_failure()],
            )),
            Err(StoreError::DuplicateKey(kind)) => Ok(Self::fail(
                user.id,
                vec![Self::duplicate_error(user, kind)],
            )),
            Err(err) => Err(err.into()),
        }
    }

    async fn rotate_and_persist(&self, user: &mut User) -> Result<IdentityResult, Error> {
        self.rotate_stamp(user)?;
        self.persist(user).await
    }

    fn normalize(user: &mut User) {
        user.normalized_user_name = normalize_key(&user.user_name);
        user.normalized_email = user.email.as_deref().map(normalize_key);
    }

    // ---- lifecycle ----

    /// Validate and persist a new user, optionally with an initial
    /// password. Lockout eligibility and the initial security stamp are
    /// assigned here.
    pub async fn create_user(
        &self,
        user: &mut User,
        password: Option<&str>,
    ) -> Result<IdentityResult, Error> {
        Self::normalize(user);
        let mut errors = self.run_user_validators(user).await?;
        if let Some(password) = password {
            errors.extend(self.run_password_validators(user, password));
        }
        if !errors.is_empty() {
            return Ok(Self::fail(user.id, errors));
        }

        user.lockout_enabled = self.options.lockout.allowed_for_new_users;
        if user.security_stamp.is_empty() {
            self.rotate_stamp(user)?;
        }
        if let Some(password) = password {
            user.password_hash = Some(self.hasher.hash(password)?);
        }

        match self.store.create_user(user).await {
            Ok(()) => Ok(IdentityResult::ok()),
            Err(StoreError::DuplicateKey(kind)) => Ok(Self::fail(
                user.id,
                vec![Self::duplicate_error(user, kind)],
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Re-validate and persist changes to an existing user.
    pub async fn update_user(&self, user: &mut User) -> Result<IdentityResult, Error> {
        Self::normalize(user);
        let errors = self.run_user_validators(user).await?;
        if !errors.is_empty() {
            return Ok(Self::fail(user.id, errors));
        }
        self.persist(user).await
    }

    /// Delete the user; owned claims, logins, tokens, role memberships,
    /// and recovery codes go with the record.
    pub async fn delete_user(&self, user: &User) -> Result<IdentityResult, Error> {
        self.store.delete_user(user.id).await?;
        Ok(IdentityResult::ok())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, Error> {
        Ok(self.store.find_by_id(id).await?)
    }

    pub async fn find_by_name(&self, user_name: &str) -> Result<Option<User>, Error> {
        Ok(self.store.find_by_name(&normalize_key(user_name)).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        Ok(self.store.find_by_email(&normalize_key(email)).await?)
    }

    pub async fn find_by_login(
        &self,
        provider: &str,
        provider_key: &str,
    ) -> Result<Option<User>, Error> {
        Ok(self.store.find_by_login(provider, provider_key).await?)
    }

    /// Change the user name, re-running user validation so duplicate or
    /// malformed names are caught before the rename commits.
    pub async fn set_user_name(
        &self,
        user: &mut User,
        user_name: &str,
    ) -> Result<IdentityResult, Error> {
        user.user_name = user_name.to_string();
        Self::normalize(user);
        let errors = self.run_user_validators(user).await?;
        if !errors.is_empty() {
            return Ok(Self::fail(user.id, errors));
        }
        self.rotate_and_persist(user).await
    }

    // ---- passwords ----

    #[must_use]
    pub fn has_password(&self, user: &User) -> bool {
        user.password_hash.is_some()
    }

    /// Verify a plaintext password. A match under outdated hash parameters
    /// is transparently rehashed and persisted; the stamp is not rotated
    /// because no credential changed.
    pub async fn check_password(&self, user: &mut User, password: &str) -> Result<bool, Error> {
        let Some(hash) = user.password_hash.clone() else {
            return Ok(false);
        };
        match self.hasher.verify(&hash, password) {
            PasswordVerify::Failed => Ok(false),
            PasswordVerify::Success => Ok(true),
            PasswordVerify::SuccessRehashNeeded => {
                user.password_hash = Some(self.hasher.hash(password)?);
                let persisted = self.persist(user).await?;
                if !persisted.succeeded() {
                    warn!(user = %user.id, codes = %persisted.codes(), "rehash-on-verify not persisted");
                }
                Ok(true)
            }
        }
    }

    /// Set an initial password on a passwordless account.
    pub async fn add_password(
        &self,
        user: &mut User,
        password: &str,
    ) -> Result<IdentityResult, Error> {
        if user.password_hash.is_some() {
            return Ok(Self::fail(
                user.id,
                vec![IdentityError::user_already_has_password()],
            ));
        }
        let errors = self.run_password_validators(user, password);
        if !errors.is_empty() {
            return Ok(Self::fail(user.id, errors));
        }
        user.password_hash = Some(self.hasher.hash(password)?);
        self.rotate_and_persist(user).await
    }

    pub async fn change_password(
        &self,
        user: &mut User,
        current_password: &str,
        new_password: &str,
    ) -> Result<IdentityResult, Error> {
        let verified = user
            .password_hash
            .as_deref()
            .map(|hash| self.hasher.verify(hash, current_password))
            .unwrap_or(PasswordVerify::Failed);
        if verified == PasswordVerify::Failed {
            return Ok(Self::fail(
                user.id,
                vec![IdentityError::password_mismatch()],
            ));
        }
        let errors = self.run_password_validators(user, new_password);
        if !errors.is_empty() {
            return Ok(Self::fail(user.id, errors));
        }
        user.password_hash = Some(self.hasher.hash(new_password)?);
        self.rotate_and_persist(user).await
    }

    pub async fn remove_password(&self, user: &mut User) -> Result<IdentityResult, Error> {
        user.password_hash = None;
        self.rotate_and_persist(user).await
    }

    pub fn generate_password_reset_token(&self, user: &User) -> Result<String, Error> {
        self.generate_user_token(
            user,
            &self.options.tokens.password_reset_provider,
            RESET_PASSWORD_PURPOSE,
        )
    }

    /// Token-gated password reset: the token must have been issued for the
    /// `ResetPassword` purpose under the user's current security stamp.
    pub async fn reset_password(
        &self,
        user: &mut User,
        token: &str,
        new_password: &str,
    ) -> Result<IdentityResult, Error> {
        let provider = self.options.tokens.password_reset_provider.as_str();
        if !self.verify_user_token(user, provider, RESET_PASSWORD_PURPOSE, token)? {
            return Ok(Self::fail(user.id, vec![IdentityError::invalid_token()]));
        }
        let errors = self.run_password_validators(user, new_password);
        if !errors.is_empty() {
            return Ok(Self::fail(user.id, errors));
        }
        user.password_hash = Some(self.hasher.hash(new_password)?);
        self.rotate_and_persist(user).await
    }

    // ---- security stamp ----

    /// Read the stamp. Reading never mutates it.
    pub fn security_stamp<'a>(&self, user: &'a User) -> Result<&'a str, Error> {
        if user.security_stamp.is_empty() {
            return Err(Error::MissingSecurityStamp(user.id));
        }
        Ok(&user.security_stamp)
    }

    /// Explicit refresh: rotate the stamp, invalidating all outstanding
    /// stamp-bound tokens for this user.
    pub async fn update_security_stamp(&self, user: &mut User) -> Result<IdentityResult, Error> {
        self.rotate_and_persist(user).await
    }

    // ---- tokens ----

    /// Generate a purpose-bound token via a registered provider.
    ///
    /// # Errors
    ///
    /// An unregistered `provider_name` is a configuration error and fails
    /// loudly with [`Error::UnknownTokenProvider`]; it is never folded
    /// into an [`IdentityResult`].
    pub fn generate_user_token(
        &self,
        user: &User,
        provider_name: &str,
        purpose: &str,
    ) -> Result<String, Error> {
        let provider = self.provider(provider_name)?;
        provider.generate(&self.token_context(), purpose, user)
    }

    /// Validate a previously issued token. Side-effect free.
    pub fn verify_user_token(
        &self,
        user: &User,
        provider_name: &str,
        purpose: &str,
        token: &str,
    ) -> Result<bool, Error> {
        let provider = self.provider(provider_name)?;
        Ok(provider.validate(&self.token_context(), purpose, token, user))
    }

    // ---- email ----

    pub async fn set_email(
        &self,
        user: &mut User,
        email: Option<String>,
    ) -> Result<IdentityResult, Error> {
        user.normalized_email = email.as_deref().map(normalize_key);
        user.email = email;
        user.email_confirmed = false;
        self.rotate_and_persist(user).await
    }

    pub fn generate_email_confirmation_token(&self, user: &User) -> Result<String, Error> {
        self.generate_user_token(
            user,
            &self.options.tokens.email_confirmation_provider,
            EMAIL_CONFIRMATION_PURPOSE,
        )
    }

    /// Mark the current email as confirmed. Confirmation is not a
    /// credential change, so the stamp stays put.
    pub async fn confirm_email(
        &self,
        user: &mut User,
        token: &str,
    ) -> Result<IdentityResult, Error> {
        let provider = self.options.tokens.email_confirmation_provider.as_str();
        if !self.verify_user_token(user, provider, EMAIL_CONFIRMATION_PURPOSE, token)? {
            return Ok(Self::fail(user.id, vec![IdentityError::invalid_token()]));
        }
        user.email_confirmed = true;
        self.persist(user).await
    }

    #[must_use]
    pub fn is_email_confirmed(&self, user: &User) -> bool {
        user.email_confirmed
    }

    pub fn generate_change_email_token(
        &self,
        user: &User,
        new_email: &str,
    ) -> Result<String, Error> {
        self.generate_user_token(
            user,
            &self.options.tokens.change_email_provider,
            &change_email_purpose(new_email),
        )
    }

    /// Apply a token-gated email change; the token is scoped to exactly
    /// this target address.
    pub async fn change_email(
        &self,
        user: &mut User,
        new_email: &str,
        token: &str,
    ) -> Result<IdentityResult, Error> {
        let provider = self.options.tokens.change_email_provider.as_str();
        if !self.verify_user_token(user, provider, &change_email_purpose(new_email), token)? {
            return Ok(Self::fail(user.id, vec![IdentityError::invalid_token()]));
        }
        user.email = Some(new_email.to_string());
        user.normalized_email = Some(normalize_key(new_email));
        user.email_confirmed = true;
        self.rotate_and_persist(user).await
    }

    // ---- phone ----

    pub async fn set_phone_number(
        &self,
        user: &mut User,
        phone_number: Option<String>,
    ) -> Result<IdentityResult, Error> {
        user.phone_number = phone_number;
        user.phone_number_confirmed = false;
        self.rotate_and_persist(user).await
    }

    pub fn generate_change_phone_number_token(
        &self,
        user: &User,
        phone_number: &str,
    ) -> Result<String, Error> {
        self.generate_user_token(
            user,
            &self.options.tokens.change_phone_provider,
            &change_phone_purpose(phone_number),
        )
    }

    pub fn verify_change_phone_number_token(
        &self,
        user: &User,
        token: &str,
        phone_number: &str,
    ) -> Result<bool, Error> {
        self.verify_user_token(
            user,
            &self.options.tokens.change_phone_provider,
            &change_phone_purpose(phone_number),
            token,
        )
    }

    pub async fn change_phone_number(
        &self,
        user: &mut User,
        phone_number: &str,
        token: &str,
    ) -> Result<IdentityResult, Error> {
        if !self.verify_change_phone_number_token(user, token, phone_number)? {
            return Ok(Self::fail(user.id, vec![IdentityError::invalid_token()]));
        }
        user.phone_number = Some(phone_number.to_string());
        user.phone_number_confirmed = true;
        self.rotate_and_persist(user).await
    }

    #[must_use]
    pub fn is_phone_number_confirmed(&self, user: &User) -> bool {
        user.phone_number_confirmed
    }

    // ---- external logins ----

    /// Attach an external credential. A (provider, key) pair may belong to
    /// at most one user globally.
    pub async fn add_login(&self, user: &mut User, login: Login) -> Result<IdentityResult, Error> {
        if self
            .store
            .find_by_login(&login.provider, &login.provider_key)
            .await?
            .is_some()
        {
            return Ok(Self::fail(
                user.id,
                vec![IdentityError::login_already_associated()],
            ));
        }
        user.logins.push(login);
        self.rotate_and_persist(user).await
    }

    pub async fn remove_login(
        &self,
        user: &mut User,
        provider: &str,
        provider_key: &str,
    ) -> Result<IdentityResult, Error> {
        user.logins
            .retain(|login| !(login.provider == provider && login.provider_key == provider_key));
        self.rotate_and_persist(user).await
    }

    // ---- two-factor ----

    pub async fn set_two_factor_enabled(
        &self,
        user: &mut User,
        enabled: bool,
    ) -> Result<IdentityResult, Error> {
        user.two_factor_enabled = enabled;
        self.rotate_and_persist(user).await
    }

    /// Generate a code for one named second factor (`Phone`, `Email`,
    /// `Authenticator`, or anything registered).
    pub fn generate_two_factor_token(
        &self,
        user: &User,
        factor: &str,
    ) -> Result<String, Error> {
        self.generate_user_token(user, factor, &two_factor_purpose(factor))
    }

    pub fn verify_two_factor_token(
        &self,
        user: &User,
        factor: &str,
        token: &str,
    ) -> Result<bool, Error> {
        self.verify_user_token(user, factor, &two_factor_purpose(factor), token)
    }

    /// Whether one named factor is currently usable for this user. Unknown
    /// names fail loudly, same as generate/verify.
    pub fn can_generate_two_factor_token(
        &self,
        user: &User,
        factor: &str,
    ) -> Result<bool, Error> {
        Ok(self.provider(factor)?.can_generate(user))
    }

    /// Registered provider names currently usable for this user, sorted
    /// for stable output.
    #[must_use]
    pub fn valid_two_factor_providers(&self, user: &User) -> Vec<String> {
        let mut names: Vec<String> = self
            .token_providers
            .iter()
            .filter(|(_, provider)| provider.can_generate(user))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    // ---- authenticator key ----

    #[must_use]
    pub fn authenticator_key(&self, user: &User) -> Option<String> {
        user.find_token(AUTHENTICATOR_STORE, AUTHENTICATOR_KEY_NAME)
            .map(|token| token.value.clone())
    }

    /// Assign a fresh authenticator key and rotate the stamp; codes from
    /// the previous key (and all outstanding tokens) stop verifying.
    pub async fn reset_authenticator_key(&self, user: &mut User) -> Result<IdentityResult, Error> {
        let key = new_security_stamp()?;
        user.set_token(AUTHENTICATOR_STORE, AUTHENTICATOR_KEY_NAME, key);
        self.rotate_and_persist(user).await
    }

    // ---- recovery codes ----

    /// Replace the user's entire recovery code set with `count` fresh
    /// codes, returning the plaintext batch exactly once. Unredeemed codes
    /// from earlier batches stop working immediately. On a failed result
    /// (say a write conflict) the stored set is unchanged and the batch
    /// is empty; callers retry like any other setter.
    pub async fn generate_recovery_codes(
        &self,
        user: &mut User,
        count: usize,
    ) -> Result<(IdentityResult, Vec<String>), Error> {
        let batch = RecoveryCodeBatch::generate(count)?;
        user.recovery_code_hashes = batch.code_hashes;
        let result = self.persist(user).await?;
        if result.succeeded() {
            Ok((result, batch.codes))
        } else {
            Ok((result, Vec::new()))
        }
    }

    /// Atomically consume one recovery code. The removal rides on the
    /// store's version-checked write, so two racing redemptions of the
    /// same code cannot both succeed: the loser sees a conflict.
    pub async fn redeem_recovery_code(
        &self,
        user: &mut User,
        code: &str,
    ) -> Result<IdentityResult, Error> {
        let matched = user
            .recovery_code_hashes
            .iter()
            .position(|hash| verify_code(code, hash));
        let Some(index) = matched else {
            return Ok(Self::fail(
                user.id,
                vec![IdentityError::recovery_code_redemption_failed()],
            ));
        };
        user.recovery_code_hashes.remove(index);
        self.persist(user).await
    }

    #[must_use]
    pub fn count_recovery_codes(&self, user: &User) -> usize {
        user.recovery_code_hashes.len()
    }

    // ---- lockout ----

    /// Locked out means: lockout is enabled, an end is set, the end is not
    /// the epoch sentinel, and the end is still in the future.
    #[must_use]
    pub fn is_locked_out(&self, user: &User) -> bool {
        if !user.lockout_enabled {
            return false;
        }
        match user.lockout_end {
            Some(end) => end != LOCKOUT_END_NONE && end > self.clock.now_unix(),
            None => false,
        }
    }

    #[must_use]
    pub fn lockout_enabled(&self, user: &User) -> bool {
        user.lockout_enabled
    }

    pub async fn set_lockout_enabled(
        &self,
        user: &mut User,
        enabled: bool,
    ) -> Result<IdentityResult, Error> {
        user.lockout_enabled = enabled;
        self.persist(user).await
    }

    #[must_use]
    pub fn lockout_end(&self, user: &User) -> Option<i64> {
        user.lockout_end
    }

    /// Set (or clear) the lockout expiry. Fails for users whose lockout is
    /// disabled; a past or sentinel timestamp effectively unlocks.
    pub async fn set_lockout_end(
        &self,
        user: &mut User,
        lockout_end: Option<i64>,
    ) -> Result<IdentityResult, Error> {
        if !user.lockout_enabled {
            return Ok(Self::fail(
                user.id,
                vec![IdentityError::user_lockout_not_enabled()],
            ));
        }
        user.lockout_end = lockout_end;
        self.persist(user).await
    }

    /// Record one failed access attempt. Crossing the configured threshold
    /// starts the lockout window and resets the counter; a threshold of
    /// zero locks on the first failure.
    pub async fn record_access_failure(&self, user: &mut User) -> Result<IdentityResult, Error> {
        user.access_failed_count += 1;
        if user.lockout_enabled {
            let max = self.options.lockout.max_failed_access_attempts;
            if max == 0 || user.access_failed_count >= max {
                let until = self.clock.now_unix() + self.options.lockout.lockout_duration_secs;
                user.lockout_end = Some(until);
                user.access_failed_count = 0;
                warn!(user = %user.id, lockout_end = until, "user locked out");
            }
        }
        self.persist(user).await
    }

    /// Record a successful access: the failure counter resets, the lockout
    /// end (if any) is left untouched.
    pub async fn record_access_success(&self, user: &mut User) -> Result<IdentityResult, Error> {
        self.reset_access_failed_count(user).await
    }

    pub async fn reset_access_failed_count(
        &self,
        user: &mut User,
    ) -> Result<IdentityResult, Error> {
        if user.access_failed_count == 0 {
            return Ok(IdentityResult::ok());
        }
        user.access_failed_count = 0;
        self.persist(user).await
    }

    #[must_use]
    pub fn access_failed_count(&self, user: &User) -> u32 {
        user.access_failed_count
    }

    // ---- claims ----

    pub async fn add_claim(&self, user: &mut User, claim: Claim) -> Result<IdentityResult, Error> {
        user.claims.push(claim);
        self.persist(user).await
    }

    pub async fn add_claims(
        &self,
        user: &mut User,
        claims: Vec<Claim>,
    ) -> Result<IdentityResult, Error> {
        user.claims.extend(claims);
        self.persist(user).await
    }

    /// Remove this user's copies of the claim. Other users holding an
    /// identical (kind, value) claim keep theirs.
    pub async fn remove_claim(
        &self,
        user: &mut User,
        claim: &Claim,
    ) -> Result<IdentityResult, Error> {
        user.claims.retain(|owned| owned != claim);
        self.persist(user).await
    }

    pub async fn replace_claim(
        &self,
        user: &mut User,
        claim: &Claim,
        new_claim: Claim,
    ) -> Result<IdentityResult, Error> {
        for owned in &mut user.claims {
            if owned == claim {
                *owned = new_claim.clone();
            }
        }
        self.persist(user).await
    }

    pub async fn users_for_claim(&self, claim: &Claim) -> Result<Vec<User>, Error> {
        Ok(self.store.users_for_claim(claim).await?)
    }

    // ---- role membership ----

    /// Idempotent: adding a role the user already has is a no-op.
    pub async fn add_to_role(
        &self,
        user: &mut User,
        role_name: &str,
    ) -> Result<IdentityResult, Error> {
        if !user.roles.insert(normalize_key(role_name)) {
            return Ok(IdentityResult::ok());
        }
        self.persist(user).await
    }

    /// Batch add; repeated names in the input are silently de-duplicated.
    pub async fn add_to_roles(
        &self,
        user: &mut User,
        role_names: &[&str],
    ) -> Result<IdentityResult, Error> {
        let mut changed = false;
        for role_name in role_names {
            changed |= user.roles.insert(normalize_key(role_name));
        }
        if !changed {
            return Ok(IdentityResult::ok());
        }
        self.persist(user).await
    }

    pub async fn remove_from_role(
        &self,
        user: &mut User,
        role_name: &str,
    ) -> Result<IdentityResult, Error> {
        if !user.roles.remove(&normalize_key(role_name)) {
            return Ok(Self::fail(
                user.id,
                vec![IdentityError::user_not_in_role(role_name)],
            ));
        }
        self.persist(user).await
    }

    #[must_use]
    pub fn is_in_role(&self, user: &User, role_name: &str) -> bool {
        user.roles.contains(&normalize_key(role_name))
    }

    /// Normalized names of the roles the user belongs to.
    #[must_use]
    pub fn roles(&self, user: &User) -> Vec<String> {
        user.roles.iter().cloned().collect()
    }

    pub async fn users_in_role(&self, role_name: &str) -> Result<Vec<User>, Error> {
        Ok(self.store.users_in_role(&normalize_key(role_name)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::hasher::Argon2PasswordHasher;
    use crate::options::PasswordOptions;
    use crate::store::MemoryStore;

    fn manager() -> (UserManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let manager = UserManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Argon2PasswordHasher),
            clock.clone(),
            ManagerOptions::default(),
            SecretString::from("unit-test-signing-key"),
        );
        (manager, clock)
    }

    #[tokio::test]
    async fn create_assigns_stamp_and_lockout_eligibility() {
        let (manager, _clock) = manager();
        let mut user = User::new("alice");
        let result = manager.create_user(&mut user, None).await.unwrap();
        assert!(result.succeeded());
        assert!(!user.security_stamp.is_empty());
        assert!(user.lockout_enabled);
    }

    #[tokio::test]
    async fn create_aggregates_user_and_password_errors() {
        let (manager, _clock) = manager();
        let mut user = User::new("no spaces allowed");
        let result = manager.create_user(&mut user, Some("short")).await.unwrap();
        assert!(!result.succeeded());
        let codes = result.codes();
        assert!(codes.starts_with("InvalidUserName;PasswordTooShort"));
    }

    #[tokio::test]
    async fn unknown_provider_is_a_loud_error() {
        let (manager, _clock) = manager();
        let mut user = User::new("alice");
        manager.create_user(&mut user, None).await.unwrap();
        let err = manager
            .generate_user_token(&user, "Nope", "ResetPassword")
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTokenProvider(name) if name == "Nope"));
    }

    #[tokio::test]
    async fn set_user_name_catches_duplicates() {
        let (manager, _clock) = manager();
        let mut alice = User::new("alice");
        manager.create_user(&mut alice, None).await.unwrap();
        let mut bob = User::new("bob");
        manager.create_user(&mut bob, None).await.unwrap();

        let result = manager.set_user_name(&mut bob, "Alice").await.unwrap();
        assert_eq!(result.codes(), "DuplicateUserName");
    }

    struct NoVowelValidator;

    impl PasswordValidator for NoVowelValidator {
        fn validate(
            &self,
            _options: &PasswordOptions,
            _user: &User,
            password: &str,
        ) -> Vec<IdentityError> {
            if password.chars().any(|ch| "aeiou".contains(ch)) {
                vec![IdentityError::new("PasswordContainsVowel", "No vowels.")]
            } else {
                Vec::new()
            }
        }
    }

    #[tokio::test]
    async fn custom_validators_run_in_registration_order() {
        let (mut manager, _clock) = manager();
        manager.add_password_validator(Box::new(NoVowelValidator));
        let mut user = User::new("alice");
        manager.create_user(&mut user, None).await.unwrap();

        let result = manager.add_password(&mut user, "bad").await.unwrap();
        let codes = result.codes();
        assert!(codes.ends_with(";PasswordContainsVowel"), "got {codes}");
    }
}
