//! Credential and session integrity management.
//!
//! `sigillo` is the embeddable core of a user/role management service:
//! account and password validation with aggregated errors, a security-stamp
//! protocol that invalidates purpose-bound tokens on credential changes, a
//! pluggable token provider registry, a lockout state machine, one-time
//! two-factor recovery codes, and claims/role membership — all orchestrated
//! over injected store, password hasher, and clock collaborators.
//!
//! Persistence, transport auth, and UI belong to the embedding service.
//! The crate ships [`MemoryStore`] as the reference store implementation;
//! real deployments implement [`UserStore`]/[`RoleStore`] over their own
//! backend and must provide version-checked writes for conflict detection.

pub mod clock;
pub mod error;
pub mod hasher;
pub mod manager;
pub mod model;
pub mod options;
pub mod recovery;
pub mod result;
pub mod role_manager;
mod stamp;
pub mod store;
pub mod token;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use hasher::{Argon2PasswordHasher, PasswordHasher, PasswordVerify};
pub use manager::{
    change_email_purpose, change_phone_purpose, two_factor_purpose, UserManager,
    EMAIL_CONFIRMATION_PURPOSE, RESET_PASSWORD_PURPOSE,
};
pub use model::{normalize_key, Claim, Login, Role, User, UserToken, LOCKOUT_END_NONE};
pub use options::{
    LockoutOptions, ManagerOptions, PasswordOptions, TokenOptions, UserOptions,
    AUTHENTICATOR_PROVIDER, DEFAULT_PROVIDER, EMAIL_PROVIDER, PHONE_PROVIDER,
};
pub use recovery::RecoveryCodeBatch;
pub use result::{IdentityError, IdentityResult};
pub use role_manager::RoleManager;
pub use store::{DuplicateKind, MemoryStore, RoleStore, StoreError, UserStore};
pub use token::{
    CodeRequirement, MacTokenProvider, NumericCodeProvider, TokenContext, TokenProvider,
};
pub use validation::{
    DefaultPasswordValidator, DefaultRoleValidator, DefaultUserValidator, PasswordValidator,
    RoleValidator, UserValidator,
};
