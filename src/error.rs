use thiserror::Error;

use crate::store::StoreError;

/// Infrastructure and configuration failures.
///
/// These are deliberately disjoint from business validation failures, which
/// are reported through [`crate::IdentityResult`]: an `Error` means the
/// deployment or the store is broken, not that the caller's input was bad.
#[derive(Debug, Error)]
pub enum Error {
    /// A token operation named a provider that was never registered.
    /// This is a wiring defect, never a user-correctable condition.
    #[error("unknown token provider: {0}")]
    UnknownTokenProvider(String),

    #[error("user {0} has no security stamp")]
    MissingSecurityStamp(uuid::Uuid),

    #[error("user {0} has no authenticator key")]
    MissingAuthenticatorKey(uuid::Uuid),

    #[error("password hashing failed")]
    Hash,

    #[error("random generator failure")]
    Rng,

    #[error("store failure")]
    Store(#[from] StoreError),
}
