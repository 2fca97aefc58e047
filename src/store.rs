//! Persistence capability traits and the in-memory reference store.
//!
//! The managers never lock: they rely on the store's version-checked writes.
//! Every update compares the record's concurrency token against what the
//! store holds and fails with [`StoreError::ConcurrencyConflict`] on a
//! mismatch, so racing writers are detected instead of silently lost.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{Claim, Role, User};

/// Which uniqueness constraint an insert or update violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    UserName,
    Login,
    RoleName,
}

impl fmt::Display for DuplicateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserName => f.write_str("user name"),
            Self::Login => f.write_str("login"),
            Self::RoleName => f.write_str("role name"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    /// A version-checked write saw a stale concurrency token.
    #[error("concurrency conflict")]
    ConcurrencyConflict,
    #[error("duplicate {0}")]
    DuplicateKey(DuplicateKind),
    #[error("store backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user, enforcing normalized-name and login uniqueness.
    async fn create_user(&self, user: &User) -> Result<(), StoreError>;

    /// Version-checked write. On success the store assigns a fresh
    /// concurrency token and writes it back into `user`.
    async fn update_user(&self, user: &mut User) -> Result<(), StoreError>;

    /// Remove the user and everything it owns (claims, logins, tokens,
    /// role memberships, recovery codes travel with the record).
    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_name(&self, normalized_user_name: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, normalized_email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_login(
        &self,
        provider: &str,
        provider_key: &str,
    ) -> Result<Option<User>, StoreError>;

    /// All users currently holding an identical (kind, value) claim.
    async fn users_for_claim(&self, claim: &Claim) -> Result<Vec<User>, StoreError>;

    /// All users currently in the role, by normalized role name.
    async fn users_in_role(&self, normalized_role_name: &str) -> Result<Vec<User>, StoreError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn create_role(&self, role: &Role) -> Result<(), StoreError>;

    /// Version-checked write, same contract as [`UserStore::update_user`].
    async fn update_role(&self, role: &mut Role) -> Result<(), StoreError>;

    /// Remove the role and strip its membership from all users.
    async fn delete_role(&self, id: Uuid) -> Result<(), StoreError>;

    async fn find_role_by_id(&self, id: Uuid) -> Result<Option<Role>, StoreError>;
    async fn find_role_by_name(&self, normalized_name: &str) -> Result<Option<Role>, StoreError>;
}

/// In-memory store used by tests and as the reference semantics for real
/// backends: uniqueness on normalized keys, global login uniqueness, and
/// optimistic concurrency via token compare-and-swap.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    roles: RwLock<HashMap<Uuid, Role>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_user_uniqueness(
        users: &HashMap<Uuid, User>,
        candidate: &User,
    ) -> Result<(), StoreError> {
        for user in users.values() {
            if user.id == candidate.id {
                continue;
            }
            if user.normalized_user_name == candidate.normalized_user_name {
                return Err(StoreError::DuplicateKey(DuplicateKind::UserName));
            }
            for login in &candidate.logins {
                if user
                    .logins
                    .iter()
                    .any(|l| l.provider == login.provider && l.provider_key == login.provider_key)
                {
                    return Err(StoreError::DuplicateKey(DuplicateKind::Login));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        Self::check_user_uniqueness(&users, user)?;
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &mut User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        Self::check_user_uniqueness(&users, user)?;
        let current = users.get(&user.id).ok_or(StoreError::NotFound)?;
        if current.concurrency_token != user.concurrency_token {
            return Err(StoreError::ConcurrencyConflict);
        }
        user.concurrency_token = Uuid::new_v4();
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        users.remove(&id).map(|_| ()).ok_or(StoreError::NotFound)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_name(&self, normalized_user_name: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.normalized_user_name == normalized_user_name)
            .cloned())
    }

    async fn find_by_email(&self, normalized_email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.normalized_email.as_deref() == Some(normalized_email))
            .cloned())
    }

    async fn find_by_login(
        &self,
        provider: &str,
        provider_key: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| {
                user.logins
                    .iter()
                    .any(|l| l.provider == provider && l.provider_key == provider_key)
            })
            .cloned())
    }

    async fn users_for_claim(&self, claim: &Claim) -> Result<Vec<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.claims.iter().any(|c| c == claim))
            .cloned()
            .collect())
    }

    async fn users_in_role(&self, normalized_role_name: &str) -> Result<Vec<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.roles.contains(normalized_role_name))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn create_role(&self, role: &Role) -> Result<(), StoreError> {
        let mut roles = self.roles.write().await;
        if roles
            .values()
            .any(|r| r.id != role.id && r.normalized_name == role.normalized_name)
        {
            return Err(StoreError::DuplicateKey(DuplicateKind::RoleName));
        }
        roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn update_role(&self, role: &mut Role) -> Result<(), StoreError> {
        let mut roles = self.roles.write().await;
        if roles
            .values()
            .any(|r| r.id != role.id && r.normalized_name == role.normalized_name)
        {
            return Err(StoreError::DuplicateKey(DuplicateKind::RoleName));
        }
        let current = roles.get(&role.id).ok_or(StoreError::NotFound)?;
        if current.concurrency_token != role.concurrency_token {
            return Err(StoreError::ConcurrencyConflict);
        }
        role.concurrency_token = Uuid::new_v4();
        roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn delete_role(&self, id: Uuid) -> Result<(), StoreError> {
        let mut roles = self.roles.write().await;
        let removed = roles.remove(&id).ok_or(StoreError::NotFound)?;
        drop(roles);
        // Cascade: membership rows don't outlive the role.
        let mut users = self.users.write().await;
        for user in users.values_mut() {
            user.roles.remove(&removed.normalized_name);
        }
        Ok(())
    }

    async fn find_role_by_id(&self, id: Uuid) -> Result<Option<Role>, StoreError> {
        Ok(self.roles.read().await.get(&id).cloned())
    }

    async fn find_role_by_name(&self, normalized_name: &str) -> Result<Option<Role>, StoreError> {
        Ok(self
            .roles
            .read()
            .await
            .values()
            .find(|role| role.normalized_name == normalized_name)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Login;

    #[tokio::test]
    async fn update_with_stale_token_conflicts() {
        let store = MemoryStore::new();
        let mut user = User::new("alice");
        store.create_user(&user).await.unwrap();

        let mut stale = user.clone();
        store.update_user(&mut user).await.unwrap();
        let err = store.update_user(&mut stale).await.unwrap_err();
        assert!(matches!(err, StoreError::ConcurrencyConflict));
    }

    #[tokio::test]
    async fn duplicate_normalized_name_rejected() {
        let store = MemoryStore::new();
        store.create_user(&User::new("alice")).await.unwrap();
        let err = store.create_user(&User::new(" ALICE ")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(DuplicateKind::UserName)));
    }

    #[tokio::test]
    async fn login_pair_is_globally_unique() {
        let store = MemoryStore::new();
        let mut alice = User::new("alice");
        alice.logins.push(Login {
            provider: "github".to_string(),
            provider_key: "42".to_string(),
            display_name: "GitHub".to_string(),
        });
        store.create_user(&alice).await.unwrap();

        let mut bob = User::new("bob");
        bob.logins.push(Login {
            provider: "github".to_string(),
            provider_key: "42".to_string(),
            display_name: "GitHub".to_string(),
        });
        let err = store.create_user(&bob).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(DuplicateKind::Login)));
    }

    #[tokio::test]
    async fn delete_role_strips_membership() {
        let store = MemoryStore::new();
        let role = Role::new("Admin");
        store.create_role(&role).await.unwrap();

        let mut user = User::new("alice");
        user.roles.insert("ADMIN".to_string());
        store.create_user(&user).await.unwrap();

        store.delete_role(role.id).await.unwrap();
        let reloaded = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(reloaded.roles.is_empty());
        assert!(store.users_in_role("ADMIN").await.unwrap().is_empty());
    }
}
