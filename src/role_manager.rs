//! Role lifecycle and role claims.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::error::Error;
use crate::model::{normalize_key, Claim, Role};
use crate::result::{IdentityError, IdentityResult};
use crate::store::{RoleStore, StoreError};
use crate::validation::{DefaultRoleValidator, RoleValidator};

pub struct RoleManager {
    store: Arc<dyn RoleStore>,
    validators: Vec<Box<dyn RoleValidator>>,
}

impl RoleManager {
    #[must_use]
    pub fn new(store: Arc<dyn RoleStore>) -> Self {
        Self {
            store,
            validators: vec![Box::new(DefaultRoleValidator)],
        }
    }

    pub fn add_validator(&mut self, validator: Box<dyn RoleValidator>) {
        self.validators.push(validator);
    }

    /// All registered validators run; errors aggregate in registration
    /// order, same contract as user validation.
    async fn run_validators(&self, role: &Role) -> Result<Vec<IdentityError>, Error> {
        let mut errors = Vec::new();
        for validator in &self.validators {
            errors.extend(validator.validate(self.store.as_ref(), role).await?);
        }
        Ok(errors)
    }

    fn fail(id: Uuid, errors: Vec<IdentityError>) -> IdentityResult {
        let result = IdentityResult::failed(errors);
        warn!(role = %id, codes = %result.codes(), "role operation failed validation");
        result
    }

    async fn persist(&self, role: &mut Role) -> Result<IdentityResult, Error> {
        match self.store.update_role(role).await {
            Ok(()) => Ok(IdentityResult::ok()),
            Err(StoreError::ConcurrencyConflict) => Ok(Self::fail(
                role.id,
                vec![IdentityError::concurrency_failure()],
            )),
            Err(StoreError::DuplicateKey(_)) => Ok(Self::fail(
                role.id,
                vec![IdentityError::duplicate_role_name(&role.name)],
            )),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn create_role(&self, role: &mut Role) -> Result<IdentityResult, Error> {
        role.normalized_name = normalize_key(&role.name);
        let errors = self.run_validators(role).await?;
        if !errors.is_empty() {
            return Ok(Self::fail(role.id, errors));
        }
        match self.store.create_role(role).await {
            Ok(()) => Ok(IdentityResult::ok()),
            Err(StoreError::DuplicateKey(_)) => Ok(Self::fail(
                role.id,
                vec![IdentityError::duplicate_role_name(&role.name)],
            )),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn update_role(&self, role: &mut Role) -> Result<IdentityResult, Error> {
        role.normalized_name = normalize_key(&role.name);
        let errors = self.run_validators(role).await?;
        if !errors.is_empty() {
            return Ok(Self::fail(role.id, errors));
        }
        self.persist(role).await
    }

    pub async fn delete_role(&self, role: &Role) -> Result<IdentityResult, Error> {
        self.store.delete_role(role.id).await?;
        Ok(IdentityResult::ok())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Role>, Error> {
        Ok(self.store.find_role_by_id(id).await?)
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Role>, Error> {
        Ok(self.store.find_role_by_name(&normalize_key(name)).await?)
    }

    pub async fn role_exists(&self, name: &str) -> Result<bool, Error> {
        Ok(self.find_by_name(name).await?.is_some())
    }

    pub async fn add_claim(&self, role: &mut Role, claim: Claim) -> Result<IdentityResult, Error> {
        role.claims.push(claim);
        self.persist(role).await
    }

    pub async fn remove_claim(
        &self,
        role: &mut Role,
        claim: &Claim,
    ) -> Result<IdentityResult, Error> {
        role.claims.retain(|owned| owned != claim);
        self.persist(role).await
    }

    #[must_use]
    pub fn claims<'a>(&self, role: &'a Role) -> &'a [Claim] {
        &role.claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager() -> RoleManager {
        RoleManager::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn role_exists_tracks_create_and_delete() {
        let manager = manager();
        assert!(!manager.role_exists("Admin").await.unwrap());

        let mut role = Role::new("Admin");
        assert!(manager.create_role(&mut role).await.unwrap().succeeded());
        assert!(manager.role_exists("Admin").await.unwrap());
        assert!(manager.role_exists("admin").await.unwrap());

        manager.delete_role(&role).await.unwrap();
        assert!(!manager.role_exists("Admin").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_role_name_rejected() {
        let manager = manager();
        let mut admin = Role::new("Admin");
        manager.create_role(&mut admin).await.unwrap();

        let mut dup = Role::new("ADMIN");
        let result = manager.create_role(&mut dup).await.unwrap();
        assert_eq!(result.codes(), "DuplicateRoleName");
    }

    #[tokio::test]
    async fn role_claims_round_trip() {
        let manager = manager();
        let mut role = Role::new("Admin");
        manager.create_role(&mut role).await.unwrap();

        let claim = Claim::new("scope", "deploy");
        manager.add_claim(&mut role, claim.clone()).await.unwrap();
        assert_eq!(manager.claims(&role).to_vec(), vec![claim.clone()]);

        manager.remove_claim(&mut role, &claim).await.unwrap();
        assert!(manager.claims(&role).is_empty());
    }
}
