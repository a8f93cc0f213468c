//! Credential store interfaces
//!
//! Typed, per-entity seams over the persistence layer. The auth core depends only on
//! these traits; PostgreSQL and in-memory implementations live next to them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::db::models::{
    Country, CountryId, EmailTemplate, NewUser, ProfileChanges, Role, RoleId, UniqueUserField, User,
    UserId, UserWithRoles,
};

/// Credential store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint on a live account was violated
    #[error("Duplicate {field}")]
    Duplicate { field: UniqueUserField },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Other(String),
}

/// Read access and transaction entry point for users, roles and countries.
///
/// Soft-deleted users are invisible to every lookup.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Open a transaction. Writes made through it become visible only on commit.
    async fn begin(&self) -> Result<Box<dyn CredentialTx>, StoreError>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn find_user_with_roles(&self, id: UserId) -> Result<Option<UserWithRoles>, StoreError>;

    async fn find_user_with_roles_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserWithRoles>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn country_exists(&self, id: CountryId) -> Result<bool, StoreError>;

    /// Every country, ordered by name
    async fn list_countries(&self) -> Result<Vec<Country>, StoreError>;

    async fn role_exists(&self, id: RoleId) -> Result<bool, StoreError>;

    /// Flip an inactive user to active. Returns `true` only for the call that
    /// performed the transition.
    async fn activate_user(&self, id: UserId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Returns `false` when the user does not exist
    async fn set_password_hash(
        &self,
        id: UserId,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Request-scoped transaction over the credential store
#[async_trait]
pub trait CredentialTx: Send {
    /// Live users matching `field = value`, locked until the transaction ends
    async fn lock_users_by_field(
        &mut self,
        field: UniqueUserField,
        value: &str,
    ) -> Result<Vec<User>, StoreError>;

    /// Soft-delete the given users
    async fn soft_delete_users(
        &mut self,
        ids: &[UserId],
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Insert a user; a clash with a live account yields [`StoreError::Duplicate`]
    async fn insert_user(&mut self, user: NewUser) -> Result<User, StoreError>;

    async fn update_profile(
        &mut self,
        id: UserId,
        changes: &ProfileChanges,
        at: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError>;

    async fn find_role_by_name(&mut self, name: &str) -> Result<Option<Role>, StoreError>;

    async fn find_roles_by_ids(&mut self, ids: &[RoleId]) -> Result<Vec<Role>, StoreError>;

    /// Replace the user's role set with `role_ids`
    async fn replace_user_roles(
        &mut self,
        user_id: UserId,
        role_ids: &[RoleId],
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Lookup of named email templates
#[async_trait]
pub trait EmailTemplateStore: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Option<EmailTemplate>, StoreError>;
}
