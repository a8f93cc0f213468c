//! User integrity validation
//!
//! Cross-entity checks for account creation and update: duplicate usernames and
//! emails, and existence of referenced countries and roles.
//!
//! An inactive account whose activation window has elapsed is abandoned. It does not
//! block reuse of its username or email, and callers that pass `clean_up_non_active`
//! soft-delete such accounts in the same transaction as the check.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::core::auth::service::AuthError;
use crate::core::clock::Clock;
use crate::core::db::models::{RoleId, UniqueUserField, User, UserId};
use crate::core::db::store::{CredentialStore, CredentialTx, StoreError};
use crate::core::users::commands::{RegisterUser, UpdateUserProfile};
use crate::core::users::fields::{KIND_DUPLICATE, KIND_NOT_FOUND, ValidationIssue};

/// Default activation window (24 hours)
pub const ACCOUNT_ACTIVATION_TIMEOUT_SECS: i64 = 86_400;

pub fn invalid_country() -> ValidationIssue {
    ValidationIssue::body("country_id", "Invalid country", KIND_NOT_FOUND)
}

pub fn invalid_role() -> ValidationIssue {
    ValidationIssue::body("role_id", "Invalid role", KIND_NOT_FOUND)
}

pub fn duplicate(field: UniqueUserField) -> ValidationIssue {
    match field {
        UniqueUserField::Username => {
            ValidationIssue::body("username", "Username already exists", KIND_DUPLICATE)
        }
        UniqueUserField::Email => {
            ValidationIssue::body("email", "Email already exists", KIND_DUPLICATE)
        }
    }
}

/// Deduplicate `requested` and confirm every role exists inside `tx`
pub async fn ensure_roles_exist(
    tx: &mut dyn CredentialTx,
    requested: &[RoleId],
) -> Result<Vec<RoleId>, AuthError> {
    let mut ids = requested.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let found = tx.find_roles_by_ids(&ids).await?;
    if found.len() != ids.len() {
        return Err(AuthError::Validation(vec![invalid_role()]));
    }

    Ok(ids)
}

/// Outcome of claiming a username or email for a new account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Taken,
    /// Free to use; photos of reclaimed abandoned accounts, no longer referenced
    Free { orphaned_photos: Vec<String> },
}

#[derive(Clone)]
pub struct UserValidator {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    activation_timeout: Duration,
}

impl UserValidator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        activation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            activation_timeout,
        }
    }

    /// Whether `user` still holds its username and email at `now`
    pub fn holds_identity(&self, user: &User, now: DateTime<Utc>) -> bool {
        user.active || now < user.created_at + self.activation_timeout
    }

    /// Whether `value` is taken for `field`, in a transaction of its own
    pub async fn user_data_already_exists(
        &self,
        field: UniqueUserField,
        value: &str,
        clean_up_non_active: bool,
    ) -> Result<bool, StoreError> {
        let mut tx = self.store.begin().await?;

        match self
            .value_taken(tx.as_mut(), field, value, clean_up_non_active)
            .await
        {
            Ok(taken) => {
                tx.commit().await?;
                Ok(taken)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Duplicate check inside an existing transaction.
    ///
    /// Matching rows are locked, so a following insert in the same transaction sees
    /// the state this check decided on.
    pub async fn value_taken(
        &self,
        tx: &mut dyn CredentialTx,
        field: UniqueUserField,
        value: &str,
        clean_up_non_active: bool,
    ) -> Result<bool, StoreError> {
        let claim = self.claim_value(tx, field, value, clean_up_non_active).await?;
        Ok(claim == Claim::Taken)
    }

    /// Like [`value_taken`](Self::value_taken), but also reports the photos of any
    /// accounts reclaimed on the way. The caller deletes them once the transaction
    /// has committed.
    pub async fn claim_value(
        &self,
        tx: &mut dyn CredentialTx,
        field: UniqueUserField,
        value: &str,
        clean_up_non_active: bool,
    ) -> Result<Claim, StoreError> {
        let now = self.clock.now();
        let matches = tx.lock_users_by_field(field, value).await?;

        if matches.iter().any(|user| self.holds_identity(user, now)) {
            return Ok(Claim::Taken);
        }

        let mut orphaned_photos = Vec::new();
        if clean_up_non_active && !matches.is_empty() {
            let stale: Vec<UserId> = matches.iter().map(|u| u.id).collect();
            let removed = tx.soft_delete_users(&stale, now).await?;
            tracing::info!(%field, removed, "Reclaimed abandoned registrations");
            orphaned_photos = matches.into_iter().filter_map(|u| u.photo_path).collect();
        }

        Ok(Claim::Free { orphaned_photos })
    }

    /// Country and role references shared by create and update
    async fn validate_references(
        &self,
        country_id: i64,
        role_ids: &[RoleId],
    ) -> Result<Vec<ValidationIssue>, StoreError> {
        let mut issues = Vec::new();

        if !self.store.country_exists(country_id).await? {
            issues.push(invalid_country());
        }

        for role_id in role_ids {
            if !self.store.role_exists(*role_id).await? {
                issues.push(invalid_role());
            }
        }

        Ok(issues)
    }

    /// All integrity problems with a new account, in a stable order: country,
    /// roles, email, username. Empty when the data is acceptable.
    pub async fn validate_data_create(
        &self,
        command: &RegisterUser,
    ) -> Result<Vec<ValidationIssue>, StoreError> {
        let mut issues = self
            .validate_references(command.country_id, &command.role_ids)
            .await?;

        if self
            .user_data_already_exists(UniqueUserField::Email, &command.email, false)
            .await?
        {
            issues.push(duplicate(UniqueUserField::Email));
        }

        if self
            .user_data_already_exists(UniqueUserField::Username, &command.username, false)
            .await?
        {
            issues.push(duplicate(UniqueUserField::Username));
        }

        Ok(issues)
    }

    pub async fn validate_data_update(
        &self,
        command: &UpdateUserProfile,
    ) -> Result<Vec<ValidationIssue>, StoreError> {
        let role_ids = command.role_ids.as_deref().unwrap_or_default();
        self.validate_references(command.country_id, role_ids).await
    }
}
