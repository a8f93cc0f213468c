//! User administration service

use std::sync::Arc;

use crate::core::auth::service::{AuthBackends, AuthError, AuthSettings};
use crate::core::clock::Clock;
use crate::core::db::models::{
    CountryResponse, ProfileChanges, User, UserId, UserResponse, UserWithRoles,
};
use crate::core::db::store::{CredentialStore, CredentialTx};
use crate::core::users::commands::UpdateUserProfile;
use crate::core::users::fields::check_profile_update;
use crate::core::users::photos::PhotoStorage;
use crate::core::users::validator::{UserValidator, ensure_roles_exist};

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    photos: PhotoStorage,
    validator: UserValidator,
}

impl UserService {
    pub fn new(backends: &AuthBackends, settings: &AuthSettings) -> Self {
        Self {
            store: backends.store.clone(),
            clock: backends.clock.clone(),
            photos: PhotoStorage::new(backends.files.clone(), settings.external_call_timeout),
            validator: UserValidator::new(
                backends.store.clone(),
                backends.clock.clone(),
                settings.activation_timeout,
            ),
        }
    }

    pub async fn list_countries(&self) -> Result<Vec<CountryResponse>, AuthError> {
        let countries = self.store.list_countries().await?;
        Ok(countries.into_iter().map(CountryResponse::from).collect())
    }

    pub async fn get_user(&self, id: UserId) -> Result<UserWithRoles, AuthError> {
        self.store
            .find_user_with_roles(id)
            .await?
            .ok_or(AuthError::NotFound("User"))
    }

    /// Update profile fields and, when given, the role set.
    ///
    /// A new photo is stored before the transaction and removed again if the update
    /// fails. The replaced photo is deleted only after commit.
    pub async fn update_user(
        &self,
        id: UserId,
        command: UpdateUserProfile,
    ) -> Result<UserWithRoles, AuthError> {
        let mut issues = check_profile_update(&command);
        if issues.is_empty() {
            issues = self.validator.validate_data_update(&command).await?;
        }
        if !issues.is_empty() {
            return Err(AuthError::Validation(issues));
        }

        let existing = self
            .store
            .find_user(id)
            .await?
            .ok_or(AuthError::NotFound("User"))?;

        let new_photo = match &command.photo {
            Some(photo) => Some(self.photos.save(photo).await?),
            None => None,
        };

        if let Err(err) = self.apply_update(id, &command, new_photo.clone()).await {
            if let Some(path) = &new_photo {
                self.photos.discard(path).await;
            }
            tracing::warn!(user_id = id, error = %err, "User update failed");
            return Err(err);
        }

        if new_photo.is_some()
            && let Some(old) = &existing.photo_path
        {
            self.photos.discard(old).await;
        }

        tracing::info!(user_id = id, "User updated");
        self.get_user(id).await
    }

    async fn apply_update(
        &self,
        id: UserId,
        command: &UpdateUserProfile,
        photo_path: Option<String>,
    ) -> Result<User, AuthError> {
        let mut tx = self.store.begin().await?;

        match self.update_in_tx(tx.as_mut(), id, command, photo_path).await {
            Ok(user) => {
                tx.commit().await?;
                Ok(user)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "User update rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn update_in_tx(
        &self,
        tx: &mut dyn CredentialTx,
        id: UserId,
        command: &UpdateUserProfile,
        photo_path: Option<String>,
    ) -> Result<User, AuthError> {
        let changes = ProfileChanges {
            name: command.name.clone(),
            surname: command.surname.clone(),
            country_id: command.country_id,
            photo_path,
        };

        let user = tx
            .update_profile(id, &changes, self.clock.now())
            .await?
            .ok_or(AuthError::NotFound("User"))?;

        if let Some(requested) = &command.role_ids {
            let role_ids = ensure_roles_exist(tx, requested).await?;
            tx.replace_user_roles(id, &role_ids).await?;
        }

        Ok(user)
    }

    /// Public view of a user, with the photo path resolved to a URL
    pub fn to_response(&self, user: &UserWithRoles) -> UserResponse {
        let photo_url = user
            .user
            .photo_path
            .as_deref()
            .map(|path| self.photos.url_for(path));
        UserResponse::new(&user.user, &user.roles, photo_url)
    }
}
