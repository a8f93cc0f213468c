//! In-process credential store
//!
//! Implements the store traits over shared in-memory state. Transactions take an
//! exclusive lock and work on a private copy that replaces the shared state on
//! commit, which gives serialisable semantics. Used by tests and by `--memory` runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::core::db::models::{
    Country, CountryId, EmailTemplate, NewUser, Permission, ProfileChanges, Role, RoleId,
    RoleWithPermissions, UniqueUserField, User, UserId, UserWithRoles,
};
use crate::core::db::store::{CredentialStore, CredentialTx, EmailTemplateStore, StoreError};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: BTreeMap<UserId, User>,
    next_user_id: UserId,
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<i64, Permission>,
    role_permissions: BTreeSet<(RoleId, i64)>,
    user_roles: BTreeSet<(UserId, RoleId)>,
    countries: BTreeMap<CountryId, Country>,
}

impl MemoryState {
    fn live_user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id).filter(|u| u.deleted_at.is_none())
    }

    fn live_users_by(&self, field: UniqueUserField, value: &str) -> Vec<User> {
        self.users
            .values()
            .filter(|u| u.deleted_at.is_none() && field.value_of(u) == value)
            .cloned()
            .collect()
    }

    fn with_roles(&self, user: &User) -> UserWithRoles {
        let roles = self
            .user_roles
            .iter()
            .filter(|(uid, _)| *uid == user.id)
            .filter_map(|(_, rid)| self.roles.get(rid))
            .map(|role| RoleWithPermissions {
                id: role.id,
                name: role.name.clone(),
                permissions: self
                    .role_permissions
                    .iter()
                    .filter(|(rid, _)| *rid == role.id)
                    .filter_map(|(_, pid)| self.permissions.get(pid).cloned())
                    .collect(),
            })
            .collect();

        UserWithRoles {
            user: user.clone(),
            roles,
        }
    }

    fn insert_user(&mut self, new: NewUser) -> Result<User, StoreError> {
        for field in [UniqueUserField::Username, UniqueUserField::Email] {
            let value = match field {
                UniqueUserField::Username => &new.username,
                UniqueUserField::Email => &new.email,
            };
            if !self.live_users_by(field, value).is_empty() {
                return Err(StoreError::Duplicate { field });
            }
        }

        self.next_user_id += 1;
        let user = User {
            id: self.next_user_id,
            username: new.username,
            password_hash: new.password_hash,
            name: new.name,
            surname: new.surname,
            email: new.email,
            country_id: new.country_id,
            photo_path: new.photo_path,
            active: new.active,
            created_at: new.created_at,
            updated_at: new.created_at,
            deleted_at: None,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn add_role(&mut self, name: &str, permissions: &[&str]) -> RoleId {
        let role_id = self.roles.len() as RoleId + 1;
        self.roles.insert(
            role_id,
            Role {
                id: role_id,
                name: name.to_string(),
            },
        );

        for permission in permissions {
            let existing = self
                .permissions
                .values()
                .find(|p| p.name == *permission)
                .map(|p| p.id);
            let permission_id = existing.unwrap_or_else(|| {
                let id = self.permissions.len() as i64 + 1;
                self.permissions.insert(
                    id,
                    Permission {
                        id,
                        name: permission.to_string(),
                    },
                );
                id
            });
            self.role_permissions.insert((role_id, permission_id));
        }

        role_id
    }
}

/// In-memory implementation of [`CredentialStore`] and [`EmailTemplateStore`]
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    templates: Arc<RwLock<BTreeMap<String, EmailTemplate>>>,
}

impl MemoryStore {
    /// Empty store with no reference data
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the same reference data the SQL seed migration inserts:
    /// roles `user` (base) and `admin` (base, admin), one country and both
    /// transactional email templates.
    pub fn seeded() -> Self {
        let mut state = MemoryState::default();
        state.add_role("user", &["base"]);
        state.add_role("admin", &["base", "admin"]);
        state.countries.insert(
            1,
            Country {
                id: 1,
                code: "C1".into(),
                name: "Country1".into(),
            },
        );

        let templates = [
            EmailTemplate {
                id: 1,
                name: "account_confirmation".into(),
                subject: "Please, confirm your email address".into(),
                html_body: "<p>Hi @@name@@ @@surname@@,</p><p>Click <a href=\"@@confirmation_url@@\">here</a> to confirm your email address.</p>".into(),
            },
            EmailTemplate {
                id: 2,
                name: "password_reset".into(),
                subject: "Reset your password".into(),
                html_body: "<p>Hi @@name@@ @@surname@@,</p><p>Click <a href=\"@@password_reset_url@@\">here</a> to reset your password.</p>".into(),
            },
        ]
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect();

        Self {
            state: Arc::new(Mutex::new(state)),
            templates: Arc::new(RwLock::new(templates)),
        }
    }

    /// Add a role granting `permissions` (created on demand); returns the role id
    pub async fn add_role(&self, name: &str, permissions: &[&str]) -> RoleId {
        self.state.lock().await.add_role(name, permissions)
    }

    pub async fn put_template(&self, template: EmailTemplate) {
        self.templates
            .write()
            .await
            .insert(template.name.clone(), template);
    }

    pub async fn remove_template(&self, name: &str) {
        self.templates.write().await.remove(name);
    }

    /// Every stored user, soft-deleted ones included
    pub async fn all_users(&self) -> Vec<User> {
        self.state.lock().await.users.values().cloned().collect()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn CredentialTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.live_user(id).cloned())
    }

    async fn find_user_with_roles(&self, id: UserId) -> Result<Option<UserWithRoles>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.live_user(id).map(|u| state.with_roles(u)))
    }

    async fn find_user_with_roles_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserWithRoles>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .live_users_by(UniqueUserField::Username, username)
            .first()
            .map(|u| state.with_roles(u)))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .live_users_by(UniqueUserField::Email, email)
            .into_iter()
            .next())
    }

    async fn country_exists(&self, id: CountryId) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.countries.contains_key(&id))
    }

    async fn list_countries(&self) -> Result<Vec<Country>, StoreError> {
        let mut countries: Vec<Country> =
            self.state.lock().await.countries.values().cloned().collect();
        countries.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(countries)
    }

    async fn role_exists(&self, id: RoleId) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.roles.contains_key(&id))
    }

    async fn activate_user(&self, id: UserId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&id) {
            Some(user) if user.deleted_at.is_none() && !user.active => {
                user.active = true;
                user.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_password_hash(
        &self,
        id: UserId,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&id) {
            Some(user) if user.deleted_at.is_none() => {
                user.password_hash = password_hash.to_string();
                user.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl EmailTemplateStore for MemoryStore {
    async fn get_by_name(&self, name: &str) -> Result<Option<EmailTemplate>, StoreError> {
        Ok(self.templates.read().await.get(name).cloned())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl CredentialTx for MemoryTx {
    async fn lock_users_by_field(
        &mut self,
        field: UniqueUserField,
        value: &str,
    ) -> Result<Vec<User>, StoreError> {
        Ok(self.working.live_users_by(field, value))
    }

    async fn soft_delete_users(
        &mut self,
        ids: &[UserId],
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut affected = 0;
        for id in ids {
            if let Some(user) = self.working.users.get_mut(id)
                && user.deleted_at.is_none()
            {
                user.deleted_at = Some(at);
                user.updated_at = at;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        self.working.insert_user(user)
    }

    async fn update_profile(
        &mut self,
        id: UserId,
        changes: &ProfileChanges,
        at: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        let Some(user) = self
            .working
            .users
            .get_mut(&id)
            .filter(|u| u.deleted_at.is_none())
        else {
            return Ok(None);
        };

        user.name = changes.name.clone();
        user.surname = changes.surname.clone();
        user.country_id = changes.country_id;
        if let Some(path) = &changes.photo_path {
            user.photo_path = Some(path.clone());
        }
        user.updated_at = at;
        Ok(Some(user.clone()))
    }

    async fn find_role_by_name(&mut self, name: &str) -> Result<Option<Role>, StoreError> {
        Ok(self.working.roles.values().find(|r| r.name == name).cloned())
    }

    async fn find_roles_by_ids(&mut self, ids: &[RoleId]) -> Result<Vec<Role>, StoreError> {
        Ok(self
            .working
            .roles
            .values()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn replace_user_roles(
        &mut self,
        user_id: UserId,
        role_ids: &[RoleId],
    ) -> Result<(), StoreError> {
        self.working.user_roles.retain(|(uid, _)| *uid != user_id);
        for role_id in role_ids {
            self.working.user_roles.insert((user_id, *role_id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
