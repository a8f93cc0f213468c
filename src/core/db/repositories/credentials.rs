//! PostgreSQL credential store
//!
//! Users, roles, permissions and countries over a `PgPool`. Soft-deleted users are
//! filtered out of every query; live username/email uniqueness is enforced by the
//! partial unique indexes `users_username_live_key` and `users_email_live_key`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::core::db::models::{
    Country, CountryId, NewUser, Permission, ProfileChanges, Role, RoleId, RoleWithPermissions,
    UniqueUserField, User, UserId, UserWithRoles,
};
use crate::core::db::store::{CredentialStore, CredentialTx, StoreError};

const USERNAME_INDEX: &str = "users_username_live_key";
const EMAIL_INDEX: &str = "users_email_live_key";

/// Flat row of the user → role → permission join
#[derive(Debug, FromRow)]
struct RolePermissionRow {
    role_id: RoleId,
    role_name: String,
    permission_id: Option<i64>,
    permission_name: Option<String>,
}

/// Fold join rows (ordered by role id) into roles with their permissions
fn group_roles(rows: Vec<RolePermissionRow>) -> Vec<RoleWithPermissions> {
    let mut roles: Vec<RoleWithPermissions> = Vec::new();

    for row in rows {
        if roles.last().map(|r| r.id) != Some(row.role_id) {
            roles.push(RoleWithPermissions {
                id: row.role_id,
                name: row.role_name,
                permissions: Vec::new(),
            });
        }
        if let (Some(id), Some(name), Some(role)) =
            (row.permission_id, row.permission_name, roles.last_mut())
        {
            role.permissions.push(Permission { id, name });
        }
    }

    roles
}

/// Translate a unique violation on a live-user index into [`StoreError::Duplicate`]
fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.is_unique_violation()
    {
        match db_err.constraint() {
            Some(USERNAME_INDEX) => {
                return StoreError::Duplicate {
                    field: UniqueUserField::Username,
                };
            }
            Some(EMAIL_INDEX) => {
                return StoreError::Duplicate {
                    field: UniqueUserField::Email,
                };
            }
            _ => {}
        }
    }
    StoreError::DatabaseError(err)
}

/// Credential store backed by PostgreSQL
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_roles(&self, user_id: UserId) -> Result<Vec<RoleWithPermissions>, StoreError> {
        let rows = sqlx::query_as::<_, RolePermissionRow>(
            r#"
            SELECT r.id AS role_id, r.name AS role_name,
                   p.id AS permission_id, p.name AS permission_name
            FROM users_roles ur
            JOIN roles r ON r.id = ur.role_id
            LEFT JOIN roles_permissions rp ON rp.role_id = r.id
            LEFT JOIN permissions p ON p.id = rp.permission_id
            WHERE ur.user_id = $1
            ORDER BY r.id, p.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(group_roles(rows))
    }

    async fn attach_roles(&self, user: Option<User>) -> Result<Option<UserWithRoles>, StoreError> {
        match user {
            Some(user) => {
                let roles = self.load_roles(user.id).await?;
                Ok(Some(UserWithRoles { user, roles }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn begin(&self) -> Result<Box<dyn CredentialTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgCredentialTx { tx }))
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, name, surname, email, country_id,
                   photo_path, active, created_at, updated_at, deleted_at
            FROM users
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_user_with_roles(&self, id: UserId) -> Result<Option<UserWithRoles>, StoreError> {
        let user = self.find_user(id).await?;
        self.attach_roles(user).await
    }

    async fn find_user_with_roles_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserWithRoles>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, name, surname, email, country_id,
                   photo_path, active, created_at, updated_at, deleted_at
            FROM users
            WHERE username = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        self.attach_roles(user).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, name, surname, email, country_id,
                   photo_path, active, created_at, updated_at, deleted_at
            FROM users
            WHERE email = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn country_exists(&self, id: CountryId) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM countries WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn list_countries(&self) -> Result<Vec<Country>, StoreError> {
        let countries =
            sqlx::query_as::<_, Country>("SELECT id, code, name FROM countries ORDER BY name, id")
                .fetch_all(&self.pool)
                .await?;

        Ok(countries)
    }

    async fn role_exists(&self, id: RoleId) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }

    async fn activate_user(&self, id: UserId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        // Conditional update: the row lock serialises concurrent confirmations
        let result = sqlx::query(
            r#"
            UPDATE users
            SET active = TRUE, updated_at = $2
            WHERE id = $1 AND active = FALSE AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_password_hash(
        &self,
        id: UserId,
        password_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, updated_at = $3
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Transaction over the PostgreSQL credential store
pub struct PgCredentialTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CredentialTx for PgCredentialTx {
    async fn lock_users_by_field(
        &mut self,
        field: UniqueUserField,
        value: &str,
    ) -> Result<Vec<User>, StoreError> {
        let sql = match field {
            UniqueUserField::Username => {
                r#"
                SELECT id, username, password_hash, name, surname, email, country_id,
                       photo_path, active, created_at, updated_at, deleted_at
                FROM users
                WHERE username = $1 AND deleted_at IS NULL
                FOR UPDATE
                "#
            }
            UniqueUserField::Email => {
                r#"
                SELECT id, username, password_hash, name, surname, email, country_id,
                       photo_path, active, created_at, updated_at, deleted_at
                FROM users
                WHERE email = $1 AND deleted_at IS NULL
                FOR UPDATE
                "#
            }
        };

        let users = sqlx::query_as::<_, User>(sql)
            .bind(value)
            .fetch_all(&mut *self.tx)
            .await?;

        Ok(users)
    }

    async fn soft_delete_users(
        &mut self,
        ids: &[UserId],
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE users
            SET deleted_at = $2, updated_at = $2
            WHERE id = ANY($1) AND deleted_at IS NULL
            "#,
        )
        .bind(ids)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn insert_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash, name, surname, email, country_id,
                               photo_path, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING id, username, password_hash, name, surname, email, country_id,
                      photo_path, active, created_at, updated_at, deleted_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(&user.surname)
        .bind(&user.email)
        .bind(user.country_id)
        .bind(&user.photo_path)
        .bind(user.active)
        .bind(user.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_insert_error)
    }

    async fn update_profile(
        &mut self,
        id: UserId,
        changes: &ProfileChanges,
        at: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET name = $2, surname = $3, country_id = $4,
                photo_path = COALESCE($5, photo_path), updated_at = $6
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING id, username, password_hash, name, surname, email, country_id,
                      photo_path, active, created_at, updated_at, deleted_at
            "#,
        )
        .bind(id)
        .bind(&changes.name)
        .bind(&changes.surname)
        .bind(changes.country_id)
        .bind(&changes.photo_path)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(user)
    }

    async fn find_role_by_name(&mut self, name: &str) -> Result<Option<Role>, StoreError> {
        let role = sqlx::query_as::<_, Role>("SELECT id, name FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(role)
    }

    async fn find_roles_by_ids(&mut self, ids: &[RoleId]) -> Result<Vec<Role>, StoreError> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT id, name FROM roles WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(roles)
    }

    async fn replace_user_roles(
        &mut self,
        user_id: UserId,
        role_ids: &[RoleId],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users_roles WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO users_roles (user_id, role_id)
            SELECT $1, role_id FROM UNNEST($2::BIGINT[]) AS t(role_id)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(role_ids)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgCredentialTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PgCredentialTx { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
