//! Database models for Gatekeep
//!
//! This module defines the entity structs that map to PostgreSQL tables, plus the
//! eager-loaded views (user with roles and permissions) the auth layer works with.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;

pub type UserId = i64;
pub type RoleId = i64;
pub type CountryId = i64;

// ============================================================================
// User Model
// ============================================================================

/// User entity representing a registered account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub country_id: CountryId,
    pub photo_path: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// User data for insertion (password already hashed)
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub country_id: CountryId,
    pub photo_path: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Mutable profile fields
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: String,
    pub surname: String,
    pub country_id: CountryId,
    /// `Some` replaces the stored photo path
    pub photo_path: Option<String>,
}

/// Fields that must be unique among live accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UniqueUserField {
    #[display("username")]
    Username,
    #[display("email")]
    Email,
}

impl UniqueUserField {
    /// Read this field from a user
    pub fn value_of<'a>(&self, user: &'a User) -> &'a str {
        match self {
            UniqueUserField::Username => &user.username,
            UniqueUserField::Email => &user.email,
        }
    }
}

// ============================================================================
// Role / Permission Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Permission {
    pub id: i64,
    pub name: String,
}

/// Role with its permissions eagerly loaded
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleWithPermissions {
    pub id: RoleId,
    pub name: String,
    pub permissions: Vec<Permission>,
}

/// User with roles and permissions eagerly loaded
#[derive(Debug, Clone, PartialEq)]
pub struct UserWithRoles {
    pub user: User,
    pub roles: Vec<RoleWithPermissions>,
}

impl UserWithRoles {
    /// Flattened permission names across every role the user holds
    pub fn permission_names(&self) -> BTreeSet<&str> {
        self.roles
            .iter()
            .flat_map(|role| role.permissions.iter().map(|p| p.name.as_str()))
            .collect()
    }

    pub fn has_permission(&self, name: &str) -> bool {
        self.permission_names().contains(name)
    }
}

// ============================================================================
// Country Model
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Country {
    pub id: CountryId,
    pub code: String,
    pub name: String,
}

// ============================================================================
// Email Template Model
// ============================================================================

/// Named email template with `@@variable@@` placeholders
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct EmailTemplate {
    pub id: i64,
    pub name: String,
    pub subject: String,
    pub html_body: String,
}

// ============================================================================
// API views
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleSummary {
    pub id: RoleId,
    pub name: String,
}

impl From<&RoleWithPermissions> for RoleSummary {
    fn from(role: &RoleWithPermissions) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
        }
    }
}

/// User without sensitive data (for API responses)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub country_id: CountryId,
    pub active: bool,
    pub roles: Vec<RoleSummary>,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserResponse {
    /// Build a response; `photo_url` is resolved by the caller from the stored path
    pub fn new(user: &User, roles: &[RoleWithPermissions], photo_url: Option<String>) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            name: user.name.clone(),
            surname: user.surname.clone(),
            email: user.email.clone(),
            country_id: user.country_id,
            active: user.active,
            roles: roles.iter().map(RoleSummary::from).collect(),
            photo_url,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountryResponse {
    pub country_id: CountryId,
    pub code: String,
    pub name: String,
}

impl From<Country> for CountryResponse {
    fn from(country: Country) -> Self {
        Self {
            country_id: country.id,
            code: country.code,
            name: country.name,
        }
    }
}

/// Reference data clients need before they can register
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicParamsResponse {
    pub countries: Vec<CountryResponse>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: 7,
            username: "alice".to_string(),
            password_hash: "secret_hash".to_string(),
            name: "Alice".to_string(),
            surname: "Liddell".to_string(),
            email: "alice@example.com".to_string(),
            country_id: 1,
            photo_path: None,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn role(id: RoleId, name: &str, perms: &[&str]) -> RoleWithPermissions {
        RoleWithPermissions {
            id,
            name: name.to_string(),
            permissions: perms
                .iter()
                .enumerate()
                .map(|(i, p)| Permission {
                    id: i as i64 + 1,
                    name: p.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_user_serialization_skips_password_hash() {
        let json = serde_json::to_string(&sample_user()).unwrap();
        assert!(json.contains("alice@example.com"));
        assert!(!json.contains("secret_hash"));
    }

    #[test]
    fn test_permission_names_are_flattened_and_deduplicated() {
        let user = UserWithRoles {
            user: sample_user(),
            roles: vec![role(1, "user", &["base"]), role(2, "admin", &["base", "admin"])],
        };

        let names: Vec<&str> = user.permission_names().into_iter().collect();
        assert_eq!(names, vec!["admin", "base"]);
        assert!(user.has_permission("admin"));
        assert!(!user.has_permission("superuser"));
    }

    #[test]
    fn test_user_without_roles_has_no_permissions() {
        let user = UserWithRoles {
            user: sample_user(),
            roles: vec![],
        };
        assert!(user.permission_names().is_empty());
        assert!(!user.has_permission("base"));
    }

    #[test]
    fn test_unique_field_display_and_value() {
        let user = sample_user();
        assert_eq!(UniqueUserField::Username.to_string(), "username");
        assert_eq!(UniqueUserField::Email.to_string(), "email");
        assert_eq!(UniqueUserField::Username.value_of(&user), "alice");
        assert_eq!(UniqueUserField::Email.value_of(&user), "alice@example.com");
    }

    #[test]
    fn test_user_response_from_user() {
        let user = sample_user();
        let roles = vec![role(1, "user", &["base"])];

        let response = UserResponse::new(&user, &roles, Some("http://x/uploads/a.png".into()));

        assert_eq!(response.id, user.id);
        assert_eq!(response.username, "alice");
        assert_eq!(
            response.roles,
            vec![RoleSummary {
                id: 1,
                name: "user".into()
            }]
        );
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("password"));
    }
}
