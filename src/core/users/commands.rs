//! Validated command objects for account creation and profile updates

use std::fmt;

use crate::core::db::models::{CountryId, RoleId};

/// Largest accepted profile photo
pub const MAX_PHOTO_BYTES: usize = 20 * 1024 * 1024;

/// Raw uploaded photo
#[derive(Clone, PartialEq, Eq)]
pub struct PhotoUpload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PhotoUpload {
    /// File extension for accepted content types, `None` otherwise
    pub fn extension(&self) -> Option<&'static str> {
        match self.content_type.as_str() {
            "image/jpeg" => Some("jpg"),
            "image/png" => Some("png"),
            _ => None,
        }
    }
}

impl fmt::Debug for PhotoUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoUpload")
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// New account data
#[derive(Clone)]
pub struct RegisterUser {
    pub username: String,
    pub password: String,
    pub password_confirmation: String,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub country_id: CountryId,
    /// Empty means the default role
    pub role_ids: Vec<RoleId>,
    pub photo: Option<PhotoUpload>,
}

impl fmt::Debug for RegisterUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("country_id", &self.country_id)
            .field("role_ids", &self.role_ids)
            .field("photo", &self.photo)
            .finish_non_exhaustive()
    }
}

/// Profile update for an existing account
#[derive(Debug, Clone)]
pub struct UpdateUserProfile {
    pub name: String,
    pub surname: String,
    pub country_id: CountryId,
    /// `Some` replaces the user's roles
    pub role_ids: Option<Vec<RoleId>>,
    pub photo: Option<PhotoUpload>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_photo_extension() {
        let photo = |ct: &str| PhotoUpload {
            content_type: ct.into(),
            bytes: vec![],
        };

        assert_eq!(photo("image/jpeg").extension(), Some("jpg"));
        assert_eq!(photo("image/png").extension(), Some("png"));
        assert_eq!(photo("image/gif").extension(), None);
    }

    #[test]
    fn test_register_debug_hides_password() {
        let command = RegisterUser {
            username: "alice".into(),
            password: "hunter2hunter2".into(),
            password_confirmation: "hunter2hunter2".into(),
            name: "Alice".into(),
            surname: "Liddell".into(),
            email: "alice@example.com".into(),
            country_id: 1,
            role_ids: vec![],
            photo: Some(PhotoUpload {
                content_type: "image/png".into(),
                bytes: vec![0; 16],
            }),
        };

        let debug = format!("{command:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("size: 16"));
    }
}
