//! Field-level request checks
//!
//! Shape checks that run before any store access. They produce the same
//! [`ValidationIssue`] records as the integrity validator so the HTTP layer can
//! return a single list.

use serde::{Deserialize, Serialize};

use crate::core::users::commands::{MAX_PHOTO_BYTES, PhotoUpload, RegisterUser, UpdateUserProfile};

pub const USERNAME_MIN: usize = 2;
pub const USERNAME_MAX: usize = 50;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 50;
pub const NAME_MIN: usize = 2;
pub const NAME_MAX: usize = 50;

pub const KIND_NOT_FOUND: &str = "db_error.not_found";
pub const KIND_DUPLICATE: &str = "db_error.duplicate";
pub const KIND_TOO_SHORT: &str = "value_error.str.min_length";
pub const KIND_TOO_LONG: &str = "value_error.str.max_length";
pub const KIND_EMAIL: &str = "value_error.email";
pub const KIND_PASSWORD_MISMATCH: &str = "value_error.password_mismatch";
pub const KIND_CONTENT_TYPE: &str = "value_error.content_type";
pub const KIND_FILE_SIZE: &str = "value_error.file_size";

/// Structured, field-scoped validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ValidationIssue {
    /// Issue located at `body.<field>`
    pub fn body(field: &str, msg: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            loc: vec!["body".to_string(), field.to_string()],
            msg: msg.into(),
            kind: kind.into(),
        }
    }
}

fn check_length(field: &str, value: &str, min: usize, max: usize) -> Option<ValidationIssue> {
    let len = value.chars().count();
    if len < min {
        Some(ValidationIssue::body(
            field,
            format!("ensure this value has at least {min} characters"),
            KIND_TOO_SHORT,
        ))
    } else if len > max {
        Some(ValidationIssue::body(
            field,
            format!("ensure this value has at most {max} characters"),
            KIND_TOO_LONG,
        ))
    } else {
        None
    }
}

/// `local@domain.tld` with non-empty parts
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|p| !p.is_empty())
        && !email.chars().any(char::is_whitespace)
}

pub fn check_email(email: &str) -> Option<ValidationIssue> {
    (!is_valid_email(email)).then(|| {
        ValidationIssue::body("email", "value is not a valid email address", KIND_EMAIL)
    })
}

/// Password length plus confirmation match
pub fn check_password(password: &str, confirmation: &str) -> Vec<ValidationIssue> {
    let mut issues: Vec<ValidationIssue> =
        check_length("password", password, PASSWORD_MIN, PASSWORD_MAX)
            .into_iter()
            .collect();

    if password != confirmation {
        issues.push(ValidationIssue::body(
            "password_confirmation",
            "Passwords do not match",
            KIND_PASSWORD_MISMATCH,
        ));
    }

    issues
}

pub fn check_photo(photo: &PhotoUpload) -> Option<ValidationIssue> {
    if photo.extension().is_none() {
        return Some(ValidationIssue::body(
            "photo",
            "Photo must be a JPEG or PNG image",
            KIND_CONTENT_TYPE,
        ));
    }
    if photo.bytes.len() > MAX_PHOTO_BYTES {
        return Some(ValidationIssue::body(
            "photo",
            "Photo must not exceed 20 MB",
            KIND_FILE_SIZE,
        ));
    }
    None
}

pub fn check_registration(command: &RegisterUser) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    issues.extend(check_length(
        "username",
        &command.username,
        USERNAME_MIN,
        USERNAME_MAX,
    ));
    issues.extend(check_password(
        &command.password,
        &command.password_confirmation,
    ));
    issues.extend(check_length("name", &command.name, NAME_MIN, NAME_MAX));
    issues.extend(check_length("surname", &command.surname, NAME_MIN, NAME_MAX));
    issues.extend(check_email(&command.email));
    issues.extend(command.photo.as_ref().and_then(check_photo));

    issues
}

pub fn check_profile_update(command: &UpdateUserProfile) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    issues.extend(check_length("name", &command.name, NAME_MIN, NAME_MAX));
    issues.extend(check_length("surname", &command.surname, NAME_MIN, NAME_MAX));
    issues.extend(command.photo.as_ref().and_then(check_photo));

    issues
}
