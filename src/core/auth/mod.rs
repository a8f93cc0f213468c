//! Authentication and authorization
//!
//! This module provides:
//! - Account registration, confirmation and password reset
//! - Credential checks and JWT access tokens
//! - Signed, expiring action tokens for email links
//! - The `has_permission` guard for protected routes
//! - REST API endpoints for auth operations

pub mod action_token;
pub mod api;
pub mod guard;
pub mod jwt;
pub mod password;
pub mod service;

pub use action_token::{ActionTokenCodec, TokenError};
pub use api::{ApiError, AuthApiState, auth_api_router};
pub use guard::{CurrentUser, PermissionGuard, has_permission, require_permission};
pub use jwt::{Claims, JwtConfig, JwtError, JwtService};
pub use password::{BcryptHasher, HashError, PasswordHasher};
pub use service::{
    AccessToken, AuthBackends, AuthError, AuthService, AuthSettings, RequestContext,
};
