//! Permission-gated request authorization
//!
//! `has_permission("admin")` builds a guard that resolves the caller from the bearer
//! token and requires the named permission on one of their roles. Mount it with
//! `axum::middleware::from_fn_with_state(guard, require_permission)`; handlers behind
//! it read the caller with the [`CurrentUser`] extractor.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use crate::core::auth::service::{AuthError, AuthService};
use crate::core::db::models::UserWithRoles;

/// Extract the Bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AuthError> {
    let Authorization(bearer) = headers
        .typed_get::<Authorization<Bearer>>()
        .ok_or(AuthError::Unauthorized)?;

    let token = bearer.token().trim();
    if token.is_empty() {
        return Err(AuthError::Unauthorized);
    }

    Ok(token.to_string())
}

/// Requires one named permission
#[derive(Clone)]
pub struct PermissionGuard {
    auth: AuthService,
    required: &'static str,
}

/// Guard requiring `required` among the caller's permissions
pub fn has_permission(auth: AuthService, required: &'static str) -> PermissionGuard {
    PermissionGuard { auth, required }
}

impl PermissionGuard {
    /// Resolve the caller and check the permission. Missing permission is reported
    /// exactly like a bad token.
    pub async fn authorize(&self, token: &str) -> Result<UserWithRoles, AuthError> {
        let user = self.auth.get_current_user(token).await?;

        if !user.has_permission(self.required) {
            tracing::warn!(
                user_id = user.user.id,
                required = self.required,
                "Permission denied"
            );
            return Err(AuthError::Unauthorized);
        }

        Ok(user)
    }
}

/// Middleware body for [`PermissionGuard`]
pub async fn require_permission(
    State(guard): State<PermissionGuard>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_bearer_token(request.headers())?;
    let user = guard.authorize(&token).await?;

    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

/// Caller resolved by [`require_permission`]
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserWithRoles);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::Unauthorized)
    }
}
