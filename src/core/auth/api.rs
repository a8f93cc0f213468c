//! Auth API endpoints
//!
//! Provides REST API endpoints for authentication:
//! - POST /v1/auth/register - Register a new, inactive account
//! - GET /v1/auth/confirm?token= - Activate an account
//! - POST /v1/auth/login - Login and get an access token
//! - POST /v1/auth/password-reset/request - Email a password reset link
//! - GET /v1/auth/password-reset?token= - Check a password reset token
//! - POST /v1/auth/password-reset - Set a new password
//! - GET /v1/auth/me - Get current user info

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::auth::guard::extract_bearer_token;
use crate::core::auth::service::{AccessToken, AuthError, AuthService, RequestContext};
use crate::core::db::models::{CountryId, RoleId, UniqueUserField, UserResponse};
use crate::core::users::api::{PhotoPayload, decode_photo};
use crate::core::users::commands::RegisterUser;
use crate::core::users::fields::{ValidationIssue, check_password, check_registration};
use crate::core::users::service::UserService;
use crate::core::users::validator::duplicate;

/// Auth API state
#[derive(Clone)]
pub struct AuthApiState {
    pub auth_service: AuthService,
    pub user_service: UserService,
    pub request_context: RequestContext,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationIssue>>,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<ValidationIssue>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Convert AuthError to API response
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AuthError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            AuthError::DuplicateAccount(UniqueUserField::Username) => {
                (StatusCode::CONFLICT, "USERNAME_EXISTS")
            }
            AuthError::DuplicateAccount(UniqueUserField::Email) => {
                (StatusCode::CONFLICT, "EMAIL_EXISTS")
            }
            AuthError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AuthError::ExpiredToken => (StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
            AuthError::InvalidToken => (StatusCode::BAD_REQUEST, "INVALID_TOKEN"),
            AuthError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AuthError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            AuthError::Store(_)
            | AuthError::Hash(_)
            | AuthError::Template(_)
            | AuthError::Email(_)
            | AuthError::File(_)
            | AuthError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = match self {
            AuthError::Validation(issues) => {
                ApiError::new("Validation failed", code).with_details(issues)
            }
            err @ AuthError::DuplicateAccount(field) => {
                ApiError::new(err.to_string(), code).with_details(vec![duplicate(field)])
            }
            err if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %err, "Request failed");
                ApiError::new("Internal server error", code)
            }
            err => ApiError::new(err.to_string(), code),
        };

        (status, Json(body)).into_response()
    }
}

/// Registration body; the photo is sent inline as base64
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub password_confirmation: String,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub country_id: CountryId,
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
    #[serde(default)]
    pub photo: Option<PhotoPayload>,
}

impl RegisterRequest {
    pub(crate) fn into_command(self) -> Result<RegisterUser, AuthError> {
        Ok(RegisterUser {
            username: self.username,
            password: self.password,
            password_confirmation: self.password_confirmation,
            name: self.name,
            surname: self.surname,
            email: self.email,
            country_id: self.country_id,
            role_ids: self.role_ids,
            photo: decode_photo(self.photo)?,
        })
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct NewPasswordRequest {
    pub token: String,
    pub password: String,
    pub password_confirmation: String,
}

/// Response for a valid password reset token
#[derive(Debug, Serialize)]
pub struct ResetTokenResponse {
    pub valid: bool,
    pub username: String,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

impl SuccessResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

/// Create the auth API router
pub fn auth_api_router(state: AuthApiState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/v1/auth/register", post(register_handler))
        .route("/v1/auth/confirm", get(confirm_handler))
        .route("/v1/auth/login", post(login_handler))
        .route(
            "/v1/auth/password-reset/request",
            post(request_password_reset_handler),
        )
        .route(
            "/v1/auth/password-reset",
            get(check_reset_token_handler).post(reset_password_handler),
        )
        .route("/v1/auth/me", get(me_handler))
        .with_state(state)
}

/// POST /v1/auth/register
/// Field checks, then integrity checks, then registration
async fn register_handler(
    State(state): State<Arc<AuthApiState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AuthError> {
    tracing::info!("Registration attempt for username: {}", request.username);

    let command = request.into_command()?;
    validate_new_account(&state.auth_service, &command).await?;

    let user = state
        .auth_service
        .register(command, &state.request_context)
        .await?;
    let user = state.user_service.get_user(user.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(state.user_service.to_response(&user)),
    ))
}

/// Field checks, then integrity checks; the first stage with issues is reported
pub(crate) async fn validate_new_account(
    auth: &AuthService,
    command: &RegisterUser,
) -> Result<(), AuthError> {
    let mut issues = check_registration(command);
    if issues.is_empty() {
        issues = auth.validator().validate_data_create(command).await?;
    }
    if !issues.is_empty() {
        return Err(AuthError::Validation(issues));
    }
    Ok(())
}

/// GET /v1/auth/confirm?token=
async fn confirm_handler(
    State(state): State<Arc<AuthApiState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<SuccessResponse>, AuthError> {
    if !state.auth_service.confirm(&query.token).await? {
        return Err(AuthError::InvalidToken);
    }

    Ok(SuccessResponse::ok("Account confirmed"))
}

/// POST /v1/auth/login
async fn login_handler(
    State(state): State<Arc<AuthApiState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AccessToken>, AuthError> {
    tracing::info!("Login attempt for username: {}", request.username);

    let token = state
        .auth_service
        .login(&request.username, &request.password)
        .await?;

    Ok(Json(token))
}

/// POST /v1/auth/password-reset/request
async fn request_password_reset_handler(
    State(state): State<Arc<AuthApiState>>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<SuccessResponse>, AuthError> {
    let sent = state
        .auth_service
        .send_password_reset_email(&request.email, &state.request_context)
        .await?;

    if !sent {
        return Err(AuthError::NotFound("User"));
    }

    Ok(SuccessResponse::ok("Password reset email sent"))
}

/// GET /v1/auth/password-reset?token=
async fn check_reset_token_handler(
    State(state): State<Arc<AuthApiState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<ResetTokenResponse>, AuthError> {
    let user = state
        .auth_service
        .get_user_from_token(&query.token)
        .await?
        .ok_or(AuthError::NotFound("User"))?;

    Ok(Json(ResetTokenResponse {
        valid: true,
        username: user.username,
    }))
}

/// POST /v1/auth/password-reset
async fn reset_password_handler(
    State(state): State<Arc<AuthApiState>>,
    Json(request): Json<NewPasswordRequest>,
) -> Result<Json<SuccessResponse>, AuthError> {
    let issues = check_password(&request.password, &request.password_confirmation);
    if !issues.is_empty() {
        return Err(AuthError::Validation(issues));
    }

    if !state
        .auth_service
        .reset_password(&request.token, &request.password)
        .await?
    {
        return Err(AuthError::NotFound("User"));
    }

    Ok(SuccessResponse::ok("Password updated"))
}

/// GET /v1/auth/me
async fn me_handler(
    State(state): State<Arc<AuthApiState>>,
    headers: HeaderMap,
) -> Result<Json<UserResponse>, AuthError> {
    let token = extract_bearer_token(&headers)?;
    let user = state.auth_service.get_current_user(&token).await?;

    Ok(Json(state.user_service.to_response(&user)))
}
