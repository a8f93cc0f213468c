//! User administration API endpoints
//!
//! - POST /v1/admin/users - Create an account that is active immediately
//! - GET /v1/admin/users/{id} - Get a user with roles
//! - PUT /v1/admin/users/{id} - Update profile, roles and photo
//! - GET /v1/params/public - Reference data for registration forms
//!
//! The admin routes require the `admin` permission; the params route is public.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Deserialize;
use std::sync::Arc;

use crate::core::auth::api::{RegisterRequest, validate_new_account};
use crate::core::auth::guard::{CurrentUser, PermissionGuard, require_permission};
use crate::core::auth::service::{AuthError, AuthService};
use crate::core::db::models::{CountryId, PublicParamsResponse, RoleId, UserId, UserResponse};
use crate::core::users::commands::{PhotoUpload, UpdateUserProfile};
use crate::core::users::fields::ValidationIssue;
use crate::core::users::service::UserService;

const KIND_BASE64: &str = "value_error.base64";

/// Photo sent inline in a JSON body
#[derive(Debug, Deserialize)]
pub struct PhotoPayload {
    pub content_type: String,
    /// Standard base64 of the file bytes
    pub data: String,
}

impl PhotoPayload {
    pub fn decode(self) -> Result<PhotoUpload, AuthError> {
        let bytes = STANDARD.decode(self.data.as_bytes()).map_err(|_| {
            AuthError::Validation(vec![ValidationIssue::body(
                "photo",
                "Photo data must be base64 encoded",
                KIND_BASE64,
            )])
        })?;

        Ok(PhotoUpload {
            content_type: self.content_type,
            bytes,
        })
    }
}

/// Decode an optional inline photo
pub fn decode_photo(photo: Option<PhotoPayload>) -> Result<Option<PhotoUpload>, AuthError> {
    photo.map(PhotoPayload::decode).transpose()
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: String,
    pub surname: String,
    pub country_id: CountryId,
    #[serde(default)]
    pub role_ids: Option<Vec<RoleId>>,
    #[serde(default)]
    pub photo: Option<PhotoPayload>,
}

impl UpdateUserRequest {
    fn into_command(self) -> Result<UpdateUserProfile, AuthError> {
        Ok(UpdateUserProfile {
            name: self.name,
            surname: self.surname,
            country_id: self.country_id,
            role_ids: self.role_ids,
            photo: decode_photo(self.photo)?,
        })
    }
}

#[derive(Clone)]
pub struct UsersApiState {
    pub auth: AuthService,
    pub users: UserService,
}

#[derive(Debug, Deserialize)]
pub struct PublicParamsQuery {
    #[serde(default = "include_by_default")]
    pub include_countries: bool,
}

fn include_by_default() -> bool {
    true
}

/// Create the user administration router, guarded by `guard`
pub fn users_api_router(state: UsersApiState, guard: PermissionGuard) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/v1/admin/users", post(create_user_handler))
        .route(
            "/v1/admin/users/{id}",
            get(get_user_handler).put(update_user_handler),
        )
        .route_layer(middleware::from_fn_with_state(guard, require_permission))
        .with_state(state)
}

/// Create the unauthenticated reference data router
pub fn public_params_router(users: UserService) -> Router {
    Router::new()
        .route("/v1/params/public", get(public_params_handler))
        .with_state(Arc::new(users))
}

/// POST /v1/admin/users
async fn create_user_handler(
    State(state): State<Arc<UsersApiState>>,
    CurrentUser(admin): CurrentUser,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AuthError> {
    tracing::info!(
        admin_id = admin.user.id,
        username = %request.username,
        "Admin user creation"
    );

    let command = request.into_command()?;
    validate_new_account(&state.auth, &command).await?;

    let user = state.auth.create_active_user(command).await?;
    let user = state.users.get_user(user.id).await?;

    Ok((StatusCode::CREATED, Json(state.users.to_response(&user))))
}

/// GET /v1/params/public?include_countries=
async fn public_params_handler(
    State(users): State<Arc<UserService>>,
    Query(query): Query<PublicParamsQuery>,
) -> Result<Json<PublicParamsResponse>, AuthError> {
    let mut params = PublicParamsResponse::default();
    if query.include_countries {
        params.countries = users.list_countries().await?;
    }
    Ok(Json(params))
}

/// GET /v1/admin/users/{id}
async fn get_user_handler(
    State(state): State<Arc<UsersApiState>>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<UserId>,
) -> Result<Json<UserResponse>, AuthError> {
    tracing::debug!(admin_id = admin.user.id, user_id = id, "Admin user lookup");

    let user = state.users.get_user(id).await?;
    Ok(Json(state.users.to_response(&user)))
}

/// PUT /v1/admin/users/{id}
async fn update_user_handler(
    State(state): State<Arc<UsersApiState>>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<UserId>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AuthError> {
    tracing::info!(admin_id = admin.user.id, user_id = id, "Admin user update");

    let command = request.into_command()?;
    let user = state.users.update_user(id, command).await?;
    Ok(Json(state.users.to_response(&user)))
}
