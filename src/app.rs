//! HTTP application assembly

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use std::path::PathBuf;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::core::auth::{
    AuthApiState, AuthBackends, AuthService, AuthSettings, RequestContext, auth_api_router,
    has_permission,
};
use crate::core::db::{PgPool, health_check};
use crate::core::users::{UserService, UsersApiState, public_params_router, users_api_router};

/// Permission required by the user administration routes
pub const ADMIN_PERMISSION: &str = "admin";

/// Everything the router needs
#[derive(Clone)]
pub struct AppState {
    pub auth_service: AuthService,
    pub user_service: UserService,
    pub request_context: RequestContext,
    pub uploads_dir: PathBuf,
    /// `None` when running on the in-memory store
    pub db: Option<PgPool>,
}

impl AppState {
    pub fn new(
        backends: AuthBackends,
        settings: &AuthSettings,
        request_context: RequestContext,
        uploads_dir: PathBuf,
        db: Option<PgPool>,
    ) -> Self {
        Self {
            user_service: UserService::new(&backends, settings),
            auth_service: AuthService::new(backends, settings),
            request_context,
            uploads_dir,
            db,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_latency_ms: Option<u128>,
}

async fn health_handler(
    State(db): State<Option<PgPool>>,
) -> (StatusCode, Json<HealthResponse>) {
    let Some(pool) = db else {
        return (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "memory",
                database_latency_ms: None,
            }),
        );
    };

    match health_check(&pool).await {
        Ok(latency) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "ok",
                database_latency_ms: Some(latency.as_millis()),
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    database: "unreachable",
                    database_latency_ms: None,
                }),
            )
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let guard = has_permission(state.auth_service.clone(), ADMIN_PERMISSION);

    let auth_api = auth_api_router(AuthApiState {
        auth_service: state.auth_service.clone(),
        user_service: state.user_service.clone(),
        request_context: state.request_context.clone(),
    });

    let users_api = users_api_router(
        UsersApiState {
            auth: state.auth_service.clone(),
            users: state.user_service.clone(),
        },
        guard,
    );

    Router::new()
        .route("/health", get(health_handler).with_state(state.db.clone()))
        .merge(auth_api)
        .merge(users_api)
        .merge(public_params_router(state.user_service.clone()))
        // Uploaded photos: /uploads/users/<file>
        .nest_service("/uploads", ServeDir::new(&state.uploads_dir))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use crate::core::testing::Harness;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_on_memory_store() {
        let harness = Harness::new();

        let response = harness
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["database"], "memory");
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let harness = Harness::new();

        let response = harness
            .router()
            .oneshot(Request::builder().uri("/v1/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
