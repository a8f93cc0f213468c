//! Gatekeep - account registration, authentication and authorization service
//!
//! An axum/sqlx service handling sign-up with email confirmation, login with JWT
//! access tokens, password reset and permission-guarded user administration.

pub mod app;
pub mod core;
