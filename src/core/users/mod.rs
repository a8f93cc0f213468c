//! User accounts: commands, field checks, integrity validation and administration

pub mod api;
pub mod commands;
pub mod fields;
pub mod photos;
pub mod service;
pub mod validator;

pub use api::{UsersApiState, public_params_router, users_api_router};
pub use commands::{PhotoUpload, RegisterUser, UpdateUserProfile};
pub use fields::ValidationIssue;
pub use service::UserService;
pub use validator::UserValidator;
