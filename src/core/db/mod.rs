//! Database module for Gatekeep
//!
//! Connectivity, models, the credential store traits and their PostgreSQL and
//! in-memory implementations.

pub mod memory;
pub mod models;
pub mod pool;
pub mod repositories;
pub mod store;

// Re-export commonly used items
pub use memory::MemoryStore;
pub use models::*;
pub use pool::{DbConfig, DbError, create_pool, create_pool_with_migrations, health_check};
pub use repositories::{EmailTemplateRepository, PgCredentialStore};
pub use store::{CredentialStore, CredentialTx, EmailTemplateStore, StoreError};

pub use sqlx::PgPool;
