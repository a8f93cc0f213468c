//! Database repositories for Gatekeep
//!
//! PostgreSQL implementations of the credential and email template stores.

pub mod credentials;
pub mod email_template;

pub use credentials::{PgCredentialStore, PgCredentialTx};
pub use email_template::EmailTemplateRepository;
