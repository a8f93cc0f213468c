//! Transactional email: template rendering and delivery

pub mod sender;
pub mod template;

pub use sender::{EmailError, EmailSender, HttpEmailSender, LogEmailSender, OutgoingEmail};
pub use template::{
    ACCOUNT_CONFIRMATION, PASSWORD_RESET, RenderedEmail, TemplateError, render,
};
