//! Core domain: authentication, authorization and user accounts

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod files;
pub mod mail;
pub mod users;

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;
