//! # warden_core
//!
//! Credential and session authentication: password policy, credential
//! hashing, token issuance and verification, and request authorization.

pub mod auth;
pub mod clock;
pub mod config;
pub mod directory;
pub mod migrate;
pub mod models;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
