//! Authentication module for managing the user's credential.
//!
//! This module provides:
//! - `AuthSession`: Sole owner of the bearer token; login, logout and startup restore
//! - `CredentialStore`: Durable slot for the token (OS keychain or JSON file)
//!
//! The token survives restarts and is attached to outbound requests by
//! [`crate::api::AuthenticatedClient`].

pub mod credentials;
pub mod session;

pub use credentials::{open_store, CredentialStore, FileStore, KeyringStore, TOKEN_SLOT};
pub use session::{AuthError, AuthSession, AuthState};
