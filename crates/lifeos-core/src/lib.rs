//! Client-side session and authentication lifecycle for LifeOS.
//!
//! Data flows from the [`auth::CredentialStore`] into the [`auth::AuthSession`]
//! at startup, from there to the [`api::AuthenticatedClient`] on every request,
//! and into the [`capture::CaptureSessionController`], which starts and stops
//! the remote capture pipeline as authentication comes and goes.

pub mod api;
pub mod auth;
pub mod capture;
pub mod config;

pub use api::{ApiError, AuthenticatedClient};
pub use auth::{AuthError, AuthSession, AuthState, CredentialStore};
pub use capture::{
    CaptureSessionController, CaptureSnapshot, ControllerHandle, ControllerOptions, SessionPhase,
};
pub use config::Config;
