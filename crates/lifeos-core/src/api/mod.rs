//! REST API client module for the LifeOS backend.
//!
//! This module provides the `AuthenticatedClient` used for login and
//! registration and for starting, ending and querying the remote capture
//! pipeline.
//!
//! Authenticated endpoints take a JWT bearer token obtained from
//! `/api/v1/auth/login` or `/api/v1/auth/register`.

pub mod client;
pub mod error;

pub use client::{
    AuthResponse, AuthenticatedClient, RemoteStatus, SystemResponse, User, API_PREFIX,
};
pub use error::ApiError;
