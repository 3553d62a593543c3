//! Authenticated client for the LifeOS backend REST API.
//!
//! `AuthenticatedClient` reads the bearer token from the live [`AuthState`]
//! each time a request is built, so a client constructed before login picks
//! up the credential as soon as the session has one.

use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::auth::AuthState;
use crate::config::Config;

use super::ApiError;

/// Path prefix shared by every versioned endpoint
pub const API_PREFIX: &str = "/api/v1";

const LOGIN_PATH: &str = "/auth/login";
const REGISTER_PATH: &str = "/auth/register";
const ME_PATH: &str = "/auth/me";
const SYSTEM_START_PATH: &str = "/system/start";
const SYSTEM_END_PATH: &str = "/system/end";
const SYSTEM_STATUS_PATH: &str = "/system/status";

#[derive(Serialize)]
struct CredentialsBody<'a> {
    username: &'a str,
    password: &'a str,
}

/// Successful login/registration payload.
/// Not `Debug`: it carries the raw token.
#[derive(Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(alias = "access_token")]
    pub token: String,
    #[serde(default)]
    pub user: Option<User>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
}

/// Status reported by the capture service endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    NotRunning,
    Starting,
    AlreadyRunning,
    Running,
    Stopped,
    Ended,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemResponse {
    pub status: RemoteStatus,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub uptime_seconds: Option<f64>,
}

impl SystemResponse {
    fn unknown() -> Self {
        Self {
            status: RemoteStatus::Unknown,
            message: None,
            uptime_seconds: None,
        }
    }
}

/// API client for the LifeOS backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct AuthenticatedClient {
    client: Client,
    base_url: String,
    auth: watch::Receiver<AuthState>,
}

impl AuthenticatedClient {
    /// Create a client that follows the credential published on `auth`.
    pub fn new(config: &Config, auth: watch::Receiver<AuthState>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether a credential is present right now
    pub fn is_authenticated(&self) -> bool {
        self.auth.borrow().is_authenticated()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, API_PREFIX, path)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = self.auth.borrow().token() {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidCredential)?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Start a request to `path` (relative to `/api/v1`) carrying the current credential, if any.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        Ok(self
            .client
            .request(method, self.url(path))
            .headers(self.auth_headers()?))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send a body-less request and check its status.
    pub async fn send(&self, method: Method, path: &str) -> Result<Response, ApiError> {
        let response = self.request(method, path)?.send().await?;
        Self::check_response(response).await
    }

    async fn json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", path, e)))
    }

    async fn post_credentials(
        &self,
        path: &str,
        username: &str,
        password: &str,
    ) -> Result<AuthResponse, ApiError> {
        let response = self
            .request(Method::POST, path)?
            .json(&CredentialsBody { username, password })
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::json(response, path).await
    }

    /// Exchange username/password for a token. Does not touch the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, ApiError> {
        self.post_credentials(LOGIN_PATH, username, password).await
    }

    /// Create an account and receive its first token. Does not touch the session.
    pub async fn register(&self, username: &str, password: &str) -> Result<AuthResponse, ApiError> {
        self.post_credentials(REGISTER_PATH, username, password).await
    }

    /// Profile of the bearer
    pub async fn current_user(&self) -> Result<User, ApiError> {
        let response = self.send(Method::GET, ME_PATH).await?;
        Self::json(response, ME_PATH).await
    }

    /// Ask the backend to start the capture pipeline for this user.
    pub async fn start_capture(&self) -> Result<SystemResponse, ApiError> {
        let response = self.send(Method::POST, SYSTEM_START_PATH).await?;
        Ok(Self::lenient_system_response(response).await)
    }

    /// Ask the backend to end the capture pipeline. Ending a stopped pipeline succeeds.
    pub async fn end_capture(&self) -> Result<SystemResponse, ApiError> {
        let response = self.send(Method::POST, SYSTEM_END_PATH).await?;
        Ok(Self::lenient_system_response(response).await)
    }

    pub async fn capture_status(&self) -> Result<SystemResponse, ApiError> {
        let response = self.send(Method::GET, SYSTEM_STATUS_PATH).await?;
        Self::json(response, SYSTEM_STATUS_PATH).await
    }

    /// Start/end only promise a 2xx; the body is informational.
    async fn lenient_system_response(response: Response) -> SystemResponse {
        let text = response.text().await.unwrap_or_default();
        serde_json::from_str(&text).unwrap_or_else(|e| {
            debug!(error = %e, "Unrecognized system response body");
            SystemResponse::unknown()
        })
    }
}
