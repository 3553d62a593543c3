use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::{AuthResponse, AuthenticatedClient, User};
use crate::config::Config;

use super::CredentialStore;

/// Snapshot of the authentication state published to observers.
///
/// `is_authenticated()` is derived from the credential, so the two can never
/// disagree. `period` increases every time an authenticated period begins.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    credential: Option<String>,
    pub loading: bool,
    pub period: u64,
}

impl AuthState {
    pub fn authenticated(credential: impl Into<String>, period: u64) -> Self {
        Self {
            credential: Some(credential.into()),
            loading: false,
            period,
        }
    }

    pub fn unauthenticated(period: u64) -> Self {
        Self {
            credential: None,
            loading: false,
            period,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    /// The bearer token, if any
    pub fn token(&self) -> Option<&str> {
        self.credential.as_deref()
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("loading", &self.loading)
            .field("period", &self.period)
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    /// Message is taken from the server's error payload when it has one.
    #[error("{0}")]
    LoginFailed(String),
}

/// Owner of the credential and the only writer of [`AuthState`].
pub struct AuthSession {
    store: Arc<dyn CredentialStore>,
    state: watch::Sender<AuthState>,
    client: AuthenticatedClient,
    restored: AtomicBool,
}

impl AuthSession {
    /// Build a session in the `loading` state. Call [`restore`](Self::restore) once at startup.
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let (state, rx) = watch::channel(AuthState {
            credential: None,
            loading: true,
            period: 0,
        });
        let client = AuthenticatedClient::new(config, rx)?;

        Ok(Self {
            store,
            state,
            client,
            restored: AtomicBool::new(false),
        })
    }

    /// Client that attaches this session's current credential to every request
    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// Receiver notified on every auth state change
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Hydrate from the credential store. Only the first call has any effect.
    ///
    /// A missing credential is the normal signed-out outcome; an unreadable
    /// store is logged and treated the same way.
    pub fn restore(&self) {
        if self.restored.swap(true, Ordering::SeqCst) {
            debug!("Session already restored");
            return;
        }

        self.state.send_if_modified(|s| {
            let changed = !s.loading;
            s.loading = true;
            changed
        });

        let saved = match self.store.get() {
            Ok(saved) => saved,
            Err(e) => {
                warn!(error = %e, "Failed to read saved credential");
                None
            }
        };

        self.state.send_modify(|s| {
            // A login that raced ahead of restore wins
            if s.credential.is_none() {
                if let Some(token) = saved {
                    s.credential = Some(token);
                    s.period += 1;
                }
            }
            s.loading = false;
        });

        let state = self.state.borrow();
        info!(
            authenticated = state.is_authenticated(),
            period = state.period,
            "Session restored"
        );
    }

    /// Adopt a credential the backend already issued and persist it.
    ///
    /// Replacing a credential closes the current authenticated period first:
    /// its capture session is ended with the old bearer before the swap.
    pub async fn login(&self, credential: impl Into<String>) {
        let credential = credential.into();
        if self.is_authenticated() {
            self.end_capture("re-login").await;
        }

        if let Err(e) = self.store.set(&credential) {
            warn!(error = %e, "Failed to persist credential");
        }

        self.state.send_modify(|s| {
            s.credential = Some(credential);
            s.loading = false;
            s.period += 1;
        });
        info!(period = self.state.borrow().period, "Authenticated");
    }

    /// Validate username/password with the backend, then [`login`](Self::login).
    ///
    /// On failure the auth state is left untouched.
    pub async fn sign_in(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, AuthError> {
        let response = self.client.login(username, password).await;
        self.adopt(username, response, "Login").await
    }

    /// Create an account, then [`login`](Self::login) with the issued token.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, AuthError> {
        let response = self.client.register(username, password).await;
        self.adopt(username, response, "Registration").await
    }

    async fn adopt(
        &self,
        username: &str,
        response: Result<AuthResponse, crate::api::ApiError>,
        action: &str,
    ) -> Result<Option<User>, AuthError> {
        match response {
            Ok(auth) => {
                self.login(auth.token).await;
                info!(username, "{} successful", action);
                Ok(auth.user)
            }
            Err(e) => {
                error!(username, error = %e, "{} failed", action);
                Err(AuthError::LoginFailed(e.user_message()))
            }
        }
    }

    /// End the remote capture session (best effort), then drop the credential.
    ///
    /// Local logout always completes; a failed end call is only logged.
    pub async fn logout(&self) {
        if self.is_authenticated() {
            self.end_capture("logout").await;
        }

        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear saved credential");
        }

        self.state.send_modify(|s| {
            s.credential = None;
            s.loading = false;
        });
        info!("Logged out");
    }

    /// Best-effort end call while the current credential is still attached.
    async fn end_capture(&self, reason: &str) {
        match self.client.end_capture().await {
            Ok(response) => debug!(status = ?response.status, reason, "Capture session ended"),
            Err(e) => warn!(error = %e, reason, "Failed to end capture session"),
        }
    }
}
