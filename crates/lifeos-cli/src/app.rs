//! Command handlers.
//!
//! Each subcommand restores the saved credential first, so a login from an
//! earlier run is picked up the same way a reload would pick it up.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use lifeos_core::auth::open_store;
use lifeos_core::{
    AuthSession, CaptureSessionController, CaptureSnapshot, Config, ControllerOptions, SessionPhase,
};

pub struct App {
    config: Config,
    session: AuthSession,
}

impl App {
    /// Load config (file, then environment, then `--api-url`) and restore the session.
    pub fn new(api_url: Option<String>) -> Result<Self> {
        let mut config = Config::load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        });
        config.apply_env();
        if let Some(url) = api_url {
            config.api_base_url = url;
        }

        let store = open_store(&config)?;
        let session = AuthSession::new(&config, store)?;
        session.restore();

        Ok(Self { config, session })
    }

    pub async fn login(&mut self, username: Option<String>) -> Result<()> {
        let username = match username.or_else(|| self.config.last_username.clone()) {
            Some(name) => {
                println!("Username: {}", name);
                name
            }
            None => prompt_username()?,
        };
        let password = prompt_password("Password: ")?;

        if username.is_empty() || password.is_empty() {
            bail!("Username and password required");
        }

        let user = self.session.sign_in(&username, &password).await?;
        self.remember_username(username);

        match user {
            Some(user) => println!("Logged in as {}", user.username),
            None => println!("Login successful!"),
        }
        Ok(())
    }

    pub async fn register(&mut self, username: &str) -> Result<()> {
        let password = prompt_password("Password: ")?;
        let confirm = prompt_password("Confirm password: ")?;
        if password.is_empty() {
            bail!("Password required");
        }
        if password != confirm {
            bail!("Passwords do not match");
        }

        self.session.register(username, &password).await?;
        self.remember_username(username.to_string());

        println!("Account created, logged in as {}", username);
        Ok(())
    }

    pub async fn logout(&mut self) -> Result<()> {
        if !self.session.is_authenticated() {
            println!("Not logged in");
            return Ok(());
        }
        self.session.logout().await;
        println!("Logged out");
        Ok(())
    }

    pub async fn whoami(&self) -> Result<()> {
        self.require_login()?;
        let user = self
            .session
            .client()
            .current_user()
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message()))?;
        println!("{} ({})", user.username, user.id);
        Ok(())
    }

    pub async fn status(&self, json: bool) -> Result<()> {
        let remote = self
            .session
            .client()
            .capture_status()
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message()))
            .context("Failed to fetch capture status")?;

        if json {
            println!("{}", serde_json::to_string_pretty(&remote)?);
            return Ok(());
        }

        let signed_in = if self.session.is_authenticated() {
            "logged in"
        } else {
            "logged out"
        };
        println!("Backend:  {}", self.session.client().base_url());
        println!("Session:  {}", signed_in);
        println!("Capture:  {:?}", remote.status);
        if let Some(message) = remote.message {
            println!("          {}", message);
        }
        if let Some(uptime) = remote.uptime_seconds {
            println!("Uptime:   {:.0}s", uptime);
        }
        Ok(())
    }

    /// Hold a capture session open until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        self.require_login()?;

        let controller = CaptureSessionController::new(
            Arc::new(self.session.client().clone()),
            ControllerOptions::from_config(&self.config),
        );

        let mut status = controller.subscribe();
        let printer = tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let snapshot = status.borrow_and_update().clone();
                print_snapshot(&snapshot);
            }
        });

        let handle = controller.attach(&self.session, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        });
        println!("Capture session active. Press Ctrl-C to stop.");

        handle.wait().await;
        printer.abort();

        info!(phase = %controller.phase(), "Capture host exiting");
        println!("Capture session {}", controller.phase());
        Ok(())
    }

    fn require_login(&self) -> Result<()> {
        if !self.session.is_authenticated() {
            bail!("Not logged in. Run `lifeos login` first.");
        }
        Ok(())
    }

    /// Persist the username without writing env or flag overrides back to disk.
    fn remember_username(&mut self, username: String) {
        self.config.last_username = Some(username.clone());
        let saved = Config::load().and_then(|mut on_disk| {
            on_disk.last_username = Some(username);
            on_disk.save()
        });
        if let Err(e) = saved {
            warn!(error = %e, "Failed to save config");
        }
    }
}

fn print_snapshot(snapshot: &CaptureSnapshot) {
    let at = snapshot.since.format("%H:%M:%S");
    match (&snapshot.phase, &snapshot.last_error) {
        (SessionPhase::Error, Some(reason)) => println!("[{}] {}: {}", at, snapshot.phase, reason),
        _ => println!("[{}] {}", at, snapshot.phase),
    }
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}

fn prompt_password(prompt: &str) -> Result<String> {
    let password = rpassword::prompt_password(prompt)?;
    Ok(password)
}
