//! Capture session controller.
//!
//! Keeps exactly one remote capture session per authenticated period. Every
//! auth state notification goes through [`CaptureSessionController::reconcile`],
//! which decides under a single lock whether a start is owed. Start calls are
//! tagged with an attempt generation; once a stop, logout or new period bumps
//! the generation, a late response for the old attempt is dropped.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthSession, AuthState};
use crate::config::Config;

use super::{CaptureService, SessionPhase};

/// Default bound on the end call during process teardown
const DEFAULT_UNLOAD_TIMEOUT_MS: u64 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Force `Error` when a start call hangs this long. `None` waits forever.
    pub start_timeout: Option<Duration>,
    /// How long [`CaptureSessionController::shutdown`] waits for the end call
    pub unload_timeout: Duration,
}

impl ControllerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            start_timeout: config.start_timeout(),
            unload_timeout: config.unload_timeout(),
        }
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            start_timeout: None,
            unload_timeout: Duration::from_millis(DEFAULT_UNLOAD_TIMEOUT_MS),
        }
    }
}

/// Passive status for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureSnapshot {
    pub phase: SessionPhase,
    pub since: DateTime<Utc>,
    /// Why the last start failed, while in `Error`
    pub last_error: Option<String>,
}

impl CaptureSnapshot {
    fn new(phase: SessionPhase, last_error: Option<String>) -> Self {
        Self {
            phase,
            since: Utc::now(),
            last_error,
        }
    }
}

struct GuardState {
    phase: SessionPhase,
    /// Authenticated period currently observed, `None` while signed out
    period: Option<u64>,
    /// Period whose start has already been dispatched
    dispatched: Option<u64>,
    /// Bumped whenever an in-flight start stops being wanted
    generation: u64,
}

struct Inner {
    service: Arc<dyn CaptureService>,
    options: ControllerOptions,
    guard: Mutex<GuardState>,
    status: watch::Sender<CaptureSnapshot>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, guard: &mut GuardState, next: SessionPhase, last_error: Option<String>) {
        if !guard.phase.can_transition_to(next) {
            warn!(from = %guard.phase, to = %next, "Ignoring illegal capture phase transition");
            return;
        }
        info!(from = %guard.phase, to = %next, "Capture session phase changed");
        guard.phase = next;
        self.status.send_replace(CaptureSnapshot::new(next, last_error));
    }

    fn complete_start(&self, generation: u64, result: Result<()>) {
        let mut guard = self.lock();
        if guard.generation != generation || guard.phase != SessionPhase::Starting {
            debug!(
                generation,
                current = guard.generation,
                ok = result.is_ok(),
                "Discarding stale capture start response"
            );
            return;
        }

        match result {
            Ok(()) => self.transition(&mut guard, SessionPhase::Running, None),
            Err(e) => {
                error!(error = %e, "Failed to start capture session");
                self.transition(&mut guard, SessionPhase::Error, Some(format!("{:#}", e)));
            }
        }
    }

    /// Move to `Stopped`. Returns whether a remote end call is owed.
    fn begin_stop(&self) -> bool {
        let mut guard = self.lock();
        if guard.phase == SessionPhase::Stopped {
            return false;
        }
        // A failed start leaves nothing to end
        let owes_end = guard.phase.is_live();
        if owes_end {
            guard.generation += 1;
        }
        self.transition(&mut guard, SessionPhase::Stopped, None);
        owes_end
    }

    async fn end_remote(&self) {
        match self.service.end().await {
            Ok(()) => info!("Capture session ended"),
            Err(e) => warn!(error = %e, "Failed to end capture session"),
        }
    }
}

/// Drives start/end of the remote capture session from auth state changes.
/// Clone is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct CaptureSessionController {
    inner: Arc<Inner>,
}

impl CaptureSessionController {
    pub fn new(service: Arc<dyn CaptureService>, options: ControllerOptions) -> Self {
        let (status, _) = watch::channel(CaptureSnapshot::new(SessionPhase::Stopped, None));
        Self {
            inner: Arc::new(Inner {
                service,
                options,
                guard: Mutex::new(GuardState {
                    phase: SessionPhase::Stopped,
                    period: None,
                    dispatched: None,
                    generation: 0,
                }),
                status,
            }),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.status.borrow().phase
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        self.inner.status.borrow().clone()
    }

    /// Receiver notified on every phase change
    pub fn subscribe(&self) -> watch::Receiver<CaptureSnapshot> {
        self.inner.status.subscribe()
    }

    /// Re-evaluate whether a start is owed for `auth`.
    ///
    /// Safe to call from any number of observers for the same change: a start
    /// fires only from `Stopped`, and only once per authenticated period.
    pub fn reconcile(&self, auth: &AuthState) {
        if auth.loading {
            debug!("Auth state still loading");
            return;
        }

        let mut guard = self.inner.lock();

        if !auth.is_authenticated() {
            // Logout already sent the end call while the credential was valid
            if guard.period.take().is_some() {
                guard.generation += 1;
                if guard.phase != SessionPhase::Stopped {
                    self.inner.transition(&mut guard, SessionPhase::Stopped, None);
                }
            }
            return;
        }

        if guard.period != Some(auth.period) {
            // Logout or re-login already ended the previous period remotely
            if guard.phase != SessionPhase::Stopped {
                guard.generation += 1;
                self.inner.transition(&mut guard, SessionPhase::Stopped, None);
            }
            guard.period = Some(auth.period);
        }

        if guard.phase != SessionPhase::Stopped || guard.dispatched == Some(auth.period) {
            debug!(phase = %guard.phase, period = auth.period, "No capture start owed");
            return;
        }

        guard.dispatched = Some(auth.period);
        guard.generation += 1;
        let generation = guard.generation;
        self.inner.transition(&mut guard, SessionPhase::Starting, None);
        drop(guard);

        self.dispatch_start(generation);
    }

    fn dispatch_start(&self, generation: u64) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = match inner.options.start_timeout {
                Some(limit) => match tokio::time::timeout(limit, inner.service.start()).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("start timed out after {:?}", limit)),
                },
                None => inner.service.start().await,
            };
            inner.complete_start(generation, result);
        });
    }

    /// In-app teardown: stop now and send the end call in the background.
    ///
    /// Returns the end call's task when one was issued. The session is not
    /// started again until a new authenticated period begins.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        if !self.inner.begin_stop() {
            return None;
        }
        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move { inner.end_remote().await }))
    }

    /// Process teardown: stop and wait for the end call, bounded by the unload timeout.
    pub async fn shutdown(&self) {
        if !self.inner.begin_stop() {
            return;
        }
        let limit = self.inner.options.unload_timeout;
        if tokio::time::timeout(limit, self.inner.end_remote()).await.is_err() {
            warn!(
                timeout_ms = limit.as_millis() as u64,
                "Capture end call did not finish before teardown"
            );
        }
    }

    /// Subscribe to `session` and to `teardown`.
    ///
    /// Auth changes are reconciled until `teardown` resolves (the end call is
    /// then awaited via [`shutdown`](Self::shutdown)) or the returned handle is
    /// disposed or dropped (an in-app [`stop`](Self::stop)).
    pub fn attach<F>(&self, session: &AuthSession, teardown: F) -> ControllerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut auth = session.subscribe();
        let (dispose_tx, mut dispose_rx) = oneshot::channel::<()>();
        let controller = self.clone();

        let task = tokio::spawn(async move {
            tokio::pin!(teardown);

            let current = auth.borrow_and_update().clone();
            controller.reconcile(&current);

            loop {
                tokio::select! {
                    changed = auth.changed() => {
                        if changed.is_err() {
                            debug!("Auth session dropped");
                            controller.stop();
                            break;
                        }
                        let current = auth.borrow_and_update().clone();
                        controller.reconcile(&current);
                    }
                    _ = &mut teardown => {
                        debug!("Process teardown");
                        controller.shutdown().await;
                        break;
                    }
                    _ = &mut dispose_rx => {
                        debug!("Capture controller disposed");
                        controller.stop();
                        break;
                    }
                }
            }
        });

        ControllerHandle {
            task: Some(task),
            dispose: Some(dispose_tx),
        }
    }
}

/// Subscription created by [`CaptureSessionController::attach`].
/// Dropping it unsubscribes and stops the session.
pub struct ControllerHandle {
    task: Option<JoinHandle<()>>,
    dispose: Option<oneshot::Sender<()>>,
}

impl ControllerHandle {
    /// Unsubscribe, stop the session, and wait for the observer to exit.
    pub async fn dispose(mut self) {
        if let Some(tx) = self.dispose.take() {
            let _ = tx.send(());
        }
        self.join().await;
    }

    /// Wait for the observer to exit on its own (teardown or session dropped).
    pub async fn wait(mut self) {
        self.join().await;
    }

    async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Capture observer task failed");
            }
        }
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.dispose.take() {
            let _ = tx.send(());
        }
    }
}
