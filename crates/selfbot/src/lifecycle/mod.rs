//! Connection lifecycle.
//!
//! [`LifecycleManager`] owns the single live session. It loads credentials,
//! opens the connection, persists credential updates, hands inbound messages to
//! a [`MessageHandler`], and reacts to closes:
//!
//! - logout: stop for good, the stored credentials are invalid
//! - anything else: drop the session and start over after a fixed delay
//!
//! At most one restart is pending at any time. The guard is set when a
//! restart is scheduled and cleared when a start attempt begins or the
//! connection opens, so a burst of close events yields a single reconnect.
//!
//! Each session gets a generation number. Events from a session that is no
//! longer current are dropped, which keeps a slow old session from tearing
//! down its replacement.

mod state;

pub use state::{LifecycleError, LifecycleState, StopReason};

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{
    ClientFactory, ConnectOptions, Connection, ConnectionPhase, ConnectionTimeouts,
    ConnectionUpdate, MessageBatch, Session, SessionEvent, VersionSource,
};
use crate::display::{QrCode, QrDisplay};
use crate::store::CredentialStore;

/// Default delay between a recoverable close and the next start.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

// ============================================================================
// Collaborators
// ============================================================================

/// Receives inbound message batches from the live session.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one batch. Failures are the handler's business and never reach
    /// the lifecycle.
    async fn handle_batch(&self, session: &Arc<dyn Session>, batch: MessageBatch);
}

/// Tunables of the lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    pub reconnect_delay: Duration,
    pub timeouts: ConnectionTimeouts,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            timeouts: ConnectionTimeouts::default(),
        }
    }
}

/// Everything the lifecycle talks to.
pub struct LifecycleDeps {
    pub factory: Arc<dyn ClientFactory>,
    pub versions: Arc<dyn VersionSource>,
    pub credentials: Arc<dyn CredentialStore>,
    pub messages: Arc<dyn MessageHandler>,
    pub qr: Arc<dyn QrDisplay>,
}

// ============================================================================
// LifecycleManager
// ============================================================================

/// Supervisor of the live WhatsApp session. Cheap to clone.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: LifecycleConfig,
    deps: LifecycleDeps,
    state: watch::Sender<LifecycleState>,
    // std::sync::Mutex is fine here: the lock is never held across .await points.
    active: Mutex<Option<ActiveSession>>,
    /// Set while a restart is scheduled.
    reconnect_pending: AtomicBool,
    /// Set while a start attempt is loading credentials or connecting.
    starting: AtomicBool,
    generation: AtomicU64,
    shutdown: CancellationToken,
}

struct ActiveSession {
    generation: u64,
    session: Arc<dyn Session>,
    pump: JoinHandle<()>,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig, deps: LifecycleDeps) -> Self {
        let (state, _) = watch::channel(LifecycleState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                deps,
                state,
                active: Mutex::new(None),
                reconnect_pending: AtomicBool::new(false),
                starting: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    /// Whether a restart is scheduled and has not begun yet.
    pub fn reconnect_pending(&self) -> bool {
        self.inner.reconnect_pending.load(Ordering::SeqCst)
    }

    /// Number of sessions opened so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Wait until the lifecycle reaches a terminal state.
    pub async fn stopped(&self) -> StopReason {
        let mut rx = self.subscribe();
        match rx.wait_for(|state| state.is_stopped()).await {
            Ok(state) => match *state {
                LifecycleState::Stopped(reason) => reason,
                _ => StopReason::Shutdown,
            },
            // The sender lives in `inner`, which we hold
            Err(_) => StopReason::Shutdown,
        }
    }

    // ------------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------------

    /// Run one start attempt.
    ///
    /// Never returns an error: a failed attempt is logged and a restart is
    /// scheduled. A call while another attempt is still connecting is ignored.
    pub async fn start(&self) {
        if self.inner.shutdown.is_cancelled() || self.state().is_stopped() {
            debug!("Lifecycle stopped, not starting");
            return;
        }
        if self.inner.starting.swap(true, Ordering::SeqCst) {
            warn!("Start already in progress, ignoring");
            return;
        }

        self.inner.reconnect_pending.store(false, Ordering::SeqCst);
        self.set_state(LifecycleState::Connecting);

        let result = self.try_start().await;
        self.inner.starting.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            error!(error = %e, "Failed to start connection");
            self.set_state(LifecycleState::Disconnected);
            self.schedule_restart();
        }
    }

    async fn try_start(&self) -> Result<(), LifecycleError> {
        let credentials = self.inner.deps.credentials.load().await?;
        if credentials.fresh {
            info!("No stored credentials, pairing with a QR code");
        }

        let version = self.inner.deps.versions.latest_version().await;
        match &version.error {
            Some(err) => warn!(
                version = %version.version,
                error = %err,
                "Version discovery failed, using bundled version"
            ),
            None => info!(
                version = %version.version,
                is_latest = version.is_latest,
                "Using WhatsApp Web version"
            ),
        }

        let Connection { session, events } = self
            .inner
            .deps
            .factory
            .connect(ConnectOptions {
                version: version.version,
                credentials,
                timeouts: self.inner.config.timeouts,
            })
            .await?;

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(session = %session.id(), generation, "Session created, waiting for handshake");

        match self.install(generation, session, events) {
            Ok(Some(previous)) => {
                debug!(generation = previous.generation, "Replacing previous session");
                previous.pump.abort();
                close_session(previous.session).await;
            }
            Ok(None) => {}
            Err(orphan) => {
                debug!(generation, "Shutdown raced the connect, closing new session");
                close_session(orphan).await;
            }
        }

        Ok(())
    }

    /// Make the session current and start pumping its events. Returns the
    /// session it replaced, or the new session back if shutdown already began.
    fn install(
        &self,
        generation: u64,
        session: Arc<dyn Session>,
        events: mpsc::Receiver<SessionEvent>,
    ) -> Result<Option<ActiveSession>, Arc<dyn Session>> {
        let mut active = self.active();
        if self.inner.shutdown.is_cancelled() {
            return Err(session);
        }
        let pump = tokio::spawn(self.clone().pump(generation, session.clone(), events));
        Ok(active.replace(ActiveSession {
            generation,
            session,
            pump,
        }))
    }

    // ------------------------------------------------------------------------
    // Restart
    // ------------------------------------------------------------------------

    /// Schedule a start after the reconnect delay, unless one is already
    /// pending.
    pub fn schedule_restart(&self) {
        if self.inner.shutdown.is_cancelled() || self.state().is_stopped() {
            return;
        }
        if self
            .inner
            .reconnect_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Reconnect already scheduled, ignoring");
            return;
        }

        let delay = self.inner.config.reconnect_delay;
        info!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");

        let cancelled = self.inner.shutdown.child_token();
        let restart = self.restart_after(delay, cancelled);
        tokio::spawn(restart);
    }

    fn restart_after(
        &self,
        delay: Duration,
        cancelled: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let manager = self.clone();
        Box::pin(async move {
            tokio::select! {
                _ = cancelled.cancelled() => debug!("Scheduled reconnect cancelled"),
                _ = tokio::time::sleep(delay) => manager.start().await,
            }
        })
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stop for good: cancel any pending restart and close the live session.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.inner.shutdown.cancel();

        let active = self.active().take();
        if let Some(active) = active {
            active.pump.abort();
            close_session(active.session).await;
        }

        self.set_state(LifecycleState::Stopped(StopReason::Shutdown));
    }

    // ------------------------------------------------------------------------
    // Event pump
    // ------------------------------------------------------------------------

    async fn pump(
        self,
        generation: u64,
        session: Arc<dyn Session>,
        mut events: mpsc::Receiver<SessionEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if !self.is_current(generation) {
                debug!(generation, "Dropping event from stale session");
                return;
            }

            match event {
                SessionEvent::CredsUpdate(update) => {
                    if let Err(e) = self.inner.deps.credentials.save_creds(&update).await {
                        error!(error = %e, "Failed to persist credentials");
                    }
                }
                SessionEvent::KeysUpdate(updates) => {
                    if let Err(e) = self.inner.deps.credentials.save_keys(&updates).await {
                        error!(error = %e, count = updates.len(), "Failed to persist signal keys");
                    }
                }
                SessionEvent::Connection(update) => {
                    self.handle_connection_update(generation, update);
                    if !self.is_current(generation) {
                        return;
                    }
                }
                SessionEvent::Messages(batch) => {
                    self.inner.deps.messages.handle_batch(&session, batch).await;
                }
            }
        }

        if self.is_current(generation) {
            warn!(generation, "Session event stream ended without a close");
            self.handle_connection_update(
                generation,
                ConnectionUpdate::closed(None, "event stream ended"),
            );
        }
    }

    fn handle_connection_update(&self, generation: u64, update: ConnectionUpdate) {
        if let Some(payload) = &update.qr {
            self.inner.deps.qr.show(&QrCode {
                payload: payload.clone(),
                rendered: update.qr_ascii.clone(),
            });
        }

        match update.connection {
            Some(ConnectionPhase::Open) => {
                self.inner.reconnect_pending.store(false, Ordering::SeqCst);
                self.set_state(LifecycleState::Connected);
                info!(generation, "Connected, listening for commands in self-chat");
            }
            Some(ConnectionPhase::Close) => self.handle_close(generation, &update),
            Some(ConnectionPhase::Connecting) => debug!(generation, "Handshake in progress"),
            None => {}
        }
    }

    fn handle_close(&self, generation: u64, update: &ConnectionUpdate) {
        let Some(closed) = self.take_active(generation) else {
            debug!(generation, "Close from a session that is no longer current");
            return;
        };

        let reason = update.disconnect_reason();
        let message = update
            .last_disconnect
            .as_ref()
            .map(|d| d.message.as_str())
            .unwrap_or_default();

        if reason.is_recoverable() {
            warn!(generation, reason = %reason, detail = message, "Connection closed");
            self.set_state(LifecycleState::Disconnected);
            self.schedule_restart();
        } else {
            error!(
                generation,
                reason = %reason,
                detail = message,
                "Logged out. Delete the auth directory and start again to pair a new device"
            );
            self.set_state(LifecycleState::Stopped(StopReason::LoggedOut));
        }

        // The pump is the caller; let it finish on its own.
        drop(closed.pump);
        tokio::spawn(close_session(closed.session));
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.inner.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active()
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    fn take_active(&self, generation: u64) -> Option<ActiveSession> {
        let mut active = self.active();
        if active.as_ref().is_some_and(|a| a.generation == generation) {
            active.take()
        } else {
            None
        }
    }

    /// Move to `next` unless already stopped. Stopped is terminal.
    fn set_state(&self, next: LifecycleState) {
        self.inner.state.send_if_modified(|state| {
            if state.is_stopped() || *state == next {
                return false;
            }
            debug!(from = %state, to = %next, "Lifecycle state change");
            *state = next;
            true
        });
    }
}

async fn close_session(session: Arc<dyn Session>) {
    if let Err(e) = session.close().await {
        warn!(session = %session.id(), error = %e, "Failed to close session");
    }
}
