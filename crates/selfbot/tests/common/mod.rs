//! Common test utilities: in-process fakes for the lifecycle collaborators.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use selfbot::client::{
    ClientError, ClientFactory, ConnectOptions, Connection, FixedVersionSource, ProtocolVersion,
    Session, SessionEvent,
};
use selfbot::dispatcher::CommandDispatcher;
use selfbot::display::{QrCode, QrDisplay};
use selfbot::lifecycle::{LifecycleConfig, LifecycleDeps, LifecycleManager};
use selfbot::store::{CredentialState, CredentialStore, KeyUpdates, StorageError, StorageResult};

pub const OWNER_NUMBER: &str = "923000000000";
pub const OWNER_JID: &str = "923000000000@s.whatsapp.net";
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

// ============================================================================
// MockSession
// ============================================================================

pub struct MockSession {
    id: String,
    sent: Mutex<Vec<(String, String)>>,
    closed: AtomicBool,
}

impl MockSession {
    fn new(id: String) -> Self {
        Self {
            id,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_text(&self, jid: &str, text: &str) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        self.sent
            .lock()
            .unwrap()
            .push((jid.to_string(), text.to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// MockFactory
// ============================================================================

/// Test side of an opened session: the session and the sender feeding its
/// event stream.
#[derive(Clone)]
pub struct MockHandle {
    pub session: Arc<MockSession>,
    pub events: mpsc::Sender<SessionEvent>,
}

impl MockHandle {
    pub async fn emit(&self, event: SessionEvent) {
        // The pump may already be gone, which is what some tests check
        let _ = self.events.send(event).await;
    }
}

#[derive(Default)]
pub struct MockFactory {
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    connect_delay: Mutex<Option<Duration>>,
    sessions: Mutex<Vec<MockHandle>>,
    options: Mutex<Vec<ConnectOptions>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Make every connect attempt take this long.
    pub fn delay_connects(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    /// Connect attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Sessions opened so far.
    pub fn connects(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> MockHandle {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn last_session(&self) -> MockHandle {
        self.sessions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session opened yet")
    }

    /// Drop the test's sender so the session's event stream ends.
    pub fn end_stream(&self, index: usize) {
        let (dead_tx, _) = mpsc::channel(1);
        self.sessions.lock().unwrap()[index].events = dead_tx;
    }

    pub fn last_options(&self) -> ConnectOptions {
        self.options
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no connect attempt yet")
    }
}

#[async_trait]
impl ClientFactory for MockFactory {
    async fn connect(&self, options: ConnectOptions) -> Result<Connection, ClientError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.options.lock().unwrap().push(options);

        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ClientError::Timeout(Duration::from_millis(60_000)));
        }

        let (tx, rx) = mpsc::channel(16);
        let session = Arc::new(MockSession::new(format!("mock-{attempt}")));
        self.sessions.lock().unwrap().push(MockHandle {
            session: session.clone(),
            events: tx,
        });

        Ok(Connection {
            session,
            events: rx,
        })
    }
}

// ============================================================================
// MemoryCredentialStore
// ============================================================================

#[derive(Default)]
pub struct MemoryCredentialStore {
    fail_load: AtomicBool,
    creds: Mutex<Vec<serde_json::Value>>,
    keys: Mutex<Vec<KeyUpdates>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn saved_creds(&self) -> Vec<serde_json::Value> {
        self.creds.lock().unwrap().clone()
    }

    pub fn saved_keys(&self) -> Vec<KeyUpdates> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> StorageResult<CredentialState> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(StorageError::serialization("store unavailable"));
        }
        Ok(CredentialState::fresh())
    }

    async fn save_creds(&self, update: &serde_json::Value) -> StorageResult<()> {
        self.creds.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn save_keys(&self, updates: &KeyUpdates) -> StorageResult<()> {
        self.keys.lock().unwrap().push(updates.clone());
        Ok(())
    }
}

// ============================================================================
// RecordingQrDisplay
// ============================================================================

#[derive(Default)]
pub struct RecordingQrDisplay {
    shown: Mutex<Vec<QrCode>>,
}

impl RecordingQrDisplay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn shown(&self) -> Vec<QrCode> {
        self.shown.lock().unwrap().clone()
    }
}

impl QrDisplay for RecordingQrDisplay {
    fn show(&self, qr: &QrCode) {
        self.shown.lock().unwrap().push(qr.clone());
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub manager: LifecycleManager,
    pub factory: Arc<MockFactory>,
    pub qr: Arc<RecordingQrDisplay>,
}

/// A manager wired to the mock factory, the real dispatcher, and the given
/// credential store.
pub fn harness_with_store(credentials: Arc<dyn CredentialStore>) -> Harness {
    let factory = MockFactory::new();
    let qr = RecordingQrDisplay::new();
    let deps = LifecycleDeps {
        factory: factory.clone(),
        versions: Arc::new(FixedVersionSource(ProtocolVersion([2, 3000, 1]))),
        credentials,
        messages: Arc::new(CommandDispatcher::new(OWNER_JID, Some("Owner".to_string()))),
        qr: qr.clone(),
    };
    let manager = LifecycleManager::new(
        LifecycleConfig {
            reconnect_delay: RECONNECT_DELAY,
            ..Default::default()
        },
        deps,
    );
    Harness {
        manager,
        factory,
        qr,
    }
}

/// Let spawned tasks run without moving the clock.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Poll `condition` on real time until it holds or a few seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
