//! Protocol client backed by a bridge subprocess.
//!
//! Each connection spawns the configured bridge command and talks to it with
//! JSON Lines over stdio: commands go to its stdin, events come from its
//! stdout, and its stderr is inherited so the library's own logs stay visible.
//!
//! The bridge process lives exactly as long as the session. If it exits or
//! closes stdout without reporting a close, the session reports a recoverable
//! close on its behalf so the lifecycle manager reconnects.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use selfbot_bridge_protocol::{
    BridgeCommand, BridgeEvent, ConnectionPhase, ConnectionUpdate, error_codes,
};

use super::{
    ClientError, ClientFactory, ConnectOptions, Connection, MessageBatch, Session, SessionEvent,
};
use crate::config::BridgeConfig;

/// How long the bridge gets to exit after `close` before it is killed.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

const EVENT_BUFFER: usize = 100;
const COMMAND_BUFFER: usize = 32;

type PendingRequests = Arc<DashMap<String, oneshot::Sender<Result<(), ClientError>>>>;

// ============================================================================
// Factory
// ============================================================================

/// Opens sessions by spawning the bridge command.
pub struct BridgeClientFactory {
    config: BridgeConfig,
}

impl BridgeClientFactory {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Spawn the child process with piped stdio.
    fn spawn_child(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // On Linux, make sure the bridge dies with us
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn()
    }
}

#[async_trait]
impl ClientFactory for BridgeClientFactory {
    async fn connect(&self, options: ConnectOptions) -> Result<Connection, ClientError> {
        let mut child = self.spawn_child().map_err(|source| ClientError::Spawn {
            command: self.config.command.clone(),
            source,
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill().await;
            return Err(ClientError::Closed);
        };

        let session_id = ulid::Ulid::new().to_string();
        info!(
            session = %session_id,
            command = %self.config.command,
            version = %options.version,
            fresh_credentials = options.credentials.fresh,
            "Spawned bridge process"
        );

        let (evt_tx, evt_rx) = mpsc::channel(EVENT_BUFFER);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let pending: PendingRequests = Arc::new(DashMap::new());

        let connect = BridgeCommand::Connect {
            version: options.version,
            creds: options.credentials.creds,
            keys: options.credentials.keys,
            timeouts: options.timeouts,
        };
        cmd_tx.send(connect).await.map_err(|_| ClientError::Closed)?;

        let io = BridgeIo {
            session_id: session_id.clone(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            evt_tx,
            pending: pending.clone(),
        };
        let io_task = tokio::spawn(io.run(cmd_rx));

        let session = BridgeSession {
            id: session_id,
            cmd_tx,
            pending,
            query_timeout: Duration::from_millis(options.timeouts.default_query_timeout_ms),
            io_task: Mutex::new(Some(io_task)),
        };

        Ok(Connection {
            session: Arc::new(session),
            events: evt_rx,
        })
    }
}

// ============================================================================
// Session
// ============================================================================

/// Session handle for one bridge process.
pub struct BridgeSession {
    id: String,
    cmd_tx: mpsc::Sender<BridgeCommand>,
    pending: PendingRequests,
    query_timeout: Duration,
    io_task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Session for BridgeSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_text(&self, jid: &str, text: &str) -> Result<(), ClientError> {
        let request_id = ulid::Ulid::new().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let command = BridgeCommand::SendText {
            request_id: request_id.clone(),
            jid: jid.to_string(),
            text: text.to_string(),
        };
        if self.cmd_tx.send(command).await.is_err() {
            self.pending.remove(&request_id);
            return Err(ClientError::Closed);
        }

        match tokio::time::timeout(self.query_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_elapsed) => {
                self.pending.remove(&request_id);
                Err(ClientError::Timeout(self.query_timeout))
            }
        }
    }

    async fn close(&self) -> Result<(), ClientError> {
        let _ = self.cmd_tx.send(BridgeCommand::Close).await;

        let handle = self.io_task.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(session = %self.id, error = %e, "Bridge I/O task failed");
        }
        Ok(())
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.io_task.lock()
            && let Some(handle) = guard.take()
        {
            handle.abort();
        }
    }
}

// ============================================================================
// I/O loop
// ============================================================================

/// Why the I/O loop stopped.
enum Exit {
    /// The agent asked the bridge to close.
    Closed,
    /// Nobody listens to the events anymore.
    Abandoned,
    /// The bridge went away on its own.
    Lost(String),
}

struct BridgeIo {
    session_id: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<tokio::process::ChildStdout>,
    evt_tx: mpsc::Sender<SessionEvent>,
    pending: PendingRequests,
}

impl BridgeIo {
    async fn run(self, mut cmd_rx: mpsc::Receiver<BridgeCommand>) {
        let BridgeIo {
            session_id,
            mut child,
            mut stdin,
            stdout,
            evt_tx,
            pending,
        } = self;
        let mut lines = stdout.lines();
        let mut saw_close = false;
        // Events read but not yet taken by the receiver. Stdout keeps being
        // read while this is non-empty so acknowledgements are never stuck
        // behind a full event channel.
        let mut backlog: VecDeque<SessionEvent> = VecDeque::new();

        let exit = loop {
            tokio::select! {
                // Events from the bridge
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break Exit::Lost("bridge closed its stdout".to_string()),
                        Err(e) => break Exit::Lost(format!("failed to read from bridge: {e}")),
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    let event = match serde_json::from_str::<BridgeEvent>(&line) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(
                                session = %session_id,
                                line = %line,
                                error = %e,
                                "Failed to parse bridge event"
                            );
                            continue;
                        }
                    };

                    let forward = match event {
                        BridgeEvent::Ready { bridge, version } => {
                            debug!(
                                session = %session_id,
                                bridge = %bridge,
                                version = %version,
                                "Bridge ready"
                            );
                            None
                        }
                        BridgeEvent::CommandOk { request_id, .. } => {
                            if let Some((_, tx)) = pending.remove(&request_id) {
                                let _ = tx.send(Ok(()));
                            }
                            None
                        }
                        BridgeEvent::CommandError { request_id, code, message } => {
                            if code == error_codes::NOT_CONNECTED {
                                debug!(
                                    session = %session_id,
                                    request_id = %request_id,
                                    "Bridge not connected, command rejected"
                                );
                            } else {
                                warn!(
                                    session = %session_id,
                                    request_id = %request_id,
                                    code = %code,
                                    detail = %message,
                                    "Bridge rejected command"
                                );
                            }
                            if let Some((_, tx)) = pending.remove(&request_id) {
                                let _ = tx.send(Err(ClientError::Rejected { code, message }));
                            }
                            None
                        }
                        BridgeEvent::Error { code, message, fatal } => {
                            if fatal {
                                error!(
                                    session = %session_id,
                                    code = %code,
                                    detail = %message,
                                    "Fatal bridge error"
                                );
                                break Exit::Lost(format!("fatal bridge error ({code}): {message}"));
                            }
                            if code == error_codes::INVALID_REQUEST {
                                error!(
                                    session = %session_id,
                                    detail = %message,
                                    "Bridge could not parse a command"
                                );
                            } else {
                                warn!(
                                    session = %session_id,
                                    code = %code,
                                    detail = %message,
                                    "Bridge error"
                                );
                            }
                            None
                        }
                        BridgeEvent::CredsUpdate { creds } => {
                            Some(SessionEvent::CredsUpdate(creds))
                        }
                        BridgeEvent::KeysUpdate { keys } => Some(SessionEvent::KeysUpdate(keys)),
                        BridgeEvent::ConnectionUpdate(update) => {
                            if update.connection == Some(ConnectionPhase::Close) {
                                saw_close = true;
                            }
                            Some(SessionEvent::Connection(update))
                        }
                        BridgeEvent::MessagesUpsert { kind, messages } => {
                            Some(SessionEvent::Messages(MessageBatch { kind, messages }))
                        }
                    };

                    if let Some(event) = forward {
                        backlog.push_back(event);
                    }
                }

                // Hand buffered events to the receiver as it makes room
                permit = evt_tx.reserve(), if !backlog.is_empty() => {
                    let Ok(permit) = permit else {
                        debug!(session = %session_id, "Event receiver dropped");
                        break Exit::Abandoned;
                    };
                    if let Some(event) = backlog.pop_front() {
                        permit.send(event);
                    }
                }

                // Commands to the bridge
                cmd = cmd_rx.recv() => {
                    let Some(command) = cmd else {
                        break Exit::Abandoned;
                    };
                    let is_close = matches!(command, BridgeCommand::Close);
                    if let Err(e) = write_command(&mut stdin, &command).await {
                        break Exit::Lost(format!("failed to write to bridge: {e}"));
                    }
                    if is_close {
                        break Exit::Closed;
                    }
                }

                // Bridge process exit
                status = child.wait() => {
                    break match status {
                        Ok(status) => Exit::Lost(format!("bridge exited with {status}")),
                        Err(e) => Exit::Lost(format!("failed to wait for bridge: {e}")),
                    };
                }
            }
        };

        // Unblock anyone waiting for an acknowledgement
        pending.clear();

        match exit {
            Exit::Closed => {
                if tokio::time::timeout(CLOSE_GRACE, child.wait()).await.is_err() {
                    warn!(session = %session_id, "Bridge did not exit after close, killing it");
                    let _ = child.kill().await;
                }
                info!(session = %session_id, "Bridge session closed");
            }
            Exit::Abandoned => {
                let _ = child.kill().await;
                debug!(session = %session_id, "Bridge session abandoned");
            }
            Exit::Lost(reason) => {
                let _ = child.kill().await;
                warn!(session = %session_id, reason = %reason, "Bridge session lost");
                if !saw_close {
                    let update = ConnectionUpdate::closed(None, reason);
                    backlog.push_back(SessionEvent::Connection(update));
                }
                // Deliver what the bridge said before it went away
                for event in backlog {
                    if evt_tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

async fn write_command(
    stdin: &mut ChildStdin,
    command: &BridgeCommand,
) -> Result<(), ClientError> {
    let mut line = serde_json::to_string(command)?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}
