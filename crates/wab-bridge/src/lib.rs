//! Protocol-client adapter.
//!
//! The WhatsApp multi-device protocol is spoken by an external bridge process.
//! We talk to it over stdio: one JSON object per line in each direction (see
//! [`wire`]). Each `connect()` spawns a fresh process, hands it the persisted
//! credentials and turns its stdout into typed [`SessionEvent`]s.
//!
//! The bridge program is configured with `WA_BRIDGE_PATH` (default `wa-bridge`)
//! and `WA_BRIDGE_ARGS`. For a Node bridge that is e.g.
//! `WA_BRIDGE_PATH=node WA_BRIDGE_ARGS=bridge.mjs`.

pub mod wire;

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot, Mutex},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wab_core::{
    connection::{
        Connection, ConnectionState, ConnectionUpdate, DisconnectReason, SessionConnector,
        SessionEvent,
    },
    domain::{Jid, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{MediaRef, OutgoingMessage},
    },
    session::Credentials,
    Result,
};

use wire::{Decoded, Response};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;
const EVENT_BUFFER: usize = 64;

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// How long a `send` / `download_media` waits for the bridge to answer.
    pub request_timeout: Duration,
}

impl BridgeConfig {
    pub fn from_config(cfg: &wab_core::config::Config) -> Self {
        Self {
            program: cfg.bridge_path.clone(),
            args: cfg.bridge_args.clone(),
            request_timeout: cfg.bridge_request_timeout,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            if let Some(front) = self.lines.pop_front() {
                self.bytes = self.bytes.saturating_sub(front.len() + 1);
            } else {
                break;
            }
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

#[derive(Clone, Debug)]
pub struct BridgeConnector {
    cfg: BridgeConfig,
}

impl BridgeConnector {
    pub fn new(cfg: BridgeConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl SessionConnector for BridgeConnector {
    async fn connect(&self, credentials: Credentials) -> Result<Connection> {
        let mut child = Command::new(&self.cfg.program)
            .args(&self.cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::External(format!(
                    "failed to start bridge {}: {e}",
                    self.cfg.program.display()
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::External("bridge stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::External("bridge stdout was not captured".to_string()))?;

        let tail = Arc::new(Mutex::new(StderrTail::default()));
        // Drain stderr in background to avoid blocking on a full pipe.
        if let Some(stderr) = child.stderr.take() {
            let tail = tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    debug!(target: "wab_bridge::stderr", "{line}");
                    tail.lock().await.push_line(line);
                }
            });
        }

        let auth = wire::encode_auth(&credentials)?;
        stdin.write_all(auth.as_bytes()).await?;
        stdin.flush().await?;
        info!(
            program = %self.cfg.program.display(),
            fresh = credentials.is_fresh(),
            "bridge started"
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        tokio::spawn(pump(
            child,
            stdout,
            tx,
            pending.clone(),
            shutdown.clone(),
            tail,
        ));

        let messenger = BridgeMessenger {
            stdin: Mutex::new(stdin),
            pending,
            shutdown,
            next_id: AtomicU64::new(1),
            request_timeout: self.cfg.request_timeout,
        };

        Ok(Connection {
            events: rx,
            messenger: Arc::new(messenger),
        })
    }
}

/// Reads bridge stdout until EOF or until the event receiver is dropped, then
/// tears the process down. A stream that ends without an explicit close is
/// reported as `Closed(ConnectionLost)`.
async fn pump(
    mut child: Child,
    stdout: ChildStdout,
    tx: mpsc::Sender<SessionEvent>,
    pending: Pending,
    shutdown: CancellationToken,
    tail: Arc<Mutex<StderrTail>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut close_seen = false;

    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!("connection dropped; stopping bridge");
                break;
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "bridge stdout read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match wire::decode_line(&line) {
                    Ok(Decoded::Event(ev)) => {
                        if let SessionEvent::Connection(ConnectionUpdate {
                            state: Some(ConnectionState::Closed(_)),
                            ..
                        }) = &ev
                        {
                            close_seen = true;
                        }
                        if tx.send(ev).await.is_err() {
                            break;
                        }
                    }
                    Ok(Decoded::Response { request_id, response }) => {
                        match pending.lock().await.remove(&request_id) {
                            Some(waiter) => {
                                let _ = waiter.send(response);
                            }
                            None => debug!(request_id, "late bridge response dropped"),
                        }
                    }
                    Ok(Decoded::Notice(message)) => warn!(%message, "bridge reported an error"),
                    Ok(Decoded::Ignored) => {}
                    Err(e) => warn!(error = %e, line = %truncate_text(&line, 200), "unparseable bridge line"),
                }
            }
        }
    }

    shutdown.cancel();
    // Dropping the senders fails every in-flight request.
    pending.lock().await.clear();
    reap(&mut child, &tail).await;

    if !close_seen {
        let _ = tx
            .send(SessionEvent::Connection(ConnectionUpdate {
                state: Some(ConnectionState::Closed(DisconnectReason::ConnectionLost)),
                qr: None,
            }))
            .await;
    }
}

async fn reap(child: &mut Child, tail: &Arc<Mutex<StderrTail>>) {
    let status = match child.try_wait() {
        Ok(Some(status)) => Some(status),
        _ => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill bridge process");
            }
            child.wait().await.ok()
        }
    };

    match status {
        Some(status) if status.success() => debug!("bridge exited"),
        Some(status) => {
            let stderr = tail.lock().await.snapshot();
            if stderr.trim().is_empty() {
                info!(%status, "bridge exited");
            } else {
                info!(%status, stderr = %stderr, "bridge exited");
            }
        }
        None => warn!("bridge exit status unavailable"),
    }
}

/// Send primitive of one bridge process. Requests are correlated with responses
/// by a per-process `request_id`.
pub struct BridgeMessenger {
    stdin: Mutex<ChildStdin>,
    pending: Pending,
    shutdown: CancellationToken,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl BridgeMessenger {
    async fn request(&self, request_id: u64, line: String) -> Result<Response> {
        if self.shutdown.is_cancelled() {
            return Err(Error::External("bridge connection is closed".to_string()));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.lock().await.remove(&request_id);
            return Err(Error::Io(e));
        }

        tokio::select! {
            res = rx => res.map_err(|_| Error::External("bridge closed before answering".to_string())),
            _ = self.shutdown.cancelled() => {
                Err(Error::External("bridge connection is closed".to_string()))
            }
            _ = tokio::time::sleep(self.request_timeout) => {
                self.pending.lock().await.remove(&request_id);
                Err(Error::Timeout(self.request_timeout))
            }
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl MessagingPort for BridgeMessenger {
    async fn send(&self, chat: &Jid, message: OutgoingMessage) -> Result<MessageRef> {
        let id = self.next_request_id();
        let line = wire::encode_send(id, chat, &message)?;
        match self.request(id, line).await? {
            Response::Sent(message_id) => Ok(MessageRef {
                chat: chat.clone(),
                message_id,
            }),
            Response::Failed(msg) => Err(Error::External(format!(
                "bridge failed to send {}: {msg}",
                message.kind()
            ))),
            Response::Media(_) => Err(Error::External(
                "bridge answered a send with media".to_string(),
            )),
        }
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        let id = self.next_request_id();
        let line = wire::encode_download(id, media)?;
        match self.request(id, line).await? {
            Response::Media(bytes) => Ok(bytes),
            Response::Failed(msg) => Err(Error::External(format!(
                "bridge failed to download media: {msg}"
            ))),
            Response::Sent(_) => Err(Error::External(
                "bridge answered a download with a send receipt".to_string(),
            )),
        }
    }
}

fn truncate_text(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
