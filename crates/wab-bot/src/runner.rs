//! Session runner: owns the connect → drive → reconnect loop.
//!
//! Exactly one connection is live at a time. Every close is fed to the
//! [`Reconnector`], which either asks for one new connection or halts.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use wab_core::{
    connection::{
        Connection, ConnectionState, ConnectionUpdate, DisconnectReason, SessionConnector,
        SessionEvent,
    },
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    pairing::{render_qr_terminal, PairingState},
    reconnect::{BackoffPolicy, Decision, HaltReason, Reconnector},
    session::FileSessionStore,
};

use crate::router::{dispatch_batch, AppState};

#[derive(Clone, Copy, Debug)]
pub struct RunnerConfig {
    pub backoff: BackoffPolicy,
    pub throttle: ThrottleConfig,
    pub print_qr_in_terminal: bool,
}

impl RunnerConfig {
    pub fn from_config(cfg: &wab_core::config::Config) -> Self {
        Self {
            backoff: BackoffPolicy {
                base: cfg.reconnect_base_delay,
                max: cfg.reconnect_max_delay,
                max_attempts: cfg.reconnect_max_attempts,
            },
            throttle: ThrottleConfig {
                global_min_interval: cfg.send_global_interval,
                per_chat_min_interval: cfg.send_chat_interval,
            },
            print_qr_in_terminal: cfg.print_qr_in_terminal,
        }
    }
}

/// Why the runner stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerExit {
    LoggedOut,
    AttemptsExhausted,
    Shutdown,
}

enum Drive {
    Closed(DisconnectReason),
    Shutdown,
}

pub struct Runner {
    connector: Arc<dyn SessionConnector>,
    store: FileSessionStore,
    pairing: Arc<PairingState>,
    state: AppState,
    cfg: RunnerConfig,
    batches: JoinSet<()>,
}

impl Runner {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        store: FileSessionStore,
        pairing: Arc<PairingState>,
        state: AppState,
        cfg: RunnerConfig,
    ) -> Self {
        Self {
            connector,
            store,
            pairing,
            state,
            cfg,
            batches: JoinSet::new(),
        }
    }

    pub async fn run(mut self) -> anyhow::Result<RunnerExit> {
        let mut fsm = Reconnector::new(self.cfg.backoff);
        let cancel = self.state.cancel.clone();

        let exit = loop {
            let credentials = self.store.load()?;
            if credentials.is_fresh() {
                info!(dir = %self.store.dir().display(), "no stored session; pairing required");
            }

            let connected = tokio::select! {
                _ = cancel.cancelled() => break RunnerExit::Shutdown,
                r = self.connector.connect(credentials) => r,
            };
            let reason = match connected {
                Ok(conn) => match self.drive(conn, &mut fsm).await {
                    Drive::Closed(reason) => reason,
                    Drive::Shutdown => break RunnerExit::Shutdown,
                },
                Err(e) => {
                    warn!("connect failed: {e}");
                    DisconnectReason::ConnectionLost
                }
            };

            match fsm.observe(ConnectionState::Closed(reason)) {
                Some(Decision::Reconnect { attempt, delay }) => {
                    info!(?reason, attempt, ?delay, "connection closed; reconnecting");
                    tokio::select! {
                        _ = cancel.cancelled() => break RunnerExit::Shutdown,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Some(Decision::Halt(HaltReason::LoggedOut)) => {
                    error!("session logged out; not reconnecting");
                    self.pairing.clear().await;
                    match self.store.invalidate() {
                        Ok(Some(archived)) => {
                            info!(archived = %archived.display(), "session credentials archived")
                        }
                        Ok(None) => {}
                        Err(e) => warn!("failed to archive session credentials: {e}"),
                    }
                    break RunnerExit::LoggedOut;
                }
                Some(Decision::Halt(HaltReason::AttemptsExhausted)) => {
                    error!(attempts = fsm.attempts(), "giving up after repeated connection failures");
                    break RunnerExit::AttemptsExhausted;
                }
                None => debug!(?reason, "close already handled"),
            }
            fsm.begin_attempt();
        };

        // In-flight batches finish (or see the cancelled token) before we return.
        while let Some(res) = self.batches.join_next().await {
            if let Err(e) = res {
                warn!("message batch task failed: {e}");
            }
        }
        info!(?exit, "runner stopped");
        Ok(exit)
    }

    /// Pump one connection's events until it closes or shutdown is requested.
    async fn drive(&mut self, conn: Connection, fsm: &mut Reconnector) -> Drive {
        let Connection {
            mut events,
            messenger,
        } = conn;
        let messenger: Arc<dyn MessagingPort> =
            Arc::new(ThrottledMessenger::new(messenger, self.cfg.throttle));
        let cancel = self.state.cancel.clone();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Drive::Shutdown,
                Some(res) = self.batches.join_next(), if !self.batches.is_empty() => {
                    if let Err(e) = res {
                        warn!("message batch task failed: {e}");
                    }
                    continue;
                }
                ev = events.recv() => ev,
            };

            // A stream that ends without an explicit close is a lost connection.
            let Some(event) = event else {
                return Drive::Closed(DisconnectReason::ConnectionLost);
            };
            debug!(kind = event.kind(), "session event");

            match event {
                SessionEvent::Connection(update) => {
                    if let Some(reason) = self.on_connection_update(update, fsm).await {
                        return Drive::Closed(reason);
                    }
                }
                SessionEvent::Credentials(update) => match self.store.save(&update) {
                    Ok(report) if report.is_noop() => debug!("credentials unchanged"),
                    Ok(report) => debug!(
                        written = report.written,
                        removed = report.removed,
                        "credentials saved"
                    ),
                    Err(e) => warn!("failed to persist credentials: {e}"),
                },
                SessionEvent::Messages(batch) => {
                    let state = self.state.clone();
                    let messenger = messenger.clone();
                    self.batches.spawn(async move {
                        dispatch_batch(&state, &messenger, &batch).await;
                    });
                }
            }
        }
    }

    /// Returns the close reason when the update closes the connection.
    async fn on_connection_update(
        &self,
        update: ConnectionUpdate,
        fsm: &mut Reconnector,
    ) -> Option<DisconnectReason> {
        if let Some(payload) = update.qr.as_deref() {
            match self.pairing.publish(payload).await {
                Ok(_) => info!("pairing QR updated; scan it or open /qr"),
                Err(e) => warn!("failed to render pairing QR: {e}"),
            }
            if self.cfg.print_qr_in_terminal {
                match render_qr_terminal(payload) {
                    Ok(art) => println!("{art}"),
                    Err(e) => warn!("failed to render terminal QR: {e}"),
                }
            }
        }

        match update.state? {
            ConnectionState::Closed(reason) => Some(reason),
            state @ ConnectionState::Open => {
                fsm.observe(state);
                self.pairing.clear().await;
                info!("connected");
                None
            }
            state @ ConnectionState::Connecting => {
                fsm.observe(state);
                None
            }
        }
    }
}
