use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::model::{InboundEvent, Network};
use crate::utils::shutdown;

pub mod backoff;
pub mod link;

pub use self::backoff::Backoff;
pub use self::link::{ConnectionState, LinkState, LinkWatch, SessionLink};

/// How long a closing session gets to finish after `Connector::shutdown`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("connection closed: {0}")]
    Closed(String),
    /// Retrying cannot help, e.g. the credentials were rejected.
    #[error("fatal session error: {0}")]
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("{network} never connected after {attempts} consecutive attempts")]
    RetriesExhausted { network: Network, attempts: u32 },
    #[error("{network} session failed fatally: {reason}")]
    Fatal { network: Network, reason: String },
}

/// One network's connection, restartable any number of times.
#[async_trait]
pub trait Connector: Send + Sync {
    fn network(&self) -> Network;

    /// Runs one session until it ends. The session calls
    /// `SessionLink::connected` once it can deliver outbound units.
    async fn run_session(&self, link: SessionLink) -> Result<(), SessionError>;

    /// Asks the live session, if any, to close gracefully.
    async fn shutdown(&self);
}

pub struct Supervisor {
    network: Network,
    connector: Arc<dyn Connector>,
    inbound: mpsc::Sender<InboundEvent>,
    status: Arc<watch::Sender<LinkState>>,
    backoff: Backoff,
    reset_after: Duration,
    max_retries: u32,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        config: &SupervisorConfig,
        inbound: mpsc::Sender<InboundEvent>,
    ) -> Self {
        let (status, _) = watch::channel(LinkState::without_sink(ConnectionState::Disconnected));
        Self {
            network: connector.network(),
            connector,
            inbound,
            status: Arc::new(status),
            backoff: Backoff::from_config(config),
            reset_after: Duration::from_secs(config.reset_after_secs),
            max_retries: config.max_retries,
        }
    }

    pub fn subscribe(&self) -> LinkWatch {
        self.status.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(network = %self.network, %state, "connection state changed");
        self.status.send_replace(LinkState::without_sink(state));
    }

    /// Keeps the network connected until `shutdown` fires. Only a fatal
    /// session error or `max_retries` sessions in a row that never connect
    /// end it early.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SupervisorError> {
        let network = self.network;
        let mut never_connected = 0u32;

        loop {
            self.set_state(ConnectionState::Connecting);
            info!(%network, attempt = self.backoff.failures() + 1, "starting session");

            let link = SessionLink::new(network, self.inbound.clone(), self.status.clone());
            let session = self.connector.run_session(link.clone());
            tokio::pin!(session);

            let result = tokio::select! {
                result = &mut session => result,
                _ = shutdown::wait(&mut shutdown) => {
                    info!(%network, "closing session");
                    self.connector.shutdown().await;
                    if tokio::time::timeout(CLOSE_TIMEOUT, &mut session).await.is_err() {
                        warn!(%network, "session did not close in time, abandoning it");
                    }
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            };

            self.set_state(ConnectionState::Backoff);

            match &result {
                Err(SessionError::Fatal(reason)) => {
                    error!(%network, %reason, "session failed fatally");
                    self.set_state(ConnectionState::Disconnected);
                    return Err(SupervisorError::Fatal {
                        network,
                        reason: reason.clone(),
                    });
                }
                Err(err) => warn!(%network, error = %err, "session ended"),
                Ok(()) => warn!(%network, "session ended without error"),
            }

            if link.reached_connected() {
                never_connected = 0;
                if link.longest_stint() >= self.reset_after {
                    self.backoff.reset();
                }
            } else {
                never_connected += 1;
                if never_connected >= self.max_retries {
                    error!(%network, attempts = never_connected, "giving up reconnecting");
                    self.set_state(ConnectionState::Disconnected);
                    return Err(SupervisorError::RetriesExhausted {
                        network,
                        attempts: never_connected,
                    });
                }
            }

            let delay = self.backoff.next_delay();
            info!(%network, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown::wait(&mut shutdown) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }
}
