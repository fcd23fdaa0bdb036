use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::model::{InboundEvent, Network};
use crate::relay::OutboundSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// What dispatchers observe about one network: its state and, only while
/// connected, the sink that delivers to it.
#[derive(Clone)]
pub struct LinkState {
    pub state: ConnectionState,
    pub sink: Option<Arc<dyn OutboundSink>>,
}

impl LinkState {
    pub fn without_sink(state: ConnectionState) -> Self {
        Self { state, sink: None }
    }
}

impl fmt::Debug for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkState")
            .field("state", &self.state)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

pub type LinkWatch = watch::Receiver<LinkState>;

#[derive(Debug, Default)]
struct SessionProgress {
    connected_since: Option<Instant>,
    reached_connected: bool,
    longest_stint: Duration,
}

impl SessionProgress {
    fn close_stint(&mut self) {
        if let Some(since) = self.connected_since.take() {
            self.longest_stint = self.longest_stint.max(since.elapsed());
        }
    }
}

/// Handle given to one connection session. The session reports its
/// connectivity through it and pushes inbound events into the relay core.
#[derive(Clone)]
pub struct SessionLink {
    network: Network,
    inbound: mpsc::Sender<InboundEvent>,
    status: Arc<watch::Sender<LinkState>>,
    progress: Arc<Mutex<SessionProgress>>,
}

impl SessionLink {
    pub(super) fn new(
        network: Network,
        inbound: mpsc::Sender<InboundEvent>,
        status: Arc<watch::Sender<LinkState>>,
    ) -> Self {
        Self {
            network,
            inbound,
            status,
            progress: Arc::new(Mutex::new(SessionProgress::default())),
        }
    }

    /// Marks the session usable and publishes its outbound sink.
    pub fn connected(&self, sink: Arc<dyn OutboundSink>) {
        {
            let mut progress = self.progress.lock();
            progress.reached_connected = true;
            if progress.connected_since.is_none() {
                progress.connected_since = Some(Instant::now());
            }
        }
        self.status.send_replace(LinkState {
            state: ConnectionState::Connected,
            sink: Some(sink),
        });
        info!(network = %self.network, "session connected");
    }

    /// The client is re-establishing its connection on its own; the sink is
    /// withdrawn until `connected` is called again.
    pub fn reconnecting(&self) {
        self.progress.lock().close_stint();
        let was_connected = self.status.send_if_modified(|link| {
            if link.state != ConnectionState::Connected {
                return false;
            }
            *link = LinkState::without_sink(ConnectionState::Connecting);
            true
        });
        if was_connected {
            info!(network = %self.network, "session reconnecting");
        }
    }

    /// Hands an inbound event to the relay core, waiting while its queue is
    /// full. Returns false once the core has stopped.
    pub async fn deliver(&self, event: InboundEvent) -> bool {
        if self.inbound.send(event).await.is_err() {
            debug!(network = %self.network, "relay core stopped, inbound event discarded");
            return false;
        }
        true
    }

    pub(super) fn reached_connected(&self) -> bool {
        self.progress.lock().reached_connected
    }

    /// Longest uninterrupted connected period of this session so far.
    pub(super) fn longest_stint(&self) -> Duration {
        let mut progress = self.progress.lock();
        progress.close_stint();
        progress.longest_stint
    }
}
