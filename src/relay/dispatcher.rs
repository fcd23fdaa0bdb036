use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{DeliveryError, OutboundQueue, OutboundSink, OutboundUnit};
use crate::model::Network;
use crate::ratelimit::RateLimiter;
use crate::stats::RelayStats;
use crate::supervisor::LinkWatch;
use crate::utils::shutdown;

/// Pause before retrying a unit after a transient delivery failure.
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Drains one destination's queue, one unit at a time, through its rate
/// limiter into whatever sink the destination's session currently offers.
pub struct Dispatcher {
    network: Network,
    queue: Arc<OutboundQueue>,
    limiter: Arc<RateLimiter>,
    link: LinkWatch,
    stats: Arc<RelayStats>,
}

impl Dispatcher {
    pub fn new(
        network: Network,
        queue: Arc<OutboundQueue>,
        limiter: Arc<RateLimiter>,
        link: LinkWatch,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            network,
            queue,
            limiter,
            link,
            stats,
        }
    }

    /// Runs until `stop` fires, then keeps delivering what is queued for at
    /// most `grace` while the destination is still connected.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>, grace: Duration) {
        loop {
            let sink = tokio::select! {
                sink = self.live_sink() => sink,
                _ = shutdown::wait(&mut stop) => break,
            };
            let Some(sink) = sink else {
                debug!(network = %self.network, "link closed, dispatcher stopping");
                return;
            };

            let unit = tokio::select! {
                biased;
                // The sink was withdrawn or replaced; fetch it again.
                _ = self.link.changed() => continue,
                unit = self.queue.pop() => unit,
                _ = shutdown::wait(&mut stop) => break,
            };
            self.send(&*sink, unit).await;
        }

        self.drain(grace).await;
    }

    /// Waits until the destination has a sink. `None` once the link itself
    /// is gone.
    async fn live_sink(&mut self) -> Option<Arc<dyn OutboundSink>> {
        loop {
            let sink = self.link.borrow_and_update().sink.clone();
            if sink.is_some() {
                return sink;
            }
            if self.link.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn send(&self, sink: &dyn OutboundSink, unit: OutboundUnit) {
        self.limiter.admit().await;
        match sink.deliver(&unit).await {
            Ok(()) => self.stats.message_relayed(self.network),
            Err(DeliveryError::Transient(reason)) => {
                warn!(network = %self.network, %reason, "delivery failed, will retry");
                self.queue.requeue(unit);
                tokio::time::sleep(TRANSIENT_RETRY_DELAY).await;
            }
            Err(DeliveryError::Rejected(reason)) => {
                error!(network = %self.network, %reason, ?unit, "delivery rejected, message dropped");
                self.stats.message_rejected(self.network);
            }
        }
    }

    async fn drain(&self, grace: Duration) {
        let pending = self.queue.len();
        if pending == 0 {
            return;
        }
        info!(network = %self.network, pending, "draining outbound queue");

        let drained = tokio::time::timeout(grace, async {
            while let Some(unit) = self.queue.try_pop() {
                let sink = self.link.borrow().sink.clone();
                let Some(sink) = sink else {
                    self.queue.requeue(unit);
                    break;
                };
                self.send(&*sink, unit).await;
            }
        })
        .await;

        let abandoned = self.queue.len();
        if drained.is_err() || abandoned > 0 {
            warn!(network = %self.network, abandoned, "shutdown abandoned queued messages");
        }
    }
}
