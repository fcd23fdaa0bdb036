use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use super::OutboundUnit;
use crate::model::Network;

/// Bounded FIFO of units waiting for one destination. Pushing past the
/// depth drops the oldest unit.
pub struct OutboundQueue {
    network: Network,
    depth: usize,
    units: Mutex<VecDeque<OutboundUnit>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl OutboundQueue {
    pub fn new(network: Network, depth: usize) -> Self {
        Self {
            network,
            depth: depth.max(1),
            units: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, unit: OutboundUnit) {
        let evicted = {
            let mut units = self.units.lock();
            let evicted = if units.len() >= self.depth {
                units.pop_front()
            } else {
                None
            };
            units.push_back(unit);
            evicted
        };

        if evicted.is_some() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                network = %self.network,
                depth = self.depth,
                dropped,
                "outbound queue full, dropped oldest message"
            );
        }
        self.notify.notify_one();
    }

    /// Puts back a unit whose delivery failed transiently. It may briefly
    /// take the queue one past its depth.
    pub fn requeue(&self, unit: OutboundUnit) {
        self.units.lock().push_front(unit);
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<OutboundUnit> {
        self.units.lock().pop_front()
    }

    /// Waits for the next unit. Cancelling the wait loses nothing.
    pub async fn pop(&self) -> OutboundUnit {
        loop {
            if let Some(unit) = self.try_pop() {
                return unit;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.units.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
