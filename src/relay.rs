use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::config::ChannelConfig;
use crate::mentions::{MentionContext, MentionIndex, MentionTranslator};
use crate::model::{ChatEvent, InboundEvent, Network, Normalized, Rendered, format_for, normalize};
use crate::stats::RelayStats;
use crate::utils::shutdown;

pub mod channels;
pub mod dispatcher;
pub mod queue;
pub mod sink;

#[cfg(test)]
mod scenarios;

pub use self::channels::ChannelMap;
pub use self::dispatcher::Dispatcher;
pub use self::queue::OutboundQueue;
pub use self::sink::{DeliveryError, OutboundSink, OutboundUnit};

/// One outbound queue per destination network.
#[derive(Clone)]
pub struct OutboundQueues {
    irc: Arc<OutboundQueue>,
    discord: Arc<OutboundQueue>,
}

impl OutboundQueues {
    pub fn new(depth: usize) -> Self {
        Self {
            irc: Arc::new(OutboundQueue::new(Network::Irc, depth)),
            discord: Arc::new(OutboundQueue::new(Network::Discord, depth)),
        }
    }

    pub fn for_network(&self, destination: Network) -> &Arc<OutboundQueue> {
        match destination {
            Network::Irc => &self.irc,
            Network::Discord => &self.discord,
        }
    }
}

/// Turns inbound events from either network into outbound units for the
/// other. Runs as a single worker so each origin's order carries through.
pub struct RelayCore {
    channels: Arc<ChannelMap>,
    index: Arc<MentionIndex>,
    translator: MentionTranslator,
    queues: OutboundQueues,
    stats: Arc<RelayStats>,
}

impl RelayCore {
    pub fn new(
        channels: Arc<ChannelMap>,
        index: Arc<MentionIndex>,
        queues: OutboundQueues,
        stats: Arc<RelayStats>,
    ) -> Self {
        Self {
            channels,
            translator: MentionTranslator::new(index.clone()),
            index,
            queues,
            stats,
        }
    }

    pub async fn run(self, mut inbound: mpsc::Receiver<InboundEvent>, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown::wait(&mut stop) => break,
                event = inbound.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        info!("relay core stopped");
    }

    pub fn handle(&self, event: InboundEvent) {
        let origin = event.origin();
        self.stats.message_received(origin);

        let event = match normalize(event) {
            Normalized::Event(event) => event,
            Normalized::Ignore => {
                debug!(%origin, "ignoring inbound event");
                self.stats.message_ignored(origin);
                return;
            }
        };

        let Some(pair) = self.channels.route(origin, &event.channel_id) else {
            debug!(%origin, channel = %event.channel_id, "ignoring message from unmapped channel");
            self.stats.message_ignored(origin);
            return;
        };

        match origin {
            Network::Discord => self.index.observe_discord(&event.sender_handle, &event.sender),
            Network::Irc => self.index.observe_irc(&event.sender_handle),
        }

        let destination = origin.opposite();
        let body = self.translator.resolve_mentions(
            &event.body,
            destination,
            &MentionContext {
                sender_handle: &event.sender_handle,
                mentioned: &event.mentions,
            },
        );
        let event = ChatEvent { body, ..event };

        let queue = self.queues.for_network(destination);
        for rendered in format_for(&event, destination) {
            queue.push(outbound_unit(pair, rendered));
        }
    }
}

fn outbound_unit(pair: &ChannelConfig, rendered: Rendered) -> OutboundUnit {
    match rendered {
        Rendered::IrcLine(text) => OutboundUnit::IrcPrivmsg {
            channel: pair.irc_channel.clone(),
            text,
        },
        Rendered::Webhook { username, content } => OutboundUnit::DiscordWebhook {
            webhook_url: pair.discord_webhook_url.clone(),
            username,
            content,
        },
    }
}
