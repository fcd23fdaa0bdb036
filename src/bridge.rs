use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};

use crate::config::{Config, SupervisorConfig};
use crate::discord::DiscordConnector;
use crate::irc::IrcConnector;
use crate::mentions::MentionIndex;
use crate::model::Network;
use crate::ratelimit::RateLimits;
use crate::relay::{ChannelMap, Dispatcher, OutboundQueues, RelayCore};
use crate::stats::RelayStats;
use crate::supervisor::{Connector, Supervisor, SupervisorError};

/// Owns every long-lived piece of the relay and runs them as tasks.
pub struct Bridge {
    supervisor_config: SupervisorConfig,
    inbound_depth: usize,
    channels: Arc<ChannelMap>,
    index: Arc<MentionIndex>,
    limits: RateLimits,
    queues: OutboundQueues,
    stats: Arc<RelayStats>,
    irc: Arc<dyn Connector>,
    discord: Arc<dyn Connector>,
}

impl Bridge {
    pub fn new(config: &Config) -> Result<Self> {
        let irc_channels = config
            .channels
            .iter()
            .map(|pair| pair.irc_channel.clone())
            .collect();
        let irc = Arc::new(IrcConnector::new(
            &config.irc,
            config.irc_username(),
            irc_channels,
        ));
        let discord = Arc::new(DiscordConnector::new(&config.discord)?);
        Self::with_connectors(config, irc, discord)
    }

    pub fn with_connectors(
        config: &Config,
        irc: Arc<dyn Connector>,
        discord: Arc<dyn Connector>,
    ) -> Result<Self> {
        Ok(Self {
            supervisor_config: config.supervisor.clone(),
            inbound_depth: config.limits.inbound_queue_depth,
            channels: Arc::new(ChannelMap::new(config.channels.clone())),
            index: Arc::new(MentionIndex::from_config(&config.mentions)),
            limits: RateLimits::from_config(&config.limits)?,
            queues: OutboundQueues::new(config.limits.outbound_queue_depth),
            stats: Arc::new(RelayStats::new()),
            irc,
            discord,
        })
    }

    /// Runs until ctrl-c.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {err}");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Runs until `shutdown` resolves or a supervisor gives up, then stops in
    /// order: the core, the dispatchers (draining while still connected),
    /// and finally the network sessions.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (inbound_tx, inbound_rx) = mpsc::channel(self.inbound_depth);
        let irc_supervisor =
            Supervisor::new(self.irc.clone(), &self.supervisor_config, inbound_tx.clone());
        let discord_supervisor =
            Supervisor::new(self.discord.clone(), &self.supervisor_config, inbound_tx);

        let (core_stop, core_stop_rx) = watch::channel(false);
        let (dispatch_stop, dispatch_stop_rx) = watch::channel(false);
        let (session_stop, session_stop_rx) = watch::channel(false);
        let grace = Duration::from_millis(self.supervisor_config.shutdown_grace_ms);

        let mut dispatchers = JoinSet::new();
        for (network, link) in [
            (Network::Irc, irc_supervisor.subscribe()),
            (Network::Discord, discord_supervisor.subscribe()),
        ] {
            let dispatcher = Dispatcher::new(
                network,
                self.queues.for_network(network).clone(),
                self.limits.for_network(network),
                link,
                self.stats.clone(),
            );
            dispatchers.spawn(dispatcher.run(dispatch_stop_rx.clone(), grace));
        }

        let core = RelayCore::new(
            self.channels.clone(),
            self.index.clone(),
            self.queues.clone(),
            self.stats.clone(),
        );
        let core_handle = tokio::spawn(core.run(inbound_rx, core_stop_rx));

        let mut supervisors = JoinSet::new();
        supervisors.spawn(irc_supervisor.run(session_stop_rx.clone()));
        supervisors.spawn(discord_supervisor.run(session_stop_rx));

        info!(channels = self.channels.len(), "relay started");

        let mut outcome = Ok(());
        tokio::select! {
            _ = shutdown => info!("shutdown requested, stopping relay"),
            Some(joined) = supervisors.join_next() => outcome = supervisor_outcome(joined),
        }

        let _ = core_stop.send(true);
        if let Err(err) = core_handle.await {
            error!("relay core task failed: {err}");
        }

        let _ = dispatch_stop.send(true);
        while let Some(joined) = dispatchers.join_next().await {
            if let Err(err) = joined {
                error!("dispatcher task failed: {err}");
            }
        }

        let _ = session_stop.send(true);
        while let Some(joined) = supervisors.join_next().await {
            if let Err(err) = supervisor_outcome(joined)
                && outcome.is_ok()
            {
                outcome = Err(err);
            }
        }

        self.log_stats();
        info!("relay stopped");
        outcome
    }

    fn log_stats(&self) {
        for network in [Network::Discord, Network::Irc] {
            let snapshot = self.stats.snapshot(
                network,
                self.queues.for_network(network).dropped(),
                self.limits.for_network(network).overflows(),
            );
            self.stats.log_summary(network, snapshot);
        }
        info!(linked_users = self.index.len(), "mention index size");
    }
}

fn supervisor_outcome(joined: Result<Result<(), SupervisorError>, JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result.map_err(Into::into),
        Err(err) => Err(anyhow!("supervisor task failed: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::Notify;
    use tokio::time::Instant;

    use super::Bridge;
    use crate::config::Config;
    use crate::model::{DiscordInbound, InboundEvent, Network};
    use crate::relay::{DeliveryError, OutboundSink, OutboundUnit};
    use crate::supervisor::{Connector, SessionError, SessionLink};

    const CONFIG: &str = r##"
irc:
  server: irc.example.org
  nickname: relaybot
discord:
  bot_token: "token"
channels:
  - discord_channel_id: "100"
    discord_webhook_url: "https://discord.com/api/webhooks/1/token"
    irc_channel: "#relay"
supervisor:
  shutdown_grace_ms: 500
"##;

    #[derive(Default)]
    struct Recorder {
        units: Mutex<Vec<OutboundUnit>>,
    }

    #[async_trait]
    impl OutboundSink for Recorder {
        async fn deliver(&self, unit: &OutboundUnit) -> Result<(), DeliveryError> {
            self.units.lock().push(unit.clone());
            Ok(())
        }
    }

    /// Connects at once, replays its events, then idles until shut down.
    struct LoopbackConnector {
        network: Network,
        sink: Arc<Recorder>,
        events: Mutex<Vec<InboundEvent>>,
        fatal: bool,
        closed: Notify,
    }

    impl LoopbackConnector {
        fn new(network: Network, events: Vec<InboundEvent>) -> Arc<Self> {
            Arc::new(Self {
                network,
                sink: Arc::new(Recorder::default()),
                events: Mutex::new(events),
                fatal: false,
                closed: Notify::new(),
            })
        }
    }

    #[async_trait]
    impl Connector for LoopbackConnector {
        fn network(&self) -> Network {
            self.network
        }

        async fn run_session(&self, link: SessionLink) -> Result<(), SessionError> {
            if self.fatal {
                return Err(SessionError::Fatal("bad token".to_string()));
            }
            link.connected(self.sink.clone());
            let events = std::mem::take(&mut *self.events.lock());
            for event in events {
                link.deliver(event).await;
            }
            self.closed.notified().await;
            Ok(())
        }

        async fn shutdown(&self) {
            self.closed.notify_one();
        }
    }

    fn discord_message(content: &str) -> InboundEvent {
        InboundEvent::Discord(DiscordInbound {
            channel_id: "100".to_string(),
            author_id: "7".to_string(),
            author_display_name: "Alice".to_string(),
            content: content.to_string(),
            attachments: Vec::new(),
            mentions: Vec::new(),
            from_bot: false,
            system: false,
            received_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn relays_discord_message_to_irc_and_stops_cleanly() {
        let config = Config::from_yaml(CONFIG).expect("config");
        let irc = LoopbackConnector::new(Network::Irc, Vec::new());
        let discord = LoopbackConnector::new(Network::Discord, vec![discord_message("hello")]);
        let bridge =
            Bridge::with_connectors(&config, irc.clone(), discord.clone()).expect("bridge");

        let irc_sink = irc.sink.clone();
        let delivered = async move {
            let deadline = Instant::now() + Duration::from_secs(3);
            while irc_sink.units.lock().is_empty() && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        bridge.run_until(delivered).await.expect("clean shutdown");

        assert_eq!(
            *irc.sink.units.lock(),
            vec![OutboundUnit::IrcPrivmsg {
                channel: "#relay".to_string(),
                text: "<Alice> hello".to_string(),
            }]
        );
        assert!(discord.sink.units.lock().is_empty());
    }

    #[tokio::test]
    async fn fatal_session_error_stops_the_bridge() {
        let config = Config::from_yaml(CONFIG).expect("config");
        let irc = LoopbackConnector::new(Network::Irc, Vec::new());
        let discord = Arc::new(LoopbackConnector {
            network: Network::Discord,
            sink: Arc::new(Recorder::default()),
            events: Mutex::new(Vec::new()),
            fatal: true,
            closed: Notify::new(),
        });
        let bridge = Bridge::with_connectors(&config, irc, discord).expect("bridge");

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            bridge.run_until(std::future::pending()),
        )
        .await
        .expect("bridge stopped on its own");

        let err = result.expect_err("fatal error surfaces");
        assert!(err.to_string().contains("bad token"), "{err}");
    }
}
