//! End-to-end relay behaviour: core, queues and dispatchers wired together
//! with recording sinks in place of live networks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use super::{
    ChannelMap, DeliveryError, Dispatcher, OutboundQueues, OutboundSink, OutboundUnit, RelayCore,
};
use crate::config::{BucketConfig, ChannelConfig};
use crate::mentions::MentionIndex;
use crate::model::{DiscordInbound, InboundEvent, IrcInbound, MentionedUser, Network};
use crate::ratelimit::RateLimiter;
use crate::stats::RelayStats;
use crate::supervisor::{ConnectionState, LinkState};

const WEBHOOK: &str = "https://discord.com/api/webhooks/1/token";

#[derive(Default)]
struct RecordingSink {
    units: Mutex<Vec<OutboundUnit>>,
    /// Deliveries to fail before succeeding, and how.
    failures: Mutex<Vec<DeliveryError>>,
    attempts: AtomicU32,
}

impl RecordingSink {
    fn failing_with(failures: Vec<DeliveryError>) -> Self {
        Self {
            failures: Mutex::new(failures),
            ..Self::default()
        }
    }

    fn units(&self) -> Vec<OutboundUnit> {
        self.units.lock().clone()
    }

    async fn wait_for(&self, count: usize) -> Vec<OutboundUnit> {
        let deadline = Instant::now() + Duration::from_secs(3);
        while self.units.lock().len() < count && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.units()
    }
}

#[async_trait]
impl OutboundSink for RecordingSink {
    async fn deliver(&self, unit: &OutboundUnit) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let failure = {
            let mut failures = self.failures.lock();
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        };
        match failure {
            Some(err) => Err(err),
            None => {
                self.units.lock().push(unit.clone());
                Ok(())
            }
        }
    }
}

struct Harness {
    core: RelayCore,
    index: Arc<MentionIndex>,
    queues: OutboundQueues,
    stats: Arc<RelayStats>,
}

fn harness(depth: usize) -> Harness {
    let channels = Arc::new(ChannelMap::new(vec![ChannelConfig {
        discord_channel_id: "100".to_string(),
        discord_webhook_url: WEBHOOK.to_string(),
        irc_channel: "#relay".to_string(),
    }]));
    let index = Arc::new(MentionIndex::new(128, Duration::from_secs(3600)));
    let queues = OutboundQueues::new(depth);
    let stats = Arc::new(RelayStats::new());
    Harness {
        core: RelayCore::new(channels, index.clone(), queues.clone(), stats.clone()),
        index,
        queues,
        stats,
    }
}

fn discord(author_id: &str, name: &str, content: &str) -> InboundEvent {
    InboundEvent::Discord(DiscordInbound {
        channel_id: "100".to_string(),
        author_id: author_id.to_string(),
        author_display_name: name.to_string(),
        content: content.to_string(),
        attachments: Vec::new(),
        mentions: Vec::new(),
        from_bot: false,
        system: false,
        received_at: Instant::now(),
    })
}

fn irc(nick: &str, text: &str) -> InboundEvent {
    InboundEvent::Irc(IrcInbound {
        channel: "#relay".to_string(),
        nick: nick.to_string(),
        text: text.to_string(),
        from_self: false,
        received_at: Instant::now(),
    })
}

fn privmsg(text: &str) -> OutboundUnit {
    OutboundUnit::IrcPrivmsg {
        channel: "#relay".to_string(),
        text: text.to_string(),
    }
}

fn webhook(username: &str, content: &str) -> OutboundUnit {
    OutboundUnit::DiscordWebhook {
        webhook_url: WEBHOOK.to_string(),
        username: username.to_string(),
        content: content.to_string(),
    }
}

fn drain(harness: &Harness, destination: Network) -> Vec<OutboundUnit> {
    let queue = harness.queues.for_network(destination);
    std::iter::from_fn(|| queue.try_pop()).collect()
}

fn limiter(network: Network) -> Arc<RateLimiter> {
    let bucket = BucketConfig {
        capacity: 50,
        refill_per_second: 1000.0,
    };
    Arc::new(RateLimiter::new(network, &bucket, Duration::from_secs(5)).expect("valid bucket"))
}

fn spawn_dispatcher(
    harness: &Harness,
    network: Network,
    link: watch::Receiver<LinkState>,
) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let dispatcher = Dispatcher::new(
        network,
        harness.queues.for_network(network).clone(),
        limiter(network),
        link,
        harness.stats.clone(),
    );
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.run(stop_rx, Duration::from_secs(1)));
    (stop_tx, handle)
}

fn connected(sink: Arc<RecordingSink>) -> LinkState {
    LinkState {
        state: ConnectionState::Connected,
        sink: Some(sink),
    }
}

#[test]
fn discord_mention_reaches_irc_as_known_nick() {
    let harness = harness(16);
    harness.index.link("42", "bob");

    harness.core.handle(discord("7", "Alice", "hello <@42>"));

    assert_eq!(drain(&harness, Network::Irc), vec![privmsg("<Alice> hello bob")]);
}

#[test]
fn irc_self_address_is_dropped_for_the_webhook() {
    let harness = harness(16);
    harness.index.link("42", "bob");

    harness.core.handle(irc("bob", "bob: thanks"));

    assert_eq!(drain(&harness, Network::Discord), vec![webhook("bob", "thanks")]);
}

#[test]
fn irc_nick_of_a_discord_user_becomes_a_mention() {
    let harness = harness(16);
    // Alice speaks on Discord first, so IRC users know her as "Alice".
    harness.core.handle(discord("7", "Alice", "hi all"));
    drain(&harness, Network::Irc);

    harness.core.handle(irc("carol", "Alice: welcome back"));

    assert_eq!(
        drain(&harness, Network::Discord),
        vec![webhook("carol", "<@7>: welcome back")]
    );
}

#[test]
fn unresolved_mention_uses_discord_display_name() {
    let harness = harness(16);
    let mut event = discord("7", "Alice", "ping <@9>");
    if let InboundEvent::Discord(message) = &mut event {
        message.mentions = vec![MentionedUser {
            id: "9".to_string(),
            display_name: "Dora".to_string(),
        }];
    }

    harness.core.handle(event);

    assert_eq!(drain(&harness, Network::Irc), vec![privmsg("<Alice> ping Dora")]);
}

#[test]
fn multi_line_discord_message_becomes_ordered_privmsgs() {
    let harness = harness(16);

    harness.core.handle(discord("7", "Alice", "one\ntwo\nthree"));

    assert_eq!(
        drain(&harness, Network::Irc),
        vec![
            privmsg("<Alice> one"),
            privmsg("<Alice> two"),
            privmsg("<Alice> three"),
        ]
    );
}

#[test]
fn unmapped_and_echoed_events_are_ignored() {
    let harness = harness(16);
    let mut elsewhere = discord("7", "Alice", "wrong channel");
    if let InboundEvent::Discord(message) = &mut elsewhere {
        message.channel_id = "999".to_string();
    }
    let mut echo = irc("relaybot", "<Alice> hi");
    if let InboundEvent::Irc(message) = &mut echo {
        message.from_self = true;
    }

    harness.core.handle(elsewhere);
    harness.core.handle(echo);

    assert!(harness.queues.for_network(Network::Irc).is_empty());
    assert!(harness.queues.for_network(Network::Discord).is_empty());
    assert_eq!(harness.stats.snapshot(Network::Discord, 0, 0).ignored, 1);
    assert_eq!(harness.stats.snapshot(Network::Irc, 0, 0).ignored, 1);
}

#[tokio::test]
async fn per_origin_order_is_preserved_through_the_dispatcher() {
    let harness = harness(64);
    let sink = Arc::new(RecordingSink::default());
    let (_link_tx, link_rx) = watch::channel(connected(sink.clone()));
    let (stop, handle) = spawn_dispatcher(&harness, Network::Irc, link_rx);

    for n in 0..20 {
        harness.core.handle(discord("7", "Alice", &format!("message {n}")));
    }

    let expected: Vec<_> = (0..20)
        .map(|n| privmsg(&format!("<Alice> message {n}")))
        .collect();
    assert_eq!(sink.wait_for(20).await, expected);

    stop.send(true).expect("dispatcher alive");
    handle.await.expect("dispatcher task");
}

#[tokio::test]
async fn messages_queued_while_disconnected_are_delivered_on_reconnect() {
    let harness = harness(3);
    let (link_tx, link_rx) = watch::channel(LinkState::without_sink(ConnectionState::Backoff));
    let (stop, handle) = spawn_dispatcher(&harness, Network::Discord, link_rx);

    for n in 1..=5 {
        harness.core.handle(irc("bob", &format!("line {n}")));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let queue = harness.queues.for_network(Network::Discord);
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.dropped(), 2);

    let sink = Arc::new(RecordingSink::default());
    link_tx.send_replace(connected(sink.clone()));

    assert_eq!(
        sink.wait_for(3).await,
        vec![
            webhook("bob", "line 3"),
            webhook("bob", "line 4"),
            webhook("bob", "line 5"),
        ]
    );

    stop.send(true).expect("dispatcher alive");
    handle.await.expect("dispatcher task");
}

#[tokio::test]
async fn transient_failure_is_retried_in_order() {
    let harness = harness(16);
    let sink = Arc::new(RecordingSink::failing_with(vec![DeliveryError::Transient(
        "429".to_string(),
    )]));
    let (_link_tx, link_rx) = watch::channel(connected(sink.clone()));
    let (stop, handle) = spawn_dispatcher(&harness, Network::Discord, link_rx);

    harness.core.handle(irc("bob", "first"));
    harness.core.handle(irc("bob", "second"));

    assert_eq!(
        sink.wait_for(2).await,
        vec![webhook("bob", "first"), webhook("bob", "second")]
    );
    assert_eq!(sink.attempts.load(Ordering::Relaxed), 3);

    stop.send(true).expect("dispatcher alive");
    handle.await.expect("dispatcher task");
}

#[tokio::test]
async fn rejected_unit_is_dropped_and_counted() {
    let harness = harness(16);
    let sink = Arc::new(RecordingSink::failing_with(vec![DeliveryError::Rejected(
        "400".to_string(),
    )]));
    let (_link_tx, link_rx) = watch::channel(connected(sink.clone()));
    let (stop, handle) = spawn_dispatcher(&harness, Network::Discord, link_rx);

    harness.core.handle(irc("bob", "bad"));
    harness.core.handle(irc("bob", "good"));

    assert_eq!(sink.wait_for(1).await, vec![webhook("bob", "good")]);
    assert_eq!(harness.stats.snapshot(Network::Discord, 0, 0).rejected, 1);

    stop.send(true).expect("dispatcher alive");
    handle.await.expect("dispatcher task");
}

#[tokio::test]
async fn shutdown_drains_queue_while_connected() {
    let harness = harness(16);
    harness.core.handle(discord("7", "Alice", "a\nb\nc"));
    let sink = Arc::new(RecordingSink::default());
    let (_link_tx, link_rx) = watch::channel(connected(sink.clone()));

    // Stop is already requested when the dispatcher starts.
    let (stop, handle) = spawn_dispatcher(&harness, Network::Irc, link_rx);
    stop.send(true).expect("dispatcher alive");
    handle.await.expect("dispatcher task");

    assert_eq!(
        sink.units(),
        vec![privmsg("<Alice> a"), privmsg("<Alice> b"), privmsg("<Alice> c")]
    );
    assert!(harness.queues.for_network(Network::Irc).is_empty());
}

#[tokio::test]
async fn shutdown_abandons_queue_without_a_sink() {
    let harness = harness(16);
    harness.core.handle(discord("7", "Alice", "stuck"));
    let (_link_tx, link_rx) = watch::channel(LinkState::without_sink(ConnectionState::Backoff));

    let (stop, handle) = spawn_dispatcher(&harness, Network::Irc, link_rx);
    stop.send(true).expect("dispatcher alive");
    handle.await.expect("dispatcher task");

    assert_eq!(harness.queues.for_network(Network::Irc).len(), 1);
}
