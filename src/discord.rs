use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serenity::all::{
    Client as SerenityClient, ConnectionStage, Context as SerenityContext,
    EventHandler as SerenityEventHandler, GatewayError, GatewayIntents,
    Message as SerenityMessage, MessageType, Ready, ResumedEvent, ShardManager,
    ShardStageUpdateEvent,
};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::DiscordConfig;
use crate::model::{DiscordInbound, InboundEvent, MentionedUser, Network};
use crate::relay::OutboundSink;
use crate::supervisor::{Connector, SessionError, SessionLink};

pub mod webhook;

pub use self::webhook::WebhookSink;

struct RelayEventHandler {
    link: SessionLink,
    sink: Arc<dyn OutboundSink>,
}

#[serenity::async_trait]
impl SerenityEventHandler for RelayEventHandler {
    async fn ready(&self, _ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({})",
            ready.user.name, ready.user.id
        );
        self.link.connected(self.sink.clone());
    }

    async fn resume(&self, _ctx: SerenityContext, _event: ResumedEvent) {
        debug!("discord gateway session resumed");
        self.link.connected(self.sink.clone());
    }

    async fn shard_stage_update(&self, _ctx: SerenityContext, event: ShardStageUpdateEvent) {
        if event.new != ConnectionStage::Connected {
            debug!(old = ?event.old, new = ?event.new, "discord shard stage changed");
            self.link.reconnecting();
        }
    }

    async fn message(&self, _ctx: SerenityContext, msg: SerenityMessage) {
        self.link
            .deliver(InboundEvent::Discord(inbound_from_message(&msg)))
            .await;
    }
}

/// Flattens a gateway message into what the relay needs. Filtering of bots,
/// webhooks and system messages happens in normalization.
fn inbound_from_message(msg: &SerenityMessage) -> DiscordInbound {
    let author_display_name = msg
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .or_else(|| msg.author.global_name.clone())
        .unwrap_or_else(|| msg.author.name.clone());

    let mentions = msg
        .mentions
        .iter()
        .map(|user| MentionedUser {
            id: user.id.to_string(),
            display_name: user.global_name.clone().unwrap_or_else(|| user.name.clone()),
        })
        .collect();

    DiscordInbound {
        channel_id: msg.channel_id.to_string(),
        author_id: msg.author.id.to_string(),
        author_display_name,
        content: msg.content.clone(),
        attachments: msg.attachments.iter().map(|a| a.url.clone()).collect(),
        mentions,
        from_bot: msg.author.bot || msg.webhook_id.is_some(),
        system: !matches!(msg.kind, MessageType::Regular | MessageType::InlineReply),
        received_at: Instant::now(),
    }
}

pub struct DiscordConnector {
    token: SecretString,
    sink: Arc<WebhookSink>,
    shard_manager: Mutex<Option<Arc<ShardManager>>>,
}

impl DiscordConnector {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        info!("initializing discord client");
        let sink = WebhookSink::new().context("failed to build webhook http client")?;
        Ok(Self {
            token: SecretString::from(config.bot_token.expose_secret().to_string()),
            sink: Arc::new(sink),
            shard_manager: Mutex::new(None),
        })
    }

    fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT
    }
}

#[async_trait]
impl Connector for DiscordConnector {
    fn network(&self) -> Network {
        Network::Discord
    }

    async fn run_session(&self, link: SessionLink) -> Result<(), SessionError> {
        let handler = RelayEventHandler {
            link,
            sink: self.sink.clone(),
        };
        let mut client = SerenityClient::builder(self.token.expose_secret(), Self::intents())
            .event_handler(handler)
            .await
            .map_err(|err| SessionError::Connect(format!("failed to build discord gateway client: {err}")))?;

        *self.shard_manager.lock() = Some(client.shard_manager.clone());
        let result = client.start().await;
        self.shard_manager.lock().take();

        match result {
            Ok(()) => Err(SessionError::Closed("discord gateway stopped".to_string())),
            Err(err) => Err(classify_gateway_error(err)),
        }
    }

    async fn shutdown(&self) {
        let shard_manager = self.shard_manager.lock().take();
        if let Some(shard_manager) = shard_manager {
            shard_manager.shutdown_all().await;
            info!("discord gateway shut down");
        }
    }
}

fn classify_gateway_error(err: serenity::Error) -> SessionError {
    match err {
        serenity::Error::Gateway(
            GatewayError::InvalidAuthentication
            | GatewayError::InvalidGatewayIntents
            | GatewayError::DisallowedGatewayIntents,
        ) => SessionError::Fatal(format!("discord refused the bot: {err}")),
        err => SessionError::Connect(err.to_string()),
    }
}
