use std::sync::Arc;

use ::irc::client::prelude::{
    Client, Command, Config as ClientConfig, Message, Response, Sender as IrcSender,
};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::IrcConfig;
use crate::model::{InboundEvent, IrcInbound, Network, irc_casefold, is_channel_name};
use crate::relay::{DeliveryError, OutboundSink, OutboundUnit};
use crate::supervisor::{Connector, SessionError, SessionLink};

const QUIT_MESSAGE: &str = "relay shutting down";

pub struct IrcConnector {
    client_config: ClientConfig,
    sender: Mutex<Option<IrcSender>>,
}

impl IrcConnector {
    pub fn new(config: &IrcConfig, username: &str, channels: Vec<String>) -> Self {
        let nickname = config.nickname.clone();
        let client_config = ClientConfig {
            alt_nicks: vec![format!("{nickname}_"), format!("{nickname}__")],
            nickname: Some(nickname),
            username: Some(username.to_string()),
            realname: Some(config.realname.clone()),
            server: Some(config.server.clone()),
            port: Some(config.port),
            use_tls: Some(config.use_tls),
            password: config
                .password
                .as_ref()
                .map(|secret| secret.expose_secret().to_string()),
            nick_password: config
                .nick_password
                .as_ref()
                .map(|secret| secret.expose_secret().to_string()),
            channels,
            ..ClientConfig::default()
        };

        Self {
            client_config,
            sender: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for IrcConnector {
    fn network(&self) -> Network {
        Network::Irc
    }

    async fn run_session(&self, link: SessionLink) -> Result<(), SessionError> {
        let mut client = Client::from_config(self.client_config.clone())
            .await
            .map_err(|err| SessionError::Connect(err.to_string()))?;
        client
            .identify()
            .map_err(|err| SessionError::Connect(err.to_string()))?;
        let mut stream = client
            .stream()
            .map_err(|err| SessionError::Connect(err.to_string()))?;

        let sender = client.sender();
        *self.sender.lock() = Some(sender.clone());
        let sink: Arc<dyn OutboundSink> = Arc::new(IrcSink { sender });
        info!(server = ?self.client_config.server, "irc connection opened");

        let outcome = loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(err)) => break Err(SessionError::Closed(err.to_string())),
                None => break Err(SessionError::Closed("irc stream ended".to_string())),
            };

            match classify(&message, client.current_nickname()) {
                ServerEvent::Registered => {
                    info!(nick = client.current_nickname(), "irc registration complete");
                    link.connected(sink.clone());
                }
                ServerEvent::Privmsg(inbound) => {
                    if !link.deliver(InboundEvent::Irc(inbound)).await {
                        break Ok(());
                    }
                }
                ServerEvent::Direct { command, from, text } => {
                    info!(%command, %from, %text, "irc message addressed to the relay");
                }
                ServerEvent::Refused(reason) => break Err(SessionError::Fatal(reason)),
                ServerEvent::Error(reason) => break Err(SessionError::Closed(reason)),
                ServerEvent::Other => {}
            }
        };

        self.sender.lock().take();
        outcome
    }

    async fn shutdown(&self) {
        let sender = self.sender.lock().take();
        if let Some(sender) = sender
            && let Err(err) = sender.send_quit(QUIT_MESSAGE)
        {
            warn!(error = %err, "failed to send irc QUIT");
        }
    }
}

#[derive(Debug)]
enum ServerEvent {
    /// Registration finished; the server accepts commands from us now.
    Registered,
    Privmsg(IrcInbound),
    /// A private message or notice addressed to us; logged, never relayed.
    Direct {
        command: &'static str,
        from: String,
        text: String,
    },
    /// The server refused us in a way retrying will not fix.
    Refused(String),
    Error(String),
    Other,
}

fn classify(message: &Message, own_nick: &str) -> ServerEvent {
    match &message.command {
        Command::Response(Response::RPL_ENDOFMOTD | Response::ERR_NOMOTD, _) => {
            ServerEvent::Registered
        }
        Command::Response(Response::ERR_PASSWDMISMATCH, _) => {
            ServerEvent::Refused("irc server rejected the password".to_string())
        }
        Command::ERROR(reason) => ServerEvent::Error(reason.clone()),
        Command::PRIVMSG(target, text) if !is_channel_name(target) => ServerEvent::Direct {
            command: "PRIVMSG",
            from: message.source_nickname().unwrap_or_default().to_string(),
            text: text.clone(),
        },
        Command::NOTICE(_, text) => ServerEvent::Direct {
            command: "NOTICE",
            from: message.source_nickname().unwrap_or_default().to_string(),
            text: text.clone(),
        },
        Command::PRIVMSG(target, text) => match message.source_nickname() {
            Some(nick) => ServerEvent::Privmsg(IrcInbound {
                channel: target.clone(),
                nick: nick.to_string(),
                text: text.clone(),
                from_self: irc_casefold(nick) == irc_casefold(own_nick),
                received_at: Instant::now(),
            }),
            None => {
                debug!("ignoring PRIVMSG without a source nick");
                ServerEvent::Other
            }
        },
        _ => ServerEvent::Other,
    }
}

struct IrcSink {
    sender: IrcSender,
}

#[async_trait]
impl OutboundSink for IrcSink {
    async fn deliver(&self, unit: &OutboundUnit) -> Result<(), DeliveryError> {
        match unit {
            OutboundUnit::IrcPrivmsg { channel, text } => self
                .sender
                .send_privmsg(channel, text)
                .map_err(|err| DeliveryError::Transient(err.to_string())),
            other => Err(DeliveryError::Rejected(format!(
                "irc cannot deliver a unit for {}",
                other.destination()
            ))),
        }
    }
}
