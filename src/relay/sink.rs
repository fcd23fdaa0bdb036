use async_trait::async_trait;
use thiserror::Error;

use crate::model::Network;

/// One send on a destination network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundUnit {
    IrcPrivmsg {
        channel: String,
        text: String,
    },
    DiscordWebhook {
        webhook_url: String,
        username: String,
        content: String,
    },
}

impl OutboundUnit {
    pub fn destination(&self) -> Network {
        match self {
            Self::IrcPrivmsg { .. } => Network::Irc,
            Self::DiscordWebhook { .. } => Network::Discord,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Worth retrying: the unit goes back to the front of its queue.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// The live send side of a connected session.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn deliver(&self, unit: &OutboundUnit) -> Result<(), DeliveryError>;
}
