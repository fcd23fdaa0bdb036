use std::collections::HashMap;

use crate::config::ChannelConfig;
use crate::model::{Network, irc_casefold};

/// The fixed set of Discord/IRC channel pairs, looked up from either side.
#[derive(Debug)]
pub struct ChannelMap {
    pairs: Vec<ChannelConfig>,
    by_discord: HashMap<String, usize>,
    by_irc: HashMap<String, usize>,
}

impl ChannelMap {
    pub fn new(pairs: Vec<ChannelConfig>) -> Self {
        let by_discord = pairs
            .iter()
            .enumerate()
            .map(|(position, pair)| (pair.discord_channel_id.trim().to_string(), position))
            .collect();
        let by_irc = pairs
            .iter()
            .enumerate()
            .map(|(position, pair)| (irc_casefold(&pair.irc_channel), position))
            .collect();

        Self {
            pairs,
            by_discord,
            by_irc,
        }
    }

    /// The pair an event from `origin` in `channel_id` belongs to.
    pub fn route(&self, origin: Network, channel_id: &str) -> Option<&ChannelConfig> {
        let position = match origin {
            Network::Discord => self.by_discord.get(channel_id),
            Network::Irc => self.by_irc.get(&irc_casefold(channel_id)),
        }?;
        self.pairs.get(*position)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}
