use std::collections::HashSet;

use secrecy::ExposeSecret;
use thiserror::Error;
use url::Url;

use super::Config;
use crate::model::{irc_casefold, is_channel_name};
use crate::ratelimit::refill_period;

/// One year; the mention cache rejects idle periods far beyond any useful value.
const MAX_MENTION_IDLE_EXPIRY_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfig(message.into())
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.irc.server.trim().is_empty() {
            return Err(invalid("irc.server cannot be empty"));
        }
        if self.irc.nickname.trim().is_empty() || self.irc.nickname.contains(' ') {
            return Err(invalid("irc.nickname must be a single non-empty word"));
        }
        if self.irc.port == 0 {
            return Err(invalid("irc.port must be between 1 and 65535"));
        }
        if self.discord.bot_token.expose_secret().trim().is_empty() {
            return Err(invalid("discord.bot_token cannot be empty"));
        }

        self.validate_channels()?;

        for (name, bucket) in [("irc", &self.limits.irc), ("discord", &self.limits.discord)] {
            if bucket.capacity == 0 {
                return Err(invalid(format!("limits.{name}.capacity must be positive")));
            }
            if !bucket.refill_per_second.is_finite() || bucket.refill_per_second <= 0.0 {
                return Err(invalid(format!(
                    "limits.{name}.refill_per_second must be positive"
                )));
            }
            if refill_period(bucket.refill_per_second).is_none() {
                return Err(invalid(format!(
                    "limits.{name}.refill_per_second {} is out of range",
                    bucket.refill_per_second
                )));
            }
        }
        if self.limits.outbound_queue_depth == 0 || self.limits.inbound_queue_depth == 0 {
            return Err(invalid("limits queue depths must be positive"));
        }

        let supervisor = &self.supervisor;
        if supervisor.backoff_min_ms == 0 || supervisor.backoff_min_ms > supervisor.backoff_max_ms {
            return Err(invalid(
                "supervisor.backoff_min_ms must be positive and not above backoff_max_ms",
            ));
        }
        if supervisor.max_retries == 0 {
            return Err(invalid("supervisor.max_retries must be at least 1"));
        }

        if self.mentions.capacity == 0 {
            return Err(invalid("mentions.capacity must be positive"));
        }
        if self.mentions.idle_expiry_secs == 0
            || self.mentions.idle_expiry_secs > MAX_MENTION_IDLE_EXPIRY_SECS
        {
            return Err(invalid(format!(
                "mentions.idle_expiry_secs must be between 1 and {MAX_MENTION_IDLE_EXPIRY_SECS}"
            )));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(invalid(format!(
                    "logging.format must be \"pretty\" or \"json\", got \"{other}\""
                )));
            }
        }

        Ok(())
    }

    fn validate_channels(&self) -> Result<(), ConfigError> {
        if self.channels.is_empty() {
            return Err(invalid("at least one channel pair must be configured"));
        }

        let mut discord_ids = HashSet::new();
        let mut irc_channels = HashSet::new();
        for (position, pair) in self.channels.iter().enumerate() {
            let id = pair.discord_channel_id.trim();
            if id.is_empty() || !id.chars().all(|ch| ch.is_ascii_digit()) {
                return Err(invalid(format!(
                    "channels[{position}].discord_channel_id must be a numeric id"
                )));
            }

            let webhook = Url::parse(&pair.discord_webhook_url).map_err(|err| {
                invalid(format!(
                    "channels[{position}].discord_webhook_url is not a valid url: {err}"
                ))
            })?;
            if !matches!(webhook.scheme(), "https" | "http") {
                return Err(invalid(format!(
                    "channels[{position}].discord_webhook_url must use http(s)"
                )));
            }

            if !is_channel_name(&pair.irc_channel) || pair.irc_channel.contains(' ') {
                return Err(invalid(format!(
                    "channels[{position}].irc_channel must start with '#' or '&'"
                )));
            }

            if !discord_ids.insert(id.to_string()) {
                return Err(invalid(format!(
                    "discord channel {id} is paired more than once"
                )));
            }
            if !irc_channels.insert(irc_casefold(&pair.irc_channel)) {
                return Err(invalid(format!(
                    "irc channel {} is paired more than once",
                    pair.irc_channel
                )));
            }
        }

        Ok(())
    }
}
