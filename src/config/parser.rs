use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use super::ConfigError;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub irc: IrcConfig,
    pub discord: DiscordConfig,
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub mentions: MentionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct IrcConfig {
    pub server: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    pub nickname: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_realname")]
    pub realname: String,
    /// Server password (PASS).
    #[serde(default)]
    pub password: Option<SecretString>,
    /// NickServ password.
    #[serde(default)]
    pub nick_password: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: SecretString,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub discord_channel_id: String,
    pub discord_webhook_url: String,
    pub irc_channel: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BucketConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_irc_bucket")]
    pub irc: BucketConfig,
    #[serde(default = "default_discord_bucket")]
    pub discord: BucketConfig,
    #[serde(default = "default_max_admission_wait_ms")]
    pub max_admission_wait_ms: u64,
    #[serde(default = "default_outbound_queue_depth")]
    pub outbound_queue_depth: usize,
    #[serde(default = "default_inbound_queue_depth")]
    pub inbound_queue_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            irc: default_irc_bucket(),
            discord: default_discord_bucket(),
            max_admission_wait_ms: default_max_admission_wait_ms(),
            outbound_queue_depth: default_outbound_queue_depth(),
            inbound_queue_depth: default_inbound_queue_depth(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_reset_after_secs")]
    pub reset_after_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            reset_after_secs: default_reset_after_secs(),
            max_retries: default_max_retries(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MentionsConfig {
    #[serde(default = "default_mention_capacity")]
    pub capacity: u64,
    #[serde(default = "default_mention_idle_expiry_secs")]
    pub idle_expiry_secs: u64,
}

impl Default for MentionsConfig {
    fn default() -> Self {
        Self {
            capacity: default_mention_capacity(),
            idle_expiry_secs: default_mention_idle_expiry_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<String>,
    /// Verbose logging from the Discord gateway client.
    #[serde(default = "default_true")]
    pub discord: bool,
    /// Verbose logging from the IRC client.
    #[serde(default = "default_true")]
    pub irc: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
            discord: true,
            irc: true,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("RELAY_DISCORD_BOT_TOKEN") {
            self.discord.bot_token = SecretString::from(value);
        }
        if let Ok(value) = std::env::var("RELAY_IRC_PASSWORD") {
            self.irc.password = Some(SecretString::from(value));
        }
    }

    pub fn irc_username(&self) -> &str {
        self.irc.username.as_deref().unwrap_or(&self.irc.nickname)
    }
}

fn default_irc_port() -> u16 {
    6697
}

fn default_use_tls() -> bool {
    true
}

fn default_realname() -> String {
    "Discord Relay Bot".to_string()
}

fn default_irc_bucket() -> BucketConfig {
    BucketConfig {
        capacity: 4,
        refill_per_second: 0.5,
    }
}

fn default_discord_bucket() -> BucketConfig {
    BucketConfig {
        capacity: 5,
        refill_per_second: 2.5,
    }
}

fn default_max_admission_wait_ms() -> u64 {
    10_000
}

fn default_outbound_queue_depth() -> usize {
    200
}

fn default_inbound_queue_depth() -> usize {
    1024
}

fn default_backoff_min_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_reset_after_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    10
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_mention_capacity() -> u64 {
    2048
}

fn default_mention_idle_expiry_secs() -> u64 {
    86_400
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_true() -> bool {
    true
}
