pub use self::parser::{
    BucketConfig, ChannelConfig, Config, DiscordConfig, IrcConfig, LimitsConfig, LoggingConfig,
    MentionsConfig, SupervisorConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
