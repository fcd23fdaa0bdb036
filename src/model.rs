use std::fmt;

use tokio::time::Instant;

pub mod format;

pub use self::format::{Rendered, format_for, parse_relayed_line};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Discord,
    Irc,
}

impl Network {
    pub fn opposite(self) -> Self {
        match self {
            Network::Discord => Network::Irc,
            Network::Irc => Network::Discord,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Discord => "discord",
            Network::Irc => "irc",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Action,
}

/// A user referenced by a Discord mention token, as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionedUser {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct DiscordInbound {
    pub channel_id: String,
    pub author_id: String,
    pub author_display_name: String,
    pub content: String,
    pub attachments: Vec<String>,
    pub mentions: Vec<MentionedUser>,
    /// Bot accounts and webhooks, including our own relay webhooks.
    pub from_bot: bool,
    /// Joins, pins, boosts and other non-chat message types.
    pub system: bool,
    pub received_at: Instant,
}

#[derive(Debug, Clone)]
pub struct IrcInbound {
    pub channel: String,
    pub nick: String,
    pub text: String,
    pub from_self: bool,
    pub received_at: Instant,
}

/// Raw event as delivered by one of the network adapters.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Discord(DiscordInbound),
    Irc(IrcInbound),
}

impl InboundEvent {
    pub fn origin(&self) -> Network {
        match self {
            InboundEvent::Discord(_) => Network::Discord,
            InboundEvent::Irc(_) => Network::Irc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub origin: Network,
    pub channel_id: String,
    pub sender: String,
    pub sender_handle: String,
    pub body: String,
    pub kind: MessageKind,
    pub mentions: Vec<MentionedUser>,
    pub timestamp: Instant,
}

#[derive(Debug, Clone)]
pub enum Normalized {
    Event(ChatEvent),
    Ignore,
}

const CTCP_DELIM: char = '\u{1}';

/// Maps a raw adapter event onto the common model. Never fails: anything that
/// should not cross the bridge becomes [`Normalized::Ignore`].
pub fn normalize(event: InboundEvent) -> Normalized {
    match event {
        InboundEvent::Discord(message) => normalize_discord(message),
        InboundEvent::Irc(message) => normalize_irc(message),
    }
}

fn normalize_discord(message: DiscordInbound) -> Normalized {
    if message.from_bot || message.system {
        return Normalized::Ignore;
    }

    // Markup goes before mention translation so substituted nicks stay verbatim.
    let mut body = format::discord_plain_text(message.content.trim_end());
    for url in &message.attachments {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(url);
    }

    if body.trim().is_empty() || message.author_id.is_empty() {
        return Normalized::Ignore;
    }

    let sender = match message.author_display_name.trim() {
        "" => message.author_id.clone(),
        name => name.to_string(),
    };

    Normalized::Event(ChatEvent {
        origin: Network::Discord,
        channel_id: message.channel_id,
        sender,
        sender_handle: message.author_id,
        body,
        kind: MessageKind::Text,
        mentions: message.mentions,
        timestamp: message.received_at,
    })
}

fn normalize_irc(message: IrcInbound) -> Normalized {
    if message.from_self || message.nick.is_empty() || !is_channel_name(&message.channel) {
        return Normalized::Ignore;
    }

    let (kind, body) = match parse_ctcp(&message.text) {
        Some(("ACTION", args)) => (MessageKind::Action, args.to_string()),
        Some(_) => return Normalized::Ignore,
        None => (MessageKind::Text, message.text),
    };

    if body.trim().is_empty() {
        return Normalized::Ignore;
    }

    Normalized::Event(ChatEvent {
        origin: Network::Irc,
        channel_id: message.channel,
        sender: message.nick.clone(),
        sender_handle: message.nick,
        body,
        kind,
        mentions: Vec::new(),
        timestamp: message.received_at,
    })
}

fn parse_ctcp(text: &str) -> Option<(&str, &str)> {
    let inner = text.strip_prefix(CTCP_DELIM)?;
    let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
    Some(inner.split_once(' ').unwrap_or((inner, "")))
}

pub fn is_channel_name(name: &str) -> bool {
    name.starts_with('#') || name.starts_with('&')
}

/// RFC 1459 case folding, as used by IRC servers for nicks and channels.
pub fn irc_casefold(name: &str) -> String {
    name.chars()
        .map(|ch| match ch {
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '~' => '^',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}
