use once_cell::sync::Lazy;
use regex::Regex;

use super::{ChatEvent, MessageKind, Network};

/// Payload bytes we allow per PRIVMSG, leaving room for the server-added
/// prefix and the `PRIVMSG #channel :` framing inside the 512 byte limit.
pub const IRC_LINE_BUDGET: usize = 400;
pub const DISCORD_CONTENT_LIMIT: usize = 2000;
pub const DISCORD_USERNAME_MAX: usize = 80;

const MIN_IRC_CHUNK: usize = 64;

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static UNDERLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.+?)__").unwrap());
static STRIKETHROUGH: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~(.+?)~~").unwrap());
static SPOILER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\|\|(.+?)\|\|").unwrap());
static ITALIC_STAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*([^*\s](?:[^*]*[^*\s])?)\*").unwrap());
// Word boundaries keep snake_case identifiers intact.
static ITALIC_UNDERSCORE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b_([^_\s](?:[^_]*[^_\s])?)_\b").unwrap());
static CUSTOM_EMOJI: Lazy<Regex> = Lazy::new(|| Regex::new(r"<a?:(\w+):\d+>").unwrap());
static IRC_FORMATTING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\x03(?:\d{1,2}(?:,\d{1,2})?)?|\x04(?:[0-9a-fA-F]{6}(?:,[0-9a-fA-F]{6})?)?|[\x02\x0F\x11\x16\x1D\x1E\x1F]",
    )
    .unwrap()
});

/// One outbound unit, already shaped for its destination network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    IrcLine(String),
    Webhook { username: String, content: String },
}

/// Renders an event for `destination`. IRC gets one `<sender> text` line per
/// body line; Discord gets webhook posts carrying the sender as username.
pub fn format_for(event: &ChatEvent, destination: Network) -> Vec<Rendered> {
    match destination {
        Network::Irc => render_irc(event),
        Network::Discord => render_discord(event),
    }
}

/// Splits a relayed IRC line back into `(sender, body)`.
///
/// The split is at the first `"> "`, so bodies may contain that sequence
/// but a sender containing it cannot be recovered exactly. Trailing
/// whitespace of a body is not relayed and does not come back either.
pub fn parse_relayed_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix('<')?;
    let (sender, body) = rest.split_once("> ")?;
    if sender.is_empty() {
        return None;
    }
    Some((sender, body))
}

fn render_irc(event: &ChatEvent) -> Vec<Rendered> {
    let sender = single_line(&event.sender);
    let prefix = match event.kind {
        MessageKind::Text => format!("<{sender}> "),
        MessageKind::Action => format!("* {sender} "),
    };
    let budget = IRC_LINE_BUDGET
        .saturating_sub(prefix.len())
        .max(MIN_IRC_CHUNK);

    event
        .body
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .flat_map(|line| split_irc_line(line, budget))
        .map(|chunk| Rendered::IrcLine(format!("{prefix}{chunk}")))
        .collect()
}

fn render_discord(event: &ChatEvent) -> Vec<Rendered> {
    let username = clamp_username(&event.sender);
    let stripped = strip_irc_formatting(&event.body);
    let body = strip_self_address(&stripped, &event.sender_handle);
    let content = match event.kind {
        MessageKind::Text => body.to_string(),
        MessageKind::Action => format!("_{body}_"),
    };

    split_discord_content(&content, DISCORD_CONTENT_LIMIT)
        .into_iter()
        .map(|chunk| Rendered::Webhook {
            username: username.clone(),
            content: chunk,
        })
        .collect()
}

/// Discord message content as plain text: markdown emphasis removed and
/// custom emoji reduced to `:name:`.
pub fn discord_plain_text(text: &str) -> String {
    strip_discord_markdown(&replace_custom_emoji(text))
}

pub fn strip_discord_markdown(text: &str) -> String {
    let text = BOLD.replace_all(text, "$1");
    let text = UNDERLINE.replace_all(&text, "$1");
    let text = STRIKETHROUGH.replace_all(&text, "$1");
    let text = SPOILER.replace_all(&text, "$1");
    let text = ITALIC_STAR.replace_all(&text, "$1");
    ITALIC_UNDERSCORE.replace_all(&text, "$1").into_owned()
}

pub fn strip_irc_formatting(text: &str) -> String {
    IRC_FORMATTING.replace_all(text, "").into_owned()
}

fn replace_custom_emoji(text: &str) -> String {
    CUSTOM_EMOJI.replace_all(text, ":$1:").into_owned()
}

/// Drops a leading `nick: ` / `nick, ` where the nick is the sender itself;
/// the webhook username already carries it.
fn strip_self_address<'a>(body: &'a str, nick: &str) -> &'a str {
    for separator in [": ", ", "] {
        if let Some(rest) = body
            .strip_prefix(nick)
            .and_then(|rest| rest.strip_prefix(separator))
            && !rest.trim().is_empty()
        {
            return rest;
        }
    }
    body
}

fn single_line(text: &str) -> String {
    text.split(['\r', '\n']).collect::<Vec<_>>().join(" ")
}

fn clamp_username(name: &str) -> String {
    let name = single_line(name);
    let name = name.trim();
    if name.is_empty() {
        return "irc".to_string();
    }
    name.chars().take(DISCORD_USERNAME_MAX).collect()
}

fn split_irc_line(line: &str, budget: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = line;

    while rest.len() > budget {
        let mut cut = budget;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if let Some(space) = rest[..cut].rfind(' ')
            && !rest[..space].trim().is_empty()
        {
            cut = space;
        }
        let chunk = rest[..cut].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        rest = rest[cut..].trim_start();
    }

    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

fn split_discord_content(content: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in content.split_inclusive('\n') {
        for ch in line.chars() {
            if current_len == limit {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(ch);
            current_len += 1;
        }
        if current_len > limit / 2 && current.ends_with('\n') {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .map(|chunk| chunk.trim_end_matches('\n').to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}
