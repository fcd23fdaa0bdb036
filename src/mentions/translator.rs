use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::MentionIndex;
use crate::model::{MentionedUser, Network};

static DISCORD_USER_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"<@!?(\d+)>").unwrap());

// URLs and Discord tokens are matched first so that nothing inside them is
// ever rewritten; everything else is a candidate nick.
static IRC_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://\S+|<(?:@[!&]?|#)\d+>|[A-Za-z0-9\[\]\\`_^{|}\-]+").unwrap()
});

/// Per-message data the translator needs beyond the body itself.
#[derive(Debug, Clone, Copy)]
pub struct MentionContext<'a> {
    /// Origin-native sender id; never turned into a mention of itself.
    pub sender_handle: &'a str,
    /// Mention display names reported by Discord, used for unresolved tokens.
    pub mentioned: &'a [MentionedUser],
}

#[derive(Clone)]
pub struct MentionTranslator {
    index: Arc<MentionIndex>,
}

impl MentionTranslator {
    pub fn new(index: Arc<MentionIndex>) -> Self {
        Self { index }
    }

    /// Rewrites mentions in `body` for `destination`. A missing mapping only
    /// means a missed translation; this never fails.
    pub fn resolve_mentions(
        &self,
        body: &str,
        destination: Network,
        context: &MentionContext<'_>,
    ) -> String {
        match destination {
            Network::Irc => self.discord_to_irc(body, context),
            Network::Discord => self.irc_to_discord(body, context),
        }
    }

    fn discord_to_irc(&self, body: &str, context: &MentionContext<'_>) -> String {
        DISCORD_USER_MENTION
            .replace_all(body, |caps: &Captures<'_>| {
                let id = &caps[1];
                if let Some(nick) = self.index.nick_for(id) {
                    return nick;
                }
                context
                    .mentioned
                    .iter()
                    .find(|user| user.id == id)
                    .map(|user| user.display_name.clone())
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn irc_to_discord(&self, body: &str, context: &MentionContext<'_>) -> String {
        IRC_WORD
            .replace_all(body, |caps: &Captures<'_>| {
                let word = &caps[0];
                if !is_candidate_nick(word) || word == context.sender_handle {
                    return word.to_string();
                }
                match self.index.discord_id_for(word) {
                    Some(id) => format!("<@{id}>"),
                    None => word.to_string(),
                }
            })
            .into_owned()
    }
}

// Nicks cannot start with a digit or '-'; URLs and `<...>` tokens fail too.
fn is_candidate_nick(word: &str) -> bool {
    !word.contains("://")
        && word
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_alphabetic() || "[]\\`_^{|}".contains(ch))
}
