use std::time::Duration;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::debug;

use crate::config::MentionsConfig;
use crate::model::irc_casefold;

/// Bidirectional `discord_id <-> irc_nick` map, learned from observed senders.
///
/// Every direction is an LRU-bounded cache with idle expiry, so a long running
/// bridge with churny membership keeps a bounded footprint. A stale or evicted
/// entry only means a mention is not translated.
///
/// Conflicts resolve as last-observed-wins: linking a nick that already
/// belongs to another ID moves it, and the previous owner loses its entry.
pub struct MentionIndex {
    nick_by_id: Cache<String, String>,
    id_by_nick: Cache<String, String>,
    // Casefolded name -> Discord ID, used to pick up the exact IRC casing
    // once the same person speaks on IRC.
    id_by_folded: Cache<String, String>,
}

impl MentionIndex {
    pub fn new(capacity: u64, idle_expiry: Duration) -> Self {
        let build = || {
            Cache::builder()
                .max_capacity(capacity)
                .time_to_idle(idle_expiry)
                .eviction_policy(EvictionPolicy::lru())
                .build()
        };
        Self {
            nick_by_id: build(),
            id_by_nick: build(),
            id_by_folded: build(),
        }
    }

    pub fn from_config(config: &MentionsConfig) -> Self {
        Self::new(
            config.capacity,
            Duration::from_secs(config.idle_expiry_secs),
        )
    }

    /// Records a Discord sender. Until the same person is seen on IRC, they are
    /// known there by their display name.
    pub fn observe_discord(&self, discord_id: &str, display_name: &str) {
        let nick = nick_for_display_name(display_name);
        if discord_id.is_empty() || nick.is_empty() {
            return;
        }

        let folded = irc_casefold(&nick);
        if let Some(existing) = self.nick_by_id.get(discord_id)
            && irc_casefold(&existing) == folded
        {
            // Keep a casing already confirmed by IRC; touch the entries.
            self.link(discord_id, &existing);
        } else {
            self.link(discord_id, &nick);
        }
        self.id_by_folded.insert(folded, discord_id.to_string());
    }

    /// Records an IRC sender. IRC nick casing is authoritative: a Discord
    /// identity whose name folds to the same nick is re-linked to it.
    pub fn observe_irc(&self, nick: &str) {
        let Some(discord_id) = self.id_by_folded.get(&irc_casefold(nick)) else {
            return;
        };
        if self.nick_by_id.get(&discord_id).as_deref() != Some(nick) {
            debug!(discord_id = %discord_id, nick, "linking discord user to irc nick");
        }
        self.link(&discord_id, nick);
    }

    pub fn link(&self, discord_id: &str, nick: &str) {
        if let Some(previous_nick) = self.nick_by_id.get(discord_id)
            && previous_nick != nick
            && self.id_by_nick.get(&previous_nick).as_deref() == Some(discord_id)
        {
            self.id_by_nick.invalidate(&previous_nick);
        }

        if let Some(previous_id) = self.id_by_nick.get(nick)
            && previous_id != discord_id
            && self.nick_by_id.get(&previous_id).as_deref() == Some(nick)
        {
            self.nick_by_id.invalidate(&previous_id);
        }

        self.nick_by_id
            .insert(discord_id.to_string(), nick.to_string());
        self.id_by_nick
            .insert(nick.to_string(), discord_id.to_string());
    }

    pub fn nick_for(&self, discord_id: &str) -> Option<String> {
        self.nick_by_id.get(discord_id)
    }

    /// Case-sensitive: `Bob` and `bob` are different nicks here.
    pub fn discord_id_for(&self, nick: &str) -> Option<String> {
        self.id_by_nick.get(nick)
    }

    pub fn len(&self) -> u64 {
        self.nick_by_id.run_pending_tasks();
        self.nick_by_id.entry_count()
    }
}

fn nick_for_display_name(display_name: &str) -> String {
    display_name.split_whitespace().collect::<Vec<_>>().join("_")
}
