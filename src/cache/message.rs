use std::ops::{Deref, DerefMut};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::collection::Collection;
use super::{patch, snowflake};
use crate::error::CacheError;

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub author_id: Option<String>,
    pub content: String,
    pub timestamp: Option<String>,
    pub edited_timestamp: Option<String>,
    pub tts: bool,
    pub pinned: bool,
    pub mention_everyone: bool,
    /// Ids of the mentioned users.
    pub mentions: Vec<String>,
    /// Reactions keyed by [`ReactionEmoji::key`].
    pub reactions: Collection<MessageReaction>,
    /// Unix milliseconds, derived from the id.
    pub created_timestamp: i64,
}

impl Message {
    pub(crate) fn from_raw(data: &Value) -> Result<Self, CacheError> {
        let id = patch::id(data, "message")?;
        let channel_id = patch::string_field(data, "channel_id")
            .ok_or(CacheError::MissingField { kind: "message", field: "channel_id" })?;

        let mut message = Self {
            created_timestamp: snowflake::timestamp_ms(&id).unwrap_or_default(),
            id,
            channel_id,
            guild_id: patch::string_field(data, "guild_id"),
            author_id: data.get("author").and_then(|author| patch::string_field(author, "id")),
            content: String::new(),
            timestamp: None,
            edited_timestamp: None,
            tts: false,
            pinned: false,
            mention_everyone: false,
            mentions: Vec::new(),
            reactions: Collection::new(),
        };
        message.patch(data);

        for reaction in patch::array(data, "reactions") {
            if let Some(reaction) = MessageReaction::from_raw(reaction) {
                message.reactions.set(reaction.emoji.key(), reaction);
            }
        }
        Ok(message)
    }

    /// Applies a MESSAGE_UPDATE, which may carry nothing but the id and the embeds.
    pub(crate) fn patch(&mut self, data: &Value) {
        patch::string(&mut self.content, data, "content");
        patch::optional_string(&mut self.timestamp, data, "timestamp");
        patch::optional_string(&mut self.edited_timestamp, data, "edited_timestamp");
        patch::boolean(&mut self.tts, data, "tts");
        patch::boolean(&mut self.pinned, data, "pinned");
        patch::boolean(&mut self.mention_everyone, data, "mention_everyone");
        if let Some(mentions) = data.get("mentions").and_then(Value::as_array) {
            self.mentions = mentions.iter().filter_map(|user| patch::string_field(user, "id")).collect();
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        snowflake::created_at(&self.id)
    }

    /// Counts a reaction by `user_id` and returns the updated reaction.
    pub(crate) fn add_reaction(&mut self, emoji: ReactionEmoji, user_id: &str, by_client: bool) -> &MessageReaction {
        let key = emoji.key();
        let reaction = self.reactions.get_or_insert_with(key, || MessageReaction {
            emoji,
            count: 0,
            me: false,
            users: Vec::new(),
        });
        if !reaction.users.iter().any(|user| user == user_id) {
            reaction.count += 1;
            reaction.users.push(user_id.to_owned());
        }
        reaction.me |= by_client;
        reaction
    }

    /// Removes a user's reaction. The returned snapshot reflects the state after removal.
    pub(crate) fn remove_reaction(&mut self, key: &str, user_id: &str, by_client: bool) -> Option<MessageReaction> {
        let reaction = self.reactions.get_mut(key)?;
        reaction.count = reaction.count.saturating_sub(1);
        reaction.users.retain(|user| user != user_id);
        if by_client {
            reaction.me = false;
        }

        let snapshot = reaction.clone();
        if snapshot.count == 0 {
            self.reactions.delete(key);
        }
        Some(snapshot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEmoji {
    /// Absent for unicode emojis.
    pub id: Option<String>,
    pub name: String,
}

impl ReactionEmoji {
    pub fn from_raw(data: &Value) -> Option<Self> {
        Some(Self {
            id: patch::string_field(data, "id"),
            name: data.get("name")?.as_str()?.to_owned(),
        })
    }

    /// Custom emojis are keyed by id, unicode ones by name.
    pub fn key(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.name.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageReaction {
    pub emoji: ReactionEmoji,
    pub count: u64,
    /// Whether the client user reacted.
    pub me: bool,
    /// Users seen reacting through the gateway.
    pub users: Vec<String>,
}

impl MessageReaction {
    fn from_raw(data: &Value) -> Option<Self> {
        Some(Self {
            emoji: ReactionEmoji::from_raw(data.get("emoji")?)?,
            count: data.get("count").and_then(Value::as_u64).unwrap_or(0),
            me: data.get("me").and_then(Value::as_bool).unwrap_or(false),
            users: Vec::new(),
        })
    }
}

/// Message history of one channel.
#[derive(Debug, Clone, Default)]
pub struct MessageCollection {
    messages: Collection<Message>,
}

impl MessageCollection {
    /// Evicts every message older than `lifetime`. A zero lifetime empties the collection.
    pub fn sweep(&mut self, lifetime: Duration, now: DateTime<Utc>) -> usize {
        if lifetime.is_zero() {
            let amount = self.messages.len();
            self.messages.clear();
            return amount;
        }

        // a lifetime too long to express in milliseconds keeps everything
        let Some(cutoff) = i64::try_from(lifetime.as_millis())
            .ok()
            .and_then(|lifetime| now.timestamp_millis().checked_sub(lifetime))
        else {
            return 0;
        };
        self.messages.retain(|_, message| message.created_timestamp >= cutoff)
    }
}

impl Deref for MessageCollection {
    type Target = Collection<Message>;

    fn deref(&self) -> &Self::Target {
        &self.messages
    }
}

impl DerefMut for MessageCollection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn message_at(unix_ms: i64) -> Message {
        Message::from_raw(&json!({
            "id": snowflake::from_timestamp_ms(unix_ms),
            "channel_id": "1",
            "content": "hi",
            "author": {"id": "2"}
        })).unwrap()
    }

    #[test]
    fn sweep_evicts_old_messages_only() {
        let now = Utc.timestamp_millis_opt(1_600_000_000_000).unwrap();
        let mut messages = MessageCollection::default();
        for age_secs in [10, 100, 1000] {
            let message = message_at(now.timestamp_millis() - age_secs * 1000);
            messages.set(message.id.clone(), message);
        }

        assert_eq!(messages.sweep(Duration::from_secs(60), now), 2);
        assert_eq!(messages.len(), 1);
        // nothing new arrived, nothing left to evict
        assert_eq!(messages.sweep(Duration::from_secs(60), now), 0);
    }

    #[test]
    fn zero_lifetime_clears_everything() {
        let now = Utc.timestamp_millis_opt(1_600_000_000_000).unwrap();
        let mut messages = MessageCollection::default();
        let message = message_at(now.timestamp_millis());
        messages.set(message.id.clone(), message);
        assert_eq!(messages.sweep(Duration::ZERO, now), 1);
        assert!(messages.is_empty());
    }

    #[test]
    fn endless_lifetime_keeps_everything() {
        let now = Utc.timestamp_millis_opt(1_600_000_000_000).unwrap();
        let mut messages = MessageCollection::default();
        let message = message_at(now.timestamp_millis() - 86_400_000);
        messages.set(message.id.clone(), message);

        assert_eq!(messages.sweep(Duration::MAX, now), 0);
        assert_eq!(messages.sweep(Duration::from_millis(i64::MAX as u64), now), 0);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn reactions_count_users_once() {
        let mut message = message_at(1_600_000_000_000);
        let emoji = ReactionEmoji { id: None, name: "🔥".into() };

        message.add_reaction(emoji.clone(), "5", false);
        let reaction = message.add_reaction(emoji.clone(), "5", false);
        assert_eq!(reaction.count, 1);

        message.add_reaction(emoji, "6", true);
        assert!(message.reactions.get("🔥").unwrap().me);

        let removed = message.remove_reaction("🔥", "6", true).unwrap();
        assert_eq!(removed.count, 1);
        assert!(!removed.me);
        message.remove_reaction("🔥", "5", false);
        assert!(message.reactions.is_empty());
    }

    #[test]
    fn update_keeps_content_when_absent() {
        let mut message = message_at(1_600_000_000_000);
        message.patch(&json!({"id": message.id.clone(), "channel_id": "1", "embeds": []}));
        assert_eq!(message.content, "hi");
        assert_eq!(message.author_id.as_deref(), Some("2"));
    }
}
