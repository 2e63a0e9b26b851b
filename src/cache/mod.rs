//! In-memory entity cache maintained from gateway events and REST responses.
//!
//! The cache is one arena keyed by id. Entities are created or patched through the `*_factory`
//! methods only, which are idempotent by identity: feeding the same payload twice yields the same
//! entity, updated in place. Guild scoped channels, emojis and presences live in the global
//! collections and are referenced from the owning guild's [`Scope`]; deleting through either side
//! removes them from both.

pub mod channel;
pub mod collection;
pub mod guild;
pub mod member;
pub mod message;
pub mod patch;
pub mod snowflake;
pub mod user;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::trace;

pub use channel::{Channel, ChannelKind, ChannelType};
pub use collection::{Collection, Scope};
pub use guild::Guild;
pub use member::{Emoji, Member, Role};
pub use message::{Message, MessageCollection, MessageReaction, ReactionEmoji};
pub use user::{Presence, PresenceStatus, User};

use crate::error::{CacheError, UnresolvedReference};

#[derive(Debug, Default)]
pub struct Cache {
    channels: Collection<Channel>,
    guilds: Collection<Guild>,
    users: Collection<User>,
    presences: Collection<Presence>,
    emojis: Collection<Emoji>,
    client_user_id: Option<String>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(&self) -> &Collection<Channel> {
        &self.channels
    }

    pub fn guilds(&self) -> &Collection<Guild> {
        &self.guilds
    }

    pub fn users(&self) -> &Collection<User> {
        &self.users
    }

    pub fn presences(&self) -> &Collection<Presence> {
        &self.presences
    }

    pub fn emojis(&self) -> &Collection<Emoji> {
        &self.emojis
    }

    pub fn client_user(&self) -> Option<&User> {
        self.users.get(self.client_user_id.as_deref()?)
    }

    /// Stores the user the client is logged in as.
    pub fn set_client_user(&mut self, data: &Value) -> Result<&User, CacheError> {
        let id = self.user_factory(data)?.id.clone();
        self.client_user_id = Some(id.clone());
        self.resolve_user(&id).map_err(CacheError::from)
    }

    /// Drops every entity, the client user included.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // users

    pub fn user_factory(&mut self, data: &Value) -> Result<&User, CacheError> {
        let id = patch::id(data, "user")?;
        match self.users.get_mut(&id) {
            Some(user) => user.patch(data),
            None => {
                self.users.set(id.clone(), User::from_raw(data)?);
            }
        }
        self.resolve_user(&id).map_err(CacheError::from)
    }

    pub fn resolve_user(&self, id: &str) -> Result<&User, UnresolvedReference> {
        self.users.get(id).ok_or_else(|| UnresolvedReference::new("user", id))
    }

    pub fn delete_user(&mut self, id: &str) -> Option<User> {
        self.users.delete(id)
    }

    /// Removes users sharing no guild or direct message channel with the client.
    /// The client user is never removed.
    pub fn sweep_users(&mut self) -> usize {
        let client_user_id = self.client_user_id.clone();
        let guilds = &self.guilds;
        let channels = &self.channels;

        let swept = self.users.retain(|id, _| {
            client_user_id.as_deref() == Some(id)
                || guilds.values().any(|guild| guild.members.has(id))
                || channels.values().any(|channel| channel.recipients().iter().any(|recipient| recipient == id))
        });
        trace!(swept, "swept users");
        swept
    }

    // guilds

    /// Creates or patches a guild, including the channels, roles, emojis, members, presences and
    /// voice states embedded in a full guild payload.
    pub fn guild_factory(&mut self, data: &Value) -> Result<&Guild, CacheError> {
        let id = patch::id(data, "guild")?;
        let applied = match self.guilds.get_mut(&id) {
            Some(guild) => guild.patch(data),
            None => {
                let mut guild = Guild::new(data)?;
                let applied = guild.patch(data);
                self.guilds.set(id.clone(), guild);
                applied
            }
        };

        if applied {
            for role in patch::array(data, "roles") {
                self.role_factory(&id, role)?;
            }
            for emoji in patch::array(data, "emojis") {
                self.emoji_factory(&id, emoji)?;
            }
            for channel in patch::array(data, "channels") {
                self.guild_channel_factory(&id, channel)?;
            }
            for member in patch::array(data, "members") {
                self.add_member(&id, member, true)?;
            }
            for presence in patch::array(data, "presences") {
                self.presence_factory(Some(&id), presence)?;
            }
            for state in patch::array(data, "voice_states") {
                self.apply_voice_state(&id, state);
            }
        }

        self.resolve_guild(&id).map_err(CacheError::from)
    }

    pub fn resolve_guild(&self, id: &str) -> Result<&Guild, UnresolvedReference> {
        self.guilds.get(id).ok_or_else(|| UnresolvedReference::new("guild", id))
    }

    /// Removes a guild together with its channels, emojis and presences in the global collections.
    pub fn delete_guild(&mut self, id: &str) -> Option<Guild> {
        let guild = self.guilds.delete(id)?;
        for channel_id in guild.channels.ids() {
            self.channels.delete(channel_id);
        }
        for emoji_id in guild.emojis.ids() {
            self.emojis.delete(emoji_id);
        }
        for user_id in guild.presences.ids() {
            self.presences.delete(user_id);
        }
        Some(guild)
    }

    /// Marks a guild unavailable (outage) without dropping what is known about it.
    pub fn mark_guild_unavailable(&mut self, id: &str) -> Option<&Guild> {
        let guild = self.guilds.get_mut(id)?;
        guild.available = false;
        Some(guild)
    }

    // channels

    /// Creates or patches a channel. Guild channels are resolved through their `guild_id`.
    pub fn channel_factory(&mut self, data: &Value) -> Result<&Channel, CacheError> {
        let guild_id = patch::string_field(data, "guild_id");
        self.scoped_channel_factory(guild_id.as_deref(), data)
    }

    /// Creates or patches a channel of the given guild, e.g. from a GUILD_CREATE payload where
    /// channels carry no `guild_id`.
    pub fn guild_channel_factory(&mut self, guild_id: &str, data: &Value) -> Result<&Channel, CacheError> {
        self.scoped_channel_factory(Some(guild_id), data)
    }

    fn scoped_channel_factory(&mut self, guild_id: Option<&str>, data: &Value) -> Result<&Channel, CacheError> {
        let id = patch::id(data, "channel")?;
        if let Some(channel) = self.channels.get_mut(&id) {
            channel.patch(data);
            return self.resolve_channel(&id).map_err(CacheError::from);
        }

        let guild_id = match guild_id {
            Some(guild_id) if self.guilds.has(guild_id) => Some(guild_id),
            Some(guild_id) => return Err(UnresolvedReference::new("guild", guild_id).into()),
            None => None,
        };

        let channel = Channel::from_raw(data, guild_id)?;
        if let Some(guild) = channel.guild_id.as_deref().and_then(|guild_id| self.guilds.get_mut(guild_id)) {
            guild.channels.insert(id.clone());
        }
        Ok(&*self.channels.get_or_insert_with(id, || channel))
    }

    pub fn resolve_channel(&self, id: &str) -> Result<&Channel, UnresolvedReference> {
        self.channels.get(id).ok_or_else(|| UnresolvedReference::new("channel", id))
    }

    pub fn guild_channels<'a>(&'a self, guild_id: &str) -> Vec<&'a Channel> {
        self.guilds.get(guild_id)
            .map(|guild| guild.channels.resolve(&self.channels).collect())
            .unwrap_or_default()
    }

    /// Removes a channel from the global collection and its guild's scope.
    pub fn delete_channel(&mut self, id: &str) -> Option<Channel> {
        let channel = self.channels.delete(id)?;
        if let Some(guild) = channel.guild_id.as_deref().and_then(|guild_id| self.guilds.get_mut(guild_id)) {
            guild.channels.remove(id);
        }
        Some(channel)
    }

    /// Removes a channel through the guild's scope; the global collection follows.
    pub fn delete_guild_channel(&mut self, guild_id: &str, id: &str) -> Option<Channel> {
        let scoped = self.guilds.get_mut(guild_id).map(|guild| guild.channels.remove(id)).unwrap_or(false);
        if !scoped {
            return None;
        }
        self.delete_channel(id)
    }

    // emojis

    pub fn emoji_factory(&mut self, guild_id: &str, data: &Value) -> Result<&Emoji, CacheError> {
        let id = patch::id(data, "emoji")?;
        let guild = self.guilds.get_mut(guild_id).ok_or_else(|| UnresolvedReference::new("guild", guild_id))?;
        guild.emojis.insert(id.clone());

        match self.emojis.get_mut(&id) {
            Some(emoji) => emoji.patch(data),
            None => {
                self.emojis.set(id.clone(), Emoji::from_raw(guild_id, data)?);
            }
        }
        self.resolve_emoji(&id).map_err(CacheError::from)
    }

    pub fn resolve_emoji(&self, id: &str) -> Result<&Emoji, UnresolvedReference> {
        self.emojis.get(id).ok_or_else(|| UnresolvedReference::new("emoji", id))
    }

    pub fn delete_emoji(&mut self, id: &str) -> Option<Emoji> {
        let emoji = self.emojis.delete(id)?;
        if let Some(guild) = self.guilds.get_mut(&emoji.guild_id) {
            guild.emojis.remove(id);
        }
        Some(emoji)
    }

    /// Replaces a guild's emojis with the given list, returning the emojis that were removed.
    pub fn replace_guild_emojis(&mut self, guild_id: &str, emojis: &[Value]) -> Result<Vec<Emoji>, CacheError> {
        let mut keep = Vec::with_capacity(emojis.len());
        for emoji in emojis {
            keep.push(self.emoji_factory(guild_id, emoji)?.id.clone());
        }

        let stale: Vec<String> = self.resolve_guild(guild_id)?
            .emojis
            .ids()
            .filter(|id| !keep.iter().any(|kept| kept == id))
            .map(str::to_owned)
            .collect();
        Ok(stale.iter().filter_map(|id| self.delete_emoji(id)).collect())
    }

    // presences

    /// Replaces a user's presence wholesale. Guild presences are also tracked in the guild's scope.
    pub fn presence_factory(&mut self, guild_id: Option<&str>, data: &Value) -> Result<&Presence, CacheError> {
        let presence = Presence::from_raw(data)?;
        let user_id = presence.user_id.clone();
        if let Some(guild_id) = guild_id.filter(|guild_id| !self.guilds.has(guild_id)) {
            return Err(UnresolvedReference::new("guild", guild_id).into());
        }

        // presence payloads carry partial users, only fill in what is sent
        if let Some(user) = data.get("user").filter(|user| user.get("username").is_some()) {
            self.user_factory(user)?;
        }

        if let Some(guild) = guild_id.and_then(|guild_id| self.guilds.get_mut(guild_id)) {
            guild.presences.insert(user_id.clone());
        }

        self.presences.set(user_id.clone(), presence);
        self.resolve_presence(&user_id).map_err(CacheError::from)
    }

    pub fn resolve_presence(&self, user_id: &str) -> Result<&Presence, UnresolvedReference> {
        self.presences.get(user_id).ok_or_else(|| UnresolvedReference::new("presence", user_id))
    }

    pub fn delete_presence(&mut self, user_id: &str) -> Option<Presence> {
        let presence = self.presences.delete(user_id)?;
        for guild in self.guilds.values_mut() {
            guild.presences.remove(user_id);
        }
        Some(presence)
    }

    // roles

    pub fn role_factory(&mut self, guild_id: &str, data: &Value) -> Result<&Role, CacheError> {
        let id = patch::id(data, "role")?;
        let guild = self.guilds.get_mut(guild_id).ok_or_else(|| UnresolvedReference::new("guild", guild_id))?;
        match guild.roles.get_mut(&id) {
            Some(role) => role.patch(data),
            None => {
                guild.roles.set(id.clone(), Role::from_raw(guild_id, data)?);
            }
        }
        guild.roles.get(&id).ok_or_else(|| UnresolvedReference::new("role", id).into())
    }

    pub fn delete_role(&mut self, guild_id: &str, id: &str) -> Option<Role> {
        let guild = self.guilds.get_mut(guild_id)?;
        let role = guild.roles.delete(id)?;
        for member in guild.members.values_mut() {
            member.roles.retain(|role_id| role_id != id);
        }
        Some(role)
    }

    // members

    /// Creates or patches a member and its user.
    pub fn member_factory(&mut self, guild_id: &str, data: &Value) -> Result<&Member, CacheError> {
        let user = data.get("user").ok_or(CacheError::MissingField { kind: "member", field: "user" })?;
        let user_id = self.user_factory(user)?.id.clone();

        let guild = self.guilds.get_mut(guild_id).ok_or_else(|| UnresolvedReference::new("guild", guild_id))?;
        match guild.members.get_mut(&user_id) {
            Some(member) => member.patch(data),
            None => {
                guild.members.set(user_id.clone(), Member::from_raw(guild_id, data)?);
            }
        }
        guild.members.get(&user_id).ok_or_else(|| UnresolvedReference::new("member", user_id).into())
    }

    /// Adds a member. Unless this is part of the initial guild payload or a member chunk, the
    /// guild's member count grows by one.
    pub fn add_member(&mut self, guild_id: &str, data: &Value, initial: bool) -> Result<&Member, CacheError> {
        let user_id = self.member_factory(guild_id, data)?.user_id.clone();
        let guild = self.guilds.get_mut(guild_id).ok_or_else(|| UnresolvedReference::new("guild", guild_id))?;
        if !initial {
            guild.member_count += 1;
        }
        guild.members.get(&user_id).ok_or_else(|| UnresolvedReference::new("member", user_id).into())
    }

    /// Removes a member, shrinking the guild's member count.
    pub fn remove_member(&mut self, guild_id: &str, user_id: &str) -> Option<Member> {
        let guild = self.guilds.get_mut(guild_id)?;
        let member = guild.members.delete(user_id)?;
        guild.member_count = guild.member_count.saturating_sub(1);
        Some(member)
    }

    pub fn resolve_member(&self, guild_id: &str, user_id: &str) -> Result<&Member, UnresolvedReference> {
        self.resolve_guild(guild_id)?
            .members
            .get(user_id)
            .ok_or_else(|| UnresolvedReference::new("member", user_id))
    }

    /// Applies a voice state to the member and the voice channel member lists.
    pub fn apply_voice_state(&mut self, guild_id: &str, state: &Value) {
        let Some(user_id) = patch::string_field(state, "user_id") else { return };
        let channel_id = patch::string_field(state, "channel_id");

        for channel in self.channels.values_mut() {
            if let ChannelKind::Voice(voice) = &mut channel.kind {
                voice.members.retain(|member| member != &user_id);
                if channel_id.as_deref() == Some(channel.id.as_str()) {
                    voice.members.push(user_id.clone());
                }
            }
        }

        if let Some(member) = self.guilds.get_mut(guild_id).and_then(|guild| guild.members.get_mut(&user_id)) {
            member.set_voice_state(state);
        }
    }

    // messages

    /// Creates or patches a message in its channel's history.
    pub fn message_factory(&mut self, data: &Value) -> Result<&Message, CacheError> {
        let id = patch::id(data, "message")?;
        let channel_id = patch::string_field(data, "channel_id")
            .ok_or(CacheError::MissingField { kind: "message", field: "channel_id" })?;

        if let Some(author) = data.get("author") {
            self.user_factory(author)?;
        }

        let channel = self.channels.get_mut(&channel_id).ok_or_else(|| UnresolvedReference::new("channel", &channel_id))?;
        let messages = channel.messages_mut().ok_or_else(|| CacheError::NotTextBased(channel_id.clone()))?;
        match messages.get_mut(&id) {
            Some(message) => message.patch(data),
            None => {
                messages.set(id.clone(), Message::from_raw(data)?);
            }
        }
        self.resolve_message(&channel_id, &id).map_err(CacheError::from)
    }

    /// A new message: stores it and moves the channel's last message pointer.
    pub fn add_message(&mut self, data: &Value) -> Result<&Message, CacheError> {
        let message = self.message_factory(data)?;
        let (id, channel_id) = (message.id.clone(), message.channel_id.clone());
        if let Some(channel) = self.channels.get_mut(&channel_id) {
            channel.set_last_message_id(&id);
        }
        self.resolve_message(&channel_id, &id).map_err(CacheError::from)
    }

    pub fn message(&self, channel_id: &str, id: &str) -> Option<&Message> {
        self.channels.get(channel_id)?.messages()?.get(id)
    }

    pub fn message_mut(&mut self, channel_id: &str, id: &str) -> Option<&mut Message> {
        self.channels.get_mut(channel_id)?.messages_mut()?.get_mut(id)
    }

    pub fn resolve_message(&self, channel_id: &str, id: &str) -> Result<&Message, UnresolvedReference> {
        self.message(channel_id, id).ok_or_else(|| UnresolvedReference::new("message", id))
    }

    pub fn delete_message(&mut self, channel_id: &str, id: &str) -> Option<Message> {
        self.channels.get_mut(channel_id)?.messages_mut()?.delete(id)
    }

    /// Counts a user's reaction on a cached message.
    pub fn add_reaction(
        &mut self,
        channel_id: &str,
        message_id: &str,
        emoji: ReactionEmoji,
        user_id: &str,
    ) -> Result<MessageReaction, UnresolvedReference> {
        let by_client = self.client_user_id.as_deref() == Some(user_id);
        let message = self.message_mut(channel_id, message_id)
            .ok_or_else(|| UnresolvedReference::new("message", message_id))?;
        Ok(message.add_reaction(emoji, user_id, by_client).clone())
    }

    /// Takes back a user's reaction, `None` when the reaction was not known.
    pub fn remove_reaction(
        &mut self,
        channel_id: &str,
        message_id: &str,
        emoji: &ReactionEmoji,
        user_id: &str,
    ) -> Option<MessageReaction> {
        let by_client = self.client_user_id.as_deref() == Some(user_id);
        self.message_mut(channel_id, message_id)?.remove_reaction(&emoji.key(), user_id, by_client)
    }

    /// Sweeps the message history of every channel, returning the number of evicted messages.
    pub fn sweep_messages(&mut self, lifetime: Duration, now: DateTime<Utc>) -> usize {
        let swept = self.channels
            .values_mut()
            .filter_map(Channel::messages_mut)
            .map(|messages| messages.sweep(lifetime, now))
            .sum();
        trace!(swept, "swept messages");
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guild_payload() -> Value {
        json!({
            "id": "10",
            "name": "Test Guild",
            "owner_id": "1",
            "region": "eu-central",
            "member_count": 2,
            "verification_level": 1,
            "roles": [{"id": "10", "name": "@everyone"}, {"id": "11", "name": "mods"}],
            "emojis": [{"id": "30", "name": "blob"}],
            "channels": [
                {"id": "20", "type": 0, "name": "general"},
                {"id": "21", "type": 2, "name": "lounge"}
            ],
            "members": [
                {"user": {"id": "1", "username": "owner"}, "roles": ["11"]},
                {"user": {"id": "2", "username": "guest"}, "roles": []}
            ],
            "presences": [{"user": {"id": "1"}, "status": "online"}],
            "voice_states": [{"user_id": "2", "channel_id": "21"}]
        })
    }

    fn cache_with_guild() -> Cache {
        let mut cache = Cache::new();
        cache.guild_factory(&guild_payload()).unwrap();
        cache
    }

    #[test]
    fn guild_create_fills_every_collection() {
        let cache = cache_with_guild();
        let guild = cache.resolve_guild("10").unwrap();

        assert_eq!(guild.roles.len(), 2);
        assert_eq!(guild.members.len(), 2);
        assert_eq!(guild.member_count, 2);
        assert_eq!(cache.guild_channels("10").len(), 2);
        assert_eq!(cache.channels().get("20").unwrap().guild_id.as_deref(), Some("10"));
        assert!(guild.emojis.contains("30") && cache.emojis().has("30"));
        assert!(guild.presences.contains("1") && cache.presences().has("1"));
        assert_eq!(cache.users().len(), 2);
        assert_eq!(guild.members.get("2").unwrap().voice_channel_id.as_deref(), Some("21"));
    }

    #[test]
    fn presence_for_unknown_guild_writes_nothing() {
        let mut cache = cache_with_guild();
        let presence = json!({"user": {"id": "5", "username": "stranger"}, "status": "online"});

        let error = cache.presence_factory(Some("404"), &presence).unwrap_err();
        assert!(matches!(error, CacheError::Unresolved(_)));
        assert!(cache.resolve_user("5").is_err());
        assert!(!cache.presences().has("5"));

        cache.presence_factory(Some("10"), &presence).unwrap();
        assert_eq!(cache.resolve_user("5").unwrap().username, "stranger");
        assert!(cache.resolve_guild("10").unwrap().presences.contains("5"));
    }

    #[test]
    fn factory_is_idempotent_by_identity() {
        let mut cache = cache_with_guild();
        cache.guild_factory(&guild_payload()).unwrap();
        cache.channel_factory(&json!({"id": "20", "type": 0, "guild_id": "10", "topic": "rules"})).unwrap();

        assert_eq!(cache.guilds().len(), 1);
        assert_eq!(cache.channels().len(), 2);
        assert_eq!(cache.users().len(), 2);
        assert_eq!(cache.resolve_guild("10").unwrap().channels.len(), 2);

        let channel = cache.resolve_channel("20").unwrap();
        assert_eq!(channel.name(), Some("general"));
        match &channel.kind {
            ChannelKind::Text(text) => assert_eq!(text.topic.as_deref(), Some("rules")),
            other => panic!("expected a text channel, got {other:?}"),
        }
    }

    #[test]
    fn scoped_delete_removes_globally() {
        let mut cache = cache_with_guild();
        assert!(cache.delete_guild_channel("10", "20").is_some());
        assert!(!cache.channels().has("20"));
        assert!(!cache.resolve_guild("10").unwrap().channels.contains("20"));
    }

    #[test]
    fn global_delete_removes_from_scope() {
        let mut cache = cache_with_guild();
        assert!(cache.delete_channel("21").is_some());
        assert!(!cache.resolve_guild("10").unwrap().channels.contains("21"));

        assert!(cache.delete_emoji("30").is_some());
        assert!(!cache.resolve_guild("10").unwrap().emojis.contains("30"));

        assert!(cache.delete_presence("1").is_some());
        assert!(!cache.resolve_guild("10").unwrap().presences.contains("1"));
    }

    #[test]
    fn deleting_a_guild_clears_its_scoped_entities() {
        let mut cache = cache_with_guild();
        cache.channel_factory(&json!({"id": "40", "type": 1, "recipients": [{"id": "2"}]})).unwrap();

        cache.delete_guild("10").unwrap();
        assert!(cache.guilds().is_empty());
        assert_eq!(cache.channels().keys().collect::<Vec<_>>(), ["40"]);
        assert!(cache.emojis().is_empty());
        assert!(cache.presences().is_empty());
    }

    #[test]
    fn guild_channel_needs_a_known_guild() {
        let mut cache = Cache::new();
        let error = cache.channel_factory(&json!({"id": "20", "type": 0, "guild_id": "99"})).unwrap_err();
        assert_eq!(error, CacheError::Unresolved(UnresolvedReference::new("guild", "99")));
        assert_eq!(
            cache.resolve_channel("20").unwrap_err().to_string(),
            "unable to resolve unknown channel 20"
        );
    }

    #[test]
    fn member_add_and_remove_track_the_count() {
        let mut cache = cache_with_guild();
        cache.add_member("10", &json!({"user": {"id": "3", "username": "new"}, "roles": []}), false).unwrap();
        assert_eq!(cache.resolve_guild("10").unwrap().member_count, 3);

        cache.remove_member("10", "3").unwrap();
        assert_eq!(cache.resolve_guild("10").unwrap().member_count, 2);
        assert!(cache.resolve_member("10", "3").is_err());
    }

    #[test]
    fn deleting_a_role_strips_it_from_members() {
        let mut cache = cache_with_guild();
        cache.delete_role("10", "11").unwrap();
        assert!(!cache.resolve_member("10", "1").unwrap().has_role("11"));
    }

    #[test]
    fn emoji_update_replaces_the_set() {
        let mut cache = cache_with_guild();
        let removed = cache.replace_guild_emojis("10", &[json!({"id": "31", "name": "new"})]).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "30");
        assert_eq!(cache.emojis().keys().collect::<Vec<_>>(), ["31"]);
    }

    #[test]
    fn messages_live_in_their_channel() {
        let mut cache = cache_with_guild();
        let id = snowflake::from_timestamp_ms(1_600_000_000_000);
        cache.add_message(&json!({"id": id, "channel_id": "20", "content": "hi", "author": {"id": "5", "username": "x"}})).unwrap();

        assert_eq!(cache.resolve_message("20", &id).unwrap().content, "hi");
        assert!(cache.users().has("5"));
        match &cache.resolve_channel("20").unwrap().kind {
            ChannelKind::Text(text) => assert_eq!(text.last_message_id.as_deref(), Some(id.as_str())),
            other => panic!("expected a text channel, got {other:?}"),
        }

        let error = cache.message_factory(&json!({"id": "1", "channel_id": "21"})).unwrap_err();
        assert_eq!(error, CacheError::NotTextBased("21".into()));
    }

    #[test]
    fn user_sweep_keeps_members_and_the_client() {
        let mut cache = cache_with_guild();
        cache.set_client_user(&json!({"id": "99", "username": "bot", "bot": true})).unwrap();
        cache.user_factory(&json!({"id": "7", "username": "stranger"})).unwrap();

        assert_eq!(cache.sweep_users(), 1);
        assert!(!cache.users().has("7"));
        assert!(cache.users().has("1") && cache.users().has("99"));
        assert_eq!(cache.client_user().unwrap().username, "bot");
    }

    #[test]
    fn unavailable_guild_update_is_not_patched() {
        let mut cache = cache_with_guild();
        cache.mark_guild_unavailable("10");
        cache.guild_factory(&json!({"id": "10", "unavailable": true, "name": "ghost"})).unwrap();
        let guild = cache.resolve_guild("10").unwrap();
        assert!(!guild.available);
        assert_eq!(guild.name, "Test Guild");
    }
}
