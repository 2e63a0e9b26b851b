use serde_json::Value;
use tracing::debug;

use super::{required, DispatchContext, FollowUp};
use crate::cache::patch;
use crate::error::{CacheError, GatewayError};
use crate::events::ClientEvent;

pub(super) fn guild_create(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let id = required(data, "id", "GUILD_CREATE")?;
    let was_available = context.cache.guilds().get(&id).map(|guild| guild.available);

    let guild = context.cache.guild_factory(data)?;
    if !guild.available {
        debug!(guild = %id, "guild is still unavailable");
        return Ok(());
    }

    if context.options.fetch_all_members && guild.large && (guild.members.len() as u64) < guild.member_count {
        context.follow_up(FollowUp::RequestGuildMembers { guild_id: id.clone() });
    }

    if context.readiness.waiting.remove(&id) {
        context.try_ready();
        return Ok(());
    }

    // a new guild, or one coming back from an outage
    if was_available != Some(true) && !context.readiness.pending {
        let guild = context.cache.resolve_guild(&id)?.clone();
        context.emit(ClientEvent::GuildCreate(guild));
    }
    Ok(())
}

pub(super) fn guild_update(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let id = required(data, "id", "GUILD_UPDATE")?;
    let Some(old) = context.cache.guilds().get(&id).cloned() else {
        debug!(guild = %id, "update for an unknown guild");
        return Ok(());
    };

    let new = context.cache.guild_factory(data)?.clone();
    context.emit(ClientEvent::GuildUpdate { old, new });
    Ok(())
}

pub(super) fn guild_delete(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let id = required(data, "id", "GUILD_DELETE")?;
    let outage = data.get("unavailable").and_then(Value::as_bool).unwrap_or(false);

    if outage {
        if let Some(guild) = context.cache.mark_guild_unavailable(&id) {
            let guild = guild.clone();
            context.emit(ClientEvent::GuildUnavailable(guild));
        }
        return Ok(());
    }

    if let Some(guild) = context.cache.delete_guild(&id) {
        context.emit(ClientEvent::GuildDelete(guild));
    }
    Ok(())
}

pub(super) fn member_add(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let guild_id = required(data, "guild_id", "GUILD_MEMBER_ADD")?;
    let member = context.cache.add_member(&guild_id, data, false)?.clone();
    context.emit(ClientEvent::GuildMemberAdd(member));
    Ok(())
}

pub(super) fn member_update(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let guild_id = required(data, "guild_id", "GUILD_MEMBER_UPDATE")?;
    let user = data.get("user").ok_or(CacheError::MissingField { kind: "GUILD_MEMBER_UPDATE", field: "user" })?;
    let user_id = required(user, "id", "GUILD_MEMBER_UPDATE")?;

    let old = context.cache.resolve_member(&guild_id, &user_id).ok().cloned();
    let new = context.cache.member_factory(&guild_id, data)?.clone();
    if let Some(old) = old {
        context.emit(ClientEvent::GuildMemberUpdate { old, new });
    }
    Ok(())
}

pub(super) fn member_remove(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let guild_id = required(data, "guild_id", "GUILD_MEMBER_REMOVE")?;
    let user = data.get("user").ok_or(CacheError::MissingField { kind: "GUILD_MEMBER_REMOVE", field: "user" })?;
    let user_id = required(user, "id", "GUILD_MEMBER_REMOVE")?;

    if let Some(member) = context.cache.remove_member(&guild_id, &user_id) {
        context.emit(ClientEvent::GuildMemberRemove(member));
    }
    Ok(())
}

pub(super) fn members_chunk(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let guild_id = required(data, "guild_id", "GUILD_MEMBERS_CHUNK")?;
    context.cache.resolve_guild(&guild_id)?;

    let mut members = Vec::new();
    for member in patch::array(data, "members") {
        members.push(context.cache.add_member(&guild_id, member, true)?.clone());
    }

    context.emit(ClientEvent::GuildMembersChunk { guild_id, members });
    Ok(())
}

pub(super) fn role_create(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let guild_id = required(data, "guild_id", "GUILD_ROLE_CREATE")?;
    let role = data.get("role").ok_or(CacheError::MissingField { kind: "GUILD_ROLE_CREATE", field: "role" })?;
    let role = context.cache.role_factory(&guild_id, role)?.clone();
    context.emit(ClientEvent::RoleCreate(role));
    Ok(())
}

pub(super) fn role_update(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let guild_id = required(data, "guild_id", "GUILD_ROLE_UPDATE")?;
    let role = data.get("role").ok_or(CacheError::MissingField { kind: "GUILD_ROLE_UPDATE", field: "role" })?;
    let role_id = required(role, "id", "GUILD_ROLE_UPDATE")?;

    let old = context.cache.resolve_guild(&guild_id)?.roles.get(&role_id).cloned();
    let new = context.cache.role_factory(&guild_id, role)?.clone();
    if let Some(old) = old {
        context.emit(ClientEvent::RoleUpdate { old, new });
    }
    Ok(())
}

pub(super) fn role_delete(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let guild_id = required(data, "guild_id", "GUILD_ROLE_DELETE")?;
    let role_id = required(data, "role_id", "GUILD_ROLE_DELETE")?;
    if let Some(role) = context.cache.delete_role(&guild_id, &role_id) {
        context.emit(ClientEvent::RoleDelete(role));
    }
    Ok(())
}

/// The payload carries the complete emoji list; the difference to the cache is emitted.
pub(super) fn emojis_update(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let guild_id = required(data, "guild_id", "GUILD_EMOJIS_UPDATE")?;
    let emojis = patch::array(data, "emojis");

    let previous: Vec<_> = context.cache.resolve_guild(&guild_id)?
        .emojis
        .resolve(context.cache.emojis())
        .cloned()
        .collect();

    let removed = context.cache.replace_guild_emojis(&guild_id, emojis)?;

    let current: Vec<_> = context.cache.resolve_guild(&guild_id)?
        .emojis
        .resolve(context.cache.emojis())
        .cloned()
        .collect();

    for new in current {
        match previous.iter().find(|old| old.id == new.id) {
            None => context.emit(ClientEvent::EmojiCreate(new)),
            Some(old) if *old != new => context.emit(ClientEvent::EmojiUpdate { old: old.clone(), new }),
            Some(_) => {}
        }
    }
    for emoji in removed {
        context.emit(ClientEvent::EmojiDelete(emoji));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};

    use crate::cache::Cache;
    use crate::dispatch::{DispatchOptions, Dispatcher, FollowUp};
    use crate::events::ClientEvent;

    fn ready_payload(guilds: Value) -> Value {
        json!({
            "v": 6,
            "user": {"id": "99", "username": "bot", "discriminator": "0001", "bot": true},
            "session_id": "xyz",
            "private_channels": [],
            "guilds": guilds
        })
    }

    fn names(events: &[ClientEvent]) -> Vec<&'static str> {
        events.iter().map(ClientEvent::name).collect()
    }

    #[test]
    fn ready_waits_for_every_guild() {
        let mut dispatcher = Dispatcher::new(DispatchOptions::default());
        let mut cache = Cache::new();

        let outcome = dispatcher.dispatch(&mut cache, "READY", &ready_payload(json!([
            {"id": "1", "unavailable": true},
            {"id": "2", "unavailable": true}
        ])));
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.ready_timeout, Some(Duration::from_secs(3)));
        assert_eq!(dispatcher.readiness().waiting_for(), 2);

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_CREATE", &json!({"id": "1", "name": "one"}));
        assert!(outcome.events.is_empty());

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_CREATE", &json!({"id": "2", "name": "two"}));
        assert_eq!(names(&outcome.events), ["ready"]);
        assert!(!dispatcher.readiness().is_pending());

        // later guilds are announced
        let outcome = dispatcher.dispatch(&mut cache, "GUILD_CREATE", &json!({"id": "3", "name": "three"}));
        assert_eq!(names(&outcome.events), ["guildCreate"]);
    }

    #[test]
    fn ready_without_guilds_is_immediate() {
        let mut dispatcher = Dispatcher::new(DispatchOptions::default());
        let mut cache = Cache::new();
        let outcome = dispatcher.dispatch(&mut cache, "READY", &ready_payload(json!([])));
        match outcome.events.as_slice() {
            [ClientEvent::Ready(user)] => assert_eq!(user.tag(), "bot#0001"),
            other => panic!("unexpected events {other:?}"),
        }
        assert_eq!(outcome.ready_timeout, None);
    }

    #[test]
    fn readiness_timeout_declares_ready() {
        let mut dispatcher = Dispatcher::new(DispatchOptions::default());
        let mut cache = Cache::new();
        dispatcher.dispatch(&mut cache, "READY", &ready_payload(json!([{"id": "1", "unavailable": true}])));

        let outcome = dispatcher.readiness_timeout(&mut cache);
        assert_eq!(names(&outcome.events), ["ready"]);
        assert!(dispatcher.readiness_timeout(&mut cache).events.is_empty());
    }

    #[test]
    fn outage_keeps_the_guild_and_recovery_announces_it() {
        let mut dispatcher = Dispatcher::new(DispatchOptions::default());
        let mut cache = Cache::new();
        dispatcher.dispatch(&mut cache, "READY", &ready_payload(json!([])));
        dispatcher.dispatch(&mut cache, "GUILD_CREATE", &json!({"id": "1", "name": "one"}));

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_DELETE", &json!({"id": "1", "unavailable": true}));
        assert_eq!(names(&outcome.events), ["guildUnavailable"]);
        assert!(!cache.resolve_guild("1").unwrap().available);

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_CREATE", &json!({"id": "1", "name": "one"}));
        assert_eq!(names(&outcome.events), ["guildCreate"]);

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_DELETE", &json!({"id": "1"}));
        assert_eq!(names(&outcome.events), ["guildDelete"]);
        assert!(cache.guilds().is_empty());
    }

    #[test]
    fn large_guilds_request_their_members() {
        let options = DispatchOptions { fetch_all_members: true, ..DispatchOptions::default() };
        let mut dispatcher = Dispatcher::new(options);
        let mut cache = Cache::new();
        dispatcher.dispatch(&mut cache, "READY", &ready_payload(json!([])));

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_CREATE", &json!({
            "id": "1",
            "large": true,
            "member_count": 300,
            "members": [{"user": {"id": "5", "username": "x"}}]
        }));
        assert_eq!(outcome.follow_ups, [FollowUp::RequestGuildMembers { guild_id: "1".into() }]);

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_MEMBERS_CHUNK", &json!({
            "guild_id": "1",
            "members": [{"user": {"id": "6", "username": "y"}}, {"user": {"id": "7", "username": "z"}}]
        }));
        assert!(matches!(outcome.events.as_slice(), [ClientEvent::GuildMembersChunk { members, .. }] if members.len() == 2));
        let guild = cache.resolve_guild("1").unwrap();
        assert_eq!(guild.members.len(), 3);
        assert_eq!(guild.member_count, 300);
    }

    #[test]
    fn member_and_role_lifecycle() {
        let mut dispatcher = Dispatcher::new(DispatchOptions::default());
        let mut cache = Cache::new();
        cache.guild_factory(&json!({"id": "1", "name": "one", "member_count": 0})).unwrap();

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_MEMBER_ADD", &json!({"guild_id": "1", "user": {"id": "5", "username": "x"}, "roles": []}));
        assert_eq!(names(&outcome.events), ["guildMemberAdd"]);
        assert_eq!(cache.resolve_guild("1").unwrap().member_count, 1);

        dispatcher.dispatch(&mut cache, "GUILD_ROLE_CREATE", &json!({"guild_id": "1", "role": {"id": "8", "name": "mods"}}));
        let outcome = dispatcher.dispatch(&mut cache, "GUILD_MEMBER_UPDATE", &json!({"guild_id": "1", "user": {"id": "5"}, "roles": ["8"]}));
        assert!(matches!(
            outcome.events.as_slice(),
            [ClientEvent::GuildMemberUpdate { old, new }] if old.roles.is_empty() && new.has_role("8")
        ));

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_ROLE_UPDATE", &json!({"guild_id": "1", "role": {"id": "8", "name": "admins"}}));
        assert!(matches!(outcome.events.as_slice(), [ClientEvent::RoleUpdate { new, .. }] if new.name == "admins"));

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_ROLE_DELETE", &json!({"guild_id": "1", "role_id": "8"}));
        assert_eq!(names(&outcome.events), ["roleDelete"]);
        assert!(!cache.resolve_member("1", "5").unwrap().has_role("8"));

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_MEMBER_REMOVE", &json!({"guild_id": "1", "user": {"id": "5"}}));
        assert_eq!(names(&outcome.events), ["guildMemberRemove"]);
        assert_eq!(cache.resolve_guild("1").unwrap().member_count, 0);
    }

    #[test]
    fn emoji_updates_are_diffed() {
        let mut dispatcher = Dispatcher::new(DispatchOptions::default());
        let mut cache = Cache::new();
        cache.guild_factory(&json!({
            "id": "1",
            "emojis": [{"id": "30", "name": "keep"}, {"id": "31", "name": "rename"}, {"id": "32", "name": "gone"}]
        })).unwrap();

        let outcome = dispatcher.dispatch(&mut cache, "GUILD_EMOJIS_UPDATE", &json!({
            "guild_id": "1",
            "emojis": [{"id": "30", "name": "keep"}, {"id": "31", "name": "renamed"}, {"id": "33", "name": "new"}]
        }));
        assert_eq!(names(&outcome.events), ["emojiUpdate", "emojiCreate", "emojiDelete"]);
        assert!(!cache.emojis().has("32"));
    }
}
