use serde_json::Value;
use tracing::debug;

use super::{required, DispatchContext};
use crate::error::{CacheError, GatewayError};
use crate::events::ClientEvent;

/// Replaces the user's presence. In a guild the member's roles and nickname ride along.
pub(super) fn presence_update(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let user = data.get("user").ok_or(CacheError::MissingField { kind: "PRESENCE_UPDATE", field: "user" })?;
    let user_id = required(user, "id", "PRESENCE_UPDATE")?;

    let guild_id = required(data, "guild_id", "PRESENCE_UPDATE")
        .ok()
        .filter(|guild_id| context.cache.guilds().has(guild_id));

    let old = context.cache.presences().get(&user_id).cloned();
    let new = context.cache.presence_factory(guild_id.as_deref(), data)?.clone();

    if let Some(guild_id) = &guild_id {
        let is_member = context.cache.resolve_member(guild_id, &user_id).is_ok();
        if is_member && (data.get("roles").is_some() || data.get("nick").is_some()) {
            context.cache.member_factory(guild_id, data)?;
        }
    }

    if old.as_ref() != Some(&new) {
        context.emit(ClientEvent::PresenceUpdate { old, new });
    }
    Ok(())
}

pub(super) fn typing_start(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let channel_id = required(data, "channel_id", "TYPING_START")?;
    let user_id = required(data, "user_id", "TYPING_START")?;

    if !context.cache.channels().has(&channel_id) {
        debug!(channel = %channel_id, "typing in an uncached channel");
        return Ok(());
    }
    let Some(user) = context.cache.users().get(&user_id).cloned() else {
        debug!(user = %user_id, "typing by an uncached user");
        return Ok(());
    };

    context.emit(ClientEvent::TypingStart { channel_id, user });
    Ok(())
}

/// Only ever sent for the client user.
pub(super) fn user_update(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let old = context.cache.client_user().cloned();
    let new = context.cache.set_client_user(data)?.clone();

    if let Some(old) = old.filter(|old| *old != new) {
        context.emit(ClientEvent::UserUpdate { old, new });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::cache::{Cache, PresenceStatus};
    use crate::dispatch::{DispatchOptions, Dispatcher};
    use crate::events::ClientEvent;

    fn setup() -> (Dispatcher, Cache) {
        let mut cache = Cache::new();
        cache.set_client_user(&json!({"id": "99", "username": "bot", "bot": true})).unwrap();
        cache.guild_factory(&json!({
            "id": "10",
            "name": "guild",
            "roles": [{"id": "11", "name": "mods"}],
            "channels": [{"id": "20", "type": 0, "name": "general"}],
            "members": [{"user": {"id": "1", "username": "alice"}, "roles": []}]
        })).unwrap();
        (Dispatcher::new(DispatchOptions::default()), cache)
    }

    #[test]
    fn presence_update_replaces_and_patches_the_member() {
        let (mut dispatcher, mut cache) = setup();
        let outcome = dispatcher.dispatch(&mut cache, "PRESENCE_UPDATE", &json!({
            "user": {"id": "1"},
            "guild_id": "10",
            "status": "idle",
            "roles": ["11"],
            "nick": "al"
        }));

        match outcome.events.as_slice() {
            [ClientEvent::PresenceUpdate { old: None, new }] => assert_eq!(new.status, PresenceStatus::Idle),
            other => panic!("unexpected events {other:?}"),
        }
        let member = cache.resolve_member("10", "1").unwrap();
        assert!(member.has_role("11"));
        assert_eq!(member.nickname.as_deref(), Some("al"));
        assert!(cache.resolve_guild("10").unwrap().presences.contains("1"));
        assert_eq!(cache.resolve_user("1").unwrap().username, "alice");

        let repeated = dispatcher.dispatch(&mut cache, "PRESENCE_UPDATE", &json!({
            "user": {"id": "1"}, "guild_id": "10", "status": "idle"
        }));
        assert!(repeated.events.is_empty());
    }

    #[test]
    fn typing_needs_a_cached_user() {
        let (mut dispatcher, mut cache) = setup();
        let outcome = dispatcher.dispatch(&mut cache, "TYPING_START", &json!({"channel_id": "20", "user_id": "1"}));
        assert!(matches!(outcome.events.as_slice(), [ClientEvent::TypingStart { user, .. }] if user.username == "alice"));

        let outcome = dispatcher.dispatch(&mut cache, "TYPING_START", &json!({"channel_id": "20", "user_id": "404"}));
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn user_update_patches_the_client_user() {
        let (mut dispatcher, mut cache) = setup();
        let outcome = dispatcher.dispatch(&mut cache, "USER_UPDATE", &json!({"id": "99", "username": "renamed"}));
        match outcome.events.as_slice() {
            [ClientEvent::UserUpdate { old, new }] => {
                assert_eq!(old.username, "bot");
                assert_eq!(new.username, "renamed");
                assert!(new.bot);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }
}
