use serde_json::Value;
use tracing::debug;

use super::{required, DispatchContext, FollowUp};
use crate::cache::{patch, ReactionEmoji};
use crate::error::{CacheError, GatewayError};
use crate::events::ClientEvent;

pub(super) fn message_create(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let message = context.cache.add_message(data)?.clone();

    // guild messages carry the author's member without its user
    if let (Some(guild_id), Some(member), Some(author)) = (&message.guild_id, data.get("member"), data.get("author")) {
        if context.cache.guilds().has(guild_id) {
            let mut member = member.clone();
            if let Some(object) = member.as_object_mut() {
                object.insert("user".to_owned(), author.clone());
            }
            context.cache.member_factory(guild_id, &member)?;
        }
    }

    context.emit(ClientEvent::Message(message));
    Ok(())
}

pub(super) fn message_update(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let id = required(data, "id", "MESSAGE_UPDATE")?;
    let channel_id = required(data, "channel_id", "MESSAGE_UPDATE")?;

    let Some(old) = context.cache.message(&channel_id, &id).cloned() else {
        debug!(message = %id, "update for an uncached message");
        return Ok(());
    };
    let new = context.cache.message_factory(data)?.clone();
    context.emit(ClientEvent::MessageUpdate { old, new });
    Ok(())
}

pub(super) fn message_delete(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let message_id = required(data, "id", "MESSAGE_DELETE")?;
    let channel_id = required(data, "channel_id", "MESSAGE_DELETE")?;

    match context.cache.delete_message(&channel_id, &message_id) {
        Some(message) => context.emit(ClientEvent::MessageDelete(message)),
        None => context.emit(ClientEvent::MessageDeleteRaw { channel_id, message_id }),
    }
    Ok(())
}

/// Splits a bulk delete into the cached messages and the ids nothing is known about.
pub(super) fn message_delete_bulk(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let channel_id = required(data, "channel_id", "MESSAGE_DELETE_BULK")?;

    let mut messages = Vec::new();
    let mut ids = Vec::new();
    for id in patch::array(data, "ids").iter().filter_map(Value::as_str) {
        match context.cache.delete_message(&channel_id, id) {
            Some(message) => messages.push(message),
            None => ids.push(id.to_owned()),
        }
    }

    if !messages.is_empty() {
        context.emit(ClientEvent::MessageDeleteBulk(messages));
    }
    if !ids.is_empty() {
        context.emit(ClientEvent::MessageDeleteBulkRaw { channel_id, ids });
    }
    Ok(())
}

struct ReactionTarget {
    channel_id: String,
    message_id: String,
    user_id: String,
    emoji: ReactionEmoji,
}

impl ReactionTarget {
    fn from_raw(data: &Value, event: &'static str) -> Result<Self, GatewayError> {
        let emoji = data.get("emoji")
            .and_then(ReactionEmoji::from_raw)
            .ok_or(CacheError::MissingField { kind: event, field: "emoji" })?;

        Ok(Self {
            channel_id: required(data, "channel_id", event)?,
            message_id: required(data, "message_id", event)?,
            user_id: required(data, "user_id", event)?,
            emoji,
        })
    }
}

pub(super) fn reaction_add(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let target = ReactionTarget::from_raw(data, "MESSAGE_REACTION_ADD")?;

    let cached = context.cache.message(&target.channel_id, &target.message_id).is_some()
        && context.cache.users().has(&target.user_id);
    if !cached {
        context.follow_up(FollowUp::ResolveReaction {
            channel_id: target.channel_id,
            message_id: target.message_id,
            user_id: target.user_id,
            emoji: target.emoji,
        });
        return Ok(());
    }

    let reaction = context.cache.add_reaction(&target.channel_id, &target.message_id, target.emoji, &target.user_id)?;
    let message = context.cache.resolve_message(&target.channel_id, &target.message_id)?.clone();
    let user = context.cache.resolve_user(&target.user_id)?.clone();
    context.emit(ClientEvent::MessageReactionAdd { reaction, message, user });
    Ok(())
}

pub(super) fn reaction_remove(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let target = ReactionTarget::from_raw(data, "MESSAGE_REACTION_REMOVE")?;

    let Some(reaction) = context.cache.remove_reaction(&target.channel_id, &target.message_id, &target.emoji, &target.user_id) else {
        debug!(message = %target.message_id, "reaction removed from an uncached message");
        return Ok(());
    };
    let message = context.cache.resolve_message(&target.channel_id, &target.message_id)?.clone();
    context.emit(ClientEvent::MessageReactionRemove { reaction, message, user_id: target.user_id });
    Ok(())
}
