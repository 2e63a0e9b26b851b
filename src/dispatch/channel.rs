use serde_json::Value;

use super::{required, DispatchContext};
use crate::error::GatewayError;
use crate::events::ClientEvent;

pub(super) fn channel_create(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let channel = context.cache.channel_factory(data)?.clone();
    context.emit(ClientEvent::ChannelCreate(channel));
    Ok(())
}

pub(super) fn channel_update(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let id = required(data, "id", "CHANNEL_UPDATE")?;
    let old = context.cache.channels().get(&id).cloned();
    let new = context.cache.channel_factory(data)?.clone();

    if let Some(old) = old {
        context.emit(ClientEvent::ChannelUpdate { old, new });
    }
    Ok(())
}

pub(super) fn channel_delete(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let id = required(data, "id", "CHANNEL_DELETE")?;
    if let Some(channel) = context.cache.delete_channel(&id) {
        context.emit(ClientEvent::ChannelDelete(channel));
    }
    Ok(())
}
