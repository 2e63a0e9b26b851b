use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::DispatchContext;
use crate::cache::patch;
use crate::error::{CacheError, GatewayError};
use crate::events::ClientEvent;

pub(super) fn ready(context: &mut DispatchContext<'_>, data: &Value) -> Result<(), GatewayError> {
    let user = data.get("user").ok_or(CacheError::MissingField { kind: "READY", field: "user" })?;
    context.cache.set_client_user(user)?;

    // a re-identify: the guilds follow as GUILD_CREATE and patch what is cached
    if context.readiness.emitted {
        debug!("session re-established, skipping the guild backfill");
        context.declare_ready();
        return Ok(());
    }

    for channel in patch::array(data, "private_channels") {
        context.cache.channel_factory(channel)?;
    }

    context.readiness.waiting.clear();
    for stub in patch::array(data, "guilds") {
        let guild = context.cache.guild_factory(stub)?;
        if !guild.available {
            context.readiness.waiting.insert(guild.id.clone());
        }
    }

    context.readiness.pending = true;
    let waiting = context.readiness.waiting.len();
    info!(guilds = waiting, "received READY, waiting for guilds");

    if waiting == 0 {
        context.try_ready();
    } else {
        let seconds = (waiting as f64 * context.options.ready_timeout_per_guild).ceil();
        match Duration::try_from_secs_f64(seconds.max(0.0)) {
            Ok(timeout) => context.outcome.ready_timeout = Some(timeout),
            Err(error) => {
                warn!(%error, seconds, "readiness timeout out of range, not waiting for guilds");
                context.declare_ready();
            }
        }
    }
    Ok(())
}

pub(super) fn resumed(context: &mut DispatchContext<'_>, _data: &Value) -> Result<(), GatewayError> {
    context.emit(ClientEvent::Resumed);
    Ok(())
}
