//! Example showing most basic bot functionality of coming online and logging what the cache sees.
//!
//! Run with `DISCORD_TOKEN=... RUST_LOG=gatecord=debug cargo run --example basic_online`.

use gatecord::bot::*;
use gatecord::events::ClientEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Grab the token from https://discord.com/developers
    let token = std::env::var("DISCORD_TOKEN")?;

    // Create a new bot
    let mut bot = Bot::new(token);

    // Set the intents the gateway should send events for
    bot.set_intents(Intents::GUILDS | Intents::DIRECT_MESSAGES | Intents::GUILD_MESSAGES, true);

    // Execute the bot.
    let client = bot.elevate().await?;
    let mut events = client.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ClientEvent::Ready(user)) => {
                    let guilds = client.cache().guilds().len();
                    tracing::info!(user = %user.tag(), guilds, "ready");
                }
                Ok(ClientEvent::Message(message)) => tracing::info!(channel = %message.channel_id, content = %message.content, "message"),
                Ok(ClientEvent::Error(error)) => tracing::warn!(%error, "client error"),
                Ok(event) if event.ends_connection() => {
                    tracing::error!(event = ?event, "gateway connection ended");
                    break;
                }
                Ok(event) => tracing::debug!(event = event.name(), "event"),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "event receiver lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.destroy().await;
    Ok(())
}
