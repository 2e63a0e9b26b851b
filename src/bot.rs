//! Application entry point: a [`Bot`] collects the token and intents and elevates them into a
//! connected [`Client`].

use std::sync::Arc;

use anyhow::Context;
use serde_json::{Map, Value};
use tracing::info;

use crate::client::Client;
use crate::config::ClientOptions;
use crate::http::DiscordRestApi;

/// Basic structure which represents a Bot inside the library
/// Not the same as a discord bot!
pub struct Bot {

    /// The discord token for the bot utilised for connecting & accessing the discord api.
    pub token: String,

    /// [Bitflags which allow for the selection of what gateway events to recieve][https://discord.com/developers/docs/topics/gateway#list-of-intents]
    /// Some are privileged and require being toggled on in the developer page.
    pub intents: Intents,

    /// Client options, validated when the bot is elevated.
    pub options: ClientOptions,
}

impl Default for Bot {
    fn default() -> Self {
        Self {
            token: String::new(),
            intents: Intents::empty(),
            options: ClientOptions::default(),
        }
    }
}

impl Bot {

    /// Create a new [`Bot`] requiring basic fields set at initialisation
    pub fn new(token: String) -> Self {
        Self {
            token,
            ..Default::default()
        }
    }

    /// Create a new [`Bot`] with options given as a flat map, e.g. `{"ws.largeThreshold": 100}`.
    pub fn with_options(token: String, options: &Map<String, Value>) -> anyhow::Result<Self> {
        let options = ClientOptions::from_map(options).context("invalid client options")?;
        Ok(Self {
            token,
            options,
            ..Default::default()
        })
    }

    /// Sets the intents of a [`Bot`] to be the union between the existing [`Intents`] in the bot and another [`Intents`]
    pub fn union_intents(&mut self, intents: Intents) {
        self.intents = self.intents.union(intents);
    }

    /// Sets the intents of a [`Bot`] to be the intersection between the existing [`Intents`] in the bot and another [`Intents`]
    pub fn intersection_intents(&mut self, intents: Intents) {
        self.intents = self.intents.intersection(intents);
    }

    /// Inserts or removes the specified [`Intents`] for a [`Bot`] depending on the passed [`Intents`] and the value [`bool`]
    pub fn set_intents(&mut self, intents: Intents, value: bool) {
        self.intents.set(intents, value);
    }

    /// Main execution for a [`Bot`] and initialisation of a [`Client`].
    /// Establishes a connection to the Discord Gateway; events are observed through [`Client::subscribe`].
    pub async fn elevate(self) -> anyhow::Result<Client> {
        let mut options = self.options;
        options.intents = self.intents.bits();

        let token: Arc<str> = Arc::from(self.token);
        let rest = DiscordRestApi::spawn(token.clone(), options.rest_time_offset)?;

        let client = Client::new(options, Arc::new(rest));
        client.login(&token).await.context("failed to log in")?;
        info!(status = ?client.status(), "bot elevated");

        Ok(client)
    }

}

bitflags::bitflags! {

    /// [Bitflags Struct which represents all the possible intents for the Gateway Identify handshake event.][https://discord.com/developers/docs/topics/gateway#list-of-intents]
    pub struct Intents: u32 {
        
        const GUILDS = 1 << 0;

        /// This is a privileged [`Intent`]
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_BANS = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_INTEGRATIONS = 1 << 4;
        const GUILD_WEBHOOKS = 1 << 5;
        const GUILD_INVITES = 1 << 6;
        const GUILD_VOICE_STATES = 1 << 7;

        /// This is a privileged [`Intent`]
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const GUILD_MESSAGE_TYPING = 1 << 11;
        const DIRECT_MESSAGES = 1 << 12;
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        const DIRECT_MESSAGE_TYPING = 1 << 14;

        /// This is a privileged [`Intent`]
        const MESSAGE_CONTENT = 1 << 15;
        const GUILD_SCHEDULED_EVENTS = 1 << 16;
        const AUTO_MODERATION_CONFIGURATION = 1 << 20;
        const AUTO_MODERATION_EXECUTION = 1 << 21;

    }

}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn intents_are_combined() {
        let mut bot = Bot::new("token".into());
        bot.union_intents(Intents::GUILDS | Intents::GUILD_MESSAGES);
        bot.set_intents(Intents::GUILD_PRESENCES, true);
        assert_eq!(bot.intents.bits(), 1 | 1 << 8 | 1 << 9);

        bot.intersection_intents(Intents::GUILDS);
        assert_eq!(bot.intents, Intents::GUILDS);
    }

    #[test]
    fn options_are_validated_up_front() {
        let options = json!({"ws.largeThreshold": 100});
        let bot = Bot::with_options("token".into(), options.as_object().unwrap()).unwrap();
        assert_eq!(bot.options.large_threshold, 100);

        let options = json!({"ws.largeThreshold": 10});
        assert!(Bot::with_options("token".into(), options.as_object().unwrap()).is_err());
    }
}
