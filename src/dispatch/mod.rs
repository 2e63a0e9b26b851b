//! Event dispatch table.
//!
//! Maps gateway dispatch event names to handlers which update the [`Cache`] and produce
//! [`ClientEvent`]s. Handlers are synchronous; work that needs the REST API is returned as a
//! [`FollowUp`] for the client to run on its own task.

mod channel;
mod guild;
mod message;
mod presence;
mod ready;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{Cache, ReactionEmoji};
use crate::error::GatewayError;
use crate::events::ClientEvent;

/// Handler for one dispatch event.
pub type EventHandler = fn(&mut DispatchContext<'_>, &Value) -> Result<(), GatewayError>;

/// Work a handler could not finish without the REST API.
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    /// A reaction referenced a message or user that is not cached.
    ResolveReaction {
        channel_id: String,
        message_id: String,
        user_id: String,
        emoji: ReactionEmoji,
    },
    /// Ask the gateway for the member list of a large guild.
    RequestGuildMembers { guild_id: String },
}

/// What a dispatch produced.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub events: Vec<ClientEvent>,
    pub follow_ups: Vec<FollowUp>,
    /// Start the readiness timer with this timeout.
    pub ready_timeout: Option<Duration>,
}

/// Options the handlers honour.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Event names which are dropped without being handled.
    pub disabled_events: HashSet<String>,
    /// Request the full member list of every large guild.
    pub fetch_all_members: bool,
    /// Seconds to wait per unavailable guild before declaring the client ready anyway.
    pub ready_timeout_per_guild: f64,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            disabled_events: HashSet::new(),
            fetch_all_members: false,
            ready_timeout_per_guild: 1.2,
        }
    }
}

/// Tracks the initial guild backfill after READY.
#[derive(Debug, Default)]
pub struct Readiness {
    /// Guilds announced in READY which have not arrived yet.
    waiting: HashSet<String>,
    /// A READY was received and `ClientEvent::Ready` is still owed.
    pending: bool,
    /// `ClientEvent::Ready` was emitted at least once.
    emitted: bool,
}

impl Readiness {
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn waiting_for(&self) -> usize {
        self.waiting.len()
    }
}

/// State handed to every handler.
pub struct DispatchContext<'a> {
    pub cache: &'a mut Cache,
    pub readiness: &'a mut Readiness,
    pub options: &'a DispatchOptions,
    pub outcome: DispatchOutcome,
}

impl DispatchContext<'_> {
    pub fn emit(&mut self, event: ClientEvent) {
        self.outcome.events.push(event);
    }

    pub fn follow_up(&mut self, follow_up: FollowUp) {
        self.outcome.follow_ups.push(follow_up);
    }

    /// Emits `Ready` if the client user is known and nothing is outstanding.
    pub(crate) fn try_ready(&mut self) {
        if !self.readiness.pending || !self.readiness.waiting.is_empty() {
            return;
        }
        self.declare_ready();
    }

    pub(crate) fn declare_ready(&mut self) {
        let Some(user) = self.cache.client_user().cloned() else {
            warn!("readiness reached without a client user");
            return;
        };
        self.readiness.pending = false;
        self.readiness.emitted = true;
        self.readiness.waiting.clear();
        self.emit(ClientEvent::Ready(user));
    }
}

/// The dispatch table together with the readiness tracker.
pub struct Dispatcher {
    handlers: HashMap<&'static str, EventHandler>,
    options: DispatchOptions,
    readiness: Readiness,
}

impl Dispatcher {
    pub fn new(options: DispatchOptions) -> Self {
        let mut handlers: HashMap<&'static str, EventHandler> = HashMap::new();

        handlers.insert("READY", ready::ready);
        handlers.insert("RESUMED", ready::resumed);

        handlers.insert("GUILD_CREATE", guild::guild_create);
        handlers.insert("GUILD_UPDATE", guild::guild_update);
        handlers.insert("GUILD_DELETE", guild::guild_delete);
        handlers.insert("GUILD_MEMBER_ADD", guild::member_add);
        handlers.insert("GUILD_MEMBER_UPDATE", guild::member_update);
        handlers.insert("GUILD_MEMBER_REMOVE", guild::member_remove);
        handlers.insert("GUILD_MEMBERS_CHUNK", guild::members_chunk);
        handlers.insert("GUILD_ROLE_CREATE", guild::role_create);
        handlers.insert("GUILD_ROLE_UPDATE", guild::role_update);
        handlers.insert("GUILD_ROLE_DELETE", guild::role_delete);
        handlers.insert("GUILD_EMOJIS_UPDATE", guild::emojis_update);

        handlers.insert("CHANNEL_CREATE", channel::channel_create);
        handlers.insert("CHANNEL_UPDATE", channel::channel_update);
        handlers.insert("CHANNEL_DELETE", channel::channel_delete);

        handlers.insert("MESSAGE_CREATE", message::message_create);
        handlers.insert("MESSAGE_UPDATE", message::message_update);
        handlers.insert("MESSAGE_DELETE", message::message_delete);
        handlers.insert("MESSAGE_DELETE_BULK", message::message_delete_bulk);
        handlers.insert("MESSAGE_REACTION_ADD", message::reaction_add);
        handlers.insert("MESSAGE_REACTION_REMOVE", message::reaction_remove);

        handlers.insert("PRESENCE_UPDATE", presence::presence_update);
        handlers.insert("TYPING_START", presence::typing_start);
        handlers.insert("USER_UPDATE", presence::user_update);

        Self {
            handlers,
            options,
            readiness: Readiness::default(),
        }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Whether a handler exists for the event and it is not disabled.
    pub fn handles(&self, event: &str) -> bool {
        self.handlers.contains_key(event) && !self.options.disabled_events.contains(event)
    }

    /// Runs the handler registered for `event`.
    ///
    /// Handler errors never abort the dispatch loop; they are logged and surfaced as
    /// [`ClientEvent::Error`].
    pub fn dispatch(&mut self, cache: &mut Cache, event: &str, data: &Value) -> DispatchOutcome {
        if self.options.disabled_events.contains(event) {
            debug!(event, "skipping disabled event");
            return DispatchOutcome::default();
        }

        let Some(handler) = self.handlers.get(event).copied() else {
            debug!(event, "no handler for event");
            return DispatchOutcome::default();
        };

        let mut context = DispatchContext {
            cache,
            readiness: &mut self.readiness,
            options: &self.options,
            outcome: DispatchOutcome::default(),
        };

        if let Err(error) = handler(&mut context, data) {
            warn!(event, %error, "event handler failed");
            context.emit(ClientEvent::Error(Arc::new(error)));
        }
        context.outcome
    }

    /// The readiness timer expired; declares the client ready if it still is not.
    pub fn readiness_timeout(&mut self, cache: &mut Cache) -> DispatchOutcome {
        let mut context = DispatchContext {
            cache,
            readiness: &mut self.readiness,
            options: &self.options,
            outcome: DispatchOutcome::default(),
        };

        if context.readiness.pending {
            debug!(missing = context.readiness.waiting.len(), "readiness timeout, declaring ready");
            context.declare_ready();
        }
        context.outcome
    }

    /// Forgets the readiness state, used when the client is destroyed.
    pub fn reset(&mut self) {
        self.readiness = Readiness::default();
    }
}

/// Reads a required string field of an event payload.
fn required(data: &Value, key: &'static str, event: &'static str) -> Result<String, GatewayError> {
    crate::cache::patch::string_field(data, key)
        .ok_or(crate::error::CacheError::MissingField { kind: event, field: key }.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_events_are_ignored() {
        let mut dispatcher = Dispatcher::new(DispatchOptions::default());
        let mut cache = Cache::new();
        let outcome = dispatcher.dispatch(&mut cache, "VOICE_SERVER_UPDATE", &json!({}));
        assert!(outcome.events.is_empty());
        assert!(!dispatcher.handles("VOICE_SERVER_UPDATE"));
    }

    #[test]
    fn disabled_events_are_skipped() {
        let options = DispatchOptions {
            disabled_events: HashSet::from(["TYPING_START".to_owned()]),
            ..DispatchOptions::default()
        };
        let mut dispatcher = Dispatcher::new(options);
        assert!(!dispatcher.handles("TYPING_START"));
        assert!(dispatcher.handles("MESSAGE_CREATE"));

        let mut cache = Cache::new();
        let outcome = dispatcher.dispatch(&mut cache, "TYPING_START", &json!({"channel_id": "1", "user_id": "2"}));
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn handler_errors_become_error_events() {
        let mut dispatcher = Dispatcher::new(DispatchOptions::default());
        let mut cache = Cache::new();
        let outcome = dispatcher.dispatch(&mut cache, "CHANNEL_CREATE", &json!({"id": "1", "type": 0, "guild_id": "404"}));
        assert!(matches!(outcome.events.as_slice(), [ClientEvent::Error(_)]));
    }

    #[test]
    fn out_of_range_readiness_timeout_declares_ready() {
        let options = DispatchOptions {
            ready_timeout_per_guild: 1e300,
            ..DispatchOptions::default()
        };
        let mut dispatcher = Dispatcher::new(options);
        let mut cache = Cache::new();
        let ready = json!({
            "session_id": "abc",
            "user": {"id": "99", "username": "bot", "bot": true},
            "guilds": [{"id": "10", "unavailable": true}]
        });

        let outcome = dispatcher.dispatch(&mut cache, "READY", &ready);
        assert_eq!(outcome.ready_timeout, None);
        assert!(matches!(outcome.events.as_slice(), [ClientEvent::Ready(user)] if user.id == "99"));
        assert!(!dispatcher.readiness().is_pending());
    }
}
