//! The client facade.
//!
//! A [`Client`] owns the entity cache, the dispatch table, the client timers and at most one gateway
//! connection. Events produced by the connection are pumped through the [`Dispatcher`] on a single
//! task, so the cache sees them in arrival order. Application code observes the result through
//! [`Client::subscribe`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cache::{Cache, Member, Message, ReactionEmoji, User};
use crate::config::ClientOptions;
use crate::dispatch::{DispatchOutcome, Dispatcher, FollowUp};
use crate::error::GatewayError;
use crate::events::ClientEvent;
use crate::gateway::{GatewayIdentity, Status};
use crate::gateway_structs::{opcode, Payload, RequestGuildMembers};
use crate::http::RestApi;
use crate::timer::{TimerId, TimerRegistry};
use crate::websocket::{GatewayConfig, GatewayEvent, GatewayHandle};

/// How long [`Client::fetch_members`] waits for the member chunks.
pub const MEMBER_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

const EVENT_CAPACITY: usize = 256;

/// Cheap to clone handle on a client; every clone drives the same connection and cache.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

struct Shared {
    options: ClientOptions,
    rest: Arc<dyn RestApi>,
    cache: RwLock<Cache>,
    dispatcher: Mutex<Dispatcher>,
    events: broadcast::Sender<ClientEvent>,
    timers: TimerRegistry,
    ready_timer: Mutex<Option<TimerId>>,
    gateway: Mutex<Option<GatewayHandle>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    member_chunks: Notify,
}

impl Client {
    pub fn new(options: ClientOptions, rest: Arc<dyn RestApi>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let dispatcher = Dispatcher::new(options.dispatch_options());

        Self {
            shared: Arc::new(Shared {
                options,
                rest,
                cache: RwLock::new(Cache::new()),
                dispatcher: Mutex::new(dispatcher),
                events,
                timers: TimerRegistry::new(),
                ready_timer: Mutex::new(None),
                gateway: Mutex::new(None),
                pump: Mutex::new(None),
                member_chunks: Notify::new(),
            }),
        }
    }

    /// Validates a flat option map and builds a client from it.
    pub fn from_map(options: &Map<String, Value>, rest: Arc<dyn RestApi>) -> Result<Self, GatewayError> {
        Ok(Self::new(ClientOptions::from_map(options)?, rest))
    }

    pub fn options(&self) -> &ClientOptions {
        &self.shared.options
    }

    /// A new receiver for every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Read access to the cache. Do not hold the guard across an `.await`.
    pub fn cache(&self) -> RwLockReadGuard<'_, Cache> {
        self.shared.cache.read()
    }

    pub fn status(&self) -> Status {
        self.shared.gateway.lock().as_ref().map(|gateway| gateway.state().status).unwrap_or_default()
    }

    /// Round trip of the last acknowledged heartbeat.
    pub fn ping(&self) -> Option<Duration> {
        self.shared.gateway.lock().as_ref().and_then(|gateway| gateway.state().ping)
    }

    /// Asks the REST api for the gateway url and starts the connection.
    ///
    /// Returns once the connection task runs; [`ClientEvent::Ready`] follows when the guilds arrived.
    pub async fn login(&self, token: &str) -> Result<(), GatewayError> {
        if self.shared.gateway.lock().as_ref().map_or(false, |gateway| !gateway.is_finished()) {
            return Err(GatewayError::Handshake("the client is already logged in".into()));
        }

        let gateway = self.shared.rest.get_gateway().await?;
        info!(url = %gateway.url, "connecting to the gateway");

        let options = &self.shared.options;
        let config = GatewayConfig {
            url: gateway.url,
            encoding: options.encoding,
            compression: options.compression,
            identity: GatewayIdentity {
                token: Arc::from(token),
                shard: [options.shard_id, options.shard_count],
                intents: options.intents,
                large_threshold: options.large_threshold,
                presence: options.presence.clone(),
            },
        };

        // a previous connection which ended on its own still owns the sweepers and its pump
        self.shared.release_connection().await;

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let handle = GatewayHandle::spawn(config, sender);

        let shared = Arc::clone(&self.shared);
        let pump = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                shared.handle_gateway_event(event);
            }
        });

        *self.shared.gateway.lock() = Some(handle);
        *self.shared.pump.lock() = Some(pump);
        self.shared.start_sweepers();
        Ok(())
    }

    /// Closes the connection, cancels every timer and empties the cache.
    pub async fn destroy(&self) {
        self.shared.release_connection().await;
        self.shared.cache.write().clear();
        self.shared.dispatcher.lock().reset();
        debug!("client destroyed");
    }

    pub async fn fetch_user(&self, id: &str) -> Result<User, GatewayError> {
        self.shared.fetch_user(id).await
    }

    pub async fn fetch_message(&self, channel_id: &str, id: &str) -> Result<Message, GatewayError> {
        self.shared.fetch_message(channel_id, id).await
    }

    pub async fn fetch_member(&self, guild_id: &str, user_id: &str) -> Result<Member, GatewayError> {
        let cached = self.shared.cache.read().resolve_member(guild_id, user_id).ok().cloned();
        if let Some(member) = cached {
            return Ok(member);
        }

        let data = self.shared.rest.get_guild_member(guild_id, user_id).await?;
        let member = self.shared.cache.write().member_factory(guild_id, &data)?.clone();
        Ok(member)
    }

    /// Requests the member list of a guild over the gateway.
    ///
    /// Resolves with every cached member once the guild's member collection reached its member
    /// count, and fails with [`GatewayError::Timeout`] after [`MEMBER_FETCH_TIMEOUT`].
    pub async fn fetch_members(&self, guild_id: &str, query: &str, limit: u32) -> Result<Vec<Member>, GatewayError> {
        if let Some(members) = self.shared.members_if_complete(guild_id)? {
            return Ok(members);
        }

        let request = RequestGuildMembers {
            guild_id: guild_id.to_owned(),
            query: query.to_owned(),
            limit,
        };
        self.shared.send(payload(opcode::REQUEST_GUILD_MEMBERS, request)?)?;

        tokio::time::timeout(MEMBER_FETCH_TIMEOUT, self.shared.wait_for_members(guild_id))
            .await
            .map_err(|_| GatewayError::Timeout("guild members"))?
    }

    /// Sends a presence update through the send gate.
    pub fn set_presence(&self, presence: Value) -> Result<(), GatewayError> {
        self.shared.send(Payload::new(opcode::PRESENCE_UPDATE, presence))
    }
}

impl Shared {
    fn emit(&self, event: ClientEvent) {
        trace!(event = event.name(), "emitting");
        // no subscriber is not an error
        let _ = self.events.send(event);
    }

    fn send(&self, payload: Payload) -> Result<(), GatewayError> {
        self.gateway.lock().as_ref().ok_or(GatewayError::Closed)?.send(payload)
    }

    fn handle_gateway_event(self: &Arc<Self>, event: GatewayEvent) {
        match event {
            GatewayEvent::Dispatch { event, data } => {
                let outcome = {
                    let mut cache = self.cache.write();
                    self.dispatcher.lock().dispatch(&mut cache, &event, &data)
                };
                self.apply(outcome);
                if event == "GUILD_MEMBERS_CHUNK" {
                    self.member_chunks.notify_waiters();
                }
            }
            GatewayEvent::StatusChange(status) => {
                self.emit(ClientEvent::Debug(format!("connection status is now {status:?}")));
                self.emit(ClientEvent::StatusChange(status));
            }
            GatewayEvent::Fatal(error) => {
                self.cancel_ready_timer();
                self.emit(ClientEvent::Error(Arc::new(error)));
            }
        }
    }

    fn apply(self: &Arc<Self>, outcome: DispatchOutcome) {
        if let Some(timeout) = outcome.ready_timeout {
            self.start_ready_timer(timeout);
        }
        if outcome.events.iter().any(|event| matches!(event, ClientEvent::Ready(_))) {
            self.cancel_ready_timer();
        }

        for event in outcome.events {
            self.emit(event);
        }
        for follow_up in outcome.follow_ups {
            self.follow_up(follow_up);
        }
    }

    fn start_ready_timer(self: &Arc<Self>, timeout: Duration) {
        self.cancel_ready_timer();
        debug!(?timeout, "waiting for guilds");

        let shared = Arc::downgrade(self);
        let id = self.timers.add_timer(timeout, move || {
            if let Some(shared) = shared.upgrade() {
                shared.readiness_timed_out();
            }
        });
        *self.ready_timer.lock() = Some(id);
    }

    fn cancel_ready_timer(&self) {
        let timer = self.ready_timer.lock().take();
        if let Some(timer) = timer {
            self.timers.cancel_timer(timer);
        }
    }

    fn readiness_timed_out(self: &Arc<Self>) {
        // this runs on the timer itself, it must not be cancelled from here
        self.ready_timer.lock().take();

        let outcome = {
            let mut cache = self.cache.write();
            self.dispatcher.lock().readiness_timeout(&mut cache)
        };
        self.apply(outcome);
    }

    fn follow_up(self: &Arc<Self>, follow_up: FollowUp) {
        match follow_up {
            FollowUp::RequestGuildMembers { guild_id } => {
                let request = RequestGuildMembers {
                    guild_id,
                    query: String::new(),
                    limit: 0,
                };
                if let Err(error) = payload(opcode::REQUEST_GUILD_MEMBERS, request).and_then(|payload| self.send(payload)) {
                    warn!(%error, "failed to request guild members");
                }
            }
            FollowUp::ResolveReaction { channel_id, message_id, user_id, emoji } => {
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    let event = shared.resolve_reaction(&channel_id, &message_id, &user_id, emoji).await;
                    match event {
                        Ok(event) => shared.emit(event),
                        Err(error) => {
                            warn!(%error, %channel_id, %message_id, "dropping reaction");
                            shared.emit(ClientEvent::Debug(format!("dropped reaction on {message_id}: {error}")));
                        }
                    }
                });
            }
        }
    }

    async fn resolve_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        user_id: &str,
        emoji: ReactionEmoji,
    ) -> Result<ClientEvent, GatewayError> {
        let user = self.fetch_user(user_id).await?;
        self.fetch_message(channel_id, message_id).await?;
        self.count_reaction(channel_id, message_id, user, emoji)
    }

    fn count_reaction(&self, channel_id: &str, message_id: &str, user: User, emoji: ReactionEmoji) -> Result<ClientEvent, GatewayError> {
        let mut cache = self.cache.write();
        let reaction = cache.add_reaction(channel_id, message_id, emoji, &user.id)?;
        let message = cache.resolve_message(channel_id, message_id)?.clone();
        Ok(ClientEvent::MessageReactionAdd { reaction, message, user })
    }

    async fn fetch_user(&self, id: &str) -> Result<User, GatewayError> {
        let cached = self.cache.read().resolve_user(id).ok().cloned();
        if let Some(user) = cached {
            return Ok(user);
        }

        let data = self.rest.get_user(id).await?;
        let user = self.cache.write().user_factory(&data)?.clone();
        Ok(user)
    }

    async fn fetch_message(&self, channel_id: &str, id: &str) -> Result<Message, GatewayError> {
        let cached = self.cache.read().message(channel_id, id).cloned();
        if let Some(message) = cached {
            return Ok(message);
        }

        let data = self.rest.get_channel_message(channel_id, id).await?;
        let message = self.cache.write().message_factory(&data)?.clone();
        Ok(message)
    }

    fn members_if_complete(&self, guild_id: &str) -> Result<Option<Vec<Member>>, GatewayError> {
        let cache = self.cache.read();
        let guild = cache.resolve_guild(guild_id)?;
        if (guild.members.len() as u64) < guild.member_count {
            return Ok(None);
        }
        Ok(Some(guild.members.values().cloned().collect()))
    }

    async fn wait_for_members(&self, guild_id: &str) -> Result<Vec<Member>, GatewayError> {
        loop {
            let chunk = self.member_chunks.notified();
            if let Some(members) = self.members_if_complete(guild_id)? {
                return Ok(members);
            }
            chunk.await;
        }
    }

    /// Cancels every timer, closes the gateway and waits for the event pump to drain.
    async fn release_connection(&self) {
        self.timers.cancel_all();
        self.ready_timer.lock().take();

        let gateway = self.gateway.lock().take();
        if let Some(gateway) = gateway {
            gateway.destroy().await;
        }
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }
    }

    fn start_sweepers(self: &Arc<Self>) {
        let lifetime = self.options.message_cache_lifetime;
        let interval = self.options.message_sweep_interval;
        if !interval.is_zero() {
            let shared = Arc::downgrade(self);
            self.timers.add_periodic_timer(interval, move || {
                let Some(shared) = shared.upgrade() else { return };
                let swept = shared.cache.write().sweep_messages(lifetime, Utc::now());
                shared.emit(ClientEvent::Debug(format!("swept {swept} messages older than {} seconds", lifetime.as_secs())));
            });
        }

        let interval = self.options.user_sweep_interval;
        if !interval.is_zero() {
            let shared = Arc::downgrade(self);
            self.timers.add_periodic_timer(interval, move || {
                let Some(shared) = shared.upgrade() else { return };
                let swept = shared.cache.write().sweep_users();
                shared.emit(ClientEvent::Debug(format!("swept {swept} users")));
            });
        }
    }
}

fn payload(opcode: u32, data: impl serde::Serialize) -> Result<Payload, GatewayError> {
    Payload::new(opcode, data)
        .into_value()
        .map_err(|error| GatewayError::Decode(error.into()))
}
