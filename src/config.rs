//! Client options.
//!
//! Options arrive as a flat map with dotted keys (`ws.largeThreshold`) and are validated before
//! the client ever connects. Anything unknown or malformed is a [`GatewayError::Configuration`].

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::codec::{Compression, Encoding};
use crate::dispatch::DispatchOptions;
use crate::error::GatewayError;
use crate::validation;

/// Every accepted option with its validation rules.
pub const OPTION_RULES: &[(&str, &str)] = &[
    ("fetchAllMembers", "boolean"),
    ("messageCacheLifetime", "integer|min:0|max:31536000"),
    ("messageSweepInterval", "integer|min:0|max:31536000"),
    ("shardID", "integer|min:0"),
    ("shardCount", "integer|min:1"),
    ("userSweepInterval", "integer|min:0|max:31536000"),
    ("http.restTimeOffset", "integer"),
    ("ws.compression", "string"),
    ("ws.disabledEvents", "array:string"),
    ("ws.encoding", "string"),
    ("ws.largeThreshold", "integer|min:50|max:250"),
    ("ws.presence", "nullable|object"),
    ("ws.readyTimeoutPerGuild", "float|min:0|max:3600"),
];

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request the complete member list of large guilds once they become available.
    pub fetch_all_members: bool,
    /// Messages older than this are swept; zero keeps no history at all.
    pub message_cache_lifetime: Duration,
    /// How often the message sweep runs; zero disables it.
    pub message_sweep_interval: Duration,
    pub shard_id: u32,
    pub shard_count: u32,
    /// How often users sharing no guild with the client are dropped; zero disables it.
    pub user_sweep_interval: Duration,
    /// Extra delay between REST requests.
    pub rest_time_offset: Duration,
    pub compression: Compression,
    pub encoding: Encoding,
    pub disabled_events: HashSet<String>,
    pub large_threshold: u32,
    /// Presence sent with identify, null for none.
    pub presence: Value,
    /// Seconds the readiness wait lasts per guild still unavailable.
    pub ready_timeout_per_guild: f64,
    /// Gateway intents sent with identify.
    pub intents: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            fetch_all_members: false,
            message_cache_lifetime: Duration::ZERO,
            message_sweep_interval: Duration::ZERO,
            shard_id: 0,
            shard_count: 1,
            user_sweep_interval: Duration::from_secs(600),
            rest_time_offset: Duration::ZERO,
            compression: Compression::ZlibStream,
            encoding: Encoding::Json,
            disabled_events: HashSet::new(),
            large_threshold: 250,
            presence: Value::Null,
            ready_timeout_per_guild: 1.2,
            intents: 0,
        }
    }
}

impl ClientOptions {
    /// Builds the options from a flat map, falling back to the defaults for absent keys.
    pub fn from_map(options: &Map<String, Value>) -> Result<Self, GatewayError> {
        if let Some(key) = options.keys().find(|key| !OPTION_RULES.iter().any(|(known, _)| *known == key.as_str())) {
            return Err(configuration(key, "is not a known option"));
        }

        let validation = validation::validate(options, OPTION_RULES)
            .map_err(|error| configuration("rules", error.to_string()))?;
        if let Some((key, error)) = validation.first_error() {
            return Err(configuration(key, error));
        }

        let mut config = Self::default();
        let seconds = |key: &str| options.get(key).and_then(Value::as_u64).map(Duration::from_secs);
        let flag = |key: &str| options.get(key).and_then(Value::as_bool);
        let number = |key: &str| options.get(key).and_then(Value::as_u64);

        if let Some(value) = flag("fetchAllMembers") {
            config.fetch_all_members = value;
        }
        if let Some(lifetime) = seconds("messageCacheLifetime") {
            config.message_cache_lifetime = lifetime;
        }
        config.message_sweep_interval = seconds("messageSweepInterval").unwrap_or(config.message_cache_lifetime);
        if let Some(interval) = seconds("userSweepInterval") {
            config.user_sweep_interval = interval;
        }

        if let Some(shard_id) = number("shardID") {
            config.shard_id = u32::try_from(shard_id).map_err(|_| configuration("shardID", "is out of range"))?;
        }
        if let Some(shard_count) = number("shardCount") {
            config.shard_count = u32::try_from(shard_count).map_err(|_| configuration("shardCount", "is out of range"))?;
        }
        if config.shard_id >= config.shard_count {
            return Err(configuration("shardID", "must be lower than shardCount"));
        }

        // negative offsets are accepted and treated as none
        if let Some(offset) = options.get("http.restTimeOffset").and_then(Value::as_i64) {
            config.rest_time_offset = Duration::from_millis(offset.max(0) as u64);
        }

        if let Some(name) = options.get("ws.compression").and_then(Value::as_str) {
            config.compression = Compression::from_name(name)
                .ok_or_else(|| configuration("ws.compression", format!("{name} is not a supported compression")))?;
        }
        if let Some(name) = options.get("ws.encoding").and_then(Value::as_str) {
            config.encoding = Encoding::from_name(name)
                .ok_or_else(|| configuration("ws.encoding", format!("{name} is not a supported encoding")))?;
        }
        if let Some(events) = options.get("ws.disabledEvents").and_then(Value::as_array) {
            config.disabled_events = events.iter().filter_map(Value::as_str).map(str::to_owned).collect();
        }
        if let Some(threshold) = number("ws.largeThreshold") {
            config.large_threshold = threshold as u32;
        }
        if let Some(presence) = options.get("ws.presence") {
            config.presence = presence.clone();
        }
        if let Some(timeout) = options.get("ws.readyTimeoutPerGuild").and_then(Value::as_f64) {
            config.ready_timeout_per_guild = timeout;
        }

        Ok(config)
    }

    /// The part of the options the event handlers honour.
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            disabled_events: self.disabled_events.clone(),
            fetch_all_members: self.fetch_all_members,
            ready_timeout_per_guild: self.ready_timeout_per_guild,
        }
    }
}

fn configuration(key: &str, message: impl Into<String>) -> GatewayError {
    GatewayError::Configuration {
        key: key.to_owned(),
        message: message.into(),
    }
}
