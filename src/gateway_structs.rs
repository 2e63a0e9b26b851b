//! A file specifically designated to creation of structs which represent Payloads & Objects being sent through the Discord Gateway & related.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// [Gateway opcodes][https://discord.com/developers/docs/topics/opcodes-and-status-codes#gateway]
pub mod opcode {
    /// Server -> client: an event was dispatched.
    pub const DISPATCH: u32 = 0;
    /// Both directions: keep the connection alive.
    pub const HEARTBEAT: u32 = 1;
    /// Client -> server: start a new session.
    pub const IDENTIFY: u32 = 2;
    /// Client -> server: update the client's presence.
    pub const PRESENCE_UPDATE: u32 = 3;
    /// Client -> server: resume a previous session.
    pub const RESUME: u32 = 6;
    /// Server -> client: reconnect and resume immediately.
    pub const RECONNECT: u32 = 7;
    /// Client -> server: request guild members in chunks.
    pub const REQUEST_GUILD_MEMBERS: u32 = 8;
    /// Server -> client: the session has been invalidated.
    pub const INVALID_SESSION: u32 = 9;
    /// Server -> client: sent right after connecting, contains the heartbeat interval.
    pub const HELLO: u32 = 10;
    /// Server -> client: a heartbeat was received.
    pub const HEARTBEAT_ACK: u32 = 11;
}

#[derive(Deserialize, Debug, Clone)]
/// Response of the plain GetGateway request.
pub struct GetGatewayResponse {
    /// The WSS URL that can be used for connecting to the gateway
    pub url: String,
}

#[derive(Deserialize, Debug, Serialize, Clone)]
/// The Hello payload recieved from Discords gateway whenever a new connection is opened
pub struct Hello {
    /// The interval (in milliseconds) the client should heartbeat with
    pub heartbeat_interval: u64,

    /// Servers the connection went through, only useful for debugging.
    #[serde(rename = "_trace", default)]
    pub trace: Vec<String>,
}

#[derive(Debug, Serialize, Clone)]
/// Payload used to trigger the initial handshake with the gateway.
pub struct Identify {

    /// The authentication token for this bot
    pub token: Arc<str>,

    #[serde(rename = "properties")]
    /// Information about the connection sent to discord.
    pub connection_properties: IdentifyConnectionProperties,

    /// Payload compression, always off; transport compression is negotiated in the url instead.
    pub compress: bool,

    /// If a guild has more total members than the threshold then the gateway will stop sending offline members.
    pub large_threshold: u32,

    /// The current shard which is an array of [shard_id, total_shards]
    pub shard: [u32; 2],

    /// The presence the session starts with.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub presence: Value,

    /// the Gateway intents you wish to recieve
    pub intents: u32,
}

#[derive(Debug, Serialize, Clone, Copy)]
/// Connection information/properties related to the Identify handshake payload.
pub struct IdentifyConnectionProperties {

    #[serde(rename = "$os")]
    /// The operating system the bot uses
    pub operating_system: &'static str,

    #[serde(rename = "$browser")]
    /// Library Name
    pub browser: &'static str,

    #[serde(rename = "$device")]
    /// Library Name
    pub device: &'static str,
}

impl IdentifyConnectionProperties {
    /// Properties describing this library on the current platform.
    pub fn current() -> Self {
        let package_name = env!("CARGO_PKG_NAME");
        Self {
            operating_system: std::env::consts::OS,
            browser: package_name,
            device: package_name,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
/// Payload used to re-attach to a previous session.
pub struct Resume {
    pub token: Arc<str>,
    pub session_id: String,
    #[serde(rename = "seq")]
    pub sequence: u64,
}

#[derive(Debug, Serialize, Clone)]
/// Asks the gateway to stream members of a guild through GUILD_MEMBERS_CHUNK events.
pub struct RequestGuildMembers {
    pub guild_id: String,
    pub query: String,
    pub limit: u32,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
/// Representation of a payload to be sent or recieved from Discords Gateway.
pub struct Payload<T = Value> {

    #[serde(rename = "op")]
    /// The opcode of this payload that denotes the payload type
    pub opcode: u32,

    #[serde(rename = "d", default)]
    /// The data of this payload
    pub data: T,

    #[serde(rename = "s", default)]
    /// Sequence number of this payload
    /// Used for resuming sessions and heartbeats
    pub sequence_number: Option<u64>,

    #[serde(rename = "t", default)]
    /// The event name for this payload
    pub event_name: Option<String>,
}

impl<T> Payload<T> {

    /// Creates a new payload with only the opcode & data fields set.
    pub fn new(opcode: u32, data: T) -> Self {
        Self {
            opcode,
            data,
            sequence_number: None,
            event_name: None,
        }
    }
}

impl<T: Serialize> Payload<T> {

    /// Erases the data type so the payload can pass through the wire codec.
    pub fn into_value(self) -> serde_json::Result<Payload<Value>> {
        Ok(Payload {
            opcode: self.opcode,
            data: serde_json::to_value(self.data)?,
            sequence_number: self.sequence_number,
            event_name: self.event_name,
        })
    }
}
