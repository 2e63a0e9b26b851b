//! ### What is Gatecord?
//! Gatecord is a Discord gateway client created for and in Rust, with a focus on keeping
//! a consistent in-memory cache of guilds, channels, members and messages.
//!
//! The [`client::Client`] owns the cache and one gateway connection; the connection is driven by
//! [`websocket`], which executes the decisions of the sans-IO [`gateway::GatewaySession`].

pub mod bot;
pub mod cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gateway;
pub mod gateway_structs;
pub mod http;
pub mod ratelimit;
pub mod timer;
pub mod validation;
pub mod websocket;

/// The version of the Discord api used for both REST and the gateway.
pub const DISCORD_API_VERSION: u32 = 6;

/// Base url every REST request is built upon.
pub const BASE_API_URL: &str = "https://discordapp.com/api";
