//! Error taxonomy shared by the codec, the gateway connection, the cache and the client.

use thiserror::Error;

/// Errors surfaced by the gateway core.
///
/// Connection level errors are handed to [`crate::gateway::GatewaySession::connection_failed`], which
/// reconnects whenever [`GatewayError::is_transient`] holds and ends the connection otherwise. Errors of
/// the cache and the handlers reach the embedding application as [`crate::events::ClientEvent::Error`].
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A frame could not be decompressed or decoded. Fatal to the connection, triggers a reconnect.
    #[error("failed to decode gateway frame: {0}")]
    Decode(#[from] DecodeError),

    /// The gateway refused the handshake. Fatal to the client, never retried.
    #[error("gateway handshake failed: {0}")]
    Handshake(String),

    /// The socket dropped or could not be opened.
    #[error("gateway socket error: {0}")]
    TransientSocket(String),

    /// A cache lookup missed where the caller expected the entity to be present.
    #[error(transparent)]
    UnresolvedReference(#[from] UnresolvedReference),

    /// A gateway or REST payload could not be turned into a cached entity.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The client options were rejected before any connection attempt.
    #[error("invalid client option {key}: {message}")]
    Configuration {
        /// The offending option key.
        key: String,
        /// Human readable reason.
        message: String,
    },

    /// The REST collaborator failed.
    #[error("rest request failed: {0}")]
    Rest(String),

    /// The gateway connection is not running.
    #[error("gateway connection is closed")]
    Closed,

    /// A request over the gateway was not answered in time.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl GatewayError {
    /// Whether the connection should recover from this error by reconnecting.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Decode(_) | GatewayError::TransientSocket(_))
    }
}

/// A frame failed to pass through the decompression or decoding stage.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid etf payload: {0}")]
    Etf(String),

    #[error("zlib stream could not be inflated: {0}")]
    Inflate(#[from] flate2::DecompressError),

    #[error("{buffered} bytes of compressed input without a message boundary, limit is {limit}")]
    Oversized { buffered: usize, limit: usize },

    #[error("unexpected {0} frame for the negotiated encoding")]
    UnexpectedFrame(&'static str),
}

/// An entity factory rejected its input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("{kind} payload is missing the {field} field")]
    MissingField { kind: &'static str, field: &'static str },

    #[error("unknown channel type {0}")]
    UnknownChannelType(u64),

    #[error("channel {0} can not hold messages")]
    NotTextBased(String),

    #[error(transparent)]
    Unresolved(#[from] UnresolvedReference),
}

/// A reference to an entity that is not in the cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unable to resolve unknown {kind} {id}")]
pub struct UnresolvedReference {
    /// The kind of entity, e.g. `channel`.
    pub kind: &'static str,
    /// The id that was looked up.
    pub id: String,
}

impl UnresolvedReference {
    pub fn new(kind: &'static str, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}
