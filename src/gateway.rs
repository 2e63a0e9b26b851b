//! Connection state machine for one gateway session.
//!
//! [`GatewaySession`] performs no IO. The driver in [`crate::websocket`] feeds it socket and timer
//! events and executes the [`GatewayAction`]s it returns, which keeps every transition, the
//! heartbeat protocol and the resume-or-identify decision testable without a network.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::gateway_structs::{opcode, Hello, Identify, IdentifyConnectionProperties, Payload, Resume};

/// Close codes after which the gateway will not accept the client again without changes.
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

/// Close codes that invalidate the session, forcing a fresh identify.
const SESSION_ENDING_CLOSE_CODES: [u16; 3] = [1000, 4007, 4009];

/// Close code used when the client itself drops a connection it wants to resume.
pub const RESUMABLE_CLOSE_CODE: u16 = 4000;

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);

const PING_SAMPLES: usize = 3;

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Disconnected,
    Connecting,
    Reconnecting,
    /// Socket open, handshake not complete.
    Nearly,
    Connected,
    /// Disconnected with no reconnect planned.
    Idle,
}

/// What the session sends when it identifies.
#[derive(Debug, Clone)]
pub struct GatewayIdentity {
    pub token: Arc<str>,
    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],
    pub intents: u32,
    pub large_threshold: u32,
    /// Initial presence, omitted when null.
    pub presence: Value,
}

/// Instructions for the driver.
#[derive(Debug)]
pub enum GatewayAction {
    /// Write the payload, bypassing the send queue (heartbeat, identify, resume).
    SendPriority(Payload),
    /// Start (or restart) the heartbeat timer.
    StartHeartbeat(Duration),
    StopHeartbeat,
    /// Hand a dispatch event to the event dispatch table.
    Dispatch { event: String, data: Value },
    /// Close the current socket without reporting the closure back.
    Close { code: u16, reason: &'static str },
    /// Open a new socket after the delay.
    Reconnect { delay: Duration },
    /// Unrecoverable, the session is now idle.
    Fatal(GatewayError),
}

/// State of one logical gateway session.
pub struct GatewaySession {
    identity: GatewayIdentity,
    status: Status,
    session_id: Option<String>,
    sequence: Option<u64>,
    heartbeat_interval: Option<Duration>,
    last_heartbeat_acked: bool,
    last_heartbeat_sent: Option<Instant>,
    pings: VecDeque<Duration>,
    reconnect_attempts: u32,
}

impl GatewaySession {
    pub fn new(identity: GatewayIdentity) -> Self {
        Self {
            identity,
            status: Status::Disconnected,
            session_id: None,
            sequence: None,
            heartbeat_interval: None,
            last_heartbeat_acked: true,
            last_heartbeat_sent: None,
            pings: VecDeque::with_capacity(PING_SAMPLES),
            reconnect_attempts: 0,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    pub fn last_heartbeat_acked(&self) -> bool {
        self.last_heartbeat_acked
    }

    /// Average of the last heartbeat round trips.
    pub fn ping(&self) -> Option<Duration> {
        if self.pings.is_empty() {
            return None;
        }
        let total: Duration = self.pings.iter().sum();
        Some(total / self.pings.len() as u32)
    }

    /// Starts a fresh connection attempt (login).
    pub fn connect(&mut self) {
        match self.status {
            Status::Disconnected | Status::Idle => {
                self.status = Status::Connecting;
                self.reconnect_attempts = 0;
            }
            other => debug!(status = ?other, "connect ignored, connection already in progress"),
        }
    }

    /// The socket is open; the handshake follows the hello payload.
    pub fn socket_opened(&mut self) {
        if matches!(self.status, Status::Connecting | Status::Reconnecting) {
            self.status = Status::Nearly;
        }
    }

    /// Processes one decoded payload.
    pub fn receive(&mut self, payload: Payload, now: Instant) -> Vec<GatewayAction> {
        if let Some(sequence) = payload.sequence_number {
            self.sequence = Some(self.sequence.map_or(sequence, |last| last.max(sequence)));
        }

        match payload.opcode {
            opcode::HELLO => self.hello(payload.data),
            opcode::HEARTBEAT => vec![GatewayAction::SendPriority(self.heartbeat_payload())],
            opcode::HEARTBEAT_ACK => {
                self.last_heartbeat_acked = true;
                if let Some(sent) = self.last_heartbeat_sent.take() {
                    if self.pings.len() == PING_SAMPLES {
                        self.pings.pop_front();
                    }
                    self.pings.push_back(now.saturating_duration_since(sent));
                }
                Vec::new()
            }
            opcode::RECONNECT => {
                info!("gateway requested a reconnect");
                self.status = Status::Reconnecting;
                vec![
                    GatewayAction::StopHeartbeat,
                    GatewayAction::Close { code: RESUMABLE_CLOSE_CODE, reason: "reconnect requested" },
                    GatewayAction::Reconnect { delay: Duration::ZERO },
                ]
            }
            opcode::INVALID_SESSION => self.invalid_session(payload.data.as_bool().unwrap_or(false)),
            opcode::DISPATCH => match payload.event_name {
                Some(event) => self.dispatch(event, payload.data),
                None => {
                    warn!("dispatch payload without an event name");
                    Vec::new()
                }
            },
            other => {
                debug!(opcode = other, "ignoring unknown gateway opcode");
                Vec::new()
            }
        }
    }

    /// One tick of the heartbeat timer.
    pub fn heartbeat_tick(&mut self, now: Instant) -> Vec<GatewayAction> {
        if !self.last_heartbeat_acked {
            warn!("no heartbeat acknowledgement since the last tick, connection zombied");
            self.status = Status::Reconnecting;
            self.last_heartbeat_acked = true;
            self.last_heartbeat_sent = None;
            let delay = self.next_reconnect_delay();
            return vec![
                GatewayAction::StopHeartbeat,
                GatewayAction::Close { code: RESUMABLE_CLOSE_CODE, reason: "heartbeat not acknowledged" },
                GatewayAction::Reconnect { delay },
            ];
        }

        self.last_heartbeat_acked = false;
        self.last_heartbeat_sent = Some(now);
        vec![GatewayAction::SendPriority(self.heartbeat_payload())]
    }

    /// The socket closed or failed. `code` is `None` when it dropped without a close frame.
    pub fn socket_closed(&mut self, code: Option<u16>) -> Vec<GatewayAction> {
        if matches!(self.status, Status::Disconnected | Status::Idle) {
            return Vec::new();
        }

        let mut actions = vec![GatewayAction::StopHeartbeat];
        self.last_heartbeat_acked = true;
        self.last_heartbeat_sent = None;

        if let Some(code) = code.filter(|code| FATAL_CLOSE_CODES.contains(code)) {
            self.status = Status::Idle;
            self.reset_session();
            actions.push(GatewayAction::Fatal(GatewayError::Handshake(format!(
                "gateway closed the connection with unrecoverable code {code}"
            ))));
            return actions;
        }

        if !self.is_resumable(code) {
            self.reset_session();
        }

        self.status = Status::Reconnecting;
        let delay = self.next_reconnect_delay();
        info!(?code, resume = self.session_id.is_some(), ?delay, "gateway connection lost, reconnecting");
        actions.push(GatewayAction::Reconnect { delay });
        actions
    }

    /// A frame could not be decoded or the socket failed.
    ///
    /// Transient errors drop the socket and resume the session, anything else ends the connection.
    pub fn connection_failed(&mut self, error: GatewayError) -> Vec<GatewayAction> {
        if !error.is_transient() {
            warn!(%error, "unrecoverable gateway connection error");
            self.status = Status::Idle;
            self.reset_session();
            return vec![GatewayAction::StopHeartbeat, GatewayAction::Fatal(error)];
        }

        warn!(%error, "dropping the gateway connection");
        let reason = match error {
            GatewayError::Decode(_) => "decode error",
            _ => "socket error",
        };
        let mut actions = vec![GatewayAction::Close { code: RESUMABLE_CLOSE_CODE, reason }];
        actions.extend(self.socket_closed(None));
        actions
    }

    /// Tears the session down; nothing survives.
    pub fn destroy(&mut self) -> Vec<GatewayAction> {
        let was_open = !matches!(self.status, Status::Disconnected | Status::Idle);
        self.status = Status::Disconnected;
        self.reset_session();
        self.heartbeat_interval = None;
        self.last_heartbeat_acked = true;
        self.last_heartbeat_sent = None;
        self.pings.clear();
        self.reconnect_attempts = 0;

        let mut actions = vec![GatewayAction::StopHeartbeat];
        if was_open {
            actions.push(GatewayAction::Close { code: 1000, reason: "client destroyed" });
        }
        actions
    }

    /// Whether a closure with this code can be followed by a resume.
    pub fn is_resumable(&self, code: Option<u16>) -> bool {
        let session_kept = code.map_or(true, |code| !SESSION_ENDING_CLOSE_CODES.contains(&code));
        session_kept && self.session_id.is_some() && self.sequence.is_some()
    }

    fn hello(&mut self, data: Value) -> Vec<GatewayAction> {
        let hello: Hello = match serde_json::from_value(data) {
            Ok(hello) => hello,
            Err(error) => return self.connection_failed(GatewayError::Decode(error.into())),
        };
        debug!(trace = ?hello.trace, interval = hello.heartbeat_interval, "received hello");

        let interval = Duration::from_millis(hello.heartbeat_interval);
        self.heartbeat_interval = Some(interval);
        self.last_heartbeat_acked = true;

        let mut actions = vec![GatewayAction::StartHeartbeat(interval)];
        match self.resume_payload() {
            Some(resume) => actions.push(GatewayAction::SendPriority(resume)),
            None => {
                if matches!(self.status, Status::Connecting | Status::Reconnecting) {
                    self.status = Status::Nearly;
                }
                actions.push(GatewayAction::SendPriority(self.identify_payload()));
            }
        }
        actions
    }

    fn invalid_session(&mut self, resumable: bool) -> Vec<GatewayAction> {
        if resumable {
            if let Some(resume) = self.resume_payload() {
                info!("session invalidated but resumable, resuming");
                return vec![GatewayAction::SendPriority(resume)];
            }
        }

        info!("session invalidated, identifying from scratch");
        self.reset_session();
        self.status = Status::Connecting;
        vec![GatewayAction::SendPriority(self.identify_payload())]
    }

    fn dispatch(&mut self, event: String, data: Value) -> Vec<GatewayAction> {
        match event.as_str() {
            "READY" => {
                let is_bot = data.pointer("/user/bot").and_then(Value::as_bool).unwrap_or(false);
                if !is_bot {
                    self.status = Status::Idle;
                    self.reset_session();
                    return vec![
                        GatewayAction::StopHeartbeat,
                        GatewayAction::Close { code: 1000, reason: "user accounts are not supported" },
                        GatewayAction::Fatal(GatewayError::Handshake("User accounts are not supported".into())),
                    ];
                }

                self.session_id = data.get("session_id").and_then(Value::as_str).map(str::to_owned);
                self.status = Status::Connected;
                self.reconnect_attempts = 0;
            }
            "RESUMED" => {
                self.status = Status::Connected;
                self.reconnect_attempts = 0;
            }
            _ => {}
        }

        vec![GatewayAction::Dispatch { event, data }]
    }

    fn reset_session(&mut self) {
        self.session_id = None;
        self.sequence = None;
    }

    fn next_reconnect_delay(&mut self) -> Duration {
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        reconnect_delay(self.reconnect_attempts)
    }

    fn heartbeat_payload(&self) -> Payload {
        payload(opcode::HEARTBEAT, self.sequence)
    }

    fn identify_payload(&self) -> Payload {
        let identify = Identify {
            token: self.identity.token.clone(),
            connection_properties: IdentifyConnectionProperties::current(),
            compress: false,
            large_threshold: self.identity.large_threshold,
            shard: self.identity.shard,
            presence: self.identity.presence.clone(),
            intents: self.identity.intents,
        };
        payload(opcode::IDENTIFY, identify)
    }

    fn resume_payload(&self) -> Option<Payload> {
        let session_id = self.session_id.clone()?;
        let sequence = self.sequence?;
        Some(payload(opcode::RESUME, Resume { token: self.identity.token.clone(), session_id, sequence }))
    }
}

/// Exponential back-off with up to a second of jitter; the first retry is immediate-ish.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let base = match attempt {
        0 | 1 => Duration::ZERO,
        attempt => Duration::from_secs(1u64 << (attempt - 2).min(6)).min(MAX_RECONNECT_DELAY),
    };
    base + Duration::from_millis(rand::random::<u64>() % 1000)
}

fn payload<T: Serialize>(opcode: u32, data: T) -> Payload {
    Payload::new(opcode, serde_json::to_value(data).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use serde_json::json;

    fn identity() -> GatewayIdentity {
        GatewayIdentity {
            token: Arc::from("abc"),
            shard: [0, 1],
            intents: 0,
            large_threshold: 250,
            presence: json!({}),
        }
    }

    fn hello(interval: u64) -> Payload {
        Payload::new(opcode::HELLO, json!({"heartbeat_interval": interval, "_trace": ["gateway-prd-1"]}))
    }

    fn dispatch(event: &str, sequence: u64, data: Value) -> Payload {
        Payload { opcode: opcode::DISPATCH, data, sequence_number: Some(sequence), event_name: Some(event.into()) }
    }

    fn ready(session_id: &str, sequence: u64) -> Payload {
        dispatch("READY", sequence, json!({"session_id": session_id, "user": {"id": "1", "bot": true}, "guilds": []}))
    }

    fn sent(actions: &[GatewayAction]) -> Vec<&Payload> {
        actions.iter().filter_map(|action| match action {
            GatewayAction::SendPriority(payload) => Some(payload),
            _ => None,
        }).collect()
    }

    fn connected(now: Instant) -> GatewaySession {
        let mut session = GatewaySession::new(identity());
        session.connect();
        session.socket_opened();
        session.receive(hello(1000), now);
        session.receive(ready("xyz", 1), now);
        session
    }

    #[test]
    fn fresh_connection_identifies_and_becomes_connected() {
        let now = Instant::now();
        let mut session = GatewaySession::new(identity());
        assert_eq!(session.status(), Status::Disconnected);

        session.connect();
        assert_eq!(session.status(), Status::Connecting);
        session.socket_opened();
        assert_eq!(session.status(), Status::Nearly);

        let actions = session.receive(hello(41_250), now);
        assert!(matches!(actions[0], GatewayAction::StartHeartbeat(interval) if interval == Duration::from_millis(41_250)));
        let identify = sent(&actions)[0];
        assert_eq!(identify.opcode, opcode::IDENTIFY);
        assert_eq!(identify.data["token"], json!("abc"));
        assert_eq!(identify.data["shard"], json!([0, 1]));
        assert_eq!(identify.data["presence"], json!({}));
        assert_eq!(session.status(), Status::Nearly);

        let actions = session.receive(ready("xyz", 1), now);
        assert_eq!(session.status(), Status::Connected);
        assert_eq!(session.session_id(), Some("xyz"));
        assert!(matches!(&actions[0], GatewayAction::Dispatch { event, .. } if event == "READY"));
    }

    #[test]
    fn missing_ack_within_two_intervals_reconnects() {
        let start = Instant::now();
        let mut session = connected(start);
        let interval = session.heartbeat_interval().unwrap();

        let first = session.heartbeat_tick(start + interval);
        assert_eq!(sent(&first)[0].opcode, opcode::HEARTBEAT);
        assert_eq!(sent(&first)[0].data, json!(1));
        assert_eq!(session.status(), Status::Connected);

        let second = session.heartbeat_tick(start + interval * 2);
        assert_eq!(session.status(), Status::Reconnecting);
        assert!(second.iter().any(|action| matches!(action, GatewayAction::Close { code: RESUMABLE_CLOSE_CODE, .. })));
        assert!(second.iter().any(|action| matches!(action, GatewayAction::Reconnect { .. })));
        assert_eq!(session.session_id(), Some("xyz"));
    }

    #[test]
    fn acknowledged_heartbeats_keep_the_connection_and_measure_ping() {
        let start = Instant::now();
        let mut session = connected(start);

        session.heartbeat_tick(start);
        session.receive(Payload::new(opcode::HEARTBEAT_ACK, Value::Null), start + Duration::from_millis(40));
        let actions = session.heartbeat_tick(start + Duration::from_secs(1));

        assert_eq!(session.status(), Status::Connected);
        assert_eq!(sent(&actions).len(), 1);
        assert_eq!(session.ping(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn resumable_close_resumes_and_preserves_sequence() {
        let now = Instant::now();
        let mut session = connected(now);
        session.receive(dispatch("MESSAGE_CREATE", 5, json!({})), now);

        let actions = session.socket_closed(Some(4000));
        assert_eq!(session.status(), Status::Reconnecting);
        assert!(actions.iter().any(|action| matches!(action, GatewayAction::Reconnect { .. })));

        session.socket_opened();
        assert_eq!(session.status(), Status::Nearly);
        let actions = session.receive(hello(1000), now);
        let resume = sent(&actions)[0];
        assert_eq!(resume.opcode, opcode::RESUME);
        assert_eq!(resume.data, json!({"token": "abc", "session_id": "xyz", "seq": 5}));

        session.receive(dispatch("RESUMED", 6, json!({})), now);
        assert_eq!(session.status(), Status::Connected);
        assert_eq!(session.session_id(), Some("xyz"));
        assert_eq!(session.sequence(), Some(6));
    }

    #[test]
    fn session_ending_close_reidentifies() {
        let now = Instant::now();
        let mut session = connected(now);

        session.socket_closed(Some(4009));
        assert_eq!(session.session_id(), None);
        assert_eq!(session.sequence(), None);
        assert_eq!(session.status(), Status::Reconnecting);

        // same states as a first connect from here on
        session.socket_opened();
        assert_eq!(session.status(), Status::Nearly);
        let actions = session.receive(hello(1000), now);
        assert_eq!(sent(&actions)[0].opcode, opcode::IDENTIFY);
        assert_eq!(session.status(), Status::Nearly);
        session.receive(ready("abc-2", 1), now);
        assert_eq!(session.status(), Status::Connected);
    }

    #[test]
    fn transient_connection_errors_resume() {
        let now = Instant::now();
        let mut session = connected(now);
        session.receive(dispatch("MESSAGE_CREATE", 2, json!({})), now);

        let actions = session.connection_failed(GatewayError::TransientSocket("broken pipe".into()));
        assert!(matches!(actions[0], GatewayAction::Close { code: RESUMABLE_CLOSE_CODE, reason: "socket error" }));
        assert!(actions.iter().any(|action| matches!(action, GatewayAction::Reconnect { .. })));
        assert_eq!(session.status(), Status::Reconnecting);
        assert!(session.is_resumable(None));

        let actions = session.connection_failed(GatewayError::Decode(DecodeError::Etf("bad tag".into())));
        assert!(matches!(actions[0], GatewayAction::Close { reason: "decode error", .. }));
    }

    #[test]
    fn other_connection_errors_end_the_connection() {
        let now = Instant::now();
        let mut session = connected(now);

        let actions = session.connection_failed(GatewayError::Handshake("rejected".into()));
        assert_eq!(session.status(), Status::Idle);
        assert_eq!(session.session_id(), None);
        assert!(matches!(actions.last(), Some(GatewayAction::Fatal(GatewayError::Handshake(_)))));
        assert!(!actions.iter().any(|action| matches!(action, GatewayAction::Reconnect { .. })));
    }

    #[test]
    fn invalid_session_resets_and_reconnects_from_scratch() {
        let now = Instant::now();
        let mut session = connected(now);
        session.socket_closed(None);
        session.socket_opened();
        session.receive(hello(1000), now);

        let actions = session.receive(Payload::new(opcode::INVALID_SESSION, json!(false)), now);
        assert_eq!(session.status(), Status::Connecting);
        assert_eq!(session.session_id(), None);
        assert_eq!(sent(&actions)[0].opcode, opcode::IDENTIFY);

        session.receive(ready("abc-2", 1), now);
        assert_eq!(session.status(), Status::Connected);
        assert_eq!(session.session_id(), Some("abc-2"));
    }

    #[test]
    fn fatal_close_codes_go_idle() {
        let now = Instant::now();
        let mut session = connected(now);
        let actions = session.socket_closed(Some(4004));
        assert_eq!(session.status(), Status::Idle);
        assert!(actions.iter().any(|action| matches!(action, GatewayAction::Fatal(GatewayError::Handshake(_)))));
        assert!(!actions.iter().any(|action| matches!(action, GatewayAction::Reconnect { .. })));
    }

    #[test]
    fn user_accounts_are_rejected() {
        let now = Instant::now();
        let mut session = GatewaySession::new(identity());
        session.connect();
        session.socket_opened();
        session.receive(hello(1000), now);

        let user_ready = dispatch("READY", 1, json!({"session_id": "s", "user": {"id": "1"}}));
        let actions = session.receive(user_ready, now);
        assert_eq!(session.status(), Status::Idle);
        assert!(matches!(actions.last(), Some(GatewayAction::Fatal(GatewayError::Handshake(_)))));
    }

    #[test]
    fn server_heartbeat_request_is_answered() {
        let now = Instant::now();
        let mut session = connected(now);
        let actions = session.receive(Payload::new(opcode::HEARTBEAT, Value::Null), now);
        assert_eq!(sent(&actions)[0].opcode, opcode::HEARTBEAT);
        // a requested heartbeat is not a tick, the ack bookkeeping stays untouched
        assert!(session.last_heartbeat_acked());
    }

    #[test]
    fn destroy_clears_everything() {
        let now = Instant::now();
        let mut session = connected(now);
        let actions = session.destroy();
        assert_eq!(session.status(), Status::Disconnected);
        assert_eq!(session.session_id(), None);
        assert!(actions.iter().any(|action| matches!(action, GatewayAction::Close { code: 1000, .. })));
        assert!(session.socket_closed(Some(4000)).is_empty());
    }

    #[test]
    fn reconnect_delay_grows_and_caps() {
        assert!(reconnect_delay(1) < Duration::from_secs(1));
        assert!(reconnect_delay(3) >= Duration::from_secs(2));
        assert!(reconnect_delay(50) <= MAX_RECONNECT_DELAY + Duration::from_secs(1));
    }
}
