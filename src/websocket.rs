//! Tokio driver for one gateway connection.
//!
//! A single task owns the socket and every connection timer. It feeds socket frames, heartbeat
//! ticks and closures into the [`GatewaySession`] and executes the returned [`GatewayAction`]s.
//! Dispatch events leave the task in arrival order through an unbounded channel.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::codec::{Compression, Encoding, Frame, WireCodec};
use crate::error::GatewayError;
use crate::gateway::{GatewayAction, GatewayIdentity, GatewaySession, Status};
use crate::gateway_structs::Payload;
use crate::ratelimit::{SendDecision, SendGate};
use crate::DISCORD_API_VERSION;

/// Type Alias which shortens the Split Stream from the Discord Gateway websocket.
pub type ReadSplitStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Type Alias which shortens the Split Sink from the Discord Gateway websocket.
pub type WriteSplitSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Everything needed to open and identify a connection.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway url as returned by the REST api, without query.
    pub url: String,
    pub encoding: Encoding,
    pub compression: Compression,
    pub identity: GatewayIdentity,
}

impl GatewayConfig {
    /// The url with the version, encoding and compression query.
    pub fn connect_url(&self) -> String {
        let mut url = format!(
            "{}/?v={}&encoding={}",
            self.url.trim_end_matches('/'),
            DISCORD_API_VERSION,
            self.encoding.name()
        );
        if let Some(compression) = self.compression.name() {
            url.push_str("&compress=");
            url.push_str(compression);
        }
        url
    }
}

/// Commands accepted by the driver task.
#[derive(Debug)]
pub enum GatewayCommand {
    /// Send a payload through the send gate.
    Send(Payload),
    /// Close the connection and stop the task.
    Destroy,
}

/// What the driver reports to its owner.
#[derive(Debug)]
pub enum GatewayEvent {
    Dispatch { event: String, data: Value },
    StatusChange(Status),
    /// The connection gave up; the task has stopped.
    Fatal(GatewayError),
}

/// Snapshot of the connection, published on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: Status,
    pub ping: Option<Duration>,
}

/// Owner side of a running driver task.
pub struct GatewayHandle {
    commands: mpsc::UnboundedSender<GatewayCommand>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl GatewayHandle {
    /// Spawns the driver, which connects right away.
    pub fn spawn(config: GatewayConfig, events: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let (state_sender, state) = watch::channel(ConnectionState::default());

        let driver = GatewayDriver::new(config, command_receiver, events, state_sender);
        let task = tokio::spawn(driver.run());

        Self { commands, state, task }
    }

    /// Queues a payload; it is sent once the connection is up and the send gate allows it.
    pub fn send(&self, payload: Payload) -> Result<(), GatewayError> {
        self.commands.send(GatewayCommand::Send(payload)).map_err(|_| GatewayError::Closed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver which observes every state change.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Closes the connection and waits for the task to stop.
    pub async fn destroy(self) {
        let _ = self.commands.send(GatewayCommand::Destroy);
        if let Err(error) = self.task.await {
            warn!(%error, "gateway task ended abnormally");
        }
    }
}

struct GatewayDriver {
    config: GatewayConfig,
    session: GatewaySession,
    codec: WireCodec,
    gate: SendGate<Payload>,
    /// Payloads submitted while no session was established.
    backlog: VecDeque<Payload>,
    commands: mpsc::UnboundedReceiver<GatewayCommand>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    state: watch::Sender<ConnectionState>,
    published: ConnectionState,
    sink: Option<WriteSplitSink>,
    stream: Option<ReadSplitStream>,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Instant>,
    finished: bool,
}

impl GatewayDriver {
    fn new(
        config: GatewayConfig,
        commands: mpsc::UnboundedReceiver<GatewayCommand>,
        events: mpsc::UnboundedSender<GatewayEvent>,
        state: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            session: GatewaySession::new(config.identity.clone()),
            codec: WireCodec::new(config.encoding, config.compression),
            config,
            gate: SendGate::default(),
            backlog: VecDeque::new(),
            commands,
            events,
            state,
            published: ConnectionState::default(),
            sink: None,
            stream: None,
            heartbeat: None,
            reconnect_at: None,
            finished: false,
        }
    }

    async fn run(mut self) {
        self.session.connect();
        self.reconnect_at = Some(Instant::now());
        self.publish();

        while !self.finished {
            let release = self.gate.next_release().map(Instant::from_std);

            tokio::select! {
                frame = next_frame(&mut self.stream) => self.on_frame(frame).await,
                command = self.commands.recv() => match command {
                    Some(GatewayCommand::Send(payload)) => self.submit(payload).await,
                    Some(GatewayCommand::Destroy) | None => self.destroy().await,
                },
                _ = tick(&mut self.heartbeat) => {
                    let actions = self.session.heartbeat_tick(std::time::Instant::now());
                    self.execute(actions).await;
                }
                _ = sleep_until(release) => self.drain_gate().await,
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open_socket().await;
                }
            }

            self.flush_backlog().await;
            self.publish();
        }
        debug!("gateway task stopped");
    }

    async fn open_socket(&mut self) {
        let url = self.config.connect_url();
        debug!(%url, status = ?self.session.status(), "opening gateway socket");

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                let (sink, stream) = socket.split();
                self.sink = Some(sink);
                self.stream = Some(stream);
                self.codec.reset();
                self.gate.reset_window();
                self.session.socket_opened();
            }
            Err(error) => {
                let actions = self.session.connection_failed(GatewayError::TransientSocket(error.to_string()));
                self.execute(actions).await;
            }
        }
    }

    async fn on_frame(&mut self, frame: Option<Result<Message, WsError>>) {
        let frame = match frame {
            Some(Ok(Message::Text(text))) => Frame::Text(text),
            Some(Ok(Message::Binary(bytes))) => Frame::Binary(bytes),
            Some(Ok(Message::Close(close))) => {
                let code = close.as_ref().map(|close| u16::from(close.code));
                info!(?code, reason = ?close.map(|close| close.reason), "gateway closed the socket");
                return self.socket_lost(code).await;
            }
            Some(Ok(_)) => return,
            Some(Err(error)) => {
                let actions = self.session.connection_failed(GatewayError::TransientSocket(error.to_string()));
                return self.execute(actions).await;
            }
            None => return self.socket_lost(None).await,
        };

        let actions = match self.codec.decode(frame) {
            Ok(Some(payload)) => self.session.receive(payload, std::time::Instant::now()),
            Ok(None) => return,
            Err(error) => self.session.connection_failed(GatewayError::Decode(error)),
        };
        self.execute(actions).await;
    }

    async fn socket_lost(&mut self, code: Option<u16>) {
        self.sink = None;
        self.stream = None;
        let actions = self.session.socket_closed(code);
        self.execute(actions).await;
    }

    async fn execute(&mut self, actions: Vec<GatewayAction>) {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                GatewayAction::SendPriority(payload) => {
                    let payload = self.gate.send_priority(payload, std::time::Instant::now());
                    if let Err(error) = self.write(&payload).await {
                        queue.extend(self.write_failed(error));
                    }
                }
                GatewayAction::StartHeartbeat(interval) => {
                    let interval = interval.max(Duration::from_millis(1));
                    self.gate.set_heartbeat_interval(interval);
                    // first beat at a random point of the interval
                    let jitter = interval.mul_f64(rand::random::<f64>());
                    let mut heartbeat = time::interval_at(Instant::now() + jitter, interval);
                    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.heartbeat = Some(heartbeat);
                }
                GatewayAction::StopHeartbeat => self.heartbeat = None,
                GatewayAction::Dispatch { event, data } => {
                    let _ = self.events.send(GatewayEvent::Dispatch { event, data });
                }
                GatewayAction::Close { code, reason } => self.close(code, reason).await,
                GatewayAction::Reconnect { delay } => {
                    debug!(?delay, "scheduling reconnect");
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                GatewayAction::Fatal(error) => {
                    warn!(%error, "gateway connection failed permanently");
                    self.heartbeat = None;
                    self.reconnect_at = None;
                    self.close(1000, "fatal error").await;
                    self.publish();
                    let _ = self.events.send(GatewayEvent::Fatal(error));
                    self.finished = true;
                }
            }
        }
    }

    /// Offers a payload to the send gate, holding it back while no session is established.
    async fn submit(&mut self, payload: Payload) {
        if self.session.status() != Status::Connected {
            self.backlog.push_back(payload);
            return;
        }

        match self.gate.try_send(payload, std::time::Instant::now()) {
            SendDecision::Immediate(payload) => self.write_general(payload).await,
            SendDecision::Queued => debug!(queued = self.gate.queued(), "send gate exhausted, payload queued"),
        }
    }

    async fn flush_backlog(&mut self) {
        if self.session.status() != Status::Connected {
            return;
        }
        while let Some(payload) = self.backlog.pop_front() {
            self.submit(payload).await;
        }
    }

    async fn drain_gate(&mut self) {
        for payload in self.gate.drain(std::time::Instant::now()) {
            self.write_general(payload).await;
        }
    }

    async fn write_general(&mut self, payload: Payload) {
        if let Err(error) = self.write(&payload).await {
            debug!(opcode = payload.opcode, "payload not sent");
            let actions = self.write_failed(error);
            self.execute(actions).await;
        }
    }

    /// A missing socket is already being replaced, other write errors go to the session.
    fn write_failed(&mut self, error: GatewayError) -> Vec<GatewayAction> {
        if matches!(error, GatewayError::Closed) {
            debug!("no gateway socket to write to");
            return Vec::new();
        }
        self.session.connection_failed(error)
    }

    async fn write(&mut self, payload: &Payload) -> Result<(), GatewayError> {
        let sink = self.sink.as_mut().ok_or(GatewayError::Closed)?;
        let message = match self.codec.encode(payload)? {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(bytes) => Message::Binary(bytes),
        };
        sink.send(message).await.map_err(|error| GatewayError::TransientSocket(error.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &'static str) {
        self.stream = None;
        if let Some(mut sink) = self.sink.take() {
            let frame = CloseFrame { code: CloseCode::from(code), reason: Cow::Borrowed(reason) };
            if let Err(error) = sink.send(Message::Close(Some(frame))).await {
                debug!(%error, "close frame could not be sent");
            }
        }
    }

    async fn destroy(&mut self) {
        let actions = self.session.destroy();
        self.execute(actions).await;
        self.gate.clear();
        self.backlog.clear();
        self.reconnect_at = None;
        self.finished = true;
    }

    fn publish(&mut self) {
        let state = ConnectionState { status: self.session.status(), ping: self.session.ping() };
        if state == self.published {
            return;
        }
        if state.status != self.published.status {
            let _ = self.events.send(GatewayEvent::StatusChange(state.status));
        }
        self.published = state;
        let _ = self.state.send(state);
    }
}

async fn next_frame(stream: &mut Option<ReadSplitStream>) -> Option<Result<Message, WsError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn config(encoding: Encoding, compression: Compression) -> GatewayConfig {
        GatewayConfig {
            url: "wss://gateway.discord.gg/".into(),
            encoding,
            compression,
            identity: GatewayIdentity {
                token: Arc::from("abc"),
                shard: [0, 1],
                intents: 0,
                large_threshold: 250,
                presence: json!({}),
            },
        }
    }

    #[test]
    fn connect_url_carries_the_negotiation() {
        assert_eq!(
            config(Encoding::Json, Compression::ZlibStream).connect_url(),
            "wss://gateway.discord.gg/?v=6&encoding=json&compress=zlib-stream"
        );
        assert_eq!(
            config(Encoding::Etf, Compression::None).connect_url(),
            "wss://gateway.discord.gg/?v=6&encoding=etf"
        );
    }
}
