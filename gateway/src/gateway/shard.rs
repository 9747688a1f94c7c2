use super::close_event::{CloseAction, CloseEvent};
use super::payloads::{self, Hello, Opcode, Payload, PresenceUpdate, Ready, StatusUpdate};
use super::timer::timer;
use super::{ConnectionState, GatewayError, Result, ShardInfo, ShardOptions};
use crate::dispatch::EventSender;
use crate::manager::IdentifyQueue;

#[cfg(feature = "compression")]
use super::decompress::Inflater;

use common::{jitter, jitter_between, Backoff};
use futures::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::value::RawValue;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WebSocketTx = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WebSocketRx = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Unacknowledged heartbeats tolerated before the connection is considered dead.
const MAX_MISSED_HEARTBEATS: u32 = 2;

/// Close code that tells the gateway we intend to resume. 1000 and 1001
/// invalidate the session.
const RESUME_CLOSE_CODE: u16 = 4000;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Resumable state of a gateway session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: Option<String>,
    pub seq: Option<u64>,
    pub resume_url: Option<String>,
}

impl SessionInfo {
    fn resume_data(&self) -> Option<(String, u64)> {
        match (&self.session_id, self.seq) {
            (Some(session_id), Some(seq)) => Some((session_id.clone(), seq)),
            _ => None,
        }
    }
}

pub struct Shard {
    shard_id: u16,
    shard_count: u16,
    options: Arc<ShardOptions>,
    identify_queue: Arc<dyn IdentifyQueue>,
    events: EventSender,
    session: Mutex<SessionInfo>,
    presence: Mutex<Option<StatusUpdate>>,
    latency: Mutex<Option<Duration>>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    status_update_tx: mpsc::Sender<StatusUpdate>,
    status_update_rx: tokio::sync::Mutex<mpsc::Receiver<StatusUpdate>>,
}

/// How a single connection ended.
#[derive(Debug, PartialEq, Eq)]
enum Disconnect {
    Shutdown,
    Reconnect { resume: bool, was_ready: bool },
}

/// What the receive loop does after handling one input.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Reconnect { resume: bool },
    Shutdown,
}

enum LoopEvent {
    Shutdown,
    Presence(StatusUpdate),
    Heartbeat,
    IdentifySlot,
    Frame(Option<std::result::Result<Message, tungstenite::Error>>),
}

#[derive(Debug)]
struct HeartbeatState {
    started: bool,
    acked: bool,
    misses: u32,
    sent_at: Option<Instant>,
}

/// State that lives exactly as long as one websocket connection.
struct Connection {
    tx: WebSocketTx,
    heartbeat: HeartbeatState,
    beat_tx: mpsc::Sender<()>,
    pending_identify: Option<BoxFuture<'static, ()>>,
    ready: bool,
    #[cfg(feature = "compression")]
    inflater: Inflater,
}

impl Shard {
    pub fn new(
        shard_id: u16,
        shard_count: u16,
        options: Arc<ShardOptions>,
        identify_queue: Arc<dyn IdentifyQueue>,
        events: EventSender,
    ) -> Arc<Shard> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let (status_update_tx, status_update_rx) = mpsc::channel(4);
        let presence = options.presence.clone();

        Arc::new(Shard {
            shard_id,
            shard_count,
            options,
            identify_queue,
            events,
            session: Mutex::new(SessionInfo::default()),
            presence: Mutex::new(presence),
            latency: Mutex::new(None),
            state_tx,
            shutdown_tx,
            status_update_tx,
            status_update_rx: tokio::sync::Mutex::new(status_update_rx),
        })
    }

    /// Connects and keeps the session alive, reconnecting as needed. Returns
    /// `Ok(())` after [`Shard::shutdown`], or the error that made the shard
    /// give up.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut status_update_rx = self.status_update_rx.lock().await;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let mut backoff = Backoff::new(self.options.backoff);
        let mut invalid_sessions = 0;
        let mut first = true;

        let res = loop {
            if *shutdown_rx.borrow() {
                break Ok(());
            }

            self.set_state(if first {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });
            first = false;

            let disconnect = self
                .connect(&mut status_update_rx, &mut shutdown_rx, &mut invalid_sessions)
                .await;

            match disconnect {
                Ok(Disconnect::Shutdown) => break Ok(()),
                Ok(Disconnect::Reconnect { resume, was_ready }) => {
                    if !resume {
                        self.clear_session();
                    }

                    if was_ready {
                        backoff.reset();
                    }

                    #[cfg(feature = "metrics")]
                    crate::metrics::RECONNECTS
                        .with_label_values(&[&self.shard_id.to_string(), if resume { "true" } else { "false" }])
                        .inc();
                }
                Err(e) if e.is_fatal() => {
                    self.log_err("Fatal gateway error, giving up", &e);
                    break Err(e);
                }
                Err(e) => self.log_err("Gateway connection failed", &e),
            }

            if backoff.attempts() >= self.options.max_reconnect_attempts {
                break Err(GatewayError::ConnectionFailed {
                    attempts: backoff.attempts(),
                });
            }

            let delay = backoff.next_delay();
            debug!(shard_id = self.shard_id, delay_ms = delay.as_millis() as u64, "Waiting before reconnecting");

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown_rx.changed() => {}
            }
        };

        self.set_state(ConnectionState::Closed);
        res
    }

    /// Closes the connection with 1000 and makes [`Shard::run`] return.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Queues a presence update. It is sent once the shard is ready and used
    /// for every later identify. Returns false if the queue is full.
    pub fn update_presence(&self, presence: StatusUpdate) -> bool {
        *self.presence.lock() = Some(presence.clone());

        match self.status_update_tx.try_send(presence) {
            Ok(()) => true,
            Err(e) => {
                warn!(shard_id = self.shard_id, error = %e, "Failed to queue presence update");
                false
            }
        }
    }

    pub fn shard_id(&self) -> u16 {
        self.shard_id
    }

    pub fn shard_count(&self) -> u16 {
        self.shard_count
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn session(&self) -> SessionInfo {
        self.session.lock().clone()
    }

    /// Time between the last heartbeat and its acknowledgement.
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.lock()
    }

    async fn connect(
        &self,
        status_update_rx: &mut mpsc::Receiver<StatusUpdate>,
        shutdown_rx: &mut watch::Receiver<bool>,
        invalid_sessions: &mut u32,
    ) -> Result<Disconnect> {
        let base = {
            let session = self.session.lock();
            match (&session.resume_url, session.resume_data()) {
                (Some(resume_url), Some(_)) => resume_url.clone(),
                _ => self.options.gateway_url.clone(),
            }
        };

        let url = ShardOptions::connect_url(&base)?;
        debug!(shard_id = self.shard_id, %url, "Connecting to gateway");

        let connect = timeout(self.options.connect_timeout, connect_async(url.as_str()));
        let (ws, _) = tokio::select! {
            res = connect => res.map_err(|_| GatewayError::ConnectTimeout)??,
            _ = shutdown_rx.changed() => return Ok(Disconnect::Shutdown),
        };

        let (tx, mut rx): (WebSocketTx, WebSocketRx) = ws.split();
        let (beat_tx, mut beat_rx) = mpsc::channel(1);

        let mut conn = Connection {
            tx,
            heartbeat: HeartbeatState {
                started: false,
                acked: true,
                misses: 0,
                sent_at: None,
            },
            beat_tx,
            pending_identify: None,
            ready: false,
            #[cfg(feature = "compression")]
            inflater: Inflater::new(),
        };

        loop {
            let event = tokio::select! {
                _ = shutdown_rx.changed() => LoopEvent::Shutdown,
                Some(presence) = status_update_rx.recv(), if conn.ready => LoopEvent::Presence(presence),
                Some(()) = beat_rx.recv() => LoopEvent::Heartbeat,
                _ = wait_pending(&mut conn.pending_identify), if conn.pending_identify.is_some() => LoopEvent::IdentifySlot,
                frame = rx.next() => LoopEvent::Frame(frame),
            };

            let flow = match event {
                LoopEvent::Shutdown => Ok(Flow::Shutdown),

                LoopEvent::Presence(presence) => self
                    .send(&mut conn.tx, &PresenceUpdate::new(&presence))
                    .await
                    .map(|_| Flow::Continue),

                LoopEvent::Heartbeat => self.heartbeat(&mut conn).await,

                LoopEvent::IdentifySlot => {
                    conn.pending_identify = None;
                    self.identify(&mut conn).await.map(|_| Flow::Continue)
                }

                LoopEvent::Frame(None) => {
                    self.log("Gateway stream ended");
                    Ok(Flow::Reconnect { resume: true })
                }

                LoopEvent::Frame(Some(Err(e))) => Err(e.into()),

                LoopEvent::Frame(Some(Ok(message))) => {
                    self.handle_message(message, &mut conn, invalid_sessions).await
                }
            };

            match flow {
                Ok(Flow::Continue) => {}

                Ok(Flow::Shutdown) => {
                    self.log("Shutting down");
                    self.close(&mut conn.tx, CloseCode::Normal).await;
                    return Ok(Disconnect::Shutdown);
                }

                Ok(Flow::Reconnect { resume }) => {
                    let code = if resume {
                        CloseCode::Library(RESUME_CLOSE_CODE)
                    } else {
                        CloseCode::Normal
                    };

                    self.close(&mut conn.tx, code).await;
                    return Ok(Disconnect::Reconnect {
                        resume,
                        was_ready: conn.ready,
                    });
                }

                Err(e) if e.is_fatal() => {
                    self.close(&mut conn.tx, CloseCode::Normal).await;
                    return Err(e);
                }

                Err(e) => {
                    warn!(shard_id = self.shard_id, error = %e, "Error on gateway connection, reconnecting");
                    self.close(&mut conn.tx, CloseCode::Library(RESUME_CLOSE_CODE))
                        .await;

                    return Ok(Disconnect::Reconnect {
                        resume: true,
                        was_ready: conn.ready,
                    });
                }
            }
        }
    }

    async fn handle_message(
        &self,
        message: Message,
        conn: &mut Connection,
        invalid_sessions: &mut u32,
    ) -> Result<Flow> {
        let payload: Payload = match message {
            Message::Text(text) => serde_json::from_str(&text)?,

            #[cfg(feature = "compression")]
            Message::Binary(data) => match conn.inflater.push(&data)? {
                Some(data) => serde_json::from_slice(&data)?,
                None => return Ok(Flow::Continue),
            },

            #[cfg(not(feature = "compression"))]
            Message::Binary(data) => serde_json::from_slice(&data)?,

            Message::Close(frame) => return self.handle_close(CloseEvent::from_frame(frame)),

            // pings are answered by tungstenite
            _ => return Ok(Flow::Continue),
        };

        self.handle_payload(payload, conn, invalid_sessions).await
    }

    fn handle_close(&self, event: CloseEvent) -> Result<Flow> {
        self.log(format!(
            "Gateway closed the connection: {} {}",
            event.status_code, event.error
        ));

        match event.action() {
            CloseAction::Unauthorized => GatewayError::AuthenticationFailed.into(),
            CloseAction::Fatal => GatewayError::FatalClose {
                code: event.status_code,
                reason: event.error,
            }
            .into(),
            CloseAction::Identify => Ok(Flow::Reconnect { resume: false }),
            CloseAction::Resume => Ok(Flow::Reconnect { resume: true }),
        }
    }

    async fn handle_payload(
        &self,
        payload: Payload,
        conn: &mut Connection,
        invalid_sessions: &mut u32,
    ) -> Result<Flow> {
        match payload.opcode {
            Opcode::Dispatch => self.handle_dispatch(payload, conn, invalid_sessions).await,

            Opcode::Hello => {
                let hello: Hello = serde_json::from_str(payload.data_str())?;
                self.handle_hello(hello, conn).await?;
                Ok(Flow::Continue)
            }

            Opcode::HeartbeatAck => {
                conn.heartbeat.acked = true;
                conn.heartbeat.misses = 0;

                if let Some(sent_at) = conn.heartbeat.sent_at.take() {
                    let latency = sent_at.elapsed();
                    *self.latency.lock() = Some(latency);

                    #[cfg(feature = "metrics")]
                    crate::metrics::HEARTBEAT_LATENCY
                        .with_label_values(&[&self.shard_id.to_string()])
                        .observe(latency.as_secs_f64());
                }

                Ok(Flow::Continue)
            }

            Opcode::Heartbeat => {
                self.send_heartbeat(conn).await?;
                Ok(Flow::Continue)
            }

            Opcode::Reconnect => {
                self.log("Received reconnect payload from Discord");
                Ok(Flow::Reconnect { resume: true })
            }

            Opcode::InvalidSession => {
                let resumable: bool = serde_json::from_str(payload.data_str()).unwrap_or(false);

                if resumable {
                    self.log("Received resumable invalid session, reconnecting");
                    return Ok(Flow::Reconnect { resume: true });
                }

                *invalid_sessions += 1;
                if *invalid_sessions > self.options.max_invalid_sessions {
                    return GatewayError::IdentifyRejected {
                        attempts: *invalid_sessions,
                    }
                    .into();
                }

                self.log("Received invalid session, identifying again");
                self.clear_session();

                let (min, max) = self.options.invalid_session_delay;
                conn.pending_identify = Some(self.identify_gate(jitter_between(min, max)));
                self.set_state(ConnectionState::Identifying);

                Ok(Flow::Continue)
            }

            opcode => {
                warn!(shard_id = self.shard_id, ?opcode, "Received unexpected opcode");
                Ok(Flow::Reconnect { resume: true })
            }
        }
    }

    async fn handle_hello(&self, hello: Hello, conn: &mut Connection) -> Result<()> {
        if conn.heartbeat.started {
            debug!(shard_id = self.shard_id, "Ignoring duplicate hello");
            return Ok(());
        }

        let interval = hello.interval();
        timer(conn.beat_tx.clone(), interval, jitter(interval));
        conn.heartbeat.started = true;

        let resume = self.session.lock().resume_data();
        match resume {
            Some((session_id, seq)) => {
                self.set_state(ConnectionState::Resuming);
                debug!(shard_id = self.shard_id, seq, "Resuming session");

                let payload = payloads::Resume::new(&self.options.token, &session_id, seq);
                self.send(&mut conn.tx, &payload).await
            }
            None => {
                self.set_state(ConnectionState::Identifying);
                conn.pending_identify = Some(self.identify_gate(Duration::ZERO));
                Ok(())
            }
        }
    }

    async fn handle_dispatch(
        &self,
        payload: Payload,
        conn: &mut Connection,
        invalid_sessions: &mut u32,
    ) -> Result<Flow> {
        let seq = match payload.seq {
            Some(seq) => seq,
            None => {
                warn!(shard_id = self.shard_id, "Received dispatch without sequence");
                return Ok(Flow::Continue);
            }
        };

        {
            let mut session = self.session.lock();
            if let Some(last) = session.seq {
                if seq <= last {
                    debug!(shard_id = self.shard_id, seq, last, "Dropping replayed dispatch");
                    return Ok(Flow::Continue);
                }
            }

            session.seq = Some(seq);
        }

        let name = payload.event_name.clone().unwrap_or_default();

        match name.as_str() {
            "READY" => {
                let ready: Ready = serde_json::from_str(payload.data_str())?;

                {
                    let mut session = self.session.lock();
                    session.session_id = Some(ready.session_id);
                    session.resume_url = ready.resume_gateway_url;
                }

                self.mark_ready(conn, invalid_sessions);
                self.log("Ready");
            }

            "RESUMED" => {
                self.mark_ready(conn, invalid_sessions);
                self.log("Resumed");
            }

            _ => {}
        }

        #[cfg(feature = "metrics")]
        crate::metrics::GATEWAY_EVENTS
            .with_label_values(&[&self.shard_id.to_string(), &name])
            .inc();

        let data = match payload.data {
            Some(data) => data,
            None => RawValue::from_string("null".to_owned())?,
        };

        // a full queue must not keep the shard from shutting down
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(Flow::Shutdown);
        }

        tokio::select! {
            delivered = self.events.send(seq, name, data) => {
                if !delivered {
                    debug!(shard_id = self.shard_id, seq, "Event queue closed, dropping dispatch");
                }
                Ok(Flow::Continue)
            }
            _ = shutdown_rx.changed() => {
                debug!(shard_id = self.shard_id, seq, "Shutdown while waiting on event queue");
                Ok(Flow::Shutdown)
            }
        }
    }

    fn mark_ready(&self, conn: &mut Connection, invalid_sessions: &mut u32) {
        conn.ready = true;
        *invalid_sessions = 0;
        self.set_state(ConnectionState::Ready);
    }

    async fn heartbeat(&self, conn: &mut Connection) -> Result<Flow> {
        if !conn.heartbeat.acked {
            conn.heartbeat.misses += 1;
            warn!(shard_id = self.shard_id, misses = conn.heartbeat.misses, "Heartbeat was not acknowledged");

            if conn.heartbeat.misses >= MAX_MISSED_HEARTBEATS {
                self.log("Hasn't received heartbeat ack, reconnecting");
                return Ok(Flow::Reconnect { resume: true });
            }
        }

        self.send_heartbeat(conn).await?;
        Ok(Flow::Continue)
    }

    async fn send_heartbeat(&self, conn: &mut Connection) -> Result<()> {
        let seq = self.session.lock().seq;
        self.send(&mut conn.tx, &payloads::Heartbeat::new(seq)).await?;

        conn.heartbeat.acked = false;
        conn.heartbeat.sent_at = Some(Instant::now());
        Ok(())
    }

    async fn identify(&self, conn: &mut Connection) -> Result<()> {
        let presence = self.presence.lock().clone();
        let identify = payloads::Identify::new(
            &self.options.token,
            self.options.large_threshold,
            ShardInfo::new(self.shard_id, self.shard_count),
            presence.as_ref(),
            self.options.intents,
        );

        self.send(&mut conn.tx, &identify).await?;
        self.log("Identified");
        Ok(())
    }

    /// Resolves once the shard may identify, after waiting `delay` first.
    fn identify_gate(&self, delay: Duration) -> BoxFuture<'static, ()> {
        let queue = Arc::clone(&self.identify_queue);
        let shard_id = self.shard_id;

        Box::pin(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }

            queue.wait(shard_id).await;
        })
    }

    async fn send<T: Serialize>(&self, tx: &mut WebSocketTx, payload: &T) -> Result<()> {
        let json = serde_json::to_string(payload)?;
        tx.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn close(&self, tx: &mut WebSocketTx, code: CloseCode) {
        let frame = CloseFrame {
            code,
            reason: "".into(),
        };

        match timeout(CLOSE_TIMEOUT, tx.send(Message::Close(Some(frame)))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(shard_id = self.shard_id, error = %e, "Failed to send close frame"),
            Err(_) => debug!(shard_id = self.shard_id, "Timed out sending close frame"),
        }
    }

    fn clear_session(&self) {
        *self.session.lock() = SessionInfo::default();
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(shard_id = self.shard_id, from = %previous, to = %state, "Connection state changed");
        }
    }

    pub fn log(&self, msg: impl Display) {
        info!(shard_id = self.shard_id, "{}", msg);
    }

    pub fn log_err(&self, msg: impl Display, err: &GatewayError) {
        error!(shard_id = self.shard_id, error = %err, "{}", msg);
    }
}

async fn wait_pending(pending: &mut Option<BoxFuture<'static, ()>>) {
    match pending {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}
