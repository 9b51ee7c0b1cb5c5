// =============================================================================
// Session Connection Manager - reconnect, heartbeat, resubscription replay
// =============================================================================
//
// One session owns exactly one transport at a time and survives transport
// drops. The whole lifecycle runs on a single task whose `tokio::select!`
// loop is the state-transition guard: commands, socket frames and timers are
// one event queue, so only one of them mutates connection state at a time.
//
// State machine: disconnected -> connecting -> connected -> disconnected,
// with a fixed reconnect delay (no exponential growth: worst-case
// reconnection latency stays bounded). `close()` is terminal.
//
// The desired-subscription set is tracked independently of transport state.
// The server has no memory of a dropped session's subscriptions, so every
// successful connect replays the full desired set before any other traffic.
// =============================================================================

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::Timeframe;

type Transport = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection tuning for one session.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Full WebSocket endpoint, client identifier included.
    pub url: String,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
}

/// Connectivity state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: `close()` was called, no further reconnect attempts.
    Closed,
}

pub(crate) enum Command {
    Subscribe {
        symbol: String,
        timeframes: BTreeSet<Timeframe>,
    },
    Unsubscribe {
        symbol: String,
    },
    Close,
}

/// Cloneable handle to a running session connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    events: broadcast::Sender<ServerMessage>,
}

impl ConnectionHandle {
    /// Add or update the desired subscription for `symbol`. Idempotent:
    /// repeating a subscribe updates the timeframe set. Honored immediately
    /// when connected, otherwise on the next successful connect.
    pub fn subscribe(&self, symbol: impl Into<String>, timeframes: BTreeSet<Timeframe>) {
        let _ = self.cmd_tx.send(Command::Subscribe {
            symbol: symbol.into(),
            timeframes,
        });
    }

    /// Drop the desired subscription for `symbol`.
    pub fn unsubscribe(&self, symbol: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Unsubscribe {
            symbol: symbol.into(),
        });
    }

    /// Tear down the transport, clear all desired subscriptions and suppress
    /// further reconnect attempts. Terminal.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Watch connectivity transitions.
    pub fn status_stream(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Subscribe to the inbound server-message stream.
    pub fn events(&self) -> broadcast::Receiver<ServerMessage> {
        self.events.subscribe()
    }

    /// Handle backed by a bare command channel, for exercising callers
    /// without a live transport.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (_status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        (
            Self {
                cmd_tx,
                status_rx,
                events,
            },
            cmd_rx,
        )
    }
}

/// The connection task. Created via [`SessionConnection::spawn`].
pub struct SessionConnection {
    config: ConnectionConfig,
    desired: HashMap<String, BTreeSet<Timeframe>>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ServerMessage>,
}

enum SessionEnd {
    /// Transport dropped; schedule a reconnect.
    Dropped,
    /// Explicitly closed; terminal.
    Closed,
}

impl SessionConnection {
    /// Spawn the connection task and return its handle.
    pub fn spawn(config: ConnectionConfig) -> ConnectionHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let conn = Self {
            config,
            desired: HashMap::new(),
            cmd_rx,
            status_tx,
            events: events.clone(),
        };
        tokio::spawn(conn.run());

        ConnectionHandle {
            cmd_tx,
            status_rx,
            events,
        }
    }

    async fn run(mut self) {
        let mut first_attempt = true;

        loop {
            if !first_attempt && !self.backoff().await {
                break;
            }
            first_attempt = false;

            self.set_status(ConnectionStatus::Connecting);
            info!(url = %self.config.url, "connecting to distribution endpoint");

            match connect_async(&self.config.url).await {
                Ok((transport, _response)) => {
                    info!("distribution endpoint connected");
                    self.set_status(ConnectionStatus::Connected);

                    match self.run_connected(transport).await {
                        SessionEnd::Closed => break,
                        SessionEnd::Dropped => {
                            self.set_status(ConnectionStatus::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "connect failed, retrying after fixed delay");
                    self.set_status(ConnectionStatus::Disconnected);
                }
            }
        }

        self.set_status(ConnectionStatus::Closed);
        info!("session connection closed");
    }

    /// Wait out the reconnect delay while still serving commands, so the
    /// desired set stays current and `close()` is honored promptly.
    /// Returns false when the session was closed.
    async fn backoff(&mut self) -> bool {
        let Self {
            config,
            desired,
            cmd_rx,
            ..
        } = self;

        let sleep = tokio::time::sleep(config.reconnect_delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,

                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Subscribe { symbol, timeframes }) => {
                        desired.insert(symbol, timeframes);
                    }
                    Some(Command::Unsubscribe { symbol }) => {
                        desired.remove(&symbol);
                    }
                    Some(Command::Close) | None => {
                        desired.clear();
                        return false;
                    }
                },
            }
        }
    }

    /// Drive one live transport until it drops or the session is closed.
    async fn run_connected(&mut self, transport: Transport) -> SessionEnd {
        let Self {
            config,
            desired,
            cmd_rx,
            events,
            ..
        } = self;

        let (mut sink, mut stream) = transport.split();

        // Replay the full desired set before any other traffic.
        for (symbol, timeframes) in desired.iter() {
            let msg =
                ClientMessage::subscribe(symbol.clone(), timeframes.iter().copied().collect());
            if let Err(e) = send_control(&mut sink, &msg).await {
                warn!(error = %e, "subscription replay failed, reconnecting");
                return SessionEnd::Dropped;
            }
        }
        if !desired.is_empty() {
            info!(count = desired.len(), "desired subscriptions replayed");
        }

        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately; consume it so the
        // first ping goes out one full interval after connect.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    if let Err(e) = send_control(&mut sink, &ClientMessage::ping()).await {
                        warn!(error = %e, "heartbeat send failed, reconnecting");
                        return SessionEnd::Dropped;
                    }
                    debug!("heartbeat ping sent");
                }

                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Subscribe { symbol, timeframes }) => {
                        desired.insert(symbol.clone(), timeframes.clone());
                        let msg = ClientMessage::subscribe(
                            symbol,
                            timeframes.into_iter().collect(),
                        );
                        if let Err(e) = send_control(&mut sink, &msg).await {
                            warn!(error = %e, "subscribe send failed, reconnecting");
                            return SessionEnd::Dropped;
                        }
                    }
                    Some(Command::Unsubscribe { symbol }) => {
                        desired.remove(&symbol);
                        let msg = ClientMessage::unsubscribe(symbol);
                        if let Err(e) = send_control(&mut sink, &msg).await {
                            warn!(error = %e, "unsubscribe send failed, reconnecting");
                            return SessionEnd::Dropped;
                        }
                    }
                    Some(Command::Close) | None => {
                        desired.clear();
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return SessionEnd::Closed;
                    }
                },

                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(msg) => {
                                // Nobody listening is fine.
                                let _ = events.send(msg);
                            }
                            Err(e) => {
                                warn!(error = %e, "malformed server message discarded");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        // Frame-level keepalive; tungstenite answers pings
                        // during the read itself.
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!("server closed the connection");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "transport error, reconnecting");
                        return SessionEnd::Dropped;
                    }
                    None => {
                        warn!("transport stream ended, reconnecting");
                        return SessionEnd::Dropped;
                    }
                },
            }
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }
}

async fn send_control<S>(sink: &mut S, msg: &ClientMessage) -> Result<(), SyncError>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(msg).map_err(|e| SyncError::Protocol(e.to_string()))?;
    sink.send(WsMessage::Text(json))
        .await
        .map_err(|e| SyncError::Transport(e.to_string()))
}
