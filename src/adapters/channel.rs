//! Socket.IO session channel over a websocket.
//!
//! A background task owns the websocket. It performs the Engine.IO and
//! Socket.IO handshakes, answers pings, forwards the investigation
//! notifications in arrival order and reconnects with capped exponential
//! backoff whenever the connection is lost.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::socketio::{EnginePacket, OpenHandshake, SocketPacket, ENGINE_IO_VERSION};
use super::{ChannelError, ChannelEvent, SessionChannel};
use crate::domain::events::EVENT_INVESTIGATE;
use crate::domain::{InvestigationRequest, Notification};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Buffered channel events before the transport waits on the consumer
const EVENT_BUFFER: usize = 256;

/// How long `disconnect` waits for a clean close
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connection settings for the Socket.IO channel
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Backend base URL (http, https, ws or wss)
    pub endpoint: Url,

    /// Delay before the first reconnect attempt
    pub reconnect_initial: Duration,

    /// Upper bound on the reconnect delay
    pub reconnect_max: Duration,

    /// Delay multiplier between consecutive failed attempts
    pub backoff_multiplier: f64,

    /// Bound on the websocket and namespace handshakes
    pub handshake_timeout: Duration,
}

impl ChannelSettings {
    /// Settings with default backoff for an endpoint
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            reconnect_initial: Duration::from_millis(1000),
            reconnect_max: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Websocket transport URL (`/socket.io/?EIO=4&transport=websocket`)
    pub fn websocket_url(&self) -> Result<Url, ChannelError> {
        let scheme = match self.endpoint.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ChannelError::InvalidEndpoint(format!(
                    "unsupported scheme '{}' in {}",
                    other, self.endpoint
                )))
            }
        };

        let mut url = self.transport_url("websocket");
        url.set_scheme(scheme).map_err(|_| {
            ChannelError::InvalidEndpoint(format!("cannot use scheme {} for {}", scheme, url))
        })?;
        Ok(url)
    }

    /// Polling transport URL, used by the handshake probe
    pub fn polling_url(&self) -> Result<Url, ChannelError> {
        let mut url = self.transport_url("polling");
        let scheme = match self.endpoint.scheme() {
            "ws" | "http" => "http",
            "wss" | "https" => "https",
            other => {
                return Err(ChannelError::InvalidEndpoint(format!(
                    "unsupported scheme '{}' in {}",
                    other, self.endpoint
                )))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            ChannelError::InvalidEndpoint(format!("cannot use scheme {} for {}", scheme, url))
        })?;
        Ok(url)
    }

    fn transport_url(&self, transport: &str) -> Url {
        let mut url = self.endpoint.clone();
        let path = format!("{}/socket.io/", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.set_query(Some(&format!(
            "EIO={}&transport={}",
            ENGINE_IO_VERSION, transport
        )));
        url
    }

    /// Reconnect delay for a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial = self.reconnect_initial.as_millis() as f64;
        if attempt <= 1 {
            return self.reconnect_initial.min(self.reconnect_max);
        }

        let delay = initial * self.backoff_multiplier.powi((attempt - 1) as i32);
        let capped = delay.min(self.reconnect_max.as_millis() as f64) as u64;
        Duration::from_millis(capped)
    }
}

/// Commands from the handle to the transport task
#[derive(Debug)]
enum Command {
    Emit(String),
    Close,
}

/// Handle to a live Socket.IO channel.
///
/// Dropping the handle stops the transport task.
pub struct SocketIoChannel {
    commands: mpsc::UnboundedSender<Command>,
    connected: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl SocketIoChannel {
    /// Spawn the transport task and start connecting.
    ///
    /// Events arrive on the returned receiver in the order the backend sent
    /// them.
    pub fn connect(
        settings: ChannelSettings,
    ) -> Result<(Self, mpsc::Receiver<ChannelEvent>), ChannelError> {
        let ws_url = settings.websocket_url()?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (connected_tx, connected_rx) = watch::channel(false);

        info!(endpoint = %settings.endpoint, "Opening session channel");
        let task = tokio::spawn(channel_loop(
            ws_url,
            settings,
            command_rx,
            event_tx,
            connected_tx,
        ));

        Ok((
            Self {
                commands: command_tx,
                connected: connected_rx,
                task: Some(task),
            },
            event_rx,
        ))
    }
}

#[async_trait]
impl SessionChannel for SocketIoChannel {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    async fn start_investigation(
        &mut self,
        request: &InvestigationRequest,
    ) -> Result<bool, ChannelError> {
        if !self.is_connected() {
            debug!("Start requested while disconnected; not sent");
            return Ok(false);
        }

        let payload = serde_json::to_value(request)
            .map_err(|e| ChannelError::Protocol(format!("cannot encode request: {}", e)))?;
        let frame = SocketPacket::event(EVENT_INVESTIGATE, vec![payload]).to_frame();

        self.commands
            .send(Command::Emit(frame))
            .map_err(|_| ChannelError::Closed)?;

        info!(indicator = %request.indicator, "Investigation requested");
        Ok(true)
    }

    async fn disconnect(&mut self) {
        let _ = self.commands.send(Command::Close);

        if let Some(mut task) = self.task.take() {
            if timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("Channel did not close in time; aborting");
                task.abort();
            }
        }
        info!("Session channel closed");
    }
}

impl Drop for SocketIoChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Why a connected session ended
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Lost(String),
}

async fn channel_loop(
    ws_url: Url,
    settings: ChannelSettings,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<ChannelEvent>,
    connected: watch::Sender<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        match timeout(settings.handshake_timeout, open_session(&ws_url)).await {
            Ok(Ok((ws, handshake))) => {
                attempt = 0;
                info!(sid = %handshake.sid, "Session channel connected");
                connected.send_replace(true);

                if events.send(ChannelEvent::Connected).await.is_err() {
                    return;
                }

                let end = pump(ws, &handshake, &mut commands, &events).await;
                connected.send_replace(false);

                match end {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Lost(reason) => {
                        warn!(%reason, "Session channel lost");
                        if events
                            .send(ChannelEvent::Disconnected { reason })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            Ok(Err(e)) => warn!(error = %e, "Session channel connect failed"),
            Err(_) => warn!("Session channel handshake timed out"),
        }

        attempt += 1;
        let delay = settings.delay_for_attempt(attempt);
        debug!(attempt, ?delay, "Reconnecting after delay");

        if !wait_for_retry(delay, &mut commands).await {
            return;
        }
    }
}

/// Sleep before reconnecting; returns false if the handle asked to close
async fn wait_for_retry(delay: Duration, commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
    let deadline = Instant::now() + delay;

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => return true,
            command = commands.recv() => match command {
                None | Some(Command::Close) => return false,
                Some(Command::Emit(_)) => warn!("Dropping outbound message while disconnected"),
            },
        }
    }
}

#[instrument(skip_all, fields(url = %ws_url))]
async fn open_session(ws_url: &Url) -> Result<(WsStream, OpenHandshake), ChannelError> {
    let (mut ws, _) = connect_async(ws_url.as_str()).await?;

    let handshake = loop {
        let text = next_text(&mut ws).await?;
        match EnginePacket::decode(&text)? {
            EnginePacket::Open(handshake) => break handshake,
            EnginePacket::Noop => continue,
            other => {
                return Err(ChannelError::Protocol(format!(
                    "expected open packet, got {:?}",
                    other
                )))
            }
        }
    };

    ws.send(Message::Text(SocketPacket::connect().to_frame()))
        .await?;

    loop {
        let text = next_text(&mut ws).await?;
        match EnginePacket::decode(&text)? {
            EnginePacket::Ping(data) => {
                ws.send(Message::Text(EnginePacket::Pong(data).encode()))
                    .await?;
            }
            EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                SocketPacket::Connect { .. } => break,
                SocketPacket::ConnectError { data, .. } => {
                    let reason = data.map(|d| d.to_string()).unwrap_or_default();
                    return Err(ChannelError::Rejected(reason));
                }
                other => debug!(?other, "Ignoring packet before namespace connect"),
            },
            EnginePacket::Close => return Err(ChannelError::Closed),
            _ => {}
        }
    }

    Ok((ws, handshake))
}

async fn next_text(ws: &mut WsStream) -> Result<String, ChannelError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text),
            Some(Ok(Message::Close(_))) | None => return Err(ChannelError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn pump(
    mut ws: WsStream,
    handshake: &OpenHandshake,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &mpsc::Sender<ChannelEvent>,
) -> SessionEnd {
    let liveness = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let mut deadline = Instant::now() + liveness;

    loop {
        tokio::select! {
            frame = ws.next() => {
                deadline = Instant::now() + liveness;
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Lost("closed by server".to_string())
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                };

                match interpret(&text) {
                    FrameAction::Reply(reply) => {
                        if let Err(e) = ws.send(Message::Text(reply)).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                    FrameAction::Deliver(notification) => {
                        debug!(event = notification.name(), "Notification received");
                        if events.send(ChannelEvent::Notification(notification)).await.is_err() {
                            let _ = ws.close(None).await;
                            return SessionEnd::Shutdown;
                        }
                    }
                    FrameAction::Lost(reason) => return SessionEnd::Lost(reason),
                    FrameAction::Skip => {}
                }
            }
            command = commands.recv() => match command {
                Some(Command::Emit(frame)) => {
                    if let Err(e) = ws.send(Message::Text(frame)).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                None | Some(Command::Close) => {
                    let _ = ws
                        .send(Message::Text(EnginePacket::Message("1".to_string()).encode()))
                        .await;
                    let _ = ws.close(None).await;
                    return SessionEnd::Shutdown;
                }
            },
            _ = sleep_until(deadline) => {
                return SessionEnd::Lost(format!("no ping within {:?}", liveness));
            }
        }
    }
}

/// What to do with one inbound frame
#[derive(Debug, PartialEq)]
enum FrameAction {
    Reply(String),
    Deliver(Notification),
    Lost(String),
    Skip,
}

fn interpret(frame: &str) -> FrameAction {
    let packet = match EnginePacket::decode(frame) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(error = %e, "Skipping undecodable frame");
            return FrameAction::Skip;
        }
    };

    match packet {
        EnginePacket::Ping(data) => FrameAction::Reply(EnginePacket::Pong(data).encode()),
        EnginePacket::Close => FrameAction::Lost("engine close".to_string()),
        EnginePacket::Message(body) => match SocketPacket::decode(&body) {
            Ok(SocketPacket::Event { name, args, .. }) => match Notification::from_event(&name, args) {
                Some(notification) => FrameAction::Deliver(notification),
                None => {
                    debug!(%name, "Ignoring unsubscribed event");
                    FrameAction::Skip
                }
            },
            Ok(SocketPacket::Disconnect { .. }) => {
                FrameAction::Lost("namespace disconnected by server".to_string())
            }
            Ok(other) => {
                debug!(?other, "Ignoring socket packet");
                FrameAction::Skip
            }
            Err(e) => {
                warn!(error = %e, "Skipping socket packet");
                FrameAction::Skip
            }
        },
        _ => FrameAction::Skip,
    }
}

/// Perform the Engine.IO polling handshake against an endpoint.
///
/// Confirms a Socket.IO server is listening without opening a websocket.
pub async fn probe(settings: &ChannelSettings) -> Result<OpenHandshake, ChannelError> {
    let url = settings.polling_url()?;
    debug!(%url, "Probing backend");

    let body = reqwest::Client::new()
        .get(url)
        .timeout(settings.handshake_timeout)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    EnginePacket::decode_payload(&body)?
        .into_iter()
        .find_map(|packet| match packet {
            EnginePacket::Open(handshake) => Some(handshake),
            _ => None,
        })
        .ok_or_else(|| ChannelError::Protocol("no open packet in polling response".to_string()))
}
