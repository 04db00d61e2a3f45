// src/notify/pusher.rs - Pusher WebSocket client
use super::protocol::{self, ErrorAction, Frame, Inbound};
use super::{NotificationSource, NotifyError, TransportEvent};
use crate::config::PusherConfig;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};

const EVENT_BUFFER: usize = 32;
const COMMAND_BUFFER: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected { socket_id: String },
    Disconnected,
}

/// Handle on a Pusher connection maintained by a background task.
///
/// The task reconnects on its own after drops. Dropping the handle stops it.
pub struct PusherConnection {
    events: mpsc::Receiver<TransportEvent>,
    commands: mpsc::Sender<String>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl PusherConnection {
    /// Start connecting. Returns immediately; watch for
    /// [`TransportEvent::ConnectionEstablished`] before subscribing.
    pub fn connect(config: &PusherConfig) -> Self {
        let url = protocol::socket_url(&config.key, &config.cluster, config.endpoint.as_deref());
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (commands, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);

        let link = Link {
            events: events_tx,
            commands: commands_rx,
            state: state_tx,
        };
        let timing = Timing {
            reconnect_delay: config.reconnect_delay(),
            pong_timeout: config.pong_timeout(),
        };
        let task = tokio::spawn(run(url, timing, link));

        Self {
            events,
            commands,
            state,
            task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }
}

impl Drop for PusherConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl NotificationSource for PusherConnection {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    async fn subscribe(&self, channel: &str) -> Result<(), NotifyError> {
        if !matches!(*self.state.borrow(), ConnectionState::Connected { .. }) {
            return Err(NotifyError::NotConnected);
        }
        tracing::debug!("Subscribing to channel '{}'", channel);
        self.commands
            .send(protocol::subscribe_frame(channel))
            .await
            .map_err(|_| NotifyError::Closed)
    }
}

/// Task side of the handle's channels.
struct Link {
    events: mpsc::Sender<TransportEvent>,
    commands: mpsc::Receiver<String>,
    state: watch::Sender<ConnectionState>,
}

impl Link {
    /// Forward an event; `false` once the handle is gone.
    async fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    reconnect_delay: Duration,
    /// How long to wait for any frame after sending a ping.
    pong_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Reconnect(ErrorAction),
    Stop,
}

async fn run(url: String, timing: Timing, mut link: Link) {
    loop {
        let _ = link.state.send(ConnectionState::Connecting);
        tracing::info!("Connecting to notification service");

        let end = match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                // Subscriptions queued for a previous connection are void.
                while link.commands.try_recv().is_ok() {}
                let end = session(socket, &mut link, timing.pong_timeout).await;
                let _ = link.state.send(ConnectionState::Disconnected);
                if !link.emit(TransportEvent::Disconnected).await {
                    return;
                }
                end
            }
            Err(e) => {
                tracing::warn!("Connection to notification service failed: {}", e);
                let _ = link.state.send(ConnectionState::Disconnected);
                SessionEnd::Reconnect(ErrorAction::ReconnectWithDelay)
            }
        };

        match end {
            SessionEnd::Stop => return,
            SessionEnd::Reconnect(ErrorAction::Fatal) => {
                tracing::error!("Notification service refused the connection, not reconnecting");
                return;
            }
            SessionEnd::Reconnect(ErrorAction::ReconnectNow) => {}
            SessionEnd::Reconnect(ErrorAction::ReconnectWithDelay) => {
                tracing::info!("Reconnecting in {}s", timing.reconnect_delay.as_secs());
                tokio::time::sleep(timing.reconnect_delay).await;
            }
        }
    }
}

async fn session<S>(socket: WebSocketStream<S>, link: &mut Link, pong_timeout: Duration) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut sink, mut stream) = socket.split();
    let mut activity_timeout = Duration::from_secs(120);
    let mut awaiting_pong = false;

    loop {
        let wait = if awaiting_pong { pong_timeout } else { activity_timeout };

        tokio::select! {
            command = link.commands.recv() => {
                let Some(frame) = command else {
                    let _ = sink.close().await;
                    return SessionEnd::Stop;
                };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    tracing::warn!("Failed to send to notification service: {}", e);
                    return SessionEnd::Reconnect(ErrorAction::ReconnectWithDelay);
                }
            }
            received = tokio::time::timeout(wait, stream.next()) => {
                let message = match received {
                    Err(_) if awaiting_pong => {
                        tracing::warn!("No pong within {}s, dropping connection", pong_timeout.as_secs());
                        return SessionEnd::Reconnect(ErrorAction::ReconnectWithDelay);
                    }
                    Err(_) => {
                        tracing::debug!("Connection idle, sending ping");
                        if sink.send(Message::Text(protocol::ping_frame().into())).await.is_err() {
                            return SessionEnd::Reconnect(ErrorAction::ReconnectWithDelay);
                        }
                        awaiting_pong = true;
                        continue;
                    }
                    Ok(None) => {
                        tracing::info!("Notification service closed the connection");
                        return SessionEnd::Reconnect(ErrorAction::ReconnectWithDelay);
                    }
                    Ok(Some(Err(e))) => {
                        tracing::warn!("Notification socket error: {}", e);
                        return SessionEnd::Reconnect(ErrorAction::ReconnectWithDelay);
                    }
                    Ok(Some(Ok(message))) => message,
                };
                awaiting_pong = false;

                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(close) => {
                        let code = close.map(|c| u64::from(u16::from(c.code)));
                        tracing::info!("Notification service sent close {:?}", code);
                        return SessionEnd::Reconnect(ErrorAction::from_code(code));
                    }
                    _ => continue,
                };

                let frame = match Frame::parse(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Ignoring unparseable frame: {}", e);
                        continue;
                    }
                };

                let forward = match Inbound::from(frame) {
                    Inbound::Connected(info) => {
                        activity_timeout = Duration::from_secs(info.activity_timeout.max(1));
                        tracing::info!("Connected, socket id {}", info.socket_id);
                        let _ = link.state.send(ConnectionState::Connected {
                            socket_id: info.socket_id.clone(),
                        });
                        Some(TransportEvent::ConnectionEstablished { socket_id: info.socket_id })
                    }
                    Inbound::Error(err) => {
                        tracing::warn!("Notification service error {:?}: {}", err.code, err.message);
                        if err.code.is_some() {
                            return SessionEnd::Reconnect(ErrorAction::from_code(err.code));
                        }
                        None
                    }
                    Inbound::Ping => {
                        if sink.send(Message::Text(protocol::pong_frame().into())).await.is_err() {
                            return SessionEnd::Reconnect(ErrorAction::ReconnectWithDelay);
                        }
                        None
                    }
                    Inbound::Pong => None,
                    Inbound::SubscriptionSucceeded { channel } => {
                        Some(TransportEvent::SubscriptionSucceeded { channel })
                    }
                    Inbound::ChannelEvent { channel, event, data } => {
                        Some(TransportEvent::ChannelEvent { channel, event, data })
                    }
                    Inbound::Other { event } => {
                        tracing::debug!("Ignoring frame '{}'", event);
                        None
                    }
                };

                if let Some(event) = forward {
                    if !link.emit(event).await {
                        return SessionEnd::Stop;
                    }
                }
            }
        }
    }
}
